//! Subscriber Store
//!
//! The store is the global mapping from target object to the set of effects
//! subscribed to each of its properties:
//!
//! ```text
//! TargetId -> { property key -> Dep }
//! Dep      -> { EffectId -> ReactiveEffect }   (insertion-ordered)
//! ```
//!
//! A property and an effect are in a many-to-many relationship: one
//! property can appear in several effects, and one effect usually reads
//! several properties. Membership is bidirectional: the effect keeps a
//! weak back-reference to every [`Dep`] it belongs to, so it can detach
//! from all of them before re-running.
//!
//! # Liveness
//!
//! A `Dep` holds its subscribers strongly: an effect that is subscribed to
//! a live target stays alive even if the caller dropped its handle. The
//! references are severed by `stop()`, by cleanup-before-run, or by the
//! target's last handle dropping (which purges the whole store entry). The
//! effect side holds only weak dep references, so there is no strong cycle.

use std::collections::HashMap;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::context;
use crate::effect::{EffectId, ReactiveEffect};
use crate::value::{TargetId, Value};

/// The set of effects subscribed to one property (or to one ref/computed).
///
/// Cloning is cheap and shares the subscriber set.
#[derive(Clone)]
pub struct Dep {
    inner: Arc<DepInner>,
}

pub(crate) struct DepInner {
    subscribers: Mutex<IndexMap<EffectId, ReactiveEffect>>,
}

/// Weak handle stored in an effect's back-reference list.
#[derive(Clone)]
pub(crate) struct WeakDep(Weak<DepInner>);

impl WeakDep {
    pub(crate) fn upgrade(&self) -> Option<Dep> {
        self.0.upgrade().map(|inner| Dep { inner })
    }
}

impl Dep {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DepInner {
                subscribers: Mutex::new(IndexMap::new()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakDep {
        WeakDep(Arc::downgrade(&self.inner))
    }

    /// Register the currently active effect as a subscriber.
    ///
    /// No-op outside any effect. An effect already in the set is not
    /// re-added, so each run subscribes at most once per dep.
    pub fn track(&self) {
        let Some(effect) = context::active_effect() else {
            return;
        };
        let inserted = {
            let mut subscribers = self.inner.subscribers.lock();
            if subscribers.contains_key(&effect.id()) {
                false
            } else {
                subscribers.insert(effect.id(), effect.clone());
                true
            }
        };
        if inserted {
            effect.record_dep(self.downgrade());
        }
    }

    /// Notify every subscriber except the currently active effect.
    ///
    /// Iterates a snapshot of the subscriber set in insertion order:
    /// running a subscriber mutates the live set (cleanup + re-subscribe),
    /// so the live set must not be iterated. Subscribers with a scheduler
    /// are handed to it; the rest are re-run directly.
    ///
    /// Panic policy: continue, collect, rethrow first. A panicking
    /// subscriber does not prevent the remaining subscribers in this pass
    /// from running; the first payload is resumed once the pass completes.
    pub fn trigger(&self) {
        let snapshot: Vec<ReactiveEffect> =
            self.inner.subscribers.lock().values().cloned().collect();
        let current = context::active_effect_id();

        let mut first_panic = None;
        for subscriber in snapshot {
            // An effect is never notified by its own write.
            if current == Some(subscriber.id()) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.notify()));
            if let Err(payload) = outcome {
                if first_panic.is_none() {
                    first_panic = Some(payload);
                }
            }
        }
        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
    }

    /// Remove one subscriber by ID.
    pub(crate) fn remove(&self, id: EffectId) {
        let removed = self.inner.subscribers.lock().shift_remove(&id);
        // Dropped outside the lock: releasing the effect may cascade into
        // other engine state.
        drop(removed);
    }

    /// Number of current subscribers.
    pub fn len(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.subscribers.lock().is_empty()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

// Global store: target -> (key -> Dep). Entries are created lazily on the
// first tracked read of a target and purged when the target's last handle
// drops.
static STORE: OnceLock<Mutex<HashMap<TargetId, IndexMap<String, Dep>>>> = OnceLock::new();

fn store() -> &'static Mutex<HashMap<TargetId, IndexMap<String, Dep>>> {
    STORE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register the active effect as a subscriber of `(target, key)`.
///
/// A bare read outside any effect performs no bookkeeping; the dep for the
/// key is not even created.
pub(crate) fn track(target: TargetId, key: &str) {
    if context::active_effect().is_none() {
        return;
    }
    let dep = {
        let mut map = store().lock();
        map.entry(target)
            .or_insert_with(IndexMap::new)
            .entry(key.to_string())
            .or_insert_with(Dep::new)
            .clone()
    };
    trace!(target_id = ?target, key, "track");
    dep.track();
}

/// Notify the subscribers of `(target, key)` after a change.
///
/// Silent no-op when the target has no store entry or the key has no dep.
pub(crate) fn trigger(target: TargetId, key: &str, new: &Value, old: &Value) {
    let dep = {
        let map = store().lock();
        map.get(&target).and_then(|deps| deps.get(key)).cloned()
    };
    let Some(dep) = dep else {
        return;
    };
    trace!(target_id = ?target, key, ?old, ?new, "trigger");
    dep.trigger();
}

/// Drop every dep recorded for `target`. Called when the target's last
/// handle drops.
pub(crate) fn purge_target(target: TargetId) {
    let store = STORE.get();
    let removed = match store {
        Some(store) => store.lock().remove(&target),
        None => None,
    };
    // Dropping the dep map releases its subscribed effects; doing so
    // outside the lock keeps their own drop glue re-entrant-safe.
    drop(removed);
}

#[cfg(test)]
pub(crate) fn dep_for(target: TargetId, key: &str) -> Option<Dep> {
    store()
        .lock()
        .get(&target)
        .and_then(|deps| deps.get(key))
        .cloned()
}

#[cfg(test)]
pub(crate) fn has_entry(target: TargetId) -> bool {
    store().lock().contains_key(&target)
}
