//! Effect Scopes
//!
//! A scope groups effects (and child scopes) so a whole subtree of
//! reactive computations can be disposed in one call. Component teardown
//! is the motivating consumer: everything a component created (effects,
//! computeds, watchers) stops with its scope.
//!
//! Scopes form a tree: a scope created while another scope is running
//! registers as its child, unless created detached.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::context;
use crate::effect::ReactiveEffect;

/// Counter for generating unique scope IDs.
static SCOPE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        Self(SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A hierarchical grouping of effects for bulk disposal.
///
/// Cloning shares the scope.
pub struct EffectScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    id: ScopeId,
    active: AtomicBool,
    /// Weak: children must not keep a stopped parent alive.
    parent: Mutex<Option<Weak<ScopeInner>>>,
    effects: Mutex<Vec<ReactiveEffect>>,
    scopes: Mutex<Vec<EffectScope>>,
}

impl EffectScope {
    /// Install this scope as the active scope for the duration of `f`.
    ///
    /// Effects constructed inside become owned by this scope. Returns
    /// `None` when the scope has been stopped.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        if !self.is_active() {
            return None;
        }
        let _guard = context::enter_scope(self.clone());
        Some(f())
    }

    /// Stop every owned effect, recursively stop every child scope, and
    /// detach from the parent. Idempotent; a stopped scope never
    /// reactivates.
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        trace!(scope_id = ?self.inner.id, "scope stopped");

        let effects: Vec<ReactiveEffect> = self.inner.effects.lock().drain(..).collect();
        for effect in &effects {
            effect.stop();
        }

        let children: Vec<EffectScope> = self.inner.scopes.lock().drain(..).collect();
        for child in &children {
            child.stop();
        }

        let parent = self.inner.parent.lock().take();
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent
                .scopes
                .lock()
                .retain(|sibling| sibling.inner.id != self.inner.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Number of directly owned effects.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.lock().len()
    }

    /// Number of direct child scopes.
    pub fn child_count(&self) -> usize {
        self.inner.scopes.lock().len()
    }
}

impl Clone for EffectScope {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("effects", &self.effect_count())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Create a scope.
///
/// Unless `detached`, the scope registers as a child of the currently
/// active scope, so stopping the parent stops it too.
pub fn effect_scope(detached: bool) -> EffectScope {
    let scope = EffectScope {
        inner: Arc::new(ScopeInner {
            id: ScopeId::next(),
            active: AtomicBool::new(true),
            parent: Mutex::new(None),
            effects: Mutex::new(Vec::new()),
            scopes: Mutex::new(Vec::new()),
        }),
    };
    if !detached {
        if let Some(parent) = context::active_scope() {
            parent.inner.scopes.lock().push(scope.clone());
            *scope.inner.parent.lock() = Some(Arc::downgrade(&parent.inner));
        }
    }
    scope
}

/// Record a newly constructed effect as owned by the active scope, if any.
pub(crate) fn record_effect(effect: &ReactiveEffect) {
    if let Some(scope) = context::active_scope() {
        if scope.is_active() {
            scope.inner.effects.lock().push(effect.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::effect;
    use crate::refs::Ref;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn scope_owns_effects_created_inside() {
        let scope = effect_scope(false);
        scope.run(|| {
            let _a = effect(|| {});
            let _b = effect(|| {});
        });
        assert_eq!(scope.effect_count(), 2);
    }

    #[test]
    fn stop_disposes_owned_effects() {
        let count = Ref::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let scope = effect_scope(false);
        scope.run(|| {
            let count = count.clone();
            let runs = runs.clone();
            let _e = effect(move || {
                count.get();
                runs.fetch_add(1, Ordering::SeqCst);
            });
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        scope.stop();
        count.set(1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_is_transitive_and_idempotent() {
        let count = Ref::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let outer = effect_scope(false);
        outer.run(|| {
            let inner = effect_scope(false);
            inner.run(|| {
                let count = count.clone();
                let runs = runs.clone();
                let _e = effect(move || {
                    count.get();
                    runs.fetch_add(1, Ordering::SeqCst);
                });
            });
        });
        assert_eq!(outer.child_count(), 1);

        outer.stop();
        outer.stop();

        count.set(1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(outer.child_count(), 0);
    }

    #[test]
    fn detached_scope_escapes_the_parent() {
        let count = Ref::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let outer = effect_scope(false);
        let mut detached = None;
        outer.run(|| {
            let scope = effect_scope(true);
            scope.run(|| {
                let count = count.clone();
                let runs = runs.clone();
                let _e = effect(move || {
                    count.get();
                    runs.fetch_add(1, Ordering::SeqCst);
                });
            });
            detached = Some(scope);
        });
        assert_eq!(outer.child_count(), 0);

        // Stopping the parent leaves the detached scope's effect running.
        outer.stop();
        count.set(1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        detached.unwrap().stop();
        count.set(2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn run_on_stopped_scope_returns_none() {
        let scope = effect_scope(false);
        assert_eq!(scope.run(|| 1), Some(1));
        scope.stop();
        assert_eq!(scope.run(|| 1), None);
    }

    #[test]
    fn nested_scope_restores_outer_active_scope() {
        let outer = effect_scope(false);
        outer.run(|| {
            let inner = effect_scope(false);
            inner.run(|| {});
            // Effects created after the inner scope closes land on the
            // outer scope.
            let _e = effect(|| {});
        });
        assert_eq!(outer.effect_count(), 1);
    }
}
