//! Declarative Watchers
//!
//! `watch` and `watch_effect` wrap one [`ReactiveEffect`] whose scheduler
//! is a "job": it diffs old/new values, runs user-registered cleanup
//! before each re-invocation, and delivers the callback. The source is
//! resolved into a getter once, at construction:
//!
//! - a reactive object source becomes a deep traversal of every
//!   enumerable property (any nested mutation re-evaluates);
//! - a getter source is used directly (manual dependency selection),
//!   wrapped in the traversal only when `deep` is requested;
//! - a ref source becomes a getter over the ref's value.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::trace;

use crate::effect::ReactiveEffect;
use crate::reactive::Reactive;
use crate::refs::Ref;
use crate::value::{TargetId, Value};

/// Watcher behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Deliver the callback synchronously once at creation.
    pub immediate: bool,
    /// For getter sources: traverse the produced value so nested
    /// mutations also trigger. Reactive-object sources are always deep.
    pub deep: bool,
    /// Stop the watcher after the first callback delivery.
    pub once: bool,
}

/// A watch source, resolved to one of two shapes at construction.
pub enum WatchSource {
    Reactive(Reactive),
    Getter(Box<dyn Fn() -> Value + Send + Sync>),
}

impl WatchSource {
    pub fn getter(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        WatchSource::Getter(Box::new(f))
    }
}

impl From<Reactive> for WatchSource {
    fn from(source: Reactive) -> Self {
        WatchSource::Reactive(source)
    }
}

impl From<Ref> for WatchSource {
    fn from(source: Ref) -> Self {
        WatchSource::Getter(Box::new(move || source.get()))
    }
}

type CleanupFn = Box<dyn FnOnce() + Send>;
type CleanupSlot = Arc<Mutex<Option<CleanupFn>>>;

/// Registrar handed to watcher callbacks.
///
/// The registered function runs before the next callback delivery and on
/// disposal. Each registration replaces the previous one.
pub struct OnCleanup {
    slot: CleanupSlot,
}

impl OnCleanup {
    pub fn register(&self, f: impl FnOnce() + Send + 'static) {
        *self.slot.lock() = Some(Box::new(f));
    }
}

/// Disposer for a watcher. `stop` is idempotent.
pub struct WatchHandle {
    effect: ReactiveEffect,
    cleanup: CleanupSlot,
}

impl WatchHandle {
    /// Stop the watcher and run any pending cleanup.
    pub fn stop(&self) {
        self.effect.stop();
        if let Some(cleanup) = self.cleanup.lock().take() {
            cleanup();
        }
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

/// Visited sets for one traversal pass. Targets and refs carry different
/// identity keys, and a cycle can run through either kind.
#[derive(Default)]
struct Visited {
    targets: HashSet<TargetId>,
    refs: HashSet<usize>,
}

/// Recursively visit every property reachable from `value`, tracking each
/// one, guarding against cycles with the visited sets.
fn traverse(value: &Value, seen: &mut Visited) {
    match value {
        Value::Reactive(source) => {
            if !seen.targets.insert(source.id()) {
                return;
            }
            for key in source.keys() {
                traverse(&source.get(&key), seen);
            }
        }
        Value::Ref(r) => {
            if !seen.refs.insert(r.addr()) {
                return;
            }
            traverse(&r.get(), seen);
        }
        _ => {}
    }
}

fn deep_getter(f: Box<dyn Fn() -> Value + Send + Sync>) -> Box<dyn Fn() -> Value + Send + Sync> {
    Box::new(move || {
        let value = f();
        traverse(&value, &mut Visited::default());
        value
    })
}

fn resolve_getter(
    source: WatchSource,
    deep: bool,
) -> Box<dyn Fn() -> Value + Send + Sync> {
    match source {
        WatchSource::Reactive(r) => {
            // Reactive sources are watched deeply: the traversal is what
            // subscribes the watcher to every nested property.
            let root = Value::Reactive(r);
            Box::new(move || {
                traverse(&root, &mut Visited::default());
                root.clone()
            })
        }
        WatchSource::Getter(f) => {
            if deep {
                deep_getter(f)
            } else {
                f
            }
        }
    }
}

/// Watch a source and invoke `callback(new, old, on_cleanup)` whenever the
/// source's value changes.
///
/// With `immediate`, the callback fires synchronously once at creation
/// (old value is `Null`); otherwise the source is evaluated once to seed
/// the old value without invoking the callback. A callback delivery where
/// the new value is identity-equal to the old still happens only if the
/// underlying getter re-ran and produced a different value; duplicate
/// writes upstream never reach the job at all, because `trigger` fires
/// only on actual change.
pub fn watch<C>(source: impl Into<WatchSource>, callback: C, options: WatchOptions) -> WatchHandle
where
    C: Fn(&Value, &Value, &OnCleanup) + Send + Sync + 'static,
{
    let getter = resolve_getter(source.into(), options.deep);

    let cleanup: CleanupSlot = Arc::new(Mutex::new(None));
    let old_value = Arc::new(Mutex::new(Value::Null));
    // The job needs the effect it drives; the slot breaks the
    // construction-order knot.
    let effect_slot: Arc<OnceLock<ReactiveEffect>> = Arc::new(OnceLock::new());

    let job = {
        let cleanup = cleanup.clone();
        let old_value = old_value.clone();
        let effect_slot = effect_slot.clone();
        let once = options.once;
        move || {
            let Some(effect) = effect_slot.get() else {
                return;
            };
            if !effect.is_active() {
                return;
            }
            let new_value = effect.run();
            // Pending cleanup runs before the callback sees the new value.
            if let Some(pending) = cleanup.lock().take() {
                pending();
            }
            let registrar = OnCleanup {
                slot: cleanup.clone(),
            };
            let old = std::mem::replace(&mut *old_value.lock(), new_value.clone());
            trace!("watch callback");
            callback(&new_value, &old, &registrar);
            if once {
                effect.stop();
                if let Some(pending) = cleanup.lock().take() {
                    pending();
                }
            }
        }
    };

    let effect = ReactiveEffect::with_scheduler(getter, job);
    let _ = effect_slot.set(effect.clone());

    if options.immediate {
        effect.notify();
    } else {
        // Seed the old value (and the subscriptions) without delivering
        // the callback.
        *old_value.lock() = effect.run();
    }

    WatchHandle { effect, cleanup }
}

/// Run `f` immediately and re-run it whenever anything it read changes.
///
/// `f` receives the cleanup registrar directly; a registered cleanup runs
/// before the next re-invocation and on disposal.
pub fn watch_effect<F>(f: F) -> WatchHandle
where
    F: Fn(&OnCleanup) + Send + Sync + 'static,
{
    let cleanup: CleanupSlot = Arc::new(Mutex::new(None));
    let effect_slot: Arc<OnceLock<ReactiveEffect>> = Arc::new(OnceLock::new());

    let runner = {
        let cleanup = cleanup.clone();
        move || {
            let registrar = OnCleanup {
                slot: cleanup.clone(),
            };
            f(&registrar);
            Value::Null
        }
    };

    let job = {
        let cleanup = cleanup.clone();
        let effect_slot = effect_slot.clone();
        move || {
            let Some(effect) = effect_slot.get() else {
                return;
            };
            if !effect.is_active() {
                return;
            }
            if let Some(pending) = cleanup.lock().take() {
                pending();
            }
            effect.run();
        }
    };

    let effect = ReactiveEffect::with_scheduler(runner, job);
    let _ = effect_slot.set(effect.clone());
    effect.run();

    WatchHandle { effect, cleanup }
}
