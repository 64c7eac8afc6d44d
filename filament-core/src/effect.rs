//! Reactive Effects
//!
//! A [`ReactiveEffect`] is the atomic unit of re-computation: a function
//! plus the bookkeeping that lets the engine re-invoke it when any property
//! it read changes.
//!
//! # How a run works
//!
//! 1. A stopped effect just calls its function, with no tracking at all.
//! 2. Otherwise the effect first detaches from every dep it subscribed to
//!    on the previous run. Re-subscription is unconditional and happens
//!    during the run itself, so a conditional branch that stopped reading a
//!    property leaves no stale subscription behind.
//! 3. The effect installs itself as the active effect (a thread-local
//!    stack entry, popped by an RAII guard on every exit path, including
//!    panics) and calls its function. Reads performed by the function land
//!    on this effect.
//!
//! # Scheduler
//!
//! An optional scheduler replaces the direct re-run when the effect is
//! notified. It is the only hook for deferring, batching, or redirecting
//! re-computation: `computed` uses it to turn eager invalidation into
//! lazy recomputation, and watchers use it as their job trigger.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use crate::context;
use crate::scope;
use crate::store::WeakDep;
use crate::value::Value;

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for an effect.
///
/// Used for dep membership, duplicate-subscription checks, and the
/// self-retrigger suppression in `trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u64);

impl EffectId {
    fn next() -> Self {
        Self(EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type EffectFn = Box<dyn Fn() -> Value + Send + Sync>;
type SchedulerFn = Arc<dyn Fn() + Send + Sync>;

/// A re-runnable unit of computation with dependency tracking.
///
/// Cloning is cheap and shares the underlying effect.
pub struct ReactiveEffect {
    inner: Arc<EffectInner>,
}

struct EffectInner {
    id: EffectId,
    func: EffectFn,
    /// Replaced notification target; `None` after `stop()`.
    scheduler: Mutex<Option<SchedulerFn>>,
    active: AtomicBool,
    /// Back-references to every dep this effect currently belongs to.
    /// Weak: the store (or the owning ref) keeps deps alive, not us.
    deps: Mutex<SmallVec<[WeakDep; 4]>>,
}

impl ReactiveEffect {
    /// Create an effect that re-runs directly when notified.
    ///
    /// The effect does not run here; callers decide when the first run
    /// happens (see [`effect`] for the eager form).
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self::build(Box::new(func), None)
    }

    /// Create an effect whose notifications go to `scheduler` instead of
    /// re-running directly.
    pub fn with_scheduler<F, S>(func: F, scheduler: S) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
        S: Fn() + Send + Sync + 'static,
    {
        Self::build(Box::new(func), Some(Arc::new(scheduler)))
    }

    fn build(func: EffectFn, scheduler: Option<SchedulerFn>) -> Self {
        let effect = Self {
            inner: Arc::new(EffectInner {
                id: EffectId::next(),
                func,
                scheduler: Mutex::new(scheduler),
                active: AtomicBool::new(true),
                deps: Mutex::new(SmallVec::new()),
            }),
        };
        // Effects constructed while a scope is active belong to that scope.
        scope::record_effect(&effect);
        effect
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Whether the effect is still active (not stopped).
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Run the effect's function, tracking fresh dependencies.
    ///
    /// On a stopped effect this executes the function with tracking
    /// disabled (a deliberate fallback, not an error). Panics from the
    /// function propagate to the caller; the active-effect slot is still
    /// restored by the guard.
    pub fn run(&self) -> Value {
        if !self.is_active() {
            return (self.inner.func)();
        }
        self.cleanup();
        let _guard = context::enter_effect(self.clone());
        (self.inner.func)()
    }

    /// Stop the effect permanently. Idempotent.
    ///
    /// Detaches from every dep, so no write re-runs this effect again.
    pub fn stop(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            trace!(effect_id = ?self.inner.id, "effect stopped");
            self.cleanup();
            // The scheduler may close over state that references this
            // effect; dropping it severs that cycle.
            let scheduler = self.inner.scheduler.lock().take();
            drop(scheduler);
        }
    }

    /// Detach from every dep subscribed to on the previous run.
    fn cleanup(&self) {
        let deps: SmallVec<[WeakDep; 4]> = std::mem::take(&mut *self.inner.deps.lock());
        for weak in deps {
            if let Some(dep) = weak.upgrade() {
                dep.remove(self.inner.id);
            }
        }
    }

    /// Called by [`Dep::track`](crate::Dep::track) when this effect is
    /// newly subscribed.
    pub(crate) fn record_dep(&self, dep: WeakDep) {
        self.inner.deps.lock().push(dep);
    }

    /// Deliver a notification: scheduler if present, direct re-run
    /// otherwise.
    ///
    /// A stopped effect is skipped entirely. An earlier subscriber in the
    /// same notification pass may have stopped this one; the trigger
    /// snapshot still holds it.
    pub(crate) fn notify(&self) {
        if !self.is_active() {
            return;
        }
        let scheduler = self.inner.scheduler.lock().clone();
        match scheduler {
            Some(scheduler) => scheduler(),
            None => {
                self.run();
            }
        }
    }

    /// Number of deps this effect currently belongs to.
    pub fn dep_count(&self) -> usize {
        self.inner.deps.lock().len()
    }
}

impl Clone for ReactiveEffect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for ReactiveEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("dep_count", &self.dep_count())
            .finish()
    }
}

/// Register a side-effecting computation.
///
/// Runs `f` once immediately to establish its initial dependencies and
/// returns the underlying [`ReactiveEffect`] for `run()`/`stop()`. The
/// effect stays subscribed (and alive) even if the handle is dropped;
/// only `stop()`, direct or via an owning scope, retires it.
pub fn effect<F>(f: F) -> ReactiveEffect
where
    F: Fn() + Send + Sync + 'static,
{
    let e = ReactiveEffect::new(move || {
        f();
        Value::Null
    });
    e.run();
    e
}

/// [`effect`] with a scheduler: notifications invoke `scheduler` instead
/// of re-running `f` directly.
pub fn effect_with_scheduler<F, S>(f: F, scheduler: S) -> ReactiveEffect
where
    F: Fn() + Send + Sync + 'static,
    S: Fn() + Send + Sync + 'static,
{
    let e = ReactiveEffect::with_scheduler(
        move || {
            f();
            Value::Null
        },
        scheduler,
    );
    e.run();
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let _e = effect(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stopped_effect_still_runs_untracked() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let e = effect(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        e.stop();
        assert!(!e.is_active());

        // Manual run still executes the function...
        e.run();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        // ...but establishes no subscriptions.
        assert_eq!(e.dep_count(), 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let e = effect(|| {});
        e.stop();
        e.stop();
        assert!(!e.is_active());
    }

    #[test]
    fn panic_in_run_restores_the_active_slot() {
        let e = ReactiveEffect::new(|| panic!("effect failure"));

        let outcome = catch_unwind(AssertUnwindSafe(|| e.run()));
        assert!(outcome.is_err());

        // The slot unwound: a bare read after the panic tracks nothing.
        assert!(context::active_effect().is_none());
    }

    #[test]
    fn scheduler_replaces_direct_rerun() {
        let scheduled = Arc::new(AtomicI32::new(0));
        let scheduled_clone = scheduled.clone();

        let e = effect_with_scheduler(
            || {},
            move || {
                scheduled_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        e.notify();
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    }
}
