//! Computed Values
//!
//! A computed is a derived value built from a [`ReactiveEffect`] whose
//! scheduler does not recompute. Invalidation is push-based and cheap: the
//! scheduler flips a dirty flag and cascades the notification to the
//! computed's own subscribers. Recomputation is pull-based: it happens on
//! the next read, and only then.
//!
//! This two-phase protocol never recomputes a derived value that nobody
//! reads again, at the cost of one extra indirection per read.
//!
//! The cascade fires only on the clean -> dirty transition; further
//! upstream writes while already dirty change nothing and notify nobody.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::effect::ReactiveEffect;
use crate::refs::{ReactiveError, Ref};
use crate::store::Dep;
use crate::value::Value;

type SetterFn = Box<dyn Fn(Value) + Send + Sync>;

/// Shared state behind a computed ref.
pub(crate) struct ComputedState {
    /// Evaluates the getter under tracking; its scheduler invalidates
    /// instead of recomputing.
    effect: ReactiveEffect,
    /// Subscribers of the computed itself (readers become transitive
    /// subscribers of whatever the getter reads).
    dep: Dep,
    dirty: Arc<AtomicBool>,
    cached: Mutex<Value>,
    setter: Option<SetterFn>,
}

impl ComputedState {
    /// Tracked, lazily recomputing read.
    pub(crate) fn get(&self) -> Value {
        // The reader subscribes to the computed unconditionally, before
        // the dirty check.
        self.dep.track();
        if self.dirty.load(Ordering::SeqCst) {
            let fresh = self.effect.run();
            *self.cached.lock() = fresh;
            self.dirty.store(false, Ordering::SeqCst);
        }
        self.cached.lock().clone()
    }

    /// Forward a write to the user setter.
    ///
    /// Reading immediately afterwards reflects the write only if the
    /// setter mutated a tracked dependency.
    pub(crate) fn set(&self, value: Value) -> Result<(), ReactiveError> {
        match &self.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => Err(ReactiveError::ReadOnlyComputed),
        }
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.setter.is_some()
    }
}

fn build(getter: impl Fn() -> Value + Send + Sync + 'static, setter: Option<SetterFn>) -> Ref {
    let dep = Dep::new();
    let dirty = Arc::new(AtomicBool::new(true));

    let effect = {
        let dep = dep.clone();
        let dirty = dirty.clone();
        ReactiveEffect::with_scheduler(getter, move || {
            // Invalidate, never recompute here. Cascade once per
            // clean -> dirty transition.
            if !dirty.swap(true, Ordering::SeqCst) {
                trace!("computed invalidated");
                dep.trigger();
            }
        })
    };

    Ref::from_computed(Arc::new(ComputedState {
        effect,
        dep,
        dirty,
        cached: Mutex::new(Value::Null),
        setter,
    }))
}

/// A lazily-evaluated, cached derived value.
///
/// The getter runs on first read, not at creation.
pub fn computed(getter: impl Fn() -> Value + Send + Sync + 'static) -> Ref {
    build(getter, None)
}

/// A writable computed: writes forward to `setter`.
pub fn computed_with_setter(
    getter: impl Fn() -> Value + Send + Sync + 'static,
    setter: impl Fn(Value) + Send + Sync + 'static,
) -> Ref {
    build(getter, Some(Box::new(setter)))
}
