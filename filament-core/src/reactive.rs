//! Intercepting Wrapper
//!
//! [`Reactive`] is the tracked view of a target object: reads register the
//! active effect as a subscriber of the property, writes notify the
//! property's subscribers when the value actually changed.
//!
//! There is no proxy machinery here: the wrapper is an explicit type with
//! `get`/`set` methods, and the original's `IS_REACTIVE` marker key is
//! simply the `Value::Reactive` variant.
//!
//! # Deep reactivity
//!
//! Reading a property whose value is itself an object returns that object
//! wrapped, so nested objects become reactive lazily, on first access, not
//! eagerly at creation.
//!
//! # One wrapper per target
//!
//! A global cache maps `TargetId -> Weak<wrapper>`, so wrapping the same
//! target twice yields the same wrapper and `reactive` is idempotent. The
//! cache holds no strong references; the entry is purged when the target's
//! last handle drops.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::store;
use crate::value::{Obj, TargetId, Value};

/// The tracked, capability-wrapped view of an [`Obj`].
///
/// Cloning shares the wrapper; clones compare equal.
pub struct Reactive {
    inner: Arc<ReactiveInner>,
}

struct ReactiveInner {
    target: Obj,
}

// Wrapper cache: at most one live wrapper exists per target.
static WRAPPERS: OnceLock<Mutex<HashMap<TargetId, Weak<ReactiveInner>>>> = OnceLock::new();

fn wrappers() -> &'static Mutex<HashMap<TargetId, Weak<ReactiveInner>>> {
    WRAPPERS.get_or_init(|| Mutex::new(HashMap::new()))
}

impl Reactive {
    /// Wrap a target object, reusing the cached wrapper when one is live.
    pub fn new(target: Obj) -> Self {
        let mut cache = wrappers().lock();
        if let Some(existing) = cache.get(&target.id()).and_then(Weak::upgrade) {
            return Self { inner: existing };
        }
        trace!(target_id = ?target.id(), "wrap target");
        let inner = Arc::new(ReactiveInner { target });
        cache.insert(inner.target.id(), Arc::downgrade(&inner));
        Self { inner }
    }

    /// ID of the underlying target.
    pub fn id(&self) -> TargetId {
        self.inner.target.id()
    }

    /// The underlying (raw) target object.
    pub fn target(&self) -> &Obj {
        &self.inner.target
    }

    /// Tracked property read.
    ///
    /// Registers a dependency before delegating, then passes the value
    /// through [`reactive`] so object values come back wrapped. Missing
    /// keys read as `Value::Null`.
    pub fn get(&self, key: &str) -> Value {
        store::track(self.id(), key);
        let value = self.inner.target.get(key).unwrap_or(Value::Null);
        reactive(value)
    }

    /// Triggering property write.
    ///
    /// Stores the value, then notifies the property's subscribers, but
    /// only if the new value differs from the old by identity
    /// ([`Value::same`]).
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let old = self.inner.target.get(key).unwrap_or(Value::Null);
        self.inner.target.insert(key, value.clone());
        if !old.same(&value) {
            store::trigger(self.id(), key, &value, &old);
        }
    }

    /// Untracked snapshot of the property names, in insertion order.
    ///
    /// Deep traversal tracks each property through [`get`](Self::get)
    /// individually.
    pub fn keys(&self) -> Vec<String> {
        self.inner.target.keys()
    }

    pub(crate) fn ptr_eq(&self, other: &Reactive) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Clone for Reactive {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Reactive {}

impl From<Obj> for Reactive {
    fn from(target: Obj) -> Self {
        Reactive::new(target)
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("id", &self.id())
            .finish()
    }
}

/// Produce the reactive form of a value.
///
/// Plain objects come back wrapped (one wrapper per target, so this is
/// idempotent); already-wrapped values and non-objects pass through
/// unchanged; primitives are not wrappable.
pub fn reactive(value: Value) -> Value {
    match value {
        Value::Obj(target) => Value::Reactive(Reactive::new(target)),
        other => other,
    }
}

/// True iff `value` is a live reactive wrapper.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

/// Drop the cached wrapper entry for `target`. Called when the target's
/// last handle drops.
pub(crate) fn evict_wrapper(target: TargetId) {
    if let Some(cache) = WRAPPERS.get() {
        let removed = cache.lock().remove(&target);
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reactive_is_idempotent() {
        let obj = Obj::new();
        let once = reactive(Value::from(obj.clone()));
        let twice = reactive(once.clone());

        assert!(once.same(&twice));
        assert!(is_reactive(&once));
    }

    #[test]
    fn one_wrapper_per_target() {
        let obj = Obj::new();
        let a = Reactive::new(obj.clone());
        let b = Reactive::new(obj);

        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn primitives_pass_through() {
        assert_eq!(reactive(Value::Int(5)), Value::Int(5));
        assert_eq!(reactive(Value::from("x")), Value::from("x"));
        assert!(!is_reactive(&Value::Int(5)));
    }

    #[test]
    fn nested_object_reads_come_back_wrapped() {
        let inner = Obj::from_iter([("x", 1)]);
        let outer = Obj::from_iter([("inner", Value::from(inner))]);
        let state = Reactive::new(outer);

        let nested = state.get("inner");
        assert!(is_reactive(&nested));
        // Repeated access resolves to the same wrapper.
        assert!(nested.same(&state.get("inner")));
    }

    #[test]
    fn identical_write_does_not_change_stored_value_semantics() {
        let state = Reactive::new(Obj::from_iter([("n", 7)]));
        state.set("n", 7);
        assert_eq!(state.get("n"), Value::Int(7));
        state.set("n", 8);
        assert_eq!(state.get("n"), Value::Int(8));
    }

    #[test]
    fn missing_key_reads_as_null() {
        let state = Reactive::new(Obj::new());
        assert!(state.get("absent").is_null());
    }

    #[test]
    fn dropping_the_last_handle_purges_engine_state() {
        let target_id;
        {
            let state = Reactive::new(Obj::from_iter([("x", 1)]));
            target_id = state.id();

            let e = crate::effect::effect({
                let state = state.clone();
                move || {
                    state.get("x");
                }
            });
            assert!(store::has_entry(target_id));
            assert!(store::dep_for(target_id, "x").is_some());
            e.stop();
        }
        // Last Obj handle gone: the store entry went with it.
        assert!(!store::has_entry(target_id));
    }
}
