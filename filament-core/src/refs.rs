//! Boxed Reactive Values
//!
//! A [`Ref`] exposes the same track-on-get / trigger-on-change contract as
//! one object property, for values that are not naturally object
//! properties: primitives, a single field pulled out of an object, or a
//! derived value.
//!
//! The original's duck-typed ref classes become one tagged type:
//!
//! - **value ref**: owns its value and its own dep ([`Ref::new`]);
//! - **property ref**: a view over one key of a reactive object, already
//!   tracked through the object's own wrapper ([`to_ref_prop`]);
//! - **getter ref**: read-only, re-invokes the supplied function on every
//!   read, no caching ([`to_ref`] with a getter source);
//! - **computed ref**: lazily cached, see [`computed`](crate::computed()).

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::computed::ComputedState;
use crate::reactive::{reactive, Reactive};
use crate::store::Dep;
use crate::value::Value;

/// Errors produced by write attempts against read-only handles.
#[derive(Debug, Error)]
pub enum ReactiveError {
    #[error("cannot write through a getter-backed (read-only) ref")]
    ReadOnlyRef,
    #[error("cannot write to a computed value that has no setter")]
    ReadOnlyComputed,
}

/// A single-value box with a tracked `get`/`set` accessor pair.
///
/// Cloning shares the box; clones compare equal.
#[derive(Clone)]
pub struct Ref {
    inner: RefInner,
}

#[derive(Clone)]
enum RefInner {
    Value(Arc<ValueRef>),
    Property(Arc<PropertyRef>),
    Getter(Arc<GetterRef>),
    Computed(Arc<ComputedState>),
}

struct ValueRef {
    /// The value as stored, identity-compared on write.
    raw: Mutex<Value>,
    /// The value as read: object values are wrapped via `reactive()`.
    wrapped: Mutex<Value>,
    dep: Dep,
}

struct PropertyRef {
    source: Reactive,
    key: String,
}

struct GetterRef {
    getter: Box<dyn Fn() -> Value + Send + Sync>,
}

impl Ref {
    /// Box a value.
    ///
    /// A value that is already a ref is returned unchanged. Object values
    /// are stored wrapped, so a ref holding an object composes with deep
    /// reactivity.
    pub fn new(value: impl Into<Value>) -> Ref {
        match value.into() {
            Value::Ref(existing) => existing,
            raw => Ref {
                inner: RefInner::Value(Arc::new(ValueRef {
                    wrapped: Mutex::new(reactive(raw.clone())),
                    raw: Mutex::new(raw),
                    dep: Dep::new(),
                })),
            },
        }
    }

    pub(crate) fn from_getter(getter: Box<dyn Fn() -> Value + Send + Sync>) -> Ref {
        Ref {
            inner: RefInner::Getter(Arc::new(GetterRef { getter })),
        }
    }

    pub(crate) fn from_computed(state: Arc<ComputedState>) -> Ref {
        Ref {
            inner: RefInner::Computed(state),
        }
    }

    /// Tracked read of the boxed value.
    pub fn get(&self) -> Value {
        match &self.inner {
            RefInner::Value(v) => {
                v.dep.track();
                v.wrapped.lock().clone()
            }
            RefInner::Property(p) => p.source.get(&p.key),
            // Always fresh: no dirty flag, no cache.
            RefInner::Getter(g) => (g.getter)(),
            RefInner::Computed(c) => c.get(),
        }
    }

    /// Write the boxed value.
    ///
    /// For a value ref, storing an identity-equal value is a no-op;
    /// otherwise storage is updated and the ref's subscribers are
    /// notified. Property refs delegate to the source property. Getter
    /// refs and setterless computeds are read-only and return an error.
    pub fn set(&self, value: impl Into<Value>) -> Result<(), ReactiveError> {
        let value = value.into();
        match &self.inner {
            RefInner::Value(v) => {
                let changed = {
                    let mut raw = v.raw.lock();
                    if raw.same(&value) {
                        false
                    } else {
                        *raw = value.clone();
                        true
                    }
                };
                if changed {
                    *v.wrapped.lock() = reactive(value);
                    v.dep.trigger();
                }
                Ok(())
            }
            RefInner::Property(p) => {
                p.source.set(&p.key, value);
                Ok(())
            }
            RefInner::Getter(_) => Err(ReactiveError::ReadOnlyRef),
            RefInner::Computed(c) => c.set(value),
        }
    }

    /// True for getter-backed refs and setterless computeds.
    pub fn is_read_only(&self) -> bool {
        match &self.inner {
            RefInner::Value(_) | RefInner::Property(_) => false,
            RefInner::Getter(_) => true,
            RefInner::Computed(c) => !c.is_writable(),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Ref) -> bool {
        match (&self.inner, &other.inner) {
            (RefInner::Value(a), RefInner::Value(b)) => Arc::ptr_eq(a, b),
            (RefInner::Property(a), RefInner::Property(b)) => Arc::ptr_eq(a, b),
            (RefInner::Getter(a), RefInner::Getter(b)) => Arc::ptr_eq(a, b),
            (RefInner::Computed(a), RefInner::Computed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Stable identity of the shared inner allocation. Used as a
    /// visited-set key when walking value graphs that may contain ref
    /// cycles.
    pub(crate) fn addr(&self) -> usize {
        match &self.inner {
            RefInner::Value(a) => Arc::as_ptr(a) as usize,
            RefInner::Property(a) => Arc::as_ptr(a) as usize,
            RefInner::Getter(a) => Arc::as_ptr(a) as usize,
            RefInner::Computed(a) => Arc::as_ptr(a) as usize,
        }
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Ref {}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            RefInner::Value(_) => "value",
            RefInner::Property(_) => "property",
            RefInner::Getter(_) => "getter",
            RefInner::Computed(_) => "computed",
        };
        f.debug_struct("Ref").field("kind", &kind).finish()
    }
}

/// True iff `value` is a ref.
pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// Unwrap one level of ref; non-refs pass through unchanged.
pub fn unref(value: Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other,
    }
}

/// A source that may be a ref, a getter function, or a raw value.
///
/// Resolved once at the call site instead of duck-typed per call.
pub enum MaybeRefOrGetter {
    Ref(Ref),
    Getter(Box<dyn Fn() -> Value + Send + Sync>),
    Value(Value),
}

impl MaybeRefOrGetter {
    pub fn getter(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        MaybeRefOrGetter::Getter(Box::new(f))
    }
}

impl From<Ref> for MaybeRefOrGetter {
    fn from(r: Ref) -> Self {
        MaybeRefOrGetter::Ref(r)
    }
}

impl From<Value> for MaybeRefOrGetter {
    fn from(v: Value) -> Self {
        match v {
            Value::Ref(r) => MaybeRefOrGetter::Ref(r),
            other => MaybeRefOrGetter::Value(other),
        }
    }
}

/// Resolve a ref, getter, or raw value to its current value.
pub fn to_value(source: impl Into<MaybeRefOrGetter>) -> Value {
    match source.into() {
        MaybeRefOrGetter::Ref(r) => r.get(),
        MaybeRefOrGetter::Getter(f) => f(),
        MaybeRefOrGetter::Value(v) => v,
    }
}

/// Normalize a source into a ref.
///
/// Refs are returned unchanged; getters become read-only getter refs
/// (evaluation is deferred to each read, not performed here); raw values
/// are boxed with [`Ref::new`]. The keyed form is [`to_ref_prop`].
pub fn to_ref(source: impl Into<MaybeRefOrGetter>) -> Ref {
    match source.into() {
        MaybeRefOrGetter::Ref(r) => r,
        MaybeRefOrGetter::Getter(f) => Ref::from_getter(f),
        MaybeRefOrGetter::Value(v) => Ref::new(v),
    }
}

/// A ref view over one property of a reactive object.
///
/// Get and set delegate to the property, which is already tracked through
/// the object's own wrapper, so the view needs no dep of its own. A property
/// whose current value is itself a ref is returned as-is.
pub fn to_ref_prop(source: &Reactive, key: &str) -> Ref {
    if let Some(Value::Ref(existing)) = source.target().get(key) {
        return existing;
    }
    Ref {
        inner: RefInner::Property(Arc::new(PropertyRef {
            source: source.clone(),
            key: key.to_string(),
        })),
    }
}

/// Property-backed refs for every current property of `source`, in
/// insertion order.
pub fn to_refs(source: &Reactive) -> IndexMap<String, Ref> {
    source
        .keys()
        .into_iter()
        .map(|key| {
            let r = to_ref_prop(source, &key);
            (key, r)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::effect;
    use crate::value::Obj;
    use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
    use std::sync::Arc;

    #[test]
    fn ref_of_ref_is_the_same_ref() {
        let a = Ref::new(1);
        let b = Ref::new(Value::Ref(a.clone()));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn set_with_identical_value_does_not_notify() {
        let count = Ref::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let _e = effect({
            let count = count.clone();
            let runs = runs.clone();
            move || {
                count.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(0).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn object_value_is_stored_wrapped() {
        let r = Ref::new(Obj::from_iter([("x", 1)]));
        assert!(crate::reactive::is_reactive(&r.get()));
    }

    #[test]
    fn getter_ref_is_always_fresh_and_read_only() {
        let n = Arc::new(AtomicI64::new(1));
        let r = to_ref(MaybeRefOrGetter::getter({
            let n = n.clone();
            move || Value::Int(n.load(Ordering::SeqCst))
        }));

        assert_eq!(r.get(), Value::Int(1));
        n.store(2, Ordering::SeqCst);
        assert_eq!(r.get(), Value::Int(2));

        assert!(r.is_read_only());
        assert!(matches!(r.set(3), Err(ReactiveError::ReadOnlyRef)));
    }

    #[test]
    fn property_ref_delegates_both_ways() {
        let state = Reactive::new(Obj::from_iter([("name", "ada")]));
        let name = to_ref_prop(&state, "name");

        assert_eq!(name.get(), Value::from("ada"));
        name.set("grace").unwrap();
        assert_eq!(state.get("name"), Value::from("grace"));
    }

    #[test]
    fn property_ref_write_triggers_wrapper_subscribers() {
        let state = Reactive::new(Obj::from_iter([("n", 0)]));
        let n = to_ref_prop(&state, "n");
        let seen = Arc::new(AtomicI64::new(-1));

        let _e = effect({
            let state = state.clone();
            let seen = seen.clone();
            move || {
                seen.store(state.get("n").as_int().unwrap_or(-1), Ordering::SeqCst);
            }
        });
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        n.set(9).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn to_refs_covers_every_key_in_order() {
        let state = Reactive::new(Obj::from_iter([("a", 1), ("b", 2)]));
        let refs = to_refs(&state);

        assert_eq!(refs.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(refs["a"].get(), Value::Int(1));
        assert_eq!(refs["b"].get(), Value::Int(2));
    }

    #[test]
    fn unref_and_to_value() {
        let r = Ref::new(5);
        assert_eq!(unref(Value::Ref(r.clone())), Value::Int(5));
        assert_eq!(unref(Value::Int(3)), Value::Int(3));

        assert_eq!(to_value(Value::Ref(r)), Value::Int(5));
        assert_eq!(to_value(MaybeRefOrGetter::getter(|| Value::Int(7))), Value::Int(7));
        assert_eq!(to_value(Value::Int(9)), Value::Int(9));
    }
}
