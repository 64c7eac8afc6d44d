//! Dynamic Value Model
//!
//! The reactive engine tracks reads and writes of *properties* on mutable
//! target objects. Rust has no intercepting proxies, so targets are explicit
//! [`Obj`] handles over an internal field map, and property values are the
//! dynamic [`Value`] enum.
//!
//! # Identity
//!
//! Change detection uses [`Value::same`], which compares the way
//! `Object.is` does: numbers by exact bit representation (`NaN` is
//! self-identical, `-0.0` and `0.0` differ), strings by content, and
//! objects, wrappers, and refs by handle identity.
//!
//! # Ownership
//!
//! The engine never owns a target. The subscriber store and the wrapper
//! cache are keyed by [`TargetId`]; when the last [`Obj`] handle for a
//! target drops, both entries are purged, so the store holds no strong
//! references to user objects.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::reactive::Reactive;
use crate::refs::Ref;

/// Counter for generating unique target IDs.
static TARGET_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a target object.
///
/// The subscriber store and the wrapper cache are keyed by this ID rather
/// than by strong references, so targets stay collectible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        Self(TARGET_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A dynamically typed property value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A plain (unwrapped) target object.
    Obj(Obj),
    /// A reactive wrapper over a target object.
    Reactive(Reactive),
    /// A boxed reactive value (plain, property-backed, getter-backed, or
    /// computed).
    Ref(Ref),
}

impl Value {
    /// `Object.is`-style identity comparison.
    ///
    /// Used for the write guards: a write that stores an identical value
    /// must not notify subscribers.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bitwise: NaN == NaN, -0.0 != 0.0
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a.id() == b.id(),
            (Value::Reactive(a), Value::Reactive(b)) => a.ptr_eq(b),
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for values that `reactive()` can wrap or that are already
    /// wrapped.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Obj(_) | Value::Reactive(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Value::Obj(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Obj(o) => write!(f, "Obj({:?})", o.id()),
            Value::Reactive(r) => write!(f, "Reactive({:?})", r.id()),
            Value::Ref(_) => write!(f, "Ref(..)"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v.as_str()))
    }
}

impl From<Obj> for Value {
    fn from(v: Obj) -> Self {
        Value::Obj(v)
    }
}

impl From<Reactive> for Value {
    fn from(v: Reactive) -> Self {
        Value::Reactive(v)
    }
}

impl From<Ref> for Value {
    fn from(v: Ref) -> Self {
        Value::Ref(v)
    }
}

/// A user-owned mutable target object.
///
/// `Obj` is a cheap cloneable handle; clones share the same fields and the
/// same [`TargetId`]. Access through `Obj` is *raw*: it performs no
/// dependency bookkeeping. Tracked access goes through the
/// [`Reactive`] wrapper returned by [`reactive`](crate::reactive()).
pub struct Obj {
    data: Arc<ObjData>,
}

struct ObjData {
    id: TargetId,
    fields: RwLock<IndexMap<String, Value>>,
}

impl Drop for ObjData {
    fn drop(&mut self) {
        // The target is unreachable: drop its store entry and any cached
        // wrapper so the engine retains nothing keyed to this ID.
        crate::store::purge_target(self.id);
        crate::reactive::evict_wrapper(self.id);
    }
}

impl Obj {
    pub fn new() -> Self {
        Self {
            data: Arc::new(ObjData {
                id: TargetId::next(),
                fields: RwLock::new(IndexMap::new()),
            }),
        }
    }

    /// Get the target's unique ID.
    pub fn id(&self) -> TargetId {
        self.data.id
    }

    /// Raw (untracked) property read.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.fields.read().get(key).cloned()
    }

    /// Raw (untracked, non-triggering) property write.
    ///
    /// Returns the previous value, if any. Writes that should notify
    /// subscribers must go through [`Reactive::set`].
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.fields.write().insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.fields.read().contains_key(key)
    }

    /// Snapshot of the field names, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.data.fields.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.fields.read().is_empty()
    }
}

impl Default for Obj {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Obj {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        self.data.id == other.data.id
    }
}

impl Eq for Obj {}

impl<K, V> FromIterator<(K, V)> for Obj
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let obj = Obj::new();
        {
            let mut fields = obj.data.fields.write();
            for (k, v) in iter {
                fields.insert(k.into(), v.into());
            }
        }
        obj
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("id", &self.data.id)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ids_are_unique() {
        let a = Obj::new();
        let b = Obj::new();
        let c = Obj::new();

        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn obj_clone_shares_fields() {
        let a = Obj::new();
        let b = a.clone();

        a.insert("x", 1);
        assert_eq!(b.get("x"), Some(Value::Int(1)));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn from_iter_preserves_insertion_order() {
        let obj = Obj::from_iter([("b", 1), ("a", 2), ("c", 3)]);
        assert_eq!(obj.keys(), vec!["b", "a", "c"]);
    }

    #[test]
    fn same_compares_like_object_is() {
        assert!(Value::Int(1).same(&Value::Int(1)));
        assert!(!Value::Int(1).same(&Value::Int(2)));
        assert!(Value::Float(f64::NAN).same(&Value::Float(f64::NAN)));
        assert!(!Value::Float(0.0).same(&Value::Float(-0.0)));
        assert!(Value::from("a").same(&Value::from("a")));
        assert!(!Value::Null.same(&Value::Int(0)));

        let a = Obj::new();
        let b = Obj::new();
        assert!(Value::from(a.clone()).same(&Value::from(a.clone())));
        assert!(!Value::from(a).same(&Value::from(b)));
    }

    #[test]
    fn int_and_float_are_distinct() {
        assert!(!Value::Int(1).same(&Value::Float(1.0)));
    }
}
