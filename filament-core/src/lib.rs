//! Filament Core
//!
//! This crate is the dependency-tracking engine beneath the Filament
//! reactive UI framework. It implements:
//!
//! - Intercepting wrappers over mutable target objects ([`reactive`])
//! - The global subscriber store and the track/trigger protocol
//! - The effect lifecycle ([`ReactiveEffect`], [`effect`])
//! - Lazily cached derived values ([`computed`])
//! - Boxed reactive values ([`Ref`])
//! - Declarative watchers ([`watch`], [`watch_effect`])
//! - Hierarchical effect lifetime grouping ([`effect_scope`])
//!
//! Rendering, vnodes, and the component runtime are external consumers:
//! they call into this engine through the primitives above and are not
//! part of this crate.
//!
//! # How it works
//!
//! Reading a property through a wrapper registers the currently running
//! effect as a subscriber of that property. Writing a property notifies
//! exactly the subscribed effects, and only those, either by re-running
//! them or through their scheduler hook. Before every run an effect
//! detaches from everything it subscribed to on the previous run, so its
//! subscriptions always mirror what it actually read last.
//!
//! The model is single-threaded and synchronous: the active effect and
//! active scope are thread-local stacks, nothing is queued or deferred by
//! the engine itself, and batching belongs entirely to the scheduler hook.
//!
//! # Example
//!
//! ```
//! use filament_core::{computed, effect, Obj, Reactive, Value};
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//!
//! let state = Reactive::new(Obj::from_iter([("count", 0)]));
//!
//! let doubled = computed({
//!     let state = state.clone();
//!     move || Value::Int(state.get("count").as_int().unwrap_or(0) * 2)
//! });
//!
//! let seen = Arc::new(AtomicI64::new(-1));
//! let _e = effect({
//!     let doubled = doubled.clone();
//!     let seen = seen.clone();
//!     move || {
//!         seen.store(doubled.get().as_int().unwrap_or(0), Ordering::SeqCst);
//!     }
//! });
//! assert_eq!(seen.load(Ordering::SeqCst), 0);
//!
//! state.set("count", 3);
//! assert_eq!(seen.load(Ordering::SeqCst), 6);
//! ```

mod computed;
mod context;
mod effect;
mod reactive;
mod refs;
mod scope;
mod store;
mod value;
mod watch;

pub use computed::{computed, computed_with_setter};
pub use effect::{effect, effect_with_scheduler, EffectId, ReactiveEffect};
pub use reactive::{is_reactive, reactive, Reactive};
pub use refs::{
    is_ref, to_ref, to_ref_prop, to_refs, to_value, unref, MaybeRefOrGetter, ReactiveError, Ref,
};
pub use scope::{effect_scope, EffectScope};
pub use store::Dep;
pub use value::{Obj, TargetId, Value};
pub use watch::{watch, watch_effect, OnCleanup, WatchHandle, WatchOptions, WatchSource};
