//! Tracking Context
//!
//! The context tracks which effect (and which scope) is currently running
//! on this thread. When a property is read, the active effect, if any,
//! is registered as a subscriber of that property.
//!
//! # Implementation
//!
//! Each slot is a thread-local stack guarded by an RAII type. Entering a
//! context pushes onto the stack; the guard pops on drop, so the stack is
//! correctly unwound even when the computation panics. The stack is the
//! explicit form of the parent-link save/restore that re-entrant nesting
//! requires: the entry below the top is the "parent" context.

use std::cell::RefCell;

use crate::effect::{EffectId, ReactiveEffect};
use crate::scope::EffectScope;

thread_local! {
    static EFFECT_STACK: RefCell<Vec<ReactiveEffect>> = RefCell::new(Vec::new());
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = RefCell::new(Vec::new());
}

/// Guard that deactivates an effect context when dropped.
pub(crate) struct EffectGuard {
    id: EffectId,
}

/// Install `effect` as the active effect until the returned guard drops.
pub(crate) fn enter_effect(effect: ReactiveEffect) -> EffectGuard {
    let id = effect.id();
    EFFECT_STACK.with(|stack| stack.borrow_mut().push(effect));
    EffectGuard { id }
}

impl Drop for EffectGuard {
    fn drop(&mut self) {
        EFFECT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(effect) = popped {
                debug_assert_eq!(
                    effect.id(),
                    self.id,
                    "effect context mismatch: expected {:?}, got {:?}",
                    self.id,
                    effect.id()
                );
            }
        });
    }
}

/// The currently running effect, if any.
pub(crate) fn active_effect() -> Option<ReactiveEffect> {
    EFFECT_STACK.with(|stack| stack.borrow().last().cloned())
}

/// ID of the currently running effect, if any.
pub(crate) fn active_effect_id() -> Option<EffectId> {
    EFFECT_STACK.with(|stack| stack.borrow().last().map(|e| e.id()))
}

/// Guard that deactivates a scope context when dropped.
pub(crate) struct ScopeGuard;

/// Install `scope` as the active scope until the returned guard drops.
pub(crate) fn enter_scope(scope: EffectScope) -> ScopeGuard {
    SCOPE_STACK.with(|stack| stack.borrow_mut().push(scope));
    ScopeGuard
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The innermost scope currently running, if any.
pub(crate) fn active_scope() -> Option<EffectScope> {
    SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn context_tracks_active_effect() {
        let effect = ReactiveEffect::new(|| Value::Null);

        assert!(active_effect().is_none());

        {
            let _guard = enter_effect(effect.clone());
            assert_eq!(active_effect_id(), Some(effect.id()));
        }

        assert!(active_effect().is_none());
    }

    #[test]
    fn nested_contexts_restore_outer() {
        let outer = ReactiveEffect::new(|| Value::Null);
        let inner = ReactiveEffect::new(|| Value::Null);

        {
            let _outer = enter_effect(outer.clone());
            assert_eq!(active_effect_id(), Some(outer.id()));

            {
                let _inner = enter_effect(inner.clone());
                assert_eq!(active_effect_id(), Some(inner.id()));
            }

            // After the inner guard drops, the outer effect is current again.
            assert_eq!(active_effect_id(), Some(outer.id()));
        }

        assert!(active_effect_id().is_none());
    }
}
