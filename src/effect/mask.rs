//! Interruptibility masks.
//!
//! An uninterruptible region observes a fresh, never-aborted token, so an
//! outer abort cannot reach it; the owning source is left in place so
//! [`Effect::interruptible`] (or the [`Restore`] handed to
//! [`uninterruptible_mask`]) can re-expose the outer token. Once the region
//! completes, the outer continuation runs under the outer environment again
//! and the next pre-abort check observes any abort that fired meanwhile.

use super::Effect;
use crate::cancel::CancelSource;
use crate::env::{CURRENT_CANCEL_TOKEN, CURRENT_INTERRUPTIBLE};

/// Re-enables interruption inside an uninterruptible region.
///
/// Captured at mask entry: if the outer region was interruptible, applying
/// restores the flag and the outer token; otherwise it is the identity.
#[derive(Debug, Clone, Copy)]
pub struct Restore {
    outer_interruptible: bool,
}

impl Restore {
    /// Applies the captured outer interruptibility to `effect`.
    #[must_use]
    pub fn apply<A: 'static, E: 'static>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        if self.outer_interruptible {
            effect.interruptible()
        } else {
            effect
        }
    }
}

/// Runs `f` uninterruptibly, passing a [`Restore`] for the regions that
/// should stay cancellable.
///
/// This is the bracket-shaped minimum: acquire and release run masked, while
/// `restore(use)` keeps the caller's cancellability.
pub fn uninterruptible_mask<A: 'static, E: 'static>(
    f: impl Fn(Restore) -> Effect<A, E> + 'static,
) -> Effect<A, E> {
    Effect::make_no_abort(move |env, k| {
        let restore = Restore {
            outer_interruptible: env.interruptible(),
        };
        let effect = f(restore);
        let masked = env
            .with(CURRENT_INTERRUPTIBLE, false)
            .with(CURRENT_CANCEL_TOKEN, CancelSource::new().token());
        effect.run_with(masked, k.into_boxed());
    })
}

impl<A: 'static, E: 'static> Effect<A, E> {
    /// Masks the effect: an outer abort is not observed until the effect
    /// completes (or re-enables interruption itself).
    pub fn uninterruptible(self) -> Effect<A, E> {
        Effect::make_no_abort(move |env, k| {
            let masked = env
                .with(CURRENT_INTERRUPTIBLE, false)
                .with(CURRENT_CANCEL_TOKEN, CancelSource::new().token());
            self.run_with(masked, k.into_boxed());
        })
    }

    /// Re-enables interruption and re-exposes the current source's token.
    ///
    /// Identity when the region is already interruptible.
    pub fn interruptible(self) -> Effect<A, E> {
        Effect::make(move |env, k| {
            let next = if env.interruptible() {
                env.clone()
            } else {
                let source = env.cancel_source();
                env.with(CURRENT_INTERRUPTIBLE, true)
                    .with(CURRENT_CANCEL_TOKEN, source.token())
            };
            self.run_with(next, k.into_boxed());
        })
    }
}
