//! The effect primitive.
//!
//! An [`Effect`] is a first-class description of a computation. Running it
//! delivers exactly one [`Outcome`] to a continuation; until a runner drives
//! it, nothing happens. Effects are plain values: running one twice is
//! allowed and the runs are independent.
//!
//! Everything is built on two builders:
//!
//! - [`Effect::make`] wraps a body with the pre-abort check (an interruptible
//!   region whose token is already aborted settles with `Aborted` without
//!   running the body) and panic conversion.
//! - [`Effect::make_no_abort`] keeps the panic conversion but skips the
//!   pre-abort check; the mask primitives use it to install a fresh token
//!   before anything can observe the old one.
//!
//! The continuation handed to a body is a one-shot [`Continuation`]; the
//! "exactly once" contract is enforced structurally, not by convention.

mod constructors;
mod mask;
mod transform;

pub use constructors::{service, Resume};
pub use mask::{uninterruptible_mask, Restore};

use crate::env::Env;
use crate::types::{Defect, Failure, Outcome};
use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

/// The boxed continuation an effect run resolves.
pub(crate) type BoxedKont<A, E> = Box<dyn FnOnce(Outcome<A, E>)>;

/// A one-shot continuation cell.
///
/// The first [`resolve`](Self::resolve) delivers the outcome; later calls are
/// ignored. Cloning shares the cell.
pub struct Continuation<A, E> {
    slot: Rc<RefCell<Option<BoxedKont<A, E>>>>,
}

impl<A, E> Clone for Continuation<A, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<A, E> Continuation<A, E> {
    pub(crate) fn from_boxed(k: BoxedKont<A, E>) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Some(k))),
        }
    }

    /// Delivers the outcome. Ignored if already resolved.
    pub fn resolve(&self, outcome: Outcome<A, E>) {
        let taken = self.slot.borrow_mut().take();
        if let Some(k) = taken {
            k(outcome);
        }
    }

    /// Returns true once the outcome has been delivered.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_none()
    }

    /// Re-boxes the cell for handing to a child run.
    pub(crate) fn into_boxed(self) -> BoxedKont<A, E>
    where
        A: 'static,
        E: 'static,
    {
        Box::new(move |outcome| self.resolve(outcome))
    }
}

impl<A, E> fmt::Debug for Continuation<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Runs a user callback, converting a panic into a [`Defect`].
pub(crate) fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, Defect> {
    catch_unwind(AssertUnwindSafe(f)).map_err(Defect::from_panic)
}

/// A deferred computation producing an `A`, failing with an `E`.
///
/// The second parameter defaults to [`Infallible`](std::convert::Infallible)
/// for effects that cannot fail in the typed channel; see
/// [`widen`](Effect::widen) for re-typing those.
pub struct Effect<A, E = std::convert::Infallible> {
    run: Rc<dyn Fn(Env, BoxedKont<A, E>)>,
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self {
            run: Rc::clone(&self.run),
        }
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Effect(..)")
    }
}

impl<A: 'static, E: 'static> Effect<A, E> {
    /// Builds an effect from a body obeying the run contract.
    ///
    /// Before the body runs, an interruptible region whose token is already
    /// aborted resolves with `Aborted`. A panic in the body resolves with an
    /// `Unexpected` defect; if the body resolved first, the panic is
    /// converted and dropped so the continuation still fires exactly once.
    pub fn make(body: impl Fn(Env, Continuation<A, E>) + 'static) -> Self {
        Self {
            run: Rc::new(move |env: Env, k: BoxedKont<A, E>| {
                let k = Continuation::from_boxed(k);
                if env.interruptible() && env.cancel_token().is_aborted() {
                    k.resolve(Err(Failure::Aborted));
                    return;
                }
                let body_k = k.clone();
                if let Err(defect) = guarded(|| body(env, body_k)) {
                    k.resolve(Err(Failure::Unexpected(defect)));
                }
            }),
        }
    }

    /// [`make`](Self::make) without the pre-abort check.
    pub fn make_no_abort(body: impl Fn(Env, Continuation<A, E>) + 'static) -> Self {
        Self {
            run: Rc::new(move |env: Env, k: BoxedKont<A, E>| {
                let k = Continuation::from_boxed(k);
                let body_k = k.clone();
                if let Err(defect) = guarded(|| body(env, body_k)) {
                    k.resolve(Err(Failure::Unexpected(defect)));
                }
            }),
        }
    }

    /// Runs the effect under `env`, delivering the outcome to `k`.
    pub(crate) fn run_with(&self, env: Env, k: BoxedKont<A, E>) {
        (self.run)(env, k);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn collect<A: 'static, E: 'static>(effect: &Effect<A, E>, env: Env) -> Rc<RefCell<Vec<Outcome<A, E>>>> {
        let seen: Rc<RefCell<Vec<Outcome<A, E>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        effect.run_with(env, Box::new(move |out| sink.borrow_mut().push(out)));
        seen
    }

    #[test]
    fn continuation_fires_exactly_once() {
        let effect: Effect<i32, &str> = Effect::make(|_env, k| {
            k.resolve(Ok(1));
            k.resolve(Ok(2));
        });
        let seen = collect(&effect, Env::empty());
        assert_eq!(*seen.borrow(), vec![Ok(1)]);
    }

    #[test]
    fn body_panic_becomes_a_defect() {
        let effect: Effect<i32, &str> = Effect::make(|_env, _k| panic!("blew up"));
        let seen = collect(&effect, Env::empty());
        let outcomes = seen.borrow();
        match outcomes.as_slice() {
            [Err(Failure::Unexpected(defect))] => assert_eq!(defect.message(), "blew up"),
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }

    #[test]
    fn panic_after_resolution_is_dropped() {
        let effect: Effect<i32, &str> = Effect::make(|_env, k| {
            k.resolve(Ok(3));
            panic!("too late");
        });
        let seen = collect(&effect, Env::empty());
        assert_eq!(*seen.borrow(), vec![Ok(3)]);
    }

    #[test]
    fn aborted_region_skips_the_body() {
        use crate::cancel::CancelSource;
        use crate::env::{CURRENT_CANCEL_SOURCE, CURRENT_CANCEL_TOKEN};

        let ran = Rc::new(Cell::new(false));
        let ran2 = Rc::clone(&ran);
        let effect: Effect<i32, &str> = Effect::make(move |_env, k| {
            ran2.set(true);
            k.resolve(Ok(1));
        });

        let source = CancelSource::new();
        source.abort();
        let env = Env::empty()
            .with(CURRENT_CANCEL_TOKEN, source.token())
            .with(CURRENT_CANCEL_SOURCE, source);

        let seen = collect(&effect, env);
        assert_eq!(*seen.borrow(), vec![Err(Failure::Aborted)]);
        assert!(!ran.get());
    }

    #[test]
    fn no_abort_builder_runs_despite_aborted_token() {
        use crate::cancel::CancelSource;
        use crate::env::CURRENT_CANCEL_TOKEN;

        let effect: Effect<i32, &str> = Effect::make_no_abort(|_env, k| k.resolve(Ok(7)));

        let source = CancelSource::new();
        source.abort();
        let env = Env::empty().with(CURRENT_CANCEL_TOKEN, source.token());

        let seen = collect(&effect, env);
        assert_eq!(*seen.borrow(), vec![Ok(7)]);
    }
}
