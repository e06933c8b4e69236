//! Acquire/use/release without a scope.
//!
//! The bracket guarantee: acquire and release run masked, use runs with the
//! caller's interruptibility, and release sees the reified outcome of use
//! before that outcome is re-emitted.

use crate::effect::{uninterruptible_mask, Effect};
use crate::types::Outcome;
use std::convert::Infallible;
use std::rc::Rc;

/// Acquires a resource uninterruptibly, uses it cancellably, and releases it
/// uninterruptibly with the reified outcome of the use.
///
/// The release effect runs to completion before the surrounding effect
/// settles, on every path — success, expected failure, defect, or abort
/// fired during the use.
pub fn acquire_use_release<A, B, E, U, R>(
    acquire: Effect<A, E>,
    use_fn: U,
    release: R,
) -> Effect<B, E>
where
    A: Clone + 'static,
    B: Clone + 'static,
    E: Clone + 'static,
    U: Fn(A) -> Effect<B, E> + 'static,
    R: Fn(A, &Outcome<B, E>) -> Effect<(), Infallible> + 'static,
{
    let use_fn = Rc::new(use_fn);
    let release = Rc::new(release);
    uninterruptible_mask(move |restore| {
        let use_fn = Rc::clone(&use_fn);
        let release = Rc::clone(&release);
        acquire.clone().flat_map(move |resource: A| {
            let release = Rc::clone(&release);
            let retained = resource.clone();
            restore
                .apply(use_fn(resource))
                .outcome::<E>()
                .flat_map(move |outcome: Outcome<B, E>| {
                    release(retained.clone(), &outcome)
                        .widen::<E>()
                        .zip_right(Effect::from_outcome(outcome))
                })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::types::Failure;
    use std::cell::RefCell;

    #[test]
    fn release_sees_the_failed_outcome_exactly_once() {
        let runtime = Runtime::new();
        let touched: Rc<RefCell<Vec<Outcome<i32, &str>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&touched);

        let effect = acquire_use_release(
            Effect::<&str, &str>::sync(|| "r"),
            |_r| Effect::<i32, &str>::fail("boom"),
            move |_r, outcome| {
                let sink = Rc::clone(&sink);
                let outcome = outcome.clone();
                Effect::sync(move || sink.borrow_mut().push(outcome.clone()))
            },
        );

        assert_eq!(
            runtime.run_sync_result(effect).expect("synchronous"),
            Err(Failure::Expected("boom"))
        );
        assert_eq!(*touched.borrow(), vec![Err(Failure::Expected("boom"))]);
    }

    #[test]
    fn release_sees_the_success_outcome() {
        let runtime = Runtime::new();
        let touched: Rc<RefCell<Vec<Outcome<i32, &str>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&touched);

        let effect = acquire_use_release(
            Effect::<i32, &str>::succeed(10),
            |r| Effect::<i32, &str>::succeed(r * 2),
            move |_r, outcome| {
                let sink = Rc::clone(&sink);
                let outcome = outcome.clone();
                Effect::sync(move || sink.borrow_mut().push(outcome.clone()))
            },
        );

        assert_eq!(runtime.run_sync_result(effect).expect("synchronous"), Ok(20));
        assert_eq!(*touched.borrow(), vec![Ok(20)]);
    }

    #[test]
    fn release_runs_when_use_is_aborted() {
        let runtime = Runtime::new();
        let touched: Rc<RefCell<Vec<Outcome<i32, &str>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&touched);

        // The use aborts the region's own source, then tries to continue.
        let aborting_use = |_r: i32| {
            Effect::<i32, &str>::make_no_abort(|env, k| {
                env.cancel_source().abort();
                k.resolve(Ok(0));
            })
            .flat_map(|_| Effect::succeed(1))
        };

        let effect = acquire_use_release(
            Effect::<i32, &str>::succeed(1),
            aborting_use,
            move |_r, outcome| {
                let sink = Rc::clone(&sink);
                let outcome = outcome.clone();
                Effect::sync(move || sink.borrow_mut().push(outcome.clone()))
            },
        );

        assert_eq!(
            runtime.run_sync_result(effect).expect("synchronous"),
            Err(Failure::Aborted)
        );
        assert_eq!(*touched.borrow(), vec![Err(Failure::Aborted)]);
    }
}
