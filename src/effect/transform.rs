//! Synchronous combinators.
//!
//! Everything here is a pass-through: when the children resolve
//! synchronously, so does the combinator. Failures short-circuit to the
//! nearest reifier ([`Effect::outcome`], [`Effect::on_result`]) or the
//! terminal continuation; user callbacks run behind the panic guard so a
//! panic in a continuation becomes an unexpected defect instead of escaping
//! the run.

use super::{guarded, Effect};
use crate::context::{Context, Tag};
use crate::env::{EnvRef, CURRENT_CONTEXT};
use crate::types::{Failure, Outcome};
use std::convert::Infallible;
use std::rc::Rc;
use std::time::Duration;

impl<A: 'static, E: 'static> Effect<A, E> {
    /// Transforms the success value.
    pub fn map<B: 'static>(self, f: impl Fn(A) -> B + 'static) -> Effect<B, E> {
        let f = Rc::new(f);
        Effect::make(move |env, k| {
            let f = Rc::clone(&f);
            self.run_with(
                env,
                Box::new(move |outcome| match outcome {
                    Ok(a) => match guarded(|| f(a)) {
                        Ok(b) => k.resolve(Ok(b)),
                        Err(defect) => k.resolve(Err(Failure::Unexpected(defect))),
                    },
                    Err(failure) => k.resolve(Err(failure)),
                }),
            );
        })
    }

    /// Transforms the expected error.
    pub fn map_err<E2: 'static>(self, f: impl Fn(E) -> E2 + 'static) -> Effect<A, E2> {
        let f = Rc::new(f);
        Effect::make(move |env, k| {
            let f = Rc::clone(&f);
            self.run_with(
                env,
                Box::new(move |outcome| match outcome {
                    Ok(a) => k.resolve(Ok(a)),
                    Err(Failure::Expected(e)) => match guarded(|| f(e)) {
                        Ok(e2) => k.resolve(Err(Failure::Expected(e2))),
                        Err(defect) => k.resolve(Err(Failure::Unexpected(defect))),
                    },
                    Err(Failure::Unexpected(defect)) => {
                        k.resolve(Err(Failure::Unexpected(defect)));
                    }
                    Err(Failure::Aborted) => k.resolve(Err(Failure::Aborted)),
                }),
            );
        })
    }

    /// On success, continues with the effect produced by `f`.
    pub fn flat_map<B: 'static>(self, f: impl Fn(A) -> Effect<B, E> + 'static) -> Effect<B, E> {
        let f = Rc::new(f);
        Effect::make(move |env, k| {
            let f = Rc::clone(&f);
            let inner_env = env.clone();
            self.run_with(
                env,
                Box::new(move |outcome| match outcome {
                    Ok(a) => match guarded(|| f(a)) {
                        Ok(next) => next.run_with(inner_env, k.into_boxed()),
                        Err(defect) => k.resolve(Err(Failure::Unexpected(defect))),
                    },
                    Err(failure) => k.resolve(Err(failure)),
                }),
            );
        })
    }

    /// Runs a side effect on success, keeping the original value.
    ///
    /// A failing side effect replaces the success.
    pub fn tap<B: 'static>(self, f: impl Fn(&A) -> Effect<B, E> + 'static) -> Effect<A, E> {
        let f = Rc::new(f);
        Effect::make(move |env, k| {
            let f = Rc::clone(&f);
            let inner_env = env.clone();
            self.run_with(
                env,
                Box::new(move |outcome| match outcome {
                    Ok(a) => match guarded(|| f(&a)) {
                        Ok(side) => side.run_with(
                            inner_env,
                            Box::new(move |side_outcome| match side_outcome {
                                Ok(_) => k.resolve(Ok(a)),
                                Err(failure) => k.resolve(Err(failure)),
                            }),
                        ),
                        Err(defect) => k.resolve(Err(Failure::Unexpected(defect))),
                    },
                    Err(failure) => k.resolve(Err(failure)),
                }),
            );
        })
    }

    /// Sequences two effects, keeping the second value.
    pub fn zip_right<B: 'static>(self, that: Effect<B, E>) -> Effect<B, E> {
        Effect::make(move |env, k| {
            let that = that.clone();
            let inner_env = env.clone();
            self.run_with(
                env,
                Box::new(move |outcome| match outcome {
                    Ok(_) => that.run_with(inner_env, k.into_boxed()),
                    Err(failure) => k.resolve(Err(failure)),
                }),
            );
        })
    }

    /// Replaces the success value with a constant.
    pub fn as_value<B: Clone + 'static>(self, value: B) -> Effect<B, E> {
        self.map(move |_| value.clone())
    }

    /// Discards the success value.
    pub fn as_void(self) -> Effect<(), E> {
        self.map(|_| ())
    }

    /// Reifies the outcome as a success.
    ///
    /// The resulting effect never fails in its own channel (modulo the
    /// pre-abort check of an already-aborted interruptible region).
    pub fn outcome<E2: 'static>(self) -> Effect<Outcome<A, E>, E2> {
        Effect::make(move |env, k| {
            self.run_with(env, Box::new(move |outcome| k.resolve(Ok(outcome))));
        })
    }

    /// Runs a side effect on the reified outcome, then re-emits it.
    ///
    /// The side effect runs uninterruptibly; the wrapped effect keeps the
    /// caller's interruptibility.
    pub fn on_result(
        self,
        f: impl Fn(&Outcome<A, E>) -> Effect<(), Infallible> + 'static,
    ) -> Effect<A, E>
    where
        A: Clone,
        E: Clone,
    {
        let f = Rc::new(f);
        super::mask::uninterruptible_mask(move |restore| {
            let f = Rc::clone(&f);
            restore
                .apply(self.clone())
                .outcome::<E>()
                .flat_map(move |outcome: Outcome<A, E>| {
                    f(&outcome)
                        .widen::<E>()
                        .zip_right(Effect::from_outcome(outcome))
                })
        })
    }

    /// Delays the effect by `duration`.
    pub fn delay(self, duration: Duration) -> Effect<A, E> {
        Effect::sleep(duration).zip_right(self)
    }

    /// Runs the effect with `value` written under `env_ref`.
    pub fn locally<T: Clone + 'static>(self, env_ref: EnvRef<T>, value: T) -> Effect<A, E> {
        Effect::make(move |env, k| {
            self.run_with(env.with(env_ref, value.clone()), k.into_boxed());
        })
    }

    /// Runs the effect with `service` added to the context.
    pub fn provide_service<S: 'static>(self, tag: Tag<S>, service: Rc<S>) -> Effect<A, E> {
        Effect::make(move |env, k| {
            let context = env.context().add_shared(tag, Rc::clone(&service));
            self.run_with(env.with(CURRENT_CONTEXT, context), k.into_boxed());
        })
    }

    /// Runs the effect with `context` merged over the current one.
    pub fn provide_context(self, context: Context) -> Effect<A, E> {
        Effect::make(move |env, k| {
            let merged = env.context().merge(&context);
            self.run_with(env.with(CURRENT_CONTEXT, merged), k.into_boxed());
        })
    }
}

impl<A: 'static> Effect<A, Infallible> {
    /// Re-types an effect that provably cannot fail in the typed channel.
    pub fn widen<E: 'static>(self) -> Effect<A, E> {
        Effect::make(move |env, k| {
            self.run_with(
                env,
                Box::new(move |outcome| match outcome {
                    Ok(a) => k.resolve(Ok(a)),
                    Err(failure) => k.resolve(Err(failure.widen())),
                }),
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use std::cell::Cell;

    #[test]
    fn map_transforms_success() {
        let runtime = Runtime::new();
        assert_eq!(runtime.run_sync(Effect::<i32>::succeed(2).map(|x| x * 3)), 6);
    }

    #[test]
    fn map_preserves_failure() {
        let runtime = Runtime::new();
        let outcome = runtime
            .run_sync_result(Effect::<i32, &str>::fail("bad").map(|x| x * 3))
            .expect("synchronous");
        assert_eq!(outcome, Err(Failure::Expected("bad")));
    }

    #[test]
    fn map_panic_becomes_defect() {
        let runtime = Runtime::new();
        let outcome = runtime
            .run_sync_result(Effect::<i32, &str>::succeed(1).map(|_: i32| -> i32 { panic!("in map") }))
            .expect("synchronous");
        match outcome {
            Err(Failure::Unexpected(defect)) => assert_eq!(defect.message(), "in map"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn flat_map_chains_in_the_same_environment() {
        let runtime = Runtime::new();
        let effect = Effect::<i32>::succeed(2).flat_map(|x| Effect::succeed(x + 10));
        assert_eq!(runtime.run_sync(effect), 12);
    }

    #[test]
    fn flat_map_identity_law() {
        let runtime = Runtime::new();
        let effect = Effect::<i32, &str>::succeed(9).flat_map(Effect::succeed);
        assert_eq!(
            runtime.run_sync_result(effect).expect("synchronous"),
            Ok(9)
        );
    }

    #[test]
    fn tap_keeps_the_original_value() {
        let runtime = Runtime::new();
        let seen = Rc::new(Cell::new(0));
        let seen2 = Rc::clone(&seen);
        let effect = Effect::<i32>::succeed(5).tap(move |v| {
            seen2.set(*v);
            Effect::succeed("ignored")
        });
        assert_eq!(runtime.run_sync(effect), 5);
        assert_eq!(seen.get(), 5);
    }

    #[test]
    fn tap_failure_replaces_success() {
        let runtime = Runtime::new();
        let effect = Effect::<i32, &str>::succeed(5).tap(|_| Effect::<(), &str>::fail("side"));
        assert_eq!(
            runtime.run_sync_result(effect).expect("synchronous"),
            Err(Failure::Expected("side"))
        );
    }

    #[test]
    fn zip_right_keeps_the_second_value() {
        let runtime = Runtime::new();
        let effect = Effect::<i32>::succeed(1).zip_right(Effect::succeed(2));
        assert_eq!(runtime.run_sync(effect), 2);
    }

    #[test]
    fn outcome_reifies_every_channel() {
        let runtime = Runtime::new();

        let ok = Effect::<i32, &str>::succeed(1).outcome::<Infallible>();
        assert_eq!(runtime.run_sync(ok), Ok(1));

        let expected = Effect::<i32, &str>::fail("x").outcome::<Infallible>();
        assert_eq!(
            runtime.run_sync(expected),
            Err(Failure::Expected("x"))
        );

        let aborted = Effect::<i32, &str>::interrupt().outcome::<Infallible>();
        assert_eq!(runtime.run_sync(aborted), Err(Failure::Aborted));

        let died = Effect::<i32, &str>::die("d").outcome::<Infallible>();
        match runtime.run_sync(died) {
            Err(Failure::Unexpected(_)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn on_result_observes_and_reemits() {
        let runtime = Runtime::new();
        let seen = Rc::new(Cell::new(false));
        let seen2 = Rc::clone(&seen);
        let effect = Effect::<i32, &str>::fail("bad").on_result(move |out| {
            assert_eq!(out, &Err(Failure::Expected("bad")));
            seen2.set(true);
            Effect::succeed(())
        });
        assert_eq!(
            runtime.run_sync_result(effect).expect("synchronous"),
            Err(Failure::Expected("bad"))
        );
        assert!(seen.get());
    }

    #[test]
    fn map_err_retypes_expected_only() {
        let runtime = Runtime::new();
        let effect = Effect::<i32, &str>::fail("no").map_err(|e| e.len());
        assert_eq!(
            runtime.run_sync_result(effect).expect("synchronous"),
            Err(Failure::Expected(2))
        );

        let aborted = Effect::<i32, &str>::interrupt().map_err(|e| e.len());
        assert_eq!(
            runtime.run_sync_result(aborted).expect("synchronous"),
            Err(Failure::Aborted)
        );
    }

    #[test]
    fn locally_scopes_an_env_write() {
        use crate::env::CURRENT_CONCURRENCY;
        use crate::types::Concurrency;

        let runtime = Runtime::new();
        let read = Effect::<Concurrency>::make(|env, k| k.resolve(Ok(env.concurrency())));
        let effect = read
            .clone()
            .locally(CURRENT_CONCURRENCY, Concurrency::Unbounded)
            .flat_map(move |inner| read.clone().map(move |outer| (inner, outer)));
        assert_eq!(
            runtime.run_sync(effect),
            (Concurrency::Unbounded, Concurrency::Bounded(1))
        );
    }
}
