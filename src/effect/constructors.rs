//! Effect constructors and the suspension bridge.

use super::{Continuation, Effect};
use crate::cancel::{CancelToken, ListenerId};
use crate::context::Tag;
use crate::env::Env;
use crate::runtime::scheduler::SchedulerHandle;
use crate::types::{Defect, Failure, Outcome};
use std::any::Any;
use std::cell::Cell;
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

impl<A: Clone + 'static, E: 'static> Effect<A, E> {
    /// An effect that succeeds with `value`.
    ///
    /// Effects are re-runnable values, so the value must be clonable; use
    /// [`sync`](Effect::sync) to produce a fresh value per run instead.
    pub fn succeed(value: A) -> Self {
        Effect::make(move |_env, k| k.resolve(Ok(value.clone())))
    }

    /// An effect that settles with an already-materialized outcome.
    pub fn from_outcome(outcome: Outcome<A, E>) -> Self
    where
        E: Clone,
    {
        Effect::make(move |_env, k| k.resolve(outcome.clone()))
    }

    /// Lifts a plain `Result`: `Err` lands in the expected channel.
    pub fn from_result(result: Result<A, E>) -> Self
    where
        E: Clone,
    {
        Effect::make(move |_env, k| {
            k.resolve(result.clone().map_err(Failure::Expected));
        })
    }
}

impl<A: Clone + 'static> Effect<A, Option<Infallible>> {
    /// Lifts an `Option`: `None` becomes an expected failure carrying the
    /// `None` itself in the error slot.
    pub fn from_option(option: Option<A>) -> Self {
        Effect::make(move |_env, k| match option.clone() {
            Some(value) => k.resolve(Ok(value)),
            None => k.resolve(Err(Failure::Expected(None))),
        })
    }
}

impl<A: 'static, E: 'static> Effect<A, E> {
    /// An effect that fails in the expected channel.
    pub fn fail(error: E) -> Self
    where
        E: Clone,
    {
        Effect::make(move |_env, k| k.resolve(Err(Failure::Expected(error.clone()))))
    }

    /// An effect that settles with the given failure.
    pub fn fail_with(failure: Failure<E>) -> Self
    where
        E: Clone,
    {
        Effect::make(move |_env, k| k.resolve(Err(failure.clone())))
    }

    /// An effect that dies with an untyped defect.
    pub fn die(defect: impl fmt::Debug + Any) -> Self {
        let defect = Defect::new(defect);
        Effect::make(move |_env, k| k.resolve(Err(Failure::Unexpected(defect.clone()))))
    }

    /// An effect that settles as aborted.
    pub fn interrupt() -> Self {
        Effect::make(|_env, k| k.resolve(Err(Failure::Aborted)))
    }

    /// Evaluates a thunk at run time; a panic becomes an unexpected defect.
    pub fn sync(thunk: impl Fn() -> A + 'static) -> Self {
        Effect::make(move |_env, k| k.resolve(Ok(thunk())))
    }

    /// Defers construction of the inner effect to run time.
    pub fn suspend(thunk: impl Fn() -> Effect<A, E> + 'static) -> Self {
        Effect::make(move |env, k| thunk().run_with(env, k.into_boxed()))
    }

    /// An effect that never resumes on its own, but observes abort.
    pub fn never() -> Self {
        Effect::callback(|_resume, _token| Some(Effect::sync(|| ())))
    }

    /// The bridge from external events into an effect.
    ///
    /// `register` is invoked once per run with a [`Resume`] and the region's
    /// cancellation token. The first [`Resume::complete`] wins; later calls
    /// are ignored. If `register` returns a cleanup effect, an abort listener
    /// is installed that resumes with the cleanup followed by an abort
    /// failure, run uninterruptibly; the listener is removed once resume is
    /// taken through any path.
    pub fn callback(
        register: impl Fn(Resume<A, E>, CancelToken) -> Option<Effect<(), Infallible>> + 'static,
    ) -> Self {
        Effect::make(move |env, k| {
            let token = env.cancel_token();
            let resume = Resume::new(env, k, token.clone());
            let cleanup = register(resume.clone(), token.clone());
            if let Some(cleanup) = cleanup {
                if resume.is_taken() {
                    return;
                }
                let aborted = resume.clone();
                let id = token.on_abort(move || {
                    let recovery = cleanup
                        .widen::<E>()
                        .zip_right(Effect::interrupt())
                        .uninterruptible();
                    aborted.complete(recovery);
                });
                resume.set_listener(id);
            }
        })
    }
}

impl<E: 'static> Effect<(), E> {
    /// Suspends for `duration` on the scheduler's timer wheel.
    ///
    /// Aborting the region cancels the pending timer.
    pub fn sleep(duration: Duration) -> Self {
        Effect::callback(move |resume, _token| {
            let scheduler = resume.scheduler();
            let waker = resume.clone();
            let timer = scheduler.schedule_timer(duration, move || waker.succeed(()));
            let owner = scheduler.clone();
            Some(Effect::sync(move || owner.cancel_timer(timer)))
        })
    }
}

/// Reads a service from the current context.
///
/// A missing service is a defect: requirements are supposed to be provided
/// before the effect runs.
pub fn service<S: 'static, E: 'static>(tag: Tag<S>) -> Effect<Rc<S>, E> {
    Effect::make(move |env, k| match env.context().get(tag) {
        Some(found) => k.resolve(Ok(found)),
        None => k.resolve(Err(Failure::Unexpected(Defect::from_message(format!(
            "service not found: {}",
            tag.id()
        ))))),
    })
}

struct ResumeState<A, E> {
    env: Env,
    k: Continuation<A, E>,
    taken: Cell<bool>,
    listener: Cell<Option<ListenerId>>,
    token: CancelToken,
}

/// The resumption handle passed to [`Effect::callback`] registrations.
///
/// Idempotent: the first completion runs in place of the suspended effect,
/// later completions are ignored.
pub struct Resume<A, E> {
    state: Rc<ResumeState<A, E>>,
}

impl<A, E> Clone for Resume<A, E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<A: 'static, E: 'static> Resume<A, E> {
    fn new(env: Env, k: Continuation<A, E>, token: CancelToken) -> Self {
        Self {
            state: Rc::new(ResumeState {
                env,
                k,
                taken: Cell::new(false),
                listener: Cell::new(None),
                token,
            }),
        }
    }

    /// Runs `effect` in place of the suspension. First call wins.
    pub fn complete(&self, effect: Effect<A, E>) {
        if self.state.taken.replace(true) {
            return;
        }
        if let Some(id) = self.state.listener.take() {
            self.state.token.remove_listener(id);
        }
        effect.run_with(self.state.env.clone(), self.state.k.clone().into_boxed());
    }

    /// Resumes with a success value.
    pub fn succeed(&self, value: A)
    where
        A: Clone,
    {
        self.complete(Effect::succeed(value));
    }

    /// Resumes with an expected failure.
    pub fn fail(&self, error: E)
    where
        E: Clone,
    {
        self.complete(Effect::fail(error));
    }

    /// Returns true once a completion has been taken.
    #[must_use]
    pub fn is_taken(&self) -> bool {
        self.state.taken.get()
    }

    /// The scheduler of the suspended region, for timer registrations.
    #[must_use]
    pub fn scheduler(&self) -> SchedulerHandle {
        self.state.env.scheduler()
    }

    pub(crate) fn set_listener(&self, id: Option<ListenerId>) {
        self.state.listener.set(id);
    }
}

impl<A, E> fmt::Debug for Resume<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("taken", &self.state.taken.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn succeed_resolves_synchronously() {
        let runtime = Runtime::new();
        assert_eq!(runtime.run_sync(Effect::<i32>::succeed(5)), 5);
    }

    #[test]
    fn fail_lands_in_the_expected_channel() {
        let runtime = Runtime::new();
        let outcome = runtime
            .run_sync_result(Effect::<i32, &str>::fail("bad"))
            .expect("synchronous");
        assert_eq!(outcome, Err(Failure::Expected("bad")));
    }

    #[test]
    fn die_lands_in_the_unexpected_channel() {
        let runtime = Runtime::new();
        let outcome = runtime
            .run_sync_result(Effect::<i32, &str>::die("boom"))
            .expect("synchronous");
        match outcome {
            Err(Failure::Unexpected(defect)) => assert_eq!(defect.message(), "\"boom\""),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn sync_catches_panics() {
        let runtime = Runtime::new();
        let outcome = runtime
            .run_sync_result(Effect::<i32, &str>::sync(|| panic!("thunk")))
            .expect("synchronous");
        match outcome {
            Err(Failure::Unexpected(defect)) => assert_eq!(defect.message(), "thunk"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn from_option_none_keeps_the_none_in_the_error_slot() {
        let runtime = Runtime::new();
        let outcome = runtime
            .run_sync_result(Effect::<i32, _>::from_option(None))
            .expect("synchronous");
        assert_eq!(outcome, Err(Failure::Expected(None)));

        assert_eq!(runtime.run_sync(Effect::from_option(Some(4))), 4);
    }

    #[test]
    fn from_result_maps_err_to_expected() {
        let runtime = Runtime::new();
        let outcome = runtime
            .run_sync_result(Effect::<i32, String>::from_result(Err("no".to_string())))
            .expect("synchronous");
        assert_eq!(outcome, Err(Failure::Expected("no".to_string())));
    }

    #[test]
    fn suspend_defers_construction_to_run_time() {
        use std::cell::Cell;
        let built = Rc::new(Cell::new(0));
        let built2 = Rc::clone(&built);
        let effect: Effect<i32> = Effect::suspend(move || {
            built2.set(built2.get() + 1);
            Effect::succeed(1)
        });
        assert_eq!(built.get(), 0);

        let runtime = Runtime::new();
        assert_eq!(runtime.run_sync(effect.clone()), 1);
        assert_eq!(runtime.run_sync(effect), 1);
        assert_eq!(built.get(), 2);
    }

    #[test]
    fn service_reads_from_the_provided_context() {
        const NAME: Tag<String> = Tag::new("test/Name");
        let runtime = Runtime::new();
        let effect = service::<String, Infallible>(NAME)
            .map(|s| (*s).clone())
            .provide_service(NAME, Rc::new("svc".to_string()));
        assert_eq!(runtime.run_sync(effect), "svc");
    }

    #[test]
    fn missing_service_is_a_defect() {
        const NAME: Tag<String> = Tag::new("test/Missing");
        let runtime = Runtime::new();
        let outcome = runtime
            .run_sync_result(service::<String, Infallible>(NAME))
            .expect("synchronous");
        match outcome {
            Err(Failure::Unexpected(defect)) => {
                assert!(defect.message().contains("test/Missing"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
