//! Runners and runtime state.
//!
//! A [`Runtime`] owns a scheduler and turns effect values into settled
//! outcomes. `run_fork` is the primitive: it seeds a root environment,
//! starts the effect synchronously, and hands back the root [`Handle`]; the
//! other runners build on it.

pub mod clock;
pub mod scheduler;
pub mod timer;

pub use clock::{TimeSource, VirtualClock, WallClock};
pub use scheduler::SchedulerHandle;
pub use timer::TimerId;

use crate::cancel::CancelSource;
use crate::effect::Effect;
use crate::env::Env;
use crate::handle::Handle;
use crate::types::Outcome;
use std::fmt;
use std::rc::Rc;

/// A single-threaded cooperative effect runtime.
#[derive(Clone, Debug)]
pub struct Runtime {
    scheduler: SchedulerHandle,
}

impl Runtime {
    /// A runtime over the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scheduler: SchedulerHandle::wall(),
        }
    }

    /// A runtime over deterministic virtual time: timers fire by jumping
    /// the clock, so timer-heavy scenarios run instantly and reproducibly.
    #[must_use]
    pub fn lab() -> Self {
        Self {
            scheduler: SchedulerHandle::lab(),
        }
    }

    /// A runtime over an arbitrary time source.
    #[must_use]
    pub fn with_clock(clock: Rc<dyn clock::TimeSource>) -> Self {
        Self {
            scheduler: SchedulerHandle::with_clock(clock),
        }
    }

    /// The runtime's scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Starts `effect` with a fresh root environment and returns its handle.
    ///
    /// The synchronous prefix of the effect runs on this call; suspended
    /// work stays queued on the scheduler until a blocking runner (or manual
    /// driving) picks it up.
    pub fn run_fork<A: 'static, E: 'static>(&self, effect: Effect<A, E>) -> Handle<A, E> {
        let source = CancelSource::new();
        let handle = Handle::new(source.clone());
        let env = Env::initial(self.scheduler.clone(), source);
        let settler = handle.clone();
        effect.run_with(env, Box::new(move |outcome| settler.settle(outcome)));
        handle
    }

    /// Runs `effect` to completion, driving microtasks and timers.
    ///
    /// # Panics
    ///
    /// Panics if the scheduler goes quiescent before the effect settles:
    /// with one thread and no external wake sources, no further progress is
    /// possible (for example, awaiting a handle nobody will ever settle).
    pub fn run_blocking<A: 'static, E: 'static>(&self, effect: Effect<A, E>) -> Outcome<A, E> {
        let handle = self.run_fork(effect);
        loop {
            while !handle.is_settled() && self.scheduler.run_next() {}
            if handle.is_settled() {
                if let Some(outcome) = handle.take_result() {
                    return outcome;
                }
            }
            if !self.scheduler.advance_timers() {
                tracing::error!("runtime deadlocked: no runnable work and the effect has not settled");
                panic!("microfx runtime deadlocked: no runnable work and the effect has not settled");
            }
        }
    }

    /// Runs the synchronous prefix of `effect` and polls once.
    ///
    /// A pending effect is a caller error; the still-pending sentinel is the
    /// root handle itself, so the caller can keep driving it.
    pub fn run_sync_result<A: 'static, E: 'static>(
        &self,
        effect: Effect<A, E>,
    ) -> Result<Outcome<A, E>, Handle<A, E>> {
        let handle = self.run_fork(effect);
        match handle.take_result() {
            Some(outcome) => Ok(outcome),
            None => Err(handle),
        }
    }

    /// Runs a synchronously-resolving `effect` and unwraps its success.
    ///
    /// # Panics
    ///
    /// Panics if the effect suspends or settles with a failure.
    pub fn run_sync<A: 'static, E: fmt::Debug + 'static>(&self, effect: Effect<A, E>) -> A {
        match self.run_sync_result(effect) {
            Ok(Ok(value)) => value,
            Ok(Err(failure)) => panic!("effect failed: {failure:?}"),
            Err(_handle) => panic!("effect did not resolve synchronously"),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
