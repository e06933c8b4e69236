//! The cooperative scheduler: microtask queue, timer heap, clock.
//!
//! One logical execution line. Microtasks run in FIFO order; when the queue
//! drains, the clock advances to the earliest armed deadline and the expired
//! timers are enqueued as microtasks. Everything is `Rc`-shared; the
//! scheduler is deliberately `!Send`.

use super::clock::{TimeSource, VirtualClock, WallClock};
use super::timer::{TimerHeap, TimerId};
use crate::types::Time;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

struct Scheduler {
    queue: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    timers: RefCell<TimerHeap>,
    clock: Rc<dyn TimeSource>,
}

/// A shared handle onto a scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Rc<Scheduler>,
}

impl SchedulerHandle {
    /// A scheduler over an arbitrary time source.
    #[must_use]
    pub fn with_clock(clock: Rc<dyn TimeSource>) -> Self {
        Self {
            inner: Rc::new(Scheduler {
                queue: RefCell::new(VecDeque::new()),
                timers: RefCell::new(TimerHeap::new()),
                clock,
            }),
        }
    }

    /// A scheduler over the wall clock.
    #[must_use]
    pub fn wall() -> Self {
        Self::with_clock(Rc::new(WallClock::new()))
    }

    /// A scheduler over deterministic virtual time.
    #[must_use]
    pub fn lab() -> Self {
        Self::with_clock(Rc::new(VirtualClock::new()))
    }

    /// The current time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.clock.now()
    }

    /// Enqueues a microtask for the next tick.
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.inner.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Arms a one-shot timer firing `callback` after `delay`.
    pub fn schedule_timer(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        let deadline = self.now() + delay;
        self.inner
            .timers
            .borrow_mut()
            .insert(deadline, Box::new(callback))
    }

    /// Disarms a timer. No-op if it already fired.
    pub fn cancel_timer(&self, id: TimerId) {
        self.inner.timers.borrow_mut().cancel(id);
    }

    /// Runs the next microtask. Returns false when the queue is empty.
    pub(crate) fn run_next(&self) -> bool {
        let task = self.inner.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// With an empty queue, advances the clock to the earliest deadline and
    /// enqueues the expired timers. Returns false when no timer is armed.
    pub(crate) fn advance_timers(&self) -> bool {
        let deadline = self.inner.timers.borrow_mut().peek_deadline();
        let Some(deadline) = deadline else {
            return false;
        };
        self.inner.clock.wait_until(deadline);
        let now = self.inner.clock.now();
        let expired = self.inner.timers.borrow_mut().pop_expired(now);
        tracing::trace!(fired = expired.len(), now = %now, "timers expired");
        let mut queue = self.inner.queue.borrow_mut();
        for callback in expired {
            queue.push_back(callback);
        }
        true
    }

    /// True when neither a microtask nor a timer is pending.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.inner.queue.borrow().is_empty() && self.inner.timers.borrow().is_empty()
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("queued", &self.inner.queue.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .finish()
    }
}
