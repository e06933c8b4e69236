//! Deadlines composed from fork, timer, and abort.
//!
//! A timeout is not a primitive: the effect is forked, its settlement races
//! a one-shot timer, and the loser is aborted. Whichever side resumes first
//! cancels the other so no stale timer keeps the scheduler busy.

use crate::effect::Effect;
use crate::handle::ObserverId;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

impl<A: Clone + 'static, E: Clone + 'static> Effect<A, E> {
    /// Runs the effect under a deadline.
    ///
    /// Yields `Some(a)` when the effect settles first; on expiry the forked
    /// effect is aborted, drained, and `None` is yielded.
    pub fn timeout_option(self, duration: Duration) -> Effect<Option<A>, E> {
        self.fork::<E>().flat_map(move |handle| {
            let handle = handle.clone();
            Effect::callback(move |resume, _token| {
                let scheduler = resume.scheduler();
                let observer_slot: Rc<Cell<Option<ObserverId>>> = Rc::new(Cell::new(None));

                let expired = resume.clone();
                let expired_handle = handle.clone();
                let expired_slot = Rc::clone(&observer_slot);
                let timer = scheduler.schedule_timer(duration, move || {
                    if let Some(id) = expired_slot.take() {
                        expired_handle.remove_observer(id);
                    }
                    expired.complete(expired_handle.abort::<E>().map(|_| None));
                });

                let settled = resume.clone();
                let settle_scheduler = scheduler.clone();
                let registered = handle.add_observer(move |outcome| {
                    settle_scheduler.cancel_timer(timer);
                    settled.complete(Effect::from_outcome(outcome.clone()).map(Some));
                });
                observer_slot.set(registered);

                let cleanup_handle = handle.clone();
                let cleanup_slot = Rc::clone(&observer_slot);
                let cleanup_scheduler = scheduler.clone();
                Some(Effect::sync(move || {
                    cleanup_scheduler.cancel_timer(timer);
                    if let Some(id) = cleanup_slot.take() {
                        cleanup_handle.remove_observer(id);
                    }
                }))
            })
        })
    }
}
