//! Handles for forked effects.
//!
//! [`Effect::fork`] starts a child on the scheduler's next tick and hands
//! back a [`Handle`] immediately. The handle owns the child's cancel source,
//! listens to the parent token (unless daemonized), and fans the final
//! outcome out to observers. Settlement is one-shot: the first outcome wins,
//! the parent listener is detached, and the own source is aborted so
//! downstream resources are released.

use crate::cancel::{CancelSource, CancelToken, ListenerId};
use crate::effect::Effect;
use crate::env::{CURRENT_CANCEL_SOURCE, CURRENT_CANCEL_TOKEN};
use crate::types::Outcome;
use slab::Slab;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;

/// Identifies a registered observer so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(usize);

struct HandleState<A, E> {
    source: CancelSource,
    parent: Cell<Option<(CancelToken, ListenerId)>>,
    // Behind an Rc so observers run without holding the cell borrowed.
    result: RefCell<Option<Rc<Outcome<A, E>>>>,
    observers: RefCell<Slab<Box<dyn FnOnce(&Outcome<A, E>)>>>,
}

/// The control object of a forked effect.
pub struct Handle<A, E> {
    state: Rc<HandleState<A, E>>,
}

impl<A, E> Clone for Handle<A, E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<A, E> PartialEq for Handle<A, E> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl<A: 'static, E: 'static> fmt::Debug for Handle<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<A: 'static, E: 'static> Handle<A, E> {
    pub(crate) fn new(source: CancelSource) -> Self {
        Self {
            state: Rc::new(HandleState {
                source,
                parent: Cell::new(None),
                result: RefCell::new(None),
                observers: RefCell::new(Slab::new()),
            }),
        }
    }

    /// Bridges the parent's abort into this handle's source.
    pub(crate) fn link_parent(&self, parent: CancelToken) {
        let source = self.state.source.clone();
        if let Some(id) = parent.on_abort(move || source.abort()) {
            self.state.parent.set(Some((parent, id)));
        }
    }

    /// One-shot settlement: records the outcome, detaches the parent
    /// listener, aborts the own source, and drains the observers.
    pub(crate) fn settle(&self, outcome: Outcome<A, E>) {
        let outcome = {
            let mut slot = self.state.result.borrow_mut();
            if slot.is_some() {
                return;
            }
            let shared = Rc::new(outcome);
            *slot = Some(Rc::clone(&shared));
            shared
        };
        if let Some((parent, id)) = self.state.parent.take() {
            parent.remove_listener(id);
        }
        tracing::trace!(settled = true, "handle settled");
        self.state.source.abort();
        let observers = mem::take(&mut *self.state.observers.borrow_mut());
        for (_, observer) in observers {
            observer(&outcome);
        }
    }

    /// Returns true once the child has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state.result.borrow().is_some()
    }

    /// Takes the settled outcome out of the handle, if any.
    ///
    /// Used by the runners, which are the sole consumer of a root handle.
    pub(crate) fn take_result(&self) -> Option<Outcome<A, E>> {
        let shared = self.state.result.borrow_mut().take()?;
        match Rc::try_unwrap(shared) {
            Ok(outcome) => Some(outcome),
            Err(shared) => {
                // An observer kept the settlement alive; put it back.
                *self.state.result.borrow_mut() = Some(shared);
                None
            }
        }
    }

    /// Registers an observer of the final outcome.
    ///
    /// After settlement the observer is invoked immediately and `None` is
    /// returned; otherwise the id for later removal.
    pub fn add_observer(&self, observer: impl FnOnce(&Outcome<A, E>) + 'static) -> Option<ObserverId> {
        let settled = self.state.result.borrow().clone();
        if let Some(outcome) = settled {
            observer(&outcome);
            return None;
        }
        let key = self
            .state
            .observers
            .borrow_mut()
            .insert(Box::new(observer));
        Some(ObserverId(key))
    }

    /// Removes a previously registered observer. No-op after settlement.
    pub fn remove_observer(&self, id: ObserverId) {
        let _ = self.state.observers.borrow_mut().try_remove(id.0);
    }
}

impl<A: Clone + 'static, E: Clone + 'static> Handle<A, E> {
    /// Returns a copy of the settled outcome, or `None` while pending.
    #[must_use]
    pub fn poll(&self) -> Option<Outcome<A, E>> {
        self.state
            .result
            .borrow()
            .as_ref()
            .map(|shared| (**shared).clone())
    }

    /// An effect suspending until the child settles, yielding its outcome.
    ///
    /// Abortable: the pending observer is removed when the waiting region is
    /// aborted.
    pub fn wait<E2: 'static>(&self) -> Effect<Outcome<A, E>, E2> {
        let handle = self.clone();
        Effect::callback(move |resume, _token| {
            let waker = resume.clone();
            let registered = handle.add_observer(move |outcome| waker.succeed(outcome.clone()));
            registered.map(|id| {
                let handle = handle.clone();
                Effect::sync(move || handle.remove_observer(id))
            })
        })
    }

    /// An effect that triggers the child's cancel source and completes once
    /// the child has settled.
    pub fn abort<E2: 'static>(&self) -> Effect<(), E2> {
        let handle = self.clone();
        Effect::suspend(move || {
            handle.state.source.abort();
            handle.wait::<E2>().as_void()
        })
    }

    /// An effect yielding the child's success or re-raising its failure.
    pub fn join(&self) -> Effect<A, E> {
        self.wait::<E>().flat_map(Effect::from_outcome)
    }
}

fn fork_with<A: 'static, E: 'static, E2: 'static>(
    effect: Effect<A, E>,
    link: bool,
) -> Effect<Handle<A, E>, E2> {
    Effect::make(move |env, k| {
        let source = CancelSource::new();
        let handle = Handle::new(source.clone());
        if link {
            handle.link_parent(env.cancel_token());
        }
        let child_env = env
            .with(CURRENT_CANCEL_TOKEN, source.token())
            .with(CURRENT_CANCEL_SOURCE, source);
        let child = effect.clone();
        let settler = handle.clone();
        env.scheduler().schedule(move || {
            child.run_with(child_env, Box::new(move |outcome| settler.settle(outcome)));
        });
        k.resolve(Ok(handle));
    })
}

impl<A: 'static, E: 'static> Effect<A, E> {
    /// Forks the effect onto the scheduler's next tick.
    ///
    /// The caller continues synchronously with the handle; the child's
    /// source is triggered when the parent region aborts.
    pub fn fork<E2: 'static>(self) -> Effect<Handle<A, E>, E2> {
        fork_with(self, true)
    }

    /// [`fork`](Effect::fork) without the parent link: the child outlives
    /// the parent's abort.
    pub fn fork_daemon<E2: 'static>(self) -> Effect<Handle<A, E>, E2> {
        fork_with(self, false)
    }
}
