//! Cooperative cancellation: sources and tokens.
//!
//! Cancellation is a first-class protocol, not a silent drop. A
//! [`CancelSource`] owns the ability to abort; a [`CancelToken`] is the
//! observed side: it can be polled and it can carry listeners that fire once
//! when the source aborts. Both are cheap reference-counted handles onto the
//! same shared state, so mask primitives can mint a fresh pair per region.
//!
//! The engine is single-threaded by contract; listener state uses `Rc` and
//! interior mutability, no locks.

use slab::Slab;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;

/// Identifies a registered abort listener so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

struct CancelState {
    aborted: Cell<bool>,
    listeners: RefCell<Slab<Box<dyn FnOnce()>>>,
}

impl CancelState {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            aborted: Cell::new(false),
            listeners: RefCell::new(Slab::new()),
        })
    }
}

/// The owning side of a cancellation pair.
#[derive(Clone)]
pub struct CancelSource {
    state: Rc<CancelState>,
}

impl CancelSource {
    /// Creates a fresh, un-aborted source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CancelState::new(),
        }
    }

    /// Returns the observed side of this source.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            state: Rc::clone(&self.state),
        }
    }

    /// Returns true once [`abort`](Self::abort) has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.get()
    }

    /// Aborts: marks the state and fires every registered listener once.
    ///
    /// Idempotent. Listeners registered while the drain is in progress run
    /// immediately (the token is already aborted by then).
    pub fn abort(&self) {
        if self.state.aborted.replace(true) {
            return;
        }
        let listeners = mem::take(&mut *self.state.listeners.borrow_mut());
        for (_, listener) in listeners {
            listener();
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSource")
            .field("aborted", &self.state.aborted.get())
            .finish()
    }
}

/// The observed side of a cancellation pair.
#[derive(Clone)]
pub struct CancelToken {
    state: Rc<CancelState>,
}

impl CancelToken {
    /// A token no source can ever abort.
    #[must_use]
    pub fn detached() -> Self {
        CancelSource::new().token()
    }

    /// Returns true once the owning source has aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.get()
    }

    /// Registers a listener fired when the source aborts.
    ///
    /// If the token is already aborted the listener runs immediately and
    /// `None` is returned; otherwise the id for later removal.
    pub fn on_abort(&self, listener: impl FnOnce() + 'static) -> Option<ListenerId> {
        if self.is_aborted() {
            listener();
            return None;
        }
        let key = self.state.listeners.borrow_mut().insert(Box::new(listener));
        Some(ListenerId(key))
    }

    /// Removes a previously registered listener. No-op if it already fired.
    pub fn remove_listener(&self, id: ListenerId) {
        let _ = self.state.listeners.borrow_mut().try_remove(id.0);
    }

    /// Returns true if this token observes the same state as `other`.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("aborted", &self.state.aborted.get())
            .finish()
    }
}
