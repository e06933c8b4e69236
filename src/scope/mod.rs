//! Scopes: ordered finalizers and the acquire/release discipline.
//!
//! A [`Scope`] collects finalizers while open and runs them in reverse
//! insertion order when closed with the (type-erased) settlement of the
//! scoped region. A scope closes at most once; finalizers added afterwards
//! run immediately with the stored exit. Every finalizer is attempted even
//! when one fails; the first failure is re-raised after the rest have run.

use crate::combinator::for_each;
use crate::context::Tag;
use crate::effect::{service, Effect};
use crate::types::{ErasedError, Failure, Outcome};
use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;

/// The well-known service tag under which [`scoped`](Effect::scoped)
/// provides its scope.
pub const SCOPE_TAG: Tag<Scope> = Tag::new("microfx/Scope");

/// The type-erased settlement a scope closed with, as seen by finalizers.
#[derive(Clone)]
pub enum Exit {
    /// The scoped region succeeded.
    Success,
    /// The scoped region failed; the expected error is erased but can still
    /// be downcast.
    Failure(Failure<ErasedError>),
}

impl Exit {
    /// Erases an outcome into an exit.
    #[must_use]
    pub fn from_outcome<A, E: Clone + 'static>(outcome: &Outcome<A, E>) -> Self {
        match outcome {
            Ok(_) => Self::Success,
            Err(failure) => Self::Failure(failure.erased()),
        }
    }

    /// Returns true for a successful settlement.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true for a failed settlement.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true when the settlement was an abort.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Failure(Failure::Aborted))
    }
}

impl fmt::Debug for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Exit::Success"),
            Self::Failure(Failure::Expected(_)) => f.write_str("Exit::Failure(Expected)"),
            Self::Failure(Failure::Unexpected(defect)) => {
                write!(f, "Exit::Failure(Unexpected({defect}))")
            }
            Self::Failure(Failure::Aborted) => f.write_str("Exit::Failure(Aborted)"),
        }
    }
}

pub(crate) type Finalizer = Rc<dyn Fn(&Exit) -> Effect<(), Infallible>>;

enum ScopeState {
    Open {
        finalizers: Vec<(u64, Finalizer)>,
        next_id: u64,
    },
    Closed {
        exit: Exit,
    },
}

/// A registry of finalizers closed at most once.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<RefCell<ScopeState>>,
}

impl Scope {
    /// Creates an open scope with no finalizers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ScopeState::Open {
                finalizers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Returns true once the scope has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&*self.inner.borrow(), ScopeState::Closed { .. })
    }

    /// Inserts while open; reports the stored exit when already closed.
    fn insert(&self, finalizer: Finalizer) -> Result<u64, Exit> {
        let mut state = self.inner.borrow_mut();
        match &mut *state {
            ScopeState::Open {
                finalizers,
                next_id,
            } => {
                let id = *next_id;
                *next_id += 1;
                finalizers.push((id, finalizer));
                Ok(id)
            }
            ScopeState::Closed { exit } => Err(exit.clone()),
        }
    }

    fn remove(&self, id: u64) {
        if let ScopeState::Open { finalizers, .. } = &mut *self.inner.borrow_mut() {
            finalizers.retain(|(entry, _)| *entry != id);
        }
    }

    /// Transitions to closed, handing back the finalizers in run order.
    fn seal(&self, exit: Exit) -> Option<Vec<Finalizer>> {
        let mut state = self.inner.borrow_mut();
        match &mut *state {
            ScopeState::Closed { .. } => None,
            ScopeState::Open { finalizers, .. } => {
                let mut pending: Vec<Finalizer> =
                    finalizers.drain(..).map(|(_, f)| f).collect();
                pending.reverse();
                *state = ScopeState::Closed { exit };
                Some(pending)
            }
        }
    }

    /// An effect registering `finalizer` on this scope.
    ///
    /// If the scope is already closed the finalizer runs immediately with
    /// the stored exit.
    pub fn add_finalizer(
        &self,
        finalizer: impl Fn(&Exit) -> Effect<(), Infallible> + 'static,
    ) -> Effect<(), Infallible> {
        let scope = self.clone();
        let finalizer: Finalizer = Rc::new(finalizer);
        Effect::suspend(move || match scope.insert(Rc::clone(&finalizer)) {
            Ok(_) => Effect::succeed(()),
            Err(exit) => finalizer(&exit),
        })
    }

    /// An effect closing the scope with `exit`.
    ///
    /// Finalizers run in reverse insertion order, each reified so one
    /// failure never prevents the others; the first failure is re-raised
    /// once all have run. Closing an already-closed scope is a no-op.
    pub fn close(&self, exit: Exit) -> Effect<(), Infallible> {
        let scope = self.clone();
        Effect::suspend(move || {
            let Some(pending) = scope.seal(exit.clone()) else {
                return Effect::succeed(());
            };
            let exit = exit.clone();
            for_each(pending, move |finalizer: Finalizer| {
                finalizer(&exit).outcome::<Infallible>()
            })
            .flat_map(|settlements: Vec<Outcome<(), Infallible>>| {
                let mut first: Option<Failure<Infallible>> = None;
                for settlement in settlements {
                    if let Err(failure) = settlement {
                        if first.is_none() {
                            first = Some(failure);
                        } else {
                            tracing::warn!(
                                ?failure,
                                "swallowing additional scope finalizer failure"
                            );
                        }
                    }
                }
                match first {
                    Some(failure) => Effect::fail_with(failure),
                    None => Effect::succeed(()),
                }
            })
        })
    }

    /// Spawns a child scope linked to this one.
    ///
    /// Closing the parent closes the child with the same exit; a child that
    /// closes on its own detaches from the parent.
    #[must_use]
    pub fn fork(&self) -> Scope {
        let child = Scope::new();
        let linked = child.clone();
        match self.insert(Rc::new(move |exit: &Exit| linked.close(exit.clone()))) {
            Ok(id) => {
                let parent = self.clone();
                let _ = child.insert(Rc::new(move |_exit: &Exit| {
                    let parent = parent.clone();
                    Effect::sync(move || parent.remove(id))
                }));
            }
            Err(exit) => {
                let _ = child.seal(exit);
            }
        }
        child
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.borrow() {
            ScopeState::Open { finalizers, .. } => f
                .debug_struct("Scope")
                .field("open", &true)
                .field("finalizers", &finalizers.len())
                .finish(),
            ScopeState::Closed { exit } => f
                .debug_struct("Scope")
                .field("open", &false)
                .field("exit", exit)
                .finish(),
        }
    }
}

/// An effect registering a finalizer on the ambient scope service.
pub fn add_finalizer<E: 'static>(
    finalizer: impl Fn(&Exit) -> Effect<(), Infallible> + 'static,
) -> Effect<(), E> {
    let finalizer: Finalizer = Rc::new(finalizer);
    service::<Scope, E>(SCOPE_TAG).flat_map(move |scope| {
        let finalizer = Rc::clone(&finalizer);
        scope
            .add_finalizer(move |exit| finalizer(exit))
            .widen::<E>()
    })
}

/// Acquires a resource uninterruptibly and registers its release as a scope
/// finalizer. Requires the scope service.
pub fn acquire_release<A, E, R>(acquire: Effect<A, E>, release: R) -> Effect<A, E>
where
    A: Clone + 'static,
    E: 'static,
    R: Fn(A, &Exit) -> Effect<(), Infallible> + 'static,
{
    let release = Rc::new(release);
    acquire
        .tap(move |resource: &A| {
            let resource = resource.clone();
            let release = Rc::clone(&release);
            add_finalizer::<E>(move |exit| release(resource.clone(), exit))
        })
        .uninterruptible()
}

impl<A: Clone + 'static, E: Clone + 'static> Effect<A, E> {
    /// Runs the effect with a fresh scope provided as a service, closing the
    /// scope with the effect's settlement on every path.
    pub fn scoped(self) -> Effect<A, E> {
        let source = self;
        Effect::suspend(move || {
            let scope = Scope::new();
            let closer = scope.clone();
            source
                .clone()
                .provide_service(SCOPE_TAG, Rc::new(scope))
                .on_result(move |outcome| closer.close(Exit::from_outcome(outcome)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    fn recording_finalizer(
        log: &Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl Fn(&Exit) -> Effect<(), Infallible> + 'static {
        let log = Rc::clone(log);
        move |_exit| {
            let log = Rc::clone(&log);
            Effect::sync(move || log.borrow_mut().push(name))
        }
    }

    #[test]
    fn finalizers_run_in_reverse_insertion_order() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let scope = Scope::new();

        let setup = scope
            .add_finalizer(recording_finalizer(&log, "f1"))
            .zip_right(scope.add_finalizer(recording_finalizer(&log, "f2")))
            .zip_right(scope.add_finalizer(recording_finalizer(&log, "f3")))
            .zip_right(scope.close(Exit::Success));
        runtime.run_sync(setup);

        assert_eq!(*log.borrow(), vec!["f3", "f2", "f1"]);
        assert!(scope.is_closed());
    }

    #[test]
    fn every_finalizer_is_attempted_when_one_dies() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let scope = Scope::new();

        let setup = scope
            .add_finalizer(recording_finalizer(&log, "f1"))
            .zip_right(scope.add_finalizer(recording_finalizer(&log, "f2")))
            .zip_right(
                scope.add_finalizer(|_exit| Effect::sync(|| panic!("f3 blew up"))),
            )
            .zip_right(scope.close(Exit::Success).outcome::<Infallible>());
        let close_outcome = runtime.run_sync(setup);

        assert_eq!(*log.borrow(), vec!["f2", "f1"]);
        match close_outcome {
            Err(Failure::Unexpected(defect)) => assert_eq!(defect.message(), "f3 blew up"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn add_after_close_runs_immediately_with_the_stored_exit() {
        let runtime = Runtime::new();
        let scope = Scope::new();
        runtime.run_sync(scope.close(Exit::Failure(Failure::Aborted)));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let late = scope.add_finalizer(move |exit| {
            let seen = Rc::clone(&seen2);
            let aborted = exit.is_aborted();
            Effect::sync(move || seen.borrow_mut().push(aborted))
        });
        runtime.run_sync(late);
        assert_eq!(*seen.borrow(), vec![true]);
    }

    #[test]
    fn double_close_is_a_no_op() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let scope = Scope::new();
        runtime.run_sync(
            scope
                .add_finalizer(recording_finalizer(&log, "once"))
                .zip_right(scope.close(Exit::Success))
                .zip_right(scope.close(Exit::Success)),
        );
        assert_eq!(*log.borrow(), vec!["once"]);
    }

    #[test]
    fn closing_the_parent_closes_the_child() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let parent = Scope::new();
        let child = parent.fork();

        runtime.run_sync(
            child
                .add_finalizer(recording_finalizer(&log, "child"))
                .zip_right(parent.add_finalizer(recording_finalizer(&log, "parent")))
                .zip_right(parent.close(Exit::Success)),
        );

        assert!(child.is_closed());
        // LIFO: the finalizer added after the fork runs before the child link.
        assert_eq!(*log.borrow(), vec!["parent", "child"]);
    }

    #[test]
    fn child_closing_first_detaches_from_the_parent() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let parent = Scope::new();
        let child = parent.fork();

        runtime.run_sync(
            child
                .add_finalizer(recording_finalizer(&log, "child"))
                .zip_right(child.close(Exit::Success))
                .zip_right(parent.close(Exit::Success)),
        );

        // The child ran once, on its own close.
        assert_eq!(*log.borrow(), vec!["child"]);
    }
}
