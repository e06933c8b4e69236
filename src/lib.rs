//! microfx: a minimal single-threaded effect runtime.
//!
//! # Overview
//!
//! An [`Effect<A, E>`] is a first-class description of a potentially
//! suspending, failure-aware computation: run it and exactly one
//! [`Outcome`] comes back — a success, a typed expected failure, an untyped
//! defect, or an abort. Effects compose before anything executes; a
//! [`Runtime`] turns the composed value into a settled outcome.
//!
//! # Core Guarantees
//!
//! - **Exactly-once settlement**: every run delivers one outcome to its
//!   continuation, on every path — success, failure, panic, or abort
//! - **Cancellation is cooperative and structural**: observed at resumption
//!   points, scoped by interruptibility masks, propagated parent-to-child
//!   through fork links
//! - **No silent drops**: panics in user callbacks become defects; scope
//!   finalizers all run even when one fails; releases see the outcome they
//!   are releasing for
//! - **Deterministic testing**: the lab runtime drives timers on virtual
//!   time, so timer-heavy scenarios run instantly and reproducibly
//!
//! # Module Structure
//!
//! - [`types`]: failures, outcomes, timestamps, concurrency settings
//! - [`cancel`]: cancel sources and tokens with removable abort listeners
//! - [`context`]: tagged service context
//! - [`env`]: the copy-on-write environment and its well-known references
//! - [`effect`]: the effect primitive, constructors, transforms, masks
//! - [`combinator`]: iteration, brackets, polymorphic sequencing, timeouts
//! - [`scope`](mod@scope): ordered finalizers and acquire/release
//! - [`handle`]: forked-effect handles
//! - [`runtime`]: the scheduler, clocks, and runners
//!
//! # Example
//!
//! ```
//! use microfx::{for_each, Effect, Runtime};
//!
//! let runtime = Runtime::new();
//! let effect = for_each(vec![1, 2, 3], |n| Effect::<i32>::succeed(n + 1));
//! assert_eq!(runtime.run_sync(effect), vec![2, 3, 4]);
//! ```
//!
//! # Threading
//!
//! The engine is single-threaded cooperative by contract: effect state uses
//! `Rc` and interior mutability, and the core types are deliberately not
//! `Send`. "Concurrency" means interleaving at suspension points — timers,
//! the callback bridge, forked children on the next tick.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

pub mod cancel;
pub mod combinator;
pub mod context;
pub mod effect;
pub mod env;
pub mod handle;
pub mod runtime;
pub mod scope;
pub mod types;

pub use cancel::{CancelSource, CancelToken, ListenerId};
pub use combinator::{
    acquire_use_release, for_each, for_each_discard, for_each_with, AndThenArg, ForEachOptions,
};
pub use context::{Context, Tag};
pub use effect::{service, uninterruptible_mask, Effect, Restore, Resume};
pub use env::{
    Env, EnvRef, CURRENT_CANCEL_SOURCE, CURRENT_CANCEL_TOKEN, CURRENT_CONCURRENCY,
    CURRENT_CONTEXT, CURRENT_INTERRUPTIBLE, CURRENT_SCHEDULER,
};
pub use handle::{Handle, ObserverId};
pub use runtime::{Runtime, SchedulerHandle, TimeSource, VirtualClock, WallClock};
pub use scope::{acquire_release, add_finalizer, Exit, Scope, SCOPE_TAG};
pub use types::{Concurrency, Defect, ErasedError, Failure, Outcome, Time};
