//! Core types for the microfx runtime.
//!
//! This module contains the fundamental types used throughout the runtime:
//!
//! - [`failure`]: the failure sum, defects, and the [`Outcome`] alias
//! - [`time`]: logical timestamps for timers and clocks
//! - [`concurrency`]: iteration concurrency settings

pub mod concurrency;
pub mod failure;
pub mod time;

pub use concurrency::Concurrency;
pub use failure::{Defect, ErasedError, Failure, Outcome};
pub use time::Time;
