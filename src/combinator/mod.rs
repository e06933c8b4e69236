//! Combinators for structured composition.
//!
//! This module provides the combinator families that go beyond the
//! synchronous transforms on [`Effect`](crate::effect::Effect):
//!
//! - [`and_then`](mod@and_then): polymorphic sequencing (effect, function, or value)
//! - [`bracket`](mod@bracket): acquire/use/release resource safety
//! - [`for_each`](mod@for_each): sequential and bounded-concurrent iteration
//! - [`timeout`](mod@timeout): deadlines composed from fork + timer + abort

pub mod and_then;
pub mod bracket;
pub mod for_each;
pub mod timeout;

pub use and_then::AndThenArg;
pub use bracket::acquire_use_release;
pub use for_each::{for_each, for_each_discard, for_each_with, ForEachOptions};
