//! Concurrency settings for iteration.

use core::fmt;

/// How many mappers an iterating combinator may keep in flight.
///
/// `Bounded(1)` (the default) selects the sequential engine. `Inherit` defers
/// to the environment's current setting at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concurrency {
    /// Use the environment's current concurrency setting.
    Inherit,
    /// At most `n` mappers in flight; values below 1 are treated as 1.
    Bounded(usize),
    /// No cap.
    Unbounded,
}

impl Concurrency {
    /// A bounded setting, clamped to at least 1.
    #[must_use]
    pub const fn bounded(n: usize) -> Self {
        if n == 0 {
            Self::Bounded(1)
        } else {
            Self::Bounded(n)
        }
    }

    /// The in-flight cap this setting denotes, if it does not defer.
    ///
    /// `Unbounded` maps to `usize::MAX`; `Inherit` has no cap of its own.
    #[must_use]
    pub const fn cap(self) -> Option<usize> {
        match self {
            Self::Inherit => None,
            Self::Bounded(n) => Some(if n == 0 { 1 } else { n }),
            Self::Unbounded => Some(usize::MAX),
        }
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::Bounded(1)
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherit => f.write_str("inherit"),
            Self::Bounded(n) => write!(f, "{n}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}
