//! Failure and outcome types.
//!
//! Every run of an effect settles with exactly one [`Outcome`]: a success or
//! a [`Failure`]. Failures are a three-way sum so that recoverable domain
//! errors, escaped panics, and cancellation stay distinguishable all the way
//! to the runner.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// The settled result of running an effect: success or [`Failure`].
pub type Outcome<A, E> = Result<A, Failure<E>>;

/// A type-erased expected error, as seen by scope finalizers.
pub type ErasedError = Rc<dyn Any>;

/// The failure channel of an effect.
///
/// - [`Failure::Expected`] carries a typed, recoverable domain error.
/// - [`Failure::Unexpected`] carries a [`Defect`]: a panic or an explicitly
///   raised untyped value that escaped the typed channel.
/// - [`Failure::Aborted`] is the cancellation sentinel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Failure<E> {
    /// Typed, recoverable domain failure.
    #[error("expected failure: {0:?}")]
    Expected(E),
    /// Untyped defect: a panicked or explicitly raised value.
    #[error("unexpected defect: {0}")]
    Unexpected(Defect),
    /// The computation was aborted (interrupted).
    #[error("aborted")]
    Aborted,
}

impl<E> Failure<E> {
    /// Returns true for [`Failure::Expected`].
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::Expected(_))
    }

    /// Returns true for [`Failure::Unexpected`].
    #[must_use]
    pub const fn is_unexpected(&self) -> bool {
        matches!(self, Self::Unexpected(_))
    }

    /// Returns true for [`Failure::Aborted`].
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Transforms the expected error, leaving defects and aborts unchanged.
    pub fn map<E2>(self, f: impl FnOnce(E) -> E2) -> Failure<E2> {
        match self {
            Self::Expected(e) => Failure::Expected(f(e)),
            Self::Unexpected(defect) => Failure::Unexpected(defect),
            Self::Aborted => Failure::Aborted,
        }
    }

    /// Returns the expected error, if this is an expected failure.
    pub fn into_expected(self) -> Option<E> {
        match self {
            Self::Expected(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: Clone + 'static> Failure<E> {
    /// Erases the expected error type, preserving the value behind
    /// [`ErasedError`] so downstream observers can still downcast it.
    #[must_use]
    pub fn erased(&self) -> Failure<ErasedError> {
        match self {
            Self::Expected(e) => Failure::Expected(Rc::new(e.clone()) as ErasedError),
            Self::Unexpected(defect) => Failure::Unexpected(defect.clone()),
            Self::Aborted => Failure::Aborted,
        }
    }
}

impl Failure<Infallible> {
    /// Re-types a failure that provably carries no expected error.
    #[must_use]
    pub fn widen<E>(self) -> Failure<E> {
        match self {
            Self::Expected(never) => match never {},
            Self::Unexpected(defect) => Failure::Unexpected(defect),
            Self::Aborted => Failure::Aborted,
        }
    }
}

/// An untyped defect: a value that escaped the typed failure channel.
///
/// Defects are produced by catching panics at the engine boundary and by the
/// explicit `die` constructor. The original payload is retained for
/// downcasting; equality compares the rendered message only.
#[derive(Clone)]
pub struct Defect {
    payload: Rc<dyn Any>,
    message: String,
}

impl Defect {
    /// Wraps an explicit defect value.
    pub fn new(value: impl fmt::Debug + Any) -> Self {
        let message = format!("{value:?}");
        Self {
            payload: Rc::new(value),
            message,
        }
    }

    /// Wraps a defect that is only a message.
    #[must_use]
    pub fn from_message(message: String) -> Self {
        Self {
            payload: Rc::new(()),
            message,
        }
    }

    /// Converts a caught panic payload into a defect.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        let payload: Rc<dyn Any + Send> = Rc::from(payload);
        Self {
            payload: payload as Rc<dyn Any>,
            message,
        }
    }

    /// The rendered defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Attempts to view the original payload as `T`.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Defect({})", self.message)
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl PartialEq for Defect {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_predicates() {
        assert!(Failure::Expected("boom").is_expected());
        assert!(Failure::<&str>::Unexpected(Defect::new(1_i32)).is_unexpected());
        assert!(Failure::<&str>::Aborted.is_aborted());
    }

    #[test]
    fn map_touches_only_expected() {
        let mapped = Failure::Expected(2_i32).map(|n| n * 10);
        assert_eq!(mapped, Failure::Expected(20));

        let aborted: Failure<i32> = Failure::Aborted;
        assert_eq!(aborted.map(|n| n * 10), Failure::Aborted);
    }

    #[test]
    fn defect_from_panic_extracts_str_messages() {
        let defect = Defect::from_panic(Box::new("kaboom"));
        assert_eq!(defect.message(), "kaboom");

        let defect = Defect::from_panic(Box::new(String::from("owned")));
        assert_eq!(defect.message(), "owned");

        let defect = Defect::from_panic(Box::new(17_u8));
        assert_eq!(defect.message(), "non-string panic payload");
        assert_eq!(defect.downcast_ref::<u8>(), Some(&17));
    }

    #[test]
    fn erased_expected_error_can_be_downcast() {
        let failure = Failure::Expected("bad").erased();
        match failure {
            Failure::Expected(erased) => {
                assert_eq!(erased.downcast_ref::<&str>(), Some(&"bad"));
            }
            other => panic!("expected Expected, got {other:?}"),
        }
    }

    #[test]
    fn display_renders_each_variant() {
        assert_eq!(format!("{}", Failure::Expected("x")), "expected failure: \"x\"");
        assert_eq!(
            format!("{}", Failure::<&str>::Unexpected(Defect::from_message("d".into()))),
            "unexpected defect: d"
        );
        assert_eq!(format!("{}", Failure::<&str>::Aborted), "aborted");
    }
}
