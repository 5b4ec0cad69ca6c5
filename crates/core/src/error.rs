//! Core error types.
//!
//! The store and unification engine distinguish two failure shapes:
//! a [`StoreError`] when an allocation cannot be satisfied, and a
//! [`ValueError`] when an operation is applied to a value of the wrong
//! shape (missing feature, non-literal key, duplicate arity feature).
//! Neither type ever unwinds across a thread boundary on its own; the
//! runtime crate decides whether an occurrence becomes a thread-fatal
//! termination or a raised exception value.

use std::fmt;

/// Failure to allocate a heap slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A static store's fixed capacity has been exhausted.
    Exhausted { capacity: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Exhausted { capacity } => {
                write!(f, "store exhausted: capacity {capacity} reached")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Failure of a value-level operation (arity/record/literal shape checks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// `Arity::map`/`Arity::subtract` referenced a feature the arity does not have.
    FeatureNotFound,
    /// `Arity::extend` referenced a feature the arity already has.
    DuplicateFeature,
    /// An operation required a literal (Int/Atom/Name) and got something else.
    NotALiteral,
    /// An operation required a record-capable value and got something else.
    NotARecord,
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::FeatureNotFound => write!(f, "feature not found"),
            ValueError::DuplicateFeature => write!(f, "feature already present"),
            ValueError::NotALiteral => write!(f, "value is not a literal"),
            ValueError::NotARecord => write!(f, "value is not record-capable"),
        }
    }
}

impl std::error::Error for ValueError {}
