//! Error types for cascade bookkeeping

use crate::controller::ParentId;
use crate::index_map::IndexMapError;
use crate::permutation::PermutationError;

/// Cascade controller error
///
/// Everything except [`CascadeError::UnknownParent`] signals a bookkeeping bug:
/// callers must abort the current operation rather than retry it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CascadeError {
    /// Internal bookkeeping inconsistency
    #[error("invariant violation: {context}")]
    InvariantViolation {
        /// What was inconsistent
        context: String,
    },

    /// Parent handle is not registered with this controller
    #[error("unknown parent: {0}")]
    UnknownParent(ParentId),

    /// Positional map accessed out of range
    #[error("index map error: {0}")]
    IndexMap(#[from] IndexMapError),

    /// Reorder could not be expressed as a permutation
    #[error("permutation error: {0}")]
    Permutation(#[from] PermutationError),
}

impl CascadeError {
    /// Create invariant violation
    #[inline]
    pub fn violation(context: impl Into<String>) -> Self {
        Self::InvariantViolation {
            context: context.into(),
        }
    }

    /// Check if error signals corrupted bookkeeping
    #[inline]
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(self, Self::UnknownParent(_))
    }
}
