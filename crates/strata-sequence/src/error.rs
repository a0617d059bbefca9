//! Error types for composited sequences
//!
//! Provides error handling for:
//! - Caller misuse (out-of-range indices, unknown or cyclic parents)
//! - Bookkeeping invariant violations surfaced from the cascade controller
//! - Runaway cascades

use crate::sequence::SequenceId;
use strata_index::{CascadeError, PermutationError};

/// Main sequence error type
///
/// Hook vetoes are not errors: a vetoed delete returns `Ok(None)` and a
/// skipped inheritance simply drops the slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    /// Index beyond the sequence
    #[error("index {index} out of bounds for sequence of length {len}")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Current length
        len: usize,
    },

    /// Parent is not registered with this sequence
    #[error("sequence {0} is not a registered parent")]
    UnknownParent(SequenceId),

    /// Parent is already registered with this sequence
    #[error("sequence {0} is already a registered parent")]
    AlreadyRegistered(SequenceId),

    /// Registration would make a sequence its own ancestor
    #[error("registering {parent} under {child} would create a cycle")]
    CyclicRegistration {
        /// Proposed parent
        parent: SequenceId,
        /// Proposed child
        child: SequenceId,
    },

    /// Reorder is not a permutation of the sequence
    #[error("invalid permutation: {0}")]
    InvalidPermutation(#[from] PermutationError),

    /// Reorder does not cover the whole sequence
    #[error("permutation of {actual} positions for sequence of length {expected}")]
    PermutationLength {
        /// Sequence length
        expected: usize,
        /// Permutation length
        actual: usize,
    },

    /// Cascade went deeper than the configured limit
    #[error("cascade exceeded maximum depth of {depth}")]
    CascadeDepthExceeded {
        /// Configured limit
        depth: usize,
    },

    /// Cascade bookkeeping failed
    #[error("cascade error: {0}")]
    Cascade(#[from] CascadeError),
}

impl SequenceError {
    /// Check if error signals corrupted bookkeeping rather than caller misuse
    ///
    /// Fatal errors abort the operation that raised them; descendants touched
    /// earlier in the same cascade are not rolled back.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Cascade(inner) if inner.is_invariant_violation())
    }

    /// Create invariant violation
    #[inline]
    pub(crate) fn violation(context: impl Into<String>) -> Self {
        Self::Cascade(CascadeError::violation(context))
    }
}
