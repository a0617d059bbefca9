//! Strata Sequence
//!
//! Ordered sequences that inherit elements from parent sequences.
//!
//! # Core Concepts
//!
//! - [`CompositedSequence`]: Sequence composited from parents and local edits
//! - [`SequenceHooks`]: Injectable callbacks around local and inherited changes
//! - [`SequenceConfig`]: Cascade depth limit and diagnostic label
//! - [`SequenceError`]: Caller misuse and bookkeeping failures
//!
//! A child shows every element of each parent, in registration order, until
//! it overrides, deletes or interleaves elements locally. Parent mutations
//! cascade synchronously to all descendants that still follow the affected
//! element. Inherited values are copied into a child only when first read.
//!
//! # Example
//!
//! ```rust
//! use strata_sequence::CompositedSequence;
//!
//! let parent = CompositedSequence::from_vec(vec!["a", "b", "c", "d"]);
//! let child = CompositedSequence::derive(&parent).unwrap();
//!
//! parent.push("e").unwrap();
//! child.set(0, "z").unwrap();
//! parent.set(0, "w").unwrap();
//!
//! assert_eq!(parent.to_vec().unwrap(), vec!["w", "b", "c", "d", "e"]);
//! assert_eq!(child.to_vec().unwrap(), vec!["z", "b", "c", "d", "e"]);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod config;
mod error;
mod hooks;
mod propagation;
mod sequence;
mod storage;

// Re-exports
pub use config::SequenceConfig;
pub use error::SequenceError;
pub use hooks::{Inherit, NoHooks, SequenceHooks};
pub use sequence::{CompositedSequence, SequenceId};
pub use strata_index::{Permutation, PermutationError};

/// Commonly used items
pub mod prelude {
    pub use crate::{
        CompositedSequence, Inherit, NoHooks, SequenceConfig, SequenceError, SequenceHooks,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
