//! Strata Index
//!
//! Index-correspondence bookkeeping for composited sequences.
//!
//! # Core Concepts
//!
//! - [`IndexMap`]: Positional map renumbered in place after remote edits
//! - [`Permutation`]: Validated size-preserving reorder with O(1) inverse
//! - [`CascadeController`]: Per-sequence owner/lazy-flag/correspondence tracking
//! - [`ParentId`]: Stable arena handle for a registered parent
//!
//! The controller never stores element values; it only answers where a
//! parent's element lives locally, whether that slot still follows the parent,
//! and whether its value is still pending lazy lookup.
//!
//! # Example
//!
//! ```rust
//! use strata_index::{CascadeController, ParentSet};
//!
//! let mut controller = CascadeController::new();
//! let (parent, range) = controller.register_parent(4, None).unwrap();
//! assert_eq!(range, 0..4);
//!
//! // Local override severs the slot from the parent
//! controller.local_set(0).unwrap();
//! assert_eq!(controller.parent_set(parent, 0).unwrap(), ParentSet::Overridden);
//!
//! // Parent append lands right after the last parent element
//! assert_eq!(controller.parent_insert(parent, 4, 1, None).unwrap(), 4);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod controller;
mod error;
mod index_map;
mod permutation;

// Re-exports
pub use controller::{CascadeController, LocalSet, ParentDelete, ParentId, ParentSet};
pub use error::CascadeError;
pub use index_map::{IndexMap, IndexMapError};
pub use permutation::{Permutation, PermutationError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
