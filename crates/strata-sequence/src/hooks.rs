//! Hook protocol
//!
//! [`SequenceHooks`] is the injectable callback surface of a composited
//! sequence. Every method has a no-op default, so implementors override only
//! the hooks they need. Hooks take `&self`; keep mutable hook state behind
//! `Cell`/`RefCell`.
//!
//! Hooks run with no internal borrow held, so a hook may call back into the
//! same sequence or a related one.

use crate::sequence::CompositedSequence;

/// Decision returned by [`SequenceHooks::child_pre_set`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inherit<T> {
    /// Inherit this (possibly transformed) value
    Keep(T),
    /// Do not inherit; the slot is dropped from the child
    Skip,
}

/// Callbacks fired around local and inherited mutations
///
/// Local hooks fire for writes made directly on the sequence and for lazy
/// materialization of inherited values. `child_*` hooks fire only for
/// elements arriving from (or leaving through) a parent.
#[allow(unused_variables)]
pub trait SequenceHooks<T> {
    /// Before a value is stored; may transform it
    fn pre_set(&self, index: usize, value: T, is_insert: bool) -> T {
        value
    }

    /// After a value was stored
    fn post_set(&self, index: usize, value: &T, is_insert: bool) {}

    /// Before a read; `false` makes the read return nothing
    fn pre_get(&self, index: usize) -> bool {
        true
    }

    /// After a read; may transform the returned value
    fn post_get(&self, index: usize, value: T) -> T {
        value
    }

    /// Before a local delete; `false` vetoes it
    fn pre_delete(&self, index: usize) -> bool {
        true
    }

    /// After a local delete
    fn post_delete(&self, index: usize, value: &T) {}

    /// Before an inherited value is materialized
    fn child_pre_set(&self, parent: &CompositedSequence<T>, index: usize, value: T) -> Inherit<T> {
        Inherit::Keep(value)
    }

    /// After an inherited value was materialized
    fn child_post_set(&self, parent: &CompositedSequence<T>, index: usize, value: &T) {}

    /// Before a parent delete removes an inherited slot; `false` keeps the
    /// slot as a local value instead
    fn child_pre_delete(&self, parent: &CompositedSequence<T>, index: usize) -> bool {
        true
    }

    /// After a parent delete removed an inherited slot
    fn child_post_delete(&self, parent: &CompositedSequence<T>, index: usize, value: &T) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<T> SequenceHooks<T> for NoHooks {}
