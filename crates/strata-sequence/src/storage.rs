//! Local element storage
//!
//! Undecorated storage for a composited sequence: no hooks, no cascading.
//! A `None` slot holds an inherited value that has not been materialized yet.

use crate::error::SequenceError;
use strata_index::Permutation;

#[derive(Debug, Clone)]
pub(crate) struct LocalStorage<T> {
    slots: Vec<Option<T>>,
    /// Bumped whenever slots are added, removed or repositioned
    revision: u64,
}

impl<T> LocalStorage<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            revision: 0,
        }
    }

    pub(crate) fn from_values(values: Vec<T>) -> Self {
        Self {
            slots: values.into_iter().map(Some).collect(),
            revision: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Layout revision; unchanged revisions mean every slot kept its position
    #[inline]
    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn set(&mut self, index: usize, value: T) -> Result<(), SequenceError> {
        *self.slot_mut(index)? = Some(value);
        Ok(())
    }

    /// Drop a stale materialized value so the next read resolves again
    pub(crate) fn invalidate(&mut self, index: usize) -> Result<(), SequenceError> {
        *self.slot_mut(index)? = None;
        Ok(())
    }

    pub(crate) fn insert(&mut self, index: usize, value: T) -> Result<(), SequenceError> {
        self.check_insert(index)?;
        self.slots.insert(index, Some(value));
        self.revision += 1;
        Ok(())
    }

    pub(crate) fn insert_pending(&mut self, index: usize, count: usize) -> Result<(), SequenceError> {
        self.check_insert(index)?;
        self.slots
            .splice(index..index, std::iter::repeat_with(|| None).take(count));
        self.revision += 1;
        Ok(())
    }

    /// Remove a slot, returning its value if it had been materialized
    pub(crate) fn remove(&mut self, index: usize) -> Result<Option<T>, SequenceError> {
        if index >= self.slots.len() {
            return Err(SequenceError::violation(format!(
                "storage remove at {index} beyond {} slots",
                self.slots.len()
            )));
        }
        self.revision += 1;
        Ok(self.slots.remove(index))
    }

    pub(crate) fn permute(&mut self, permutation: &Permutation) -> Result<(), SequenceError> {
        if permutation.len() != self.slots.len() {
            return Err(SequenceError::violation(format!(
                "storage reorder of {} positions over {} slots",
                permutation.len(),
                self.slots.len()
            )));
        }
        let slots = std::mem::take(&mut self.slots);
        self.slots = permutation.apply(slots);
        self.revision += 1;
        Ok(())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Option<&T>> + '_ {
        self.slots.iter().map(Option::as_ref)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Option<T>, SequenceError> {
        let len = self.slots.len();
        self.slots.get_mut(index).ok_or_else(|| {
            SequenceError::violation(format!("storage slot {index} beyond {len} slots"))
        })
    }

    fn check_insert(&self, index: usize) -> Result<(), SequenceError> {
        if index > self.slots.len() {
            return Err(SequenceError::violation(format!(
                "storage insert at {index} beyond {} slots",
                self.slots.len()
            )));
        }
        Ok(())
    }
}
