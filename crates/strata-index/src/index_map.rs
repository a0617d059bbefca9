//! Positional index maps
//!
//! Provides [`IndexMap`], an integer-indexed array of optional target indices
//! that can be renumbered in place after a remote insert, delete or reorder.

use crate::permutation::Permutation;

/// Positional map from a slot to an optional target index
///
/// Each slot either tracks a target index (`Some`) or is untracked (`None`).
/// Renumbering operations touch only the entries they affect, so keeping two
/// index spaces aligned costs O(affected entries) per remote operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMap {
    slots: Vec<Option<usize>>,
}

/// Index map errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexMapError {
    /// Positional access beyond the map
    #[error("slot {index} out of range for index map of length {len}")]
    OutOfRange {
        /// Requested slot
        index: usize,
        /// Current map length
        len: usize,
    },

    /// Permutation does not cover the map
    #[error("permutation of length {permutation} cannot reorder map of length {len}")]
    LengthMismatch {
        /// Permutation length
        permutation: usize,
        /// Current map length
        len: usize,
    },
}

impl IndexMap {
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Create map with `len` untracked slots
    #[inline]
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    /// Create map tracking `values` in order
    #[must_use]
    pub fn from_values(values: impl IntoIterator<Item = usize>) -> Self {
        Self {
            slots: values.into_iter().map(Some).collect(),
        }
    }

    /// Number of slots
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if map has no slots
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Target tracked at `index`, `None` if untracked or out of range
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<usize> {
        self.slots.get(index).copied().flatten()
    }

    /// Overwrite the entry at `index`
    ///
    /// # Errors
    /// Returns [`IndexMapError::OutOfRange`] if `index` is not a slot
    pub fn set(&mut self, index: usize, value: Option<usize>) -> Result<(), IndexMapError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(IndexMapError::OutOfRange { index, len })?;
        *slot = value;
        Ok(())
    }

    /// Insert `count` untracked slots before `at`
    ///
    /// # Errors
    /// Returns [`IndexMapError::OutOfRange`] if `at > len`
    pub fn insert_untracked(&mut self, at: usize, count: usize) -> Result<(), IndexMapError> {
        self.insert_entries(at, std::iter::repeat(None).take(count))
    }

    /// Insert tracked slots carrying `values` before `at`
    ///
    /// # Errors
    /// Returns [`IndexMapError::OutOfRange`] if `at > len`
    pub fn insert_tracked(
        &mut self,
        at: usize,
        values: impl IntoIterator<Item = usize>,
    ) -> Result<(), IndexMapError> {
        self.insert_entries(at, values.into_iter().map(Some))
    }

    fn insert_entries(
        &mut self,
        at: usize,
        entries: impl Iterator<Item = Option<usize>>,
    ) -> Result<(), IndexMapError> {
        if at > self.slots.len() {
            return Err(IndexMapError::OutOfRange {
                index: at,
                len: self.slots.len(),
            });
        }
        self.slots.splice(at..at, entries);
        Ok(())
    }

    /// Remove the slot at `at`, returning its entry
    ///
    /// # Errors
    /// Returns [`IndexMapError::OutOfRange`] if `at` is not a slot
    pub fn remove(&mut self, at: usize) -> Result<Option<usize>, IndexMapError> {
        if at >= self.slots.len() {
            return Err(IndexMapError::OutOfRange {
                index: at,
                len: self.slots.len(),
            });
        }
        Ok(self.slots.remove(at))
    }

    /// Renumber after `by` targets were inserted at `threshold`
    ///
    /// Every tracked value `>= threshold` grows by `by`.
    pub fn shift_from(&mut self, threshold: usize, by: usize) {
        for value in self.slots.iter_mut().flatten() {
            if *value >= threshold {
                *value += by;
            }
        }
    }

    /// Renumber after the target `removed` was deleted
    ///
    /// Entries tracking `removed` become untracked; greater values shrink by one.
    pub fn close_gap(&mut self, removed: usize) {
        for slot in &mut self.slots {
            match *slot {
                Some(value) if value == removed => *slot = None,
                Some(value) if value > removed => *slot = Some(value - 1),
                _ => {}
            }
        }
    }

    /// Rewrite every tracked value through `f`
    pub fn remap(&mut self, mut f: impl FnMut(usize) -> usize) {
        for value in self.slots.iter_mut().flatten() {
            *value = f(*value);
        }
    }

    /// Reorder the slots themselves (not their values)
    ///
    /// # Errors
    /// Returns [`IndexMapError::LengthMismatch`] if the permutation length differs
    pub fn permute(&mut self, permutation: &Permutation) -> Result<(), IndexMapError> {
        if permutation.len() != self.slots.len() {
            return Err(IndexMapError::LengthMismatch {
                permutation: permutation.len(),
                len: self.slots.len(),
            });
        }
        let slots = std::mem::take(&mut self.slots);
        self.slots = permutation.apply(slots);
        Ok(())
    }

    /// Nearest tracked entry strictly before `index` whose slot passes `accept`,
    /// as `(slot, value)`
    #[must_use]
    pub fn nearest_tracked_before(
        &self,
        index: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Option<(usize, usize)> {
        let end = index.min(self.slots.len());
        self.slots[..end]
            .iter()
            .enumerate()
            .rev()
            .filter(|(slot, _)| accept(*slot))
            .find_map(|(slot, value)| value.map(|v| (slot, v)))
    }

    /// Nearest tracked entry strictly after `index` whose slot passes `accept`,
    /// as `(slot, value)`
    #[must_use]
    pub fn nearest_tracked_after(
        &self,
        index: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Option<(usize, usize)> {
        let start = index.saturating_add(1);
        self.slots
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(slot, _)| accept(*slot))
            .find_map(|(slot, value)| value.map(|v| (slot, v)))
    }

    /// First slot tracking `value`
    #[must_use]
    pub fn position_of(&self, value: usize) -> Option<usize> {
        self.slots.iter().position(|slot| *slot == Some(value))
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = Option<usize>> + '_ {
        self.slots.iter().copied()
    }

    /// Iterate over tracked entries as `(slot, value)`
    pub fn tracked(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| value.map(|v| (slot, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entries(map: &IndexMap) -> Vec<Option<usize>> {
        map.iter().collect()
    }

    #[test]
    fn insert_tracked_and_untracked() {
        let mut map = IndexMap::from_values([0, 1, 2]);
        map.insert_untracked(1, 2).unwrap();
        map.insert_tracked(5, [9]).unwrap();

        assert_eq!(
            entries(&map),
            vec![Some(0), None, None, Some(1), Some(2), Some(9)]
        );
    }

    #[test]
    fn insert_past_end_is_rejected() {
        let mut map = IndexMap::with_len(2);
        let result = map.insert_untracked(3, 1);
        assert_eq!(result, Err(IndexMapError::OutOfRange { index: 3, len: 2 }));
    }

    #[test]
    fn shift_from_only_touches_values_at_or_above_threshold() {
        let mut map = IndexMap::from_values([0, 3, 5]);
        map.set(0, None).unwrap();
        map.shift_from(3, 2);

        assert_eq!(entries(&map), vec![None, Some(5), Some(7)]);
    }

    #[test]
    fn close_gap_untracks_removed_target() {
        let mut map = IndexMap::from_values([0, 1, 2, 3]);
        map.close_gap(1);

        assert_eq!(entries(&map), vec![Some(0), None, Some(1), Some(2)]);
    }

    #[test]
    fn remove_returns_entry() {
        let mut map = IndexMap::from_values([4, 5]);
        assert_eq!(map.remove(0), Ok(Some(4)));
        assert_eq!(map.len(), 1);
        assert!(map.remove(1).is_err());
    }

    #[test]
    fn nearest_tracked_scans_skip_untracked() {
        let mut map = IndexMap::from_values([10, 11, 12, 13]);
        map.set(1, None).unwrap();
        map.set(2, None).unwrap();

        let any = |_: usize| true;
        assert_eq!(map.nearest_tracked_before(3, any), Some((0, 10)));
        assert_eq!(map.nearest_tracked_before(0, any), None);
        assert_eq!(map.nearest_tracked_after(0, any), Some((3, 13)));
        assert_eq!(map.nearest_tracked_after(3, any), None);
        assert_eq!(map.nearest_tracked_before(99, any), Some((3, 13)));
    }

    #[test]
    fn nearest_tracked_scans_honour_filter() {
        let map = IndexMap::from_values([10, 11, 12, 13]);

        assert_eq!(map.nearest_tracked_before(3, |slot| slot != 2), Some((1, 11)));
        assert_eq!(map.nearest_tracked_after(0, |slot| slot > 2), Some((3, 13)));
        assert_eq!(map.nearest_tracked_before(2, |_| false), None);
    }

    #[test]
    fn permute_moves_slots() {
        let mut map = IndexMap::from_values([0, 1, 2]);
        let perm = Permutation::from_order(vec![2, 0, 1]).unwrap();
        map.permute(&perm).unwrap();

        assert_eq!(entries(&map), vec![Some(2), Some(0), Some(1)]);
        assert!(map.permute(&Permutation::identity(2)).is_err());
    }

    #[test]
    fn position_of_finds_first_match() {
        let map = IndexMap::from_values([7, 8, 7]);
        assert_eq!(map.position_of(7), Some(0));
        assert_eq!(map.position_of(9), None);
    }
}
