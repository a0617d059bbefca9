//! Validated positional reorders
//!
//! A [`Permutation`] describes a size-preserving reorder as `order[new] = old`
//! and keeps the inverse so both directions are O(1).

/// Size-preserving reorder of `len` positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    /// `order[new] = old`
    order: Vec<usize>,
    /// `inverse[old] = new`
    inverse: Vec<usize>,
}

/// Permutation construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermutationError {
    /// Entry outside `0..len`
    #[error("position {position} out of range for permutation of length {len}")]
    OutOfRange {
        /// Offending position
        position: usize,
        /// Permutation length
        len: usize,
    },

    /// Same old position listed twice
    #[error("position {0} appears more than once")]
    Duplicate(usize),
}

impl Permutation {
    /// Permutation that leaves every position in place
    #[must_use]
    pub fn identity(len: usize) -> Self {
        let order: Vec<usize> = (0..len).collect();
        Self {
            inverse: order.clone(),
            order,
        }
    }

    /// Build from `order[new] = old`
    ///
    /// # Errors
    /// Returns [`PermutationError`] if `order` is not a permutation of `0..len`
    pub fn from_order(order: Vec<usize>) -> Result<Self, PermutationError> {
        let len = order.len();
        let mut inverse = vec![usize::MAX; len];
        for (new, &old) in order.iter().enumerate() {
            if old >= len {
                return Err(PermutationError::OutOfRange { position: old, len });
            }
            if inverse[old] != usize::MAX {
                return Err(PermutationError::Duplicate(old));
            }
            inverse[old] = new;
        }
        Ok(Self { order, inverse })
    }

    /// Remove the element at `from` and reinsert it at `to`
    ///
    /// # Errors
    /// Returns [`PermutationError::OutOfRange`] if either position is not below `len`
    pub fn moved(len: usize, from: usize, to: usize) -> Result<Self, PermutationError> {
        for position in [from, to] {
            if position >= len {
                return Err(PermutationError::OutOfRange { position, len });
            }
        }
        let mut order: Vec<usize> = (0..len).collect();
        let item = order.remove(from);
        order.insert(to, item);
        Self::from_order(order)
    }

    /// Exchange the elements at `a` and `b`
    ///
    /// # Errors
    /// Returns [`PermutationError::OutOfRange`] if either position is not below `len`
    pub fn swapped(len: usize, a: usize, b: usize) -> Result<Self, PermutationError> {
        for position in [a, b] {
            if position >= len {
                return Err(PermutationError::OutOfRange { position, len });
            }
        }
        let mut order: Vec<usize> = (0..len).collect();
        order.swap(a, b);
        Self::from_order(order)
    }

    /// Number of positions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if permutation covers no positions
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Old position now found at `new`
    #[inline]
    #[must_use]
    pub fn old_index(&self, new: usize) -> usize {
        self.order[new]
    }

    /// New position of the element formerly at `old`
    #[inline]
    #[must_use]
    pub fn new_index(&self, old: usize) -> usize {
        self.inverse[old]
    }

    /// Check if nothing moves
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.order.iter().enumerate().all(|(new, &old)| new == old)
    }

    /// `order[new] = old` view
    #[inline]
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Reorder `items` (which must have `len` entries)
    #[must_use]
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        debug_assert_eq!(items.len(), self.order.len());
        let mut taken: Vec<Option<T>> = items.into_iter().map(Some).collect();
        self.order
            .iter()
            .filter_map(|&old| taken[old].take())
            .collect()
    }
}
