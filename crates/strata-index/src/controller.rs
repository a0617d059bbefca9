//! Cascade controller
//!
//! Owns the index-correspondence bookkeeping of one composited sequence: which
//! parent each local slot came from, whether its value is still pending lazy
//! lookup, and the bidirectional parent index <-> local index maps per parent.
//! The controller never sees element values.

use crate::error::CascadeError;
use crate::index_map::IndexMap;
use crate::permutation::Permutation;
use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;

/// Stable handle to a parent registered with one controller
///
/// Handles index an arena owned by the controller; a handle is only meaningful
/// to the controller that issued it and is invalidated by `unregister_parent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParentId(usize);

impl ParentId {
    /// Raw arena slot
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parent#{}", self.0)
    }
}

/// Per-parent correspondence maps
#[derive(Debug, Clone, Default)]
struct ParentMaps {
    /// Parent index -> local index; untracked once the child deleted that slot
    parent_to_local: IndexMap,
    /// Local index -> parent index; kept positionally after an override
    local_to_parent: IndexMap,
}

/// Outcome of replaying a parent `set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentSet {
    /// Parent index was beyond the tracked extent; a lazy slot was inserted here
    Inserted(usize),
    /// Local slot is still controlled and now requires lookup
    Invalidated(usize),
    /// Local slot was overridden; nothing changed
    Overridden,
}

/// Outcome of replaying a parent `delete_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentDelete {
    /// Controlled local slot was removed
    Removed(usize),
    /// Slot had been overridden or deleted locally; only the maps were renumbered
    Detached(Option<usize>),
}

/// Outcome of a local `set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSet {
    /// Index was one past the end; a local slot was appended
    Inserted(usize),
    /// Existing slot was overwritten and severed from its previous owner
    Overwritten {
        /// Slot index
        index: usize,
        /// Parent that provided the slot before the write
        previous_owner: Option<ParentId>,
    },
}

/// Index-correspondence bookkeeping for one composited sequence
#[derive(Debug, Clone, Default)]
pub struct CascadeController {
    requires_lookup: Vec<bool>,
    owner: Vec<Option<ParentId>>,
    parents: Vec<Option<ParentMaps>>,
    free: SmallVec<[usize; 4]>,
}

impl CascadeController {
    /// Create controller for an empty sequence
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create controller for `len` purely local slots
    #[must_use]
    pub fn with_local_len(len: usize) -> Self {
        Self {
            requires_lookup: vec![false; len],
            owner: vec![None; len],
            ..Self::default()
        }
    }

    /// Number of local slots
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.owner.len()
    }

    /// Check if there are no local slots
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    /// Registered parent handles, in arena order
    pub fn parents(&self) -> impl Iterator<Item = ParentId> + '_ {
        self.parents
            .iter()
            .enumerate()
            .filter(|(_, maps)| maps.is_some())
            .map(|(slot, _)| ParentId(slot))
    }

    /// Check if `parent` is registered
    #[inline]
    #[must_use]
    pub fn is_registered(&self, parent: ParentId) -> bool {
        matches!(self.parents.get(parent.0), Some(Some(_)))
    }

    /// Parent currently providing `local`, if any
    #[inline]
    #[must_use]
    pub fn owner(&self, local: usize) -> Option<ParentId> {
        self.owner.get(local).copied().flatten()
    }

    /// Number of parent elements tracked for `parent`
    ///
    /// # Errors
    /// Returns [`CascadeError::UnknownParent`] if `parent` is not registered
    pub fn parent_len(&self, parent: ParentId) -> Result<usize, CascadeError> {
        Ok(self.maps(parent)?.parent_to_local.len())
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Graft a parent's full current extent at `at` (default: the end)
    ///
    /// Every new slot is owned by the parent and requires lookup.
    ///
    /// # Errors
    /// Returns an invariant violation if `at` is past the end
    pub fn register_parent(
        &mut self,
        parent_len: usize,
        at: Option<usize>,
    ) -> Result<(ParentId, Range<usize>), CascadeError> {
        let at = at.unwrap_or(self.len());
        if at > self.len() {
            return Err(CascadeError::violation(format!(
                "cannot graft parent at {at}, only {} local slots",
                self.len()
            )));
        }

        let maps = ParentMaps {
            parent_to_local: IndexMap::new(),
            local_to_parent: IndexMap::with_len(self.len()),
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.parents[slot] = Some(maps);
                ParentId(slot)
            }
            None => {
                self.parents.push(Some(maps));
                ParentId(self.parents.len() - 1)
            }
        };

        let start = self.parent_insert(id, 0, parent_len, Some(at))?;
        tracing::debug!(%id, at = start, parent_len, "registered parent");
        Ok((id, start..start + parent_len))
    }

    /// Forget `parent`, returning the local slots it still owned
    ///
    /// Returned indices are in descending order so the caller can remove them
    /// one by one without renumbering. Those slots are released (no owner, no
    /// pending lookup) before the parent's maps are purged.
    ///
    /// # Errors
    /// Returns [`CascadeError::UnknownParent`] if `parent` is not registered
    pub fn unregister_parent(&mut self, parent: ParentId) -> Result<Vec<usize>, CascadeError> {
        self.maps(parent)?;

        let owned: Vec<usize> = self.owned_by(parent).into_iter().rev().collect();
        for &local in &owned {
            self.owner[local] = None;
            self.requires_lookup[local] = false;
        }

        self.parents[parent.0] = None;
        self.free.push(parent.0);
        tracing::debug!(id = %parent, released = owned.len(), "unregistered parent");
        Ok(owned)
    }

    /// Local slots currently owned by `parent`, ascending
    #[must_use]
    pub fn owned_by(&self, parent: ParentId) -> Vec<usize> {
        self.owner
            .iter()
            .enumerate()
            .filter(|(_, owner)| **owner == Some(parent))
            .map(|(local, _)| local)
            .collect()
    }

    // ------------------------------------------------------------------
    // Lazy lookup flags
    // ------------------------------------------------------------------

    /// Check if `local` still waits for its value from the owning parent
    #[inline]
    #[must_use]
    pub fn requires_lookup(&self, local: usize) -> bool {
        self.requires_lookup.get(local).copied().unwrap_or(false)
    }

    /// Mark `local` as materialized
    ///
    /// # Errors
    /// Returns an invariant violation if `local` is not a slot
    pub fn looked_up(&mut self, local: usize) -> Result<(), CascadeError> {
        let len = self.len();
        let flag = self.requires_lookup.get_mut(local).ok_or_else(|| {
            CascadeError::violation(format!("looked_up({local}) with {len} local slots"))
        })?;
        *flag = false;
        Ok(())
    }

    /// Local indices still requiring lookup, optionally only those owned by `parent`
    ///
    /// The iterator borrows the controller; callers that materialize while
    /// walking should restart from [`Self::next_index_requiring_lookup`].
    pub fn each_index_requiring_lookup(
        &self,
        parent: Option<ParentId>,
    ) -> impl Iterator<Item = usize> + '_ {
        self.requires_lookup
            .iter()
            .enumerate()
            .filter(move |(local, pending)| {
                **pending && parent.map_or(true, |p| self.owner[*local] == Some(p))
            })
            .map(|(local, _)| local)
    }

    /// First index at or after `from` requiring lookup
    #[must_use]
    pub fn next_index_requiring_lookup(
        &self,
        from: usize,
        parent: Option<ParentId>,
    ) -> Option<usize> {
        self.each_index_requiring_lookup(parent)
            .find(|&local| local >= from)
    }

    // ------------------------------------------------------------------
    // Correspondence queries
    // ------------------------------------------------------------------

    /// Local index corresponding to `parent_index`
    ///
    /// Untracked parent indices (one past the end, or deleted locally) resolve
    /// to the position a new element arriving there would take; see
    /// [`Self::parent_insert`].
    ///
    /// # Errors
    /// Returns [`CascadeError::UnknownParent`] if `parent` is not registered
    pub fn local_index(&self, parent: ParentId, parent_index: usize) -> Result<usize, CascadeError> {
        match self.maps(parent)?.parent_to_local.get(parent_index) {
            Some(local) => Ok(local),
            None => self.insertion_point(parent, parent_index),
        }
    }

    /// Local position for an element `parent` adds at `parent_index`
    ///
    /// The element lands just after the nearest parent element before it,
    /// even across locally interleaved slots, and never leaves the window
    /// between the parent-owned slots around it. Retained entries of
    /// overridden slots only pick a position inside that window.
    fn insertion_point(&self, parent: ParentId, parent_index: usize) -> Result<usize, CascadeError> {
        let map = &self.maps(parent)?.parent_to_local;
        if self.parent_controls_parent_index(parent, parent_index) {
            if let Some(local) = map.get(parent_index) {
                return Ok(local);
            }
        }

        let owned = |slot: usize| self.parent_controls_parent_index(parent, slot);
        let any = |_: usize| true;
        let low = map
            .nearest_tracked_before(parent_index, owned)
            .map_or(0, |(_, local)| local + 1);
        let high = map
            .nearest_tracked_after(parent_index, owned)
            .map_or(self.len(), |(_, local)| local);
        let preferred = map
            .get(parent_index)
            .or_else(|| {
                map.nearest_tracked_before(parent_index, any)
                    .map(|(_, local)| local + 1)
            })
            .or_else(|| {
                map.nearest_tracked_after(parent_index, any)
                    .map(|(_, local)| local)
            })
            .unwrap_or(self.len());
        Ok(preferred.max(low).min(high))
    }

    /// Parent index providing `local`, only while `parent` still owns it
    #[must_use]
    pub fn parent_index(&self, local: usize, parent: ParentId) -> Option<usize> {
        if self.owner(local) != Some(parent) {
            return None;
        }
        self.maps(parent).ok()?.local_to_parent.get(local)
    }

    /// Check if `parent_index` still flows into a local slot unmodified
    #[must_use]
    pub fn parent_controls_parent_index(&self, parent: ParentId, parent_index: usize) -> bool {
        let Ok(maps) = self.maps(parent) else {
            return false;
        };
        let Some(local) = maps.parent_to_local.get(parent_index) else {
            return false;
        };
        self.owner(local) == Some(parent) && maps.local_to_parent.get(local) == Some(parent_index)
    }

    // ------------------------------------------------------------------
    // Parent-side mutations
    // ------------------------------------------------------------------

    /// Replay `count` elements inserted into `parent` at `parent_index`
    ///
    /// `insert_at` pins the local position (used when first registering);
    /// otherwise the element lands after the nearest parent-owned slot before
    /// it, staying ahead of the parent-owned slots after it. Returns the
    /// chosen local index.
    ///
    /// # Errors
    /// Returns an invariant violation if `parent_index` is beyond the parent's
    /// tracked extent
    pub fn parent_insert(
        &mut self,
        parent: ParentId,
        parent_index: usize,
        count: usize,
        insert_at: Option<usize>,
    ) -> Result<usize, CascadeError> {
        let extent = self.maps(parent)?.parent_to_local.len();
        if parent_index > extent {
            return Err(CascadeError::violation(format!(
                "{parent} inserted at {parent_index} beyond tracked extent {extent}"
            )));
        }
        let local = match insert_at {
            Some(local) => local,
            None => self.insertion_point(parent, parent_index)?,
        };
        if local > self.len() {
            return Err(CascadeError::violation(format!(
                "local insert point {local} beyond {} slots",
                self.len()
            )));
        }
        if count == 0 {
            return Ok(local);
        }

        self.maps_mut(parent)?
            .local_to_parent
            .shift_from(parent_index, count);
        for (id, maps) in self.maps_iter_mut() {
            maps.parent_to_local.shift_from(local, count);
            if id == parent {
                maps.local_to_parent
                    .insert_tracked(local, parent_index..parent_index + count)?;
            } else {
                maps.local_to_parent.insert_untracked(local, count)?;
            }
        }
        self.maps_mut(parent)?
            .parent_to_local
            .insert_tracked(parent_index, local..local + count)?;

        self.requires_lookup
            .splice(local..local, std::iter::repeat(true).take(count));
        self.owner
            .splice(local..local, std::iter::repeat(Some(parent)).take(count));

        tracing::trace!(%parent, parent_index, count, local, "parent insert");
        Ok(local)
    }

    /// Replay the deletion of `parent_index` from `parent`
    ///
    /// # Errors
    /// Returns an invariant violation if `parent_index` is beyond the parent's
    /// tracked extent
    pub fn parent_delete_at(
        &mut self,
        parent: ParentId,
        parent_index: usize,
    ) -> Result<ParentDelete, CascadeError> {
        let extent = self.maps(parent)?.parent_to_local.len();
        if parent_index >= extent {
            return Err(CascadeError::violation(format!(
                "{parent} deleted {parent_index} beyond tracked extent {extent}"
            )));
        }
        let controlled = self.parent_controls_parent_index(parent, parent_index);

        let maps = self.maps_mut(parent)?;
        let local = maps.parent_to_local.remove(parent_index)?;
        maps.local_to_parent.close_gap(parent_index);

        match local {
            Some(local) if controlled => {
                self.remove_local_slot(local)?;
                tracing::trace!(%parent, parent_index, local, "parent delete removed slot");
                Ok(ParentDelete::Removed(local))
            }
            _ => {
                tracing::trace!(%parent, parent_index, ?local, "parent delete detached");
                Ok(ParentDelete::Detached(local))
            }
        }
    }

    /// Replay a `set` of `parent_index` in `parent`
    ///
    /// # Errors
    /// Propagates [`Self::parent_insert`] errors when the index extends the parent
    pub fn parent_set(
        &mut self,
        parent: ParentId,
        parent_index: usize,
    ) -> Result<ParentSet, CascadeError> {
        let extent = self.maps(parent)?.parent_to_local.len();
        if parent_index >= extent {
            let local = self.parent_insert(parent, parent_index, 1, None)?;
            return Ok(ParentSet::Inserted(local));
        }
        if !self.parent_controls_parent_index(parent, parent_index) {
            return Ok(ParentSet::Overridden);
        }
        let local = self.local_index(parent, parent_index)?;
        self.requires_lookup[local] = true;
        tracing::trace!(%parent, parent_index, local, "parent set invalidated slot");
        Ok(ParentSet::Invalidated(local))
    }

    /// Replay a reorder of `parent`, returning the matching local permutation
    ///
    /// Controlled slots are rearranged by their new parent index. Every
    /// non-controlled slot keeps its position relative to the nearest preceding
    /// controlled slot; slots before the first controlled slot never move.
    ///
    /// # Errors
    /// Returns an invariant violation if the permutation does not cover the
    /// parent's tracked extent
    pub fn parent_reorder(
        &mut self,
        parent: ParentId,
        permutation: &Permutation,
    ) -> Result<Permutation, CascadeError> {
        let extent = self.maps(parent)?.parent_to_local.len();
        if permutation.len() != extent {
            return Err(CascadeError::violation(format!(
                "{parent} reordered {} positions, tracked extent is {extent}",
                permutation.len()
            )));
        }

        let local = self.local_permutation_for(parent, permutation)?;
        self.local_reorder(&local)?;

        let maps = self.maps_mut(parent)?;
        maps.local_to_parent
            .remap(|parent_index| permutation.new_index(parent_index));
        maps.parent_to_local.permute(permutation)?;
        Ok(local)
    }

    /// Replay a parent `move(from, to)`
    ///
    /// # Errors
    /// See [`Self::parent_reorder`]
    pub fn parent_move(
        &mut self,
        parent: ParentId,
        from: usize,
        to: usize,
    ) -> Result<Permutation, CascadeError> {
        let extent = self.parent_len(parent)?;
        let permutation = Permutation::moved(extent, from, to)?;
        self.parent_reorder(parent, &permutation)
    }

    /// Replay a parent `swap(a, b)`
    ///
    /// # Errors
    /// See [`Self::parent_reorder`]
    pub fn parent_swap(
        &mut self,
        parent: ParentId,
        a: usize,
        b: usize,
    ) -> Result<Permutation, CascadeError> {
        let extent = self.parent_len(parent)?;
        let permutation = Permutation::swapped(extent, a, b)?;
        self.parent_reorder(parent, &permutation)
    }

    fn local_permutation_for(
        &self,
        parent: ParentId,
        permutation: &Permutation,
    ) -> Result<Permutation, CascadeError> {
        let len = self.len();
        let controlled = self.owned_by(parent);
        let (Some(&first), Some(&last)) = (controlled.first(), controlled.last()) else {
            return Ok(Permutation::identity(len));
        };
        let maps = self.maps(parent)?;

        let mut groups = Vec::with_capacity(controlled.len());
        for (position, &head) in controlled.iter().enumerate() {
            let end = match controlled.get(position + 1) {
                Some(&next) => next,
                None => {
                    let mut end = head + 1;
                    while end < len && self.is_free_standing(end, parent) {
                        end += 1;
                    }
                    end
                }
            };
            let parent_index = maps.local_to_parent.get(head).ok_or_else(|| {
                CascadeError::violation(format!("{parent} owns {head} without a parent index"))
            })?;
            groups.push((permutation.new_index(parent_index), head..end));
        }
        groups.sort_by_key(|(key, _)| *key);

        let tail = groups
            .iter()
            .map(|(_, range)| range.end)
            .max()
            .unwrap_or(last + 1);
        let order: Vec<usize> = (0..first)
            .chain(groups.into_iter().flat_map(|(_, range)| range))
            .chain(tail..len)
            .collect();
        Ok(Permutation::from_order(order)?)
    }

    /// A free-standing slot not tied to any other parent
    fn is_free_standing(&self, local: usize, parent: ParentId) -> bool {
        self.owner[local].is_none()
            && self
                .maps_iter()
                .filter(|(id, _)| *id != parent)
                .all(|(_, maps)| maps.local_to_parent.get(local).is_none())
    }

    // ------------------------------------------------------------------
    // Local mutations
    // ------------------------------------------------------------------

    /// Record `count` purely local slots inserted at `at`
    ///
    /// # Errors
    /// Returns an invariant violation if `at` is past the end
    pub fn local_insert(&mut self, at: usize, count: usize) -> Result<(), CascadeError> {
        if at > self.len() {
            return Err(CascadeError::violation(format!(
                "local insert at {at} beyond {} slots",
                self.len()
            )));
        }
        for (_, maps) in self.maps_iter_mut() {
            maps.parent_to_local.shift_from(at, count);
            maps.local_to_parent.insert_untracked(at, count)?;
        }
        self.requires_lookup
            .splice(at..at, std::iter::repeat(false).take(count));
        self.owner.splice(at..at, std::iter::repeat(None).take(count));
        Ok(())
    }

    /// Record the local deletion of `local`, returning its former owner
    ///
    /// The parent element that provided the slot (if any) becomes untracked so
    /// later parent inserts realign around the gap.
    ///
    /// # Errors
    /// Returns an invariant violation if `local` is not a slot
    pub fn local_delete_at(&mut self, local: usize) -> Result<Option<ParentId>, CascadeError> {
        if local >= self.len() {
            return Err(CascadeError::violation(format!(
                "local delete at {local} beyond {} slots",
                self.len()
            )));
        }
        let owner = self.owner[local];
        self.remove_local_slot(local)?;
        Ok(owner)
    }

    /// Record a local write to `local`
    ///
    /// Writing one past the end is an append. Writing an existing slot severs
    /// ownership and clears the lazy flag; the positional parent index is kept.
    ///
    /// # Errors
    /// Returns an invariant violation if `local` is more than one past the end
    pub fn local_set(&mut self, local: usize) -> Result<LocalSet, CascadeError> {
        match local.cmp(&self.len()) {
            std::cmp::Ordering::Equal => {
                self.local_insert(local, 1)?;
                Ok(LocalSet::Inserted(local))
            }
            std::cmp::Ordering::Greater => Err(CascadeError::violation(format!(
                "local set at {local} beyond {} slots",
                self.len()
            ))),
            std::cmp::Ordering::Less => {
                let previous_owner = self.owner[local].take();
                self.requires_lookup[local] = false;
                Ok(LocalSet::Overwritten {
                    index: local,
                    previous_owner,
                })
            }
        }
    }

    /// Reposition every local slot by `permutation`
    ///
    /// # Errors
    /// Returns an invariant violation if the permutation length differs
    pub fn local_reorder(&mut self, permutation: &Permutation) -> Result<(), CascadeError> {
        if permutation.len() != self.len() {
            return Err(CascadeError::violation(format!(
                "reorder of {} positions over {} slots",
                permutation.len(),
                self.len()
            )));
        }
        if permutation.is_identity() {
            return Ok(());
        }
        self.requires_lookup = permutation.apply(std::mem::take(&mut self.requires_lookup));
        self.owner = permutation.apply(std::mem::take(&mut self.owner));
        for (_, maps) in self.maps_iter_mut() {
            maps.local_to_parent.permute(permutation)?;
            maps.parent_to_local.remap(|local| permutation.new_index(local));
        }
        Ok(())
    }

    /// Record a local `move(from, to)`
    ///
    /// # Errors
    /// Returns an error if either index is not a slot
    pub fn local_move(&mut self, from: usize, to: usize) -> Result<Permutation, CascadeError> {
        let permutation = Permutation::moved(self.len(), from, to)?;
        self.local_reorder(&permutation)?;
        Ok(permutation)
    }

    /// Record a local `swap(a, b)`
    ///
    /// # Errors
    /// Returns an error if either index is not a slot
    pub fn local_swap(&mut self, a: usize, b: usize) -> Result<Permutation, CascadeError> {
        let permutation = Permutation::swapped(self.len(), a, b)?;
        self.local_reorder(&permutation)?;
        Ok(permutation)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Verify the bookkeeping invariants
    ///
    /// # Errors
    /// Returns the first violated invariant
    pub fn check_invariants(&self) -> Result<(), CascadeError> {
        let len = self.len();
        if self.requires_lookup.len() != len {
            return Err(CascadeError::violation(format!(
                "{} lookup flags for {len} slots",
                self.requires_lookup.len()
            )));
        }
        for (id, maps) in self.maps_iter() {
            if maps.local_to_parent.len() != len {
                return Err(CascadeError::violation(format!(
                    "{id} local map has {} entries for {len} slots",
                    maps.local_to_parent.len()
                )));
            }
            if let Some((parent_index, local)) =
                maps.parent_to_local.tracked().find(|(_, local)| *local >= len)
            {
                return Err(CascadeError::violation(format!(
                    "{id} maps {parent_index} to {local} beyond {len} slots"
                )));
            }
        }
        for local in 0..len {
            match self.owner[local] {
                None if self.requires_lookup[local] => {
                    return Err(CascadeError::violation(format!(
                        "slot {local} requires lookup without an owner"
                    )));
                }
                None => {}
                Some(id) => {
                    let maps = self.maps(id)?;
                    let round_trip = maps
                        .local_to_parent
                        .get(local)
                        .and_then(|parent_index| maps.parent_to_local.get(parent_index));
                    if round_trip != Some(local) {
                        return Err(CascadeError::violation(format!(
                            "slot {local} owned by {id} does not round-trip"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn remove_local_slot(&mut self, local: usize) -> Result<(), CascadeError> {
        self.requires_lookup.remove(local);
        self.owner.remove(local);
        for (_, maps) in self.maps_iter_mut() {
            maps.local_to_parent.remove(local)?;
            maps.parent_to_local.close_gap(local);
        }
        Ok(())
    }

    fn maps(&self, parent: ParentId) -> Result<&ParentMaps, CascadeError> {
        self.parents
            .get(parent.0)
            .and_then(Option::as_ref)
            .ok_or(CascadeError::UnknownParent(parent))
    }

    fn maps_mut(&mut self, parent: ParentId) -> Result<&mut ParentMaps, CascadeError> {
        self.parents
            .get_mut(parent.0)
            .and_then(Option::as_mut)
            .ok_or(CascadeError::UnknownParent(parent))
    }

    fn maps_iter(&self) -> impl Iterator<Item = (ParentId, &ParentMaps)> + '_ {
        self.parents
            .iter()
            .enumerate()
            .filter_map(|(slot, maps)| maps.as_ref().map(|maps| (ParentId(slot), maps)))
    }

    fn maps_iter_mut(&mut self) -> impl Iterator<Item = (ParentId, &mut ParentMaps)> + '_ {
        self.parents
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, maps)| maps.as_mut().map(|maps| (ParentId(slot), maps)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn derived(parent_len: usize) -> (CascadeController, ParentId) {
        let mut controller = CascadeController::new();
        let (id, _) = controller.register_parent(parent_len, None).unwrap();
        (controller, id)
    }

    #[test]
    fn register_grafts_lazy_owned_slots() {
        let mut controller = CascadeController::with_local_len(2);
        let (id, range) = controller.register_parent(3, Some(1)).unwrap();

        assert_eq!(range, 1..4);
        assert_eq!(controller.len(), 5);
        assert_eq!(controller.owned_by(id), vec![1, 2, 3]);
        assert_eq!(
            controller.each_index_requiring_lookup(None).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(controller.local_index(id, 0).unwrap(), 1);
        controller.check_invariants().unwrap();
    }

    #[test]
    fn second_parent_lands_after_first() {
        let mut controller = CascadeController::new();
        let (first, _) = controller.register_parent(2, None).unwrap();
        let (second, range) = controller.register_parent(2, None).unwrap();

        assert_eq!(range, 2..4);
        assert_eq!(controller.owned_by(first), vec![0, 1]);
        assert_eq!(controller.owned_by(second), vec![2, 3]);
    }

    #[test]
    fn unregister_releases_owned_slots_descending() {
        let mut controller = CascadeController::new();
        let (first, _) = controller.register_parent(2, None).unwrap();
        let (second, _) = controller.register_parent(2, None).unwrap();
        controller.local_set(0).unwrap();

        let owned = controller.unregister_parent(first).unwrap();
        assert_eq!(owned, vec![1]);
        for local in owned {
            controller.local_delete_at(local).unwrap();
        }

        assert_eq!(controller.len(), 3);
        assert_eq!(controller.owned_by(second), vec![1, 2]);
        assert_eq!(controller.local_index(second, 0).unwrap(), 1);
        assert!(matches!(
            controller.unregister_parent(first),
            Err(CascadeError::UnknownParent(_))
        ));
        controller.check_invariants().unwrap();
    }

    #[test]
    fn freed_handles_are_reused() {
        let mut controller = CascadeController::new();
        let (first, _) = controller.register_parent(1, None).unwrap();
        controller.unregister_parent(first).unwrap();
        let (again, _) = controller.register_parent(1, None).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn parent_append_follows_last_parent_element() {
        let (mut controller, id) = derived(4);
        // local element after the parent block
        controller.local_insert(4, 1).unwrap();

        let local = controller.parent_insert(id, 4, 1, None).unwrap();
        assert_eq!(local, 4);
        assert_eq!(controller.owner(5), None);
        controller.check_invariants().unwrap();
    }

    #[test]
    fn parent_insert_shifts_later_parent_indices() {
        let (mut controller, id) = derived(4);
        let local = controller.parent_insert(id, 1, 2, None).unwrap();

        assert_eq!(local, 1);
        assert_eq!(controller.len(), 6);
        for parent_index in 0..6 {
            assert_eq!(controller.local_index(id, parent_index).unwrap(), parent_index);
            assert_eq!(controller.parent_index(parent_index, id), Some(parent_index));
        }
        controller.check_invariants().unwrap();
    }

    #[test]
    fn parent_insert_beyond_extent_is_invariant_violation() {
        let (mut controller, id) = derived(2);
        let err = controller.parent_insert(id, 3, 1, None).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn parent_set_invalidates_only_controlled_slots() {
        let (mut controller, id) = derived(3);
        controller.looked_up(0).unwrap();
        controller.looked_up(1).unwrap();
        controller.local_set(1).unwrap();

        assert_eq!(controller.parent_set(id, 0).unwrap(), ParentSet::Invalidated(0));
        assert!(controller.requires_lookup(0));
        assert_eq!(controller.parent_set(id, 1).unwrap(), ParentSet::Overridden);
        assert!(!controller.requires_lookup(1));
        assert_eq!(controller.parent_set(id, 3).unwrap(), ParentSet::Inserted(3));
    }

    #[test]
    fn parent_delete_of_overridden_slot_keeps_local_slot() {
        let (mut controller, id) = derived(3);
        controller.local_set(1).unwrap();

        assert_eq!(
            controller.parent_delete_at(id, 1).unwrap(),
            ParentDelete::Detached(Some(1))
        );
        assert_eq!(controller.len(), 3);
        assert_eq!(controller.parent_len(id).unwrap(), 2);
        assert_eq!(controller.local_index(id, 1).unwrap(), 2);

        assert_eq!(
            controller.parent_delete_at(id, 0).unwrap(),
            ParentDelete::Removed(0)
        );
        assert_eq!(controller.len(), 2);
        controller.check_invariants().unwrap();
    }

    #[test]
    fn local_delete_untracks_parent_element() {
        let (mut controller, id) = derived(3);
        assert_eq!(controller.local_delete_at(1).unwrap(), Some(id));

        assert!(!controller.parent_controls_parent_index(id, 1));
        assert_eq!(controller.parent_len(id).unwrap(), 3);
        // inserting before the deleted element lands after its predecessor
        assert_eq!(controller.parent_insert(id, 1, 1, None).unwrap(), 1);
        assert_eq!(
            controller.parent_delete_at(id, 2).unwrap(),
            ParentDelete::Detached(None)
        );
        controller.check_invariants().unwrap();
    }

    #[test]
    fn local_insert_then_delete_restores_maps() {
        let (mut controller, id) = derived(3);
        controller.local_set(2).unwrap();
        let before = format!("{controller:?}");

        controller.local_insert(1, 1).unwrap();
        assert_eq!(controller.local_index(id, 1).unwrap(), 2);
        controller.local_delete_at(1).unwrap();

        assert_eq!(format!("{controller:?}"), before);
    }

    #[test]
    fn local_moves_carry_flags_and_owner() {
        let (mut controller, id) = derived(3);
        controller.looked_up(0).unwrap();
        controller.local_insert(3, 1).unwrap();

        controller.local_move(0, 3).unwrap();
        assert_eq!(controller.owner(3), Some(id));
        assert!(!controller.requires_lookup(3));
        assert_eq!(controller.local_index(id, 0).unwrap(), 3);
        assert_eq!(controller.owner(2), None);

        controller.local_swap(0, 3).unwrap();
        assert_eq!(controller.local_index(id, 0).unwrap(), 0);
        assert_eq!(controller.local_index(id, 1).unwrap(), 3);
        controller.check_invariants().unwrap();
    }

    #[test]
    fn parent_reorder_carries_interleaved_locals() {
        // [L0, p0, p1, p2, L4, p3]
        let mut controller = CascadeController::new();
        let (id, _) = controller.register_parent(4, None).unwrap();
        controller.local_insert(0, 1).unwrap();
        controller.local_insert(4, 1).unwrap();

        let reversed = Permutation::from_order(vec![3, 2, 1, 0]).unwrap();
        let local = controller.parent_reorder(id, &reversed).unwrap();

        assert_eq!(local.order(), &[0, 5, 3, 4, 2, 1]);
        for parent_index in 0..4 {
            let slot = controller.local_index(id, parent_index).unwrap();
            assert_eq!(controller.parent_index(slot, id), Some(parent_index));
        }
        assert_eq!(controller.local_index(id, 0).unwrap(), 1);
        controller.check_invariants().unwrap();
    }

    #[test]
    fn parent_reorder_leaves_other_parent_block() {
        let mut controller = CascadeController::new();
        let (first, _) = controller.register_parent(2, None).unwrap();
        let (second, _) = controller.register_parent(2, None).unwrap();

        let local = controller.parent_swap(first, 0, 1).unwrap();
        assert_eq!(local.order(), &[1, 0, 2, 3]);
        assert_eq!(controller.owned_by(second), vec![2, 3]);
        controller.check_invariants().unwrap();
    }

    #[test]
    fn parent_move_of_overridden_element_moves_nothing_locally() {
        let (mut controller, id) = derived(3);
        controller.local_set(0).unwrap();

        let local = controller.parent_move(id, 0, 2).unwrap();
        // p1, p2 now precede p0; the overridden slot trails the nearest owned slot
        assert_eq!(local.order(), &[0, 1, 2]);
        assert_eq!(controller.local_index(id, 2).unwrap(), 0);
        assert_eq!(controller.local_index(id, 0).unwrap(), 1);
        controller.check_invariants().unwrap();
    }

    #[test]
    fn parent_append_after_reorder_skips_overridden_anchor() {
        let (mut controller, id) = derived(3);
        controller.local_set(0).unwrap();
        controller.parent_move(id, 0, 2).unwrap();

        // parent index 2 still maps to the overridden slot at the front
        assert_eq!(controller.local_index(id, 2).unwrap(), 0);
        assert_eq!(controller.parent_insert(id, 3, 1, None).unwrap(), 3);
        assert_eq!(controller.owned_by(id), vec![1, 2, 3]);
        controller.check_invariants().unwrap();
    }

    #[test]
    fn parent_insert_at_overridden_index_stays_behind_owned_slots() {
        let (mut controller, id) = derived(3);
        controller.local_set(0).unwrap();
        controller.parent_move(id, 0, 2).unwrap();

        assert_eq!(controller.parent_insert(id, 2, 1, None).unwrap(), 3);
        let indices: Vec<usize> = controller
            .owned_by(id)
            .into_iter()
            .map(|local| controller.parent_index(local, id).unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        controller.check_invariants().unwrap();
    }

    #[test]
    fn parent_append_without_reorder_follows_override() {
        let (mut controller, id) = derived(3);
        controller.local_set(2).unwrap();

        assert_eq!(controller.parent_insert(id, 3, 1, None).unwrap(), 3);
        assert_eq!(controller.owner(2), None);
        assert_eq!(controller.owner(3), Some(id));
    }

    #[test]
    fn restartable_lookup_walk() {
        let (mut controller, id) = derived(3);
        controller.looked_up(1).unwrap();

        assert_eq!(controller.next_index_requiring_lookup(0, Some(id)), Some(0));
        assert_eq!(controller.next_index_requiring_lookup(1, None), Some(2));
        controller.looked_up(2).unwrap();
        assert_eq!(controller.next_index_requiring_lookup(1, None), None);
    }
}
