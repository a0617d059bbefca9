//! Propagation handlers
//!
//! Each handler runs on a child when one of its parents mutated. The child
//! replays the positional effect through its own controller, adjusts its
//! storage, and forwards the change to its own children in its own index
//! space. Values are never pushed down: a parent `set` only invalidates the
//! affected slot at every generation, and reads resolve lazily.

use crate::error::SequenceError;
use crate::sequence::CompositedSequence;
use strata_index::{ParentDelete, ParentSet, Permutation};

impl<T: Clone + 'static> CompositedSequence<T> {
    /// `parent` overwrote (or appended at) `parent_index`
    pub(crate) fn update_for_parent_set(
        &self,
        parent: &Self,
        parent_index: usize,
        depth: usize,
    ) -> Result<(), SequenceError> {
        self.check_depth(depth)?;
        let outcome = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let id = state.notifying_parent(parent)?;
            let outcome = state.controller.parent_set(id, parent_index)?;
            match outcome {
                ParentSet::Inserted(local) => state.storage.insert_pending(local, 1)?,
                ParentSet::Invalidated(local) => state.storage.invalidate(local)?,
                ParentSet::Overridden => {}
            }
            tracing::trace!(
                sequence = %state.id,
                parent = %parent.id(),
                parent_index,
                ?outcome,
                "parent set"
            );
            outcome
        };

        match outcome {
            ParentSet::Inserted(local) => self.notify_children(depth, |child, depth| {
                child.update_for_parent_insert(self, local, depth)
            }),
            ParentSet::Invalidated(local) => self.notify_children(depth, |child, depth| {
                child.update_for_parent_set(self, local, depth)
            }),
            ParentSet::Overridden => Ok(()),
        }
    }

    /// `parent` inserted one element at `parent_index`
    pub(crate) fn update_for_parent_insert(
        &self,
        parent: &Self,
        parent_index: usize,
        depth: usize,
    ) -> Result<(), SequenceError> {
        self.check_depth(depth)?;
        let local = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let id = state.notifying_parent(parent)?;
            let local = state.controller.parent_insert(id, parent_index, 1, None)?;
            state.storage.insert_pending(local, 1)?;
            tracing::trace!(
                sequence = %state.id,
                parent = %parent.id(),
                parent_index,
                local,
                "parent insert"
            );
            local
        };
        self.notify_children(depth, |child, depth| {
            child.update_for_parent_insert(self, local, depth)
        })
    }

    /// `parent` removed `value` from `parent_index`
    ///
    /// A vetoed removal keeps `value` as a local override at the same position.
    pub(crate) fn update_for_parent_delete_at(
        &self,
        parent: &Self,
        parent_index: usize,
        value: &T,
        depth: usize,
    ) -> Result<(), SequenceError> {
        self.check_depth(depth)?;
        let controlled_local = {
            let mut state = self.inner.borrow_mut();
            let id = state.notifying_parent(parent)?;
            if state.controller.parent_controls_parent_index(id, parent_index) {
                Some(state.controller.local_index(id, parent_index)?)
            } else {
                state.controller.parent_delete_at(id, parent_index)?;
                None
            }
        };
        let Some(local) = controlled_local else {
            return Ok(());
        };

        let hooks = self.hooks();
        let allowed = hooks.child_pre_delete(parent, local);

        // The hook may have re-entered; look the slot up again
        let removed = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let id = state.notifying_parent(parent)?;
            let controlled = state.controller.parent_controls_parent_index(id, parent_index);
            if controlled && !allowed {
                let local = state.controller.local_index(id, parent_index)?;
                if state.controller.requires_lookup(local) {
                    state.storage.set(local, value.clone())?;
                }
                state.controller.local_set(local)?;
                state.controller.parent_delete_at(id, parent_index)?;
                tracing::debug!(
                    sequence = %state.id,
                    parent = %parent.id(),
                    local,
                    "parent delete vetoed, keeping value"
                );
                None
            } else {
                match state.controller.parent_delete_at(id, parent_index)? {
                    ParentDelete::Removed(local) => {
                        let stored = state.storage.remove(local)?;
                        tracing::trace!(
                            sequence = %state.id,
                            parent = %parent.id(),
                            parent_index,
                            local,
                            "parent delete"
                        );
                        Some((local, stored.unwrap_or_else(|| value.clone())))
                    }
                    ParentDelete::Detached(_) => None,
                }
            }
        };

        if let Some((local, removed)) = removed {
            self.notify_children(depth, |child, depth| {
                child.update_for_parent_delete_at(self, local, &removed, depth)
            })?;
            hooks.child_post_delete(parent, local, &removed);
        }
        Ok(())
    }

    /// `parent` reordered its elements
    pub(crate) fn update_for_parent_reorder(
        &self,
        parent: &Self,
        permutation: &Permutation,
        depth: usize,
    ) -> Result<(), SequenceError> {
        self.check_depth(depth)?;
        let local = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let id = state.notifying_parent(parent)?;
            state.controller.parent_reorder(id, permutation)?
        };
        self.apply_parent_permutation(parent, local, depth)
    }

    /// `parent` moved one element from `from` to `to`
    pub(crate) fn update_for_parent_move(
        &self,
        parent: &Self,
        from: usize,
        to: usize,
        depth: usize,
    ) -> Result<(), SequenceError> {
        self.check_depth(depth)?;
        let local = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let id = state.notifying_parent(parent)?;
            state.controller.parent_move(id, from, to)?
        };
        self.apply_parent_permutation(parent, local, depth)
    }

    /// `parent` swapped the elements at `a` and `b`
    pub(crate) fn update_for_parent_swap(
        &self,
        parent: &Self,
        a: usize,
        b: usize,
        depth: usize,
    ) -> Result<(), SequenceError> {
        self.check_depth(depth)?;
        let local = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let id = state.notifying_parent(parent)?;
            state.controller.parent_swap(id, a, b)?
        };
        self.apply_parent_permutation(parent, local, depth)
    }

    /// Permute storage to match the controller and forward the local reorder
    fn apply_parent_permutation(
        &self,
        parent: &Self,
        local: Permutation,
        depth: usize,
    ) -> Result<(), SequenceError> {
        {
            let mut state = self.inner.borrow_mut();
            state.storage.permute(&local)?;
            tracing::trace!(
                sequence = %state.id,
                parent = %parent.id(),
                identity = local.is_identity(),
                "parent reorder"
            );
        }
        if local.is_identity() {
            return Ok(());
        }
        self.notify_children(depth, |child, depth| {
            child.update_for_parent_reorder(self, &local, depth)
        })
    }
}
