//! Composited sequence
//!
//! [`CompositedSequence`] is a cheap, clonable handle to an ordered sequence
//! that inherits the elements of zero or more parents, in registration order,
//! and may override, insert or delete any position locally without touching
//! the parents. Parent mutations cascade synchronously to every child that
//! still follows the affected position; inherited values are only copied into
//! the child on first read.
//!
//! Parents are held through strong handles, children through weak ones, so a
//! child graph never keeps itself alive. Handles are single-threaded.

use crate::config::SequenceConfig;
use crate::error::SequenceError;
use crate::hooks::{Inherit, NoHooks, SequenceHooks};
use crate::storage::LocalStorage;
use rand::seq::SliceRandom;
use rand::Rng;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use strata_index::{CascadeController, LocalSet, ParentId, Permutation};

static NEXT_SEQUENCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique sequence identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(u64);

impl SequenceId {
    fn next() -> Self {
        Self(NEXT_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq#{}", self.0)
    }
}

pub(crate) struct ParentLink<T> {
    pub(crate) id: ParentId,
    pub(crate) sequence: CompositedSequence<T>,
}

pub(crate) struct ChildLink<T> {
    pub(crate) id: SequenceId,
    pub(crate) state: Weak<RefCell<SequenceState<T>>>,
}

pub(crate) struct SequenceState<T> {
    pub(crate) id: SequenceId,
    pub(crate) config: SequenceConfig,
    pub(crate) storage: LocalStorage<T>,
    pub(crate) controller: CascadeController,
    /// Registration order defines where each parent's block appears
    pub(crate) parents: Vec<ParentLink<T>>,
    pub(crate) children: SmallVec<[ChildLink<T>; 4]>,
    pub(crate) hooks: Rc<dyn SequenceHooks<T>>,
}

impl<T> SequenceState<T> {
    pub(crate) fn find_parent(&self, parent: &CompositedSequence<T>) -> Option<ParentId> {
        self.parents
            .iter()
            .find(|link| link.sequence.ptr_eq(parent))
            .map(|link| link.id)
    }

    /// Handle of a parent that is notifying this sequence
    pub(crate) fn notifying_parent(
        &self,
        parent: &CompositedSequence<T>,
    ) -> Result<ParentId, SequenceError> {
        self.find_parent(parent).ok_or_else(|| {
            SequenceError::violation(format!(
                "{} notified {} without being registered",
                parent.id(),
                self.id
            ))
        })
    }

    fn parent_sequence(&self, id: ParentId) -> Result<&CompositedSequence<T>, SequenceError> {
        self.parents
            .iter()
            .find(|link| link.id == id)
            .map(|link| &link.sequence)
            .ok_or_else(|| SequenceError::violation(format!("{} has no link for {id}", self.id)))
    }
}

impl<T> Drop for SequenceState<T> {
    fn drop(&mut self) {
        for link in &self.parents {
            // A parent busy mid-cascade prunes the dead link itself later
            if let Ok(mut parent) = link.sequence.inner.try_borrow_mut() {
                parent.children.retain(|child| child.id != self.id);
            }
        }
    }
}

/// Ordered sequence composited from parents and local edits
pub struct CompositedSequence<T> {
    pub(crate) inner: Rc<RefCell<SequenceState<T>>>,
}

impl<T> Clone for CompositedSequence<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> CompositedSequence<T> {
    /// Sequence identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> SequenceId {
        self.inner.borrow().id
    }

    /// Check if both handles refer to the same sequence
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> CompositedSequence<T> {
    /// Create empty sequence
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SequenceConfig::default())
    }

    /// Create empty sequence with configuration
    #[must_use]
    pub fn with_config(config: SequenceConfig) -> Self {
        Self::from_parts(config, LocalStorage::new(), CascadeController::new())
    }

    /// Create sequence holding `values` locally
    #[must_use]
    pub fn from_vec(values: Vec<T>) -> Self {
        let controller = CascadeController::with_local_len(values.len());
        Self::from_parts(
            SequenceConfig::default(),
            LocalStorage::from_values(values),
            controller,
        )
    }

    /// Create a child inheriting every element of `parent`
    ///
    /// The child shares the parent's configuration.
    ///
    /// # Errors
    /// Propagates bookkeeping failures from registration
    pub fn derive(parent: &Self) -> Result<Self, SequenceError> {
        let child = Self::with_config(parent.config());
        child.register_parent(parent, None)?;
        Ok(child)
    }

    fn from_parts(
        config: SequenceConfig,
        storage: LocalStorage<T>,
        controller: CascadeController,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SequenceState {
                id: SequenceId::next(),
                config,
                storage,
                controller,
                parents: Vec::new(),
                children: SmallVec::new(),
                hooks: Rc::new(NoHooks),
            })),
        }
    }

    /// Install hooks, replacing the current ones
    pub fn set_hooks(&self, hooks: Rc<dyn SequenceHooks<T>>) {
        self.inner.borrow_mut().hooks = hooks;
    }

    pub(crate) fn hooks(&self) -> Rc<dyn SequenceHooks<T>> {
        Rc::clone(&self.inner.borrow().hooks)
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> SequenceConfig {
        self.inner.borrow().config.clone()
    }

    /// Number of elements, inherited or local
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().storage.len()
    }

    /// Check if sequence has no elements
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Parent graph
    // ------------------------------------------------------------------

    /// Registered parents, in registration order
    #[must_use]
    pub fn parents(&self) -> Vec<Self> {
        self.inner
            .borrow()
            .parents
            .iter()
            .map(|link| link.sequence.clone())
            .collect()
    }

    /// Check if any parent is registered
    #[must_use]
    pub fn has_parents(&self) -> bool {
        !self.inner.borrow().parents.is_empty()
    }

    /// Check if `other` is a registered parent
    #[must_use]
    pub fn is_parent(&self, other: &Self) -> bool {
        self.inner.borrow().find_parent(other).is_some()
    }

    /// Live children
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        self.inner
            .borrow()
            .children
            .iter()
            .filter_map(|link| link.state.upgrade())
            .map(|inner| Self { inner })
            .collect()
    }

    fn has_ancestor(&self, other: &Self) -> bool {
        self.parents()
            .iter()
            .any(|parent| parent.ptr_eq(other) || parent.has_ancestor(other))
    }

    /// Inherit every element of `parent`, grafted at `at` (default: the end)
    ///
    /// New slots are lazy: values are copied on first read.
    ///
    /// # Errors
    /// - [`SequenceError::CyclicRegistration`] if `parent` is this sequence or a descendant
    /// - [`SequenceError::AlreadyRegistered`] if `parent` is already registered
    /// - [`SequenceError::IndexOutOfBounds`] if `at` is past the end
    pub fn register_parent(&self, parent: &Self, at: Option<usize>) -> Result<(), SequenceError> {
        if self.ptr_eq(parent) || parent.has_ancestor(self) {
            return Err(SequenceError::CyclicRegistration {
                parent: parent.id(),
                child: self.id(),
            });
        }
        if self.is_parent(parent) {
            return Err(SequenceError::AlreadyRegistered(parent.id()));
        }

        let parent_len = parent.len();
        let range = {
            let mut state = self.inner.borrow_mut();
            let len = state.storage.len();
            if let Some(at) = at.filter(|&at| at > len) {
                return Err(SequenceError::IndexOutOfBounds { index: at, len });
            }
            let (id, range) = state.controller.register_parent(parent_len, at)?;
            state.storage.insert_pending(range.start, range.len())?;
            state.parents.push(ParentLink {
                id,
                sequence: parent.clone(),
            });
            tracing::debug!(
                sequence = %state.id,
                label = state.config.label.as_deref(),
                parent = %parent.id(),
                at = range.start,
                parent_len,
                "registered parent"
            );
            range
        };
        parent.inner.borrow_mut().children.push(ChildLink {
            id: self.id(),
            state: Rc::downgrade(&self.inner),
        });

        for local in range {
            self.notify_children(0, |child, depth| {
                child.update_for_parent_insert(self, local, depth)
            })?;
        }
        Ok(())
    }

    /// Stop inheriting from `parent`
    ///
    /// Slots still provided by `parent` are removed; overridden slots stay.
    ///
    /// # Errors
    /// Returns [`SequenceError::UnknownParent`] if `parent` is not registered
    pub fn unregister_parent(&self, parent: &Self) -> Result<(), SequenceError> {
        let id = self
            .inner
            .borrow()
            .find_parent(parent)
            .ok_or_else(|| SequenceError::UnknownParent(parent.id()))?;

        // Children that veto the removal need the values we are about to drop.
        // Fetching them may reshape this sequence, which restarts the capture.
        let capture = !self.children().is_empty();
        let released: Vec<(usize, Option<T>)> = 'capture: loop {
            let owned: Vec<usize> = self.inner.borrow().controller.owned_by(id);
            let mut released = Vec::with_capacity(owned.len());
            for local in owned.into_iter().rev() {
                let value = if capture {
                    match self.current_value(local, 0)? {
                        Some(value) => Some(value),
                        None => continue 'capture,
                    }
                } else {
                    None
                };
                released.push((local, value));
            }
            break released;
        };

        {
            let mut state = self.inner.borrow_mut();
            state.controller.unregister_parent(id)?;
            state.parents.retain(|link| link.id != id);
            tracing::debug!(
                sequence = %state.id,
                label = state.config.label.as_deref(),
                parent = %parent.id(),
                released = released.len(),
                "unregistered parent"
            );
        }
        parent.detach_child(self.id());

        for (local, value) in released {
            {
                let mut state = self.inner.borrow_mut();
                state.controller.local_delete_at(local)?;
                state.storage.remove(local)?;
            }
            if let Some(value) = value {
                self.notify_children(0, |child, depth| {
                    child.update_for_parent_delete_at(self, local, &value, depth)
                })?;
            }
        }
        Ok(())
    }

    /// Swap parent `old` for `new`, grafting `new` where `old`'s block was
    ///
    /// # Errors
    /// - [`SequenceError::UnknownParent`] if `old` is not registered
    /// - Registration errors for `new`
    pub fn replace_parent(&self, old: &Self, new: &Self) -> Result<(), SequenceError> {
        let id = self
            .inner
            .borrow()
            .find_parent(old)
            .ok_or_else(|| SequenceError::UnknownParent(old.id()))?;
        if old.ptr_eq(new) {
            return Ok(());
        }
        if self.ptr_eq(new) || new.has_ancestor(self) {
            return Err(SequenceError::CyclicRegistration {
                parent: new.id(),
                child: self.id(),
            });
        }
        if self.is_parent(new) {
            return Err(SequenceError::AlreadyRegistered(new.id()));
        }

        let at = {
            let state = self.inner.borrow();
            match state.controller.owned_by(id).first() {
                Some(&first) => first,
                None => state.controller.local_index(id, 0)?,
            }
        };
        self.unregister_parent(old)?;
        let at = at.min(self.len());
        self.register_parent(new, Some(at))
    }

    /// Detach from every parent, keeping all current values as local values
    ///
    /// # Errors
    /// Propagates failures from loading parent state
    pub fn freeze(&self) -> Result<(), SequenceError> {
        self.load_parent_state(None)?;
        let links = {
            let mut state = self.inner.borrow_mut();
            let links = std::mem::take(&mut state.parents);
            for link in &links {
                state.controller.unregister_parent(link.id)?;
            }
            links
        };
        let id = self.id();
        for link in &links {
            link.sequence.detach_child(id);
        }
        tracing::debug!(sequence = %id, detached = links.len(), "froze sequence");
        Ok(())
    }

    pub(crate) fn detach_child(&self, child: SequenceId) {
        self.inner
            .borrow_mut()
            .children
            .retain(|link| link.id != child);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Element at `index`, materializing it from its parent if still pending
    ///
    /// Returns `None` past the end or when `pre_get` vetoes the read.
    ///
    /// # Errors
    /// Returns an error if bookkeeping is inconsistent
    pub fn get(&self, index: usize) -> Result<Option<T>, SequenceError> {
        if index >= self.len() {
            return Ok(None);
        }
        let hooks = self.hooks();
        if !hooks.pre_get(index) {
            return Ok(None);
        }
        let value = self.resolve(index, 0)?;
        Ok(value.map(|value| hooks.post_get(index, value)))
    }

    /// Materialize `index` without firing get hooks
    ///
    /// If `child_pre_set` skips the inherited value, the slot is deleted and
    /// the lookup retried at the same (now shifted) index.
    pub(crate) fn resolve(&self, index: usize, depth: usize) -> Result<Option<T>, SequenceError> {
        loop {
            let (owner, parent, parent_index) = {
                let state = self.inner.borrow();
                if index >= state.storage.len() {
                    return Ok(None);
                }
                if !state.controller.requires_lookup(index) {
                    return state.storage.get(index).cloned().map(Some).ok_or_else(|| {
                        SequenceError::violation(format!(
                            "{} slot {index} holds no value",
                            state.id
                        ))
                    });
                }
                let owner = state.controller.owner(index).ok_or_else(|| {
                    SequenceError::violation(format!("{} slot {index} pending without owner", state.id))
                })?;
                let parent_index = state.controller.parent_index(index, owner).ok_or_else(|| {
                    SequenceError::violation(format!(
                        "{} slot {index} has no parent index",
                        state.id
                    ))
                })?;
                let parent = state.parent_sequence(owner)?.clone();
                (owner, parent, parent_index)
            };

            self.check_depth(depth + 1)?;
            let fetched = parent.resolve(parent_index, depth + 1)?;

            // The parent may have dropped or shifted that element while resolving
            let unchanged = self.still_pending(index, owner, parent_index);
            let value = match (fetched, unchanged) {
                (Some(value), true) => value,
                (_, false) => continue,
                (None, true) => {
                    return Err(SequenceError::violation(format!(
                        "{} could not supply index {parent_index}",
                        parent.id()
                    )))
                }
            };

            let hooks = self.hooks();
            let fallback = (!self.children().is_empty()).then(|| value.clone());
            match hooks.child_pre_set(&parent, index, value) {
                Inherit::Skip => {
                    if self.still_pending(index, owner, parent_index) {
                        self.discard_inherited(index, fallback, depth)?;
                    }
                }
                Inherit::Keep(value) => {
                    let value = hooks.pre_set(index, value, false);
                    if !self.still_pending(index, owner, parent_index) {
                        continue;
                    }
                    {
                        let mut state = self.inner.borrow_mut();
                        state.storage.set(index, value.clone())?;
                        state.controller.looked_up(index)?;
                        tracing::trace!(sequence = %state.id, index, "materialized inherited value");
                    }
                    hooks.post_set(index, &value, false);
                    hooks.child_post_set(&parent, index, &value);
                    return Ok(Some(value));
                }
            }
        }
    }

    fn still_pending(&self, index: usize, owner: ParentId, parent_index: usize) -> bool {
        let state = self.inner.borrow();
        index < state.storage.len()
            && state.controller.requires_lookup(index)
            && state.controller.parent_index(index, owner) == Some(parent_index)
    }

    /// Drop an inherited slot the hooks declined to inherit
    fn discard_inherited(
        &self,
        index: usize,
        value: Option<T>,
        depth: usize,
    ) -> Result<(), SequenceError> {
        {
            let mut state = self.inner.borrow_mut();
            state.controller.local_delete_at(index)?;
            state.storage.remove(index)?;
            tracing::debug!(sequence = %state.id, index, "skipped inherited value");
        }
        if let Some(value) = value {
            self.notify_children(depth, |child, depth| {
                child.update_for_parent_delete_at(self, index, &value, depth)
            })?;
        }
        Ok(())
    }

    /// Value at `index` without materializing it locally
    ///
    /// Returns `None` if fetching a pending value reshaped this sequence, for
    /// instance because a parent skipped the element and the removal cascaded
    /// here. The slot that was at `index` can no longer be identified then.
    fn current_value(&self, index: usize, depth: usize) -> Result<Option<T>, SequenceError> {
        let (pending, revision) = {
            let state = self.inner.borrow();
            let pending = if state.controller.requires_lookup(index) {
                let owner = state.controller.owner(index);
                let link = owner.and_then(|owner| {
                    let parent_index = state.controller.parent_index(index, owner)?;
                    Some((state.parent_sequence(owner).ok()?.clone(), parent_index))
                });
                Some(link.ok_or_else(|| {
                    SequenceError::violation(format!("{} slot {index} pending without owner", state.id))
                })?)
            } else {
                None
            };
            (pending, state.storage.revision())
        };
        match pending {
            Some((parent, parent_index)) => {
                self.check_depth(depth + 1)?;
                let fetched = parent.resolve(parent_index, depth + 1)?;
                if self.inner.borrow().storage.revision() != revision {
                    tracing::debug!(sequence = %self.id(), index, "slot reshaped while fetching");
                    return Ok(None);
                }
                fetched.map(Some).ok_or_else(|| {
                    SequenceError::violation(format!(
                        "{} could not supply index {parent_index}",
                        parent.id()
                    ))
                })
            }
            None => {
                let state = self.inner.borrow();
                let value = state.storage.get(index).cloned().ok_or_else(|| {
                    SequenceError::violation(format!("{} slot {index} holds no value", state.id))
                });
                value.map(Some)
            }
        }
    }

    /// Eagerly materialize pending slots, optionally only those from `parent`
    ///
    /// Idempotent: once nothing is pending, no hooks fire.
    ///
    /// # Errors
    /// Returns [`SequenceError::UnknownParent`] if `parent` is not registered
    pub fn load_parent_state(&self, parent: Option<&Self>) -> Result<(), SequenceError> {
        let filter = match parent {
            Some(parent) => Some(
                self.inner
                    .borrow()
                    .find_parent(parent)
                    .ok_or_else(|| SequenceError::UnknownParent(parent.id()))?,
            ),
            None => None,
        };

        let mut cursor = 0;
        loop {
            let next = self
                .inner
                .borrow()
                .controller
                .next_index_requiring_lookup(cursor, filter);
            let Some(index) = next else {
                return Ok(());
            };
            self.resolve(index, 0)?;
            cursor = index;
        }
    }

    /// Fully materialized snapshot of the sequence
    ///
    /// # Errors
    /// Propagates failures from loading parent state
    pub fn to_vec(&self) -> Result<Vec<T>, SequenceError> {
        self.load_parent_state(None)?;
        let state = self.inner.borrow();
        let values = state
            .storage
            .iter()
            .enumerate()
            .map(|(index, value)| {
                value.cloned().ok_or_else(|| {
                    SequenceError::violation(format!("{} slot {index} still pending", state.id))
                })
            })
            .collect();
        values
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Overwrite `index` (or append when `index == len`) and cascade
    ///
    /// An overwritten inherited slot stops following its parent.
    ///
    /// # Errors
    /// Returns [`SequenceError::IndexOutOfBounds`] if `index > len`
    pub fn set(&self, index: usize, value: T) -> Result<(), SequenceError> {
        self.write(index, value, true)
    }

    /// [`Self::set`] without notifying children
    ///
    /// # Errors
    /// Returns [`SequenceError::IndexOutOfBounds`] if `index > len`
    pub fn set_without_cascade(&self, index: usize, value: T) -> Result<(), SequenceError> {
        self.write(index, value, false)
    }

    fn write(&self, index: usize, value: T, cascade: bool) -> Result<(), SequenceError> {
        let len = self.len();
        if index > len {
            return Err(SequenceError::IndexOutOfBounds { index, len });
        }
        let hooks = self.hooks();
        let value = hooks.pre_set(index, value, index == len);

        let outcome = {
            let mut state = self.inner.borrow_mut();
            let len = state.storage.len();
            if index > len {
                return Err(SequenceError::IndexOutOfBounds { index, len });
            }
            let outcome = state.controller.local_set(index)?;
            match outcome {
                LocalSet::Inserted(_) => state.storage.insert(index, value.clone())?,
                LocalSet::Overwritten { .. } => state.storage.set(index, value.clone())?,
            }
            outcome
        };
        let is_insert = matches!(outcome, LocalSet::Inserted(_));

        // Post hooks may re-enter, so descendants catch up first
        if cascade {
            if is_insert {
                self.notify_children(0, |child, depth| {
                    child.update_for_parent_insert(self, index, depth)
                })?;
            } else {
                self.notify_children(0, |child, depth| {
                    child.update_for_parent_set(self, index, depth)
                })?;
            }
        }
        hooks.post_set(index, &value, is_insert);
        Ok(())
    }

    /// Insert `value` before `index` and cascade, returning the index used
    ///
    /// # Errors
    /// Returns [`SequenceError::IndexOutOfBounds`] if `index > len`
    pub fn insert(&self, index: usize, value: T) -> Result<usize, SequenceError> {
        self.insert_one(index, value, true)
    }

    /// [`Self::insert`] without notifying children
    ///
    /// # Errors
    /// Returns [`SequenceError::IndexOutOfBounds`] if `index > len`
    pub fn insert_without_cascade(&self, index: usize, value: T) -> Result<usize, SequenceError> {
        self.insert_one(index, value, false)
    }

    /// Insert `values` starting at `index`, one cascaded insert per element
    ///
    /// # Errors
    /// Returns [`SequenceError::IndexOutOfBounds`] if `index > len`
    pub fn insert_many(
        &self,
        index: usize,
        values: impl IntoIterator<Item = T>,
    ) -> Result<(), SequenceError> {
        for (offset, value) in values.into_iter().enumerate() {
            self.insert_one(index + offset, value, true)?;
        }
        Ok(())
    }

    /// Append `value`
    ///
    /// # Errors
    /// Propagates cascade failures
    pub fn push(&self, value: T) -> Result<(), SequenceError> {
        self.insert_one(self.len(), value, true).map(|_| ())
    }

    fn insert_one(&self, index: usize, value: T, cascade: bool) -> Result<usize, SequenceError> {
        let len = self.len();
        if index > len {
            return Err(SequenceError::IndexOutOfBounds { index, len });
        }
        let hooks = self.hooks();
        let value = hooks.pre_set(index, value, true);
        {
            let mut state = self.inner.borrow_mut();
            let len = state.storage.len();
            if index > len {
                return Err(SequenceError::IndexOutOfBounds { index, len });
            }
            state.controller.local_insert(index, 1)?;
            state.storage.insert(index, value.clone())?;
        }
        if cascade {
            self.notify_children(0, |child, depth| {
                child.update_for_parent_insert(self, index, depth)
            })?;
        }
        hooks.post_set(index, &value, true);
        Ok(index)
    }

    /// Remove the element at `index` and cascade
    ///
    /// Returns `Ok(None)` when `pre_delete` vetoes the removal, or when the
    /// element disappeared while its inherited value was fetched (a parent
    /// skipped it).
    ///
    /// # Errors
    /// Returns [`SequenceError::IndexOutOfBounds`] if `index >= len`
    pub fn delete_at(&self, index: usize) -> Result<Option<T>, SequenceError> {
        self.remove_one(index, true)
    }

    /// [`Self::delete_at`] without notifying children
    ///
    /// # Errors
    /// Returns [`SequenceError::IndexOutOfBounds`] if `index >= len`
    pub fn delete_at_without_cascade(&self, index: usize) -> Result<Option<T>, SequenceError> {
        self.remove_one(index, false)
    }

    /// Remove the last element
    ///
    /// # Errors
    /// Propagates cascade failures
    pub fn pop(&self) -> Result<Option<T>, SequenceError> {
        match self.len() {
            0 => Ok(None),
            len => self.remove_one(len - 1, true),
        }
    }

    fn remove_one(&self, index: usize, cascade: bool) -> Result<Option<T>, SequenceError> {
        let len = self.len();
        if index >= len {
            return Err(SequenceError::IndexOutOfBounds { index, len });
        }
        let hooks = self.hooks();
        if !hooks.pre_delete(index) {
            tracing::debug!(sequence = %self.id(), index, "delete vetoed");
            return Ok(None);
        }

        let Some(value) = self.current_value(index, 0)? else {
            return Ok(None);
        };
        {
            let mut state = self.inner.borrow_mut();
            let len = state.storage.len();
            if index >= len {
                return Err(SequenceError::IndexOutOfBounds { index, len });
            }
            state.controller.local_delete_at(index)?;
            state.storage.remove(index)?;
        }
        if cascade {
            self.notify_children(0, |child, depth| {
                child.update_for_parent_delete_at(self, index, &value, depth)
            })?;
        }
        hooks.post_delete(index, &value);
        Ok(Some(value))
    }

    // ------------------------------------------------------------------
    // Reorders
    // ------------------------------------------------------------------

    /// Reorder so that new position `i` holds the element formerly at `order[i]`
    ///
    /// # Errors
    /// - [`SequenceError::InvalidPermutation`] if `order` is not a permutation
    /// - [`SequenceError::PermutationLength`] if `order` does not cover the sequence
    pub fn reorder(&self, order: Vec<usize>) -> Result<(), SequenceError> {
        let len = self.len();
        if order.len() != len {
            return Err(SequenceError::PermutationLength {
                expected: len,
                actual: order.len(),
            });
        }
        let permutation = Permutation::from_order(order)?;
        {
            let mut state = self.inner.borrow_mut();
            state.controller.local_reorder(&permutation)?;
            state.storage.permute(&permutation)?;
        }
        if permutation.is_identity() {
            return Ok(());
        }
        self.notify_children(0, |child, depth| {
            child.update_for_parent_reorder(self, &permutation, depth)
        })
    }

    /// Randomly reorder using the thread-local generator
    ///
    /// # Errors
    /// Propagates cascade failures
    pub fn shuffle(&self) -> Result<(), SequenceError> {
        self.shuffle_with(&mut rand::rng())
    }

    /// Randomly reorder using `rng`
    ///
    /// # Errors
    /// Propagates cascade failures
    pub fn shuffle_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<(), SequenceError> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.reorder(order)
    }

    /// Remove the element at `from` and reinsert it at `to`
    ///
    /// # Errors
    /// Returns [`SequenceError::IndexOutOfBounds`] if either index is not below `len`
    pub fn move_element(&self, from: usize, to: usize) -> Result<(), SequenceError> {
        self.check_positions([from, to])?;
        {
            let mut state = self.inner.borrow_mut();
            let permutation = state.controller.local_move(from, to)?;
            state.storage.permute(&permutation)?;
        }
        if from == to {
            return Ok(());
        }
        self.notify_children(0, |child, depth| {
            child.update_for_parent_move(self, from, to, depth)
        })
    }

    /// Exchange the elements at `a` and `b`
    ///
    /// # Errors
    /// Returns [`SequenceError::IndexOutOfBounds`] if either index is not below `len`
    pub fn swap(&self, a: usize, b: usize) -> Result<(), SequenceError> {
        self.check_positions([a, b])?;
        {
            let mut state = self.inner.borrow_mut();
            let permutation = state.controller.local_swap(a, b)?;
            state.storage.permute(&permutation)?;
        }
        if a == b {
            return Ok(());
        }
        self.notify_children(0, |child, depth| {
            child.update_for_parent_swap(self, a, b, depth)
        })
    }

    fn check_positions(&self, positions: [usize; 2]) -> Result<(), SequenceError> {
        let len = self.len();
        match positions.into_iter().find(|&index| index >= len) {
            Some(index) => Err(SequenceError::IndexOutOfBounds { index, len }),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Cascade plumbing
    // ------------------------------------------------------------------

    pub(crate) fn check_depth(&self, depth: usize) -> Result<(), SequenceError> {
        let max = self.inner.borrow().config.max_cascade_depth;
        if depth > max {
            return Err(SequenceError::CascadeDepthExceeded { depth: max });
        }
        Ok(())
    }

    /// Run `notify` on every live child at `depth + 1`
    pub(crate) fn notify_children(
        &self,
        depth: usize,
        mut notify: impl FnMut(&Self, usize) -> Result<(), SequenceError>,
    ) -> Result<(), SequenceError> {
        let children = {
            let mut state = self.inner.borrow_mut();
            let before = state.children.len();
            state.children.retain(|link| link.state.strong_count() > 0);
            if state.children.len() != before {
                tracing::debug!(
                    sequence = %state.id,
                    pruned = before - state.children.len(),
                    "pruned dropped children"
                );
            }
            state
                .children
                .iter()
                .filter_map(|link| link.state.upgrade())
                .map(|inner| Self { inner })
                .collect::<SmallVec<[Self; 4]>>()
        };
        for child in &children {
            notify(child, depth + 1)?;
        }
        Ok(())
    }
}

impl<T: Clone + 'static> Default for CompositedSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CompositedSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(state) => f
                .debug_struct("CompositedSequence")
                .field("id", &state.id)
                .field("len", &state.storage.len())
                .field(
                    "parents",
                    &state
                        .parents
                        .iter()
                        .map(|link| link.sequence.id())
                        .collect::<Vec<_>>(),
                )
                .field("children", &state.children.len())
                .finish(),
            Err(_) => f.write_str("CompositedSequence { <borrowed> }"),
        }
    }
}
