//! Testing utilities for Strata workspace
//!
//! Shared test helpers, fixtures, and recording hooks.

#![allow(missing_docs)]

use std::cell::RefCell;
use std::rc::Rc;
use strata_sequence::{CompositedSequence, Inherit, SequenceHooks};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring `RUST_LOG`; repeated calls are ignored
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Hook invocation captured by [`RecordingHooks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent<T> {
    PreSet { index: usize, value: T, is_insert: bool },
    PostSet { index: usize, value: T, is_insert: bool },
    PreGet { index: usize },
    PostGet { index: usize, value: T },
    PreDelete { index: usize },
    PostDelete { index: usize, value: T },
    ChildPreSet { index: usize, value: T },
    ChildPostSet { index: usize, value: T },
    ChildPreDelete { index: usize },
    ChildPostDelete { index: usize, value: T },
}

/// Hooks that record every call and optionally veto or skip
#[derive(Debug)]
pub struct RecordingHooks<T> {
    events: RefCell<Vec<HookEvent<T>>>,
    veto_child_delete: bool,
    veto_delete: bool,
    skip: Option<T>,
}

impl<T> Default for RecordingHooks<T> {
    fn default() -> Self {
        Self {
            events: RefCell::new(Vec::new()),
            veto_child_delete: false,
            veto_delete: false,
            skip: None,
        }
    }
}

impl<T: Clone> RecordingHooks<T> {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Refuse deletes cascading from parents
    pub fn vetoing_child_deletes() -> Rc<Self> {
        Rc::new(Self {
            veto_child_delete: true,
            ..Self::default()
        })
    }

    /// Refuse local deletes
    pub fn vetoing_deletes() -> Rc<Self> {
        Rc::new(Self {
            veto_delete: true,
            ..Self::default()
        })
    }

    /// Decline to inherit elements equal to `value`
    pub fn skipping(value: T) -> Rc<Self> {
        Rc::new(Self {
            skip: Some(value),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<HookEvent<T>> {
        self.events.borrow().clone()
    }

    pub fn take_events(&self) -> Vec<HookEvent<T>> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    fn record(&self, event: HookEvent<T>) {
        self.events.borrow_mut().push(event);
    }
}

impl<T: Clone + PartialEq> SequenceHooks<T> for RecordingHooks<T> {
    fn pre_set(&self, index: usize, value: T, is_insert: bool) -> T {
        self.record(HookEvent::PreSet {
            index,
            value: value.clone(),
            is_insert,
        });
        value
    }

    fn post_set(&self, index: usize, value: &T, is_insert: bool) {
        self.record(HookEvent::PostSet {
            index,
            value: value.clone(),
            is_insert,
        });
    }

    fn pre_get(&self, index: usize) -> bool {
        self.record(HookEvent::PreGet { index });
        true
    }

    fn post_get(&self, index: usize, value: T) -> T {
        self.record(HookEvent::PostGet {
            index,
            value: value.clone(),
        });
        value
    }

    fn pre_delete(&self, index: usize) -> bool {
        self.record(HookEvent::PreDelete { index });
        !self.veto_delete
    }

    fn post_delete(&self, index: usize, value: &T) {
        self.record(HookEvent::PostDelete {
            index,
            value: value.clone(),
        });
    }

    fn child_pre_set(&self, _parent: &CompositedSequence<T>, index: usize, value: T) -> Inherit<T> {
        self.record(HookEvent::ChildPreSet {
            index,
            value: value.clone(),
        });
        if self.skip.as_ref() == Some(&value) {
            Inherit::Skip
        } else {
            Inherit::Keep(value)
        }
    }

    fn child_post_set(&self, _parent: &CompositedSequence<T>, index: usize, value: &T) {
        self.record(HookEvent::ChildPostSet {
            index,
            value: value.clone(),
        });
    }

    fn child_pre_delete(&self, _parent: &CompositedSequence<T>, index: usize) -> bool {
        self.record(HookEvent::ChildPreDelete { index });
        !self.veto_child_delete
    }

    fn child_post_delete(&self, _parent: &CompositedSequence<T>, index: usize, value: &T) {
        self.record(HookEvent::ChildPostDelete {
            index,
            value: value.clone(),
        });
    }
}

/// `[A, B, C, D]` parent and a child derived from it
pub fn abcd_family() -> (CompositedSequence<char>, CompositedSequence<char>) {
    let parent = CompositedSequence::from_vec(vec!['A', 'B', 'C', 'D']);
    let child = CompositedSequence::derive(&parent).unwrap();
    (parent, child)
}

/// Linear chain `root -> ... -> leaf` of `generations` sequences below `root`
pub fn chain<T: Clone + 'static>(
    root: &CompositedSequence<T>,
    generations: usize,
) -> Vec<CompositedSequence<T>> {
    let mut chain: Vec<CompositedSequence<T>> = Vec::with_capacity(generations);
    for _ in 0..generations {
        let parent = chain.last().unwrap_or(root);
        let next = CompositedSequence::derive(parent).unwrap();
        chain.push(next);
    }
    chain
}

/// Materialize and snapshot, panicking on bookkeeping errors
pub fn contents<T: Clone + 'static>(sequence: &CompositedSequence<T>) -> Vec<T> {
    sequence.to_vec().unwrap()
}
