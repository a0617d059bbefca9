use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use strata_sequence::{CompositedSequence, SequenceConfig, SequenceError};
use strata_test_utils::{abcd_family, chain, contents, init_tracing};

#[test]
fn parent_push_reaches_child_and_overrides_persist() {
    init_tracing();
    let (parent, child) = abcd_family();

    parent.push('E').unwrap();
    assert_eq!(contents(&child), vec!['A', 'B', 'C', 'D', 'E']);

    child.set(0, 'Z').unwrap();
    assert_eq!(contents(&child), vec!['Z', 'B', 'C', 'D', 'E']);
    assert_eq!(contents(&parent), vec!['A', 'B', 'C', 'D', 'E']);

    parent.set(0, 'W').unwrap();
    assert_eq!(contents(&parent), vec!['W', 'B', 'C', 'D', 'E']);
    assert_eq!(contents(&child), vec!['Z', 'B', 'C', 'D', 'E']);
}

#[test]
fn parent_insert_lands_at_same_position() {
    let (parent, child) = abcd_family();

    parent.insert(1, 'X').unwrap();
    assert_eq!(contents(&parent), vec!['A', 'X', 'B', 'C', 'D']);
    assert_eq!(contents(&child), vec!['A', 'X', 'B', 'C', 'D']);
}

#[test]
fn local_inserts_stay_local_and_parent_appends_follow_last_parent_element() {
    let (parent, child) = abcd_family();

    child.insert(0, 'E').unwrap();
    assert_eq!(contents(&parent), vec!['A', 'B', 'C', 'D']);
    assert_eq!(contents(&child), vec!['E', 'A', 'B', 'C', 'D']);

    child.insert(4, 'F').unwrap();
    assert_eq!(contents(&child), vec!['E', 'A', 'B', 'C', 'F', 'D']);

    parent.push('G').unwrap();
    assert_eq!(contents(&child), vec!['E', 'A', 'B', 'C', 'F', 'D', 'G']);
}

#[test]
fn parent_set_reaches_lazily_through_generations() {
    let root = CompositedSequence::from_vec(vec![1, 2, 3]);
    let generations = chain(&root, 4);
    let leaf = generations.last().unwrap();
    assert_eq!(contents(leaf), vec![1, 2, 3]);

    root.set(2, 30).unwrap();
    root.insert(0, 0).unwrap();
    assert_eq!(contents(leaf), vec![0, 1, 2, 30]);
    for generation in &generations {
        assert_eq!(contents(generation), vec![0, 1, 2, 30]);
    }
}

#[test]
fn second_parent_block_follows_first() {
    let first = CompositedSequence::from_vec(vec!['a', 'b']);
    let second = CompositedSequence::from_vec(vec!['x', 'y']);
    let child = CompositedSequence::new();
    child.register_parent(&first, None).unwrap();
    child.register_parent(&second, None).unwrap();
    assert_eq!(contents(&child), vec!['a', 'b', 'x', 'y']);

    first.push('c').unwrap();
    assert_eq!(contents(&child), vec!['a', 'b', 'c', 'x', 'y']);

    child.unregister_parent(&first).unwrap();
    assert_eq!(contents(&child), vec!['x', 'y']);
    assert!(!child.is_parent(&first));
    assert!(first.children().is_empty());

    second.push('z').unwrap();
    assert_eq!(contents(&child), vec!['x', 'y', 'z']);
}

#[test]
fn unregister_keeps_overridden_slots() {
    let first = CompositedSequence::from_vec(vec!['a', 'b', 'c']);
    let second = CompositedSequence::from_vec(vec!['x']);
    let child = CompositedSequence::derive(&first).unwrap();
    child.register_parent(&second, None).unwrap();
    child.set(1, 'B').unwrap();

    child.unregister_parent(&first).unwrap();
    assert_eq!(contents(&child), vec!['B', 'x']);

    second.set(0, 'X').unwrap();
    assert_eq!(contents(&child), vec!['B', 'X']);
}

#[test]
fn unregister_cascades_to_grandchildren() {
    let root = CompositedSequence::from_vec(vec![1, 2]);
    let child = CompositedSequence::from_vec(vec![0]);
    child.register_parent(&root, None).unwrap();
    let grandchild = CompositedSequence::derive(&child).unwrap();
    assert_eq!(contents(&grandchild), vec![0, 1, 2]);

    child.unregister_parent(&root).unwrap();
    assert_eq!(contents(&child), vec![0]);
    assert_eq!(contents(&grandchild), vec![0]);
}

#[test]
fn register_at_position() {
    let parent = CompositedSequence::from_vec(vec!['p', 'q']);
    let child = CompositedSequence::from_vec(vec!['l', 'm']);
    child.register_parent(&parent, Some(1)).unwrap();
    assert_eq!(contents(&child), vec!['l', 'p', 'q', 'm']);

    parent.push('r').unwrap();
    assert_eq!(contents(&child), vec!['l', 'p', 'q', 'r', 'm']);
}

#[test]
fn empty_parent_grows_at_end() {
    let parent = CompositedSequence::new();
    let child = CompositedSequence::from_vec(vec![7]);
    child.register_parent(&parent, None).unwrap();
    assert_eq!(child.len(), 1);

    parent.push(8).unwrap();
    parent.push(9).unwrap();
    assert_eq!(contents(&child), vec![7, 8, 9]);
}

#[test]
fn replace_parent_grafts_at_old_block() {
    let old = CompositedSequence::from_vec(vec!['a', 'b']);
    let new = CompositedSequence::from_vec(vec!['x', 'y', 'z']);
    let child = CompositedSequence::from_vec(vec!['l']);
    child.register_parent(&old, None).unwrap();
    assert_eq!(contents(&child), vec!['l', 'a', 'b']);

    child.replace_parent(&old, &new).unwrap();
    assert_eq!(contents(&child), vec!['l', 'x', 'y', 'z']);
    assert_eq!(child.parents().len(), 1);
    assert!(child.is_parent(&new));

    new.set(0, 'X').unwrap();
    old.set(0, 'A').unwrap();
    assert_eq!(contents(&child), vec!['l', 'X', 'y', 'z']);
}

#[test]
fn freeze_keeps_values_and_stops_cascades() {
    let (parent, child) = abcd_family();
    child.freeze().unwrap();
    assert!(!child.has_parents());
    assert!(parent.children().is_empty());

    parent.set(0, 'Z').unwrap();
    parent.push('E').unwrap();
    parent.delete_at(1).unwrap();
    assert_eq!(contents(&child), vec!['A', 'B', 'C', 'D']);
}

#[test]
fn reorder_carries_local_slots_with_preceding_parent_slot() {
    let parent = CompositedSequence::from_vec(vec!['a', 'b', 'c', 'd']);
    let child = CompositedSequence::derive(&parent).unwrap();
    child.insert(2, 'x').unwrap();

    parent.reorder(vec![3, 2, 1, 0]).unwrap();
    assert_eq!(contents(&parent), vec!['d', 'c', 'b', 'a']);
    assert_eq!(contents(&child), vec!['d', 'c', 'b', 'x', 'a']);
}

#[test]
fn move_and_swap_follow_parent() {
    let (parent, child) = abcd_family();
    assert_eq!(child.get(0).unwrap(), Some('A'));

    parent.move_element(0, 3).unwrap();
    assert_eq!(contents(&parent), vec!['B', 'C', 'D', 'A']);
    assert_eq!(contents(&child), vec!['B', 'C', 'D', 'A']);

    parent.swap(1, 2).unwrap();
    assert_eq!(contents(&child), vec!['B', 'D', 'C', 'A']);
}

#[test]
fn parent_inserts_after_move_keep_parent_order_around_override() {
    let parent = CompositedSequence::from_vec(vec!['A', 'B', 'C']);
    let child = CompositedSequence::derive(&parent).unwrap();
    child.set(0, 'Z').unwrap();

    parent.move_element(0, 2).unwrap();
    assert_eq!(contents(&child), vec!['Z', 'B', 'C']);

    parent.push('N').unwrap();
    assert_eq!(contents(&parent), vec!['B', 'C', 'A', 'N']);
    assert_eq!(contents(&child), vec!['Z', 'B', 'C', 'N']);

    parent.insert(2, 'M').unwrap();
    assert_eq!(contents(&parent), vec!['B', 'C', 'M', 'A', 'N']);
    assert_eq!(contents(&child), vec!['Z', 'B', 'C', 'M', 'N']);
}

#[test]
fn seeded_shuffle_is_mirrored() {
    let parent = CompositedSequence::from_vec((0..16).collect::<Vec<u32>>());
    let child = CompositedSequence::derive(&parent).unwrap();
    let grandchild = CompositedSequence::derive(&child).unwrap();

    parent.shuffle_with(&mut StdRng::seed_from_u64(7)).unwrap();
    let shuffled = contents(&parent);
    let mut sorted = shuffled.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..16).collect::<Vec<u32>>());
    assert_eq!(contents(&child), shuffled);
    assert_eq!(contents(&grandchild), shuffled);
}

#[test]
fn child_shuffle_leaves_parent_alone() {
    let (parent, child) = abcd_family();
    child.shuffle().unwrap();

    let mut shuffled = contents(&child);
    shuffled.sort_unstable();
    assert_eq!(shuffled, vec!['A', 'B', 'C', 'D']);
    assert_eq!(contents(&parent), vec!['A', 'B', 'C', 'D']);
}

#[test]
fn non_cascading_writes_stay_put() {
    let parent = CompositedSequence::from_vec(vec![1, 2, 3]);
    let child = CompositedSequence::derive(&parent).unwrap();
    assert_eq!(contents(&child), vec![1, 2, 3]);

    parent.set_without_cascade(0, 10).unwrap();
    assert_eq!(contents(&parent), vec![10, 2, 3]);
    assert_eq!(contents(&child), vec![1, 2, 3]);
}

#[test]
fn pop_and_delete_return_removed_values() {
    let (parent, child) = abcd_family();
    assert_eq!(parent.pop().unwrap(), Some('D'));
    assert_eq!(child.delete_at(0).unwrap(), Some('A'));
    assert_eq!(contents(&child), vec!['B', 'C']);
    assert_eq!(contents(&parent), vec!['A', 'B', 'C']);

    let empty: CompositedSequence<char> = CompositedSequence::new();
    assert_eq!(empty.pop().unwrap(), None);
}

#[test]
fn insert_many_cascades_each_element() {
    let (parent, child) = abcd_family();
    parent.insert_many(2, ['x', 'y', 'z']).unwrap();
    assert_eq!(
        contents(&child),
        vec!['A', 'B', 'x', 'y', 'z', 'C', 'D']
    );
}

#[test]
fn registration_errors() {
    let (parent, child) = abcd_family();
    let stranger = CompositedSequence::from_vec(vec!['s']);

    assert_eq!(
        child.unregister_parent(&stranger),
        Err(SequenceError::UnknownParent(stranger.id()))
    );
    assert_eq!(
        child.replace_parent(&stranger, &parent),
        Err(SequenceError::UnknownParent(stranger.id()))
    );
    assert_eq!(
        child.register_parent(&parent, None),
        Err(SequenceError::AlreadyRegistered(parent.id()))
    );
    assert_eq!(
        parent.register_parent(&child, None),
        Err(SequenceError::CyclicRegistration {
            parent: child.id(),
            child: parent.id(),
        })
    );
    assert_eq!(
        child.register_parent(&stranger, Some(9)),
        Err(SequenceError::IndexOutOfBounds { index: 9, len: 4 })
    );
    assert!(!child.is_parent(&stranger));
}

#[test]
fn invalid_reorders_are_rejected() {
    let (parent, _child) = abcd_family();
    assert_eq!(
        parent.reorder(vec![0, 1]),
        Err(SequenceError::PermutationLength {
            expected: 4,
            actual: 2
        })
    );
    assert!(matches!(
        parent.reorder(vec![0, 0, 1, 2]),
        Err(SequenceError::InvalidPermutation(_))
    ));
    assert_eq!(contents(&parent), vec!['A', 'B', 'C', 'D']);
}

#[test]
fn derived_child_shares_config() {
    let config = SequenceConfig::new()
        .with_label("timeline")
        .with_max_cascade_depth(8);
    let parent: CompositedSequence<u8> = CompositedSequence::with_config(config.clone());
    let child = CompositedSequence::derive(&parent).unwrap();
    assert_eq!(child.config(), config);
}

#[test]
fn config_round_trips_through_json() {
    let config = SequenceConfig::new().with_label("scene");
    let json = serde_json::to_string(&config).unwrap();
    let back: SequenceConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);

    let defaults: SequenceConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(defaults, SequenceConfig::default());
    assert_eq!(defaults.max_cascade_depth, 256);
}
