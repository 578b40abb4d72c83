//! Property-based tests for delta replication.
//!
//! A host tree is driven by a random sequence of local edits with periodic
//! flushes; every flushed delta is applied to a replica. After the final flush
//! both trees must report the same state, and a snapshot of the host must
//! rebuild an equal tree from scratch.

mod common;

use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::json;
use tool_sync::{NodeId, NodeShape, NodeTree, TiePolicy};
use tool_sync_wire::State;

const KEYS: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Debug, Clone)]
enum Edit {
    /// Plain leaf at the key.
    Write(usize, i64),
    /// Group at the key holding one versioned leaf `inner`.
    Nest(usize, i64),
    Delete(usize),
    Flush,
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (0..KEYS.len(), any::<i64>()).prop_map(|(k, v)| Edit::Write(k, v)),
        2 => (0..KEYS.len(), any::<i64>()).prop_map(|(k, v)| Edit::Nest(k, v)),
        2 => (0..KEYS.len()).prop_map(Edit::Delete),
        1 => Just(Edit::Flush),
    ]
}

/// Returns whether a new node was installed at `key`.
fn write(tree: &mut NodeTree, world: NodeId, key: &str, value: i64) -> bool {
    match tree.get(world, key).unwrap() {
        Some(leaf) if tree.shape(leaf).unwrap() == NodeShape::Value => {
            tree.set_value(leaf, json!(value)).unwrap();
            false
        }
        _ => {
            let leaf = tree.create_value("Value", json!(value)).unwrap();
            tree.dict_set(world, key, leaf).unwrap();
            true
        }
    }
}

/// Returns whether a new node was installed at `key`. With `allow_new`
/// unset, only an existing group is updated.
fn nest(tree: &mut NodeTree, world: NodeId, key: &str, value: i64, allow_new: bool) -> bool {
    match tree.get(world, key).unwrap() {
        Some(group) if tree.shape(group).unwrap() == NodeShape::Dictionary => {
            let inner = tree.get(group, "inner").unwrap().unwrap();
            tree.set_value(inner, json!(value)).unwrap();
            false
        }
        _ if !allow_new => false,
        _ => {
            let group = tree.create("Object.Group").unwrap();
            let inner = tree.create_versioned("Versioned", json!(value)).unwrap();
            tree.dict_set(group, "inner", inner).unwrap();
            tree.dict_set(world, key, group).unwrap();
            true
        }
    }
}

proptest! {
    /// Replaying every flushed delta converges the replica onto the host.
    #[test]
    fn prop_replica_converges(edits in prop::collection::vec(arb_edit(), 0..40)) {
        let mut host = common::tree();
        let world = host.create("Object.World").unwrap();
        let mut replica = common::tree();
        let copy = replica.materialize(&host.state(world).unwrap()).unwrap();

        // Keys whose node was replaced since the last flush. Replacing one
        // again with a fresh group would reach the replica as a delta to its
        // older group of the same type, so such edits are skipped.
        let mut replaced = HashSet::new();
        for edit in edits.iter().chain(std::iter::once(&Edit::Flush)) {
            match *edit {
                Edit::Write(k, v) => {
                    if write(&mut host, world, KEYS[k], v) {
                        replaced.insert(k);
                    }
                }
                Edit::Nest(k, v) => {
                    if nest(&mut host, world, KEYS[k], v, !replaced.contains(&k)) {
                        replaced.insert(k);
                    }
                }
                Edit::Delete(k) => {
                    if host.dict_delete(world, KEYS[k]).unwrap() {
                        replaced.insert(k);
                    }
                }
                Edit::Flush => {
                    let delta = host.take_changes(world).unwrap();
                    replica.set_changes(copy, &delta).unwrap();
                    replaced.clear();
                }
            }
        }

        prop_assert_eq!(replica.state(copy).unwrap(), host.state(world).unwrap());
        prop_assert_eq!(host.take_changes(world).unwrap(), State::empty());
        prop_assert_eq!(replica.take_changes(copy).unwrap(), State::empty());
    }

    /// A snapshot rebuilds an equal tree on a fresh replica.
    #[test]
    fn prop_snapshot_round_trips(edits in prop::collection::vec(arb_edit(), 0..30)) {
        let mut host = common::tree();
        let world = host.create("Object.World").unwrap();
        for edit in &edits {
            match *edit {
                Edit::Write(k, v) => {
                    write(&mut host, world, KEYS[k], v);
                }
                Edit::Nest(k, v) => {
                    nest(&mut host, world, KEYS[k], v, true);
                }
                Edit::Delete(k) => {
                    host.dict_delete(world, KEYS[k]).unwrap();
                }
                Edit::Flush => {
                    host.take_changes(world).unwrap();
                }
            }
        }
        host.take_changes(world).unwrap();

        let snapshot = host.state(world).unwrap();
        let mut fresh = common::tree();
        let copy = fresh.materialize(&snapshot).unwrap();
        prop_assert_eq!(fresh.state(copy).unwrap(), snapshot);
    }

    /// An incoming versioned delta is adopted only when strictly newer,
    /// or also on a tie under `AcceptRemote`.
    #[test]
    fn prop_version_conflict(
        local in -1i64..20,
        incoming in -1i64..20,
        accept_ties in any::<bool>(),
    ) {
        let mut tree = common::tree();
        let ties = if accept_ties { TiePolicy::AcceptRemote } else { TiePolicy::KeepLocal };
        tree.set_tie_policy(ties);
        let leaf = tree.materialize(&State::versioned("Versioned", json!("local"), local)).unwrap();

        let delta =
            State { value: Some(json!("remote")), version: Some(incoming), ..State::empty() };
        tree.set_changes(leaf, &delta).unwrap();

        let adopted = incoming > local || (accept_ties && incoming == local);
        let expected = if adopted { (json!("remote"), incoming) } else { (json!("local"), local) };
        prop_assert_eq!((tree.value(leaf).unwrap(), tree.version(leaf).unwrap()), expected);
        prop_assert!(!tree.is_dirty(leaf).unwrap());
    }
}
