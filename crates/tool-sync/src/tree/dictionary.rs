//! Dynamic-schema composites.
//!
//! Children are created, cast and deleted at run time through the
//! dictionary's [`DictionaryProvider`]. Deletion is two-phase: a local
//! [`NodeTree::dict_delete`] overwrites the entry with a tombstone, and the
//! tombstone is dropped from the map only when [`NodeTree::take_changes`]
//! reports it to the peer. Every read accessor skips tombstones.

use std::fmt;

use indexmap::IndexMap;
use tool_sync_wire::{State, DELETED};
use tracing::trace;

use crate::error::SyncError;
use crate::provider::{ApplyMode, ApplyStep, DictionaryProvider};

use super::{Body, NodeId, NodeShape, NodeTree};

pub(crate) struct DictionaryNode {
    pub(crate) entries: IndexMap<String, NodeId>,
    /// `None` only while the provider is busy applying a delta.
    pub(crate) provider: Option<Box<dyn DictionaryProvider>>,
}

impl DictionaryNode {
    pub(crate) fn new(provider: Box<dyn DictionaryProvider>) -> Self {
        Self { entries: IndexMap::new(), provider: Some(provider) }
    }
}

impl fmt::Debug for DictionaryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DictionaryNode")
            .field("entries", &self.entries)
            .field("provider_busy", &self.provider.is_none())
            .finish()
    }
}

impl NodeTree {
    fn dictionary(&self, id: NodeId) -> Result<&DictionaryNode, SyncError> {
        let node = self.node(id)?;
        match &node.body {
            Body::Dictionary(dict) => Ok(dict),
            _ => Err(SyncError::WrongKind { expected: NodeShape::Dictionary, found: node.shape() }),
        }
    }

    fn dictionary_mut(&mut self, id: NodeId) -> Result<&mut DictionaryNode, SyncError> {
        let node = self.node_mut(id)?;
        let found = node.shape();
        match &mut node.body {
            Body::Dictionary(dict) => Ok(dict),
            _ => Err(SyncError::WrongKind { expected: NodeShape::Dictionary, found }),
        }
    }

    // ── Read accessors (tombstones filtered) ─────────────────────────────

    pub fn dict_get(&self, id: NodeId, key: &str) -> Result<Option<NodeId>, SyncError> {
        let entry = self.dictionary(id)?.entries.get(key).copied();
        Ok(entry.filter(|child| !self.is_tombstone(*child)))
    }

    pub fn dict_has(&self, id: NodeId, key: &str) -> Result<bool, SyncError> {
        Ok(self.dict_get(id, key)?.is_some())
    }

    pub fn dict_len(&self, id: NodeId) -> Result<usize, SyncError> {
        Ok(self.dict_entries(id)?.count())
    }

    pub fn dict_entries(
        &self,
        id: NodeId,
    ) -> Result<impl Iterator<Item = (&str, NodeId)> + '_, SyncError> {
        let dict = self.dictionary(id)?;
        Ok(dict
            .entries
            .iter()
            .filter(move |(_, child)| !self.is_tombstone(**child))
            .map(|(key, child)| (key.as_str(), *child)))
    }

    pub fn dict_keys(&self, id: NodeId) -> Result<impl Iterator<Item = &str> + '_, SyncError> {
        Ok(self.dict_entries(id)?.map(|(key, _)| key))
    }

    pub fn dict_values(&self, id: NodeId) -> Result<impl Iterator<Item = NodeId> + '_, SyncError> {
        Ok(self.dict_entries(id)?.map(|(_, child)| child))
    }

    // ── Local mutation ───────────────────────────────────────────────────

    /// Install `child` under `key` and mark the whole child subtree dirty, so
    /// the next delta carries it in full. A previous child at `key` is freed.
    ///
    /// Replacing a composite with a fresh one of the same type, or deleting
    /// and re-creating it, before the next [`take_changes`](Self::take_changes)
    /// does not rebuild it on the peer: the delta carries a matching type, so
    /// the peer applies it to its existing child. Versioned leaves inside the
    /// new subtree then start below the peer's versions and are dropped. Flush
    /// between removing a composite and installing its same-type replacement.
    pub fn dict_set(&mut self, id: NodeId, key: &str, child: NodeId) -> Result<(), SyncError> {
        self.install(id, key, child)?;
        self.mark_subtree_dirty(child)
    }

    /// Install `child` under `key` without marking anything dirty: the child
    /// is being adopted from authoritative state, not created locally.
    pub fn dict_adopt(&mut self, id: NodeId, key: &str, child: NodeId) -> Result<(), SyncError> {
        self.install(id, key, child)
    }

    /// Replace the entry at `key` with a tombstone. Returns `false` when there
    /// was no live entry.
    ///
    /// Fails with [`SyncError::CapabilityUnsupported`] when the provider
    /// refuses the delete.
    pub fn dict_delete(&mut self, id: NodeId, key: &str) -> Result<bool, SyncError> {
        let Some(current) = self.dict_get(id, key)? else {
            return Ok(false);
        };
        let mut provider = self.take_provider(id)?;
        let allowed = provider.can_delete(self, key, current);
        self.restore_provider(id, provider);
        if !allowed {
            return Err(SyncError::CapabilityUnsupported(format!(
                "{} refuses to delete `{key}`",
                self.node_type(id)?
            )));
        }

        let tombstone = self.alloc_tombstone();
        self.node_mut(tombstone)?.parent = Some(id);
        if let Some(old) = self.dictionary_mut(id)?.entries.insert(key.to_string(), tombstone) {
            self.free(old);
        }
        self.propagate(Some(id));
        Ok(true)
    }

    /// Tombstone every live entry. Returns how many were deleted.
    pub fn dict_clear(&mut self, id: NodeId) -> Result<usize, SyncError> {
        let keys: Vec<String> = self.dict_keys(id)?.map(str::to_string).collect();
        let mut deleted = 0;
        for key in keys {
            if self.dict_delete(id, &key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn install(&mut self, id: NodeId, key: &str, child: NodeId) -> Result<(), SyncError> {
        self.dictionary(id)?;
        self.check_attachable(id, child)?;
        let child_node = self.node_mut(child)?;
        child_node.parent = Some(id);
        let dirty = child_node.is_dirty();
        if let Some(old) = self.dictionary_mut(id)?.entries.insert(key.to_string(), child) {
            self.free(old);
        }
        // A dirty child's ancestors must be internally dirty, or later writes
        // stop propagating at the child.
        if dirty {
            self.propagate(Some(id));
        }
        Ok(())
    }

    pub(super) fn commit_tombstones(
        &mut self,
        id: NodeId,
        keys: &[String],
    ) -> Result<(), SyncError> {
        for key in keys {
            if let Some(tombstone) = self.dictionary_mut(id)?.entries.shift_remove(key) {
                self.free(tombstone);
            }
        }
        Ok(())
    }

    // ── Provider plumbing ────────────────────────────────────────────────

    fn take_provider(&mut self, id: NodeId) -> Result<Box<dyn DictionaryProvider>, SyncError> {
        self.dictionary_mut(id)?.provider.take().ok_or(SyncError::Reentrant(id))
    }

    fn restore_provider(&mut self, id: NodeId, provider: Box<dyn DictionaryProvider>) {
        if let Ok(dict) = self.dictionary_mut(id) {
            dict.provider = Some(provider);
        }
    }

    /// Run a snapshot or delta through the provider's `apply_changes` hook.
    ///
    /// In [`ApplyMode::State`] every local key missing from the snapshot is
    /// first added as an incoming tombstone, so the dictionary converges to
    /// exactly the given key set.
    pub(super) fn apply_dictionary(
        &mut self,
        id: NodeId,
        incoming: &State,
        mode: ApplyMode,
    ) -> Result<(), SyncError> {
        let pruned;
        let delta = match mode {
            ApplyMode::Changes => incoming,
            ApplyMode::State => {
                let mut augmented = incoming.clone();
                let properties = augmented.properties.get_or_insert_with(Default::default);
                for key in self.dictionary(id)?.entries.keys() {
                    if !properties.contains_key(key) {
                        properties.insert(key.clone(), State::deleted());
                    }
                }
                pruned = augmented;
                &pruned
            }
        };

        let mut provider = self.take_provider(id)?;
        let result = provider.apply_changes(ApplyStep::new(self, id, delta, mode));
        self.restore_provider(id, provider);
        result
    }
}

/// Default application step: walk the incoming entries key by key.
///
/// Not atomic across keys: an error at key N leaves keys before N applied.
pub(crate) fn apply_entries(
    tree: &mut NodeTree,
    owner: NodeId,
    delta: &State,
    mode: ApplyMode,
    provider: &mut dyn DictionaryProvider,
) -> Result<(), SyncError> {
    let Some(properties) = delta.properties.as_ref() else {
        return Ok(());
    };
    for (key, entry) in properties {
        let existing = tree.dictionary(owner)?.entries.get(key).copied();
        let live = existing.filter(|child| !tree.is_tombstone(*child));
        let Some(current) = live else {
            if entry.is_tombstone() {
                if existing.is_some() && mode == ApplyMode::State {
                    tree.commit_tombstones(owner, std::slice::from_ref(key))?;
                }
                trace!(dictionary = %owner, key = %key, "tombstone for unknown key ignored");
                continue;
            }
            match provider.create(tree, key, entry)? {
                Some(child) => {
                    if let Err(err) = tree.set_state(child, entry) {
                        tree.free(child);
                        return Err(err);
                    }
                    tree.install(owner, key, child)?;
                    trace!(dictionary = %owner, key = %key, node = %child, "created entry");
                }
                None => trace!(dictionary = %owner, key = %key, "provider declined to create"),
            }
            continue;
        };

        let current_type = tree.node_type(current)?;
        match entry.type_name.as_deref() {
            None => delegate(tree, current, entry, mode)?,
            Some(incoming_type) if incoming_type == current_type => {
                delegate(tree, current, entry, mode)?
            }
            Some(DELETED) => {
                if provider.can_delete(tree, key, current) {
                    if let Some(old) = tree.dictionary_mut(owner)?.entries.shift_remove(key) {
                        tree.free(old);
                    }
                    trace!(dictionary = %owner, key = %key, "deleted entry");
                } else {
                    trace!(dictionary = %owner, key = %key, "provider refused delete");
                }
            }
            Some(_) => match provider.cast(tree, key, current, entry)? {
                Some(replacement) if replacement == current => tree.set_state(current, entry)?,
                Some(replacement) => {
                    if let Err(err) = tree.set_state(replacement, entry) {
                        tree.free(replacement);
                        return Err(err);
                    }
                    tree.install(owner, key, replacement)?;
                    trace!(dictionary = %owner, key = %key, node = %replacement, "cast entry");
                }
                None => trace!(dictionary = %owner, key = %key, "provider declined to cast"),
            },
        }
    }
    Ok(())
}

fn delegate(
    tree: &mut NodeTree,
    child: NodeId,
    entry: &State,
    mode: ApplyMode,
) -> Result<(), SyncError> {
    match mode {
        ApplyMode::State => tree.set_state(child, entry),
        ApplyMode::Changes => tree.set_changes(child, entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{DynamicProvider, SingleTypeProvider};
    use crate::registry::TypeRegistry;
    use serde_json::json;
    use std::rc::Rc;

    fn world() -> (NodeTree, NodeId) {
        let mut registry = TypeRegistry::new();
        registry.register_dynamic("Object.World").unwrap();
        let mut tree = NodeTree::new(Rc::new(registry));
        let root = tree.create("Object.World").unwrap();
        (tree, root)
    }

    #[test]
    fn deleted_key_stays_in_state_until_changes_are_taken() {
        let (mut tree, root) = world();
        let leaf = tree.create_value("Value", json!(1)).unwrap();
        tree.dict_set(root, "k", leaf).unwrap();
        tree.take_changes(root).unwrap();

        assert!(tree.dict_delete(root, "k").unwrap());
        assert!(!tree.dict_has(root, "k").unwrap());
        assert_eq!(
            tree.state(root).unwrap().to_json(),
            json!({"type": "Object.World", "properties": {"k": {"type": "Deleted"}}})
        );

        assert_eq!(
            tree.take_changes(root).unwrap().to_json(),
            json!({"properties": {"k": {"type": "Deleted"}}})
        );
        assert_eq!(
            tree.state(root).unwrap().to_json(),
            json!({"type": "Object.World", "properties": {}})
        );
        assert!(!tree.contains(leaf));
    }

    #[test]
    fn new_entry_is_announced_in_full() {
        let (mut tree, root) = world();
        let leaf = tree.create_value("Value", json!(5)).unwrap();
        tree.dict_set(root, "x", leaf).unwrap();
        assert_eq!(
            tree.take_changes(root).unwrap().to_json(),
            json!({"properties": {"x": {"type": "Value", "value": 5}}})
        );
    }

    #[test]
    fn incoming_tombstone_for_unknown_key_is_not_materialized() {
        let (mut tree, root) = world();
        let delta = State::empty().with_property("ghost", State::deleted());
        tree.set_changes(root, &delta).unwrap();
        assert_eq!(tree.dict_len(root).unwrap(), 0);
        assert_eq!(tree.state(root).unwrap().property_count(), 0);
    }

    #[test]
    fn incoming_type_change_casts_the_entry() {
        let (mut tree, root) = world();
        let before = tree.create_value("Value", json!("text")).unwrap();
        tree.dict_adopt(root, "slot", before).unwrap();

        let delta =
            State::empty().with_property("slot", State::versioned("Versioned", json!(1), 0));
        tree.set_changes(root, &delta).unwrap();

        let after = tree.dict_get(root, "slot").unwrap().unwrap();
        assert_ne!(after, before);
        assert!(!tree.contains(before));
        assert_eq!(tree.version(after).unwrap(), 0);
        assert!(!tree.is_dirty(root).unwrap());
    }

    #[test]
    fn state_prunes_keys_missing_from_the_snapshot() {
        let (mut tree, root) = world();
        for key in ["a", "b"] {
            let leaf = tree.create_value("Value", json!(key)).unwrap();
            tree.dict_adopt(root, key, leaf).unwrap();
        }
        let snapshot = State::typed("Object.World")
            .with_property("b", State::value("Value", json!("B")))
            .with_property("c", State::value("Value", json!("C")));
        tree.set_state(root, &snapshot).unwrap();
        assert_eq!(tree.dict_keys(root).unwrap().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(tree.state(root).unwrap(), snapshot);
    }

    #[test]
    fn refused_remote_delete_is_ignored_and_local_delete_fails() {
        let mut tree = NodeTree::new(Rc::new(TypeRegistry::new()));
        let provider = SingleTypeProvider::new("Value").append_only();
        let log = tree.create_dictionary("Object.Log", Box::new(provider)).unwrap();
        let entry = tree.create_value("Value", json!("boot")).unwrap();
        tree.dict_adopt(log, "0", entry).unwrap();

        tree.set_changes(log, &State::empty().with_property("0", State::deleted())).unwrap();
        assert!(tree.dict_has(log, "0").unwrap());

        assert!(matches!(tree.dict_delete(log, "0"), Err(SyncError::CapabilityUnsupported(_))));
    }

    #[test]
    fn attaching_an_ancestor_is_a_cycle() {
        let mut tree = NodeTree::new(Rc::new(TypeRegistry::new()));
        let outer = tree.create_dictionary("Object.A", Box::new(DynamicProvider)).unwrap();
        let inner = tree.create_dictionary("Object.B", Box::new(DynamicProvider)).unwrap();
        tree.dict_set(outer, "inner", inner).unwrap();
        assert!(matches!(tree.dict_set(inner, "loop", outer), Err(SyncError::Cycle(_))));
        assert!(matches!(tree.dict_set(outer, "again", inner), Err(SyncError::AlreadyAttached(_))));
    }

    #[test]
    fn clear_tombstones_every_live_entry() {
        let (mut tree, root) = world();
        for key in ["a", "b", "c"] {
            let leaf = tree.create_value("Value", json!(0)).unwrap();
            tree.dict_set(root, key, leaf).unwrap();
        }
        tree.take_changes(root).unwrap();
        assert_eq!(tree.dict_clear(root).unwrap(), 3);
        assert_eq!(tree.dict_len(root).unwrap(), 0);
        assert_eq!(tree.take_changes(root).unwrap().property_count(), 3);
        assert_eq!(tree.len(), 1);
    }
}
