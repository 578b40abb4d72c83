//! Node arena and dirty-tracking kernel.
//!
//! # Overview
//!
//! A [`NodeTree`] owns every node of one replica, keyed by a never-reused
//! [`NodeId`]. Composites own their children through `key -> NodeId` maps;
//! the parent back-reference is a plain `Option<NodeId>`, so dropping or
//! freeing a parent never has to unlink anything.
//!
//! | Shape                   | Tag prefix    | Children        |
//! |-------------------------|---------------|-----------------|
//! | [`NodeShape::Value`]      | `Value`       | none            |
//! | [`NodeShape::Versioned`]  | `Versioned`   | none            |
//! | [`NodeShape::Object`]     | `Object`      | fixed key set   |
//! | [`NodeShape::Dictionary`] | `Object`      | dynamic key set |
//! | [`NodeShape::Deleted`]    | `Deleted`     | none            |
//!
//! # Dirty bits
//!
//! Every node has a `type_dirty` flag (its tag changed, or it is new) and an
//! `internally_dirty` flag (its value or a descendant changed). Marking a
//! node dirty walks up the parent chain and stops at the first ancestor that
//! is already internally dirty. Tombstones always report dirty.
//!
//! [`NodeTree::take_changes`] is the destructive read: it returns the delta
//! for a subtree and clears the flags it reported. Applying remote state
//! ([`NodeTree::set_state`], [`NodeTree::set_changes`]) never marks anything
//! dirty, so a delta is not echoed back to the peer it came from.

pub mod dictionary;
pub mod leaf;
pub mod object;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::Deserialize;
use tool_sync_wire::{NodeKind, Properties, State, DELETED};

use crate::error::SyncError;
use crate::provider::{ApplyMode, DictionaryProvider, ObjectSchema};
use crate::registry::{Constructor, TypeRegistry};

use dictionary::DictionaryNode;
use leaf::{ValueNode, VersionedNode};
use object::ObjectNode;

/// Opaque handle to a node inside one [`NodeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Concrete node flavor, resolved once when the node is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeShape {
    Value,
    Versioned,
    /// Fixed-schema composite.
    Object,
    /// Dynamic-schema composite.
    Dictionary,
    Deleted,
}

impl fmt::Display for NodeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeShape::Value => "value",
            NodeShape::Versioned => "versioned",
            NodeShape::Object => "object",
            NodeShape::Dictionary => "dictionary",
            NodeShape::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// What to do when an incoming versioned delta carries the local version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TiePolicy {
    /// Drop the incoming value; the local one wins.
    #[default]
    KeepLocal,
    /// Adopt the incoming value.
    AcceptRemote,
}

/// Counters for one tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub nodes_created: u64,
    pub nodes_freed: u64,
    /// Number of `internally_dirty` flags flipped from clear to set.
    pub dirty_marks: u64,
}

pub(crate) struct Node {
    pub(crate) type_name: String,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) type_dirty: bool,
    pub(crate) internally_dirty: bool,
    pub(crate) body: Body,
}

#[derive(Debug)]
pub(crate) enum Body {
    Value(ValueNode),
    Versioned(VersionedNode),
    Object(ObjectNode),
    Dictionary(DictionaryNode),
    Deleted,
}

impl Node {
    fn is_dirty(&self) -> bool {
        self.kind == NodeKind::Deleted || self.type_dirty || self.internally_dirty
    }

    fn shape(&self) -> NodeShape {
        match self.body {
            Body::Value(_) => NodeShape::Value,
            Body::Versioned(_) => NodeShape::Versioned,
            Body::Object(_) => NodeShape::Object,
            Body::Dictionary(_) => NodeShape::Dictionary,
            Body::Deleted => NodeShape::Deleted,
        }
    }

    /// Raw child entries, tombstones included.
    fn entries(&self) -> Vec<(String, NodeId)> {
        let map = match &self.body {
            Body::Object(obj) => &obj.properties,
            Body::Dictionary(dict) => &dict.entries,
            _ => return Vec::new(),
        };
        map.iter().map(|(key, id)| (key.clone(), *id)).collect()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("type_name", &self.type_name)
            .field("parent", &self.parent)
            .field("type_dirty", &self.type_dirty)
            .field("internally_dirty", &self.internally_dirty)
            .field("body", &self.body)
            .finish()
    }
}

// ── NodeTree ──────────────────────────────────────────────────────────────

/// Arena holding every node of one replica.
pub struct NodeTree {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    registry: Rc<TypeRegistry>,
    ties: TiePolicy,
    stats: TreeStats,
}

impl fmt::Debug for NodeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTree")
            .field("nodes", &self.nodes.len())
            .field("ties", &self.ties)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl NodeTree {
    pub fn new(registry: Rc<TypeRegistry>) -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 1,
            registry,
            ties: TiePolicy::default(),
            stats: TreeStats::default(),
        }
    }

    pub fn registry(&self) -> &Rc<TypeRegistry> {
        &self.registry
    }

    pub fn tie_policy(&self) -> TiePolicy {
        self.ties
    }

    pub fn set_tie_policy(&mut self, ties: TiePolicy) {
        self.ties = ties;
    }

    pub fn stats(&self) -> TreeStats {
        self.stats
    }

    /// Number of live nodes, tombstones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    // ── Construction ─────────────────────────────────────────────────────

    pub(crate) fn alloc(&mut self, type_name: &str, kind: NodeKind, body: Body) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.stats.nodes_created += 1;
        self.nodes.insert(
            id,
            Node {
                type_name: type_name.to_string(),
                kind,
                parent: None,
                type_dirty: false,
                internally_dirty: false,
                body,
            },
        );
        id
    }

    pub(crate) fn alloc_tombstone(&mut self) -> NodeId {
        self.alloc(DELETED, NodeKind::Deleted, Body::Deleted)
    }

    /// Build a detached, clean node for `type_name` with default contents.
    ///
    /// Leaves start out `null` (versioned leaves at version `-1`); composites
    /// are built through the registry. Fails with [`SyncError::UnknownType`]
    /// for tags outside the taxonomy, for `Deleted`, and for composite types
    /// nobody registered.
    pub fn create(&mut self, type_name: &str) -> Result<NodeId, SyncError> {
        let kind = resolve_kind(type_name)?;
        match kind {
            NodeKind::Deleted => Err(SyncError::UnknownType(format!(
                "{type_name} cannot be materialized"
            ))),
            NodeKind::Value => {
                let store = self.registry.store(type_name);
                Ok(self.alloc(type_name, kind, Body::Value(ValueNode::new(store))))
            }
            NodeKind::Versioned => {
                let store = self.registry.store(type_name);
                Ok(self.alloc(type_name, kind, Body::Versioned(VersionedNode::new(store))))
            }
            NodeKind::Object => match self.registry.constructor(type_name)? {
                Constructor::Fixed(factory) => {
                    let mut schema = factory();
                    self.create_object(type_name, schema.as_mut())
                }
                Constructor::Dynamic(factory) => self.create_dictionary(type_name, factory()),
            },
        }
    }

    /// Build a detached node and initialize it from a full snapshot.
    pub fn materialize(&mut self, state: &State) -> Result<NodeId, SyncError> {
        let type_name = state.type_name.as_deref().ok_or(SyncError::MissingField("type"))?;
        let id = self.create(type_name)?;
        if let Err(err) = self.set_state(id, state) {
            self.free(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Build a fixed-schema composite whose properties come from `schema`.
    pub fn create_object(
        &mut self,
        type_name: &str,
        schema: &mut dyn ObjectSchema,
    ) -> Result<NodeId, SyncError> {
        expect_composite(type_name)?;
        let id = self.alloc(type_name, NodeKind::Object, Body::Object(ObjectNode::default()));
        let properties = match schema.properties(self, id) {
            Ok(properties) => properties,
            Err(err) => {
                self.free(id);
                return Err(err);
            }
        };
        let checked = properties
            .values()
            .try_for_each(|child| self.check_attachable(id, *child));
        if let Err(err) = checked {
            for child in properties.values() {
                if self.parent(*child).ok() == Some(None) && *child != id {
                    self.free(*child);
                }
            }
            self.free(id);
            return Err(err);
        }
        let mut carries_dirty = false;
        for child in properties.values() {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = Some(id);
                carries_dirty |= node.is_dirty();
            }
        }
        if let Some(Body::Object(obj)) = self.nodes.get_mut(&id).map(|node| &mut node.body) {
            obj.properties = properties;
        }
        if carries_dirty {
            self.propagate(Some(id));
        }
        Ok(id)
    }

    /// Build an empty dynamic-schema composite driven by `provider`.
    pub fn create_dictionary(
        &mut self,
        type_name: &str,
        provider: Box<dyn DictionaryProvider>,
    ) -> Result<NodeId, SyncError> {
        expect_composite(type_name)?;
        Ok(self.alloc(type_name, NodeKind::Object, Body::Dictionary(DictionaryNode::new(provider))))
    }

    /// Dispose a detached subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<(), SyncError> {
        if self.node(id)?.parent.is_some() {
            return Err(SyncError::AlreadyAttached(id));
        }
        self.free(id);
        Ok(())
    }

    /// Dispose every node.
    pub fn reset(&mut self) {
        self.stats.nodes_freed += self.nodes.len() as u64;
        self.nodes.clear();
    }

    /// Free a subtree without unlinking it from its parent.
    pub(crate) fn free(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                self.stats.nodes_freed += 1;
                stack.extend(node.entries().into_iter().map(|(_, child)| child));
            }
        }
    }

    /// `child` must exist, be detached, and not be `owner` or one of its ancestors.
    pub(crate) fn check_attachable(&self, owner: NodeId, child: NodeId) -> Result<(), SyncError> {
        if self.node(child)?.parent.is_some() {
            return Err(SyncError::AlreadyAttached(child));
        }
        let mut cursor = Some(owner);
        while let Some(id) = cursor {
            if id == child {
                return Err(SyncError::Cycle(child));
            }
            cursor = self.nodes.get(&id).and_then(|node| node.parent);
        }
        Ok(())
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node, SyncError> {
        self.nodes.get(&id).ok_or(SyncError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SyncError> {
        self.nodes.get_mut(&id).ok_or(SyncError::NodeNotFound(id))
    }

    pub fn node_type(&self, id: NodeId) -> Result<&str, SyncError> {
        Ok(&self.node(id)?.type_name)
    }

    pub fn kind(&self, id: NodeId) -> Result<NodeKind, SyncError> {
        Ok(self.node(id)?.kind)
    }

    pub fn shape(&self, id: NodeId) -> Result<NodeShape, SyncError> {
        Ok(self.node(id)?.shape())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, SyncError> {
        Ok(self.node(id)?.parent)
    }

    /// `type_dirty || internally_dirty`, and always `true` for tombstones.
    pub fn is_dirty(&self, id: NodeId) -> Result<bool, SyncError> {
        Ok(self.node(id)?.is_dirty())
    }

    pub fn is_type_dirty(&self, id: NodeId) -> Result<bool, SyncError> {
        Ok(self.node(id)?.type_dirty)
    }

    pub fn is_internally_dirty(&self, id: NodeId) -> Result<bool, SyncError> {
        Ok(self.node(id)?.internally_dirty)
    }

    pub(crate) fn is_tombstone(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_none_or(|node| node.kind == NodeKind::Deleted)
    }

    /// Child of a composite by key. Tombstoned dictionary keys read as absent.
    pub fn get(&self, id: NodeId, key: &str) -> Result<Option<NodeId>, SyncError> {
        match self.shape(id)? {
            NodeShape::Object => self.object_get(id, key),
            NodeShape::Dictionary => self.dict_get(id, key),
            found => Err(SyncError::WrongKind { expected: NodeShape::Object, found }),
        }
    }

    // ── Dirty kernel ─────────────────────────────────────────────────────

    /// Mark `id` internally dirty and propagate to its ancestors.
    pub fn mark_dirty(&mut self, id: NodeId) -> Result<(), SyncError> {
        self.node(id)?;
        self.propagate(Some(id));
        Ok(())
    }

    /// Mark the type tag of `id` dirty, so the next delta re-announces it.
    pub fn mark_type_dirty(&mut self, id: NodeId) -> Result<(), SyncError> {
        let node = self.node_mut(id)?;
        node.type_dirty = true;
        let parent = node.parent;
        self.propagate(parent);
        Ok(())
    }

    /// Mark a whole subtree as new: every node re-announces its type and
    /// contents in the next delta.
    pub(crate) fn mark_subtree_dirty(&mut self, id: NodeId) -> Result<(), SyncError> {
        let parent = self.node(id)?.parent;
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(&next) {
                node.type_dirty = true;
                if !node.internally_dirty {
                    node.internally_dirty = true;
                    self.stats.dirty_marks += 1;
                }
                stack.extend(node.entries().into_iter().map(|(_, child)| child));
            }
        }
        self.propagate(parent);
        Ok(())
    }

    /// Walk up from `start`, stopping at the first node already internally dirty.
    pub(crate) fn propagate(&mut self, start: Option<NodeId>) {
        let mut cursor = start;
        while let Some(id) = cursor {
            let Some(node) = self.nodes.get_mut(&id) else { break };
            if node.internally_dirty {
                break;
            }
            node.internally_dirty = true;
            self.stats.dirty_marks += 1;
            cursor = node.parent;
        }
    }

    // ── Snapshot / delta ─────────────────────────────────────────────────

    /// Full snapshot of a subtree, regardless of dirty status.
    ///
    /// Dictionary keys deleted since the last [`take_changes`](Self::take_changes)
    /// still appear, as `{"type": "Deleted"}`.
    pub fn state(&self, id: NodeId) -> Result<State, SyncError> {
        let node = self.node(id)?;
        let state = match &node.body {
            Body::Value(leaf) => State::value(&node.type_name, leaf.store.get()),
            Body::Versioned(leaf) => {
                State::versioned(&node.type_name, leaf.store.get(), leaf.version)
            }
            Body::Object(_) | Body::Dictionary(_) => {
                let mut properties = Properties::new();
                for (key, child) in node.entries() {
                    properties.insert(key, self.state(child)?);
                }
                State::composite(&node.type_name, properties)
            }
            Body::Deleted => State::deleted(),
        };
        Ok(state)
    }

    /// Force-overwrite a subtree from a full snapshot. Never marks anything dirty.
    pub fn set_state(&mut self, id: NodeId, state: &State) -> Result<(), SyncError> {
        match self.shape(id)? {
            NodeShape::Value => self.set_value_state(id, state),
            NodeShape::Versioned => self.set_versioned_state(id, state),
            NodeShape::Object => self.set_object_state(id, state),
            NodeShape::Dictionary => self.apply_dictionary(id, state, ApplyMode::State),
            NodeShape::Deleted => Ok(()),
        }
    }

    /// Destructive read: the minimal delta since the last call, with the
    /// reported dirty bits cleared. Returns `{}` when nothing changed.
    ///
    /// Tombstones reported by a dictionary are committed here: the key is
    /// physically removed once the delta announcing its removal exists.
    pub fn take_changes(&mut self, id: NodeId) -> Result<State, SyncError> {
        let node = self.node(id)?;
        if !node.is_dirty() {
            return Ok(State::empty());
        }
        match node.shape() {
            NodeShape::Value | NodeShape::Versioned => self.take_leaf_changes(id),
            NodeShape::Object | NodeShape::Dictionary => self.take_composite_changes(id),
            NodeShape::Deleted => Ok(State::deleted()),
        }
    }

    /// Apply a delta from the remote peer. Never marks anything dirty.
    ///
    /// The empty delta is a no-op.
    pub fn set_changes(&mut self, id: NodeId, delta: &State) -> Result<(), SyncError> {
        if delta.is_empty() {
            self.node(id)?;
            return Ok(());
        }
        match self.shape(id)? {
            NodeShape::Value => self.set_value_changes(id, delta),
            NodeShape::Versioned => self.set_versioned_changes(id, delta),
            NodeShape::Object => self.set_object_changes(id, delta),
            NodeShape::Dictionary => self.apply_dictionary(id, delta, ApplyMode::Changes),
            NodeShape::Deleted => Ok(()),
        }
    }

    fn take_composite_changes(&mut self, id: NodeId) -> Result<State, SyncError> {
        let entries = self.node(id)?.entries();
        let mut properties = Properties::new();
        let mut committed = Vec::new();
        for (key, child) in entries {
            if !self.node(child)?.is_dirty() {
                continue;
            }
            if self.is_tombstone(child) {
                committed.push(key.clone());
            }
            properties.insert(key, self.take_changes(child)?);
        }
        if !committed.is_empty() {
            self.commit_tombstones(id, &committed)?;
        }

        let node = self.node_mut(id)?;
        let mut delta = State::empty();
        if node.type_dirty {
            delta.type_name = Some(node.type_name.clone());
            delta.properties = Some(Properties::new());
        }
        node.type_dirty = false;
        node.internally_dirty = false;
        if !properties.is_empty() {
            delta.properties = Some(properties);
        }
        Ok(delta)
    }
}

fn resolve_kind(type_name: &str) -> Result<NodeKind, SyncError> {
    NodeKind::of(type_name).ok_or_else(|| SyncError::UnknownType(type_name.to_string()))
}

fn expect_composite(type_name: &str) -> Result<(), SyncError> {
    match resolve_kind(type_name)? {
        NodeKind::Object => Ok(()),
        _ => Err(SyncError::UnknownType(format!("{type_name} is not a composite type"))),
    }
}
