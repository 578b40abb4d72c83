//! Leaf value nodes and versioned leaves.
//!
//! A plain leaf is dirty whenever its value is replaced locally. A versioned
//! leaf additionally bumps a counter on every local write, and only accepts a
//! remote delta whose version is newer than its own: last writer wins by
//! explicit counter, not by wall-clock time.

use serde_json::Value;
use tool_sync_wire::State;
use tracing::trace;

use crate::error::SyncError;
use crate::store::ValueStore;

use super::{Body, NodeId, NodeShape, NodeTree, TiePolicy};

/// Version of a versioned leaf that was never written.
pub const UNSET_VERSION: i64 = -1;

#[derive(Debug)]
pub(crate) struct ValueNode {
    pub(crate) store: Box<dyn ValueStore>,
}

impl ValueNode {
    pub(crate) fn new(store: Box<dyn ValueStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug)]
pub(crate) struct VersionedNode {
    pub(crate) store: Box<dyn ValueStore>,
    pub(crate) version: i64,
}

impl VersionedNode {
    pub(crate) fn new(store: Box<dyn ValueStore>) -> Self {
        Self { store, version: UNSET_VERSION }
    }
}

impl NodeTree {
    /// Build a detached plain leaf holding `value`.
    pub fn create_value(&mut self, type_name: &str, value: Value) -> Result<NodeId, SyncError> {
        let id = self.create(type_name)?;
        let node = self.node_mut(id)?;
        if let Body::Value(leaf) = &mut node.body {
            leaf.store.set(value);
            return Ok(id);
        }
        let found = node.shape();
        self.free(id);
        Err(SyncError::WrongKind { expected: NodeShape::Value, found })
    }

    /// Build a detached versioned leaf holding `value` at [`UNSET_VERSION`].
    pub fn create_versioned(&mut self, type_name: &str, value: Value) -> Result<NodeId, SyncError> {
        let id = self.create(type_name)?;
        let node = self.node_mut(id)?;
        if let Body::Versioned(leaf) = &mut node.body {
            leaf.store.set(value);
            return Ok(id);
        }
        let found = node.shape();
        self.free(id);
        Err(SyncError::WrongKind { expected: NodeShape::Versioned, found })
    }

    /// Current value of a plain or versioned leaf.
    pub fn value(&self, id: NodeId) -> Result<Value, SyncError> {
        let node = self.node(id)?;
        match &node.body {
            Body::Value(leaf) => Ok(leaf.store.get()),
            Body::Versioned(leaf) => Ok(leaf.store.get()),
            _ => Err(SyncError::WrongKind { expected: NodeShape::Value, found: node.shape() }),
        }
    }

    /// Replace a leaf's value and mark it dirty.
    ///
    /// On a versioned leaf this also increments the version, and fails with
    /// [`SyncError::VersionExhausted`] once the counter sits at `i64::MAX`.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> Result<(), SyncError> {
        let node = self.node_mut(id)?;
        let found = node.shape();
        match &mut node.body {
            Body::Value(leaf) => leaf.store.set(value),
            Body::Versioned(leaf) => {
                leaf.version = leaf
                    .version
                    .checked_add(1)
                    .ok_or(SyncError::VersionExhausted(id))?;
                leaf.store.set(value);
            }
            _ => return Err(SyncError::WrongKind { expected: NodeShape::Value, found }),
        }
        self.propagate(Some(id));
        Ok(())
    }

    /// Version counter of a versioned leaf.
    pub fn version(&self, id: NodeId) -> Result<i64, SyncError> {
        let node = self.node(id)?;
        match &node.body {
            Body::Versioned(leaf) => Ok(leaf.version),
            _ => Err(SyncError::WrongKind { expected: NodeShape::Versioned, found: node.shape() }),
        }
    }

    pub(super) fn take_leaf_changes(&mut self, id: NodeId) -> Result<State, SyncError> {
        let node = self.node_mut(id)?;
        let mut delta = State::empty();
        if node.type_dirty {
            delta.type_name = Some(node.type_name.clone());
        }
        if node.internally_dirty {
            match &node.body {
                Body::Value(leaf) => delta.value = Some(leaf.store.get()),
                Body::Versioned(leaf) => {
                    delta.value = Some(leaf.store.get());
                    delta.version = Some(leaf.version);
                }
                _ => {}
            }
        }
        node.type_dirty = false;
        node.internally_dirty = false;
        Ok(delta)
    }

    pub(super) fn set_value_state(&mut self, id: NodeId, state: &State) -> Result<(), SyncError> {
        let value = state.value.clone().ok_or(SyncError::MissingField("value"))?;
        if let Body::Value(leaf) = &mut self.node_mut(id)?.body {
            leaf.store.set(value);
        }
        Ok(())
    }

    pub(super) fn set_value_changes(&mut self, id: NodeId, delta: &State) -> Result<(), SyncError> {
        if let (Some(value), Body::Value(leaf)) = (&delta.value, &mut self.node_mut(id)?.body) {
            leaf.store.set(value.clone());
        }
        Ok(())
    }

    /// Unconditional: adopts the incoming version outright (full resync).
    pub(super) fn set_versioned_state(
        &mut self,
        id: NodeId,
        state: &State,
    ) -> Result<(), SyncError> {
        let value = state.value.clone().ok_or(SyncError::MissingField("value"))?;
        let version = state.version.ok_or(SyncError::MissingField("version"))?;
        if let Body::Versioned(leaf) = &mut self.node_mut(id)?.body {
            leaf.store.set(value);
            leaf.version = version;
        }
        Ok(())
    }

    /// Conditional: applied only when the incoming version is newer.
    pub(super) fn set_versioned_changes(
        &mut self,
        id: NodeId,
        delta: &State,
    ) -> Result<(), SyncError> {
        if delta.value.is_none() && delta.version.is_none() {
            return Ok(());
        }
        let incoming = delta.version.ok_or(SyncError::MissingField("version"))?;
        let ties = self.ties;
        let Body::Versioned(leaf) = &mut self.node_mut(id)?.body else {
            return Ok(());
        };
        let newer = match ties {
            TiePolicy::KeepLocal => incoming > leaf.version,
            TiePolicy::AcceptRemote => incoming >= leaf.version,
        };
        if !newer {
            trace!(node = %id, incoming, local = leaf.version, "dropping stale versioned delta");
            return Ok(());
        }
        let value = delta.value.clone().ok_or(SyncError::MissingField("value"))?;
        leaf.store.set(value);
        leaf.version = incoming;
        Ok(())
    }
}
