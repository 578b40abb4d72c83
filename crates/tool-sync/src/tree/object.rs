//! Fixed-schema composites.
//!
//! The key set is decided once, when the [`ObjectSchema`](crate::provider::ObjectSchema)
//! hands over the properties. Afterwards only existing children may change:
//! a snapshot or delta that adds, removes or retypes a key is a
//! [`SyncError::SchemaViolation`].

use indexmap::IndexMap;
use tool_sync_wire::{Properties, State};

use crate::error::SyncError;

use super::{Body, NodeId, NodeShape, NodeTree};

#[derive(Debug, Default)]
pub(crate) struct ObjectNode {
    pub(crate) properties: IndexMap<String, NodeId>,
}

impl NodeTree {
    /// Property of a fixed-schema composite.
    pub fn object_get(&self, id: NodeId, key: &str) -> Result<Option<NodeId>, SyncError> {
        Ok(self.object(id)?.properties.get(key).copied())
    }

    /// Property keys of a fixed-schema composite, in schema order.
    pub fn object_keys(&self, id: NodeId) -> Result<impl Iterator<Item = &str> + '_, SyncError> {
        Ok(self.object(id)?.properties.keys().map(String::as_str))
    }

    fn object(&self, id: NodeId) -> Result<&ObjectNode, SyncError> {
        let node = self.node(id)?;
        match &node.body {
            Body::Object(obj) => Ok(obj),
            _ => Err(SyncError::WrongKind { expected: NodeShape::Object, found: node.shape() }),
        }
    }

    /// Every existing key must be present, no key may be added, no type may change.
    /// The whole key set is checked before any child is touched.
    pub(super) fn set_object_state(&mut self, id: NodeId, state: &State) -> Result<(), SyncError> {
        let no_properties = Properties::new();
        let incoming = state.properties.as_ref().unwrap_or(&no_properties);
        let owner_type = self.node_type(id)?.to_string();
        let properties = self.object(id)?.properties.clone();

        if let Some(missing) = properties.keys().find(|key| !incoming.contains_key(*key)) {
            return Err(SyncError::SchemaViolation(format!(
                "{owner_type}: can't remove property `{missing}`"
            )));
        }
        let mut targets = Vec::with_capacity(incoming.len());
        for (key, entry) in incoming {
            targets.push((self.object_target(&owner_type, &properties, key, entry)?, entry));
        }
        for (child, entry) in targets {
            self.set_state(child, entry)?;
        }
        Ok(())
    }

    pub(super) fn set_object_changes(
        &mut self,
        id: NodeId,
        delta: &State,
    ) -> Result<(), SyncError> {
        let Some(incoming) = delta.properties.as_ref() else {
            return Ok(());
        };
        let owner_type = self.node_type(id)?.to_string();
        let properties = self.object(id)?.properties.clone();
        for (key, entry) in incoming {
            let child = self.object_target(&owner_type, &properties, key, entry)?;
            self.set_changes(child, entry)?;
        }
        Ok(())
    }

    fn object_target(
        &self,
        owner_type: &str,
        properties: &IndexMap<String, NodeId>,
        key: &str,
        entry: &State,
    ) -> Result<NodeId, SyncError> {
        let Some(&child) = properties.get(key) else {
            return Err(SyncError::SchemaViolation(format!(
                "{owner_type}: can't add property `{key}`"
            )));
        };
        if let Some(incoming_type) = entry.type_name.as_deref() {
            let current_type = self.node_type(child)?;
            if entry.is_tombstone() {
                return Err(SyncError::SchemaViolation(format!(
                    "{owner_type}: can't remove property `{key}`"
                )));
            }
            if incoming_type != current_type {
                return Err(SyncError::SchemaViolation(format!(
                    "{owner_type}: can't change property type of `{key}` from {current_type} to {incoming_type}"
                )));
            }
        }
        Ok(child)
    }
}
