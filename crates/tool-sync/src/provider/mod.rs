//! Domain hooks injected into composites.
//!
//! A composite never decides on its own what its children are. A fixed-schema
//! composite asks an [`ObjectSchema`] once, at construction; a dynamic-schema
//! composite consults its [`DictionaryProvider`] every time a snapshot or delta
//! introduces, retypes or removes a key.

mod builtin;

pub use builtin::{
    ChangeEvent, ChangeFeed, DynamicProvider, FixedSchema, ObservedProvider, SingleTypeProvider,
};

use indexmap::IndexMap;
use tool_sync_wire::State;

use crate::error::SyncError;
use crate::tree::dictionary::apply_entries;
use crate::tree::{NodeId, NodeTree};

/// Supplies the complete child map of a fixed-schema composite.
pub trait ObjectSchema {
    /// Called exactly once, while `owner` is being built. Every returned child
    /// must be detached; the composite adopts them all.
    fn properties(
        &mut self,
        tree: &mut NodeTree,
        owner: NodeId,
    ) -> Result<IndexMap<String, NodeId>, SyncError>;
}

impl<F> ObjectSchema for F
where
    F: FnMut(&mut NodeTree, NodeId) -> Result<IndexMap<String, NodeId>, SyncError>,
{
    fn properties(
        &mut self,
        tree: &mut NodeTree,
        owner: NodeId,
    ) -> Result<IndexMap<String, NodeId>, SyncError> {
        self(tree, owner)
    }
}

/// Whether a dictionary is being overwritten from a snapshot or patched by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    State,
    Changes,
}

/// Upcast to `dyn DictionaryProvider`, implemented for every sized provider.
pub trait AsDictionaryProvider {
    fn as_provider_mut(&mut self) -> &mut dyn DictionaryProvider;
}

impl<P: DictionaryProvider> AsDictionaryProvider for P {
    fn as_provider_mut(&mut self) -> &mut dyn DictionaryProvider {
        self
    }
}

/// Run-time schema of a dynamic-schema composite.
///
/// `create` and `cast` return `Ok(None)` to decline silently (the key is left
/// as it was) and `Err` to abort the delta being applied.
pub trait DictionaryProvider: AsDictionaryProvider {
    /// Build a detached node for a key the dictionary does not have yet.
    /// The dictionary calls `set_state(child, state)` on the result.
    fn create(
        &mut self,
        tree: &mut NodeTree,
        key: &str,
        state: &State,
    ) -> Result<Option<NodeId>, SyncError>;

    /// Build a replacement for `current`, whose type differs from `state`'s.
    /// Returning `current` itself keeps the node and just applies `state` to it.
    fn cast(
        &mut self,
        tree: &mut NodeTree,
        key: &str,
        current: NodeId,
        state: &State,
    ) -> Result<Option<NodeId>, SyncError>;

    /// Consulted for both remote tombstones and local deletes.
    fn can_delete(&self, _tree: &NodeTree, _key: &str, _current: NodeId) -> bool {
        true
    }

    /// Interception point around every accepted snapshot or delta.
    fn apply_changes(&mut self, step: ApplyStep<'_>) -> Result<(), SyncError> {
        step.run(self.as_provider_mut())
    }
}

/// One pending application of a snapshot or delta to a dictionary.
pub struct ApplyStep<'a> {
    tree: &'a mut NodeTree,
    owner: NodeId,
    delta: &'a State,
    mode: ApplyMode,
}

impl<'a> ApplyStep<'a> {
    pub(crate) fn new(
        tree: &'a mut NodeTree,
        owner: NodeId,
        delta: &'a State,
        mode: ApplyMode,
    ) -> Self {
        Self { tree, owner, delta, mode }
    }

    /// The dictionary being updated.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// In [`ApplyMode::State`] this already includes the synthesized
    /// tombstones for keys missing from the snapshot.
    pub fn delta(&self) -> &'a State {
        self.delta
    }

    pub fn mode(&self) -> ApplyMode {
        self.mode
    }

    pub fn tree(&mut self) -> &mut NodeTree {
        self.tree
    }

    /// The default per-key application, with `provider` answering
    /// create/cast/delete questions.
    pub fn run(self, provider: &mut dyn DictionaryProvider) -> Result<(), SyncError> {
        apply_entries(self.tree, self.owner, self.delta, self.mode, provider)
    }
}
