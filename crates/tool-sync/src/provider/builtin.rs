use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tool_sync_wire::State;

use crate::error::SyncError;
use crate::tree::{NodeId, NodeTree};

use super::{ApplyMode, ApplyStep, DictionaryProvider, ObjectSchema};

// ── Fixed schema ─────────────────────────────────────────────────────────

/// Declarative fixed schema: a list of keys with their initial state.
///
/// ```
/// use std::rc::Rc;
/// use serde_json::json;
/// use tool_sync::{FixedSchema, NodeTree, TypeRegistry};
/// use tool_sync_wire::State;
///
/// let mut registry = TypeRegistry::new();
/// let transform = FixedSchema::new()
///     .property("position", State::value("Value.vec3", json!([0, 0, 0])))
///     .property("visible", State::versioned("Versioned", json!(true), 0));
/// registry.register_object("Object.Transform", move || Box::new(transform.clone())).unwrap();
///
/// let mut tree = NodeTree::new(Rc::new(registry));
/// let node = tree.create("Object.Transform").unwrap();
/// assert_eq!(tree.state(node).unwrap().property_count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FixedSchema {
    properties: Vec<(String, State)>,
}

impl FixedSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, key: impl Into<String>, initial: State) -> Self {
        self.properties.push((key.into(), initial));
        self
    }
}

impl ObjectSchema for FixedSchema {
    fn properties(
        &mut self,
        tree: &mut NodeTree,
        _owner: NodeId,
    ) -> Result<IndexMap<String, NodeId>, SyncError> {
        let mut built = IndexMap::with_capacity(self.properties.len());
        for (key, initial) in &self.properties {
            match tree.materialize(initial) {
                Ok(child) => {
                    if let Some(duplicate) = built.insert(key.clone(), child) {
                        tree.remove(duplicate)?;
                    }
                }
                Err(err) => {
                    for child in built.values() {
                        tree.remove(*child)?;
                    }
                    return Err(err);
                }
            }
        }
        Ok(built)
    }
}

// ── Dynamic providers ────────────────────────────────────────────────────

/// Accepts any type the tree's registry can build and approves every delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicProvider;

impl DictionaryProvider for DynamicProvider {
    fn create(
        &mut self,
        tree: &mut NodeTree,
        _key: &str,
        state: &State,
    ) -> Result<Option<NodeId>, SyncError> {
        let type_name = state.type_name.as_deref().ok_or(SyncError::MissingField("type"))?;
        tree.create(type_name).map(Some)
    }

    fn cast(
        &mut self,
        tree: &mut NodeTree,
        key: &str,
        _current: NodeId,
        state: &State,
    ) -> Result<Option<NodeId>, SyncError> {
        self.create(tree, key, state)
    }
}

/// Collection of one child type.
///
/// Entries of any other type are rejected with [`SyncError::UnknownType`],
/// casts with [`SyncError::CapabilityUnsupported`]. An append-only collection
/// also refuses deletes.
#[derive(Debug, Clone)]
pub struct SingleTypeProvider {
    type_name: String,
    append_only: bool,
}

impl SingleTypeProvider {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), append_only: false }
    }

    pub fn append_only(mut self) -> Self {
        self.append_only = true;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl DictionaryProvider for SingleTypeProvider {
    fn create(
        &mut self,
        tree: &mut NodeTree,
        key: &str,
        state: &State,
    ) -> Result<Option<NodeId>, SyncError> {
        match state.type_name.as_deref() {
            Some(type_name) if type_name == self.type_name => tree.create(type_name).map(Some),
            Some(other) => Err(SyncError::UnknownType(format!(
                "{other} for `{key}` in a collection of {}",
                self.type_name
            ))),
            None => Err(SyncError::MissingField("type")),
        }
    }

    fn cast(
        &mut self,
        _tree: &mut NodeTree,
        key: &str,
        _current: NodeId,
        _state: &State,
    ) -> Result<Option<NodeId>, SyncError> {
        Err(SyncError::CapabilityUnsupported(format!(
            "can't cast `{key}` in a collection of {}",
            self.type_name
        )))
    }

    fn can_delete(&self, _tree: &NodeTree, _key: &str, _current: NodeId) -> bool {
        !self.append_only
    }
}

// ── Observation ──────────────────────────────────────────────────────────

/// One accepted snapshot or delta, as seen by a dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub owner: NodeId,
    pub delta: State,
    pub mode: ApplyMode,
}

type Listener = Box<dyn FnMut(&ChangeEvent)>;

#[derive(Default)]
struct FeedInner {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
    emitting: bool,
    removed_while_emitting: Vec<u64>,
}

/// Listener list shared between an [`ObservedProvider`] and domain code.
///
/// Clones share the same list.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    inner: Rc<RefCell<FeedInner>>,
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ChangeFeed")
            .field("listeners", &inner.listeners.len())
            .field("emitting", &inner.emitting)
            .finish()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns the id to pass to [`off_change`](Self::off_change).
    pub fn on_change(&self, listener: impl FnMut(&ChangeEvent) + 'static) -> u64 {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns `false` when no listener had this id.
    pub fn off_change(&self, id: u64) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.listeners.len();
        inner.listeners.retain(|(listener_id, _)| *listener_id != id);
        if inner.listeners.len() != before {
            return true;
        }
        if inner.emitting && id <= inner.next_id && !inner.removed_while_emitting.contains(&id) {
            inner.removed_while_emitting.push(id);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listeners may register or remove listeners from inside the callback.
    pub fn emit(&self, event: &ChangeEvent) {
        let mut running = {
            let mut inner = self.inner.borrow_mut();
            inner.emitting = true;
            std::mem::take(&mut inner.listeners)
        };
        for (id, listener) in running.iter_mut() {
            if self.inner.borrow().removed_while_emitting.contains(id) {
                continue;
            }
            listener(event);
        }
        let mut inner = self.inner.borrow_mut();
        let removed = std::mem::take(&mut inner.removed_while_emitting);
        running.retain(|(id, _)| !removed.contains(id));
        running.append(&mut inner.listeners);
        inner.listeners = running;
        inner.emitting = false;
    }
}

/// Wraps a provider and publishes every accepted snapshot or delta on a
/// [`ChangeFeed`] once it has been applied.
#[derive(Debug)]
pub struct ObservedProvider<P> {
    inner: P,
    feed: ChangeFeed,
}

impl<P: DictionaryProvider> ObservedProvider<P> {
    pub fn new(inner: P, feed: ChangeFeed) -> Self {
        Self { inner, feed }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

impl<P: DictionaryProvider> DictionaryProvider for ObservedProvider<P> {
    fn create(
        &mut self,
        tree: &mut NodeTree,
        key: &str,
        state: &State,
    ) -> Result<Option<NodeId>, SyncError> {
        self.inner.create(tree, key, state)
    }

    fn cast(
        &mut self,
        tree: &mut NodeTree,
        key: &str,
        current: NodeId,
        state: &State,
    ) -> Result<Option<NodeId>, SyncError> {
        self.inner.cast(tree, key, current, state)
    }

    fn can_delete(&self, tree: &NodeTree, key: &str, current: NodeId) -> bool {
        self.inner.can_delete(tree, key, current)
    }

    fn apply_changes(&mut self, step: ApplyStep<'_>) -> Result<(), SyncError> {
        let event = ChangeEvent {
            owner: step.owner(),
            delta: step.delta().clone(),
            mode: step.mode(),
        };
        self.inner.apply_changes(step)?;
        self.feed.emit(&event);
        Ok(())
    }
}
