//! Type-name to constructor mapping.
//!
//! Leaf tags (`Value*`, `Versioned*`) never need registering. Composite tags
//! must be registered, and the registration decides whether the composite has
//! a fixed or a dynamic schema.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tool_sync_wire::NodeKind;

use crate::error::SyncError;
use crate::provider::{DictionaryProvider, DynamicProvider, ObjectSchema};
use crate::store::{LocalValue, ValueStore};

type SchemaFactory = Rc<dyn Fn() -> Box<dyn ObjectSchema>>;
type ProviderFactory = Rc<dyn Fn() -> Box<dyn DictionaryProvider>>;
type StoreFactory = Rc<dyn Fn() -> Box<dyn ValueStore>>;

/// How to build a registered composite type.
#[derive(Clone)]
pub enum Constructor {
    Fixed(SchemaFactory),
    Dynamic(ProviderFactory),
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constructor::Fixed(_) => f.write_str("Fixed"),
            Constructor::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

#[derive(Default)]
pub struct TypeRegistry {
    composites: HashMap<String, Constructor>,
    stores: HashMap<String, StoreFactory>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut composites: Vec<_> = self.composites.keys().collect();
        composites.sort();
        let mut stores: Vec<_> = self.stores.keys().collect();
        stores.sort();
        f.debug_struct("TypeRegistry")
            .field("composites", &composites)
            .field("stores", &stores)
            .finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixed-schema composite. A later registration of the same
    /// type replaces the earlier one.
    pub fn register_object<F>(&mut self, type_name: &str, factory: F) -> Result<(), SyncError>
    where
        F: Fn() -> Box<dyn ObjectSchema> + 'static,
    {
        check_kind(type_name, NodeKind::Object)?;
        self.composites.insert(type_name.to_string(), Constructor::Fixed(Rc::new(factory)));
        Ok(())
    }

    /// Register a dynamic-schema composite with its provider factory.
    pub fn register_dictionary<F>(&mut self, type_name: &str, factory: F) -> Result<(), SyncError>
    where
        F: Fn() -> Box<dyn DictionaryProvider> + 'static,
    {
        check_kind(type_name, NodeKind::Object)?;
        self.composites.insert(type_name.to_string(), Constructor::Dynamic(Rc::new(factory)));
        Ok(())
    }

    /// Register a dynamic-schema composite that accepts any registered child type.
    pub fn register_dynamic(&mut self, type_name: &str) -> Result<(), SyncError> {
        self.register_dictionary(type_name, || Box::new(DynamicProvider))
    }

    /// Give a leaf type its own value storage.
    pub fn register_store<F>(&mut self, type_name: &str, factory: F) -> Result<(), SyncError>
    where
        F: Fn() -> Box<dyn ValueStore> + 'static,
    {
        match NodeKind::of(type_name) {
            Some(kind) if kind.is_leaf() => {
                self.stores.insert(type_name.to_string(), Rc::new(factory));
                Ok(())
            }
            _ => Err(SyncError::UnknownType(format!("{type_name} is not a leaf type"))),
        }
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.composites.contains_key(type_name)
    }

    pub fn constructor(&self, type_name: &str) -> Result<Constructor, SyncError> {
        self.composites
            .get(type_name)
            .cloned()
            .ok_or_else(|| SyncError::UnknownType(type_name.to_string()))
    }

    /// Storage for a new leaf of `type_name`; a [`LocalValue`] unless a store
    /// was registered.
    pub fn store(&self, type_name: &str) -> Box<dyn ValueStore> {
        match self.stores.get(type_name) {
            Some(factory) => factory(),
            None => Box::new(LocalValue::default()),
        }
    }
}

fn check_kind(type_name: &str, expected: NodeKind) -> Result<(), SyncError> {
    match NodeKind::of(type_name) {
        Some(kind) if kind == expected => Ok(()),
        _ => Err(SyncError::UnknownType(format!(
            "{type_name} is not an {expected} type"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SharedValue;
    use crate::tree::{NodeShape, NodeTree};
    use serde_json::json;

    #[test]
    fn registration_decides_composite_flavor() {
        let mut registry = TypeRegistry::new();
        registry.register_dynamic("Object.Scene").unwrap();
        registry
            .register_object("Object.Empty", || Box::new(crate::provider::FixedSchema::new()))
            .unwrap();
        let mut tree = NodeTree::new(Rc::new(registry));
        let scene = tree.create("Object.Scene").unwrap();
        let empty = tree.create("Object.Empty").unwrap();
        assert_eq!(tree.shape(scene).unwrap(), NodeShape::Dictionary);
        assert_eq!(tree.shape(empty).unwrap(), NodeShape::Object);
    }

    #[test]
    fn registrations_are_checked_against_the_tag_taxonomy() {
        let mut registry = TypeRegistry::new();
        assert!(registry.register_dynamic("Value.list").is_err());
        assert!(registry.register_dynamic("Deleted").is_err());
        assert!(registry
            .register_store("Object.Scene", || Box::new(LocalValue::default()))
            .is_err());
    }

    #[test]
    fn registered_store_backs_new_leaves() {
        let shared = SharedValue::new(json!("seed"));
        let handle = shared.clone();
        let mut registry = TypeRegistry::new();
        registry.register_store("Value.title", move || Box::new(handle.clone())).unwrap();
        let mut tree = NodeTree::new(Rc::new(registry));

        let title = tree.create("Value.title").unwrap();
        assert_eq!(tree.value(title).unwrap(), json!("seed"));
        tree.set_value(title, json!("renamed")).unwrap();
        assert_eq!(shared.snapshot(), json!("renamed"));
    }
}
