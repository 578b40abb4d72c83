//! Snapshot and delta records.
//!
//! A single record shape serves both purposes:
//!
//! ```json
//! { "type": "Object.World", "properties": { "x": { "type": "Value", "value": 5 } } }
//! { "type": "Versioned.pose", "value": [0, 1, 0], "version": 3 }
//! { "type": "Deleted" }
//! ```
//!
//! A full snapshot always carries `type`. A delta may omit any field, and the
//! empty delta `{}` means "nothing changed".

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::kind::{NodeKind, DELETED};

/// Child records of a composite, keyed by property name.
pub type Properties = IndexMap<String, State>;

/// Full snapshot or incremental delta of one node and its subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    /// Present-but-null is distinct from absent: `{"value": null}` sets a null.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

/// A delta is a [`State`] whose fields are all optional.
pub type Delta = State;

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl State {
    /// The empty delta `{}`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// `{type}` with nothing else.
    pub fn typed(type_name: impl Into<String>) -> Self {
        Self { type_name: Some(type_name.into()), ..Self::default() }
    }

    /// `{type, value}`: a plain leaf snapshot.
    pub fn value(type_name: impl Into<String>, value: Value) -> Self {
        Self { type_name: Some(type_name.into()), value: Some(value), ..Self::default() }
    }

    /// `{type, value, version}`: a versioned leaf snapshot.
    pub fn versioned(type_name: impl Into<String>, value: Value, version: i64) -> Self {
        Self {
            type_name: Some(type_name.into()),
            value: Some(value),
            version: Some(version),
            ..Self::default()
        }
    }

    /// `{type, properties}`: a composite snapshot.
    pub fn composite(type_name: impl Into<String>, properties: Properties) -> Self {
        Self {
            type_name: Some(type_name.into()),
            properties: Some(properties),
            ..Self::default()
        }
    }

    /// `{type: "Deleted"}`.
    pub fn deleted() -> Self {
        Self::typed(DELETED)
    }

    /// Builder-style insertion of one child record.
    pub fn with_property(mut self, key: impl Into<String>, child: State) -> Self {
        self.properties.get_or_insert_with(Properties::new).insert(key.into(), child);
        self
    }

    /// `true` for `{}`: no type, no properties, no value, no version.
    ///
    /// A record with an empty `properties` map is *not* empty; it still says
    /// "this composite has no children", which matters for snapshots.
    pub fn is_empty(&self) -> bool {
        self.type_name.is_none()
            && self.properties.is_none()
            && self.value.is_none()
            && self.version.is_none()
    }

    pub fn is_tombstone(&self) -> bool {
        self.type_name.as_deref() == Some(DELETED)
    }

    /// Kind of the carried type tag, if there is a tag and it resolves.
    pub fn kind(&self) -> Option<NodeKind> {
        self.type_name.as_deref().and_then(NodeKind::of)
    }

    /// Child record for `key`, if this record lists one.
    pub fn property(&self, key: &str) -> Option<&State> {
        self.properties.as_ref().and_then(|props| props.get(key))
    }

    /// Number of child records carried (zero when `properties` is absent).
    pub fn property_count(&self) -> usize {
        self.properties.as_ref().map_or(0, IndexMap::len)
    }

    /// Convert to a plain JSON value.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse from a plain JSON value.
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        State::deserialize(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_delta_serializes_to_empty_object() {
        assert_eq!(State::empty().to_json(), json!({}));
        assert!(State::from_json(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn null_value_is_present() {
        let state = State::from_json(&json!({"type": "Value", "value": null})).unwrap();
        assert_eq!(state.value, Some(Value::Null));
        assert_eq!(state.to_json(), json!({"type": "Value", "value": null}));
    }

    #[test]
    fn absent_value_stays_absent() {
        let state = State::from_json(&json!({"type": "Value"})).unwrap();
        assert_eq!(state.value, None);
        assert!(!state.is_empty());
    }

    #[test]
    fn composite_keeps_property_order() {
        let state = State::typed("Object.World")
            .with_property("b", State::value("Value", json!(2)))
            .with_property("a", State::deleted());
        let text = serde_json::to_string(&state).unwrap();
        assert_eq!(
            text,
            r#"{"type":"Object.World","properties":{"b":{"type":"Value","value":2},"a":{"type":"Deleted"}}}"#
        );
        assert!(state.property("a").unwrap().is_tombstone());
        assert_eq!(state.property_count(), 2);
    }

    #[test]
    fn empty_properties_is_not_an_empty_delta() {
        let state = State::from_json(&json!({"properties": {}})).unwrap();
        assert!(!state.is_empty());
        assert_eq!(state.property_count(), 0);
    }

    #[test]
    fn versioned_round_trips_through_json() {
        let state = State::versioned("Versioned.pose", json!([0, 1, 0]), 3);
        let back = State::from_json(&state.to_json()).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.kind(), Some(NodeKind::Versioned));
    }
}
