//! Type-tag taxonomy.
//!
//! Every node carries a type string such as `"Object.World"`, `"Value"` or
//! `"Versioned.transform"`. The segment before the first `.` selects one of a
//! closed set of node kinds; the remainder is free-form and only matters to
//! whoever registered the type.

use std::fmt;

/// Type tag carried by a tombstone.
pub const DELETED: &str = "Deleted";

/// The closed set of node kinds a type tag can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Composite node owning named children (fixed or dynamic schema).
    Object,
    /// Leaf holding one opaque value.
    Value,
    /// Leaf holding one opaque value plus a version counter.
    Versioned,
    /// Tombstone: "this key was removed".
    Deleted,
}

impl NodeKind {
    /// Resolve a type tag to its kind.
    ///
    /// Returns `None` for tags outside the taxonomy.
    ///
    /// ```
    /// use tool_sync_wire::NodeKind;
    ///
    /// assert_eq!(NodeKind::of("Object.World"), Some(NodeKind::Object));
    /// assert_eq!(NodeKind::of("Value"), Some(NodeKind::Value));
    /// assert_eq!(NodeKind::of("Deleted"), Some(NodeKind::Deleted));
    /// assert_eq!(NodeKind::of("Valueish"), None);
    /// ```
    pub fn of(type_name: &str) -> Option<NodeKind> {
        if type_name == DELETED {
            return Some(NodeKind::Deleted);
        }
        let prefix = type_name.split_once('.').map_or(type_name, |(head, _)| head);
        match prefix {
            "Object" => Some(NodeKind::Object),
            "Value" => Some(NodeKind::Value),
            "Versioned" => Some(NodeKind::Versioned),
            _ => None,
        }
    }

    /// The tag prefix for this kind (`"Deleted"` is a full tag, not a prefix).
    pub fn prefix(self) -> &'static str {
        match self {
            NodeKind::Object => "Object",
            NodeKind::Value => "Value",
            NodeKind::Versioned => "Versioned",
            NodeKind::Deleted => DELETED,
        }
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, NodeKind::Value | NodeKind::Versioned)
    }

    pub fn is_composite(self) -> bool {
        self == NodeKind::Object
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}
