//! Engine error type.

use crate::channel::ChannelError;
use crate::tree::{NodeId, NodeShape};

/// Errors raised synchronously by node, provider and socket operations.
///
/// A composite applying a multi-key delta is not atomic: when key N fails,
/// keys before N have already been applied.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A fixed-schema composite was asked to add, remove or retype a property.
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    /// A type tag nobody registered, or outside the tag taxonomy.
    #[error("unknown type: {0}")]
    UnknownType(String),
    /// A creation record or versioned delta lacks a required field.
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// A provider does not support the requested cast or delete.
    #[error("capability unsupported: {0}")]
    CapabilityUnsupported(String),
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("expected {expected} node, found {found}")]
    WrongKind { expected: NodeShape, found: NodeShape },
    /// The node to attach already has a parent.
    #[error("node {0} is already attached")]
    AlreadyAttached(NodeId),
    /// Attaching the node would make it its own ancestor.
    #[error("attaching node {0} would create a cycle")]
    Cycle(NodeId),
    /// A dictionary's provider was entered while it was already applying a delta.
    #[error("dictionary {0} re-entered while applying a delta")]
    Reentrant(NodeId),
    /// A versioned leaf's counter cannot be incremented any further.
    #[error("version counter of node {0} is exhausted")]
    VersionExhausted(NodeId),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
