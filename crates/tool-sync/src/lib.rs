//! tool-sync: dirty-tracked scene tree synchronization between a tool and
//! the host it renders into.
//!
//! Each peer owns a [`NodeTree`]. Local writes mark nodes dirty;
//! [`NodeTree::take_changes`] turns the dirty part of a subtree into a minimal
//! delta, and the other peer applies it with [`NodeTree::set_changes`]. The
//! initial snapshot, the deltas and the `get` that asks for a snapshot travel
//! as [`tool_sync_wire::WireMessage`]s through a [`MessageChannel`], driven by
//! a [`ToolSocket`].
//!
//! Composite nodes come in two flavors, chosen by how their type is
//! registered in the [`TypeRegistry`]: fixed-schema objects whose key set
//! never changes, and dynamic-schema dictionaries whose children are created,
//! cast and deleted by a [`DictionaryProvider`].

pub mod channel;
pub mod config;
pub mod error;
pub mod provider;
pub mod registry;
pub mod socket;
pub mod store;
pub mod tree;

pub use channel::{ChannelError, MemoryChannel, MessageChannel};
pub use config::{ConfigError, SocketConfig};
pub use error::SyncError;
pub use provider::{
    ApplyMode, ApplyStep, AsDictionaryProvider, ChangeEvent, ChangeFeed, DictionaryProvider,
    DynamicProvider, FixedSchema, ObjectSchema, ObservedProvider, SingleTypeProvider,
};
pub use registry::{Constructor, TypeRegistry};
pub use socket::{Handled, Phase, Role, ToolSocket};
pub use store::{LocalValue, SharedValue, ValueStore};
pub use tree::leaf::UNSET_VERSION;
pub use tree::{NodeId, NodeShape, NodeTree, TiePolicy, TreeStats};
