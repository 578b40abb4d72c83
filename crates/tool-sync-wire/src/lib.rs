//! Wire format shared by the two peers of a tool scene tree.
//!
//! Neither peer ever holds a reference to the other's nodes; all they share is
//! what this crate describes:
//!
//! - [`State`]: full snapshot or incremental delta of a node subtree
//! - [`WireMessage`]: the `ToolRendererV1` envelope (`get` / `set` / `update`)
//! - [`NodeKind`]: the closed taxonomy behind type tags
//! - [`codec`]: JSON encode/decode with command/delta validation
//!
//! # Example
//!
//! ```
//! use tool_sync_wire::{codec, State, WireMessage};
//! use serde_json::json;
//!
//! let snapshot = State::typed("Object.World")
//!     .with_property("x", State::value("Value", json!(5)));
//! let text = codec::encode_string(&WireMessage::set("t1", snapshot.clone()));
//!
//! let back = codec::decode_str(&text).unwrap();
//! assert_eq!(back.delta, Some(snapshot));
//! ```

pub mod codec;
pub mod kind;
pub mod message;
pub mod state;

pub use codec::DecodeError;
pub use kind::{NodeKind, DELETED};
pub use message::{Command, WireMessage, PROTOCOL};
pub use state::{Delta, Properties, State};
