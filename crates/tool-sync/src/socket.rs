//! `ToolRendererV1` protocol endpoint.
//!
//! One [`ToolSocket`] binds a tool id, a [`NodeTree`] and one channel
//! endpoint. The requester opens the handshake with `get` and becomes live on
//! the first `set`; the responder owns the authoritative root from the start
//! and answers `get` with a full snapshot. Once live, both sides flush their
//! local changes as `update` on every [`tick`](ToolSocket::tick).
//!
//! ```
//! use std::rc::Rc;
//! use serde_json::json;
//! use tool_sync::{MemoryChannel, NodeTree, SocketConfig, ToolSocket, TypeRegistry};
//!
//! let mut registry = TypeRegistry::new();
//! registry.register_dynamic("Object.World").unwrap();
//! let registry = Rc::new(registry);
//!
//! let (tool_end, host_end) = MemoryChannel::pair();
//! let mut host_tree = NodeTree::new(Rc::clone(&registry));
//! let world = host_tree.create("Object.World").unwrap();
//! let config = SocketConfig::new("t1");
//! let mut host = ToolSocket::responder(config.clone(), host_tree, world, host_end).unwrap();
//! let mut tool = ToolSocket::requester(config, NodeTree::new(registry), tool_end);
//!
//! tool.start().unwrap();
//! host.pump().unwrap();
//! tool.pump().unwrap();
//! assert!(tool.is_live());
//!
//! let root = tool.root().unwrap();
//! let x = tool.tree_mut().create_value("Value", json!(5)).unwrap();
//! tool.tree_mut().dict_set(root, "x", x).unwrap();
//! assert!(tool.tick().unwrap());
//! host.pump().unwrap();
//!
//! let x = host.tree().get(world, "x").unwrap().unwrap();
//! assert_eq!(host.tree().value(x).unwrap(), json!(5));
//! ```

use std::fmt;

use tool_sync_wire::{Command, State, WireMessage};
use tracing::{debug, trace, warn};

use crate::channel::MessageChannel;
use crate::config::SocketConfig;
use crate::error::SyncError;
use crate::tree::{NodeId, NodeTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Asks for the snapshot (the tool side).
    Requester,
    /// Holds the authoritative root and answers `get` (the host side).
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Requester that has not sent `get` yet.
    Idle,
    AwaitingSnapshot,
    Live,
    Released,
}

/// What [`ToolSocket::handle_message`] did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// A snapshot or delta was applied to the tree.
    Applied,
    /// A `get` was answered with `set`.
    Replied,
    /// Addressed elsewhere, or not acceptable in the current phase.
    Ignored,
}

pub struct ToolSocket<C: MessageChannel> {
    config: SocketConfig,
    role: Role,
    phase: Phase,
    tree: NodeTree,
    root: Option<NodeId>,
    channel: C,
}

impl<C: MessageChannel> fmt::Debug for ToolSocket<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSocket")
            .field("tool_id", &self.config.tool_id)
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl<C: MessageChannel> ToolSocket<C> {
    /// Tool side. Has no root until the first `set` arrives.
    pub fn requester(config: SocketConfig, mut tree: NodeTree, channel: C) -> Self {
        tree.set_tie_policy(config.version_ties);
        Self { config, role: Role::Requester, phase: Phase::Idle, tree, root: None, channel }
    }

    /// Host side, serving `root`. Live immediately.
    pub fn responder(
        config: SocketConfig,
        mut tree: NodeTree,
        root: NodeId,
        channel: C,
    ) -> Result<Self, SyncError> {
        tree.node_type(root)?;
        tree.set_tie_policy(config.version_ties);
        Ok(Self {
            config,
            role: Role::Responder,
            phase: Phase::Live,
            tree,
            root: Some(root),
            channel,
        })
    }

    /// Send the opening `get`. No-op for a responder or a socket already past `Idle`.
    pub fn start(&mut self) -> Result<(), SyncError> {
        if self.role == Role::Responder || self.phase != Phase::Idle {
            return Ok(());
        }
        self.post(WireMessage::get(&self.config.tool_id))?;
        self.phase = Phase::AwaitingSnapshot;
        debug!(tool_id = %self.config.tool_id, "requested snapshot");
        Ok(())
    }

    /// Apply one inbound message.
    ///
    /// Messages for another protocol id or tool id are ignored without error,
    /// so one channel can carry several trees.
    pub fn handle_message(&mut self, message: &WireMessage) -> Result<Handled, SyncError> {
        if self.phase == Phase::Released {
            return Ok(Handled::Ignored);
        }
        if !message.is_addressed_to(&self.config.protocol, &self.config.tool_id) {
            trace!(
                tool_id = %self.config.tool_id,
                protocol = %message.protocol,
                to = %message.tool_id,
                command = %message.command,
                "ignoring message for another tool"
            );
            return Ok(Handled::Ignored);
        }
        match message.command {
            Command::Get => self.answer_get(),
            Command::Set => self.accept_snapshot(message.delta.as_ref()),
            Command::Update => self.accept_update(message.delta.as_ref()),
        }
    }

    fn answer_get(&mut self) -> Result<Handled, SyncError> {
        let Some(root) = self.root else {
            debug!(tool_id = %self.config.tool_id, "no root yet, get left unanswered");
            return Ok(Handled::Ignored);
        };
        let snapshot = self.tree.state(root)?;
        debug!(tool_id = %self.config.tool_id, keys = snapshot.property_count(), "answering get");
        self.post(WireMessage::set(&self.config.tool_id, snapshot))?;
        Ok(Handled::Replied)
    }

    fn accept_snapshot(&mut self, snapshot: Option<&State>) -> Result<Handled, SyncError> {
        if self.role == Role::Responder {
            warn!(tool_id = %self.config.tool_id, "responder ignores set");
            return Ok(Handled::Ignored);
        }
        let snapshot = snapshot.ok_or(SyncError::MissingField("delta"))?;
        let fresh = self.tree.materialize(snapshot)?;
        if let Some(old) = self.root.replace(fresh) {
            self.tree.remove(old)?;
        }
        debug!(
            tool_id = %self.config.tool_id,
            resync = self.phase == Phase::Live,
            keys = snapshot.property_count(),
            "snapshot applied"
        );
        self.phase = Phase::Live;
        Ok(Handled::Applied)
    }

    fn accept_update(&mut self, delta: Option<&State>) -> Result<Handled, SyncError> {
        let (Phase::Live, Some(root)) = (self.phase, self.root) else {
            warn!(
                tool_id = %self.config.tool_id,
                phase = ?self.phase,
                "update before handshake ignored"
            );
            return Ok(Handled::Ignored);
        };
        let delta = delta.ok_or(SyncError::MissingField("delta"))?;
        self.tree.set_changes(root, delta)?;
        trace!(tool_id = %self.config.tool_id, keys = delta.property_count(), "update applied");
        Ok(Handled::Applied)
    }

    /// Handle every queued inbound message. Returns how many were handled.
    ///
    /// With `stop_pump_on_error` (the default) the first failure is returned
    /// immediately and later messages stay queued. Otherwise failures are
    /// logged, the inbox is drained, and the first failure is returned at the end.
    pub fn pump(&mut self) -> Result<usize, SyncError> {
        let mut handled = 0;
        let mut first_error = None;
        while let Some(message) = self.channel.poll() {
            handled += 1;
            if let Err(err) = self.handle_message(&message) {
                if self.config.stop_pump_on_error {
                    return Err(err);
                }
                warn!(
                    tool_id = %self.config.tool_id,
                    command = %message.command,
                    error = %err,
                    "message failed"
                );
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(handled),
        }
    }

    /// Flush local changes as one `update`. Returns whether a message was sent.
    pub fn tick(&mut self) -> Result<bool, SyncError> {
        let (Phase::Live, Some(root)) = (self.phase, self.root) else {
            return Ok(false);
        };
        let delta = self.tree.take_changes(root)?;
        if delta.is_empty() {
            return Ok(false);
        }
        debug!(tool_id = %self.config.tool_id, keys = delta.property_count(), "flushing update");
        self.post(WireMessage::update(&self.config.tool_id, delta))?;
        Ok(true)
    }

    /// Run a domain update against the live root, then [`tick`](Self::tick).
    pub fn tick_with<F>(&mut self, update: F) -> Result<bool, SyncError>
    where
        F: FnOnce(&mut NodeTree, NodeId) -> Result<(), SyncError>,
    {
        let (Phase::Live, Some(root)) = (self.phase, self.root) else {
            return Ok(false);
        };
        update(&mut self.tree, root)?;
        self.tick()
    }

    /// Ask for a fresh snapshot. Updates are ignored until it arrives.
    pub fn resync(&mut self) -> Result<(), SyncError> {
        if self.role == Role::Responder {
            return Err(SyncError::CapabilityUnsupported("a responder cannot resync".to_string()));
        }
        self.post(WireMessage::get(&self.config.tool_id))?;
        self.phase = Phase::AwaitingSnapshot;
        debug!(tool_id = %self.config.tool_id, "resync requested");
        Ok(())
    }

    /// Release the channel subscription. Calling it twice is a no-op.
    pub fn release(&mut self) {
        if self.phase == Phase::Released {
            return;
        }
        self.channel.release();
        self.phase = Phase::Released;
        debug!(tool_id = %self.config.tool_id, "released");
    }

    fn post(&mut self, message: WireMessage) -> Result<(), SyncError> {
        let message = message.with_protocol(&self.config.protocol);
        if let Err(err) = self.channel.post(message) {
            warn!(tool_id = %self.config.tool_id, error = %err, "post failed");
            return Err(err.into());
        }
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.phase == Phase::Live
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn tool_id(&self) -> &str {
        &self.config.tool_id
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut NodeTree {
        &mut self.tree
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }
}

impl<C: MessageChannel> Drop for ToolSocket<C> {
    fn drop(&mut self) {
        if !self.channel.is_released() {
            self.channel.release();
        }
    }
}
