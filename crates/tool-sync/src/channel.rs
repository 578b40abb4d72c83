//! Message channel between two peers.
//!
//! Delivery is fire-and-forget: no acknowledgement, no retry, no ordering
//! guarantee beyond what the implementation happens to give. Inbound messages
//! are queued and drained by the owner through [`MessageChannel::poll`], so a
//! message is never applied while another one is still being handled.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use tool_sync_wire::WireMessage;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel has been released")]
    Released,
}

/// One endpoint of a bidirectional message bus.
pub trait MessageChannel {
    /// Send to the opposite side.
    fn post(&mut self, message: WireMessage) -> Result<(), ChannelError>;

    /// Next queued inbound message, oldest first.
    fn poll(&mut self) -> Option<WireMessage>;

    /// Stop receiving and refuse further posts. Calling it twice is a no-op.
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

type Inbox = Rc<RefCell<VecDeque<WireMessage>>>;

#[derive(Default)]
struct Bus {
    sides: [Vec<Weak<RefCell<VecDeque<WireMessage>>>>; 2],
}

/// In-process bus. Every endpoint of one side receives every message posted
/// from the other side.
///
/// ```
/// use tool_sync::{MemoryChannel, MessageChannel};
/// use tool_sync_wire::WireMessage;
///
/// let (mut tool, mut host) = MemoryChannel::pair();
/// tool.post(WireMessage::get("t1")).unwrap();
/// assert_eq!(host.poll(), Some(WireMessage::get("t1")));
/// assert_eq!(host.poll(), None);
/// ```
pub struct MemoryChannel {
    bus: Rc<RefCell<Bus>>,
    side: usize,
    inbox: Inbox,
    released: bool,
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("side", &self.side)
            .field("pending", &self.inbox.borrow().len())
            .field("released", &self.released)
            .finish()
    }
}

impl MemoryChannel {
    /// Two connected endpoints, one per side.
    pub fn pair() -> (Self, Self) {
        let bus = Rc::new(RefCell::new(Bus::default()));
        (Self::attach(&bus, 0), Self::attach(&bus, 1))
    }

    /// Another endpoint on this endpoint's side of the bus.
    pub fn subscribe(&self) -> Self {
        Self::attach(&self.bus, self.side)
    }

    fn attach(bus: &Rc<RefCell<Bus>>, side: usize) -> Self {
        let inbox = Inbox::default();
        bus.borrow_mut().sides[side].push(Rc::downgrade(&inbox));
        Self { bus: Rc::clone(bus), side, inbox, released: false }
    }

    /// Number of queued inbound messages.
    pub fn pending(&self) -> usize {
        self.inbox.borrow().len()
    }
}

impl MessageChannel for MemoryChannel {
    fn post(&mut self, message: WireMessage) -> Result<(), ChannelError> {
        if self.released {
            return Err(ChannelError::Released);
        }
        let mut bus = self.bus.borrow_mut();
        let peers = &mut bus.sides[1 - self.side];
        peers.retain(|peer| peer.strong_count() > 0);
        trace!(
            command = %message.command,
            tool_id = %message.tool_id,
            receivers = peers.len(),
            "post"
        );
        for peer in peers.iter().filter_map(Weak::upgrade) {
            peer.borrow_mut().push_back(message.clone());
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<WireMessage> {
        self.inbox.borrow_mut().pop_front()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.inbox.borrow_mut().clear();
        let own = Rc::downgrade(&self.inbox);
        self.bus.borrow_mut().sides[self.side].retain(|peer| !peer.ptr_eq(&own));
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tool_sync_wire::State;

    #[test]
    fn messages_cross_sides_in_order() {
        let (mut a, mut b) = MemoryChannel::pair();
        a.post(WireMessage::get("t1")).unwrap();
        a.post(WireMessage::update("t1", State::empty())).unwrap();
        assert_eq!(a.pending(), 0);
        assert_eq!(b.pending(), 2);
        assert_eq!(b.poll().map(|m| m.command), Some(tool_sync_wire::Command::Get));
        assert_eq!(b.poll().map(|m| m.command), Some(tool_sync_wire::Command::Update));
    }

    #[test]
    fn subscribers_on_one_side_all_receive() {
        let (mut tool, host) = MemoryChannel::pair();
        let mut second = host.subscribe();
        let mut first = host;
        tool.post(WireMessage::get("t1")).unwrap();
        assert_eq!(first.pending(), 1);
        assert_eq!(second.pending(), 1);

        second.release();
        tool.post(WireMessage::get("t2")).unwrap();
        assert_eq!(first.pending(), 2);
        assert_eq!(second.poll(), None);
    }

    #[test]
    fn release_is_idempotent_and_blocks_posting() {
        let (mut a, _b) = MemoryChannel::pair();
        a.release();
        a.release();
        assert!(a.is_released());
        assert_eq!(a.post(WireMessage::get("t1")), Err(ChannelError::Released));
    }

    #[test]
    fn dropped_endpoints_stop_receiving() {
        let (mut a, b) = MemoryChannel::pair();
        drop(b);
        a.post(WireMessage::get("t1")).unwrap();
        assert!(a.bus.borrow().sides[1].is_empty());
    }
}
