#![allow(dead_code)]

use std::rc::Rc;

use serde_json::json;
use tool_sync::{
    FixedSchema, MemoryChannel, NodeId, NodeTree, SingleTypeProvider, SocketConfig, ToolSocket,
    TypeRegistry,
};
use tool_sync_wire::State;

/// Registry used across the integration tests:
///
/// - `Object.World`: dynamic, any child type
/// - `Object.Transform`: fixed `position` / `scale` / `visible`
/// - `Object.Log`: append-only collection of `Value.line`
pub fn registry() -> Rc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register_dynamic("Object.World").unwrap();
    registry.register_dynamic("Object.Group").unwrap();
    let transform = FixedSchema::new()
        .property("position", State::value("Value.vec3", json!([0, 0, 0])))
        .property("scale", State::value("Value", json!(1)))
        .property("visible", State::versioned("Versioned", json!(true), 0));
    registry
        .register_object("Object.Transform", move || Box::new(transform.clone()))
        .unwrap();
    registry
        .register_dictionary("Object.Log", || {
            Box::new(SingleTypeProvider::new("Value.line").append_only())
        })
        .unwrap();
    Rc::new(registry)
}

pub fn tree() -> NodeTree {
    NodeTree::new(registry())
}

pub fn empty_world() -> State {
    State::composite("Object.World", Default::default())
}

pub struct Peers {
    pub tool: ToolSocket<MemoryChannel>,
    pub host: ToolSocket<MemoryChannel>,
    pub host_root: NodeId,
}

/// A requester/responder pair for `tool_id`, host serving an empty world.
pub fn peers(tool_id: &str) -> Peers {
    let (tool_end, host_end) = MemoryChannel::pair();
    let mut host_tree = tree();
    let host_root = host_tree.create("Object.World").unwrap();
    let host =
        ToolSocket::responder(SocketConfig::new(tool_id), host_tree, host_root, host_end).unwrap();
    let tool = ToolSocket::requester(SocketConfig::new(tool_id), tree(), tool_end);
    Peers { tool, host, host_root }
}

/// Run the get/set handshake to completion.
pub fn handshake(peers: &mut Peers) {
    peers.tool.start().unwrap();
    peers.host.pump().unwrap();
    peers.tool.pump().unwrap();
    assert!(peers.tool.is_live());
}
