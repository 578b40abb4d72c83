use serde_json::{json, Value};
use tool_sync_wire::{codec, Command, NodeKind, State, WireMessage, PROTOCOL};

fn fixtures() -> Vec<Value> {
    vec![
        json!({"protocol": "ToolRendererV1", "command": "get", "toolId": "t1"}),
        json!({
            "protocol": "ToolRendererV1",
            "command": "set",
            "toolId": "t1",
            "delta": {"type": "Object.World", "properties": {}}
        }),
        json!({
            "protocol": "ToolRendererV1",
            "command": "update",
            "toolId": "t1",
            "delta": {"properties": {"x": {"type": "Value", "value": 5}}}
        }),
        json!({
            "protocol": "ToolRendererV1",
            "command": "update",
            "toolId": "t1",
            "delta": {"properties": {
                "pose": {"value": [1, 2, 3], "version": 4},
                "gone": {"type": "Deleted"}
            }}
        }),
    ]
}

#[test]
fn fixtures_survive_decode_encode() {
    for fixture in fixtures() {
        let msg = codec::decode(&fixture).expect("fixture must decode");
        assert_eq!(msg.protocol, PROTOCOL);
        assert_eq!(codec::encode(&msg), fixture);
    }
}

#[test]
fn update_payload_shapes() {
    let msg = codec::decode(&fixtures()[3]).unwrap();
    assert_eq!(msg.command, Command::Update);
    let delta = msg.delta.unwrap();
    assert!(delta.type_name.is_none());

    let pose = delta.property("pose").unwrap();
    assert_eq!(pose.version, Some(4));
    assert_eq!(pose.value, Some(json!([1, 2, 3])));
    assert!(pose.type_name.is_none());

    let gone = delta.property("gone").unwrap();
    assert!(gone.is_tombstone());
    assert_eq!(gone.kind(), Some(NodeKind::Deleted));
}

#[test]
fn builders_match_documented_shapes() {
    assert_eq!(State::deleted().to_json(), json!({"type": "Deleted"}));
    assert_eq!(
        State::versioned("Versioned", json!("a"), 0).to_json(),
        json!({"type": "Versioned", "value": "a", "version": 0})
    );
    assert_eq!(
        codec::encode(&WireMessage::set(
            "t9",
            State::composite("Object.World", Default::default())
        )),
        json!({
            "protocol": "ToolRendererV1",
            "command": "set",
            "toolId": "t9",
            "delta": {"type": "Object.World", "properties": {}}
        })
    );
}

#[test]
fn tool_id_key_is_camel_case() {
    let err =
        codec::decode(&json!({"protocol": "ToolRendererV1", "command": "get", "tool_id": "t1"}))
            .unwrap_err();
    assert!(err.to_string().contains("malformed"));
}
