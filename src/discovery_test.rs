use anyhow::Result;
use prost::Message;

use crate::configure::assign_rw_coordinates;
use crate::discovery::decode_discovery;
use crate::fixtures::core_pod;
use crate::grpc::{DeviceDiscovered, Envelope, Header};
use crate::state::CoreState;

fn encode_envelope(type_url: &str, value: Vec<u8>) -> Vec<u8> {
    let envelope = Envelope {
        header: Some(Header {
            id: "evt-1".into(),
            r#type: "device_discovered".into(),
            from_topic: "AffinityRouter".into(),
            timestamp: 0,
        }),
        body: Some(prost_types::Any {
            type_url: type_url.into(),
            value,
        }),
    };
    envelope.encode_to_vec()
}

fn test_state() -> CoreState {
    let mut groups = vec![
        [
            core_pod("rw-core0-a", "10.0.0.1", "node-a", &["d1"]),
            core_pod("rw-core0-b", "10.0.0.2", "node-b", &["d1"]),
        ],
        [
            core_pod("rw-core1-a", "10.0.0.3", "node-a", &["d99"]),
            core_pod("rw-core1-b", "10.0.0.4", "node-b", &[]),
        ],
    ];
    assign_rw_coordinates(&mut groups, "vcore");
    CoreState { groups, ro_pods: vec![] }
}

#[test]
fn decode_discovery_extracts_the_device() -> Result<()> {
    let device = DeviceDiscovered {
        id: "d99".into(),
        parent_id: "".into(),
        device_type: "olt".into(),
        publisher: "rw-core1-a".into(),
    };
    let payload = encode_envelope("type.googleapis.com/events.DeviceDiscovered", device.encode_to_vec());

    let decoded = decode_discovery(&payload)?.expect("expected a discovery event");
    assert!(decoded.id == "d99", "unexpected device ID: {}", decoded.id);
    assert!(decoded.publisher == "rw-core1-a", "unexpected publisher: {}", decoded.publisher);

    Ok(())
}

#[test]
fn decode_discovery_ignores_other_event_kinds() -> Result<()> {
    let payload = encode_envelope("type.googleapis.com/events.DeviceRemoved", vec![]);
    let decoded = decode_discovery(&payload)?;
    assert!(decoded.is_none(), "expected non-discovery events to be ignored");
    Ok(())
}

#[test]
fn decode_discovery_rejects_garbage_payloads() {
    assert!(decode_discovery(b"not-a-protobuf").is_err(), "expected a decode error for garbage payloads");
}

#[test]
fn decode_discovery_rejects_bodyless_envelopes() {
    let envelope = Envelope { header: None, body: None };
    let payload = envelope.encode_to_vec();
    assert!(decode_discovery(&payload).is_err(), "expected a decode error for a bodyless envelope");
}

#[test]
fn bind_device_prefers_the_publishing_pod() {
    let mut state = test_state();

    let backend = state.bind_device("d100", "rw-core1-b");
    assert!(backend.as_deref() == Some("vcore2"), "unexpected backend: {:?}", backend);
    assert!(
        state.groups[1][1].device_ids.contains("d100"),
        "expected the bound device to be recorded on the publishing pod"
    );
}

#[test]
fn bind_device_falls_back_to_device_sets() {
    let mut state = test_state();

    let backend = state.bind_device("d99", "");
    assert!(backend.as_deref() == Some("vcore2"), "unexpected backend: {:?}", backend);
}

#[test]
fn bind_device_drops_unresolvable_devices() {
    let mut state = test_state();

    let backend = state.bind_device("d404", "");
    assert!(backend.is_none(), "expected an unresolvable device to yield no backend, got {:?}", backend);
    let recorded = state
        .groups
        .iter()
        .flat_map(|group| group.iter())
        .any(|pod| pod.device_ids.contains("d404"));
    assert!(!recorded, "expected no slot to record an unresolvable device");
}
