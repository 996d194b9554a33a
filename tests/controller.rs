use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use colorlight_z6::monitor::{HealthState, Thresholds};
use colorlight_z6::protocol::heartbeat_frame;
use colorlight_z6::queue::FrameProcessor;
use colorlight_z6::transport::{event_channel, MockTransport};
use colorlight_z6::{Controller, ControllerConfig, Device, DeviceId, ProtocolVariant};

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn build(config: ControllerConfig) -> (Controller, MockTransport) {
    let (sender, receiver) = event_channel();
    let transport = MockTransport::new(sender);
    let controller = Controller::new("Z6", config, Box::new(transport.clone()), receiver);
    (controller, transport)
}

fn without_heartbeats(frames: Vec<Vec<u8>>, variant: ProtocolVariant) -> Vec<Vec<u8>> {
    frames
        .into_iter()
        .filter(|frame| frame.as_slice() != heartbeat_frame(variant))
        .collect()
}

#[test]
fn brightness_end_to_end() {
    let (controller, transport) = build(ControllerConfig {
        id: DeviceId(0x00ab),
        heartbeat: Duration::from_secs(3600),
        ..ControllerConfig::default()
    });
    controller.initialize();
    controller.set_brightness(32768);

    let sent = without_heartbeats(transport.sent(), ProtocolVariant::Current);
    let mut expected = vec![
        0x21, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0xab, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00,
    ];
    expected.extend_from_slice(&0.5f32.to_ne_bytes());
    assert_eq!(sent, vec![expected]);
}

#[test]
fn preset_end_to_end() {
    let (controller, transport) = build(ControllerConfig {
        id: DeviceId(0x00ab),
        heartbeat: Duration::from_secs(3600),
        ..ControllerConfig::default()
    });
    controller.initialize();
    controller.recall_preset(300);

    let sent = without_heartbeats(transport.sent(), ProtocolVariant::Current);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), 17);
    assert_eq!(sent[0][0], 0x74);
    assert_eq!(sent[0][16], 0x2c);
}

#[test]
fn legacy_heartbeat_runs_while_connected() {
    let (controller, transport) = build(ControllerConfig {
        id: DeviceId(1),
        protocol: ProtocolVariant::Legacy,
        heartbeat: Duration::from_millis(20),
        ..ControllerConfig::default()
    });
    let legacy = heartbeat_frame(ProtocolVariant::Legacy).to_vec();

    controller.initialize();
    assert!(wait_for(|| transport
        .sent()
        .iter()
        .filter(|frame| **frame == legacy)
        .count()
        >= 3));

    // Keep a late heartbeat tick from reconnecting through the send gate.
    transport.refuse_connections(true);
    transport.set_connected(false);
    assert!(wait_for(|| !controller.heartbeat_running()));
    transport.take_sent();
    thread::sleep(Duration::from_millis(80));
    assert!(transport.sent().is_empty());

    // Link comes back: heartbeat resumes.
    transport.refuse_connections(false);
    transport.set_connected(true);
    assert!(wait_for(|| transport.sent().contains(&legacy)));
}

#[test]
fn health_goes_offline_without_traffic() {
    let (controller, transport) = build(ControllerConfig {
        id: DeviceId(1),
        heartbeat: Duration::from_secs(3600),
        monitor: Thresholds {
            poll: Duration::from_millis(30),
            warning: Duration::from_millis(60),
            error: Duration::from_millis(120),
        },
        ..ControllerConfig::default()
    });
    let changes = controller.health_changes();
    controller.initialize();

    transport.receive(&[0xaa]);
    let online = changes.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(online.current, HealthState::Online);

    let mut seen = Vec::new();
    while let Ok(change) = changes.recv_timeout(Duration::from_millis(400)) {
        seen.push(change.current);
    }
    assert_eq!(seen, vec![HealthState::Warning, HealthState::Error]);
    assert_eq!(Device::health_state(&controller), HealthState::Error);
    assert!(!controller.is_online());

    // The monitor probes on its own schedule with the heartbeat frame.
    let heartbeats = transport
        .sent()
        .iter()
        .filter(|frame| frame.as_slice() == heartbeat_frame(ProtocolVariant::Current))
        .count();
    assert!(heartbeats >= 2);
}

struct Collect(Arc<Mutex<Vec<Vec<u8>>>>);

impl FrameProcessor for Collect {
    fn process(&mut self, frame: &[u8]) {
        self.0.lock().unwrap().push(frame.to_vec());
    }
}

#[test]
fn inbound_frames_reach_processor_in_order() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let (sender, receiver) = event_channel();
    let transport = MockTransport::new(sender);
    let controller = Controller::with_processor(
        "Z6",
        ControllerConfig::default(),
        Box::new(transport.clone()),
        receiver,
        Box::new(Collect(collected.clone())),
    );

    for frame in [b"A", b"B", b"C"] {
        transport.receive(frame);
    }
    assert!(wait_for(|| collected.lock().unwrap().len() == 3));
    assert_eq!(
        *collected.lock().unwrap(),
        vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]
    );
    assert_eq!(controller.dropped_frames(), 0);
}

#[test]
fn device_trait_sends_commands() {
    let (controller, transport) = build(ControllerConfig {
        id: DeviceId(0x1234),
        heartbeat: Duration::from_secs(3600),
        ..ControllerConfig::default()
    });
    let device: &dyn Device = &controller;
    device.initialize();
    device.send_command(colorlight_z6::Command::Show(true));

    assert_eq!(device.name(), "Z6");
    let sent = without_heartbeats(transport.sent(), ProtocolVariant::Current);
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0][6..8], &[0x12, 0x34]);
    assert_eq!(sent[0].last(), Some(&0x01));
}
