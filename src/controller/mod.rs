//! The Colorlight Z6 controller ties the encoder, heartbeat, health monitor
//! and inbound queue to one transport.

use crossbeam::channel::{self, select, Receiver, Sender};
use log::{debug, error, info, warn};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::heartbeat::{self, HeartbeatScheduler};
use crate::monitor::{HealthChange, HealthMonitor, HealthState, Thresholds};
use crate::protocol::{brightness_fraction, hex, Command, DeviceId, Encoder, ProtocolVariant};
use crate::queue::{self, FrameProcessor, InboundQueue, LogProcessor};
use crate::transport::{EventReceiver, Transport, TransportEvent};

/// Per-device settings fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    pub id: DeviceId,
    pub protocol: ProtocolVariant,
    /// Heartbeat period while connected.
    pub heartbeat: Duration,
    pub monitor: Thresholds,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            id: DeviceId::default(),
            protocol: ProtocolVariant::default(),
            heartbeat: heartbeat::DEFAULT_PERIOD,
            monitor: Thresholds::default(),
        }
    }
}

/// Things the host needs from any controllable device.
pub trait Device {
    fn name(&self) -> &str;
    /// Connect and start monitoring.
    fn initialize(&self);
    fn send_command(&self, cmd: Command);
    fn health_state(&self) -> HealthState;
}

/// Single path every outbound frame takes.
struct SendGate {
    name: String,
    transport: Mutex<Box<dyn Transport>>,
}

impl SendGate {
    fn transport(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.transport.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn connect(&self) -> io::Result<()> {
        self.transport().connect()
    }

    fn is_connected(&self) -> bool {
        self.transport().is_connected()
    }

    fn send(&self, frame: Option<&[u8]>) {
        let frame = match frame {
            Some(frame) if !frame.is_empty() => frame,
            _ => {
                debug!("[{}] send_bytes: command bytes are empty", self.name);
                return;
            }
        };

        let mut transport = self.transport();
        if !transport.is_connected() {
            debug!("[{}] send_bytes: not connected, attempting connection", self.name);
            if let Err(err) = transport.connect() {
                warn!("[{}] send_bytes: connection failed: {}", self.name, err);
                return;
            }
        }

        debug!("[{}] send_bytes: {}", self.name, hex(frame));
        if let Err(err) = transport.send_bytes(frame) {
            warn!("[{}] send_bytes: {}", self.name, err);
        }
    }
}

/// State the event thread works on.
struct Shared {
    name: String,
    gate: Arc<SendGate>,
    heartbeat: HeartbeatScheduler,
    monitor: HealthMonitor,
    inbound: InboundQueue,
}

impl Shared {
    fn handle(&self, event: TransportEvent) {
        match event {
            // Events can arrive after a newer connection change, so the
            // transport's own state decides. The gate lock is released
            // before the heartbeat is touched.
            TransportEvent::ConnectionChange(reported) if reported != self.gate.is_connected() => {
                debug!(
                    "[{}] Ignoring stale connection event ({})",
                    self.name,
                    if reported { "up" } else { "down" }
                );
            }
            TransportEvent::ConnectionChange(true) => {
                info!(
                    "[{}] Connected, starting heartbeat every {:?}",
                    self.name,
                    self.heartbeat.period()
                );
                self.heartbeat.start();
            }
            TransportEvent::ConnectionChange(false) => {
                info!("[{}] Disconnected, stopping heartbeat", self.name);
                self.heartbeat.stop();
            }
            TransportEvent::BytesReceived(bytes) => {
                debug!("[{}] Bytes received: {}", self.name, hex(&bytes));
                self.monitor.record_activity();
                self.inbound.enqueue(bytes);
            }
        }
    }
}

/// Controller for one Colorlight Z6 receiver card.
pub struct Controller {
    name: String,
    encoder: Encoder,
    gate: Arc<SendGate>,
    shared: Arc<Shared>,
    stop: Option<Sender<()>>,
    events: Option<JoinHandle<()>>,
}

impl Controller {
    /// Build a controller that logs inbound frames.
    pub fn new(
        name: &str,
        config: ControllerConfig,
        transport: Box<dyn Transport>,
        events: EventReceiver,
    ) -> Controller {
        let processor = Box::new(LogProcessor::new(name));
        Controller::with_processor(name, config, transport, events, processor)
    }

    /// Build a controller with a custom inbound frame processor.
    pub fn with_processor(
        name: &str,
        config: ControllerConfig,
        transport: Box<dyn Transport>,
        events: EventReceiver,
        processor: Box<dyn FrameProcessor>,
    ) -> Controller {
        let encoder = Encoder::new(config.id, config.protocol);
        let gate = Arc::new(SendGate {
            name: name.to_owned(),
            transport: Mutex::new(transport),
        });

        let heartbeat_gate = gate.clone();
        let heartbeat = HeartbeatScheduler::new(
            config.heartbeat,
            Arc::new(move || heartbeat_gate.send(Some(&encoder.heartbeat()))),
        );
        let probe_gate = gate.clone();
        let monitor = HealthMonitor::new(
            config.monitor,
            Arc::new(move || probe_gate.send(Some(&encoder.heartbeat()))),
        );

        let shared = Arc::new(Shared {
            name: name.to_owned(),
            gate: gate.clone(),
            heartbeat,
            monitor,
            inbound: InboundQueue::start(queue::DEFAULT_CAPACITY, processor),
        });

        let (stop, stopped) = channel::bounded::<()>(0);
        let handle = start_event_thread(shared.clone(), events, stopped);

        info!("[{}] Creating Colorlight Z6 controller with id {}", name, config.id);

        Controller {
            name: name.to_owned(),
            encoder,
            gate,
            shared,
            stop: Some(stop),
            events: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> DeviceId {
        self.encoder.id()
    }

    pub fn protocol(&self) -> ProtocolVariant {
        self.encoder.variant()
    }

    /// Open the transport and start the health monitor. The heartbeat starts
    /// once the transport reports the connection.
    pub fn initialize(&self) {
        info!("[{}] Initialize: Colorlight Z6 {}", self.name, self.id());
        if let Err(err) = self.gate.connect() {
            warn!("[{}] Initial connection failed: {}", self.name, err);
        }
        let thresholds = self.shared.monitor.thresholds();
        debug!(
            "[{}] Health monitor: poll {:?} warning {:?} error {:?}",
            self.name, thresholds.poll, thresholds.warning, thresholds.error
        );
        self.shared.monitor.start();
    }

    /// Write a raw frame. `None` or an empty frame is skipped.
    pub fn send_bytes(&self, frame: Option<&[u8]>) {
        self.gate.send(frame);
    }

    pub fn send_command(&self, cmd: Command) {
        self.send_bytes(Some(&self.encoder.encode(cmd)));
    }

    /// Set brightness from a 16-bit fader level.
    pub fn set_brightness(&self, level: u16) {
        debug!(
            "[{}] SetBrightness: level {} percent {}",
            self.name,
            level,
            brightness_fraction(level, self.protocol()) * 100.0
        );
        self.send_command(Command::Brightness(level));
    }

    pub fn recall_preset(&self, preset: u16) {
        debug!("[{}] RecallPreset: {}", self.name, preset);
        self.send_command(Command::Preset(preset));
    }

    pub fn set_show_on(&self) {
        debug!("[{}] SetShowOn", self.name);
        self.send_command(Command::Show(true));
    }

    pub fn set_show_off(&self) {
        debug!("[{}] SetShowOff", self.name);
        self.send_command(Command::Show(false));
    }

    pub fn health_state(&self) -> HealthState {
        self.shared.monitor.state()
    }

    pub fn is_online(&self) -> bool {
        self.shared.monitor.is_online()
    }

    /// Health changes from now on.
    pub fn health_changes(&self) -> Receiver<HealthChange> {
        self.shared.monitor.subscribe()
    }

    pub fn heartbeat_running(&self) -> bool {
        self.shared.heartbeat.is_running()
    }

    /// Inbound frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> usize {
        self.shared.inbound.dropped()
    }
}

impl Device for Controller {
    fn name(&self) -> &str {
        Controller::name(self)
    }

    fn initialize(&self) {
        Controller::initialize(self)
    }

    fn send_command(&self, cmd: Command) {
        Controller::send_command(self, cmd)
    }

    fn health_state(&self) -> HealthState {
        Controller::health_state(self)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.events.take() {
            if handle.join().is_err() {
                error!("[{}] Event thread panicked", self.name);
            }
        }
        self.shared.heartbeat.stop();
        self.shared.monitor.stop();
    }
}

/// Dispatch transport events until the controller is dropped.
fn start_event_thread(
    shared: Arc<Shared>,
    events: EventReceiver,
    stopped: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        select! {
            recv(stopped) -> _ => break,
            recv(events) -> event => match event {
                Ok(event) => shared.handle(event),
                Err(_) => {
                    debug!("[{}] Transport event channel closed", shared.name);
                    break;
                }
            },
        }
    })
}
