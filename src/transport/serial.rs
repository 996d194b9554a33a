//! Serial port transport (RS-232 control port on the receiver card).

use log::{debug, info, warn};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{post, reader_lost, EventSender, Transport, TransportEvent};

const MAX_PACKET_SIZE: usize = 4096;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// A serial port is "connected" while it is open and readable.
pub struct SerialTransport {
    /// Path to the serial device.
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    /// Cleared by the reader thread when a read fails.
    connected: Arc<AtomicBool>,
    /// Bumped whenever the port is closed so the reader thread exits.
    generation: Arc<AtomicU64>,
    events: EventSender,
}

impl SerialTransport {
    pub fn new(path: &str, baud_rate: u32, events: EventSender) -> SerialTransport {
        SerialTransport {
            path: path.to_owned(),
            baud_rate,
            port: None,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    fn close(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.port.take();
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("[serial] Closed {}", self.path);
            post(&self.events, TransportEvent::ConnectionChange(false));
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> io::Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        // A port left behind by a failed reader must be released first.
        self.port.take();
        debug!("[serial] Opening {} @ {}", self.path, self.baud_rate);
        let port = serialport::new(self.path.as_str(), self.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        let reader = port.try_clone()?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.port = Some(port);
        self.connected.store(true, Ordering::SeqCst);
        info!("[serial] Opened {}", self.path);
        post(&self.events, TransportEvent::ConnectionChange(true));

        start_reader_thread(
            reader,
            generation,
            self.generation.clone(),
            self.connected.clone(),
            self.events.clone(),
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_bytes(&mut self, frame: &[u8]) -> io::Result<()> {
        let result = match self.port.as_mut() {
            Some(port) => port.write_all(frame).and_then(|_| port.flush()),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        if let Err(err) = &result {
            warn!("[serial] Write to {} failed: {}", self.path, err);
            self.close();
        }
        result
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll the port until it is closed from our side or the read fails.
fn start_reader_thread(
    mut port: Box<dyn SerialPort>,
    generation: u64,
    current: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    events: EventSender,
) {
    thread::spawn(move || {
        let mut buf = [0; MAX_PACKET_SIZE];
        while current.load(Ordering::SeqCst) == generation {
            match port.read(&mut buf) {
                Ok(0) => {}
                Ok(len) => post(&events, TransportEvent::BytesReceived(buf[..len].to_owned())),
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("[serial] Read failed: {}", err);
                    break;
                }
            }
        }
        if reader_lost(generation, &current, &connected, &events) {
            info!("[serial] Port lost");
        }
        debug!("[serial] Reader thread exiting");
    });
}
