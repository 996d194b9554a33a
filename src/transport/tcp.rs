//! TCP client transport.

use log::{debug, info, warn};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{post, reader_lost, EventSender, Transport, TransportEvent};

const MAX_PACKET_SIZE: usize = 4096;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Keeps one TCP connection to the receiver card and reads from it on a
/// background thread.
pub struct TcpTransport {
    /// host:port of the device.
    addr: String,
    /// Write half of the current connection.
    stream: Option<TcpStream>,
    /// Shared with the reader thread.
    connected: Arc<AtomicBool>,
    /// Bumped on every connect/disconnect so a stale reader stays quiet.
    generation: Arc<AtomicU64>,
    events: EventSender,
}

impl TcpTransport {
    pub fn new(address: &str, port: u16, events: EventSender) -> TcpTransport {
        TcpTransport {
            addr: format!("{}:{}", address, port),
            stream: None,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn open(&self) -> io::Result<TcpStream> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    /// Drop the current connection and report it.
    fn disconnect(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(stream) = self.stream.take() {
            stream.shutdown(Shutdown::Both).ok();
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            post(&self.events, TransportEvent::ConnectionChange(false));
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> io::Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        debug!("[tcp] Connecting to {}", self.addr);
        let stream = self.open()?;
        let reader = stream.try_clone()?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stream = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        info!("[tcp] Connected to {}", self.addr);
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
        let result = match self.stream.as_mut() {
            Some(stream) => stream.write_all(frame).and_then(|_| stream.flush()),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        if let Err(err) = &result {
            warn!("[tcp] Write to {} failed: {}", self.addr, err);
            self.disconnect();
        }
        result
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(stream) = self.stream.take() {
            stream.shutdown(Shutdown::Both).ok();
        }
    }
}

/// Read from the socket until it closes, posting every chunk received.
fn start_reader_thread(
    mut stream: TcpStream,
    generation: u64,
    current: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    events: EventSender,
) {
    thread::spawn(move || {
        let mut buf = [0; MAX_PACKET_SIZE];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    debug!("[tcp] Remote closed the connection");
                    break;
                }
                Ok(len) => post(&events, TransportEvent::BytesReceived(buf[..len].to_owned())),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("[tcp] Read failed: {}", err);
                    break;
                }
            }
        }

        if reader_lost(generation, &current, &connected, &events) {
            info!("[tcp] Connection lost");
        }
    });
}
