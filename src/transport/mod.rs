//! Byte transports the controller talks through.
//!
//! A transport only knows how to connect, report whether it is connected and
//! write raw frames. Everything it observes (connection changes, inbound
//! bytes) is posted to the event channel handed to it at construction.

use crossbeam::channel::{self, Receiver, Sender};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub mod mock;
pub mod serial;
pub mod tcp;

pub use self::mock::MockTransport;
pub use self::serial::SerialTransport;
pub use self::tcp::TcpTransport;

/// Notifications from a transport to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link went up (true) or down (false).
    ConnectionChange(bool),
    /// Raw bytes read from the device.
    BytesReceived(Vec<u8>),
}

pub type EventSender = Sender<TransportEvent>;
pub type EventReceiver = Receiver<TransportEvent>;

/// Create the channel a transport posts its events on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    channel::unbounded()
}

/// Minimal capability the controller needs from a connection.
pub trait Transport: Send {
    /// Open the connection. Connecting an already connected transport is a no-op.
    fn connect(&mut self) -> io::Result<()>;
    fn is_connected(&self) -> bool;
    /// Write a complete frame.
    fn send_bytes(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Post an event, ignoring a dropped receiver.
pub(crate) fn post(events: &EventSender, event: TransportEvent) {
    if events.send(event).is_err() {
        log::debug!("[transport] event receiver gone");
    }
}

/// Called by a reader thread when its connection ends. Marks the link down
/// and posts the disconnect, unless a newer connection or a local close has
/// already replaced the reader's `generation`.
pub(crate) fn reader_lost(
    generation: u64,
    current: &AtomicU64,
    connected: &AtomicBool,
    events: &EventSender,
) -> bool {
    let live = current
        .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok();
    if live && connected.swap(false, Ordering::SeqCst) {
        post(events, TransportEvent::ConnectionChange(false));
        return true;
    }
    false
}
