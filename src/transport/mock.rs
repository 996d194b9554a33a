//! In-memory transport for tests and dry runs.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{post, EventSender, Transport, TransportEvent};

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    refuse_connect: bool,
    connect_calls: usize,
    sent: Vec<Vec<u8>>,
}

/// Records every frame written to it. Clones share the same state, so a test
/// can keep one handle after giving the other to a controller.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events: EventSender,
}

impl MockTransport {
    pub fn new(events: EventSender) -> MockTransport {
        MockTransport {
            state: Arc::new(Mutex::new(MockState::default())),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the recorded frames.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Frames sent so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state().sent)
    }

    pub fn connect_calls(&self) -> usize {
        self.state().connect_calls
    }

    /// Make subsequent `connect` calls fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connect = refuse;
    }

    /// Simulate the link going up or down on the remote side.
    pub fn set_connected(&self, connected: bool) {
        let changed = {
            let mut state = self.state();
            let changed = state.connected != connected;
            state.connected = connected;
            changed
        };
        if changed {
            post(&self.events, TransportEvent::ConnectionChange(connected));
        }
    }

    /// Simulate bytes arriving from the device.
    pub fn receive(&self, bytes: &[u8]) {
        post(&self.events, TransportEvent::BytesReceived(bytes.to_vec()));
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.connect_calls += 1;
        if state.connected {
            return Ok(());
        }
        if state.refuse_connect {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        state.connected = true;
        drop(state);
        post(&self.events, TransportEvent::ConnectionChange(true));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn send_bytes(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        state.sent.push(frame.to_vec());
        Ok(())
    }
}
