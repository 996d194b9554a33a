//! Inbound byte queue.
//!
//! The transport's receive path only pushes into a bounded queue and pokes
//! the worker; the worker drains and processes frames in arrival order.

use crossbeam::channel::{self, Sender};
use crossbeam::queue::ArrayQueue;
use log::{debug, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::protocol::hex;

/// Default number of frames held before the oldest is dropped.
pub const DEFAULT_CAPACITY: usize = 100;

/// Handles inbound frames on the drain worker.
pub trait FrameProcessor: Send {
    fn process(&mut self, frame: &[u8]);
}

/// Logs every frame. Responses are not decoded.
pub struct LogProcessor {
    name: String,
}

impl LogProcessor {
    pub fn new(name: &str) -> LogProcessor {
        LogProcessor {
            name: name.to_owned(),
        }
    }
}

impl FrameProcessor for LogProcessor {
    fn process(&mut self, frame: &[u8]) {
        debug!("[{}] Device response: {}", self.name, hex(frame));
    }
}

/// Bounded FIFO with a single drain worker.
pub struct InboundQueue {
    frames: Arc<ArrayQueue<Vec<u8>>>,
    /// Wakes the worker. Capacity 1: one pending wake-up is enough.
    signal: Option<Sender<()>>,
    dropped: AtomicUsize,
    worker: Option<JoinHandle<()>>,
}

impl InboundQueue {
    /// Create the queue and start its worker.
    pub fn start(capacity: usize, mut processor: Box<dyn FrameProcessor>) -> InboundQueue {
        let frames: Arc<ArrayQueue<Vec<u8>>> = Arc::new(ArrayQueue::new(capacity.max(1)));
        let (signal, wakeups) = channel::bounded::<()>(1);

        let queue = frames.clone();
        let worker = thread::spawn(move || {
            // Runs once more after the sender is gone to drain leftovers.
            loop {
                let open = wakeups.recv().is_ok();
                while let Some(frame) = queue.pop() {
                    processor.process(&frame);
                }
                if !open {
                    break;
                }
            }
        });

        InboundQueue {
            frames,
            signal: Some(signal),
            dropped: AtomicUsize::new(0),
            worker: Some(worker),
        }
    }

    /// Queue a frame. Never blocks; a full queue drops its oldest frame.
    pub fn enqueue(&self, frame: Vec<u8>) {
        if let Some(oldest) = self.frames.force_push(frame) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "[queue] Inbound queue full ({}), dropped oldest frame {}",
                self.capacity(),
                hex(&oldest)
            );
        }
        if let Some(signal) = &self.signal {
            // Full means a wake-up is already pending.
            signal.try_send(()).ok();
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.frames.capacity()
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for InboundQueue {
    fn drop(&mut self) {
        self.signal.take();
        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }
    }
}
