//! Periodic heartbeat while the link is up.
//!
//! The receiver card drops the control connection if it does not see a
//! heartbeat frame roughly every second.

use crossbeam::channel::{self, select, Sender};
use log::debug;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default heartbeat period required by the device.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1000);

/// Callback that sends one heartbeat frame.
pub type Emit = Arc<dyn Fn() + Send + Sync>;

struct Timer {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs at most one heartbeat timer thread at a time.
pub struct HeartbeatScheduler {
    period: Duration,
    emit: Emit,
    timer: Mutex<Option<Timer>>,
}

impl HeartbeatScheduler {
    pub fn new(period: Duration, emit: Emit) -> HeartbeatScheduler {
        HeartbeatScheduler {
            period,
            emit,
            timer: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Start emitting. The first heartbeat goes out immediately.
    ///
    /// Returns false if the timer was already running.
    pub fn start(&self) -> bool {
        let mut timer = self.lock();
        if timer.is_some() {
            return false;
        }

        let (stop, stopped) = channel::bounded::<()>(0);
        let emit = self.emit.clone();
        let period = self.period;
        let handle = thread::spawn(move || {
            emit();
            let ticker = channel::tick(period);
            loop {
                select! {
                    recv(stopped) -> _ => break,
                    recv(ticker) -> _ => emit(),
                }
            }
        });

        debug!("[heartbeat] Started, period {:?}", self.period);
        *timer = Some(Timer { stop, handle });
        true
    }

    /// Stop emitting. No heartbeat is sent once this returns.
    pub fn stop(&self) {
        let mut timer = self.lock();
        if let Some(Timer { stop, handle }) = timer.take() {
            drop(stop);
            if handle.join().is_err() {
                log::error!("[heartbeat] Timer thread panicked");
            }
            debug!("[heartbeat] Stopped");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Timer>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
