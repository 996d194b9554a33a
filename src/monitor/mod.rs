//! Communication health monitoring.
//!
//! Independent of the protocol heartbeat: the monitor sends its own probe
//! every poll interval and watches for any traffic coming back. Silence past
//! the warning or error threshold degrades the health state.

use crossbeam::channel::{self, select, Receiver, Sender};
use log::{info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Derived link health.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HealthState {
    /// Monitor not started, or nothing heard yet.
    Unknown,
    Online,
    /// Silent for longer than the warning threshold.
    Warning,
    /// Silent for longer than the error threshold.
    Error,
}

impl HealthState {
    pub fn is_online(self) -> bool {
        self == HealthState::Online
    }
}

/// A single health state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthChange {
    pub previous: HealthState,
    pub current: HealthState,
}

impl HealthChange {
    /// Whether the derived online flag flipped.
    pub fn online_changed(&self) -> bool {
        self.previous.is_online() != self.current.is_online()
    }
}

/// Poll and timeout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// How often to send a probe.
    pub poll: Duration,
    pub warning: Duration,
    pub error: Duration,
}

impl Default for Thresholds {
    fn default() -> Thresholds {
        Thresholds {
            poll: Duration::from_millis(120_000),
            warning: Duration::from_millis(180_000),
            error: Duration::from_millis(300_000),
        }
    }
}

impl Thresholds {
    /// How often elapsed silence is re-evaluated.
    fn check_interval(&self) -> Duration {
        let shortest = self.poll.min(self.warning).min(self.error);
        (shortest / 10).max(Duration::from_millis(5))
    }
}

/// The monitor's state machine, driven by explicit timestamps.
#[derive(Debug)]
pub struct HealthTracker {
    thresholds: Thresholds,
    state: HealthState,
    last_ok: Instant,
}

impl HealthTracker {
    pub fn new(thresholds: Thresholds, now: Instant) -> HealthTracker {
        HealthTracker {
            thresholds,
            state: HealthState::Unknown,
            last_ok: now,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Restart the silence clock without changing state.
    pub fn reset(&mut self, now: Instant) {
        self.last_ok = now;
    }

    /// Traffic was received from the device.
    pub fn record_activity(&mut self, now: Instant) -> Option<HealthChange> {
        self.last_ok = now;
        self.transition(HealthState::Online)
    }

    /// Re-check elapsed silence. Returns the transition, if any.
    pub fn evaluate(&mut self, now: Instant) -> Option<HealthChange> {
        let silent = now.saturating_duration_since(self.last_ok);
        if silent >= self.thresholds.error {
            self.transition(HealthState::Error)
        } else if silent >= self.thresholds.warning && self.state != HealthState::Error {
            self.transition(HealthState::Warning)
        } else {
            None
        }
    }

    fn transition(&mut self, next: HealthState) -> Option<HealthChange> {
        if next == self.state {
            return None;
        }
        let change = HealthChange {
            previous: self.state,
            current: next,
        };
        self.state = next;
        Some(change)
    }
}

/// Callback that sends one probe to the device.
pub type Probe = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    tracker: Mutex<HealthTracker>,
    listeners: Mutex<Vec<Sender<HealthChange>>>,
}

impl Shared {
    fn tracker(&self) -> MutexGuard<'_, HealthTracker> {
        self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, change: HealthChange) {
        match change.current {
            HealthState::Online => info!("[monitor] Communication OK"),
            HealthState::Warning => warn!("[monitor] No response within warning time"),
            HealthState::Error => warn!("[monitor] No response within error time, offline"),
            HealthState::Unknown => {}
        }
        let mut listeners = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.retain(|listener| listener.send(change).is_ok());
    }
}

struct Poller {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Threaded driver around a [`HealthTracker`].
pub struct HealthMonitor {
    thresholds: Thresholds,
    probe: Probe,
    shared: Arc<Shared>,
    poller: Mutex<Option<Poller>>,
}

impl HealthMonitor {
    pub fn new(thresholds: Thresholds, probe: Probe) -> HealthMonitor {
        HealthMonitor {
            thresholds,
            probe,
            shared: Arc::new(Shared {
                tracker: Mutex::new(HealthTracker::new(thresholds, Instant::now())),
                listeners: Mutex::new(Vec::new()),
            }),
            poller: Mutex::new(None),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn state(&self) -> HealthState {
        self.shared.tracker().state()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> Receiver<HealthChange> {
        let (sender, receiver) = channel::unbounded();
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sender);
        receiver
    }

    /// Mark the link as alive.
    pub fn record_activity(&self) {
        let change = self.shared.tracker().record_activity(Instant::now());
        if let Some(change) = change {
            self.shared.notify(change);
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_poller().is_some()
    }

    /// Start polling. Starting a running monitor does nothing.
    pub fn start(&self) {
        let mut poller = self.lock_poller();
        if poller.is_some() {
            return;
        }
        self.shared.tracker().reset(Instant::now());

        let (stop, stopped) = channel::bounded::<()>(0);
        let shared = self.shared.clone();
        let probe = self.probe.clone();
        let poll = channel::tick(self.thresholds.poll);
        let check = channel::tick(self.thresholds.check_interval());
        let handle = thread::spawn(move || loop {
            select! {
                recv(stopped) -> _ => break,
                recv(poll) -> _ => probe(),
                recv(check) -> _ => {
                    let change = shared.tracker().evaluate(Instant::now());
                    if let Some(change) = change {
                        shared.notify(change);
                    }
                }
            }
        });

        *poller = Some(Poller { stop, handle });
    }

    pub fn stop(&self) {
        if let Some(Poller { stop, handle }) = self.lock_poller().take() {
            drop(stop);
            handle.join().ok();
        }
    }

    fn lock_poller(&self) -> MutexGuard<'_, Option<Poller>> {
        self.poller.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn thresholds() -> Thresholds {
        Thresholds {
            poll: Duration::from_secs(120),
            warning: Duration::from_secs(180),
            error: Duration::from_secs(300),
        }
    }

    #[test]
    fn tracker_degrades_with_silence() {
        let start = Instant::now();
        let mut tracker = HealthTracker::new(thresholds(), start);
        assert_eq!(tracker.state(), HealthState::Unknown);

        assert_eq!(tracker.evaluate(start + Duration::from_secs(100)), None);
        let change = tracker.evaluate(start + Duration::from_secs(181)).unwrap();
        assert_eq!(change.current, HealthState::Warning);
        assert!(!change.online_changed());

        assert_eq!(tracker.evaluate(start + Duration::from_secs(200)), None);
        let change = tracker.evaluate(start + Duration::from_secs(301)).unwrap();
        assert_eq!(change.previous, HealthState::Warning);
        assert_eq!(change.current, HealthState::Error);
    }

    #[test]
    fn tracker_error_transition_fires_once() {
        let start = Instant::now();
        let mut tracker = HealthTracker::new(thresholds(), start);
        tracker.record_activity(start);

        let changes: Vec<_> = (0..100)
            .filter_map(|s| tracker.evaluate(start + Duration::from_secs(300 + s)))
            .collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes[0],
            HealthChange {
                previous: HealthState::Online,
                current: HealthState::Error
            }
        );
        assert!(changes[0].online_changed());
    }

    #[test]
    fn tracker_recovers_on_activity() {
        let start = Instant::now();
        let mut tracker = HealthTracker::new(thresholds(), start);
        tracker.evaluate(start + Duration::from_secs(400));
        assert_eq!(tracker.state(), HealthState::Error);

        let now = start + Duration::from_secs(401);
        let change = tracker.record_activity(now).unwrap();
        assert_eq!(change.current, HealthState::Online);
        assert_eq!(tracker.record_activity(now), None);
        assert_eq!(tracker.evaluate(now + Duration::from_secs(10)), None);
        assert!(tracker.state().is_online());
    }

    #[test]
    fn monitor_probes_and_notifies() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        let monitor = HealthMonitor::new(
            Thresholds {
                poll: Duration::from_millis(20),
                warning: Duration::from_millis(60),
                error: Duration::from_millis(120),
            },
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let changes = monitor.subscribe();

        monitor.start();
        monitor.record_activity();
        assert!(monitor.is_online());
        let change = changes.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(change.current, HealthState::Online);

        let change = changes.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(change.current, HealthState::Warning);
        let change = changes.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(change.current, HealthState::Error);
        assert!(!monitor.is_online());

        // Stable Error state produces no more notifications.
        assert!(changes.recv_timeout(Duration::from_millis(100)).is_err());

        monitor.stop();
        assert!(!monitor.is_running());
        assert!(probes.load(Ordering::SeqCst) >= 2);
    }
}
