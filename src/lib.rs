//! Control driver for Colorlight Z6 LED video-wall receiver cards.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod heartbeat;
pub mod monitor;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod transport;

pub use controller::{Controller, ControllerConfig, Device};
pub use protocol::{Command, DeviceId, ProtocolVariant};
