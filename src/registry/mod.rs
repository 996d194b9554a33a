//! Builds devices from configuration by type name.

use log::{debug, info};
use std::collections::HashMap;
use thiserror::Error;

use crate::config::{ColorlightProperties, ConfigError, ControlConfig, DeviceConfig};
use crate::controller::Controller;
use crate::transport::{event_channel, EventSender, SerialTransport, TcpTransport, Transport};

/// Type name the Colorlight Z6 builder is registered under.
pub const COLORLIGHT_Z6: &str = "colorlightz6";

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no builder registered for device type {0}")]
    UnknownType(String),
    #[error("failed to read properties config for {key}: {source}")]
    Properties {
        key: String,
        source: serde_json::Error,
    },
    #[error("no control object present for device {0}")]
    NoControl(String),
    #[error("invalid settings for {key}: {source}")]
    Invalid { key: String, source: ConfigError },
}

/// Builder for one device type.
pub type BuildFn = fn(&DeviceConfig) -> BuildResult<Controller>;

/// Type name to builder map, handed to whatever assembles the system.
pub struct Registry {
    builders: HashMap<String, BuildFn>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            builders: HashMap::new(),
        }
    }

    /// Registry with every built-in device type.
    pub fn with_defaults() -> Registry {
        let mut registry = Registry::new();
        registry.register(COLORLIGHT_Z6, build_colorlight_z6);
        registry
    }

    /// Type names are matched case-insensitively.
    pub fn register(&mut self, kind: &str, builder: BuildFn) {
        self.builders.insert(kind.to_ascii_lowercase(), builder);
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.builders.contains_key(&kind.to_ascii_lowercase())
    }

    pub fn build(&self, config: &DeviceConfig) -> BuildResult<Controller> {
        debug!(
            "[{}] Factory attempting to create new device from type: {}",
            config.key, config.kind
        );
        let builder = self
            .builders
            .get(&config.kind.to_ascii_lowercase())
            .ok_or_else(|| BuildError::UnknownType(config.kind.clone()))?;
        builder(config)
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::with_defaults()
    }
}

/// Create the transport described by a control block.
pub fn open_transport(control: &ControlConfig, events: EventSender) -> Box<dyn Transport> {
    match control {
        ControlConfig::Tcp { address, port } => {
            let transport = TcpTransport::new(address, *port, events);
            debug!("[registry] TCP control at {}", transport.addr());
            Box::new(transport)
        }
        ControlConfig::Serial { port, baud_rate } => {
            Box::new(SerialTransport::new(port, *baud_rate, events))
        }
    }
}

fn build_colorlight_z6(config: &DeviceConfig) -> BuildResult<Controller> {
    let props: ColorlightProperties = serde_json::from_value(config.properties.clone())
        .map_err(|source| BuildError::Properties {
            key: config.key.clone(),
            source,
        })?;
    let control = props
        .control
        .as_ref()
        .ok_or_else(|| BuildError::NoControl(config.key.clone()))?;
    let settings = props.controller_config().map_err(|source| BuildError::Invalid {
        key: config.key.clone(),
        source,
    })?;

    let (sender, receiver) = event_channel();
    let transport = open_transport(control, sender);
    info!("[{}] Building Colorlight Z6 '{}'", config.key, config.name);
    Ok(Controller::new(&config.name, settings, transport, receiver))
}
