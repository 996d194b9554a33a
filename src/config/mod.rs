use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::MAX_JOIN_START;
use crate::controller::ControllerConfig;
use crate::heartbeat;
use crate::monitor::Thresholds;
use crate::protocol::{DeviceId, ProtocolVariant};
use crate::transport::serial::DEFAULT_BAUD_RATE;

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    /// Configured devices.
    pub devices: Vec<DeviceConfig>,
}

/// One device entry as handed to the registry.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Unique key used to address the device.
    pub key: String,
    /// Human-readable name.
    pub name: String,
    /// Registry type name, e.g. "colorlightz6".
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific properties, parsed by the device's builder.
    #[serde(default)]
    pub properties: serde_json::Value,
    /// Optional numbered-signal bridge.
    #[serde(default)]
    pub bridge: Option<BridgeConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// First join number used by this device.
    #[serde(default = "default_join_start")]
    pub join_start: u32,
    /// Per-join overrides, by join name.
    #[serde(default)]
    pub joins: HashMap<String, u32>,
}

fn default_join_start() -> u32 {
    1
}

/// Properties of a Colorlight Z6 device.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ColorlightProperties {
    /// Transport parameters.
    pub control: Option<ControlConfig>,
    /// Receiver card id.
    pub id: DeviceId,
    #[serde(default)]
    pub protocol: ProtocolVariant,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_heartbeat_ms() -> u64 {
    heartbeat::DEFAULT_PERIOD.as_millis() as u64
}

impl ColorlightProperties {
    /// Check the timing values and build the controller settings.
    pub fn controller_config(&self) -> ConfigResult<ControllerConfig> {
        if self.heartbeat_ms == 0 {
            return Err(ConfigError::Invalid("heartbeatMs must be positive".into()));
        }
        let monitor = &self.monitor;
        if monitor.poll_ms == 0 || monitor.warning_ms == 0 || monitor.error_ms == 0 {
            return Err(ConfigError::Invalid("monitor times must be positive".into()));
        }
        if monitor.warning_ms >= monitor.error_ms {
            return Err(ConfigError::Invalid(format!(
                "monitor warningMs ({}) must be below errorMs ({})",
                monitor.warning_ms, monitor.error_ms
            )));
        }

        Ok(ControllerConfig {
            id: self.id,
            protocol: self.protocol,
            heartbeat: Duration::from_millis(self.heartbeat_ms),
            monitor: Thresholds {
                poll: Duration::from_millis(monitor.poll_ms),
                warning: Duration::from_millis(monitor.warning_ms),
                error: Duration::from_millis(monitor.error_ms),
            },
        })
    }
}

/// Communication monitor timing, in milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub poll_ms: u64,
    pub warning_ms: u64,
    pub error_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> MonitorConfig {
        MonitorConfig {
            poll_ms: 120_000,
            warning_ms: 180_000,
            error_ms: 300_000,
        }
    }
}

/// Transport configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "method")]
pub enum ControlConfig {
    Tcp {
        /// Host name or IP address.
        address: String,
        port: u16,
    },
    Serial {
        /// Path to a serial device.
        port: String,
        #[serde(rename = "baudRate", default = "default_baud_rate")]
        baud_rate: u32,
    },
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config: {0}")]
    Io(#[from] io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate device key: {0}")]
    DuplicateKey(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub fn read_config_yaml<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let file = fs::File::open(path)?;
    let root: Root = serde_yaml::from_reader(io::BufReader::new(file)).map_err(|err| {
        error!("Error reading config file: {}", err);
        err
    })?;
    check(root)
}

pub fn read_config_json<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let file = fs::File::open(path)?;
    let root: Root = serde_json::from_reader(io::BufReader::new(file)).map_err(|err| {
        error!("Error reading config file: {}", err);
        err
    })?;
    check(root)
}

/// Read either format, picked by file extension.
pub fn read_config<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    match path.as_ref().extension().and_then(|ext| ext.to_str()) {
        Some("json") => read_config_json(path),
        _ => read_config_yaml(path),
    }
}

pub fn parse_yaml(text: &str) -> ConfigResult<Root> {
    check(serde_yaml::from_str(text)?)
}

/// Quick sanity check for the configuration.
fn check(root: Root) -> ConfigResult<Root> {
    let mut keys = HashSet::new();
    for device in &root.devices {
        if !keys.insert(device.key.as_str()) {
            error!("Device key {} is used more than once", device.key);
            return Err(ConfigError::DuplicateKey(device.key.clone()));
        }
        if let Some(bridge) = &device.bridge {
            if bridge.join_start > MAX_JOIN_START {
                error!("Device {} has join start {}", device.key, bridge.join_start);
                return Err(ConfigError::Invalid(format!(
                    "{}: joinStart must be at most {}",
                    device.key, MAX_JOIN_START
                )));
            }
        }
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
devices:
  - key: wall-1
    name: Main Wall
    type: colorlightz6
    properties:
      id: 171
      protocol: legacy
      heartbeatMs: 30000
      control:
        method: tcp
        address: 10.0.0.50
        port: 9099
      monitor:
        pollMs: 1000
    bridge:
      joinStart: 11
      joins:
        brightness: 50
  - key: wall-2
    name: Side Wall
    type: ColorlightZ6
    properties:
      id: 2
      control:
        method: serial
        port: /dev/ttyUSB0
"#;

    #[test]
    fn parses_sample() {
        let root = parse_yaml(SAMPLE).unwrap();
        assert_eq!(root.devices.len(), 2);

        let wall = &root.devices[0];
        assert_eq!(wall.kind, "colorlightz6");
        let props: ColorlightProperties = serde_json::from_value(wall.properties.clone()).unwrap();
        assert_eq!(props.id, DeviceId(171));
        assert_eq!(props.protocol, ProtocolVariant::Legacy);
        assert_eq!(
            props.control,
            Some(ControlConfig::Tcp {
                address: "10.0.0.50".into(),
                port: 9099
            })
        );
        let config = props.controller_config().unwrap();
        assert_eq!(config.heartbeat, Duration::from_millis(30000));
        assert_eq!(config.monitor.poll, Duration::from_millis(1000));
        assert_eq!(config.monitor.error, Duration::from_millis(300_000));

        let bridge = wall.bridge.as_ref().unwrap();
        assert_eq!(bridge.join_start, 11);
        assert_eq!(bridge.joins.get("brightness"), Some(&50));

        let side: ColorlightProperties =
            serde_json::from_value(root.devices[1].properties.clone()).unwrap();
        assert_eq!(side.protocol, ProtocolVariant::Current);
        assert_eq!(side.heartbeat_ms, 1000);
        assert_eq!(
            side.control,
            Some(ControlConfig::Serial {
                port: "/dev/ttyUSB0".into(),
                baud_rate: DEFAULT_BAUD_RATE
            })
        );
    }

    #[test]
    fn rejects_duplicate_keys() {
        let text = r#"
devices:
  - { key: a, name: A, type: colorlightz6 }
  - { key: a, name: B, type: colorlightz6 }
"#;
        assert!(matches!(parse_yaml(text), Err(ConfigError::DuplicateKey(key)) if key == "a"));
    }

    #[test]
    fn rejects_join_start_past_limit() {
        let text = r#"
devices:
  - { key: a, name: A, type: colorlightz6, bridge: { joinStart: 4294967295 } }
"#;
        assert!(matches!(parse_yaml(text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_inverted_monitor_times() {
        let props: ColorlightProperties = serde_json::from_value(serde_json::json!({
            "id": 0,
            "monitor": { "warningMs": 5000, "errorMs": 4000 }
        }))
        .unwrap();
        assert!(matches!(props.controller_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_id_is_an_error() {
        let result: Result<ColorlightProperties, _> =
            serde_json::from_value(serde_json::json!({ "control": null }));
        assert!(result.is_err());
    }
}
