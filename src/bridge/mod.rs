//! Numbered-signal bridge for control panels.
//!
//! Panels address a device through numbered joins: digital (bool), analog
//! (u16) and serial (string). A [`JoinMap`] assigns the controller's
//! operations to join numbers, offset by the device's join start.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::controller::Controller;
use crate::monitor::HealthChange;

/// Highest join start that keeps every default join within `u32`.
pub const MAX_JOIN_START: u32 = u32::MAX - 2;

/// Join numbers for one device, already offset by its join start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinMap {
    /// Digital, from panel.
    pub show_off: u32,
    /// Digital, from panel.
    pub show_on: u32,
    /// Digital, to panel.
    pub is_online: u32,
    /// Analog, from panel.
    pub brightness: u32,
    /// Analog, from panel.
    pub preset: u32,
    /// Serial, to panel.
    pub name: u32,
}

impl Default for JoinMap {
    fn default() -> JoinMap {
        JoinMap {
            show_off: 1,
            show_on: 2,
            is_online: 3,
            brightness: 1,
            preset: 2,
            name: 1,
        }
    }
}

impl JoinMap {
    /// Default joins shifted so that join 1 lands on `join_start`. Starts
    /// above [`MAX_JOIN_START`] are clamped to it.
    pub fn new(join_start: u32) -> JoinMap {
        if join_start > MAX_JOIN_START {
            warn!(
                "[bridge] Join start {} out of range, using {}",
                join_start, MAX_JOIN_START
            );
        }
        let offset = join_start.clamp(1, MAX_JOIN_START) - 1;
        let base = JoinMap::default();
        JoinMap {
            show_off: base.show_off + offset,
            show_on: base.show_on + offset,
            is_online: base.is_online + offset,
            brightness: base.brightness + offset,
            preset: base.preset + offset,
            name: base.name + offset,
        }
    }

    /// Replace individual joins by name. Unknown names are logged and ignored.
    pub fn with_custom(mut self, joins: &HashMap<String, u32>) -> JoinMap {
        for (name, join) in joins {
            let slot = match name.to_ascii_lowercase().as_str() {
                "showoff" | "show_off" => &mut self.show_off,
                "showon" | "show_on" => &mut self.show_on,
                "isonline" | "is_online" => &mut self.is_online,
                "brightness" => &mut self.brightness,
                "preset" => &mut self.preset,
                "name" | "devicename" => &mut self.name,
                _ => {
                    warn!("[bridge] Unknown join name {}", name);
                    continue;
                }
            };
            *slot = *join;
        }
        self
    }
}

/// Signals arriving from a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Digital { join: u32, value: bool },
    Analog { join: u32, value: u16 },
    /// The panel itself came online or went away.
    PanelOnline(bool),
}

/// Values to push back to a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Digital { join: u32, value: bool },
    Serial { join: u32, value: String },
}

/// Binds one controller to a panel's joins.
pub struct BridgeLink {
    joins: JoinMap,
    controller: Arc<Controller>,
}

impl BridgeLink {
    pub fn new(controller: Arc<Controller>, joins: JoinMap) -> BridgeLink {
        info!(
            "[bridge] Linking {} (show {}/{}, brightness {}, preset {})",
            controller.name(),
            joins.show_on,
            joins.show_off,
            joins.brightness,
            joins.preset
        );
        BridgeLink { joins, controller }
    }

    pub fn joins(&self) -> &JoinMap {
        &self.joins
    }

    /// Run the operation bound to a signal. Digital joins act on true only.
    pub fn handle(&self, signal: Signal) -> Vec<Feedback> {
        match signal {
            Signal::Digital { join, value: true } if join == self.joins.show_on => {
                self.controller.set_show_on()
            }
            Signal::Digital { join, value: true } if join == self.joins.show_off => {
                self.controller.set_show_off()
            }
            Signal::Digital { .. } => {}
            Signal::Analog { join, value } if join == self.joins.brightness => {
                self.controller.set_brightness(value)
            }
            Signal::Analog { join, value } if join == self.joins.preset => {
                self.controller.recall_preset(value)
            }
            Signal::Analog { join, .. } => {
                debug!("[bridge] No analog action on join {}", join);
            }
            Signal::PanelOnline(true) => return self.feedback(),
            Signal::PanelOnline(false) => {}
        }
        Vec::new()
    }

    /// Full feedback snapshot: device name and online state.
    pub fn feedback(&self) -> Vec<Feedback> {
        vec![
            Feedback::Serial {
                join: self.joins.name,
                value: self.controller.name().to_owned(),
            },
            Feedback::Digital {
                join: self.joins.is_online,
                value: self.controller.is_online(),
            },
        ]
    }

    /// Feedback for a health change, if the online flag flipped.
    pub fn health_feedback(&self, change: HealthChange) -> Option<Feedback> {
        if change.online_changed() {
            Some(Feedback::Digital {
                join: self.joins.is_online,
                value: change.current.is_online(),
            })
        } else {
            None
        }
    }
}
