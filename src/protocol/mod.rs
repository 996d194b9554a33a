//! Colorlight Z6 binary command format.
//!
//! Every command frame shares the same 16-byte header:
//!
//! ```text
//! opcode 00 len 00 00 00 id_hi id_lo FF 00 00 00 00 00 00 00
//! ```
//!
//! followed by an operation-specific payload. Heartbeats are fixed sequences
//! that depend on the protocol variant.

use byteorder::{NativeEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opcode for setting the output brightness.
pub const OP_BRIGHTNESS: u8 = 0x21;
/// Opcode for recalling a stored preset.
pub const OP_PRESET: u8 = 0x74;
/// Opcode for turning the show (display output) on or off.
pub const OP_SHOW: u8 = 0x11;

/// Byte offset of the device id (high byte first) in every command frame.
pub const ID_OFFSET: usize = 6;
/// Length of the shared command header.
pub const HEADER_LEN: usize = 16;

const HEARTBEAT_CURRENT: [u8; 8] = [0x99, 0x99, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00];
const HEARTBEAT_LEGACY: [u8; 4] = [0x99, 0x99, 0x04, 0x00];

/// Device identity as configured on the receiver card.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct DeviceId(pub u16);

impl DeviceId {
    pub fn high(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn low(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Firmware revisions disagree on the heartbeat frame and on whether the
/// brightness fraction is rounded. Pick one per device in the configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolVariant {
    /// 8-byte heartbeat, brightness rounded to one decimal place.
    #[default]
    Current,
    /// 4-byte heartbeat, unrounded brightness.
    Legacy,
}

/// Semantic commands understood by the receiver card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Brightness as a 16-bit fader position, 0..=65535.
    Brightness(u16),
    /// Preset slot. Only the low 8 bits reach the device.
    Preset(u16),
    /// Show on (true) or off (false).
    Show(bool),
    Heartbeat,
}

/// Stateless frame builder for one device.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    id: DeviceId,
    variant: ProtocolVariant,
}

impl Encoder {
    pub fn new(id: DeviceId, variant: ProtocolVariant) -> Encoder {
        Encoder { id, variant }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Build the wire frame for a command.
    pub fn encode(&self, cmd: Command) -> Vec<u8> {
        match cmd {
            Command::Brightness(level) => self.brightness(level),
            Command::Preset(preset) => self.preset(preset),
            Command::Show(on) => self.show(on),
            Command::Heartbeat => self.heartbeat(),
        }
    }

    pub fn brightness(&self, level: u16) -> Vec<u8> {
        let mut frame = self.header(OP_BRIGHTNESS, 0x14);
        let fraction = brightness_fraction(level, self.variant);
        // Writing into a Vec cannot fail.
        frame.write_f32::<NativeEndian>(fraction).ok();
        frame
    }

    /// Values above 255 are truncated to their low byte.
    pub fn preset(&self, preset: u16) -> Vec<u8> {
        let mut frame = self.header(OP_PRESET, 0x11);
        frame.push(preset as u8);
        frame
    }

    pub fn show(&self, on: bool) -> Vec<u8> {
        let mut frame = self.header(OP_SHOW, 0x11);
        frame.push(on as u8);
        frame
    }

    pub fn heartbeat(&self) -> Vec<u8> {
        heartbeat_frame(self.variant).to_vec()
    }

    fn header(&self, opcode: u8, len: u8) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + 4);
        frame.extend_from_slice(&[opcode, 0x00, len, 0x00, 0x00, 0x00]);
        frame.push(self.id.high());
        frame.push(self.id.low());
        frame.push(0xff);
        frame.extend_from_slice(&[0x00; 7]);
        frame
    }
}

/// The fixed heartbeat sequence for a protocol variant.
pub fn heartbeat_frame(variant: ProtocolVariant) -> &'static [u8] {
    match variant {
        ProtocolVariant::Current => &HEARTBEAT_CURRENT,
        ProtocolVariant::Legacy => &HEARTBEAT_LEGACY,
    }
}

/// Convert a 16-bit fader level to the 0.0..=1.0 fraction sent on the wire.
pub fn brightness_fraction(level: u16, variant: ProtocolVariant) -> f32 {
    let fraction = level as f32 / 65535.0;
    match variant {
        ProtocolVariant::Current => ((fraction as f64 * 10.0).round() / 10.0) as f32,
        ProtocolVariant::Legacy => fraction,
    }
}

/// Format a frame as dash-separated hex, e.g. `21-00-14`.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailing_f32(frame: &[u8]) -> f32 {
        let tail: [u8; 4] = frame[frame.len() - 4..].try_into().unwrap();
        f32::from_ne_bytes(tail)
    }

    #[test]
    fn brightness_frame_layout() {
        let encoder = Encoder::new(DeviceId(0x00ab), ProtocolVariant::Current);
        let frame = encoder.brightness(32768);
        assert_eq!(
            &frame[..HEADER_LEN],
            &[
                0x21, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0xab, 0xff, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00
            ]
        );
        assert_eq!(frame.len(), HEADER_LEN + 4);
        assert_eq!(&frame[HEADER_LEN..], &0.5f32.to_ne_bytes());
    }

    #[test]
    fn brightness_rounding_by_variant() {
        let current = Encoder::new(DeviceId(1), ProtocolVariant::Current);
        let legacy = Encoder::new(DeviceId(1), ProtocolVariant::Legacy);

        for level in 0..=u16::MAX {
            let exact = level as f32 / 65535.0;
            let rounded = trailing_f32(&current.brightness(level));
            assert!((rounded - exact).abs() <= 0.05 + f32::EPSILON, "level {}", level);
            let tenths = rounded as f64 * 10.0;
            assert!((tenths - tenths.round()).abs() < 1e-5, "level {}", level);

            assert_eq!(trailing_f32(&legacy.brightness(level)), exact, "level {}", level);
        }

        assert_eq!(trailing_f32(&current.brightness(0)), 0.0);
        assert_eq!(trailing_f32(&current.brightness(65535)), 1.0);
        assert_eq!(trailing_f32(&current.brightness(20000)), 0.3);
    }

    #[test]
    fn preset_truncates_to_low_byte() {
        let encoder = Encoder::new(DeviceId(7), ProtocolVariant::Current);
        for preset in [0u16, 1, 44, 255, 256, 300, 511, 65535] {
            let frame = encoder.preset(preset);
            assert_eq!(frame.len(), HEADER_LEN + 1);
            assert_eq!(frame[0], OP_PRESET);
            assert_eq!(frame[2], 0x11);
            assert_eq!(*frame.last().unwrap() as u16, preset % 256);
        }
        assert_eq!(*encoder.preset(300).last().unwrap(), 0x2c);
    }

    #[test]
    fn show_on_and_off_differ_only_in_last_byte() {
        let encoder = Encoder::new(DeviceId(0x1234), ProtocolVariant::Current);
        let on = encoder.show(true);
        let off = encoder.show(false);
        assert_eq!(on.len(), off.len());
        assert_eq!(on[..on.len() - 1], off[..off.len() - 1]);
        assert_eq!(on.last(), Some(&0x01));
        assert_eq!(off.last(), Some(&0x00));
        assert_eq!(on[0], OP_SHOW);
    }

    #[test]
    fn device_id_embedded_in_every_command() {
        let encoder = Encoder::new(DeviceId(0x1234), ProtocolVariant::Legacy);
        let cmds = [
            Command::Brightness(1000),
            Command::Preset(3),
            Command::Show(true),
            Command::Show(false),
        ];
        for cmd in cmds {
            let frame = encoder.encode(cmd);
            assert_eq!(&frame[ID_OFFSET..ID_OFFSET + 2], &[0x12, 0x34], "{:?}", cmd);
            assert_eq!(frame[ID_OFFSET + 2], 0xff);
        }
    }

    #[test]
    fn zero_id_is_valid() {
        let encoder = Encoder::new(DeviceId(0), ProtocolVariant::Current);
        let frame = encoder.show(true);
        assert_eq!(&frame[ID_OFFSET..ID_OFFSET + 2], &[0x00, 0x00]);
    }

    #[test]
    fn heartbeat_variants() {
        let current = Encoder::new(DeviceId(9), ProtocolVariant::Current);
        let legacy = Encoder::new(DeviceId(9), ProtocolVariant::Legacy);
        assert_eq!(
            current.encode(Command::Heartbeat),
            vec![0x99, 0x99, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(legacy.encode(Command::Heartbeat), vec![0x99, 0x99, 0x04, 0x00]);
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(hex(&[0x21, 0x00, 0xab]), "21-00-AB");
        assert_eq!(hex(&[]), "");
    }
}
