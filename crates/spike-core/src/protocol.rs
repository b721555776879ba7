//! Device byte protocol: framing constants, scaling profiles and control messages
//!
//! A frame starts with a byte whose bit 7 is set; that byte carries the high
//! seven bits of channel 0. Every sample is two bytes, MSB then LSB, each
//! carrying seven data bits, so a raw sample is 14 bits wide. In-band control
//! messages are ASCII text wrapped in two fixed six-byte markers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker opening an in-band control message
pub const ESCAPE_SEQUENCE_START: [u8; 6] = [0xFF, 0xFF, 0x01, 0x01, 0x80, 0xFF];

/// Marker closing an in-band control message
pub const ESCAPE_SEQUENCE_END: [u8; 6] = [0xFF, 0xFF, 0x01, 0x01, 0x81, 0xFF];

/// Maximum length of a control message body in bytes
pub const MAX_MESSAGE_LEN: usize = 64;

/// Bit set on the first byte of every frame
pub const FRAME_START_FLAG: u8 = 0x80;

/// Seven data bits carried by every sample byte
pub const DATA_MASK: u8 = 0x7F;

/// Largest raw sample value (14 bits)
pub const MAX_RAW_SAMPLE: u16 = 0x3FFF;

/// How raw 14-bit words map to signed samples
///
/// The set is closed: a board that needs a different mapping gets a new
/// variant, never an inferred one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceProfile {
    /// 10-bit ADC boards: `(raw - 512) * 30`
    #[default]
    TenBit,
    /// 14-bit ADC boards: `raw - 8192`
    FourteenBit,
}

/// Hardware type strings reported by 14-bit boards
const FOURTEEN_BIT_HARDWARE: &[&str] = &["MSBPCDC", "NSBPCDC", "SBPRO", "HHIBOX"];

/// Hardware type strings reported by 10-bit boards
const TEN_BIT_HARDWARE: &[&str] = &["MUSCLESS", "HEARTSS", "PLANTSS", "NEURONSS", "MUSCUSB"];

impl DeviceProfile {
    /// Look up the scaling profile for a `HWT:` reply
    pub fn for_hardware(hardware_type: &str) -> Option<Self> {
        if FOURTEEN_BIT_HARDWARE.contains(&hardware_type) {
            Some(DeviceProfile::FourteenBit)
        } else if TEN_BIT_HARDWARE.contains(&hardware_type) {
            Some(DeviceProfile::TenBit)
        } else {
            None
        }
    }

    /// Rebase a raw 14-bit word to a signed sample value
    pub fn rebase(&self, raw: u16) -> i32 {
        match self {
            DeviceProfile::TenBit => (raw as i32 - 512) * 30,
            DeviceProfile::FourteenBit => raw as i32 - 8192,
        }
    }

    /// Inverse of [`rebase`](Self::rebase), clamped to what the wire can carry
    pub fn raw_from_value(&self, value: i32) -> u16 {
        let raw = match self {
            DeviceProfile::TenBit => value.div_euclid(30) + 512,
            DeviceProfile::FourteenBit => value + 8192,
        };
        raw.clamp(0, MAX_RAW_SAMPLE as i32) as u16
    }
}

/// Expansion board reported by `BRD:`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpansionBoard {
    #[default]
    None,
    /// Two extra bioelectric inputs
    AdditionalInputs,
    /// Reflex hammer on the last channel
    Hammer,
    /// Joystick axes on the last two channels
    Joystick,
    Unknown(u8),
}

impl ExpansionBoard {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ExpansionBoard::None,
            1 => ExpansionBoard::AdditionalInputs,
            4 => ExpansionBoard::Hammer,
            5 => ExpansionBoard::Joystick,
            other => ExpansionBoard::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ExpansionBoard::None => 0,
            ExpansionBoard::AdditionalInputs => 1,
            ExpansionBoard::Hammer => 4,
            ExpansionBoard::Joystick => 5,
            ExpansionBoard::Unknown(code) => *code,
        }
    }

    /// Trailing channels that carry non-bioelectric data and must not be filtered
    pub fn unfiltered_channels(&self) -> usize {
        match self {
            ExpansionBoard::Hammer => 1,
            ExpansionBoard::Joystick => 2,
            _ => 0,
        }
    }
}

/// Parsed in-band control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// `HWT:<name>;`
    HardwareType(String),
    /// `MSF:<rate>;MNC:<channels>;`
    StreamFormat {
        sample_rate: u32,
        channel_count: usize,
    },
    /// `BRD:<code>;`
    ExpansionBoard(ExpansionBoard),
    /// `EVNT:<label>;`
    Event(String),
    /// Anything else, kept verbatim
    Unknown(String),
}

impl ControlMessage {
    /// Parse the text between the escape markers
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

        let fields: Vec<(&str, &str)> = text
            .split(';')
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .filter_map(|field| field.split_once(':'))
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect();

        let lookup = |wanted: &str| {
            fields
                .iter()
                .find(|(key, _)| *key == wanted)
                .map(|(_, value)| *value)
        };

        match fields.first().map(|(key, _)| *key) {
            Some("HWT") => lookup("HWT")
                .map(|name| ControlMessage::HardwareType(name.to_string()))
                .unwrap_or_else(|| ControlMessage::Unknown(text.to_string())),
            Some("MSF") | Some("MNC") => {
                let sample_rate = lookup("MSF").and_then(|v| v.parse::<u32>().ok());
                let channel_count = lookup("MNC").and_then(|v| v.parse::<usize>().ok());
                match (sample_rate, channel_count) {
                    (Some(sample_rate), Some(channel_count)) => ControlMessage::StreamFormat {
                        sample_rate,
                        channel_count,
                    },
                    _ => ControlMessage::Unknown(text.to_string()),
                }
            }
            Some("BRD") => lookup("BRD")
                .and_then(|v| v.parse::<u8>().ok())
                .map(|code| ControlMessage::ExpansionBoard(ExpansionBoard::from_code(code)))
                .unwrap_or_else(|| ControlMessage::Unknown(text.to_string())),
            Some("EVNT") => lookup("EVNT")
                .map(|label| ControlMessage::Event(label.to_string()))
                .unwrap_or_else(|| ControlMessage::Unknown(text.to_string())),
            _ => ControlMessage::Unknown(text.to_string()),
        }
    }

    /// Encode the message as it appears on the wire, markers included
    pub fn to_wire(&self) -> Vec<u8> {
        let body = self.to_string();
        let mut out = Vec::with_capacity(body.len() + 2 * ESCAPE_SEQUENCE_START.len());
        out.extend_from_slice(&ESCAPE_SEQUENCE_START);
        out.extend_from_slice(body.as_bytes());
        out.extend_from_slice(&ESCAPE_SEQUENCE_END);
        out
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::HardwareType(name) => write!(f, "HWT:{};", name),
            ControlMessage::StreamFormat {
                sample_rate,
                channel_count,
            } => write!(f, "MSF:{};MNC:{};", sample_rate, channel_count),
            ControlMessage::ExpansionBoard(board) => write!(f, "BRD:{};", board.code()),
            ControlMessage::Event(label) => write!(f, "EVNT:{};", label),
            ControlMessage::Unknown(text) => write!(f, "{}", text),
        }
    }
}

/// Append one frame of raw 14-bit words to `out`
pub fn encode_frame(raw_samples: &[u16], out: &mut Vec<u8>) {
    for (channel, &raw) in raw_samples.iter().enumerate() {
        let raw = raw.min(MAX_RAW_SAMPLE);
        let msb = ((raw >> 7) as u8) & DATA_MASK;
        let lsb = (raw as u8) & DATA_MASK;
        if channel == 0 {
            out.push(msb | FRAME_START_FLAG);
        } else {
            out.push(msb);
        }
        out.push(lsb);
    }
}
