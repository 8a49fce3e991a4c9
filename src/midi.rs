//! MIDI message types
//!
//! The core only distinguishes two shapes: short fixed-field control messages and
//! variable-length SysEx blobs. Equality is by content.

use std::fmt;

/// SysEx manufacturer ids starting with this byte are three bytes long
const EXTENDED_MANUFACTURER_PREFIX: u8 = 0x00;

/// MIDI messages exchanged with the device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MidiMessage {
    /// Control Change: channel (0-15), control (0-127), value (0-127)
    ControlChange { channel: u8, control: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// System Exclusive: manufacturer id (1 or 3 bytes) and opaque payload
    SystemExclusive { manufacturer_id: Vec<u8>, data: Vec<u8> },
}

/// Shape of a message, used for type discrimination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    ControlChange,
    ProgramChange,
    SystemExclusive,
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes
    ///
    /// Anything the core has no use for (notes, clock, running status) yields `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;

        match status & 0xF0 {
            0xB0 => {
                if data.len() < 3 {
                    return None;
                }
                Some(MidiMessage::ControlChange {
                    channel: status & 0x0F,
                    control: data[1] & 0x7F,
                    value: data[2] & 0x7F,
                })
            }
            0xC0 => {
                if data.len() < 2 {
                    return None;
                }
                Some(MidiMessage::ProgramChange {
                    channel: status & 0x0F,
                    program: data[1] & 0x7F,
                })
            }
            0xF0 if status == 0xF0 => {
                let end = data.iter().position(|&b| b == 0xF7)?;
                let body = &data[1..end];
                let id_len = match body.first() {
                    Some(&EXTENDED_MANUFACTURER_PREFIX) => 3,
                    Some(_) => 1,
                    None => return None,
                };
                if body.len() < id_len {
                    return None;
                }
                Some(MidiMessage::SystemExclusive {
                    manufacturer_id: body[..id_len].to_vec(),
                    data: body[id_len..].to_vec(),
                })
            }
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            MidiMessage::ControlChange { channel, control, value } => {
                vec![0xB0 | (channel & 0x0F), control & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::SystemExclusive { manufacturer_id, data } => {
                let mut result = Vec::with_capacity(manufacturer_id.len() + data.len() + 2);
                result.push(0xF0);
                result.extend_from_slice(manufacturer_id);
                result.extend(data.iter().map(|b| b & 0x7F));
                result.push(0xF7);
                result
            }
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MidiMessage::ControlChange { .. } => MessageKind::ControlChange,
            MidiMessage::ProgramChange { .. } => MessageKind::ProgramChange,
            MidiMessage::SystemExclusive { .. } => MessageKind::SystemExclusive,
        }
    }

    /// True for the multi-byte shape that can identify a request/response round trip
    pub fn is_sysex(&self) -> bool {
        self.kind() == MessageKind::SystemExclusive
    }

    /// Get the channel for channel messages (0-15), None for SysEx
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. } => Some(channel),
            MidiMessage::SystemExclusive { .. } => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiMessage::ControlChange { channel, control, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, control, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::SystemExclusive { manufacturer_id, data } => {
                write!(f, "SysEx [{}] {}", format_hex(manufacturer_id), format_hex(data))
            }
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_change() {
        let data = vec![0xB2, 7, 100];
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(
            msg,
            MidiMessage::ControlChange {
                channel: 2,
                control: 7,
                value: 100,
            }
        );
        assert_eq!(msg.encode(), data);
    }

    #[test]
    fn test_sysex_single_byte_manufacturer() {
        let data = vec![0xF0, 0x41, 0x01, 0x02, 0xF7];
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(
            msg,
            MidiMessage::SystemExclusive {
                manufacturer_id: vec![0x41],
                data: vec![0x01, 0x02],
            }
        );
    }

    #[test]
    fn test_sysex_extended_manufacturer() {
        let data = vec![0xF0, 0x00, 0x20, 0x33, 0x02, 0x7F, 0x41, 0xF7];
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(
            msg,
            MidiMessage::SystemExclusive {
                manufacturer_id: vec![0x00, 0x20, 0x33],
                data: vec![0x02, 0x7F, 0x41],
            }
        );
        assert_eq!(msg.encode(), data);
    }

    #[test]
    fn test_unterminated_sysex_is_ignored() {
        assert_eq!(MidiMessage::parse(&[0xF0, 0x41, 0x01]), None);
    }

    #[test]
    fn test_foreign_messages_are_ignored() {
        // Note On, timing clock, empty buffer
        assert_eq!(MidiMessage::parse(&[0x90, 60, 100]), None);
        assert_eq!(MidiMessage::parse(&[0xF8]), None);
        assert_eq!(MidiMessage::parse(&[]), None);
    }

    #[test]
    fn test_kind_discrimination() {
        let cc = MidiMessage::ControlChange { channel: 0, control: 1, value: 2 };
        let pc = MidiMessage::ProgramChange { channel: 0, program: 3 };

        assert!(!cc.is_sysex());
        assert_eq!(pc.kind(), MessageKind::ProgramChange);
        assert_eq!(pc.channel(), Some(0));
    }
}
