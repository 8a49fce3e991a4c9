//! Value providers: the per-device wire encoding of parameter values
//!
//! A provider embeds values into set templates and decodes values out of
//! responses. Writing `Mapping::value` is the only side effect it may have.

use std::ops::Range;
use tracing::trace;

use crate::mapping::{Mapping, Value, ValueKind};
use crate::midi::MidiMessage;

/// Encoding/decoding plug-in, exactly one per client
pub trait ValueProvider {
    /// Embed `value` into the mapping's set template
    fn set_value(&self, mapping: &mut Mapping, value: &Value);

    /// Decode `message` into `mapping.value` if it answers the mapping's response
    /// template. Must return false and leave the mapping untouched otherwise.
    fn parse(&self, mapping: &mut Mapping, message: &MidiMessage) -> bool;
}

/// Default SysEx bytes that identify a parameter: function code, instance,
/// address page and address number, after two device/product bytes
pub const DEFAULT_ADDRESS_WINDOW: Range<usize> = 2..6;

/// Reference provider for devices that answer parameter reads with SysEx
///
/// Numeric values travel as a 14-bit pair in the last two data bytes, text as
/// ASCII after the address window terminated by a zero byte. ControlChange and
/// ProgramChange templates carry the value in their value byte.
#[derive(Debug, Clone)]
pub struct SysExValueProvider {
    address: Range<usize>,
}

impl SysExValueProvider {
    /// Provider comparing the given data byte window of response and template
    pub fn new(address: Range<usize>) -> Self {
        Self { address }
    }

    fn decode_sysex(&self, kind: ValueKind, data: &[u8]) -> Option<Value> {
        match kind {
            ValueKind::Numeric => {
                if data.len() < self.address.end + 2 {
                    return None;
                }
                let msb = data[data.len() - 2] as i32;
                let lsb = data[data.len() - 1] as i32;
                Some(Value::Number(msb * 128 + lsb))
            }
            ValueKind::Text => {
                let text: String = data[self.address.end..]
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| b as char)
                    .collect();
                Some(Value::Text(text))
            }
        }
    }
}

impl Default for SysExValueProvider {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS_WINDOW)
    }
}

impl ValueProvider for SysExValueProvider {
    fn set_value(&self, mapping: &mut Mapping, value: &Value) {
        let Some(set) = mapping.set.as_mut() else {
            return;
        };

        match set {
            MidiMessage::ControlChange { value: byte, .. } => {
                *byte = value.as_number().unwrap_or(0).clamp(0, 127) as u8;
            }
            MidiMessage::ProgramChange { program, .. } => {
                *program = value.as_number().unwrap_or(0).clamp(0, 127) as u8;
            }
            MidiMessage::SystemExclusive { data, .. } => match value {
                Value::Number(n) => {
                    let n = (*n).clamp(0, 16383);
                    while data.len() < self.address.end + 2 {
                        data.push(0);
                    }
                    let len = data.len();
                    data[len - 2] = ((n >> 7) & 0x7F) as u8;
                    data[len - 1] = (n & 0x7F) as u8;
                }
                Value::Text(text) => {
                    data.resize(self.address.end, 0);
                    data.extend(text.bytes().map(|b| b & 0x7F));
                    data.push(0);
                }
            },
        }
    }

    fn parse(&self, mapping: &mut Mapping, message: &MidiMessage) -> bool {
        let Some(response) = mapping.response.as_ref() else {
            return false;
        };

        let decoded = match (response, message) {
            (
                MidiMessage::ControlChange { channel, control, .. },
                MidiMessage::ControlChange { channel: in_channel, control: in_control, value },
            ) if channel == in_channel && control == in_control => Some(Value::Number(*value as i32)),
            (
                MidiMessage::SystemExclusive { manufacturer_id, data: template },
                MidiMessage::SystemExclusive { manufacturer_id: in_id, data },
            ) if manufacturer_id == in_id => {
                let window = self.address.clone();
                if template.len() < window.end || data.len() < window.end {
                    return false;
                }
                if template[window.clone()] != data[window] {
                    return false;
                }
                self.decode_sysex(mapping.kind, data)
            }
            _ => None,
        };

        match decoded {
            Some(value) => {
                trace!("{} ← {}", mapping.name, value);
                mapping.value = Some(value);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: [u8; 3] = [0x00, 0x20, 0x33];

    fn sysex(data: &[u8]) -> MidiMessage {
        MidiMessage::SystemExclusive {
            manufacturer_id: ID.to_vec(),
            data: data.to_vec(),
        }
    }

    fn numeric_mapping() -> Mapping {
        Mapping::new("volume")
            .with_set(sysex(&[0x02, 0x7F, 0x01, 0x00, 0x04, 0x01, 0x00, 0x00]))
            .with_request(sysex(&[0x02, 0x7F, 0x41, 0x00, 0x04, 0x01]))
            .with_response(sysex(&[0x02, 0x7F, 0x01, 0x00, 0x04, 0x01]))
    }

    #[test]
    fn test_numeric_sysex_round_trip_fields() {
        let provider = SysExValueProvider::default();
        let mut mapping = numeric_mapping();

        provider.set_value(&mut mapping, &Value::Number(300));
        assert_eq!(
            mapping.set,
            Some(sysex(&[0x02, 0x7F, 0x01, 0x00, 0x04, 0x01, 0x02, 0x2C]))
        );

        let answer = sysex(&[0x02, 0x7F, 0x01, 0x00, 0x04, 0x01, 0x00, 0x2A]);
        assert!(provider.parse(&mut mapping, &answer));
        assert_eq!(mapping.value, Some(Value::Number(42)));
    }

    #[test]
    fn test_parse_rejects_other_address() {
        let provider = SysExValueProvider::default();
        let mut mapping = numeric_mapping();

        let other = sysex(&[0x02, 0x7F, 0x01, 0x00, 0x04, 0x02, 0x00, 0x2A]);
        assert!(!provider.parse(&mut mapping, &other));
        assert_eq!(mapping.value, None);
    }

    #[test]
    fn test_parse_rejects_other_manufacturer_and_shape() {
        let provider = SysExValueProvider::default();
        let mut mapping = numeric_mapping();

        let foreign = MidiMessage::SystemExclusive {
            manufacturer_id: vec![0x41],
            data: vec![0x02, 0x7F, 0x01, 0x00, 0x04, 0x01, 0x00, 0x2A],
        };
        let cc = MidiMessage::ControlChange { channel: 0, control: 1, value: 1 };

        assert!(!provider.parse(&mut mapping, &foreign));
        assert!(!provider.parse(&mut mapping, &cc));
        assert_eq!(mapping.value, None);
    }

    #[test]
    fn test_text_values() {
        let provider = SysExValueProvider::default();
        let mut mapping = Mapping::new("rig name")
            .with_kind(ValueKind::Text)
            .with_set(sysex(&[0x02, 0x7F, 0x03, 0x00, 0x00, 0x01]))
            .with_response(sysex(&[0x02, 0x7F, 0x03, 0x00, 0x00, 0x01]));

        provider.set_value(&mut mapping, &Value::from("Lead"));
        assert_eq!(
            mapping.set,
            Some(sysex(&[0x02, 0x7F, 0x03, 0x00, 0x00, 0x01, b'L', b'e', b'a', b'd', 0]))
        );

        let answer = sysex(&[0x02, 0x7F, 0x03, 0x00, 0x00, 0x01, b'C', b'l', b'e', b'a', b'n', 0]);
        assert!(provider.parse(&mut mapping, &answer));
        assert_eq!(mapping.value, Some(Value::from("Clean")));
    }

    #[test]
    fn test_control_change_values() {
        let provider = SysExValueProvider::default();
        let template = MidiMessage::ControlChange { channel: 1, control: 20, value: 0 };
        let mut mapping = Mapping::new("boost")
            .with_set(template.clone())
            .with_response(template);

        provider.set_value(&mut mapping, &Value::Number(200));
        assert_eq!(
            mapping.set,
            Some(MidiMessage::ControlChange { channel: 1, control: 20, value: 127 })
        );

        let wrong_channel = MidiMessage::ControlChange { channel: 0, control: 20, value: 5 };
        assert!(!provider.parse(&mut mapping, &wrong_channel));

        let answer = MidiMessage::ControlChange { channel: 1, control: 20, value: 5 };
        assert!(provider.parse(&mut mapping, &answer));
        assert_eq!(mapping.value, Some(Value::Number(5)));
    }
}
