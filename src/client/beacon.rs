//! Keep-alive beacon protocol
//!
//! The device is told every `beacon_interval_ms` that we want pushed updates, and
//! answers with a "sensing" message while it is alive. A missing sensing message
//! for longer than `sensing_timeout_ms` means the link is lost.

use tracing::{debug, trace};

use super::bidirectional::{BidirectionalProtocol, ConnectionState};
use super::Client;
use crate::mapping::Mapping;
use crate::midi::MidiMessage;

#[derive(Debug, Clone)]
pub struct BeaconOptions {
    /// Message transmitted as keep-alive
    pub beacon: MidiMessage,
    /// Prefix of the device's sensing message (manufacturer id + leading data)
    pub sensing: MidiMessage,
    pub beacon_interval_ms: u64,
    pub sensing_timeout_ms: u64,
    /// Response templates of the mappings the device pushes
    pub pushed: Vec<MidiMessage>,
    /// Trust locally set values of pushed mappings without reading them back
    pub trust_feedback: bool,
}

/// Reference bidirectional protocol
pub struct BeaconProtocol {
    options: BeaconOptions,
    last_beacon_ms: Option<u64>,
    last_sensing_ms: Option<u64>,
    state: ConnectionState,
}

impl BeaconProtocol {
    pub fn new(options: BeaconOptions) -> Self {
        Self {
            options,
            last_beacon_ms: None,
            last_sensing_ms: None,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn is_sensing(&self, message: &MidiMessage) -> bool {
        match (&self.options.sensing, message) {
            (
                MidiMessage::SystemExclusive { manufacturer_id: id, data: prefix },
                MidiMessage::SystemExclusive { manufacturer_id: in_id, data },
            ) => id == in_id && data.starts_with(prefix),
            (template, message) => template == message,
        }
    }
}

impl BidirectionalProtocol for BeaconProtocol {
    fn is_bidirectional(&self, mapping: &Mapping) -> bool {
        mapping
            .response
            .as_ref()
            .is_some_and(|r| self.options.pushed.contains(r))
    }

    fn feedback_value(&self, mapping: &Mapping) -> bool {
        self.options.trust_feedback && self.is_bidirectional(mapping)
    }

    fn receive(&mut self, message: &MidiMessage, now_ms: u64) -> bool {
        if !self.is_sensing(message) {
            return false;
        }
        trace!("Sensing at {} ms", now_ms);
        self.last_sensing_ms = Some(now_ms);
        true
    }

    fn update(&mut self, client: &mut Client) -> ConnectionState {
        let now = client.clock.now_ms();

        let beacon_due = self
            .last_beacon_ms
            .map_or(true, |t| now.saturating_sub(t) >= self.options.beacon_interval_ms);
        if beacon_due {
            debug!("Sending beacon");
            client.send_message(&self.options.beacon);
            self.last_beacon_ms = Some(now);
        }

        self.state = match self.last_sensing_ms {
            Some(t) if now.saturating_sub(t) <= self.options.sensing_timeout_ms => {
                ConnectionState::Connected
            }
            Some(_) => ConnectionState::Lost,
            None => self.state,
        };
        self.state
    }
}
