//! Duplex MIDI transport
//!
//! The core only ever calls `send` and a non-blocking `receive`. Two implementations:
//! an in-process pair used by tests and simulations, and real ports through midir.

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

use crate::midi::{format_hex, MidiMessage};

/// Capacity of the queue between the midir callback thread and the tick loop
const INBOUND_QUEUE_SIZE: usize = 1024;

/// Non-blocking duplex MIDI channel
pub trait MidiTransport {
    /// Transmit a message
    fn send(&mut self, message: &MidiMessage);

    /// Take the next inbound message, if one is waiting
    fn receive(&mut self) -> Option<MidiMessage>;
}

type Queue = Rc<RefCell<VecDeque<MidiMessage>>>;

/// One end of an in-process duplex pair
pub struct MemoryTransport {
    inbox: Queue,
    outbox: Queue,
}

impl MemoryTransport {
    /// Create two connected ends: what one sends, the other receives
    pub fn pair() -> (Self, Self) {
        let a: Queue = Rc::new(RefCell::new(VecDeque::new()));
        let b: Queue = Rc::new(RefCell::new(VecDeque::new()));

        (
            Self { inbox: a.clone(), outbox: b.clone() },
            Self { inbox: b, outbox: a },
        )
    }

    /// Number of messages waiting to be received on this end
    pub fn pending(&self) -> usize {
        self.inbox.borrow().len()
    }

    /// Take every message waiting on this end
    pub fn drain(&mut self) -> Vec<MidiMessage> {
        self.inbox.borrow_mut().drain(..).collect()
    }
}

impl MidiTransport for MemoryTransport {
    fn send(&mut self, message: &MidiMessage) {
        self.outbox.borrow_mut().push_back(message.clone());
    }

    fn receive(&mut self) -> Option<MidiMessage> {
        self.inbox.borrow_mut().pop_front()
    }
}

/// Real MIDI ports via midir
///
/// midir delivers input on its own thread; bytes are queued and picked up by
/// `receive` on the tick loop.
pub struct MidirTransport {
    _input_conn: MidiInputConnection<()>,
    output_conn: MidiOutputConnection,
    inbound_rx: Receiver<Vec<u8>>,
}

impl MidirTransport {
    /// Connect to the first input and output ports whose names contain the patterns
    pub fn connect(client_name: &str, input_pattern: &str, output_pattern: &str) -> Result<Self> {
        info!(
            "Connecting MIDI - Input: '{}', Output: '{}'",
            input_pattern, output_pattern
        );

        let midi_in = MidiInput::new(&format!("{}-Input", client_name))
            .context("Failed to create MIDI input")?;
        let (in_port, in_name) = find_input_port(&midi_in, input_pattern)
            .ok_or_else(|| anyhow::anyhow!("Input port '{}' not found", input_pattern))?;

        let (inbound_tx, inbound_rx) = channel::bounded(INBOUND_QUEUE_SIZE);
        let input_conn = connect_input(midi_in, &in_port, client_name, inbound_tx)?;
        info!("Connected to input port: {}", in_name);

        let midi_out = MidiOutput::new(&format!("{}-Output", client_name))
            .context("Failed to create MIDI output")?;
        let (out_port, out_name) = find_output_port(&midi_out, output_pattern)
            .ok_or_else(|| anyhow::anyhow!("Output port '{}' not found", output_pattern))?;
        let output_conn = midi_out
            .connect(&out_port, client_name)
            .map_err(|e| anyhow::anyhow!("Failed to connect to output port: {}", e))?;
        info!("Connected to output port: {}", out_name);

        Ok(Self {
            _input_conn: input_conn,
            output_conn,
            inbound_rx,
        })
    }
}

impl MidiTransport for MidirTransport {
    fn send(&mut self, message: &MidiMessage) {
        let bytes = message.encode();
        trace!("→ {}", format_hex(&bytes));
        if let Err(e) = self.output_conn.send(&bytes) {
            warn!("Failed to send MIDI message {}: {}", message, e);
        }
    }

    fn receive(&mut self) -> Option<MidiMessage> {
        while let Ok(raw) = self.inbound_rx.try_recv() {
            match MidiMessage::parse(&raw) {
                Some(message) => return Some(message),
                None => trace!("Ignoring MIDI: {}", format_hex(&raw)),
            }
        }
        None
    }
}

/// Open an input connection that forwards raw bytes into `tx`
pub(crate) fn connect_input(
    midi_in: MidiInput,
    port: &midir::MidiInputPort,
    client_name: &str,
    tx: Sender<Vec<u8>>,
) -> Result<MidiInputConnection<()>> {
    let mut midi_in = midi_in;
    // SysEx carries every parameter response, keep it
    midi_in.ignore(midir::Ignore::TimeAndActiveSense);

    midi_in
        .connect(
            port,
            client_name,
            move |_timestamp, data, _| {
                // Never block the midir thread
                if let Err(TrySendError::Full(_)) = tx.try_send(data.to_vec()) {
                    debug!("Inbound MIDI queue full, dropping {}", format_hex(data));
                }
            },
            (),
        )
        .map_err(|e| anyhow::anyhow!("Failed to connect to input port: {}", e))
}

/// List available MIDI input and output port names
pub fn list_ports() -> Result<(Vec<String>, Vec<String>)> {
    let midi_in = MidiInput::new("footctl-scanner")?;
    let midi_out = MidiOutput::new("footctl-scanner")?;

    let inputs = midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect();
    let outputs = midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect();

    Ok((inputs, outputs))
}

/// Find an input port by case-insensitive substring match
pub(crate) fn find_input_port(
    midi_in: &MidiInput,
    pattern: &str,
) -> Option<(midir::MidiInputPort, String)> {
    let pattern = pattern.to_lowercase();
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            if name.to_lowercase().contains(&pattern) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// Find an output port by case-insensitive substring match
fn find_output_port(
    midi_out: &MidiOutput,
    pattern: &str,
) -> Option<(midir::MidiOutputPort, String)> {
    let pattern = pattern.to_lowercase();
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            if name.to_lowercase().contains(&pattern) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}
