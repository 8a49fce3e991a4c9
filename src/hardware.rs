//! Switch and LED boundaries
//!
//! Drivers are polled once per tick. Switches report raw level; edge detection
//! happens in [`crate::switch::Switch`].

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use midir::{MidiInput, MidiInputConnection};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{info, trace};

use crate::display::Rgb;
use crate::midi::MidiMessage;
use crate::transport::{connect_input, find_input_port};

/// Control-change value at and above which a pedal counts as pushed
pub const PEDAL_PUSHED_THRESHOLD: u8 = 64;

/// Raw switch input
pub trait SwitchDriver {
    fn init(&mut self) {}

    /// Current level, not an edge
    fn pushed(&mut self) -> bool;
}

/// Indexable pixel buffer
pub trait LedDriver {
    fn pixel_count(&self) -> usize;

    fn set_pixel(&mut self, index: usize, color: Rgb);
}

/// Pixel buffer kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryLeds {
    pixels: Vec<Rgb>,
}

impl MemoryLeds {
    pub fn new(pixel_count: usize) -> Self {
        Self {
            pixels: vec![Rgb::BLACK; pixel_count],
        }
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }
}

impl LedDriver for MemoryLeds {
    fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) {
        if let Some(pixel) = self.pixels.get_mut(index) {
            *pixel = color;
        }
    }
}

/// Shared buffer, so a renderer can read what the core painted
impl<T: LedDriver> LedDriver for Rc<RefCell<T>> {
    fn pixel_count(&self) -> usize {
        self.borrow().pixel_count()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) {
        self.borrow_mut().set_pixel(index, color);
    }
}

/// Switch whose level is set from outside; clones share the level
#[derive(Debug, Clone, Default)]
pub struct MemorySwitch {
    level: Rc<Cell<bool>>,
}

impl MemorySwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pushed: bool) {
        self.level.set(pushed);
    }
}

impl SwitchDriver for MemorySwitch {
    fn pushed(&mut self) -> bool {
        self.level.get()
    }
}

/// Pedal levels decoded from a MIDI input
///
/// Pedal boards send a control change per pedal: high on press, low on release.
pub struct PedalInput {
    _connection: Option<MidiInputConnection<()>>,
    inbound_rx: Receiver<Vec<u8>>,
    channel: u8,
    levels: [bool; 128],
}

pub type SharedPedalInput = Rc<RefCell<PedalInput>>;

impl PedalInput {
    /// Listen on the first input port whose name contains `pattern`
    pub fn connect(client_name: &str, pattern: &str, midi_channel: u8) -> Result<Self> {
        let midi_in = MidiInput::new(&format!("{}-Pedals", client_name))
            .context("Failed to create pedal MIDI input")?;
        let (port, name) = find_input_port(&midi_in, pattern)
            .ok_or_else(|| anyhow::anyhow!("Pedal port '{}' not found", pattern))?;

        let (tx, rx) = channel::bounded(256);
        let connection = connect_input(midi_in, &port, client_name, tx)?;
        info!("Connected to pedal port: {}", name);

        let mut input = Self::from_receiver(rx, midi_channel);
        input._connection = Some(connection);
        Ok(input)
    }

    /// Pedal input fed through a channel; returns the sending side as well
    pub fn detached(midi_channel: u8) -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = channel::bounded(256);
        (tx, Self::from_receiver(rx, midi_channel))
    }

    fn from_receiver(inbound_rx: Receiver<Vec<u8>>, channel: u8) -> Self {
        Self {
            _connection: None,
            inbound_rx,
            channel,
            levels: [false; 128],
        }
    }

    pub fn into_shared(self) -> SharedPedalInput {
        Rc::new(RefCell::new(self))
    }

    /// Apply everything that arrived since the last poll
    pub fn poll(&mut self) {
        while let Ok(raw) = self.inbound_rx.try_recv() {
            if let Some(MidiMessage::ControlChange { channel, control, value }) = MidiMessage::parse(&raw) {
                if channel == self.channel {
                    trace!("Pedal CC{} = {}", control, value);
                    self.levels[(control & 0x7F) as usize] = value >= PEDAL_PUSHED_THRESHOLD;
                }
            }
        }
    }

    pub fn level(&self, control: u8) -> bool {
        self.levels[(control & 0x7F) as usize]
    }
}

/// One pedal of a [`PedalInput`]
pub struct MidiPedalSwitch {
    input: SharedPedalInput,
    control: u8,
}

impl MidiPedalSwitch {
    pub fn new(input: SharedPedalInput, control: u8) -> Self {
        Self { input, control }
    }
}

impl SwitchDriver for MidiPedalSwitch {
    fn pushed(&mut self) -> bool {
        let mut input = self.input.borrow_mut();
        input.poll();
        input.level(self.control)
    }
}
