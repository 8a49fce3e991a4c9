//! Controller - the cooperative tick loop
//!
//! One `tick()`:
//! - starts the tick measurement, if enabled
//! - runs the periodic update pass once the update interval has elapsed
//!   (client housekeeping, condition updaters, switch actions, displays)
//! - drains inbound MIDI: poll every switch, then hand one message to the client,
//!   until nothing is waiting or the per-tick cap is hit
//! - cleans up the client and finishes the measurement
//!
//! The cap keeps a burst of inbound traffic from starving switch edges.

#[cfg(test)]
mod tests;

use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info};

use crate::client::ParameterClient;
use crate::clock::SharedClock;
use crate::condition::Updater;
use crate::display::{Labels, SharedDisplay};
use crate::error::CoreResult;
use crate::hardware::LedDriver;
use crate::measure::{RuntimeMeasurement, DEFAULT_MEASUREMENT_INTERVAL_MS};
use crate::switch::{Switch, SwitchIo};

/// Default interval of the periodic update pass
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 200;

/// Default number of inbound messages handled per tick
pub const DEFAULT_MAX_MESSAGES_PER_TICK: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub update_interval_ms: u64,
    pub max_messages_per_tick: usize,
    pub measure_tick_time: bool,
    pub measurement_interval_ms: u64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            update_interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            max_messages_per_tick: DEFAULT_MAX_MESSAGES_PER_TICK,
            measure_tick_time: false,
            measurement_interval_ms: DEFAULT_MEASUREMENT_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    Continue,
    Stop,
}

/// Makes the next tick return [`TickResult::Stop`]; clones share the flag
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Rc<Cell<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }
}

pub struct Controller {
    client: Box<dyn ParameterClient>,
    clock: SharedClock,
    leds: Box<dyn LedDriver>,
    labels: Labels,
    switches: Vec<Switch>,
    updaters: Vec<Box<dyn Updater>>,
    displays: Vec<SharedDisplay>,
    options: ControllerOptions,
    last_update_ms: Option<u64>,
    measurement: Option<RuntimeMeasurement>,
    stop: StopHandle,
    ticks: u64,
}

impl Controller {
    pub fn new(
        client: Box<dyn ParameterClient>,
        clock: SharedClock,
        leds: Box<dyn LedDriver>,
        labels: Labels,
        options: ControllerOptions,
    ) -> Self {
        let measurement = options
            .measure_tick_time
            .then(|| RuntimeMeasurement::new(options.measurement_interval_ms));

        Self {
            client,
            clock,
            leds,
            labels,
            switches: Vec::new(),
            updaters: Vec::new(),
            displays: Vec::new(),
            options,
            last_update_ms: None,
            measurement,
            stop: StopHandle::default(),
            ticks: 0,
        }
    }

    pub fn add_switch(&mut self, switch: Switch) {
        self.switches.push(switch);
    }

    /// Register a participant of the periodic update pass
    pub fn add_updater(&mut self, updater: Box<dyn Updater>) {
        self.updaters.push(updater);
    }

    pub fn add_display(&mut self, display: SharedDisplay) {
        self.displays.push(display);
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }

    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    pub fn client(&self) -> &dyn ParameterClient {
        self.client.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Initialise every switch and its actions
    pub fn init(&mut self) -> CoreResult<()> {
        let now_ms = self.clock.now_ms();
        let mut io = SwitchIo {
            client: self.client.as_mut(),
            leds: self.leds.as_mut(),
            labels: &mut self.labels,
            now_ms,
        };
        for switch in self.switches.iter_mut() {
            switch.init(&mut io)?;
        }
        info!(
            "Controller ready: {} switches, {} updaters, {} displays",
            self.switches.len(),
            self.updaters.len(),
            self.displays.len()
        );
        Ok(())
    }

    /// One iteration of the loop
    pub fn tick(&mut self) -> TickResult {
        if self.stop.is_stopped() {
            return TickResult::Stop;
        }

        let now_ms = self.clock.now_ms();
        if let Some(measurement) = self.measurement.as_mut() {
            measurement.start();
        }

        let update_due = self
            .last_update_ms
            .map_or(true, |t| now_ms.saturating_sub(t) >= self.options.update_interval_ms);
        if update_due {
            self.update(now_ms);
        }

        let messages = self.drain(now_ms);

        if let Some(measurement) = self.measurement.as_mut() {
            measurement.finish(messages, now_ms);
        }
        self.ticks += 1;
        TickResult::Continue
    }

    /// Periodic update pass
    fn update(&mut self, now_ms: u64) {
        self.last_update_ms = Some(now_ms);
        self.client.update();

        for updater in &self.updaters {
            updater.update(self.client.as_mut());
        }

        let mut io = SwitchIo {
            client: self.client.as_mut(),
            leds: self.leds.as_mut(),
            labels: &mut self.labels,
            now_ms,
        };
        for switch in self.switches.iter_mut() {
            switch.update(&mut io);
        }

        for display in &self.displays {
            match display.try_borrow_mut() {
                Ok(mut display) => display.refresh(&mut self.labels),
                Err(_) => debug!("Display busy, refresh skipped"),
            }
        }
    }

    /// Switch polling interleaved with bounded MIDI draining
    fn drain(&mut self, now_ms: u64) -> usize {
        let mut messages = 0;
        loop {
            let mut io = SwitchIo {
                client: self.client.as_mut(),
                leds: self.leds.as_mut(),
                labels: &mut self.labels,
                now_ms,
            };
            for switch in self.switches.iter_mut() {
                switch.process(&mut io);
            }

            let Some(message) = self.client.next_message() else {
                break;
            };
            self.client.receive(&message);
            messages += 1;
            if messages >= self.options.max_messages_per_tick {
                break;
            }
        }

        self.client.cleanup();
        messages
    }
}
