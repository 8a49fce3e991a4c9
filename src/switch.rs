//! A physical switch with its pixels and ordered actions

use tracing::{debug, error};

use crate::action::segments::segments;
use crate::action::{Action, ActionContext};
use crate::client::ParameterClient;
use crate::display::{Labels, Rgb};
use crate::error::CoreResult;
use crate::hardware::{LedDriver, SwitchDriver};

/// Borrowed surroundings of one switch call
pub struct SwitchIo<'a> {
    pub client: &'a mut dyn ParameterClient,
    pub leds: &'a mut dyn LedDriver,
    pub labels: &'a mut Labels,
    pub now_ms: u64,
}

pub struct Switch {
    name: String,
    driver: Box<dyn SwitchDriver>,
    /// Physical LED indices, in segment order
    pixels: Vec<usize>,
    actions: Vec<Box<dyn Action>>,
    pushed: bool,
}

impl Switch {
    pub fn new(name: impl Into<String>, driver: Box<dyn SwitchDriver>, pixels: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            driver,
            pixels,
            actions: Vec::new(),
            pushed: false,
        }
    }

    pub fn with_action(mut self, action: Box<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut [Box<dyn Action>] {
        &mut self.actions
    }

    pub fn is_pushed(&self) -> bool {
        self.pushed
    }

    /// Initialise driver and actions, then paint the initial state
    pub fn init(&mut self, io: &mut SwitchIo<'_>) -> CoreResult<()> {
        self.driver.init();
        self.pushed = self.driver.pushed();

        let assignment = self.assignment();
        for (action, pixels) in self.actions.iter_mut().zip(assignment) {
            action.init(&mut Self::context(io, pixels))?;
        }
        self.refresh_displays(io);
        Ok(())
    }

    /// Pixels of every action, from the current enabled set
    fn assignment(&self) -> Vec<Vec<usize>> {
        let led_users: Vec<usize> = self
            .actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.core().is_enabled() && a.core().uses_leds())
            .map(|(index, _)| index)
            .collect();

        let mut assignment = vec![Vec::new(); self.actions.len()];
        for (rank, &index) in led_users.iter().enumerate() {
            match segments(self.pixels.len(), led_users.len(), rank) {
                Ok(range) => assignment[index] = range.map(|s| self.pixels[s]).collect(),
                Err(e) => error!("Switch '{}': {}", self.name, e),
            }
        }
        assignment
    }

    fn context<'b>(io: &'b mut SwitchIo<'_>, pixels: Vec<usize>) -> ActionContext<'b> {
        ActionContext {
            client: &mut *io.client,
            now_ms: io.now_ms,
            pixels,
            leds: &mut *io.leds,
            labels: &mut *io.labels,
        }
    }

    /// Read the driver and dispatch an edge to the enabled actions
    pub fn process(&mut self, io: &mut SwitchIo<'_>) {
        if self.apply_enable_changes(io) {
            self.refresh_displays(io);
        }

        let pushed = self.driver.pushed();
        if pushed == self.pushed {
            return;
        }
        self.pushed = pushed;
        debug!("Switch '{}' {}", self.name, if pushed { "pushed" } else { "released" });

        let assignment = self.assignment();
        for (action, pixels) in self.actions.iter_mut().zip(assignment) {
            if !action.core().is_enabled() {
                continue;
            }
            let mut ctx = Self::context(io, pixels);
            if pushed {
                action.push(&mut ctx);
            } else {
                action.release(&mut ctx);
            }
        }
    }

    /// Periodic pass: enable conditions, action updates, LED refresh
    pub fn update(&mut self, io: &mut SwitchIo<'_>) {
        for action in &self.actions {
            action.core().update_enable(io.client);
        }

        self.apply_enable_changes(io);

        let assignment = self.assignment();
        for (action, pixels) in self.actions.iter_mut().zip(assignment) {
            if !action.core().is_enabled() {
                continue;
            }
            let mut ctx = Self::context(io, pixels);
            action.update(&mut ctx);
        }
        self.refresh_displays(io);
    }

    /// Black out the pixels when the enabled set changed, so the new partition starts clean
    fn apply_enable_changes(&mut self, io: &mut SwitchIo<'_>) -> bool {
        let mut changed = false;
        for action in self.actions.iter_mut() {
            changed |= action.core_mut().take_enable_changed();
        }
        if changed {
            debug!("Switch '{}': enabled actions changed, re-partitioning LEDs", self.name);
            for &pixel in &self.pixels {
                io.leds.set_pixel(pixel, Rgb::BLACK);
            }
        }
        changed
    }

    fn refresh_displays(&mut self, io: &mut SwitchIo<'_>) {
        let assignment = self.assignment();
        for (action, pixels) in self.actions.iter_mut().zip(assignment) {
            if action.core().is_enabled() {
                action.update_displays(&mut Self::context(io, pixels));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionCore, PushButtonAction, PushButtonMode, PushButtonTarget};
    use crate::client::{Client, ClientOptions};
    use crate::clock::ManualClock;
    use crate::hardware::{MemoryLeds, MemorySwitch};
    use crate::provider::SysExValueProvider;
    use crate::transport::MemoryTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Sent(Rc<RefCell<Vec<(String, bool)>>>, String);

    impl PushButtonTarget for Sent {
        fn set(&mut self, state: bool, _client: &mut dyn ParameterClient) {
            self.0.borrow_mut().push((self.1.clone(), state));
        }
    }

    fn latch(name: &str, color: Rgb, log: &Rc<RefCell<Vec<(String, bool)>>>) -> Box<dyn Action> {
        Box::new(
            PushButtonAction::new(
                ActionCore::new(name),
                PushButtonMode::Latch,
                Box::new(Sent(log.clone(), name.to_string())),
            )
            .with_color(color),
        )
    }

    struct Rig {
        client: Client,
        leds: MemoryLeds,
        labels: Labels,
    }

    impl Rig {
        fn new() -> Self {
            let (local, _remote) = MemoryTransport::pair();
            Self {
                client: Client::new(
                    Box::new(local),
                    Box::new(SysExValueProvider::default()),
                    Rc::new(ManualClock::new(0)),
                    ClientOptions::default(),
                ),
                leds: MemoryLeds::new(4),
                labels: Labels::new(),
            }
        }

        fn io(&mut self) -> SwitchIo<'_> {
            SwitchIo {
                client: &mut self.client,
                leds: &mut self.leds,
                labels: &mut self.labels,
                now_ms: 0,
            }
        }
    }

    const RED: Rgb = Rgb(100, 0, 0);
    const BLUE: Rgb = Rgb(0, 0, 100);
    const DIM_RED: Rgb = Rgb(10, 0, 0);
    const DIM_BLUE: Rgb = Rgb(0, 0, 10);

    #[test]
    fn test_edges_reach_enabled_actions_only() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let level = MemorySwitch::new();
        let mut switch = Switch::new("A", Box::new(level.clone()), vec![0, 1, 2])
            .with_action(latch("first", RED, &log))
            .with_action(latch("second", BLUE, &log));
        switch.actions_mut()[1].core_mut().set_enabled(false);
        let mut rig = Rig::new();
        switch.init(&mut rig.io()).unwrap();

        switch.process(&mut rig.io());
        assert!(log.borrow().is_empty());

        level.set(true);
        switch.process(&mut rig.io());
        switch.process(&mut rig.io());
        level.set(false);
        switch.process(&mut rig.io());

        assert_eq!(*log.borrow(), vec![("first".to_string(), true)]);
    }

    #[test]
    fn test_leds_follow_partition() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut switch = Switch::new("A", Box::new(MemorySwitch::new()), vec![0, 1, 2])
            .with_action(latch("first", RED, &log))
            .with_action(latch("second", BLUE, &log));
        let mut rig = Rig::new();
        switch.init(&mut rig.io()).unwrap();

        assert_eq!(rig.leds.pixels(), &[DIM_RED, DIM_RED, DIM_BLUE, Rgb::BLACK]);

        switch.actions_mut()[0].core_mut().set_enabled(false);
        switch.update(&mut rig.io());
        assert_eq!(rig.leds.pixels(), &[DIM_BLUE, DIM_BLUE, DIM_BLUE, Rgb::BLACK]);
    }

    #[test]
    fn test_enable_change_repaints_on_next_poll() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut switch = Switch::new("A", Box::new(MemorySwitch::new()), vec![0, 1, 2])
            .with_action(latch("first", RED, &log))
            .with_action(latch("second", BLUE, &log));
        let mut rig = Rig::new();
        switch.init(&mut rig.io()).unwrap();

        switch.actions_mut()[1].core_mut().set_enabled(false);
        switch.process(&mut rig.io());

        assert_eq!(rig.leds.pixels(), &[DIM_RED, DIM_RED, DIM_RED, Rgb::BLACK]);
        assert!(log.borrow().is_empty());
    }
}
