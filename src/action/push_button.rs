//! Push-button action: an on/off state driven by push and release
//!
//! Only transitions that change the boolean reach the target (a transmit).
//! Read-back from the device goes through [`PushButtonAction::feedback_state`],
//! which updates what is shown without transmitting again.

use std::str::FromStr;
use tracing::debug;

use super::{Action, ActionContext, ActionCore};
use crate::client::ParameterClient;
use crate::display::Rgb;
use crate::error::CoreError;

/// Press length after which a hold-momentary release toggles back
pub const DEFAULT_HOLD_TIME_MS: u64 = 600;

const DIM_BRIGHTNESS: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushButtonMode {
    /// Push switches on
    Enable,
    /// Push switches off
    Disable,
    /// Push toggles
    Latch,
    /// On while held
    Momentary,
    /// Off while held
    MomentaryInverse,
    /// Push toggles; a long press toggles back on release
    HoldMomentary,
}

impl FromStr for PushButtonMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enable" => Ok(PushButtonMode::Enable),
            "disable" => Ok(PushButtonMode::Disable),
            "latch" => Ok(PushButtonMode::Latch),
            "momentary" => Ok(PushButtonMode::Momentary),
            "momentary_inverse" => Ok(PushButtonMode::MomentaryInverse),
            "hold_momentary" => Ok(PushButtonMode::HoldMomentary),
            other => Err(CoreError::UnknownMode(other.to_string())),
        }
    }
}

/// What a push-button switches
pub trait PushButtonTarget {
    /// Transmit a new state
    fn set(&mut self, state: bool, client: &mut dyn ParameterClient);

    /// Ask the device for its current state
    fn update(&mut self, _client: &mut dyn ParameterClient) {}

    /// State reported by the device since the last call
    fn feedback(&mut self) -> Option<bool> {
        None
    }
}

pub struct PushButtonAction {
    core: ActionCore,
    mode: PushButtonMode,
    hold_time_ms: u64,
    state: bool,
    pressed_ms: Option<u64>,
    target: Box<dyn PushButtonTarget>,
    color: Rgb,
    text: Option<String>,
}

impl PushButtonAction {
    pub fn new(core: ActionCore, mode: PushButtonMode, target: Box<dyn PushButtonTarget>) -> Self {
        Self {
            core,
            mode,
            hold_time_ms: DEFAULT_HOLD_TIME_MS,
            state: false,
            pressed_ms: None,
            target,
            color: Rgb::WHITE,
            text: None,
        }
    }

    pub fn with_hold_time(mut self, hold_time_ms: u64) -> Self {
        self.hold_time_ms = hold_time_ms;
        self
    }

    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = color;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn mode(&self) -> PushButtonMode {
        self.mode
    }

    /// Adopt a state reported by the device; nothing is transmitted
    pub fn feedback_state(&mut self, state: bool, ctx: &mut ActionContext<'_>) {
        if self.state == state {
            return;
        }
        debug!("'{}' follows device: {}", self.core.name(), state);
        self.state = state;
        self.update_displays(ctx);
    }

    fn set_state(&mut self, state: bool, ctx: &mut ActionContext<'_>) {
        if self.state == state {
            return;
        }
        debug!("'{}' → {}", self.core.name(), if state { "on" } else { "off" });
        self.state = state;
        self.target.set(state, ctx.client);
        self.update_displays(ctx);
    }
}

impl Action for PushButtonAction {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActionCore {
        &mut self.core
    }

    fn push(&mut self, ctx: &mut ActionContext<'_>) {
        match self.mode {
            PushButtonMode::Enable | PushButtonMode::Momentary => self.set_state(true, ctx),
            PushButtonMode::Disable | PushButtonMode::MomentaryInverse => self.set_state(false, ctx),
            PushButtonMode::Latch => self.set_state(!self.state, ctx),
            PushButtonMode::HoldMomentary => {
                self.pressed_ms = Some(ctx.now_ms);
                self.set_state(!self.state, ctx);
            }
        }
    }

    fn release(&mut self, ctx: &mut ActionContext<'_>) {
        match self.mode {
            PushButtonMode::Momentary => self.set_state(false, ctx),
            PushButtonMode::MomentaryInverse => self.set_state(true, ctx),
            PushButtonMode::HoldMomentary => {
                let held = self
                    .pressed_ms
                    .take()
                    .map(|t| ctx.now_ms.saturating_sub(t));
                if held.is_some_and(|held| held >= self.hold_time_ms) {
                    self.set_state(!self.state, ctx);
                }
            }
            PushButtonMode::Enable | PushButtonMode::Disable | PushButtonMode::Latch => {}
        }
    }

    fn update(&mut self, ctx: &mut ActionContext<'_>) {
        if let Some(state) = self.target.feedback() {
            self.feedback_state(state, ctx);
        }
        self.target.update(ctx.client);
    }

    fn update_displays(&mut self, ctx: &mut ActionContext<'_>) {
        if !self.core.is_enabled() {
            return;
        }

        let brightness = if self.state { 1.0 } else { DIM_BRIGHTNESS };
        ctx.set_color(self.color, brightness);

        if let Some(label) = self.core.label().and_then(|id| ctx.labels.get_mut(id)) {
            if let Some(text) = &self.text {
                label.set_text(text);
            }
            label.set_back_color(self.color.scaled(brightness));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientOptions};
    use crate::clock::ManualClock;
    use crate::display::Labels;
    use crate::hardware::MemoryLeds;
    use crate::provider::SysExValueProvider;
    use crate::transport::MemoryTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every transmitted state
    struct Sent(Rc<RefCell<Vec<bool>>>);

    impl PushButtonTarget for Sent {
        fn set(&mut self, state: bool, _client: &mut dyn ParameterClient) {
            self.0.borrow_mut().push(state);
        }
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
                leds: MemoryLeds::new(2),
                labels: Labels::new(),
            }
        }

        fn ctx(&mut self, now_ms: u64) -> ActionContext<'_> {
            ActionContext {
                client: &mut self.client,
                now_ms,
                pixels: vec![0, 1],
                leds: &mut self.leds,
                labels: &mut self.labels,
            }
        }
    }

    enum Event {
        Push(u64),
        Release(u64),
    }

    /// Run events, returning the state after each one and the transmitted states
    fn script(mode: PushButtonMode, events: &[Event]) -> (Vec<bool>, Vec<bool>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut action = PushButtonAction::new(ActionCore::new("fx"), mode, Box::new(Sent(sent.clone())));
        let mut rig = Rig::new();

        let states = events
            .iter()
            .map(|event| {
                match *event {
                    Event::Push(t) => action.push(&mut rig.ctx(t)),
                    Event::Release(t) => action.release(&mut rig.ctx(t)),
                }
                action.state()
            })
            .collect();
        let sent = sent.borrow().clone();
        (states, sent)
    }

    use Event::{Push, Release};

    #[test]
    fn test_enable_and_disable() {
        assert_eq!(
            script(PushButtonMode::Enable, &[Push(0), Release(10), Push(20)]),
            (vec![true, true, true], vec![true])
        );
        assert_eq!(
            script(PushButtonMode::Disable, &[Push(0), Release(10)]),
            (vec![false, false], vec![])
        );
    }

    #[test]
    fn test_latch_toggles_on_push_only() {
        assert_eq!(
            script(PushButtonMode::Latch, &[Push(0), Release(10), Push(20), Release(30)]),
            (vec![true, true, false, false], vec![true, false])
        );
    }

    #[test]
    fn test_momentary_modes() {
        assert_eq!(
            script(PushButtonMode::Momentary, &[Push(0), Release(10)]),
            (vec![true, false], vec![true, false])
        );
        assert_eq!(
            script(PushButtonMode::MomentaryInverse, &[Push(0), Release(10)]),
            (vec![false, true], vec![true])
        );
    }

    #[test]
    fn test_hold_momentary_short_press_toggles_once() {
        assert_eq!(
            script(PushButtonMode::HoldMomentary, &[Push(0), Release(599)]),
            (vec![true, true], vec![true])
        );
    }

    #[test]
    fn test_hold_momentary_long_press_toggles_back() {
        assert_eq!(
            script(PushButtonMode::HoldMomentary, &[Push(0), Release(600), Push(1000), Release(1100)]),
            (vec![true, false, true, true], vec![true, false, true])
        );
    }

    #[test]
    fn test_feedback_does_not_transmit() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut action = PushButtonAction::new(
            ActionCore::new("fx"),
            PushButtonMode::Latch,
            Box::new(Sent(sent.clone())),
        )
        .with_color(Rgb(200, 0, 0));
        let mut rig = Rig::new();

        action.feedback_state(true, &mut rig.ctx(0));

        assert!(action.state());
        assert!(sent.borrow().is_empty());
        assert_eq!(rig.leds.pixels(), &[Rgb(200, 0, 0), Rgb(200, 0, 0)]);

        action.push(&mut rig.ctx(10));
        assert_eq!(*sent.borrow(), vec![false]);
        assert_eq!(rig.leds.pixels()[0], Rgb(20, 0, 0));
    }

    #[test]
    fn test_disabled_action_leaves_leds_alone() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut core = ActionCore::new("fx");
        core.set_enabled(false);
        let mut action = PushButtonAction::new(core, PushButtonMode::Latch, Box::new(Sent(sent)));
        let mut rig = Rig::new();

        action.update_displays(&mut rig.ctx(0));
        assert_eq!(rig.leds.pixels(), &[Rgb::BLACK, Rgb::BLACK]);
    }

    #[test]
    fn test_mode_names() {
        assert_eq!("hold_momentary".parse::<PushButtonMode>(), Ok(PushButtonMode::HoldMomentary));
        assert_eq!(
            "sticky".parse::<PushButtonMode>(),
            Err(CoreError::UnknownMode("sticky".into()))
        );
    }
}
