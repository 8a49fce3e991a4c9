//! Switch-triggered actions
//!
//! Every action carries an [`ActionCore`]: enabled state, an optional display
//! label and whether it draws on the switch LEDs. The switch hands each call an
//! [`ActionContext`] with the client, the current time, the pixels the action owns
//! right now and the label registry.

pub mod parameter;
pub mod push_button;
pub mod segments;

pub use parameter::ParameterTarget;
pub use push_button::{PushButtonAction, PushButtonMode, PushButtonTarget, DEFAULT_HOLD_TIME_MS};

use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

use crate::client::ParameterClient;
use crate::condition::{ChangeFlag, SharedConditionTree, Updater};
use crate::display::{LabelId, Labels, Rgb};
use crate::error::CoreResult;
use crate::hardware::LedDriver;

/// Everything an action may touch during one call
pub struct ActionContext<'a> {
    pub client: &'a mut dyn ParameterClient,
    pub now_ms: u64,
    /// Physical pixel indices owned by the action
    pub pixels: Vec<usize>,
    pub leds: &'a mut dyn LedDriver,
    pub labels: &'a mut Labels,
}

impl ActionContext<'_> {
    /// Paint every owned pixel with `color` scaled by `brightness`
    pub fn set_color(&mut self, color: Rgb, brightness: f32) {
        let effective = color.scaled(brightness);
        for &pixel in &self.pixels {
            self.leds.set_pixel(pixel, effective);
        }
    }
}

/// Where the enabled state comes from
pub enum EnableSource {
    Fixed(bool),
    /// Follows a condition tree; offline devices leave it enabled
    Condition {
        tree: SharedConditionTree<bool>,
        changed: Rc<RefCell<ChangeFlag>>,
    },
}

impl EnableSource {
    pub fn condition(tree: SharedConditionTree<bool>) -> Self {
        let changed = ChangeFlag::shared();
        tree.borrow_mut().add_listener(changed.clone());
        EnableSource::Condition { tree, changed }
    }
}

/// State shared by every action
pub struct ActionCore {
    name: String,
    enabled: EnableSource,
    label_name: Option<String>,
    label: Option<LabelId>,
    uses_leds: bool,
    enable_changed: bool,
}

impl ActionCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: EnableSource::Fixed(true),
            label_name: None,
            label: None,
            uses_leds: true,
            enable_changed: false,
        }
    }

    pub fn with_label(mut self, placement: impl Into<String>) -> Self {
        self.label_name = Some(placement.into());
        self
    }

    pub fn with_leds(mut self, uses_leds: bool) -> Self {
        self.uses_leds = uses_leds;
        self
    }

    pub fn with_enable(mut self, source: EnableSource) -> Self {
        self.enabled = source;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uses_leds(&self) -> bool {
        self.uses_leds
    }

    pub fn label(&self) -> Option<LabelId> {
        self.label
    }

    pub fn is_enabled(&self) -> bool {
        match &self.enabled {
            EnableSource::Fixed(enabled) => *enabled,
            EnableSource::Condition { tree, .. } => tree.borrow().value().copied().unwrap_or(true),
        }
    }

    /// Override the enabled state. The owning switch re-partitions its LEDs and
    /// forces an update on the next pass.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.is_enabled() != enabled {
            debug!("Action '{}' {}", self.name, if enabled { "enabled" } else { "disabled" });
            self.enable_changed = true;
        }
        self.enabled = EnableSource::Fixed(enabled);
    }

    /// True once after every change of the enabled state
    pub fn take_enable_changed(&mut self) -> bool {
        let from_condition = match &self.enabled {
            EnableSource::Fixed(_) => false,
            EnableSource::Condition { changed, .. } => changed.borrow_mut().take(),
        };
        std::mem::take(&mut self.enable_changed) || from_condition
    }

    /// Read the enable condition, if any
    pub fn update_enable(&self, client: &mut dyn ParameterClient) {
        if let EnableSource::Condition { tree, .. } = &self.enabled {
            tree.update(client);
        }
    }

    /// Resolve the label placement once
    pub fn resolve_label(&mut self, labels: &Labels) -> CoreResult<()> {
        if let Some(name) = &self.label_name {
            self.label = Some(labels.resolve(name)?);
        }
        Ok(())
    }
}

/// Switch-triggered behavior
pub trait Action {
    fn core(&self) -> &ActionCore;

    fn core_mut(&mut self) -> &mut ActionCore;

    /// One-time setup once the switch is assembled
    fn init(&mut self, ctx: &mut ActionContext<'_>) -> CoreResult<()> {
        self.core_mut().resolve_label(ctx.labels)
    }

    fn push(&mut self, ctx: &mut ActionContext<'_>);

    fn release(&mut self, ctx: &mut ActionContext<'_>);

    /// Periodic work, e.g. reading back remote state
    fn update(&mut self, _ctx: &mut ActionContext<'_>) {}

    /// Refresh LEDs and label
    fn update_displays(&mut self, ctx: &mut ActionContext<'_>);
}
