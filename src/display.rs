//! Display labels as plain observable properties
//!
//! Rendering is left to whoever reads [`Labels`]; the core only writes text, back
//! color and brightness and marks the label dirty.

use serde::Deserialize;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, error};

use crate::client::{ClientListener, Listener, ParameterClient};
use crate::condition::{ChangeFlag, SharedConditionTree, Updater};
use crate::error::{CoreError, CoreResult};
use crate::mapping::{MappingHandle, Value};

/// Placeholder shown for parameters of an unreachable device
pub const DEFAULT_OFFLINE_TEXT: &str = "Offline";

/// 3-channel color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);

    /// Color scaled by a brightness in 0.0..=1.0
    pub fn scaled(self, brightness: f32) -> Rgb {
        let factor = brightness.clamp(0.0, 1.0);
        let scale = |c: u8| (c as f32 * factor).round() as u8;
        Rgb(scale(self.0), scale(self.1), scale(self.2))
    }
}

/// Where a label lives and how it starts out
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelPlacement {
    pub name: String,
    #[serde(default)]
    pub back_color: Rgb,
    #[serde(default = "default_brightness")]
    pub brightness: f32,
}

fn default_brightness() -> f32 {
    1.0
}

/// Label state observed by the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayLabel {
    pub text: String,
    pub back_color: Rgb,
    pub brightness: f32,
    dirty: bool,
}

impl DisplayLabel {
    pub fn set_text(&mut self, text: &str) {
        if self.text != text {
            self.text = text.to_string();
            self.dirty = true;
        }
    }

    pub fn set_back_color(&mut self, color: Rgb) {
        if self.back_color != color {
            self.back_color = color;
            self.dirty = true;
        }
    }

    pub fn set_brightness(&mut self, brightness: f32) {
        if self.brightness != brightness {
            self.brightness = brightness;
            self.dirty = true;
        }
    }

    /// True once after every change
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

pub type LabelId = usize;

/// Registry of labels, resolved by placement name
#[derive(Debug, Default)]
pub struct Labels {
    names: Vec<String>,
    labels: Vec<DisplayLabel>,
}

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label; a placement registered twice keeps its first id
    pub fn register(&mut self, placement: &LabelPlacement) -> LabelId {
        if let Some(id) = self.names.iter().position(|n| *n == placement.name) {
            return id;
        }
        self.names.push(placement.name.clone());
        self.labels.push(DisplayLabel {
            text: String::new(),
            back_color: placement.back_color,
            brightness: placement.brightness,
            dirty: true,
        });
        self.labels.len() - 1
    }

    pub fn resolve(&self, name: &str) -> CoreResult<LabelId> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| CoreError::UnknownLabel(name.to_string()))
    }

    pub fn get(&self, id: LabelId) -> Option<&DisplayLabel> {
        self.labels.get(id)
    }

    pub fn get_mut(&mut self, id: LabelId) -> Option<&mut DisplayLabel> {
        self.labels.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn name(&self, id: LabelId) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Ids of labels changed since the last call
    pub fn take_dirty(&mut self) -> Vec<LabelId> {
        self.labels
            .iter_mut()
            .enumerate()
            .filter_map(|(id, label)| label.take_dirty().then_some(id))
            .collect()
    }

    /// Placement names with their labels
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DisplayLabel)> {
        self.names.iter().map(String::as_str).zip(self.labels.iter())
    }
}

/// Element refreshed during the periodic update pass
pub trait DisplayElement {
    fn refresh(&mut self, labels: &mut Labels);
}

pub type SharedDisplay = Rc<RefCell<dyn DisplayElement>>;

type Formatter = Box<dyn Fn(&Value) -> String>;

/// Shows a parameter's value on a label
pub struct ParameterDisplay {
    mapping: MappingHandle,
    label: LabelId,
    formatter: Formatter,
    offline_text: String,
    pending: Option<String>,
}

impl ParameterDisplay {
    pub fn new(mapping: MappingHandle, label: LabelId) -> Self {
        Self {
            mapping,
            label,
            formatter: Box::new(|value| value.to_string()),
            offline_text: DEFAULT_OFFLINE_TEXT.to_string(),
            pending: None,
        }
    }

    pub fn with_formatter(mut self, formatter: impl Fn(&Value) -> String + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    pub fn with_offline_text(mut self, text: impl Into<String>) -> Self {
        self.offline_text = text.into();
        self
    }

    pub fn into_shared(self) -> Rc<RefCell<ParameterDisplay>> {
        Rc::new(RefCell::new(self))
    }
}

impl ClientListener for ParameterDisplay {
    fn parameter_changed(&mut self, mapping: &MappingHandle) {
        if let Some(value) = mapping.value() {
            self.pending = Some((self.formatter)(&value));
        }
    }

    fn request_terminated(&mut self, _mapping: &MappingHandle) {
        self.pending = Some(self.offline_text.clone());
    }
}

impl DisplayElement for ParameterDisplay {
    fn refresh(&mut self, labels: &mut Labels) {
        let Some(text) = self.pending.take() else {
            return;
        };
        match labels.get_mut(self.label) {
            Some(label) => label.set_text(&text),
            None => error!("Display for '{}' has no label {}", self.mapping.name(), self.label),
        }
    }
}

impl Updater for Rc<RefCell<ParameterDisplay>> {
    fn update(&self, client: &mut dyn ParameterClient) {
        let mapping = self.borrow().mapping.clone();
        let listener: Listener = self.clone();
        if let Err(e) = client.request(&mapping, listener) {
            error!("Display update for '{}' failed: {}", mapping.name(), e);
        }
    }
}

/// Label content selected by a condition tree
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LabelContent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub back_color: Option<Rgb>,
}

/// Applies the active branch of a condition tree to a label
pub struct ConditionalLabel {
    tree: SharedConditionTree<LabelContent>,
    label: LabelId,
    changed: Rc<RefCell<ChangeFlag>>,
    shown: bool,
}

impl ConditionalLabel {
    pub fn new(tree: SharedConditionTree<LabelContent>, label: LabelId) -> Self {
        let changed = ChangeFlag::shared();
        tree.borrow_mut().add_listener(changed.clone());
        Self {
            tree,
            label,
            changed,
            shown: false,
        }
    }

    pub fn tree(&self) -> &SharedConditionTree<LabelContent> {
        &self.tree
    }
}

impl DisplayElement for ConditionalLabel {
    fn refresh(&mut self, labels: &mut Labels) {
        let changed = self.changed.borrow_mut().take();
        if self.shown && !changed {
            return;
        }
        self.shown = true;

        let tree = self.tree.borrow();
        let Some(content) = tree.value() else {
            return;
        };
        let Some(label) = labels.get_mut(self.label) else {
            error!("Conditional label '{}' has no label {}", tree.name(), self.label);
            return;
        };

        debug!("Label {} follows condition tree '{}'", self.label, tree.name());
        if let Some(text) = &content.text {
            label.set_text(text);
        }
        if let Some(color) = content.back_color {
            label.set_back_color(color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Comparison, ConditionTree, Subject};
    use crate::mapping::Mapping;
    use crate::midi::MidiMessage;

    fn placement(name: &str) -> LabelPlacement {
        LabelPlacement {
            name: name.to_string(),
            back_color: Rgb(10, 20, 30),
            brightness: 0.5,
        }
    }

    fn param() -> MappingHandle {
        let sysex = |data: &[u8]| MidiMessage::SystemExclusive {
            manufacturer_id: vec![0x00, 0x20, 0x33],
            data: data.to_vec(),
        };
        Mapping::new("rig")
            .with_request(sysex(&[0x02, 0x7F, 0x02, 0x00, 0x00, 0x01]))
            .with_response(sysex(&[0x02, 0x7F, 0x01, 0x00, 0x00, 0x01]))
            .into_handle()
    }

    #[test]
    fn test_scaled_color() {
        assert_eq!(Rgb(200, 100, 0).scaled(0.5), Rgb(100, 50, 0));
        assert_eq!(Rgb(200, 100, 0).scaled(2.0), Rgb(200, 100, 0));
    }

    #[test]
    fn test_labels_resolve_by_name() {
        let mut labels = Labels::new();
        let a = labels.register(&placement("a"));
        let b = labels.register(&placement("b"));

        assert_eq!(labels.register(&placement("a")), a);
        assert_eq!(labels.resolve("b"), Ok(b));
        assert_eq!(labels.resolve("c"), Err(CoreError::UnknownLabel("c".into())));
        assert_eq!(labels.get(a).map(|l| l.brightness), Some(0.5));
    }

    #[test]
    fn test_dirty_only_on_change() {
        let mut labels = Labels::new();
        let id = labels.register(&placement("a"));
        let label = labels.get_mut(id).unwrap();
        assert!(label.take_dirty());

        label.set_text("");
        assert!(!label.take_dirty());
        label.set_text("Drive");
        assert!(label.take_dirty());
    }

    #[test]
    fn test_parameter_display_value_and_offline() {
        let mut labels = Labels::new();
        let id = labels.register(&placement("rig"));
        let mapping = param();
        let mut display = ParameterDisplay::new(mapping.clone(), id)
            .with_formatter(|v| format!("Rig {}", v))
            .with_offline_text("--");

        mapping.borrow_mut().value = Some(Value::Number(4));
        display.parameter_changed(&mapping);
        display.refresh(&mut labels);
        assert_eq!(labels.get(id).unwrap().text, "Rig 4");

        display.request_terminated(&mapping);
        display.refresh(&mut labels);
        assert_eq!(labels.get(id).unwrap().text, "--");
    }

    #[test]
    fn test_conditional_label_applies_active_branch() {
        let mut labels = Labels::new();
        let id = labels.register(&placement("state"));
        let mapping = param();
        let tree = ConditionTree::single(
            "state",
            Subject::when(
                mapping.clone(),
                Comparison::Equal(Value::Number(1)),
                Subject::Value(LabelContent {
                    text: Some("ON".into()),
                    back_color: Some(Rgb(0, 255, 0)),
                }),
                Subject::Value(LabelContent {
                    text: Some("OFF".into()),
                    back_color: None,
                }),
            ),
        )
        .unwrap()
        .into_shared();
        let mut label = ConditionalLabel::new(tree.clone(), id);

        label.refresh(&mut labels);
        assert_eq!(labels.get(id).unwrap().text, "ON");

        mapping.borrow_mut().value = Some(Value::Number(0));
        tree.borrow_mut().parameter_changed(&mapping);
        label.refresh(&mut labels);
        let shown = labels.get(id).unwrap();
        assert_eq!(shown.text, "OFF");
        assert_eq!(shown.back_color, Rgb(0, 255, 0));
    }
}
