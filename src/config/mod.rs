//! Configuration for footctl
//!
//! Loads and validates the YAML configuration, then assembles a [`Controller`]
//! from it through [`Setup`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tokio::fs;
use tracing::{debug, info};

use std::cell::RefCell;
use std::rc::Rc;

use crate::action::{
    ActionCore, EnableSource, ParameterTarget, PushButtonAction, PushButtonMode, DEFAULT_HOLD_TIME_MS,
};
use crate::client::{
    BeaconOptions, BeaconProtocol, BidirectionalClient, Client, ClientOptions, ParameterClient,
    DEFAULT_CACHE_MAX_AGE_MS, DEFAULT_MAX_REQUEST_LIFETIME_MS,
};
use crate::clock::SharedClock;
use crate::condition::{Comparison, ConditionTree, Reference, SharedConditionTree, Subject};
use crate::controller::{
    Controller, ControllerOptions, DEFAULT_MAX_MESSAGES_PER_TICK, DEFAULT_UPDATE_INTERVAL_MS,
};
use crate::display::{
    ConditionalLabel, LabelContent, LabelPlacement, Labels, ParameterDisplay, Rgb,
    DEFAULT_OFFLINE_TEXT,
};
use crate::hardware::{LedDriver, SwitchDriver};
use crate::mapping::{Mapping, MappingHandle, Value, ValueKind};
use crate::measure::DEFAULT_MEASUREMENT_INTERVAL_MS;
use crate::midi::MidiMessage;
use crate::provider::{SysExValueProvider, DEFAULT_ADDRESS_WINDOW};
use crate::switch::Switch;
use crate::transport::MidiTransport;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub midi: MidiConfig,
    #[serde(default)]
    pub options: OptionsConfig,
    pub device: DeviceConfig,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
    #[serde(default)]
    pub leds: LedConfig,
    #[serde(default)]
    pub labels: Vec<LabelPlacement>,
    #[serde(default)]
    pub displays: Vec<DisplayConfig>,
    #[serde(default)]
    pub switches: Vec<SwitchConfig>,
}

/// MIDI port configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MidiConfig {
    pub input_port: String,
    pub output_port: String,
    /// Port of the pedal board that provides switch levels
    pub pedal_port: Option<String>,
    /// 1-16
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl MidiConfig {
    /// Zero-based channel as used on the wire
    pub fn channel_index(&self) -> u8 {
        self.channel.saturating_sub(1).min(15)
    }
}

/// Timing options of the core
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsConfig {
    #[serde(default = "default_max_request_lifetime")]
    pub max_request_lifetime_ms: u64,
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,
    #[serde(default = "default_max_messages_per_tick")]
    pub max_messages_per_tick: usize,
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age_ms: u64,
    #[serde(default = "default_hold_time")]
    pub hold_time_ms: u64,
    #[serde(default)]
    pub measure_tick_time: bool,
    #[serde(default = "default_measurement_interval")]
    pub measurement_interval_ms: u64,
    #[serde(default = "default_offline_text")]
    pub offline_text: String,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            max_request_lifetime_ms: default_max_request_lifetime(),
            update_interval_ms: default_update_interval(),
            max_messages_per_tick: default_max_messages_per_tick(),
            cache_max_age_ms: default_cache_max_age(),
            hold_time_ms: default_hold_time(),
            measure_tick_time: false,
            measurement_interval_ms: default_measurement_interval(),
            offline_text: default_offline_text(),
        }
    }
}

/// Target device wire format
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub manufacturer_id: Vec<u8>,
    /// Data byte range identifying a parameter in responses
    #[serde(default = "default_address_window")]
    pub address_window: [usize; 2],
    pub bidirectional: Option<BidirectionalConfig>,
}

/// Keep-alive push negotiation
#[derive(Debug, Clone, Deserialize)]
pub struct BidirectionalConfig {
    /// SysEx data of the keep-alive message
    pub beacon: Vec<u8>,
    /// Leading SysEx data of the device's sensing message
    pub sensing: Vec<u8>,
    #[serde(default = "default_beacon_interval")]
    pub beacon_interval_ms: u64,
    #[serde(default = "default_sensing_timeout")]
    pub sensing_timeout_ms: u64,
    #[serde(default)]
    pub trust_feedback: bool,
    /// Parameters the device pushes on its own
    #[serde(default)]
    pub pushed: Vec<String>,
}

/// One logical device parameter
///
/// `cc` gives a control-change set template on the configured channel; `set`,
/// `request` and `response` are SysEx data bytes after the manufacturer id.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ValueKind,
    pub cc: Option<u8>,
    pub set: Option<Vec<u8>>,
    pub request: Option<Vec<u8>>,
    pub response: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedConfig {
    #[serde(default)]
    pub pixel_count: usize,
}

/// Label content source
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DisplayConfig {
    Parameter {
        label: String,
        parameter: String,
        /// `{}` is replaced by the value
        format: Option<String>,
    },
    Condition {
        label: String,
        content: SubjectConfig<LabelContent>,
    },
}

/// A value, a list, or a condition; nests freely
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubjectConfig<T> {
    Condition(Box<ConditionConfig<T>>),
    List(Vec<SubjectConfig<T>>),
    Value(T),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionConfig<T> {
    pub mapping: String,
    pub mode: String,
    #[serde(rename = "ref")]
    pub reference: Reference,
    pub yes: SubjectConfig<T>,
    pub no: SubjectConfig<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    /// Control change number sent by the pedal
    pub pedal_cc: u8,
    #[serde(default)]
    pub pixels: Vec<usize>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    PushButton(PushButtonConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushButtonConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub mode: String,
    pub mapping: String,
    #[serde(default = "default_value_on")]
    pub value_on: Value,
    #[serde(default = "default_value_off")]
    pub value_off: Value,
    #[serde(default = "default_color")]
    pub color: Rgb,
    pub label: Option<String>,
    pub text: Option<String>,
    pub hold_time_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub uses_leds: bool,
    pub enable_when: Option<SubjectConfig<bool>>,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path))?;
        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.midi.input_port.is_empty() {
            anyhow::bail!("MIDI input_port cannot be empty");
        }
        if self.midi.output_port.is_empty() {
            anyhow::bail!("MIDI output_port cannot be empty");
        }
        if self.midi.channel == 0 || self.midi.channel > 16 {
            anyhow::bail!("Invalid MIDI channel {} (must be 1-16)", self.midi.channel);
        }

        if self.options.max_messages_per_tick == 0 {
            anyhow::bail!("max_messages_per_tick must be at least 1");
        }
        if self.options.update_interval_ms == 0 {
            anyhow::bail!("update_interval_ms must be at least 1");
        }

        if !matches!(self.device.manufacturer_id.len(), 1 | 3) {
            anyhow::bail!("manufacturer_id must have 1 or 3 bytes");
        }
        let [start, end] = self.device.address_window;
        if start >= end {
            anyhow::bail!("address_window [{}, {}] is empty", start, end);
        }

        let mut parameters = HashSet::new();
        for parameter in &self.parameters {
            if !parameters.insert(parameter.name.as_str()) {
                anyhow::bail!("Parameter '{}' defined twice", parameter.name);
            }
            if parameter.cc.is_some_and(|cc| cc > 127) {
                anyhow::bail!("Parameter '{}' has invalid CC number (must be 0-127)", parameter.name);
            }
            if parameter.cc.is_some() && parameter.set.is_some() {
                anyhow::bail!("Parameter '{}' must specify either 'cc' or 'set'", parameter.name);
            }
        }
        let known = |name: &str, what: &str| -> Result<()> {
            if parameters.contains(name) {
                Ok(())
            } else {
                anyhow::bail!("Unknown parameter '{}' in {}", name, what)
            }
        };

        if let Some(bidirectional) = &self.device.bidirectional {
            for name in &bidirectional.pushed {
                known(name, "device.bidirectional.pushed")?;
            }
        }

        let labels: HashSet<&str> = self.labels.iter().map(|l| l.name.as_str()).collect();
        for display in &self.displays {
            let (label, what) = match display {
                DisplayConfig::Parameter { label, parameter, .. } => {
                    known(parameter, "displays")?;
                    (label, "display")
                }
                DisplayConfig::Condition { label, content } => {
                    content.check_mappings(&known)?;
                    (label, "conditional display")
                }
            };
            if !labels.contains(label.as_str()) {
                anyhow::bail!("Unknown label '{}' in {}", label, what);
            }
        }

        let mut switches = HashSet::new();
        for switch in &self.switches {
            if !switches.insert(switch.name.as_str()) {
                anyhow::bail!("Switch '{}' defined twice", switch.name);
            }
            if switch.pedal_cc > 127 {
                anyhow::bail!("Switch '{}' has invalid pedal CC {}", switch.name, switch.pedal_cc);
            }
            for pixel in &switch.pixels {
                if *pixel >= self.leds.pixel_count {
                    anyhow::bail!(
                        "Switch '{}' uses pixel {} but only {} are configured",
                        switch.name,
                        pixel,
                        self.leds.pixel_count
                    );
                }
            }
            for ActionConfig::PushButton(action) in &switch.actions {
                self.validate_push_button(action, &labels, &known)
                    .with_context(|| format!("Invalid action on switch '{}'", switch.name))?;
            }
        }

        Ok(())
    }

    fn validate_push_button(
        &self,
        action: &PushButtonConfig,
        labels: &HashSet<&str>,
        known: &dyn Fn(&str, &str) -> Result<()>,
    ) -> Result<()> {
        action.mode.parse::<PushButtonMode>()?;
        known(&action.mapping, "push_button")?;
        if let Some(label) = &action.label {
            if !labels.contains(label.as_str()) {
                anyhow::bail!("Unknown label '{}'", label);
            }
        }
        if let Some(enable_when) = &action.enable_when {
            enable_when.check_mappings(known)?;
        }
        Ok(())
    }
}

impl<T> SubjectConfig<T> {
    fn check_mappings(&self, known: &dyn Fn(&str, &str) -> Result<()>) -> Result<()> {
        match self {
            SubjectConfig::Value(_) => Ok(()),
            SubjectConfig::List(items) => items.iter().try_for_each(|i| i.check_mappings(known)),
            SubjectConfig::Condition(condition) => {
                known(&condition.mapping, "condition")?;
                condition.yes.check_mappings(known)?;
                condition.no.check_mappings(known)
            }
        }
    }
}

/// Assembles a controller from validated configuration
pub struct Setup<'a> {
    config: &'a AppConfig,
    parameters: HashMap<String, MappingHandle>,
}

impl<'a> Setup<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        let parameters = config
            .parameters
            .iter()
            .map(|p| (p.name.clone(), Self::mapping(config, p)))
            .collect();
        Self { config, parameters }
    }

    fn sysex(config: &AppConfig, data: &[u8]) -> MidiMessage {
        MidiMessage::SystemExclusive {
            manufacturer_id: config.device.manufacturer_id.clone(),
            data: data.to_vec(),
        }
    }

    fn mapping(config: &AppConfig, parameter: &ParameterConfig) -> MappingHandle {
        let mut mapping = Mapping::new(parameter.name.clone()).with_kind(parameter.kind);
        if let Some(control) = parameter.cc {
            mapping = mapping.with_set(MidiMessage::ControlChange {
                channel: config.midi.channel_index(),
                control,
                value: 0,
            });
        }
        if let Some(set) = &parameter.set {
            mapping = mapping.with_set(Self::sysex(config, set));
        }
        if let Some(request) = &parameter.request {
            mapping = mapping.with_request(Self::sysex(config, request));
        }
        if let Some(response) = &parameter.response {
            mapping = mapping.with_response(Self::sysex(config, response));
        }
        mapping.into_handle()
    }

    /// Handle of a named parameter
    pub fn parameter(&self, name: &str) -> Result<MappingHandle> {
        self.parameters
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown parameter '{}'", name))
    }

    /// Poll or push client, as configured
    pub fn client(
        &self,
        transport: Box<dyn MidiTransport>,
        clock: SharedClock,
    ) -> Result<Box<dyn ParameterClient>> {
        let [start, end] = self.config.device.address_window;
        let options = &self.config.options;
        let client = Client::new(
            transport,
            Box::new(SysExValueProvider::new(start..end)),
            clock,
            ClientOptions {
                max_request_lifetime_ms: options.max_request_lifetime_ms,
                cache_max_age_ms: options.cache_max_age_ms,
            },
        );

        let Some(bidirectional) = &self.config.device.bidirectional else {
            return Ok(Box::new(client));
        };

        let mut pushed = Vec::new();
        for name in &bidirectional.pushed {
            let mapping = self.parameter(name)?;
            let response = mapping.borrow().response.clone();
            match response {
                Some(response) => pushed.push(response),
                None => anyhow::bail!("Pushed parameter '{}' has no response template", name),
            }
        }

        info!("Bidirectional mode: {} pushed parameters", pushed.len());
        let protocol = BeaconProtocol::new(BeaconOptions {
            beacon: Self::sysex(self.config, &bidirectional.beacon),
            sensing: Self::sysex(self.config, &bidirectional.sensing),
            beacon_interval_ms: bidirectional.beacon_interval_ms,
            sensing_timeout_ms: bidirectional.sensing_timeout_ms,
            pushed,
            trust_feedback: bidirectional.trust_feedback,
        });
        Ok(Box::new(BidirectionalClient::new(client, Box::new(protocol))))
    }

    fn subject<T: Clone>(&self, config: &SubjectConfig<T>) -> Result<Subject<T>> {
        Ok(match config {
            SubjectConfig::Value(value) => Subject::Value(value.clone()),
            SubjectConfig::List(items) => Subject::List(
                items
                    .iter()
                    .map(|item| self.subject(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            SubjectConfig::Condition(condition) => Subject::when(
                self.parameter(&condition.mapping)?,
                Comparison::from_mode(&condition.mode, condition.reference.clone())?,
                self.subject(&condition.yes)?,
                self.subject(&condition.no)?,
            ),
        })
    }

    fn push_button(&self, name: &str, config: &PushButtonConfig) -> Result<PushButtonAction> {
        let mut core = ActionCore::new(name).with_leds(config.uses_leds);
        if let Some(label) = &config.label {
            core = core.with_label(label.clone());
        }
        if let Some(enable_when) = &config.enable_when {
            let tree = ConditionTree::single(format!("{} enabled", name), self.subject(enable_when)?)?;
            core = core.with_enable(EnableSource::condition(tree.into_shared()));
        }

        let target = ParameterTarget::new(
            self.parameter(&config.mapping)?,
            config.value_on.clone(),
            config.value_off.clone(),
        );
        let mut action = PushButtonAction::new(core, config.mode.parse()?, Box::new(target))
            .with_hold_time(config.hold_time_ms.unwrap_or(self.config.options.hold_time_ms))
            .with_color(config.color);
        if let Some(text) = &config.text {
            action = action.with_text(text.clone());
        }
        Ok(action)
    }

    /// Build the controller; `switch_driver` provides the raw input of each switch
    pub fn build(
        &self,
        client: Box<dyn ParameterClient>,
        clock: SharedClock,
        leds: Box<dyn LedDriver>,
        mut switch_driver: impl FnMut(&SwitchConfig) -> Result<Box<dyn SwitchDriver>>,
    ) -> Result<Controller> {
        let options = &self.config.options;
        let mut labels = Labels::new();
        for placement in &self.config.labels {
            labels.register(placement);
        }

        let mut displays = Vec::new();
        for display in &self.config.displays {
            match display {
                DisplayConfig::Parameter { label, parameter, format } => {
                    let mut element = ParameterDisplay::new(self.parameter(parameter)?, labels.resolve(label)?)
                        .with_offline_text(options.offline_text.clone());
                    if let Some(format) = format.clone() {
                        element = element.with_formatter(move |value| format.replace("{}", &value.to_string()));
                    }
                    displays.push(DisplaySetup::Parameter(element.into_shared()));
                }
                DisplayConfig::Condition { label, content } => {
                    let tree = ConditionTree::single(label.clone(), self.subject(content)?)?.into_shared();
                    displays.push(DisplaySetup::Condition(tree.clone(), ConditionalLabel::new(tree, labels.resolve(label)?)));
                }
            }
        }

        let mut controller = Controller::new(
            client,
            clock,
            leds,
            labels,
            ControllerOptions {
                update_interval_ms: options.update_interval_ms,
                max_messages_per_tick: options.max_messages_per_tick,
                measure_tick_time: options.measure_tick_time,
                measurement_interval_ms: options.measurement_interval_ms,
            },
        );

        for display in displays {
            match display {
                DisplaySetup::Parameter(element) => {
                    controller.add_updater(Box::new(element.clone()));
                    controller.add_display(element);
                }
                DisplaySetup::Condition(tree, element) => {
                    controller.add_updater(Box::new(tree));
                    controller.add_display(Rc::new(RefCell::new(element)));
                }
            }
        }

        for switch_config in &self.config.switches {
            let driver = switch_driver(switch_config)
                .with_context(|| format!("No driver for switch '{}'", switch_config.name))?;
            let mut switch = Switch::new(switch_config.name.clone(), driver, switch_config.pixels.clone());

            for (index, ActionConfig::PushButton(action)) in switch_config.actions.iter().enumerate() {
                let name = action
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}/{}", switch_config.name, index));
                let action = self
                    .push_button(&name, action)
                    .with_context(|| format!("Invalid action '{}'", name))?;
                switch = switch.with_action(Box::new(action));
            }
            debug!("Switch '{}' with {} actions", switch_config.name, switch.actions().len());
            controller.add_switch(switch);
        }

        controller.init()?;
        Ok(controller)
    }
}

enum DisplaySetup {
    Parameter(Rc<RefCell<ParameterDisplay>>),
    Condition(SharedConditionTree<LabelContent>, ConditionalLabel),
}

// Default value functions
fn default_channel() -> u8 { 1 }
fn default_client_name() -> String { "footctl".to_string() }
fn default_max_request_lifetime() -> u64 { DEFAULT_MAX_REQUEST_LIFETIME_MS }
fn default_update_interval() -> u64 { DEFAULT_UPDATE_INTERVAL_MS }
fn default_max_messages_per_tick() -> usize { DEFAULT_MAX_MESSAGES_PER_TICK }
fn default_cache_max_age() -> u64 { DEFAULT_CACHE_MAX_AGE_MS }
fn default_hold_time() -> u64 { DEFAULT_HOLD_TIME_MS }
fn default_measurement_interval() -> u64 { DEFAULT_MEASUREMENT_INTERVAL_MS }
fn default_offline_text() -> String { DEFAULT_OFFLINE_TEXT.to_string() }
fn default_address_window() -> [usize; 2] { [DEFAULT_ADDRESS_WINDOW.start, DEFAULT_ADDRESS_WINDOW.end] }
fn default_beacon_interval() -> u64 { 1000 }
fn default_sensing_timeout() -> u64 { 2500 }
fn default_value_on() -> Value { Value::Number(1) }
fn default_value_off() -> Value { Value::Number(0) }
fn default_color() -> Rgb { Rgb::WHITE }
fn default_true() -> bool { true }

#[cfg(test)]
mod tests;
