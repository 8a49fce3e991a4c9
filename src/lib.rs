//! footctl - footswitch MIDI controller core
//!
//! Parameter request/response client, condition trees, push-button actions and the
//! cooperative tick loop that ties them to switches, LEDs and display labels.

pub mod action;
pub mod client;
pub mod clock;
pub mod condition;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod hardware;
pub mod mapping;
pub mod measure;
pub mod midi;
pub mod provider;
pub mod switch;
pub mod transport;

pub use controller::{Controller, ControllerOptions, StopHandle, TickResult};
pub use error::{CoreError, CoreResult};
