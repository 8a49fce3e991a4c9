//! Push-button target that switches a device parameter between two values

use std::cell::RefCell;
use std::rc::Rc;
use tracing::{error, trace};

use super::PushButtonTarget;
use crate::client::{ClientListener, Listener, ParameterClient, Request};
use crate::mapping::{MappingHandle, Value};

/// Picks up read-back values between ticks
struct StateWatch {
    value_on: Value,
    picked: Option<bool>,
    /// A read is on its way
    awaiting: bool,
    /// The read in flight was sent before the last local change
    discard_next: bool,
}

impl ClientListener for StateWatch {
    fn parameter_changed(&mut self, mapping: &MappingHandle) {
        self.awaiting = false;
        if std::mem::take(&mut self.discard_next) {
            trace!("'{}' read back a value older than the last switch", mapping.name());
            return;
        }
        if let Some(value) = mapping.value() {
            trace!("'{}' reads back {}", mapping.name(), value);
            self.picked = Some(value == self.value_on);
        }
    }

    // Offline: keep the local state
    fn request_terminated(&mut self, _mapping: &MappingHandle) {
        self.awaiting = false;
        self.discard_next = false;
    }
}

pub struct ParameterTarget {
    mapping: MappingHandle,
    value_on: Value,
    value_off: Value,
    readable: bool,
    watch: Rc<RefCell<StateWatch>>,
}

impl ParameterTarget {
    /// Set-only mappings are switched blind; readable ones also follow the device
    pub fn new(mapping: MappingHandle, value_on: Value, value_off: Value) -> Self {
        let readable = Request::validate(&mapping.borrow()).is_ok();
        let watch = Rc::new(RefCell::new(StateWatch {
            value_on: value_on.clone(),
            picked: None,
            awaiting: false,
            discard_next: false,
        }));
        Self {
            mapping,
            value_on,
            value_off,
            readable,
            watch,
        }
    }

    pub fn mapping(&self) -> &MappingHandle {
        &self.mapping
    }
}

impl PushButtonTarget for ParameterTarget {
    fn set(&mut self, state: bool, client: &mut dyn ParameterClient) {
        let value = if state {
            self.value_on.clone()
        } else {
            self.value_off.clone()
        };
        let in_flight = self.watch.borrow().awaiting;
        if let Err(e) = client.set(&self.mapping, value) {
            error!("Cannot switch '{}': {}", self.mapping.name(), e);
        }

        let mut watch = self.watch.borrow_mut();
        watch.picked = None;
        watch.discard_next = in_flight;
    }

    fn update(&mut self, client: &mut dyn ParameterClient) {
        if !self.readable {
            return;
        }
        self.watch.borrow_mut().awaiting = true;
        let listener: Listener = self.watch.clone();
        if let Err(e) = client.request(&self.mapping, listener) {
            error!("Cannot read '{}': {}", self.mapping.name(), e);
        }
    }

    fn feedback(&mut self) -> Option<bool> {
        self.watch.borrow_mut().picked.take()
    }
}
