//! Parameter mappings
//!
//! A `Mapping` describes one logical device parameter: how to set it, how to ask
//! for it, what the answer looks like, and the last value seen. Its shape never
//! changes after construction; only the cached value (and the embedded value of
//! the set template) is written, and only by the client and its value provider.

use serde::Deserialize;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::midi::MidiMessage;

/// Parameter value: numeric or text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(i32),
    Text(String),
}

impl Value {
    pub fn as_number(&self) -> Option<i32> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Number(_) => None,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Numeric,
            Value::Text(_) => ValueKind::Text,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// Type tag of a mapping's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Numeric,
    Text,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Numeric => "numeric",
            ValueKind::Text => "text",
        }
    }
}

/// Descriptor of one logical device parameter
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    /// Human-readable name, debug output only
    pub name: String,
    /// Template transmitted to change the parameter
    pub set: Option<MidiMessage>,
    /// Template transmitted to ask for the current value
    pub request: Option<MidiMessage>,
    /// Structural template of the answer
    pub response: Option<MidiMessage>,
    pub kind: ValueKind,
    /// Last known value
    pub value: Option<Value>,
}

impl Mapping {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_set(mut self, set: MidiMessage) -> Self {
        self.set = Some(set);
        self
    }

    pub fn with_request(mut self, request: MidiMessage) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_response(mut self, response: MidiMessage) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    /// Content equality: request templates decide; without requests, set templates
    /// decide. Mappings with neither never match by content.
    pub fn matches(&self, other: &Mapping) -> bool {
        match (&self.request, &other.request) {
            (Some(a), Some(b)) => a == b,
            (None, None) => match (&self.set, &other.set) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            _ => false,
        }
    }

    /// Wrap into a shared handle
    pub fn into_handle(self) -> MappingHandle {
        MappingHandle::new(self)
    }
}

/// Shared handle to a mapping
///
/// Handles compare equal when they point at the same instance or when the
/// mappings match by content, so a cached instance can stand in for any
/// structurally equal one.
#[derive(Clone)]
pub struct MappingHandle(Rc<RefCell<Mapping>>);

impl MappingHandle {
    pub fn new(mapping: Mapping) -> Self {
        Self(Rc::new(RefCell::new(mapping)))
    }

    pub fn borrow(&self) -> Ref<'_, Mapping> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Mapping> {
        self.0.borrow_mut()
    }

    /// Same parameter: same instance, or equal by content
    pub fn same_parameter(&self, other: &MappingHandle) -> bool {
        self.ptr_eq(other) || self.0.borrow().matches(&other.0.borrow())
    }

    /// Same instance
    pub fn ptr_eq(&self, other: &MappingHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn value(&self) -> Option<Value> {
        self.0.borrow().value.clone()
    }

    pub fn kind(&self) -> ValueKind {
        self.0.borrow().kind
    }
}

impl PartialEq for MappingHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_parameter(other)
    }
}

impl fmt::Debug for MappingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mapping = self.0.borrow();
        f.debug_struct("MappingHandle")
            .field("name", &mapping.name)
            .field("value", &mapping.value)
            .finish()
    }
}
