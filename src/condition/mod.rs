//! Declarative conditions over parameter values
//!
//! A condition compares a mapping's value against a reference and picks its `yes`
//! or `no` branch. Conditions live in the arena of a [`ConditionTree`] and change
//! state only when a value (or a terminated read) arrives.

pub mod tree;

pub use tree::{ConditionTree, SharedConditionTree, Subject, Updater};

use serde::Deserialize;
use std::cell::RefCell;
use std::rc::Rc;

use crate::client::Request;
use crate::error::{CoreError, CoreResult};
use crate::mapping::{MappingHandle, Value, ValueKind};

/// Index of a condition within its tree
pub type ConditionId = usize;

/// Reference operand as written in configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    Number(i32),
    Text(String),
    Bounds([i32; 2]),
}

/// Comparison mode with its reference operand
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Equal(Value),
    Greater(i32),
    GreaterEqual(i32),
    Less(i32),
    LessEqual(i32),
    /// Inclusive bounds
    InRange(i32, i32),
    Contains(String),
    NotContains(String),
    StartsWith(String),
    EndsWith(String),
}

impl Comparison {
    /// Build from a mode name and reference
    pub fn from_mode(mode: &str, reference: Reference) -> CoreResult<Self> {
        let invalid = || CoreError::InvalidComparison(format!("{} {:?}", mode, reference));

        let comparison = match (mode, &reference) {
            ("equal", Reference::Number(n)) => Comparison::Equal(Value::Number(*n)),
            ("equal", Reference::Text(s)) => Comparison::Equal(Value::Text(s.clone())),
            ("greater", Reference::Number(n)) => Comparison::Greater(*n),
            ("greater_equal", Reference::Number(n)) => Comparison::GreaterEqual(*n),
            ("less", Reference::Number(n)) => Comparison::Less(*n),
            ("less_equal", Reference::Number(n)) => Comparison::LessEqual(*n),
            ("in_range", Reference::Bounds([lo, hi])) if lo <= hi => Comparison::InRange(*lo, *hi),
            ("contains", Reference::Text(s)) => Comparison::Contains(s.clone()),
            ("not_contains", Reference::Text(s)) => Comparison::NotContains(s.clone()),
            ("starts_with", Reference::Text(s)) => Comparison::StartsWith(s.clone()),
            ("ends_with", Reference::Text(s)) => Comparison::EndsWith(s.clone()),
            _ => return Err(invalid()),
        };
        Ok(comparison)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Comparison::Equal(_) => "equal",
            Comparison::Greater(_) => "greater",
            Comparison::GreaterEqual(_) => "greater_equal",
            Comparison::Less(_) => "less",
            Comparison::LessEqual(_) => "less_equal",
            Comparison::InRange(..) => "in_range",
            Comparison::Contains(_) => "contains",
            Comparison::NotContains(_) => "not_contains",
            Comparison::StartsWith(_) => "starts_with",
            Comparison::EndsWith(_) => "ends_with",
        }
    }

    /// Kind of value this comparison can be applied to
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Comparison::Equal(v) => v.kind(),
            Comparison::Greater(_)
            | Comparison::GreaterEqual(_)
            | Comparison::Less(_)
            | Comparison::LessEqual(_)
            | Comparison::InRange(..) => ValueKind::Numeric,
            Comparison::Contains(_)
            | Comparison::NotContains(_)
            | Comparison::StartsWith(_)
            | Comparison::EndsWith(_) => ValueKind::Text,
        }
    }

    /// None if the value kind does not fit
    pub fn evaluate(&self, value: &Value) -> Option<bool> {
        match (self, value) {
            (Comparison::Equal(reference), value) if reference.kind() == value.kind() => {
                Some(reference == value)
            }
            (Comparison::Greater(r), Value::Number(v)) => Some(v > r),
            (Comparison::GreaterEqual(r), Value::Number(v)) => Some(v >= r),
            (Comparison::Less(r), Value::Number(v)) => Some(v < r),
            (Comparison::LessEqual(r), Value::Number(v)) => Some(v <= r),
            (Comparison::InRange(lo, hi), Value::Number(v)) => Some(lo <= v && v <= hi),
            (Comparison::Contains(r), Value::Text(v)) => Some(v.contains(r.as_str())),
            (Comparison::NotContains(r), Value::Text(v)) => Some(!v.contains(r.as_str())),
            (Comparison::StartsWith(r), Value::Text(v)) => Some(v.starts_with(r.as_str())),
            (Comparison::EndsWith(r), Value::Text(v)) => Some(v.ends_with(r.as_str())),
            _ => None,
        }
    }
}

/// Two-branch decision node over one mapping
#[derive(Debug, Clone)]
pub struct Condition {
    mapping: MappingHandle,
    comparison: Comparison,
    state: bool,
    pub(crate) yes: usize,
    pub(crate) no: usize,
}

impl Condition {
    /// Fails if the mapping cannot be read or the comparison does not fit its kind
    pub fn new(mapping: MappingHandle, comparison: Comparison) -> CoreResult<Self> {
        Request::validate(&mapping.borrow())?;

        let kind = mapping.kind();
        if comparison.value_kind() != kind {
            return Err(CoreError::ComparisonMismatch {
                mode: comparison.name(),
                kind: kind.as_str(),
                mapping: mapping.name(),
            });
        }

        Ok(Self {
            mapping,
            comparison,
            // Same as the offline default
            state: true,
            yes: 0,
            no: 0,
        })
    }

    pub fn mapping(&self) -> &MappingHandle {
        &self.mapping
    }

    pub fn comparison(&self) -> &Comparison {
        &self.comparison
    }

    pub fn state(&self) -> bool {
        self.state
    }

    /// Apply a new state, true if it flipped
    pub(crate) fn set_state(&mut self, state: bool) -> bool {
        let flipped = self.state != state;
        self.state = state;
        flipped
    }
}

/// Hears about conditions that flipped
pub trait ConditionListener {
    fn condition_changed(&mut self, condition: ConditionId, state: bool);
}

pub type SharedConditionListener = Rc<RefCell<dyn ConditionListener>>;

/// Listener that just remembers that something flipped
#[derive(Debug, Default)]
pub struct ChangeFlag {
    raised: bool,
}

impl ChangeFlag {
    pub fn shared() -> Rc<RefCell<ChangeFlag>> {
        Rc::new(RefCell::new(ChangeFlag::default()))
    }

    /// Read and clear
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.raised)
    }
}

impl ConditionListener for ChangeFlag {
    fn condition_changed(&mut self, _condition: ConditionId, _state: bool) {
        self.raised = true;
    }
}
