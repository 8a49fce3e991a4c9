//! Configuration error taxonomy
//!
//! Only configuration errors are represented here. Unmatched inbound messages are
//! ignored and device timeouts travel through `ClientListener::request_terminated`,
//! so neither ever shows up as a `CoreError`.

use thiserror::Error;

/// Errors raised when the core is wired up inconsistently
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A mapping is used for an operation it carries no template for
    #[error("mapping '{mapping}' has no {template} template")]
    MissingTemplate {
        mapping: String,
        template: &'static str,
    },

    /// Request/response templates must be SysEx to identify a round trip
    #[error("mapping '{mapping}': {template} must be a SysEx message to be used for reads")]
    UnsupportedMessage {
        mapping: String,
        template: &'static str,
    },

    /// Unknown comparison mode name
    #[error("invalid condition comparison mode '{0}'")]
    InvalidComparison(String),

    /// The comparison reference does not fit the mapping's value kind
    #[error("comparison '{mode}' cannot be applied to {kind} mapping '{mapping}'")]
    ComparisonMismatch {
        mode: &'static str,
        kind: &'static str,
        mapping: String,
    },

    /// A single-value condition tree contains a list somewhere
    #[error("condition tree must resolve to exactly one value, but contains a list")]
    MixedConditionTree,

    /// LED partition asked for an action that is not part of the enabled set
    #[error("LED segment bookkeeping: rank {rank} out of {count} LED actions")]
    SegmentBookkeeping { rank: usize, count: usize },

    /// A label placement name that was never registered
    #[error("unknown display label '{0}'")]
    UnknownLabel(String),

    /// Unknown push-button mode name
    #[error("unknown push-button mode '{0}'")]
    UnknownMode(String),
}

/// Result alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;
