//! Runtime event records emitted by the matching loop.
//!
//! Every lifecycle firing is reported as a [`RuleEvent`] so callers (the
//! CLI, tests) can observe the run without hooking the action host.

use serde::Serialize;

/// What happened to a rule or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A new candidate instance was created.
    Created,
    /// An instance walked past its last clause.
    Completed,
    /// An instance was removed, whatever the cause.
    Destroyed,
    /// The rule-level timeout elapsed.
    TimedOut,
    /// A clause-level timeout elapsed.
    MatchTimedOut,
    /// End of stream reached with the rule never having matched.
    Missing,
    /// An instance was abandoned after real (non-precondition) progress.
    Incomplete,
}

/// One lifecycle event, in strict firing order.
#[derive(Debug, Clone, Serialize)]
pub struct RuleEvent {
    pub kind: EventKind,
    pub rule: String,
    /// Global line id at which the event fired (0 for end-of-stream events
    /// on an empty input).
    pub line_id: u64,
    pub startline: u64,
    pub stopline: u64,
}

impl RuleEvent {
    pub fn new(kind: EventKind, rule: &str, line_id: u64, startline: u64, stopline: u64) -> Self {
        RuleEvent {
            kind,
            rule: rule.to_string(),
            line_id,
            startline,
            stopline,
        }
    }
}
