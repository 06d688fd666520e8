//! Live rule instances and previous-instance snapshots.

use std::collections::HashSet;

use crate::host::{PrevSummary, VarTable};

/// Where an instance is in its lifecycle.
///
/// *Awaiting-pre* instances were armed by a precondition match only; the
/// advance phase applies just the rule-timeout clock to them, and the
/// candidate walk re-arms or promotes them. *Matching* instances step
/// through the match list normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    AwaitingPre,
    Matching,
}

/// A partially-matched rule instance.
#[derive(Debug)]
pub struct RuleInstance {
    pub rule_idx: usize,
    pub rule_name: String,
    /// Current position in the rule's match list.
    pub idx: usize,
    pub state: InstanceState,
    /// Line id the instance was created on (not updated by re-arming).
    pub born: u64,
    /// Line id of the match that armed or re-armed this instance.
    pub startline: u64,
    /// Line id of the most recent successful match (or optional match).
    pub last_match: u64,
    pub vars: VarTable,
    /// Logfile the instance was created in.
    pub logfile: String,
    /// Set when the instance reaches a terminal state; swept after each
    /// phase so iteration order stays stable within a line.
    pub dead: bool,
}

/// Read-only snapshot of the last completed instance of a rule.
///
/// Owns a copy of the variable table; never points back into the live list.
#[derive(Debug, Clone)]
pub struct PrevInstance {
    pub rule: String,
    pub startline: u64,
    pub stopline: u64,
    pub vars: VarTable,
    /// Controllers this snapshot has already armed via `compare_rules`;
    /// used to prevent re-arming by the same prerequisite.
    pub rules_created: HashSet<String>,
}

impl PrevInstance {
    pub fn summary(&self) -> PrevSummary {
        PrevSummary {
            rule: self.rule.clone(),
            startline: self.startline,
            stopline: self.stopline,
        }
    }
}
