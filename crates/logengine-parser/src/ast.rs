//! Raw script entities: everything the loader produces before compilation.
//!
//! The loader classifies each `lvalue=rvalue` entry into a typed
//! [`RuleEntry`] but performs no macro resolution and no regex work; entries
//! keep their declaration order and source lines so the compiler can thread
//! positional state (`REGEX_OPTIONS`, `MATCH_TIMEOUT`, `MATCH_NEXT_LINE`)
//! and report errors with full context.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{ScriptError, SourceLocation};

// =============================================================================
// Enumerations
// =============================================================================

/// The three positional clause kinds that make up a rule's match list.
///
/// `OPTIONAL` clauses are not part of the match list and are kept separately
/// on the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClauseKind {
    Pre,
    Begin,
    End,
}

impl fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClauseKind::Pre => write!(f, "PRE"),
            ClauseKind::Begin => write!(f, "BEGIN"),
            ClauseKind::End => write!(f, "END"),
        }
    }
}

/// Rule lifecycle action kinds, declared as `ACTION.<KIND>=<body>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Create,
    Complete,
    Destroy,
    Timeout,
    MatchTimeout,
    Missing,
    Incomplete,
}

impl ActionKind {
    /// All kinds, in the order used for stable iteration in reports.
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Create,
        ActionKind::Complete,
        ActionKind::Destroy,
        ActionKind::Timeout,
        ActionKind::MatchTimeout,
        ActionKind::Missing,
        ActionKind::Incomplete,
    ];
}

impl FromStr for ActionKind {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(ActionKind::Create),
            "COMPLETE" => Ok(ActionKind::Complete),
            "DESTROY" => Ok(ActionKind::Destroy),
            "TIMEOUT" => Ok(ActionKind::Timeout),
            "MATCH_TIMEOUT" => Ok(ActionKind::MatchTimeout),
            "MISSING" => Ok(ActionKind::Missing),
            "INCOMPLETE" => Ok(ActionKind::Incomplete),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => write!(f, "CREATE"),
            ActionKind::Complete => write!(f, "COMPLETE"),
            ActionKind::Destroy => write!(f, "DESTROY"),
            ActionKind::Timeout => write!(f, "TIMEOUT"),
            ActionKind::MatchTimeout => write!(f, "MATCH_TIMEOUT"),
            ActionKind::Missing => write!(f, "MISSING"),
            ActionKind::Incomplete => write!(f, "INCOMPLETE"),
        }
    }
}

/// A timeout setting: an explicit line count or a reset to the engine
/// default (`DEFAULT`, meaning "disabled").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeoutSpec {
    Lines(u64),
    Default,
}

impl TimeoutSpec {
    /// Parse `n` or `DEFAULT` (case-insensitive).
    pub fn parse(s: &str) -> std::result::Result<Self, ()> {
        if s.eq_ignore_ascii_case("default") {
            return Ok(TimeoutSpec::Default);
        }
        s.parse::<u64>().map(TimeoutSpec::Lines).map_err(|_| ())
    }
}

// =============================================================================
// Rule entries
// =============================================================================

/// A compile-time variable value or the `<RTVAR>` runtime marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VarValue {
    /// Macro-like value substituted at compile time.
    Text(String),
    /// Declared with `<RTVAR>`: bound per instance at match time.
    Runtime,
}

/// One classified `lvalue=rvalue` entry of a rule section, in declaration
/// order.
#[derive(Debug, Clone, Serialize)]
pub enum RuleEntry {
    Clause {
        kind: ClauseKind,
        accum: bool,
        code: bool,
        text: String,
    },
    Optional {
        text: String,
    },
    Action {
        kind: ActionKind,
        body: String,
    },
    Enabled(bool),
    RuleTimeout(TimeoutSpec),
    MatchTimeout(TimeoutSpec),
    MatchNextLine(bool),
    RegexOptions(String),
    Variable {
        name: String,
        value: VarValue,
    },
}

/// A [`RuleEntry`] together with the source line it was declared on.
#[derive(Debug, Clone, Serialize)]
pub struct SpannedEntry {
    pub entry: RuleEntry,
    pub line: u32,
}

/// A rule section as loaded: name, source location, ordered entries.
#[derive(Debug, Clone, Serialize)]
pub struct RawRule {
    /// Upper-cased rule name (names are case-insensitive globally).
    pub name: String,
    #[serde(skip)]
    pub location: SourceLocation,
    pub entries: Vec<SpannedEntry>,
}

// =============================================================================
// Non-rule sections
// =============================================================================

/// A macro from a `DEFINE_MACRO` section. Immutable after load.
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub text: String,
    pub location: SourceLocation,
}

/// A named code body from a `SHARED_CODE` or `TERMINATION_CODE` section.
#[derive(Debug, Clone)]
pub struct CodeDecl {
    pub name: String,
    pub body: String,
    pub location: SourceLocation,
}

// =============================================================================
// The loaded script set
// =============================================================================

/// Everything loaded from one or more scripts (including `INCLUDE`s).
///
/// Load errors accumulate in `errors` and loading continues so a single run
/// can report as many problems as possible; a non-empty error list must
/// abort before the run loop starts.
#[derive(Debug, Default)]
pub struct ScriptSet {
    /// Macros keyed by upper-cased name.
    pub macros: HashMap<String, MacroDef>,
    /// Shared-code declarations, in declaration order across all scripts.
    pub shared_code: Vec<CodeDecl>,
    /// Termination-code declarations, in declaration order across all scripts.
    pub termination_code: Vec<CodeDecl>,
    /// Rules in declaration order across all scripts.
    pub rules: Vec<RawRule>,
    /// Accumulated load errors.
    pub errors: Vec<ScriptError>,
    /// Basenames of scripts already processed; re-includes are skipped.
    pub(crate) included: std::collections::HashSet<String>,
}

impl ScriptSet {
    pub fn new() -> Self {
        ScriptSet::default()
    }

    /// Look up a rule by (case-insensitive) name.
    pub fn rule(&self, name: &str) -> Option<&RawRule> {
        let upper = name.to_ascii_uppercase();
        self.rules.iter().find(|r| r.name == upper)
    }

    /// Mark a script basename as processed. Returns `false` when it had
    /// already been processed (the caller must skip it).
    pub(crate) fn mark_included(&mut self, basename: &str) -> bool {
        self.included.insert(basename.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_roundtrip() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.to_string().parse::<ActionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_timeout_spec_parse() {
        assert_eq!(TimeoutSpec::parse("15"), Ok(TimeoutSpec::Lines(15)));
        assert_eq!(TimeoutSpec::parse("default"), Ok(TimeoutSpec::Default));
        assert_eq!(TimeoutSpec::parse("DEFAULT"), Ok(TimeoutSpec::Default));
        assert!(TimeoutSpec::parse("-3").is_err());
        assert!(TimeoutSpec::parse("soon").is_err());
    }

    #[test]
    fn test_rule_lookup_is_case_insensitive() {
        let mut set = ScriptSet::new();
        set.rules.push(RawRule {
            name: "FETCH_FAILURES".into(),
            location: SourceLocation::new("x.rules", 1),
            entries: Vec::new(),
        });
        assert!(set.rule("fetch_failures").is_some());
        assert!(set.rule("Fetch_Failures").is_some());
        assert!(set.rule("other").is_none());
    }
}
