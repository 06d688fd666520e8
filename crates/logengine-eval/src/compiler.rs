//! Compile a loaded [`ScriptSet`] into runtime form.
//!
//! For every rule: resolve each clause through the macro/variable expansion
//! pass, register runtime extracts and their capture ordinals, thread the
//! positional modifiers (`REGEX_OPTIONS`, `MATCH_TIMEOUT`, `MATCH_NEXT_LINE`),
//! intern cacheable regexes, and hand action bodies and code clauses to the
//! action host.
//!
//! Errors accumulate in the [`CompileOutput`]; callers abort before the run
//! loop when any are present. Rules without a BEGIN clause are dropped with
//! a warning rather than an error.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use logengine_parser::{
    ActionKind, ClauseKind, RawRule, RuleEntry, ScriptSet, SourceLocation, TimeoutSpec, VarValue,
};

use crate::cache::{CacheHandle, RegexCache};
use crate::error::EvalError;
use crate::host::{ActionHost, Callable};
use crate::resolve::{resolve_clause, RuntimeExtract, RuntimeInsert, VarDef, VarKind};

// =============================================================================
// Compiled types
// =============================================================================

/// A regex clause after resolution: pattern text, flags, cache handle
/// (absent when runtime inserts force per-instance compilation).
#[derive(Debug, Clone)]
pub struct RegexSpec {
    pub pattern: String,
    pub options: String,
    pub handle: Option<CacheHandle>,
    pub inserts: Vec<RuntimeInsert>,
}

/// The evaluatable part of a match clause.
#[derive(Clone)]
pub enum ClauseBody {
    Regex(RegexSpec),
    /// A code clause; `None` when the body failed to compile (the clause is
    /// disabled and never matches).
    Code(Option<Callable>),
}

impl std::fmt::Debug for ClauseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClauseBody::Regex(spec) => f.debug_tuple("Regex").field(&spec.pattern).finish(),
            ClauseBody::Code(c) => f
                .debug_tuple("Code")
                .field(&c.as_ref().map(|_| "<callable>"))
                .finish(),
        }
    }
}

/// One PRE/BEGIN/END entry of a rule's match list, immutable post-compile.
#[derive(Debug, Clone)]
pub struct MatchClause {
    pub kind: ClauseKind,
    pub accum: bool,
    pub body: ClauseBody,
    pub extracts: Vec<RuntimeExtract>,
    /// Clause-level timeout in lines since the last match (0 = disabled).
    pub match_timeout: u64,
    /// Position within the match list, for diagnostics.
    pub index: usize,
    pub line: u32,
}

impl MatchClause {
    pub fn is_code(&self) -> bool {
        matches!(self.body, ClauseBody::Code(_))
    }
}

/// An OPTIONAL clause: regex only, tested while an END clause is pending.
#[derive(Debug, Clone)]
pub struct OptionalClause {
    pub spec: RegexSpec,
    pub extracts: Vec<RuntimeExtract>,
    pub line: u32,
}

/// A compiled lifecycle action.
#[derive(Clone)]
pub struct CompiledAction {
    pub body: String,
    /// `None` when the body failed to compile (reported, action disabled).
    pub callable: Option<Callable>,
    pub line: u32,
}

/// A rule ready for the matching runtime.
pub struct CompiledRule {
    pub name: String,
    pub enabled: bool,
    pub clauses: Vec<MatchClause>,
    pub optionals: Vec<OptionalClause>,
    pub actions: HashMap<ActionKind, CompiledAction>,
    /// Rule-level timeout in lines since the last match (0 = disabled).
    pub rule_timeout: u64,
    pub vars: HashMap<String, VarDef>,
    pub location: SourceLocation,
}

/// A compiled TERMINATION_CODE body, run at end of stream in declaration
/// order.
pub struct TerminationHook {
    pub name: String,
    pub callable: Option<Callable>,
    pub location: SourceLocation,
}

/// Everything the compiler produced for one script set.
pub struct CompileOutput {
    pub rules: Vec<CompiledRule>,
    pub termination: Vec<TerminationHook>,
    /// Rules dropped for having no BEGIN clause (warned, not fatal).
    pub dropped: Vec<String>,
    pub errors: Vec<EvalError>,
}

// =============================================================================
// Dump summaries
// =============================================================================

/// Serializable view of a compiled rule, for `--dump`.
#[derive(Debug, Serialize)]
pub struct RuleSummary {
    pub name: String,
    pub enabled: bool,
    pub rule_timeout: u64,
    pub clauses: Vec<ClauseSummary>,
    pub optionals: Vec<String>,
    pub actions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClauseSummary {
    pub kind: ClauseKind,
    pub accum: bool,
    pub code: bool,
    pub pattern: Option<String>,
    pub match_timeout: u64,
    pub extracts: Vec<RuntimeExtract>,
}

impl From<&CompiledRule> for RuleSummary {
    fn from(rule: &CompiledRule) -> Self {
        let mut actions: Vec<String> = rule.actions.keys().map(|k| k.to_string()).collect();
        actions.sort_unstable();
        RuleSummary {
            name: rule.name.clone(),
            enabled: rule.enabled,
            rule_timeout: rule.rule_timeout,
            clauses: rule
                .clauses
                .iter()
                .map(|c| ClauseSummary {
                    kind: c.kind,
                    accum: c.accum,
                    code: c.is_code(),
                    pattern: match &c.body {
                        ClauseBody::Regex(spec) => Some(spec.pattern.clone()),
                        ClauseBody::Code(_) => None,
                    },
                    match_timeout: c.match_timeout,
                    extracts: c.extracts.clone(),
                })
                .collect(),
            optionals: rule
                .optionals
                .iter()
                .map(|o| o.spec.pattern.clone())
                .collect(),
            actions,
        }
    }
}

// =============================================================================
// Compilation
// =============================================================================

const VALID_REGEX_FLAGS: &str = "imsxUu";

/// Compile a loaded script set: rules, shared-code globals, termination
/// hooks. Regexes are interned into `cache`.
pub fn compile_set(
    set: &ScriptSet,
    host: &dyn ActionHost,
    cache: &mut RegexCache,
) -> CompileOutput {
    let macros: HashMap<String, String> = set
        .macros
        .iter()
        .map(|(name, def)| (name.clone(), def.text.clone()))
        .collect();

    let mut out = CompileOutput {
        rules: Vec::new(),
        termination: Vec::new(),
        dropped: Vec::new(),
        errors: Vec::new(),
    };

    for decl in &set.shared_code {
        if let Err(e) = host.declare_global(&decl.name, &decl.body) {
            warn!(global = %decl.name, location = %decl.location, error = %e,
                  "shared-code declaration failed");
        }
    }

    for raw in &set.rules {
        match compile_rule(raw, &macros, host, cache, &mut out.errors) {
            Some(rule) => out.rules.push(rule),
            None => out.dropped.push(raw.name.clone()),
        }
    }

    for decl in &set.termination_code {
        let callable = match host.compile(&decl.body) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(hook = %decl.name, location = %decl.location, error = %e,
                      "termination code failed to compile; disabled");
                None
            }
        };
        out.termination.push(TerminationHook {
            name: decl.name.clone(),
            callable,
            location: decl.location.clone(),
        });
    }

    out
}

/// Compile one rule. Returns `None` when the rule is dropped (no BEGIN).
fn compile_rule(
    raw: &RawRule,
    macros: &HashMap<String, String>,
    host: &dyn ActionHost,
    cache: &mut RegexCache,
    errors: &mut Vec<EvalError>,
) -> Option<CompiledRule> {
    let before = errors.len();

    let mut rule = CompiledRule {
        name: raw.name.clone(),
        enabled: true,
        clauses: Vec::new(),
        optionals: Vec::new(),
        actions: HashMap::new(),
        rule_timeout: 0,
        vars: HashMap::new(),
        location: raw.location.clone(),
    };

    // Positional state threaded through the entries in declaration order.
    let mut options = String::new();
    let mut pending_match_timeout: Option<u64> = None;

    for spanned in &raw.entries {
        let loc = SourceLocation::new(raw.location.file.clone(), spanned.line);
        match &spanned.entry {
            RuleEntry::Clause {
                kind,
                accum,
                code,
                text,
            } => {
                let index = rule.clauses.len();
                let match_timeout = pending_match_timeout.take().unwrap_or(0);
                let clause_err = |message: String| EvalError::Clause {
                    loc: loc.clone(),
                    rule: raw.name.clone(),
                    clause: kind.to_string(),
                    index,
                    message,
                };

                if *code {
                    let callable = match host.compile(text) {
                        Ok(c) => Some(c),
                        Err(e) => {
                            warn!(rule = %raw.name, clause = %kind, index, error = %e,
                                  "code clause failed to compile; disabled");
                            None
                        }
                    };
                    rule.clauses.push(MatchClause {
                        kind: *kind,
                        accum: *accum,
                        body: ClauseBody::Code(callable),
                        extracts: Vec::new(),
                        match_timeout,
                        index,
                        line: spanned.line,
                    });
                    continue;
                }

                let resolved = match resolve_clause(text, macros, &mut rule.vars) {
                    Ok(r) => r,
                    Err(e) => {
                        errors.push(clause_err(e.to_string()));
                        continue;
                    }
                };
                let handle = if resolved.inserts.is_empty() {
                    match cache.intern(&resolved.text, &options) {
                        Ok(h) => Some(h),
                        Err(e) => {
                            errors.push(clause_err(e.to_string()));
                            continue;
                        }
                    }
                } else {
                    None
                };
                rule.clauses.push(MatchClause {
                    kind: *kind,
                    accum: *accum,
                    body: ClauseBody::Regex(RegexSpec {
                        pattern: resolved.text,
                        options: options.clone(),
                        handle,
                        inserts: resolved.inserts,
                    }),
                    extracts: resolved.extracts,
                    match_timeout,
                    index,
                    line: spanned.line,
                });
            }

            RuleEntry::Optional { text } => {
                let index = rule.optionals.len();
                let clause_err = |message: String| EvalError::Clause {
                    loc: loc.clone(),
                    rule: raw.name.clone(),
                    clause: "OPTIONAL".to_string(),
                    index,
                    message,
                };
                let resolved = match resolve_clause(text, macros, &mut rule.vars) {
                    Ok(r) => r,
                    Err(e) => {
                        errors.push(clause_err(e.to_string()));
                        continue;
                    }
                };
                let handle = if resolved.inserts.is_empty() {
                    match cache.intern(&resolved.text, &options) {
                        Ok(h) => Some(h),
                        Err(e) => {
                            errors.push(clause_err(e.to_string()));
                            continue;
                        }
                    }
                } else {
                    None
                };
                rule.optionals.push(OptionalClause {
                    spec: RegexSpec {
                        pattern: resolved.text,
                        options: options.clone(),
                        handle,
                        inserts: resolved.inserts,
                    },
                    extracts: resolved.extracts,
                    line: spanned.line,
                });
            }

            RuleEntry::Action { kind, body } => {
                if rule.actions.contains_key(kind) {
                    errors.push(EvalError::Rule {
                        loc,
                        rule: raw.name.clone(),
                        message: format!("duplicate action {kind}"),
                    });
                    continue;
                }
                let callable = match host.compile(body) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        warn!(rule = %raw.name, action = %kind, error = %e,
                              "action failed to compile; disabled");
                        None
                    }
                };
                rule.actions.insert(
                    *kind,
                    CompiledAction {
                        body: body.clone(),
                        callable,
                        line: spanned.line,
                    },
                );
            }

            RuleEntry::Enabled(b) => rule.enabled = *b,

            RuleEntry::RuleTimeout(spec) => {
                rule.rule_timeout = match spec {
                    TimeoutSpec::Lines(n) => *n,
                    TimeoutSpec::Default => 0,
                };
            }

            RuleEntry::MatchTimeout(spec) => {
                pending_match_timeout = match spec {
                    TimeoutSpec::Lines(n) => Some(*n),
                    TimeoutSpec::Default => Some(0),
                };
            }

            RuleEntry::MatchNextLine(b) => {
                pending_match_timeout = if *b { Some(1) } else { None };
            }

            RuleEntry::RegexOptions(flags) => {
                if flags.chars().all(|c| VALID_REGEX_FLAGS.contains(c)) {
                    options = flags.clone();
                } else {
                    errors.push(EvalError::Rule {
                        loc,
                        rule: raw.name.clone(),
                        message: format!(
                            "bad REGEX_OPTIONS '{flags}' (allowed: {VALID_REGEX_FLAGS})"
                        ),
                    });
                }
            }

            RuleEntry::Variable { name, value } => {
                if rule.vars.contains_key(name) {
                    errors.push(EvalError::Rule {
                        loc,
                        rule: raw.name.clone(),
                        message: format!("variable '{name}' already defined"),
                    });
                    continue;
                }
                let def = match value {
                    VarValue::Text(t) => VarDef {
                        kind: VarKind::CompileTime(t.clone()),
                        is_array: false,
                    },
                    VarValue::Runtime => VarDef {
                        kind: VarKind::Runtime,
                        is_array: false,
                    },
                };
                rule.vars.insert(name.clone(), def);
            }
        }
    }

    validate_rule(&rule, raw, errors);

    if errors.len() > before {
        // Keep the rule so later passes can still reference its name; the
        // accumulated errors abort the run anyway.
        return Some(rule);
    }

    if !rule.clauses.iter().any(|c| c.kind == ClauseKind::Begin) {
        warn!(rule = %raw.name, location = %raw.location,
              "rule has no BEGIN clause; dropped from the runtime list");
        return None;
    }

    Some(rule)
}

fn validate_rule(rule: &CompiledRule, raw: &RawRule, errors: &mut Vec<EvalError>) {
    let first_of = |kind: ClauseKind| rule.clauses.iter().find(|c| c.kind == kind);

    for kind in [ClauseKind::Pre, ClauseKind::Begin] {
        if let Some(clause) = first_of(kind) {
            if clause.accum {
                errors.push(EvalError::Rule {
                    loc: SourceLocation::new(raw.location.file.clone(), clause.line),
                    rule: rule.name.clone(),
                    message: format!("the first {kind} clause cannot be an ACCUM clause"),
                });
            }
        }
    }
}
