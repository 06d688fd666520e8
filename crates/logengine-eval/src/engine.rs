//! The matching runtime.
//!
//! Consumes a line stream and drives rule instances through their match
//! sequences. Strictly serial per line:
//!
//! 1. Advance live instances, in creation order
//! 2. Create / re-arm candidates, in rule declaration order
//! 3. Re-check completion for instances moved by the candidate walk
//!
//! Actions fire through the [`ActionHost`]; user code reaches back into the
//! engine through [`EngineOps`]. Every lifecycle firing is also reported as
//! a [`RuleEvent`] to the caller.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing::{debug, warn};

use logengine_parser::{ActionKind, ClauseKind, ScriptSet};

use crate::buffer::{self, OutputBuffer};
use crate::cache::{pattern_with_options, CaptureSet, RegexCache};
use crate::compiler::{compile_set, ClauseBody, CompiledRule, RegexSpec, RuleSummary, TerminationHook};
use crate::error::EvalError;
use crate::host::{
    bind_var, ActionHost, Binding, EngineOps, PrevSummary, Value, VarTable,
};
use crate::instance::{InstanceState, PrevInstance, RuleInstance};
use crate::line::LineRecord;
use crate::resolve::RuntimeExtract;
use crate::result::{EventKind, RuleEvent};

// =============================================================================
// Configuration
// =============================================================================

/// Runtime knobs for the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Single-match fast path: a rule whose only required clause matched
    /// during the candidate walk completes on the spot, with no instance,
    /// no CREATE and no DESTROY.
    pub fast: bool,
}

// =============================================================================
// Shared state visible to user code
// =============================================================================

/// The engine state reachable from action invocations. Grouped so one
/// mutable borrow hands user code everything it may touch while the
/// instance list and rule table stay with the matching loop.
#[derive(Default)]
struct SharedState {
    previous: HashMap<String, PrevInstance>,
    /// Rules that have completed at least once.
    found: HashSet<String>,
    user_opts: HashMap<String, Vec<String>>,
    queried_opts: HashSet<String>,
    buffer: OutputBuffer,
    stop: bool,
    /// Rule names queued by `reset_rule_instances`, applied at the next
    /// phase boundary so the instance list never changes mid-iteration.
    pending_resets: Vec<String>,
}

/// One invocation's view of the engine: the shared state plus the
/// controller identity and the current instance's variable table.
struct OpsCtx<'a> {
    shared: &'a mut SharedState,
    controller: &'a str,
    vars: &'a mut VarTable,
}

impl EngineOps for OpsCtx<'_> {
    fn get_user_opt(&mut self, name: &str) -> Option<Value> {
        let upper = name.to_ascii_uppercase();
        self.shared.queried_opts.insert(upper.clone());
        self.shared.user_opts.get(&upper).map(|vals| {
            if vals.len() == 1 {
                Value::Scalar(vals[0].clone())
            } else {
                Value::List(vals.clone())
            }
        })
    }

    fn reset_rule_instances(&mut self, rule: &str) {
        self.shared.pending_resets.push(rule.to_ascii_uppercase());
    }

    fn has_rule_ever_matched(&self, rule: &str) -> bool {
        self.shared.found.contains(&rule.to_ascii_uppercase())
    }

    fn get_last_rule_inst(&self, rule: &str) -> Option<PrevSummary> {
        self.shared
            .previous
            .get(&rule.to_ascii_uppercase())
            .map(PrevInstance::summary)
    }

    fn compare_rules(&mut self, rules: &[String]) -> Option<String> {
        let controller_start = self
            .shared
            .previous
            .get(self.controller)
            .map(|p| p.startline);

        let mut winner: Option<String> = None;
        let mut best_stop = 0u64;
        for name in rules {
            let upper = name.to_ascii_uppercase();
            let Some(prev) = self.shared.previous.get(&upper) else {
                continue;
            };
            let after_controller = controller_start.map_or(true, |cs| prev.startline > cs);
            if after_controller
                && !prev.rules_created.contains(self.controller)
                && (winner.is_none() || prev.stopline > best_stop)
            {
                best_stop = prev.stopline;
                winner = Some(upper);
            }
        }

        if let Some(ref w) = winner {
            // The winner armed the controller on this line; remember it so
            // the same prerequisite cannot re-arm the controller.
            if let Some(prev) = self.shared.previous.get_mut(w) {
                prev.rules_created.insert(self.controller.to_string());
            }
        }
        winner
    }

    fn import_inst_vars(&mut self, rule: &str) -> bool {
        match self.shared.previous.get(&rule.to_ascii_uppercase()) {
            Some(prev) => {
                for (k, v) in &prev.vars {
                    self.vars.insert(k.clone(), v.clone());
                }
                true
            }
            None => false,
        }
    }

    fn compare_rules_and_import(&mut self, rules: &[String]) -> Option<String> {
        let winner = self.compare_rules(rules)?;
        self.import_inst_vars(&winner);
        Some(winner)
    }

    fn processing_complete(&mut self) {
        self.shared.stop = true;
    }

    fn write_to_buffer(&mut self, text: &str) {
        self.shared.buffer.write(text);
    }

    fn clear_buffer(&mut self) {
        self.shared.buffer.clear();
    }

    fn write_buffer_to_stdout(&mut self) {
        self.shared.buffer.flush_stdout();
    }

    fn write_buffer_to_file(&mut self, path: &str) {
        self.shared.buffer.flush_file(path);
    }

    fn write_list_to_stdout(&mut self, items: &[String]) {
        buffer::write_list_to_stdout(items);
    }

    fn write_list_to_file(&mut self, path: &str, items: &[String]) {
        buffer::write_list_to_file(path, items);
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The single owning engine value: rules, cache, host, live instances and
/// all cross-rule state.
pub struct Engine {
    cfg: EngineConfig,
    rules: Vec<CompiledRule>,
    termination: Vec<TerminationHook>,
    host: Box<dyn ActionHost>,
    cache: RegexCache,
    instances: Vec<RuleInstance>,
    shared: SharedState,
    line_id: u64,
    current: Option<LineRecord>,
}

impl Engine {
    pub fn new(host: Box<dyn ActionHost>, cfg: EngineConfig) -> Self {
        Engine {
            cfg,
            rules: Vec::new(),
            termination: Vec::new(),
            host,
            cache: RegexCache::new(),
            instances: Vec::new(),
            shared: SharedState::default(),
            line_id: 0,
            current: None,
        }
    }

    /// Compile a loaded script set into this engine. Returned errors must
    /// abort before the run loop; an empty vec means the engine is ready.
    pub fn load(&mut self, set: &ScriptSet) -> Vec<EvalError> {
        let out = compile_set(set, &*self.host, &mut self.cache);
        self.rules.extend(out.rules);
        self.termination.extend(out.termination);
        out.errors
    }

    /// Record a `--user name=value` option; repeated names accumulate in
    /// order.
    pub fn set_user_opt(&mut self, name: &str, value: &str) {
        self.shared
            .user_opts
            .entry(name.to_ascii_uppercase())
            .or_default()
            .push(value.to_string());
    }

    /// User options never read through `get_user_opt`, sorted by name.
    pub fn unqueried_user_opts(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .user_opts
            .keys()
            .filter(|k| !self.shared.queried_opts.contains(*k))
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn live_instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Whether a user action has asked the runtime to stop reading.
    pub fn stop_requested(&self) -> bool {
        self.shared.stop
    }

    /// The previous-instance record of a rule, if it ever completed.
    pub fn last_instance(&self, rule: &str) -> Option<PrevSummary> {
        self.shared
            .previous
            .get(&rule.to_ascii_uppercase())
            .map(PrevInstance::summary)
    }

    /// Unflushed output-buffer contents.
    pub fn buffer_contents(&self) -> &str {
        self.shared.buffer.contents()
    }

    /// Pre-size the output buffer (the CLI's `--buffer` hint).
    pub fn reserve_buffer(&mut self, bytes: usize) {
        self.shared.buffer.reserve(bytes);
    }

    /// Serializable rule summaries, for `--dump`.
    pub fn summaries(&self) -> Vec<RuleSummary> {
        self.rules.iter().map(RuleSummary::from).collect()
    }

    // -------------------------------------------------------------------------
    // Per-line protocol
    // -------------------------------------------------------------------------

    /// Process one line: advance instances, create candidates, re-check
    /// completion. Returns the lifecycle events fired, in order.
    pub fn process_line(&mut self, file: &str, file_line: u64, text: &str) -> Vec<RuleEvent> {
        self.line_id += 1;
        let line = LineRecord::new(self.line_id, file, file_line, text);
        let mut events = Vec::new();

        self.advance_instances(&line, &mut events);
        self.create_candidates(&line, &mut events);
        self.recheck_completion(&line, &mut events);

        self.current = Some(line);
        events
    }

    fn advance_instances(&mut self, line: &LineRecord, events: &mut Vec<RuleEvent>) {
        for i in 0..self.instances.len() {
            if self.instances[i].dead {
                continue;
            }
            match self.instances[i].state {
                InstanceState::AwaitingPre => self.check_rule_timeout_only(i, line, events),
                InstanceState::Matching => self.advance_matching(i, line, events),
            }
        }
        self.end_phase(line, events);
    }

    /// Awaiting-pre instances evaluate nothing; only the rule-timeout clock
    /// runs. TIMEOUT fires without INCOMPLETE (the prior clause is a PRE).
    fn check_rule_timeout_only(&mut self, i: usize, line: &LineRecord, events: &mut Vec<RuleEvent>) {
        let rule_timeout = self.rules[self.instances[i].rule_idx].rule_timeout;
        if rule_timeout > 0 && line.line_id - self.instances[i].last_match >= rule_timeout {
            self.fire_instance_action(i, ActionKind::Timeout, line);
            self.push_event(events, EventKind::TimedOut, i, line);
            self.destroy_instance(i, line, events);
        }
    }

    fn advance_matching(&mut self, i: usize, line: &LineRecord, events: &mut Vec<RuleEvent>) {
        if self.at_end(i) {
            self.complete_instance(i, line, events);
            return;
        }

        // Step through the match list: a failed ACCUM clause falls through
        // to the next clause on the same line; anything else stops the walk.
        let mut progressed = false;
        loop {
            let inst = &self.instances[i];
            if inst.idx >= self.rules[inst.rule_idx].clauses.len() {
                break;
            }
            let clause_idx = inst.idx;
            let matched = self.eval_instance_clause(i, clause_idx, line);

            let inst = &mut self.instances[i];
            let clause = &self.rules[inst.rule_idx].clauses[clause_idx];
            if matched {
                let hold = clause.accum && !clause.is_code();
                if !hold {
                    inst.idx += 1;
                }
                inst.last_match = line.line_id;
                progressed = true;
                break;
            } else if clause.accum {
                inst.idx += 1;
            } else {
                break;
            }
        }

        if self.at_end(i) {
            self.complete_instance(i, line, events);
            return;
        }

        let (match_timeout, awaiting_end, prior_is_pre, rule_timeout) = {
            let inst = &self.instances[i];
            let rule = &self.rules[inst.rule_idx];
            let clause = &rule.clauses[inst.idx];
            (
                clause.match_timeout,
                clause.kind == ClauseKind::End,
                inst.idx > 0 && rule.clauses[inst.idx - 1].kind == ClauseKind::Pre,
                rule.rule_timeout,
            )
        };

        if match_timeout > 0 && line.line_id - self.instances[i].last_match >= match_timeout {
            self.fire_instance_action(i, ActionKind::MatchTimeout, line);
            self.push_event(events, EventKind::MatchTimedOut, i, line);
            self.destroy_instance(i, line, events);
            return;
        }

        // OPTIONAL clauses hold a pending END open: extracts apply and the
        // last-match line moves, but the index never advances.
        if !progressed && awaiting_end {
            self.eval_optionals(i, line);
        }

        if !progressed
            && rule_timeout > 0
            && line.line_id - self.instances[i].last_match >= rule_timeout
        {
            self.fire_instance_action(i, ActionKind::Timeout, line);
            self.push_event(events, EventKind::TimedOut, i, line);
            if !prior_is_pre {
                self.fire_instance_action(i, ActionKind::Incomplete, line);
                self.push_event(events, EventKind::Incomplete, i, line);
            }
            self.destroy_instance(i, line, events);
        }
    }

    // -------------------------------------------------------------------------
    // Candidate creation
    // -------------------------------------------------------------------------

    fn create_candidates(&mut self, line: &LineRecord, events: &mut Vec<RuleEvent>) {
        for rule_idx in 0..self.rules.len() {
            if !self.rules[rule_idx].enabled {
                continue;
            }
            self.try_create(rule_idx, line, events);
        }
        self.end_phase(line, events);
    }

    /// Walk the match list from the top: matched PREs are preconditions;
    /// the first non-PRE clause decides between a full arm, a parked
    /// awaiting-pre candidate, and nothing.
    fn try_create(&mut self, rule_idx: usize, line: &LineRecord, events: &mut Vec<RuleEvent>) {
        let nclauses = self.rules[rule_idx].clauses.len();
        if nclauses == 0 {
            return;
        }

        let mut walk_vars = VarTable::new();
        let mut wi = 0;
        let mut any_pre = false;
        while wi < nclauses && self.rules[rule_idx].clauses[wi].kind == ClauseKind::Pre {
            if self.eval_clause_with(rule_idx, wi, &mut walk_vars, line.line_id, line.line_id, line)
            {
                any_pre = true;
                wi += 1;
            } else {
                break;
            }
        }

        let mut matched = false;
        if wi < nclauses && self.rules[rule_idx].clauses[wi].kind != ClauseKind::Pre {
            matched =
                self.eval_clause_with(rule_idx, wi, &mut walk_vars, line.line_id, line.line_id, line);
        }

        if !matched && !any_pre {
            return;
        }
        let start = if matched { wi + 1 } else { wi };

        // Single-match fast path: complete on the spot, no instance.
        if matched && self.cfg.fast && start >= nclauses {
            let rule_name = self.rules[rule_idx].name.clone();
            self.fire_rule_action(
                rule_idx,
                ActionKind::Complete,
                &mut walk_vars,
                line.line_id,
                line.line_id,
                line,
            );
            events.push(RuleEvent::new(
                EventKind::Completed,
                &rule_name,
                line.line_id,
                line.line_id,
                line.line_id,
            ));
            self.shared.previous.insert(
                rule_name.clone(),
                PrevInstance {
                    rule: rule_name.clone(),
                    startline: line.line_id,
                    stopline: line.line_id,
                    vars: walk_vars,
                    rules_created: HashSet::new(),
                },
            );
            self.shared.found.insert(rule_name);
            return;
        }

        let state = if matched {
            InstanceState::Matching
        } else {
            InstanceState::AwaitingPre
        };

        // Candidate merging: a PRE-led rule re-arms its live candidate in
        // place instead of duplicating it.
        if self.rules[rule_idx].clauses[0].kind == ClauseKind::Pre {
            if let Some(j) = self.find_replaceable(rule_idx) {
                debug!(rule = %self.rules[rule_idx].name, line = line.line_id, "candidate re-armed");
                let inst = &mut self.instances[j];
                inst.idx = start;
                inst.state = state;
                inst.vars = walk_vars;
                inst.startline = line.line_id;
                inst.last_match = line.line_id;
                inst.logfile = line.file.clone();
                return;
            }
        }

        let rule_name = self.rules[rule_idx].name.clone();
        self.instances.push(RuleInstance {
            rule_idx,
            rule_name: rule_name.clone(),
            idx: start,
            state,
            born: line.line_id,
            startline: line.line_id,
            last_match: line.line_id,
            vars: walk_vars,
            logfile: line.file.clone(),
            dead: false,
        });
        let i = self.instances.len() - 1;
        debug!(rule = %rule_name, line = line.line_id, "instance created");
        self.fire_instance_action(i, ActionKind::Create, line);
        self.push_event(events, EventKind::Created, i, line);
    }

    /// A live candidate is replaceable when it sits on a PRE or just past
    /// one. The most recent such instance wins.
    fn find_replaceable(&self, rule_idx: usize) -> Option<usize> {
        let clauses = &self.rules[rule_idx].clauses;
        self.instances.iter().rposition(|inst| {
            !inst.dead
                && inst.rule_idx == rule_idx
                && (inst.state == InstanceState::AwaitingPre
                    || (inst.idx < clauses.len() && clauses[inst.idx].kind == ClauseKind::Pre)
                    || (inst.idx > 0 && clauses[inst.idx - 1].kind == ClauseKind::Pre))
        })
    }

    /// Completion re-check after the candidate walk: an instance re-armed
    /// past its last clause completes now. Instances born on this line wait
    /// for the next advance phase instead.
    fn recheck_completion(&mut self, line: &LineRecord, events: &mut Vec<RuleEvent>) {
        for i in 0..self.instances.len() {
            if !self.instances[i].dead
                && self.instances[i].state == InstanceState::Matching
                && self.instances[i].born != line.line_id
                && self.at_end(i)
            {
                self.complete_instance(i, line, events);
            }
        }
        self.end_phase(line, events);
    }

    // -------------------------------------------------------------------------
    // End of stream
    // -------------------------------------------------------------------------

    /// End-of-stream protocol: complete instances already past their last
    /// clause, INCOMPLETE the rest, MISSING for never-matched rules, then
    /// run TERMINATION_CODE in declaration order.
    pub fn finish(&mut self) -> Vec<RuleEvent> {
        let line = self
            .current
            .clone()
            .unwrap_or_else(|| LineRecord::new(self.line_id, "", 0, ""));
        let mut events = Vec::new();

        for i in 0..self.instances.len() {
            if !self.instances[i].dead
                && self.instances[i].state == InstanceState::Matching
                && self.at_end(i)
            {
                self.complete_instance(i, &line, &mut events);
            }
        }
        self.end_phase(&line, &mut events);

        for i in 0..self.instances.len() {
            if self.instances[i].dead {
                continue;
            }
            // Candidates still waiting on their preconditions never started
            // in earnest; they are destroyed without INCOMPLETE.
            if self.instances[i].state == InstanceState::Matching {
                let handled = self.fire_instance_action(i, ActionKind::Incomplete, &line);
                if !handled {
                    warn!(rule = %self.instances[i].rule_name,
                          startline = self.instances[i].startline,
                          "instance incomplete at end of stream");
                }
                self.push_event(&mut events, EventKind::Incomplete, i, &line);
            }
            self.destroy_instance(i, &line, &mut events);
        }
        self.end_phase(&line, &mut events);

        for rule_idx in 0..self.rules.len() {
            if !self.rules[rule_idx].enabled {
                continue;
            }
            let name = self.rules[rule_idx].name.clone();
            if self.shared.found.contains(&name) {
                continue;
            }
            let mut vars = VarTable::new();
            let handled = self.fire_rule_action(
                rule_idx,
                ActionKind::Missing,
                &mut vars,
                0,
                line.line_id,
                &line,
            );
            if !handled {
                warn!(rule = %name, "rule never matched");
            }
            events.push(RuleEvent::new(
                EventKind::Missing,
                &name,
                line.line_id,
                0,
                line.line_id,
            ));
        }

        self.run_termination_code(&line);
        self.end_phase(&line, &mut events);

        events
    }

    fn run_termination_code(&mut self, line: &LineRecord) {
        let Engine {
            host,
            shared,
            termination,
            ..
        } = self;
        for hook in termination.iter() {
            let Some(callable) = &hook.callable else {
                continue;
            };
            let binding = Binding {
                vars: VarTable::new(),
                linenumber_start: 0,
                linenumber_stop: line.line_id,
                line_lastread: line.text.clone(),
            };
            let mut vars = VarTable::new();
            let mut ops = OpsCtx {
                shared: &mut *shared,
                controller: &hook.name,
                vars: &mut vars,
            };
            if let Err(e) = host.invoke(callable, &binding, &mut ops) {
                warn!(hook = %hook.name, location = %hook.location, error = %e,
                      "termination code failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Clause evaluation
    // -------------------------------------------------------------------------

    fn eval_instance_clause(&mut self, i: usize, clause_idx: usize, line: &LineRecord) -> bool {
        let (rule_idx, start, stop) = {
            let inst = &self.instances[i];
            (inst.rule_idx, inst.startline, inst.last_match)
        };
        let mut vars = std::mem::take(&mut self.instances[i].vars);
        let matched = self.eval_clause_with(rule_idx, clause_idx, &mut vars, start, stop, line);
        self.instances[i].vars = vars;
        matched
    }

    /// Evaluate one match clause against the current line, binding extracts
    /// into `vars`. Code clauses invoke the host; their truthiness is the
    /// match result, and invocation errors read as no-match.
    fn eval_clause_with(
        &mut self,
        rule_idx: usize,
        clause_idx: usize,
        vars: &mut VarTable,
        bind_start: u64,
        bind_stop: u64,
        line: &LineRecord,
    ) -> bool {
        let Engine {
            rules,
            cache,
            host,
            shared,
            ..
        } = self;
        let rule = &rules[rule_idx];
        let clause = &rule.clauses[clause_idx];

        match &clause.body {
            ClauseBody::Regex(spec) => {
                eval_regex(cache, spec, &clause.extracts, line, vars, &rule.name)
            }
            ClauseBody::Code(callable) => {
                let Some(callable) = callable else {
                    return false;
                };
                let binding = Binding {
                    vars: vars.clone(),
                    linenumber_start: bind_start,
                    linenumber_stop: bind_stop,
                    line_lastread: line.text.clone(),
                };
                let mut ops = OpsCtx {
                    shared,
                    controller: &rule.name,
                    vars,
                };
                match host.invoke(callable, &binding, &mut ops) {
                    Ok(v) => v.is_truthy(),
                    Err(e) => {
                        warn!(rule = %rule.name, clause = clause_idx, error = %e,
                              "code clause failed");
                        false
                    }
                }
            }
        }
    }

    fn eval_optionals(&mut self, i: usize, line: &LineRecord) {
        let Engine {
            rules,
            cache,
            instances,
            ..
        } = self;
        let inst = &mut instances[i];
        let rule = &rules[inst.rule_idx];
        let mut matched_any = false;
        for opt in &rule.optionals {
            if eval_regex(cache, &opt.spec, &opt.extracts, line, &mut inst.vars, &rule.name) {
                matched_any = true;
            }
        }
        if matched_any {
            inst.last_match = line.line_id;
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle plumbing
    // -------------------------------------------------------------------------

    fn at_end(&self, i: usize) -> bool {
        let inst = &self.instances[i];
        inst.idx >= self.rules[inst.rule_idx].clauses.len()
    }

    fn push_event(&self, events: &mut Vec<RuleEvent>, kind: EventKind, i: usize, line: &LineRecord) {
        let inst = &self.instances[i];
        events.push(RuleEvent::new(
            kind,
            &inst.rule_name,
            line.line_id,
            inst.startline,
            inst.last_match,
        ));
    }

    fn complete_instance(&mut self, i: usize, line: &LineRecord, events: &mut Vec<RuleEvent>) {
        self.fire_instance_action(i, ActionKind::Complete, line);
        self.push_event(events, EventKind::Completed, i, line);

        let inst = &self.instances[i];
        debug!(rule = %inst.rule_name, startline = inst.startline,
               stopline = inst.last_match, "instance completed");
        let prev = PrevInstance {
            rule: inst.rule_name.clone(),
            startline: inst.startline,
            stopline: inst.last_match,
            vars: inst.vars.clone(),
            rules_created: HashSet::new(),
        };
        self.shared.previous.insert(inst.rule_name.clone(), prev);
        self.shared.found.insert(inst.rule_name.clone());

        self.destroy_instance(i, line, events);
    }

    fn destroy_instance(&mut self, i: usize, line: &LineRecord, events: &mut Vec<RuleEvent>) {
        if self.instances[i].dead {
            return;
        }
        self.fire_instance_action(i, ActionKind::Destroy, line);
        self.push_event(events, EventKind::Destroyed, i, line);
        self.instances[i].dead = true;
    }

    /// Fire one action of an instance's rule with the instance's variables.
    /// Returns whether the rule declares a handler for this kind.
    fn fire_instance_action(&mut self, i: usize, kind: ActionKind, line: &LineRecord) -> bool {
        let (rule_idx, start, stop) = {
            let inst = &self.instances[i];
            (inst.rule_idx, inst.startline, inst.last_match)
        };
        let mut vars = std::mem::take(&mut self.instances[i].vars);
        let handled = self.fire_rule_action(rule_idx, kind, &mut vars, start, stop, line);
        self.instances[i].vars = vars;
        handled
    }

    /// Fire one action with an explicit variable table (the fast path and
    /// MISSING have no instance). Returns whether a handler is declared.
    fn fire_rule_action(
        &mut self,
        rule_idx: usize,
        kind: ActionKind,
        vars: &mut VarTable,
        start: u64,
        stop: u64,
        line: &LineRecord,
    ) -> bool {
        let Engine {
            rules,
            host,
            shared,
            ..
        } = self;
        let rule = &rules[rule_idx];
        let Some(action) = rule.actions.get(&kind) else {
            return false;
        };
        let Some(callable) = &action.callable else {
            // Reported at compile time; the handler exists but is disabled.
            return true;
        };
        let binding = Binding {
            vars: vars.clone(),
            linenumber_start: start,
            linenumber_stop: stop,
            line_lastread: line.text.clone(),
        };
        let mut ops = OpsCtx {
            shared,
            controller: &rule.name,
            vars,
        };
        if let Err(e) = host.invoke(callable, &binding, &mut ops) {
            warn!(rule = %rule.name, action = %kind, error = %e, "action failed");
        }
        true
    }

    /// Apply queued instance resets and sweep dead instances. Runs at every
    /// phase boundary so iteration order stays stable within a phase.
    fn end_phase(&mut self, line: &LineRecord, events: &mut Vec<RuleEvent>) {
        while !self.shared.pending_resets.is_empty() {
            let resets = std::mem::take(&mut self.shared.pending_resets);
            for name in resets {
                for i in 0..self.instances.len() {
                    if !self.instances[i].dead && self.instances[i].rule_name == name {
                        self.destroy_instance(i, line, events);
                    }
                }
            }
        }
        self.instances.retain(|inst| !inst.dead);
    }
}

// =============================================================================
// Regex clause evaluation
// =============================================================================

fn apply_extracts(vars: &mut VarTable, extracts: &[RuntimeExtract], caps: &CaptureSet) {
    for ex in extracts {
        if let Some(Some(text)) = caps.get(ex.ordinal as usize) {
            bind_var(vars, &ex.name, ex.is_array, text);
        }
    }
}

/// Evaluate a regex clause. Cacheable clauses go through the shared cache;
/// clauses with runtime inserts splice the instance's current values
/// (regex-escaped) and compile per evaluation. An unbound insert variable
/// means the clause cannot match yet.
fn eval_regex(
    cache: &mut RegexCache,
    spec: &RegexSpec,
    extracts: &[RuntimeExtract],
    line: &LineRecord,
    vars: &mut VarTable,
    rule_name: &str,
) -> bool {
    if let Some(handle) = spec.handle {
        match cache.eval(handle, line.line_id, &line.text) {
            Some(caps) => {
                apply_extracts(vars, extracts, caps);
                true
            }
            None => false,
        }
    } else {
        let Some(final_text) = splice_inserts(spec, vars) else {
            return false;
        };
        let pattern = pattern_with_options(&final_text, &spec.options);
        match Regex::new(&pattern) {
            Ok(re) => match re.captures(&line.text) {
                Some(caps) => {
                    let set: CaptureSet = (0..caps.len())
                        .map(|g| caps.get(g).map(|m| m.as_str().to_string()))
                        .collect();
                    apply_extracts(vars, extracts, &set);
                    true
                }
                None => false,
            },
            Err(e) => {
                warn!(rule = %rule_name, pattern = %pattern, error = %e,
                      "spliced pattern failed to compile");
                false
            }
        }
    }
}

/// Splice runtime-insert placeholders with the instance's current values.
/// Values are regex-escaped so they can never shift capture ordinals.
fn splice_inserts(spec: &RegexSpec, vars: &VarTable) -> Option<String> {
    let mut text = spec.pattern.clone();
    for insert in spec.inserts.iter().rev() {
        let value = vars.get(&insert.name)?;
        let escaped = regex::escape(value.as_scalar());
        text.replace_range(insert.offset..insert.offset + insert.len, &escaped);
    }
    Some(text)
}
