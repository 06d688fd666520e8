//! Shared helpers for the eval integration tests.

#![allow(dead_code)]

use logengine_eval::{BuiltinHost, Engine, EngineConfig, EventKind, RuleEvent};
use logengine_parser::{load_script_str, ScriptSet};

/// Load a script from a string, failing the test on any load error.
pub fn load_set(script: &str) -> ScriptSet {
    let mut set = ScriptSet::new();
    load_script_str("test.rules", script, &mut set);
    assert!(set.errors.is_empty(), "load errors: {:?}", set.errors);
    set
}

/// Build an engine from a script and a prepared host.
pub fn engine_with_host(script: &str, host: BuiltinHost, fast: bool) -> Engine {
    let set = load_set(script);
    let mut engine = Engine::new(Box::new(host), EngineConfig { fast });
    let errors = engine.load(&set);
    assert!(errors.is_empty(), "compile errors: {errors:?}");
    engine
}

/// Build an engine with a plain `BuiltinHost`.
pub fn engine(script: &str, fast: bool) -> Engine {
    engine_with_host(script, BuiltinHost::new(), fast)
}

/// Feed lines through the engine (single logfile), collecting all events.
pub fn feed(engine: &mut Engine, lines: &[&str]) -> Vec<RuleEvent> {
    let mut events = Vec::new();
    for (i, text) in lines.iter().enumerate() {
        events.extend(engine.process_line("test.log", (i + 1) as u64, text));
    }
    events
}

/// Feed lines, then finish, returning everything.
pub fn run(engine: &mut Engine, lines: &[&str]) -> Vec<RuleEvent> {
    let mut events = feed(engine, lines);
    events.extend(engine.finish());
    events
}

/// Count events of one kind for one rule.
pub fn count(events: &[RuleEvent], rule: &str, kind: EventKind) -> usize {
    events
        .iter()
        .filter(|e| e.rule == rule && e.kind == kind)
        .count()
}

/// The ordered event kinds for one rule.
pub fn kinds_for(events: &[RuleEvent], rule: &str) -> Vec<EventKind> {
    events
        .iter()
        .filter(|e| e.rule == rule)
        .map(|e| e.kind)
        .collect()
}
