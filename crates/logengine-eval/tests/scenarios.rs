//! End-to-end matching scenarios: one engine, scripted rules, a synthetic
//! line stream, assertions on the fired events and on state observed by
//! native actions.

mod helpers;

use std::cell::RefCell;
use std::rc::Rc;

use helpers::{count, engine, engine_with_host, feed, kinds_for, run};
use logengine_eval::{BuiltinHost, EventKind, HostError, Value};

// ---------------------------------------------------------------------------
// S1: counting a single regex
// ---------------------------------------------------------------------------

#[test]
fn s1_single_begin_counts_matches() {
    let counter = Rc::new(RefCell::new(0u32));
    let c = counter.clone();
    let mut host = BuiltinHost::new();
    host.register("bump_counter", move |_binding, _ops| {
        *c.borrow_mut() += 1;
        Ok(Value::truthy(true))
    });

    let mut eng = engine_with_host(
        "[HITS]\nBEGIN=ABR\nACTION.COMPLETE=bump_counter\n",
        host,
        true,
    );

    // 200 lines, 21 of which contain ABR.
    let mut lines: Vec<String> = (0..200).map(|i| format!("line {i} quiet")).collect();
    for i in 0..21 {
        lines[i * 9] = format!("line {} has ABR in it", i * 9);
    }
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let events = run(&mut eng, &refs);

    assert_eq!(count(&events, "HITS", EventKind::Completed), 21);
    assert_eq!(*counter.borrow(), 21);
    // Fast path: no instances, no CREATE/DESTROY.
    assert_eq!(count(&events, "HITS", EventKind::Created), 0);
    assert_eq!(count(&events, "HITS", EventKind::Destroyed), 0);
}

// ---------------------------------------------------------------------------
// S2: two non-consecutive lines with a next-line window
// ---------------------------------------------------------------------------

#[test]
fn s2_pair_rule_with_match_timeout_one() {
    let script = "\
[ANY_ABR]
BEGIN=ABR
[PAIR]
BEGIN=ABR
MATCH_TIMEOUT=1
END=strict
";
    let mut eng = engine(script, true);
    let events = run(
        &mut eng,
        &[
            "ABR",        // 1: pair candidate
            "strict",     // 2: completes pair 1
            "noise",      // 3
            "ABR",        // 4: candidate
            "noise",      // 5: window missed, match-timeout
            "strict",     // 6: nothing live
            "ABR",        // 7: candidate
            "ABR",        // 8: 7 times out, new candidate
            "strict",     // 9: completes pair 2
        ],
    );

    assert_eq!(count(&events, "ANY_ABR", EventKind::Completed), 4);
    assert_eq!(count(&events, "PAIR", EventKind::Completed), 2);
    assert_eq!(count(&events, "PAIR", EventKind::MatchTimedOut), 2);
}

// ---------------------------------------------------------------------------
// S3: accumulation with an array extract
// ---------------------------------------------------------------------------

#[test]
fn s3_accum_collects_array_values() {
    let seen = Rc::new(RefCell::new(Vec::<String>::new()));
    let s = seen.clone();
    let mut host = BuiltinHost::new();
    host.register("grab_vals", move |binding, _ops| {
        let val = binding
            .lookup("VAL")
            .ok_or_else(|| HostError::Runtime("VAL not bound".into()))?;
        *s.borrow_mut() = val.as_list();
        Ok(Value::truthy(true))
    });

    let script = "\
[COLLECT]
BEGIN=^A
BEGIN_ACCUM=^X @@VAL(\\S+)
END=^Z
ACTION.COMPLETE=grab_vals
";
    let mut eng = engine_with_host(script, host, false);
    let events = run(&mut eng, &["A", "X 1", "X 2", "X 3", "Z"]);

    assert_eq!(count(&events, "COLLECT", EventKind::Completed), 1);
    assert_eq!(*seen.borrow(), vec!["1", "2", "3"]);
}

#[test]
fn accum_matches_zero_lines() {
    // The accumulating clause is optional in count: A directly followed by
    // Z still completes.
    let script = "[COLLECT]\nBEGIN=^A\nBEGIN_ACCUM=^X\nEND=^Z\n";
    let mut eng = engine(script, false);
    let events = run(&mut eng, &["A", "Z"]);
    assert_eq!(count(&events, "COLLECT", EventKind::Completed), 1);
}

// ---------------------------------------------------------------------------
// S4: preconditions and candidate merging
// ---------------------------------------------------------------------------

#[test]
fn s4_pre_candidates_merge_instead_of_duplicating() {
    let script = "[GREET]\nPRE=^T\\d+\nBEGIN=HELLO\n";
    let mut eng = engine(script, false);
    let events = run(&mut eng, &["T1", "T2", "T2 HELLO"]);

    assert_eq!(count(&events, "GREET", EventKind::Created), 1);
    assert_eq!(count(&events, "GREET", EventKind::Completed), 1);
    // Every T-line re-armed the candidate: the completed instance started
    // on the third line.
    let completed = events
        .iter()
        .find(|e| e.kind == EventKind::Completed)
        .unwrap();
    assert_eq!(completed.startline, 3);
}

#[test]
fn merged_candidate_reextracts_variables() {
    let grabbed = Rc::new(RefCell::new(String::new()));
    let g = grabbed.clone();
    let mut host = BuiltinHost::new();
    host.register("grab_n", move |binding, _ops| {
        *g.borrow_mut() = binding.lookup("N").map(|v| v.as_scalar().to_string()).unwrap_or_default();
        Ok(Value::truthy(true))
    });

    // Re-arming clears the extract table to the latest PRE's captures.
    let script = "[GREET]\nPRE=^T$$N(\\d+)\nBEGIN=HELLO\nACTION.COMPLETE=grab_n\n";
    let mut eng = engine_with_host(script, host, false);
    run(&mut eng, &["T1", "T7 HELLO"]);
    assert_eq!(*grabbed.borrow(), "7");
}

// ---------------------------------------------------------------------------
// S5: rule-level timeout
// ---------------------------------------------------------------------------

#[test]
fn s5_rule_timeout_fires_once_at_the_right_line() {
    let script = "[WAIT]\nRULE_TIMEOUT=5\nBEGIN=^go$\nEND=^never$\n";
    let mut eng = engine(script, false);

    let mut lines = vec!["go"];
    lines.extend(std::iter::repeat("filler").take(19));
    let events = feed(&mut eng, &lines);

    let kinds = kinds_for(&events, "WAIT");
    assert_eq!(
        kinds,
        [
            EventKind::Created,
            EventKind::TimedOut,
            EventKind::Incomplete,
            EventKind::Destroyed
        ]
    );
    // BEGIN matched line 1; five quiet lines elapse at line 6.
    let timeout = events.iter().find(|e| e.kind == EventKind::TimedOut).unwrap();
    assert_eq!(timeout.line_id, 6);
}

#[test]
fn awaiting_pre_timeout_skips_incomplete() {
    let script = "[ARMED]\nRULE_TIMEOUT=2\nPRE=^T\nBEGIN=^H\n";
    let mut eng = engine(script, false);
    let events = feed(&mut eng, &["T", "x", "y"]);
    // A candidate still waiting on its begin times out without INCOMPLETE:
    // the prior clause is a precondition.
    assert_eq!(
        kinds_for(&events, "ARMED"),
        [EventKind::Created, EventKind::TimedOut, EventKind::Destroyed]
    );
}

// ---------------------------------------------------------------------------
// S6: cross-rule compare and import
// ---------------------------------------------------------------------------

#[test]
fn s6_compare_rules_imports_from_latest_winner() {
    let captured = Rc::new(RefCell::new(Vec::<String>::new()));
    let c = captured.clone();
    let mut host = BuiltinHost::new();
    host.register("grab_ts", move |binding, _ops| {
        let ts = binding
            .lookup("TS")
            .ok_or_else(|| HostError::Runtime("TS not imported".into()))?;
        c.borrow_mut().push(ts.as_scalar().to_string());
        Ok(Value::truthy(true))
    });

    let script = "\
[A]
BEGIN=alpha at $$TS(\\d+)
[B]
BEGIN=beta at $$TS(\\d+)
[C]
TS=<RTVAR>
BEGIN_CODE=LOGENGINE_COMPARE_RULES_AND_IMPORT('A', 'B')
ACTION.COMPLETE=grab_ts
";
    let mut eng = engine_with_host(script, host, true);
    let events = feed(
        &mut eng,
        &["alpha at 111", "beta at 222", "quiet", "quiet"],
    );

    // C's COMPLETE sees the TS captured by the rule with the largest
    // stopline at the moment it armed; after both prerequisites are spent
    // no further completion fires.
    assert_eq!(captured.borrow().last().map(String::as_str), Some("222"));
    let c_completions = count(&events, "C", EventKind::Completed);
    assert_eq!(c_completions, captured.borrow().len());
    // The same prerequisite never re-arms the controller.
    assert!(c_completions <= 2);
}

#[test]
fn compare_rules_requires_candidates_after_controllers_last_start() {
    // B completes before the controller's own previous instance starts, so
    // a second comparison finds nothing.
    let script = "\
[SRC]
BEGIN=tick $$TS(\\d+)
[CTRL]
TS=<RTVAR>
BEGIN_CODE=LOGENGINE_COMPARE_RULES_AND_IMPORT('SRC')
";
    let mut eng = engine(script, true);
    let events = feed(&mut eng, &["tick 1", "quiet", "quiet"]);
    // One arming from the line-1 tick; the spent prerequisite cannot
    // re-arm CTRL on the following lines.
    assert_eq!(count(&events, "CTRL", EventKind::Completed), 1);
}

// ---------------------------------------------------------------------------
// OPTIONAL clauses
// ---------------------------------------------------------------------------

#[test]
fn optional_match_holds_rule_timeout_open_and_extracts() {
    let grabbed = Rc::new(RefCell::new(String::new()));
    let g = grabbed.clone();
    let mut host = BuiltinHost::new();
    host.register("grab_k", move |binding, _ops| {
        *g.borrow_mut() = binding.lookup("K").map(|v| v.as_scalar().to_string()).unwrap_or_default();
        Ok(Value::truthy(true))
    });

    let script = "\
[HELD]
RULE_TIMEOUT=2
BEGIN=^A
END=^Z
OPTIONAL=^keep $$K(\\w+)
ACTION.COMPLETE=grab_k
";
    let mut eng = engine_with_host(script, host, false);
    // Without the optional matches at lines 2 and 3, the rule would time
    // out before Z arrives.
    let events = run(&mut eng, &["A", "keep a", "keep b", "Z"]);
    assert_eq!(count(&events, "HELD", EventKind::Completed), 1);
    assert_eq!(count(&events, "HELD", EventKind::TimedOut), 0);
    assert_eq!(*grabbed.borrow(), "b");
}

#[test]
fn optional_never_advances_the_index() {
    let script = "[HELD]\nBEGIN=^A\nEND=^Z\nOPTIONAL=^keep\n";
    let mut eng = engine(script, false);
    let events = run(&mut eng, &["A", "keep", "keep", "Z"]);
    // Exactly one completion, at the Z line.
    assert_eq!(count(&events, "HELD", EventKind::Completed), 1);
    let done = events.iter().find(|e| e.kind == EventKind::Completed).unwrap();
    assert_eq!(done.line_id, 4);
}

// ---------------------------------------------------------------------------
// Lifecycle bookkeeping
// ---------------------------------------------------------------------------

#[test]
fn destroy_fires_exactly_once_per_instance() {
    // Mixed terminations: completion, match-timeout, rule-timeout, EOF.
    let script = "\
[DONE]
BEGIN=^a
END=^b
[MT]
BEGIN=^a
MATCH_TIMEOUT=1
END=^never
[RT]
RULE_TIMEOUT=2
BEGIN=^a
END=^never
[EOF_RULE]
BEGIN=^c
END=^never
";
    let mut eng = engine(script, false);
    let events = run(&mut eng, &["a", "b", "x", "c", "x", "x", "x"]);

    for rule in ["DONE", "MT", "RT", "EOF_RULE"] {
        let created = count(&events, rule, EventKind::Created);
        let destroyed = count(&events, rule, EventKind::Destroyed);
        assert_eq!(created, destroyed, "rule {rule}: create/destroy mismatch");
        assert!(created >= 1, "rule {rule} never created");
    }
    assert_eq!(eng.live_instance_count(), 0);
}

#[test]
fn eos_incomplete_and_missing() {
    let script = "\
[OPEN]
BEGIN=^A
END=^Z
[NEVER]
BEGIN=^ghost
";
    let mut eng = engine(script, false);
    feed(&mut eng, &["A"]);
    let events = eng.finish();

    // OPEN never completed, so after its instance is wound down the rule
    // itself is also reported missing.
    assert_eq!(
        kinds_for(&events, "OPEN"),
        [EventKind::Incomplete, EventKind::Destroyed, EventKind::Missing]
    );
    assert_eq!(kinds_for(&events, "NEVER"), [EventKind::Missing]);
    assert_eq!(eng.live_instance_count(), 0);
}

#[test]
fn eos_completes_instance_already_past_last_clause() {
    // A single-clause rule armed on the final line completes at EOF
    // rather than reporting INCOMPLETE.
    let script = "[LAST]\nBEGIN=^bang\n";
    let mut eng = engine(script, false);
    let events = run(&mut eng, &["bang"]);
    assert_eq!(
        kinds_for(&events, "LAST"),
        [EventKind::Created, EventKind::Completed, EventKind::Destroyed]
    );
}

#[test]
fn reset_rule_instances_destroys_live_candidates() {
    let script = "\
[WATCH]
BEGIN=^A
END=^Z
[KILL]
BEGIN=^kill
ACTION.COMPLETE=LOGENGINE_RESET_RULE_INSTANCES('WATCH')
";
    let mut eng = engine(script, true);
    let events = feed(&mut eng, &["A", "kill"]);
    assert_eq!(
        kinds_for(&events, "WATCH"),
        [EventKind::Created, EventKind::Destroyed]
    );
    assert_eq!(eng.live_instance_count(), 0);
}

#[test]
fn processing_complete_requests_stop() {
    let script = "[STOP]\nBEGIN=^halt\nACTION.COMPLETE=LOGENGINE_PROCESSING_COMPLETE()\n";
    let mut eng = engine(script, true);
    feed(&mut eng, &["quiet"]);
    assert!(!eng.stop_requested());
    feed(&mut eng, &["halt please"]);
    assert!(eng.stop_requested());
}

// ---------------------------------------------------------------------------
// Runtime inserts across clauses
// ---------------------------------------------------------------------------

#[test]
fn runtime_insert_matches_only_the_captured_value() {
    // END references the host captured by BEGIN; only the same host's
    // disconnect line completes the pair.
    let script = "[SESSION]\nBEGIN=connect $$HOST(\\S+)\nEND=disconnect $HOST\n";
    let mut eng = engine(script, false);
    let events = run(
        &mut eng,
        &[
            "connect web1",
            "disconnect web2",
            "disconnect web1",
        ],
    );
    assert_eq!(count(&events, "SESSION", EventKind::Completed), 1);
    let done = events.iter().find(|e| e.kind == EventKind::Completed).unwrap();
    assert_eq!(done.line_id, 3);
}

// ---------------------------------------------------------------------------
// Buffer and user options through script actions
// ---------------------------------------------------------------------------

#[test]
fn script_actions_write_to_the_buffer() {
    let script = "\
[NOTE]
BEGIN=^note
ACTION.COMPLETE=WRITE_TO_BUFFER(LINENUMBER_RANGE); WRITE_TO_BUFFER(' '); WRITE_TO_BUFFER(LINE_LASTREAD)
";
    let mut eng = engine(script, true);
    feed(&mut eng, &["note one"]);
    assert_eq!(eng.buffer_contents(), "1-1 note one");
}

#[test]
fn user_opts_are_tracked_when_queried() {
    let script = "\
[OPTED]
BEGIN=^go
ACTION.COMPLETE=LOGENGINE_GET_USER_OPT('NODE')
";
    let mut eng = engine(script, true);
    eng.set_user_opt("node", "web1");
    eng.set_user_opt("unused", "x");
    feed(&mut eng, &["go"]);
    assert_eq!(eng.unqueried_user_opts(), ["UNUSED"]);
}
