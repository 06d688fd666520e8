//! # logengine-eval
//!
//! Rule compiler, regex cache, action host and matching runtime for the
//! logengine log-analysis engine.
//!
//! This crate consumes the raw [`ScriptSet`](logengine_parser::ScriptSet)
//! produced by `logengine-parser` and turns it into a running engine:
//!
//! - **resolve** — macro/variable expansion with capture-ordinal
//!   accounting, runtime inserts and extracts
//! - **compiler** — clause resolution, positional-modifier threading,
//!   validation, action compilation
//! - **cache** — one precompiled matcher per distinct pattern, memoised per
//!   line
//! - **host** — the action-host seam and the default [`BuiltinHost`]
//! - **engine** — the per-line matching loop, candidate management,
//!   timeouts, cross-rule queries and the end-of-stream protocol
//!
//! ## Example
//!
//! ```rust
//! use logengine_parser::{load_script_str, ScriptSet};
//! use logengine_eval::{BuiltinHost, Engine, EngineConfig, EventKind};
//!
//! let mut set = ScriptSet::new();
//! load_script_str(
//!     "demo.rules",
//!     "[SESSION]\nBEGIN=login user $$USER(\\w+)\nEND=logout\n",
//!     &mut set,
//! );
//! assert!(set.errors.is_empty());
//!
//! let mut engine = Engine::new(Box::new(BuiltinHost::new()), EngineConfig::default());
//! assert!(engine.load(&set).is_empty());
//!
//! engine.process_line("demo.log", 1, "login user alice");
//! let events = engine.process_line("demo.log", 2, "logout");
//! assert!(events.iter().any(|e| e.kind == EventKind::Completed));
//! ```

pub mod buffer;
pub mod cache;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod host;
pub mod instance;
pub mod line;
pub mod resolve;
pub mod result;

pub use cache::{CacheHandle, CaptureSet, RegexCache};
pub use compiler::{
    compile_set, ClauseBody, CompileOutput, CompiledRule, MatchClause, OptionalClause,
    RuleSummary,
};
pub use engine::{Engine, EngineConfig};
pub use error::{EvalError, Result};
pub use host::{
    ActionHost, Binding, BuiltinHost, Callable, EngineOps, HostError, PrevSummary, Value,
    VarTable,
};
pub use instance::{InstanceState, PrevInstance, RuleInstance};
pub use line::LineRecord;
pub use resolve::{resolve_clause, ResolveError, ResolvedClause, RuntimeExtract, RuntimeInsert};
pub use result::{EventKind, RuleEvent};
