//! # logengine-parser
//!
//! Script loader and raw AST for the logengine log-analysis engine.
//!
//! Rule scripts are INI-like: `[SECTION]` headers open a macro table
//! (`DEFINE_MACRO`), code tables (`SHARED_CODE`, `TERMINATION_CODE`) or a
//! rule; every other line is an `lvalue=rvalue` entry. This crate turns one
//! or more scripts (following `INCLUDE`s) into a [`ScriptSet`]: macros,
//! code declarations and rules with their entries classified but *not yet
//! resolved* — macro expansion, capture-ordinal assignment and regex
//! compilation live in `logengine-eval`.
//!
//! ## Example
//!
//! ```rust
//! use logengine_parser::{load_script_str, ScriptSet};
//!
//! let mut set = ScriptSet::new();
//! load_script_str(
//!     "demo.rules",
//!     r#"
//! [DEFINE_MACRO]
//! IP=\d+\.\d+\.\d+\.\d+
//!
//! [CONNECTION]
//! BEGIN=connect from $IP
//! END=disconnect
//! "#,
//!     &mut set,
//! );
//! assert!(set.errors.is_empty());
//! assert_eq!(set.rules.len(), 1);
//! assert_eq!(set.rules[0].name, "CONNECTION");
//! ```

pub mod ast;
pub mod error;
pub mod loader;

pub use ast::{
    ActionKind, ClauseKind, CodeDecl, MacroDef, RawRule, RuleEntry, ScriptSet, SpannedEntry,
    TimeoutSpec, VarValue,
};
pub use error::{Result, ScriptError, SourceLocation};
pub use loader::{load_script_file, load_script_str};
