//! Compilation-error types for the eval crate.

use logengine_parser::SourceLocation;
use thiserror::Error;

/// Errors produced while compiling a loaded script set into runtime form.
///
/// Compilation accumulates these and keeps going so one pass reports every
/// problem; any error aborts before the run loop with script-error status.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A clause failed to resolve or its regex failed to compile.
    #[error("E: {loc}: {rule}: {clause}[{index}]: {message}")]
    Clause {
        loc: SourceLocation,
        rule: String,
        clause: String,
        index: usize,
        message: String,
    },

    /// A rule-level problem: duplicate action, variable collision,
    /// misplaced ACCUM.
    #[error("E: {loc}: {rule}: {message}")]
    Rule {
        loc: SourceLocation,
        rule: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, EvalError>;
