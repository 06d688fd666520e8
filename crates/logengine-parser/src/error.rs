use std::fmt;

use thiserror::Error;

/// Source location within a rule script.
///
/// Attached to load errors so every diagnostic can point at the file and
/// logical line that produced it. Lines are 1-indexed; a spliced logical
/// line reports the number of its first physical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        SourceLocation {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Errors that can occur while loading rule scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot open script '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}: cannot open include '{1}': {2}")]
    Include(SourceLocation, String, #[source] std::io::Error),

    #[error("{0}: empty section name")]
    EmptySectionName(SourceLocation),

    #[error("{0}: malformed line (expected 'lvalue=rvalue'): {1}")]
    MalformedLine(SourceLocation, String),

    #[error("{0}: entry outside any section: {1}")]
    EntryOutsideSection(SourceLocation, String),

    #[error("{0}: duplicate rule '{1}'")]
    DuplicateRule(SourceLocation, String),

    #[error("{0}: duplicate macro '{1}'")]
    DuplicateMacro(SourceLocation, String),

    #[error("{0}: unknown action kind '{1}'")]
    UnknownActionKind(SourceLocation, String),

    #[error("{0}: OPTIONAL clauses cannot be code clauses")]
    OptionalCode(SourceLocation),

    #[error("{0}: bad boolean value '{1}' for {2}")]
    BadBool(SourceLocation, String, &'static str),

    #[error("{0}: bad timeout value '{1}' (expected a line count or DEFAULT)")]
    BadTimeout(SourceLocation, String),
}

impl ScriptError {
    /// The location this error points at, when it carries one.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            ScriptError::Io { .. } => None,
            ScriptError::Include(loc, _, _)
            | ScriptError::EmptySectionName(loc)
            | ScriptError::MalformedLine(loc, _)
            | ScriptError::EntryOutsideSection(loc, _)
            | ScriptError::DuplicateRule(loc, _)
            | ScriptError::DuplicateMacro(loc, _)
            | ScriptError::UnknownActionKind(loc, _)
            | ScriptError::OptionalCode(loc)
            | ScriptError::BadBool(loc, _, _)
            | ScriptError::BadTimeout(loc, _) => Some(loc),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;
