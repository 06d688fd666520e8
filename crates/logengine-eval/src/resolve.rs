//! Macro and variable resolution for clause texts.
//!
//! One recursive expansion pass per clause, threading a pure accumulator
//! `(text, open_parens, inserts, extracts)`:
//!
//! - `$NAME` / `${NAME}` substitutes a macro or compile-time variable,
//!   recursively.
//! - `$$NAME(...)` / `@@NAME(...)` registers a runtime extract (scalar /
//!   array) bound to the capture-group ordinal `open_parens + 1`; the
//!   parenthesised sub-expression stays in the regex.
//! - A reference to a runtime variable inserts a placeholder and records a
//!   runtime-insert `(name, offset, len)` for per-instance splicing.
//! - Backslash parity escapes `$`, `@` and `(`; a lone `$` with no name
//!   after it stays literal (the trailing-anchor case).
//!
//! The ordinal invariant: a variable's ordinal equals the position of its
//! `(` counting every non-escaped, non-runtime-inserted `(` in the fully
//! resolved text. Runtime-inserted values are regex-escaped when spliced,
//! so they can never shift ordinals at evaluation time.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

// =============================================================================
// Variable definitions
// =============================================================================

/// How a rule variable gets its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarKind {
    /// Macro-like: substituted into clause text during resolution.
    CompileTime(String),
    /// Bound per instance at match time (declared `<RTVAR>` or via `$$`/`@@`).
    Runtime,
}

/// A variable owned by one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDef {
    pub kind: VarKind,
    pub is_array: bool,
}

/// A runtime extract: which capture group feeds which variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeExtract {
    pub name: String,
    pub ordinal: u32,
    pub is_array: bool,
}

/// A runtime insert: where in the resolved text a variable's current value
/// is spliced before per-instance compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeInsert {
    pub name: String,
    /// Byte offset of the placeholder in the resolved text.
    pub offset: usize,
    /// Byte length of the placeholder.
    pub len: usize,
}

/// The accumulator result of resolving one clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClause {
    pub text: String,
    pub open_parens: u32,
    pub inserts: Vec<RuntimeInsert>,
    pub extracts: Vec<RuntimeExtract>,
}

/// Errors during clause resolution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("undefined macro or variable '{0}'")]
    UndefinedName(String),

    #[error("circular reference through '{0}'")]
    Circular(String),

    #[error("unterminated '${{' reference")]
    Unterminated,

    #[error("'{0}' declares a runtime extract but is not followed by a capture group")]
    MissingCaptureGroup(String),

    #[error("variable '{0}' already has a compile-time value")]
    Collision(String),
}

// =============================================================================
// Resolution
// =============================================================================

struct Expansion<'a> {
    macros: &'a HashMap<String, String>,
    vars: &'a mut HashMap<String, VarDef>,
    out: String,
    parens: u32,
    inserts: Vec<RuntimeInsert>,
    extracts: Vec<RuntimeExtract>,
    stack: HashSet<String>,
}

/// Resolve a raw clause text against the macro table and the rule's
/// variable registry. Newly declared runtime extracts are registered into
/// `vars` so later clauses of the same rule can reference them.
pub fn resolve_clause(
    raw: &str,
    macros: &HashMap<String, String>,
    vars: &mut HashMap<String, VarDef>,
) -> Result<ResolvedClause, ResolveError> {
    let mut exp = Expansion {
        macros,
        vars,
        out: String::with_capacity(raw.len()),
        parens: 0,
        inserts: Vec::new(),
        extracts: Vec::new(),
        stack: HashSet::new(),
    };
    exp.expand(raw)?;
    Ok(ResolvedClause {
        text: exp.out,
        open_parens: exp.parens,
        inserts: exp.inserts,
        extracts: exp.extracts,
    })
}

/// What a `$NAME` reference resolved to.
enum Lookup {
    Text(String),
    Runtime,
}

impl Expansion<'_> {
    fn expand(&mut self, text: &str) -> Result<(), ResolveError> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut i = 0;

        while i < len {
            match chars[i] {
                '\\' => {
                    let start = i;
                    while i < len && chars[i] == '\\' {
                        i += 1;
                    }
                    let run = i - start;
                    for _ in 0..run {
                        self.out.push('\\');
                    }
                    // An odd run escapes a following '$', '@' or '(':
                    // it passes through literally and is not counted.
                    if run % 2 == 1 && i < len && matches!(chars[i], '$' | '@' | '(') {
                        self.out.push(chars[i]);
                        i += 1;
                    }
                }

                '(' => {
                    self.parens += 1;
                    self.out.push('(');
                    i += 1;
                }

                '$' if i + 1 < len && chars[i + 1] == '$' => {
                    i = self.extract_decl(&chars, i + 2, false)?;
                }

                '@' if i + 1 < len && chars[i + 1] == '@' => {
                    i = self.extract_decl(&chars, i + 2, true)?;
                }

                '$' if i + 1 < len && chars[i + 1] == '{' => {
                    let close = chars[i + 2..]
                        .iter()
                        .position(|&c| c == '}')
                        .ok_or(ResolveError::Unterminated)?;
                    let name: String = chars[i + 2..i + 2 + close].iter().collect();
                    i += 2 + close + 1;
                    self.substitute(&name)?;
                }

                '$' => {
                    let (name, next) = scan_name(&chars, i + 1);
                    if name.is_empty() {
                        // Trailing anchor, or a lone '$' mid-text: literal.
                        self.out.push('$');
                        i += 1;
                    } else {
                        i = next;
                        self.substitute(&name)?;
                    }
                }

                c => {
                    self.out.push(c);
                    i += 1;
                }
            }
        }
        Ok(())
    }

    /// Handle `$$NAME(` / `@@NAME(` starting at the name position; returns
    /// the index of the `(` so the main loop counts and emits it.
    fn extract_decl(
        &mut self,
        chars: &[char],
        name_start: usize,
        is_array: bool,
    ) -> Result<usize, ResolveError> {
        let (name, next) = scan_name(chars, name_start);
        if name.is_empty() {
            // "$$" / "@@" with no name: plain text.
            self.out.push(chars[name_start - 2]);
            self.out.push(chars[name_start - 1]);
            return Ok(name_start);
        }
        if next >= chars.len() || chars[next] != '(' {
            return Err(ResolveError::MissingCaptureGroup(name));
        }
        let upper = name.to_ascii_uppercase();
        match self.vars.get_mut(&upper) {
            Some(def) if matches!(def.kind, VarKind::CompileTime(_)) => {
                return Err(ResolveError::Collision(upper));
            }
            Some(def) => def.is_array = is_array,
            None => {
                self.vars.insert(
                    upper.clone(),
                    VarDef {
                        kind: VarKind::Runtime,
                        is_array,
                    },
                );
            }
        }
        self.extracts.push(RuntimeExtract {
            name: upper,
            ordinal: self.parens + 1,
            is_array,
        });
        Ok(next)
    }

    /// Substitute a `$NAME` / `${NAME}` reference.
    fn substitute(&mut self, name: &str) -> Result<(), ResolveError> {
        let upper = name.to_ascii_uppercase();

        let lookup = match self.vars.get(&upper) {
            Some(def) => match &def.kind {
                VarKind::CompileTime(v) => Some(Lookup::Text(v.clone())),
                VarKind::Runtime => Some(Lookup::Runtime),
            },
            None => self.macros.get(&upper).map(|m| Lookup::Text(m.clone())),
        };

        match lookup {
            Some(Lookup::Text(value)) => {
                if !self.stack.insert(upper.clone()) {
                    return Err(ResolveError::Circular(upper));
                }
                self.expand(&value)?;
                self.stack.remove(&upper);
                Ok(())
            }
            Some(Lookup::Runtime) => {
                self.inserts.push(RuntimeInsert {
                    name: upper.clone(),
                    offset: self.out.len(),
                    len: upper.len(),
                });
                self.out.push_str(&upper);
                Ok(())
            }
            None => Err(ResolveError::UndefinedName(upper)),
        }
    }
}

fn scan_name(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    let mut name = String::new();
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
        name.push(chars[i]);
        i += 1;
    }
    (name, i)
}
