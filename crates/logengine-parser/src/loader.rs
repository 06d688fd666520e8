//! Script loader: INI-like rule scripts → [`ScriptSet`].
//!
//! Handles:
//! - Whole-line comments (`#`, `;`) and blank lines
//! - Trailing-backslash splicing, including comments inside a spliced block
//! - `[SECTION]` headers, with the special sections `DEFINE_MACRO`,
//!   `SHARED_CODE` and `TERMINATION_CODE`
//! - `INCLUDE=path` nesting, deduplicated by basename
//! - Classification of rule entries into typed [`RuleEntry`] values
//!
//! Errors accumulate in [`ScriptSet::errors`] and loading continues, so one
//! pass reports every problem it can find.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::ast::{
    ActionKind, ClauseKind, CodeDecl, MacroDef, RawRule, RuleEntry, ScriptSet, SpannedEntry,
    TimeoutSpec, VarValue,
};
use crate::error::{Result, ScriptError, SourceLocation};

// =============================================================================
// Public API
// =============================================================================

/// Load a script file (and anything it includes) into `set`.
///
/// A script whose basename was already processed is silently skipped. An
/// unreadable top-level script is a hard error; unreadable includes
/// accumulate in `set.errors` instead.
pub fn load_script_file(path: &Path, set: &mut ScriptSet) -> Result<()> {
    let basename = file_basename(path);
    if !set.mark_included(&basename) {
        return Ok(());
    }
    let text = fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_lines(&path.display().to_string(), path.parent(), &text, set);
    Ok(())
}

/// Load script text from memory (e.g. stdin) under the given display name.
pub fn load_script_str(name: &str, text: &str, set: &mut ScriptSet) {
    set.mark_included(name);
    load_lines(name, None, text, set);
}

fn file_basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// =============================================================================
// Logical line assembly
// =============================================================================

/// One logical line after comment stripping and splicing.
#[derive(Debug, PartialEq, Eq)]
struct LogicalLine {
    text: String,
    /// Physical line number of the first spliced piece.
    line: u32,
}

/// Number of backslashes at the end of `s`.
fn trailing_backslashes(s: &str) -> usize {
    s.chars().rev().take_while(|&c| c == '\\').count()
}

/// Whether a trimmed physical line requests splicing (odd trailing
/// backslashes; an even count is pairs of escaped backslashes).
fn wants_splice(s: &str) -> bool {
    trailing_backslashes(s) % 2 == 1
}

/// Assemble logical lines: trim each physical line, drop whole-line
/// comments, splice on a trailing `\`.
///
/// A comment inside a spliced block is dropped; the splice continues only
/// when the comment itself ends with `\`.
fn logical_lines(text: &str) -> Vec<LogicalLine> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut start_line = 0u32;
    let mut splicing = false;

    let flush = |buf: &mut String, start_line: u32, out: &mut Vec<LogicalLine>| {
        if !buf.is_empty() {
            out.push(LogicalLine {
                text: std::mem::take(buf),
                line: start_line,
            });
        }
    };

    for (idx, raw) in text.lines().enumerate() {
        let n = (idx + 1) as u32;
        let trimmed = raw.trim();
        let is_comment = trimmed.starts_with('#') || trimmed.starts_with(';');

        if is_comment {
            if splicing && !wants_splice(trimmed) {
                flush(&mut buf, start_line, &mut out);
                splicing = false;
            }
            continue;
        }

        if trimmed.is_empty() {
            if splicing {
                flush(&mut buf, start_line, &mut out);
                splicing = false;
            }
            continue;
        }

        if !splicing {
            start_line = n;
        }
        if wants_splice(trimmed) {
            buf.push_str(&trimmed[..trimmed.len() - 1]);
            splicing = true;
        } else {
            buf.push_str(trimmed);
            flush(&mut buf, start_line, &mut out);
            splicing = false;
        }
    }
    // Trailing backslash on the last line: emit what we have.
    flush(&mut buf, start_line, &mut out);
    out
}

// =============================================================================
// Section dispatch
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Section {
    None,
    Macros,
    SharedCode,
    TerminationCode,
    Rule(usize),
    /// A section whose header failed (duplicate rule, empty name); entries
    /// are swallowed so one bad header does not cascade.
    Discard,
}

fn load_lines(file: &str, dir: Option<&Path>, text: &str, set: &mut ScriptSet) {
    let mut section = Section::None;

    for logical in logical_lines(text) {
        let loc = SourceLocation::new(file, logical.line);
        let line = logical.text.as_str();

        // Section header
        if let Some(inner) = line.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            let name = inner.trim().to_ascii_uppercase();
            if name.is_empty() {
                set.errors.push(ScriptError::EmptySectionName(loc));
                section = Section::Discard;
                continue;
            }
            section = match name.as_str() {
                "DEFINE_MACRO" => Section::Macros,
                "SHARED_CODE" => Section::SharedCode,
                "TERMINATION_CODE" => Section::TerminationCode,
                _ => {
                    if set.rules.iter().any(|r| r.name == name) {
                        set.errors.push(ScriptError::DuplicateRule(loc, name));
                        Section::Discard
                    } else {
                        set.rules.push(RawRule {
                            name,
                            location: loc,
                            entries: Vec::new(),
                        });
                        Section::Rule(set.rules.len() - 1)
                    }
                }
            };
            continue;
        }

        // Everything else is lvalue=rvalue
        let Some((lhs, rhs)) = line.split_once('=') else {
            set.errors
                .push(ScriptError::MalformedLine(loc, line.to_string()));
            continue;
        };
        let lvalue = lhs.trim().to_ascii_uppercase();
        let rvalue = rhs.trim();

        // INCLUDE works from any section context.
        if lvalue == "INCLUDE" {
            load_include(rvalue, dir, loc, set);
            continue;
        }

        match section {
            Section::None => {
                set.errors
                    .push(ScriptError::EntryOutsideSection(loc, line.to_string()));
            }
            Section::Discard => {}
            Section::Macros => {
                if set.macros.contains_key(&lvalue) {
                    set.errors.push(ScriptError::DuplicateMacro(loc, lvalue));
                } else {
                    set.macros.insert(
                        lvalue.clone(),
                        MacroDef {
                            name: lvalue,
                            text: rvalue.to_string(),
                            location: loc,
                        },
                    );
                }
            }
            Section::SharedCode => set.shared_code.push(CodeDecl {
                name: lvalue,
                body: rvalue.to_string(),
                location: loc,
            }),
            Section::TerminationCode => set.termination_code.push(CodeDecl {
                name: lvalue,
                body: rvalue.to_string(),
                location: loc,
            }),
            Section::Rule(idx) => {
                match classify_entry(&lvalue, rvalue, &loc) {
                    Ok(entry) => set.rules[idx].entries.push(SpannedEntry {
                        entry,
                        line: logical.line,
                    }),
                    Err(e) => set.errors.push(e),
                }
            }
        }
    }
}

fn load_include(raw_path: &str, dir: Option<&Path>, loc: SourceLocation, set: &mut ScriptSet) {
    let mut path = PathBuf::from(raw_path);
    if path.is_relative() {
        if let Some(dir) = dir {
            path = dir.join(path);
        }
    }
    let basename = file_basename(&path);
    if !set.mark_included(&basename) {
        return; // silently skip re-includes
    }
    match fs::read_to_string(&path) {
        Ok(text) => load_lines(&path.display().to_string(), path.parent(), &text, set),
        Err(source) => set
            .errors
            .push(ScriptError::Include(loc, raw_path.to_string(), source)),
    }
}

// =============================================================================
// Entry classification
// =============================================================================

/// Split a clause lvalue like `BEGIN_MATCH_ACCUM` into its parts.
///
/// Accepted shapes: `KIND`, `KIND_MATCH`, with an optional trailing
/// `_ACCUM` or `_CODE`. Returns `None` when the lvalue is not a clause key
/// at all (and therefore declares a variable).
fn parse_clause_key(lvalue: &str) -> Option<(ClauseKind, bool, bool)> {
    let (kind, rest) = if let Some(rest) = lvalue.strip_prefix("PRE") {
        (ClauseKind::Pre, rest)
    } else if let Some(rest) = lvalue.strip_prefix("BEGIN") {
        (ClauseKind::Begin, rest)
    } else if let Some(rest) = lvalue.strip_prefix("END") {
        (ClauseKind::End, rest)
    } else {
        return None;
    };
    let rest = rest.strip_prefix("_MATCH").unwrap_or(rest);
    match rest {
        "" => Some((kind, false, false)),
        "_ACCUM" => Some((kind, true, false)),
        "_CODE" => Some((kind, false, true)),
        _ => None,
    }
}

fn parse_bool(s: &str) -> std::result::Result<bool, ()> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(()),
    }
}

fn classify_entry(
    lvalue: &str,
    rvalue: &str,
    loc: &SourceLocation,
) -> Result<RuleEntry> {
    // Clause keys first: they are the most common entries.
    if let Some((kind, accum, code)) = parse_clause_key(lvalue) {
        return Ok(RuleEntry::Clause {
            kind,
            accum,
            code,
            text: rvalue.to_string(),
        });
    }

    if lvalue == "OPTIONAL" || lvalue == "OPTIONAL_MATCH" {
        return Ok(RuleEntry::Optional {
            text: rvalue.to_string(),
        });
    }
    if lvalue == "OPTIONAL_CODE" || lvalue == "OPTIONAL_MATCH_CODE" {
        return Err(ScriptError::OptionalCode(loc.clone()));
    }

    if let Some(kind_str) = lvalue.strip_prefix("ACTION.") {
        let kind = ActionKind::from_str(kind_str)
            .map_err(|_| ScriptError::UnknownActionKind(loc.clone(), kind_str.to_string()))?;
        return Ok(RuleEntry::Action {
            kind,
            body: rvalue.to_string(),
        });
    }

    match lvalue {
        "ENABLED" => parse_bool(rvalue)
            .map(RuleEntry::Enabled)
            .map_err(|_| ScriptError::BadBool(loc.clone(), rvalue.to_string(), "ENABLED")),
        "TIMEOUT" | "RULE_TIMEOUT" => TimeoutSpec::parse(rvalue)
            .map(RuleEntry::RuleTimeout)
            .map_err(|_| ScriptError::BadTimeout(loc.clone(), rvalue.to_string())),
        "MATCH_TIMEOUT" => TimeoutSpec::parse(rvalue)
            .map(RuleEntry::MatchTimeout)
            .map_err(|_| ScriptError::BadTimeout(loc.clone(), rvalue.to_string())),
        "MATCH_NEXT_LINE" => parse_bool(rvalue)
            .map(RuleEntry::MatchNextLine)
            .map_err(|_| ScriptError::BadBool(loc.clone(), rvalue.to_string(), "MATCH_NEXT_LINE")),
        "REGEX_OPTIONS" => Ok(RuleEntry::RegexOptions(rvalue.to_string())),
        // Anything else declares a variable on the rule.
        _ => {
            let value = if rvalue.eq_ignore_ascii_case("<rtvar>") {
                VarValue::Runtime
            } else {
                VarValue::Text(rvalue.to_string())
            };
            Ok(RuleEntry::Variable {
                name: lvalue.to_string(),
                value,
            })
        }
    }
}
