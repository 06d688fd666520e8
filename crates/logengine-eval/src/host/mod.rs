//! The action-host boundary.
//!
//! The engine never interprets user code itself; it hands action bodies and
//! code-clause bodies to an [`ActionHost`] for compilation, and invokes the
//! returned callables with a [`Binding`] (the instance's variables plus the
//! ambient line-number fields) and an [`EngineOps`] handle exposing the
//! engine builtins back into user code.
//!
//! Two compilation paths ship in [`BuiltinHost`]: a registry of named Rust
//! closures installed by embedders, and a small call-statement language
//! (`NAME(arg, ...)` sequences) that scripts can use to drive the builtins
//! without an embedded scripting runtime.

mod builtin;

pub use builtin::BuiltinHost;

use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;

// =============================================================================
// Values and variable tables
// =============================================================================

/// A runtime variable value: a scalar string or an ordered sequence.
///
/// Scalars are overwritten on each extract; lists append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

impl Value {
    /// The scalar view: a list reads as its most recent element.
    pub fn as_scalar(&self) -> &str {
        match self {
            Value::Scalar(s) => s,
            Value::List(items) => items.last().map(String::as_str).unwrap_or(""),
        }
    }

    /// The list view: a scalar reads as a one-element sequence.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Value::Scalar(s) => vec![s.clone()],
            Value::List(items) => items.clone(),
        }
    }

    /// Code-clause truthiness: empty, `0` and `false` are false.
    pub fn is_truthy(&self) -> bool {
        let s = self.as_scalar();
        !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
    }

    pub fn truthy(v: bool) -> Value {
        Value::Scalar(if v { "1" } else { "0" }.to_string())
    }
}

/// Per-instance variable table. Keys are upper-cased variable names; the
/// ordered map keeps binding iteration deterministic.
pub type VarTable = BTreeMap<String, Value>;

/// Append to a list variable or overwrite a scalar one.
pub fn bind_var(table: &mut VarTable, name: &str, is_array: bool, text: &str) {
    if is_array {
        match table.get_mut(name) {
            Some(Value::List(items)) => items.push(text.to_string()),
            _ => {
                table.insert(name.to_string(), Value::List(vec![text.to_string()]));
            }
        }
    } else {
        table.insert(name.to_string(), Value::Scalar(text.to_string()));
    }
}

// =============================================================================
// Binding
// =============================================================================

/// The locals supplied to an invoked callable: the owning instance's
/// variables plus the ambient line-number fields.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    pub vars: VarTable,
    pub linenumber_start: u64,
    pub linenumber_stop: u64,
    pub line_lastread: String,
}

impl Binding {
    /// `LINENUMBER_RANGE`: `start-stop`.
    pub fn linenumber_range(&self) -> String {
        format!("{}-{}", self.linenumber_start, self.linenumber_stop)
    }

    /// Resolve a (case-insensitive) name against the instance variables and
    /// the ambient fields.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let upper = name.to_ascii_uppercase();
        if let Some(v) = self.vars.get(&upper) {
            return Some(v.clone());
        }
        match upper.as_str() {
            "LINENUMBER_START" => Some(Value::Scalar(self.linenumber_start.to_string())),
            "LINENUMBER_STOP" => Some(Value::Scalar(self.linenumber_stop.to_string())),
            "LINENUMBER_RANGE" => Some(Value::Scalar(self.linenumber_range())),
            "LINE_LASTREAD" => Some(Value::Scalar(self.line_lastread.clone())),
            _ => None,
        }
    }
}

// =============================================================================
// Engine operations exposed to user code
// =============================================================================

/// Snapshot summary of a rule's previous (last completed) instance.
#[derive(Debug, Clone)]
pub struct PrevSummary {
    pub rule: String,
    pub startline: u64,
    pub stopline: u64,
}

/// The builtins the engine exposes back into user code.
///
/// Implemented by the matching runtime; an `EngineOps` handle is scoped to
/// one invocation and carries the controller (the rule whose code is
/// running) implicitly.
pub trait EngineOps {
    /// Ordered values of a `--user name=value` option; records the query.
    fn get_user_opt(&mut self, name: &str) -> Option<Value>;

    /// Destroy all live instances of the named rule (fires their DESTROY
    /// handlers at the next safe point in the current line).
    fn reset_rule_instances(&mut self, rule: &str);

    /// Whether the named rule has ever completed.
    fn has_rule_ever_matched(&self, rule: &str) -> bool;

    /// The previous-instance record of the named rule, if any.
    fn get_last_rule_inst(&self, rule: &str) -> Option<PrevSummary>;

    /// Scan `rules` for prerequisite candidates (§ cross-rule queries):
    /// a candidate passes iff it has a previous-instance record, its
    /// startline is after the controller's last previous startline, and it
    /// has not already armed the controller. The winner (largest stopline)
    /// is recorded as having armed the controller and returned.
    fn compare_rules(&mut self, rules: &[String]) -> Option<String>;

    /// Shallow-copy the named rule's previous-instance variables into the
    /// current instance. Returns `false` when the rule has no previous
    /// instance.
    fn import_inst_vars(&mut self, rule: &str) -> bool;

    /// `compare_rules` followed by `import_inst_vars` on the winner.
    fn compare_rules_and_import(&mut self, rules: &[String]) -> Option<String>;

    /// Ask the runtime to finish the current line and stop reading.
    fn processing_complete(&mut self);

    // -- Output helpers --

    fn write_to_buffer(&mut self, text: &str);
    fn clear_buffer(&mut self);
    fn write_buffer_to_stdout(&mut self);
    fn write_buffer_to_file(&mut self, path: &str);
    fn write_list_to_stdout(&mut self, items: &[String]);
    fn write_list_to_file(&mut self, path: &str, items: &[String]);
}

// =============================================================================
// The host trait
// =============================================================================

/// Errors surfaced by an action host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("compile error: {0}")]
    Compile(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("{0}: expected {1} argument(s)")]
    BadArity(String, usize),

    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// A compiled action body or code clause.
///
/// The engine is single-threaded by design, so callables are `Rc` and need
/// not be `Send`.
pub type Callable = Rc<dyn Fn(&Binding, &mut dyn EngineOps) -> HostResult<Value>>;

/// The interface the engine core expects from a user-code evaluator.
pub trait ActionHost {
    /// Compile a source body once; the callable is invoked many times.
    fn compile(&self, source: &str) -> HostResult<Callable>;

    /// Run a compiled callable with the given binding and engine handle.
    fn invoke(
        &self,
        callable: &Callable,
        binding: &Binding,
        ops: &mut dyn EngineOps,
    ) -> HostResult<Value>;

    /// Declare a host global from a `SHARED_CODE` / `TERMINATION_CODE`
    /// entry at load time.
    fn declare_global(&self, name: &str, initializer: &str) -> HostResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_scalar_views() {
        let v = Value::List(vec!["a".into(), "b".into()]);
        assert_eq!(v.as_scalar(), "b");
        assert_eq!(v.as_list(), vec!["a".to_string(), "b".to_string()]);
        let s = Value::Scalar("x".into());
        assert_eq!(s.as_list(), vec!["x".to_string()]);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Scalar("".into()).is_truthy());
        assert!(!Value::Scalar("0".into()).is_truthy());
        assert!(!Value::Scalar("false".into()).is_truthy());
        assert!(Value::Scalar("yes".into()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
    }

    #[test]
    fn test_bind_var_semantics() {
        let mut t = VarTable::new();
        bind_var(&mut t, "S", false, "one");
        bind_var(&mut t, "S", false, "two");
        assert_eq!(t.get("S"), Some(&Value::Scalar("two".into())));

        bind_var(&mut t, "A", true, "one");
        bind_var(&mut t, "A", true, "two");
        assert_eq!(
            t.get("A"),
            Some(&Value::List(vec!["one".into(), "two".into()]))
        );
    }

    #[test]
    fn test_binding_ambient_fields() {
        let b = Binding {
            vars: VarTable::new(),
            linenumber_start: 10,
            linenumber_stop: 14,
            line_lastread: "last".into(),
        };
        assert_eq!(b.lookup("linenumber_range").unwrap().as_scalar(), "10-14");
        assert_eq!(b.lookup("LINE_LASTREAD").unwrap().as_scalar(), "last");
        assert!(b.lookup("NOPE").is_none());
    }
}
