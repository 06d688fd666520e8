//! The default action host.
//!
//! `BuiltinHost` compiles two kinds of sources:
//!
//! 1. **Registered natives** — Rust closures installed with
//!    [`BuiltinHost::register`]; a source that exactly matches a registered
//!    name compiles to that closure. This is the embedder/test path.
//! 2. **Call programs** — semicolon-separated `NAME(arg, ...)` statements
//!    over string literals, numbers and variable references, dispatching to
//!    the engine builtins (`LOGENGINE_*`, the buffer helpers) and host
//!    globals. This is what rule scripts use directly.
//!
//! The value of a program is the value of its last statement; a code clause
//! treats that value's truthiness as the match result.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{ActionHost, Binding, Callable, EngineOps, HostError, HostResult, Value};

// =============================================================================
// Program AST
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Str(String),
    Ident(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Call {
    name: String,
    args: Vec<Expr>,
}

// =============================================================================
// Parsing
// =============================================================================

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Scanner {
            chars: src.chars().peekable(),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn ident(&mut self) -> String {
        let mut out = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_' || *c == '.')
        {
            out.push(self.chars.next().unwrap());
        }
        out
    }

    fn string(&mut self, quote: char) -> HostResult<String> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(HostError::Compile("unterminated string literal".into())),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(HostError::Compile("unterminated string literal".into())),
                },
                Some(c) => out.push(c),
            }
        }
    }
}

fn parse_program(src: &str) -> HostResult<Vec<Call>> {
    let mut scanner = Scanner::new(src);
    let mut calls = Vec::new();

    loop {
        scanner.skip_ws();
        match scanner.chars.peek() {
            None => break,
            Some(&';') => {
                scanner.chars.next();
                continue;
            }
            Some(c) if c.is_alphabetic() || *c == '_' => {}
            Some(c) => {
                return Err(HostError::Compile(format!("unexpected character '{c}'")));
            }
        }

        let name = scanner.ident().to_ascii_uppercase();
        scanner.skip_ws();
        if scanner.chars.next() != Some('(') {
            return Err(HostError::Compile(format!("expected '(' after '{name}'")));
        }

        let mut args = Vec::new();
        scanner.skip_ws();
        if scanner.chars.peek() == Some(&')') {
            scanner.chars.next();
        } else {
            loop {
                scanner.skip_ws();
                let arg = match scanner.chars.peek() {
                    Some(&q) if q == '\'' || q == '"' => {
                        scanner.chars.next();
                        Expr::Str(scanner.string(q)?)
                    }
                    Some(c) if c.is_ascii_digit() || *c == '-' => {
                        let mut num = String::new();
                        num.push(scanner.chars.next().unwrap());
                        while matches!(scanner.chars.peek(), Some(c) if c.is_ascii_digit()) {
                            num.push(scanner.chars.next().unwrap());
                        }
                        Expr::Str(num)
                    }
                    Some(c) if c.is_alphabetic() || *c == '_' => Expr::Ident(scanner.ident()),
                    other => {
                        return Err(HostError::Compile(format!(
                            "bad argument in call to '{name}': {other:?}"
                        )));
                    }
                };
                args.push(arg);
                scanner.skip_ws();
                match scanner.chars.next() {
                    Some(',') => continue,
                    Some(')') => break,
                    _ => {
                        return Err(HostError::Compile(format!(
                            "expected ',' or ')' in call to '{name}'"
                        )));
                    }
                }
            }
        }

        calls.push(Call { name, args });
    }

    if calls.is_empty() {
        return Err(HostError::Compile("empty action body".into()));
    }
    Ok(calls)
}

// =============================================================================
// BuiltinHost
// =============================================================================

type NativeFn = Rc<dyn Fn(&Binding, &mut dyn EngineOps) -> HostResult<Value>>;
type Globals = Rc<RefCell<HashMap<String, Value>>>;

/// The default [`ActionHost`]: registered natives plus the call-statement
/// language.
#[derive(Default)]
pub struct BuiltinHost {
    natives: HashMap<String, NativeFn>,
    globals: Globals,
}

impl BuiltinHost {
    pub fn new() -> Self {
        BuiltinHost::default()
    }

    /// Install a native action under a name; a source body that exactly
    /// matches the name (after trimming) compiles to this closure.
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&Binding, &mut dyn EngineOps) -> HostResult<Value> + 'static,
    {
        self.natives.insert(name.trim().to_string(), Rc::new(f));
    }

    /// Read a host global (declared via `SHARED_CODE` or written by `SET`).
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(&name.to_ascii_uppercase()).cloned()
    }
}

impl ActionHost for BuiltinHost {
    fn compile(&self, source: &str) -> HostResult<Callable> {
        let trimmed = source.trim();
        if let Some(native) = self.natives.get(trimmed) {
            let native = native.clone();
            return Ok(Rc::new(move |binding, ops| native(binding, ops)));
        }

        let program = parse_program(trimmed)?;
        let globals = self.globals.clone();
        Ok(Rc::new(move |binding, ops| {
            run_program(&program, &globals, binding, ops)
        }))
    }

    fn invoke(
        &self,
        callable: &Callable,
        binding: &Binding,
        ops: &mut dyn EngineOps,
    ) -> HostResult<Value> {
        callable(binding, ops)
    }

    fn declare_global(&self, name: &str, initializer: &str) -> HostResult<()> {
        self.globals.borrow_mut().insert(
            name.to_ascii_uppercase(),
            Value::Scalar(initializer.to_string()),
        );
        Ok(())
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn eval_expr(
    expr: &Expr,
    globals: &Globals,
    binding: &Binding,
) -> HostResult<Value> {
    match expr {
        Expr::Str(s) => Ok(Value::Scalar(s.clone())),
        Expr::Ident(name) => {
            if let Some(v) = binding.lookup(name) {
                return Ok(v);
            }
            if let Some(v) = globals.borrow().get(&name.to_ascii_uppercase()) {
                return Ok(v.clone());
            }
            Err(HostError::UnknownVariable(name.clone()))
        }
    }
}

fn run_program(
    program: &[Call],
    globals: &Globals,
    binding: &Binding,
    ops: &mut dyn EngineOps,
) -> HostResult<Value> {
    let mut last = Value::Scalar(String::new());
    for call in program {
        last = run_call(call, globals, binding, ops)?;
    }
    Ok(last)
}

fn arg_name(expr: &Expr) -> String {
    match expr {
        Expr::Str(s) | Expr::Ident(s) => s.to_ascii_uppercase(),
    }
}

fn run_call(
    call: &Call,
    globals: &Globals,
    binding: &Binding,
    ops: &mut dyn EngineOps,
) -> HostResult<Value> {
    let need = |n: usize| -> HostResult<()> {
        if call.args.len() == n {
            Ok(())
        } else {
            Err(HostError::BadArity(call.name.clone(), n))
        }
    };

    // SET names its target; the first argument is not evaluated.
    if call.name == "SET" {
        need(2)?;
        let value = eval_expr(&call.args[1], globals, binding)?;
        globals
            .borrow_mut()
            .insert(arg_name(&call.args[0]), value.clone());
        return Ok(value);
    }

    let args: Vec<Value> = call
        .args
        .iter()
        .map(|a| eval_expr(a, globals, binding))
        .collect::<HostResult<_>>()?;
    let scalar = |i: usize| args[i].as_scalar().to_string();
    let rule_list = || -> Vec<String> { args.iter().map(|a| a.as_scalar().to_string()).collect() };

    match call.name.as_str() {
        "NOOP" => Ok(Value::truthy(true)),

        "LOGENGINE_GET_USER_OPT" => {
            need(1)?;
            Ok(ops
                .get_user_opt(&scalar(0))
                .unwrap_or(Value::Scalar(String::new())))
        }
        "LOGENGINE_RESET_RULE_INSTANCES" => {
            need(1)?;
            ops.reset_rule_instances(&scalar(0));
            Ok(Value::truthy(true))
        }
        "LOGENGINE_HAS_RULE_EVER_MATCHED" => {
            need(1)?;
            Ok(Value::truthy(ops.has_rule_ever_matched(&scalar(0))))
        }
        "LOGENGINE_GET_LAST_RULE_INST" => {
            need(1)?;
            Ok(match ops.get_last_rule_inst(&scalar(0)) {
                Some(prev) => Value::List(vec![
                    prev.startline.to_string(),
                    prev.stopline.to_string(),
                ]),
                None => Value::Scalar(String::new()),
            })
        }
        "LOGENGINE_COMPARE_RULES" => Ok(Value::Scalar(
            ops.compare_rules(&rule_list()).unwrap_or_default(),
        )),
        "LOGENGINE_IMPORT_INST_VARS" => {
            need(1)?;
            Ok(Value::truthy(ops.import_inst_vars(&scalar(0))))
        }
        "LOGENGINE_COMPARE_RULES_AND_IMPORT" => Ok(Value::Scalar(
            ops.compare_rules_and_import(&rule_list()).unwrap_or_default(),
        )),
        "LOGENGINE_PROCESSING_COMPLETE" => {
            ops.processing_complete();
            Ok(Value::truthy(true))
        }

        "WRITE_TO_BUFFER" => {
            for a in &args {
                ops.write_to_buffer(a.as_scalar());
            }
            Ok(Value::truthy(true))
        }
        "CLEAR_BUFFER" => {
            ops.clear_buffer();
            Ok(Value::truthy(true))
        }
        "WRITE_BUFFER_TO_STDOUT" => {
            ops.write_buffer_to_stdout();
            Ok(Value::truthy(true))
        }
        "WRITE_BUFFER_TO_FILES" => {
            need(1)?;
            ops.write_buffer_to_file(&scalar(0));
            Ok(Value::truthy(true))
        }
        "WRITE_LIST_TO_STDOUT" => {
            need(1)?;
            ops.write_list_to_stdout(&args[0].as_list());
            Ok(Value::truthy(true))
        }
        "WRITE_LIST_TO_FILES" => {
            need(2)?;
            ops.write_list_to_file(&scalar(0), &args[1].as_list());
            Ok(Value::truthy(true))
        }
        "XLAT_AR_TO_STRING" => {
            if call.args.is_empty() || call.args.len() > 2 {
                return Err(HostError::BadArity(call.name.clone(), 1));
            }
            let sep = if call.args.len() == 2 {
                scalar(1)
            } else {
                " ".to_string()
            };
            Ok(Value::Scalar(args[0].as_list().join(&sep)))
        }

        other => Err(HostError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{PrevSummary, VarTable};
    use super::*;

    /// Minimal EngineOps for host-level tests.
    #[derive(Default)]
    struct MockOps {
        buffer: String,
        stopped: bool,
        resets: Vec<String>,
    }

    impl EngineOps for MockOps {
        fn get_user_opt(&mut self, name: &str) -> Option<Value> {
            (name == "NODE").then(|| Value::Scalar("web1".into()))
        }
        fn reset_rule_instances(&mut self, rule: &str) {
            self.resets.push(rule.to_string());
        }
        fn has_rule_ever_matched(&self, rule: &str) -> bool {
            rule == "SEEN"
        }
        fn get_last_rule_inst(&self, rule: &str) -> Option<PrevSummary> {
            (rule == "SEEN").then(|| PrevSummary {
                rule: "SEEN".into(),
                startline: 3,
                stopline: 9,
            })
        }
        fn compare_rules(&mut self, rules: &[String]) -> Option<String> {
            rules.first().cloned()
        }
        fn import_inst_vars(&mut self, _rule: &str) -> bool {
            true
        }
        fn compare_rules_and_import(&mut self, rules: &[String]) -> Option<String> {
            self.compare_rules(rules)
        }
        fn processing_complete(&mut self) {
            self.stopped = true;
        }
        fn write_to_buffer(&mut self, text: &str) {
            self.buffer.push_str(text);
        }
        fn clear_buffer(&mut self) {
            self.buffer.clear();
        }
        fn write_buffer_to_stdout(&mut self) {}
        fn write_buffer_to_file(&mut self, _path: &str) {}
        fn write_list_to_stdout(&mut self, _items: &[String]) {}
        fn write_list_to_file(&mut self, _path: &str, _items: &[String]) {}
    }

    fn run(host: &BuiltinHost, src: &str, binding: &Binding, ops: &mut MockOps) -> Value {
        let c = host.compile(src).unwrap();
        host.invoke(&c, binding, ops).unwrap()
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_program(""), Err(HostError::Compile(_))));
        assert!(matches!(parse_program("NOOP"), Err(HostError::Compile(_))));
        assert!(matches!(
            parse_program("NOOP(')"),
            Err(HostError::Compile(_))
        ));
        assert!(matches!(parse_program("42()"), Err(HostError::Compile(_))));
    }

    #[test]
    fn test_statement_sequence_returns_last_value() {
        let host = BuiltinHost::new();
        let mut ops = MockOps::default();
        let v = run(
            &host,
            "WRITE_TO_BUFFER('a'); LOGENGINE_HAS_RULE_EVER_MATCHED('SEEN')",
            &Binding::default(),
            &mut ops,
        );
        assert!(v.is_truthy());
        assert_eq!(ops.buffer, "a");
    }

    #[test]
    fn test_variable_reference_resolves_binding_then_globals() {
        let host = BuiltinHost::new();
        host.declare_global("WHO", "global").unwrap();
        let mut vars = VarTable::new();
        vars.insert("WHO".into(), Value::Scalar("local".into()));
        let binding = Binding {
            vars,
            ..Binding::default()
        };
        let mut ops = MockOps::default();
        run(&host, "WRITE_TO_BUFFER(WHO)", &binding, &mut ops);
        assert_eq!(ops.buffer, "local");

        let mut ops = MockOps::default();
        run(&host, "WRITE_TO_BUFFER(who)", &Binding::default(), &mut ops);
        assert_eq!(ops.buffer, "global");
    }

    #[test]
    fn test_unknown_variable_is_runtime_error() {
        let host = BuiltinHost::new();
        let c = host.compile("WRITE_TO_BUFFER(MISSING)").unwrap();
        let mut ops = MockOps::default();
        assert!(matches!(
            host.invoke(&c, &Binding::default(), &mut ops),
            Err(HostError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_set_and_read_global() {
        let host = BuiltinHost::new();
        let mut ops = MockOps::default();
        run(&host, "SET(COUNT, '7')", &Binding::default(), &mut ops);
        assert_eq!(host.global("count").unwrap().as_scalar(), "7");
    }

    #[test]
    fn test_engine_builtins_dispatch() {
        let host = BuiltinHost::new();
        let mut ops = MockOps::default();
        let v = run(
            &host,
            "LOGENGINE_GET_USER_OPT('NODE')",
            &Binding::default(),
            &mut ops,
        );
        assert_eq!(v.as_scalar(), "web1");

        run(
            &host,
            "LOGENGINE_RESET_RULE_INSTANCES('FETCH'); LOGENGINE_PROCESSING_COMPLETE()",
            &Binding::default(),
            &mut ops,
        );
        assert_eq!(ops.resets, ["FETCH"]);
        assert!(ops.stopped);

        let v = run(
            &host,
            "LOGENGINE_GET_LAST_RULE_INST('SEEN')",
            &Binding::default(),
            &mut ops,
        );
        assert_eq!(v, Value::List(vec!["3".into(), "9".into()]));
    }

    #[test]
    fn test_xlat_ar_to_string() {
        let host = BuiltinHost::new();
        let mut vars = VarTable::new();
        vars.insert(
            "VALS".into(),
            Value::List(vec!["1".into(), "2".into(), "3".into()]),
        );
        let binding = Binding {
            vars,
            ..Binding::default()
        };
        let mut ops = MockOps::default();
        let v = run(&host, "XLAT_AR_TO_STRING(VALS, ',')", &binding, &mut ops);
        assert_eq!(v.as_scalar(), "1,2,3");

        let v = run(&host, "XLAT_AR_TO_STRING(VALS)", &binding, &mut ops);
        assert_eq!(v.as_scalar(), "1 2 3");
    }

    #[test]
    fn test_nested_calls_are_rejected_at_compile_time() {
        // Arguments are literals or names; calls do not nest.
        let host = BuiltinHost::new();
        assert!(matches!(
            host.compile("WRITE_TO_BUFFER(XLAT_AR_TO_STRING(VALS))"),
            Err(HostError::Compile(_))
        ));
    }

    #[test]
    fn test_native_registration_wins_over_program_parse() {
        let mut host = BuiltinHost::new();
        host.register("bump", |_binding, ops| {
            ops.write_to_buffer("!");
            Ok(Value::truthy(true))
        });
        let mut ops = MockOps::default();
        run(&host, "bump", &Binding::default(), &mut ops);
        assert_eq!(ops.buffer, "!");
    }
}
