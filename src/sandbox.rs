//! A thin embeddable facade over [`Interpreter`]/[`Vm`] for host programs
//! that want to run Kilat source without going through the CLI.
//!
//! A struct holding one persistent runtime whose globals survive repeated
//! calls, plus a `Limits` value the CLI and REPL both construct from
//! defaults.

use std::rc::Rc;

use crate::ast::{Program, Stmt};
use crate::compiler::compile;
use crate::environment::Environment;
use crate::error::Result;
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::value::Value;
use crate::vm::Vm;

/// Resource limits for sandbox execution.
///
/// Both fields are optional — `None` means unlimited. Neither the tree
/// interpreter nor the VM currently consult these; they are carried here so
/// host code that embeds `Sandbox` has a stable place to set them ahead of
/// the backends growing an enforcement path.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    /// Maximum number of bytecode instructions per `run_bytecode()` call.
    pub max_instructions: Option<u64>,
    /// Maximum call-stack depth for user-defined function calls.
    pub max_recursion_depth: Option<usize>,
}

/// Which backend [`Sandbox::run`] dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Native,
    Bytecode,
}

/// An embeddable Kilat runtime: one persistent global scope, reused across
/// calls to `run`/`run_native`/`run_bytecode`.
pub struct Sandbox {
    interpreter: Interpreter,
    vm: Vm,
    backend: Backend,
    limits: Limits,
}

impl Sandbox {
    pub fn new() -> Self {
        Sandbox { interpreter: Interpreter::new(), vm: Vm::new(), backend: Backend::Native, limits: Limits::default() }
    }

    pub fn with_backend(backend: Backend) -> Self {
        let mut s = Self::new();
        s.backend = backend;
        s
    }

    pub fn limit(&mut self, limits: Limits) {
        self.limits = limits;
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Sets a variable in the sandbox's persistent global scope, visible to
    /// both backends since `Interpreter::globals` and `Vm::globals` are
    /// separate environments that `set` writes to in tandem.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        Environment::define(&self.interpreter.globals, &name, value.clone());
        Environment::define(&self.vm.globals, &name, value);
    }

    /// Runs `source` on the sandbox's configured backend and returns the
    /// value of its trailing bare expression, or `Value::None` if the
    /// source ends with a statement.
    pub fn run(&mut self, source: &str) -> Result<Value> {
        match self.backend {
            Backend::Native => self.run_native(source),
            Backend::Bytecode => self.run_bytecode(source),
        }
    }

    /// Runs `source` through the tree interpreter.
    pub fn run_native(&mut self, source: &str) -> Result<Value> {
        let program = Parser::parse_program(source)?;
        self.interpreter.run(&program)?;
        last_expr_value(&program, |e| self.interpreter.eval_expr(e))
    }

    /// Runs `source` through the bytecode compiler and VM.
    pub fn run_bytecode(&mut self, source: &str) -> Result<Value> {
        let program = Parser::parse_program(source)?;
        let code = Rc::new(compile(&program)?);
        self.vm.run(code)?;
        last_expr_value(&program, |e| {
            let code = crate::compiler::compile_expr_standalone(e)?;
            self.vm.execute(Rc::new(code))
        })
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// If `program`'s last statement is a bare expression, re-evaluates just
/// that expression via `eval` to recover its value for REPL-style printing
/// (the compiled/executed program already discarded it via `PopTop`).
fn last_expr_value(program: &Program, eval: impl FnOnce(&crate::ast::Expr) -> Result<Value>) -> Result<Value> {
    match program.stmts.last() {
        Some(Stmt::ExprStmt(expr, _)) => eval(expr),
        _ => Ok(Value::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_backend_persists_globals_across_calls() {
        let mut sandbox = Sandbox::new();
        sandbox.run_native("x = 10\n").unwrap();
        let result = sandbox.run_native("x * 2\n").unwrap();
        assert!(matches!(result, Value::Int(_)));
        assert_eq!(result.repr_str(), "20");
    }

    #[test]
    fn bytecode_backend_persists_globals_across_calls() {
        let mut sandbox = Sandbox::with_backend(Backend::Bytecode);
        sandbox.run_bytecode("x = 10\n").unwrap();
        let result = sandbox.run_bytecode("x * 2\n").unwrap();
        assert_eq!(result.repr_str(), "20");
    }

    #[test]
    fn trailing_statement_yields_none() {
        let mut sandbox = Sandbox::new();
        let result = sandbox.run_native("x = 5\n").unwrap();
        assert!(matches!(result, Value::None));
    }
}
