//! Kilat — a dynamically-typed, Python-like scripting language with a
//! Malay-keyword surface syntax (`jika`/`ataujika`/`atau` for if/elif/else,
//! `fungsi` for function, `selagi` for while, `untuk diulang ... dalam` for
//! for-in, `cuba`/`tangkap`/`akhirnya` for try/except/finally, `bangkit` for
//! raise).
//!
//! The crate is two parallel execution backends over one shared AST and
//! runtime value model:
//!
//! - a tree-walking interpreter ([`interpreter`]) that evaluates the AST
//!   directly over an [`environment`] chain;
//! - a bytecode compiler ([`compiler`]) and stack-based [`vm`] that lower
//!   the same AST to a closed [`bytecode`] instruction set and execute it,
//!   with a binary [`serializer`] format (`.klc`) for persisting compiled
//!   code.
//!
//! [`sandbox::Sandbox`] is the embeddable facade host programs use to run
//! Kilat source on either backend from a persistent global scope; the
//! `kilat` binary ([`cli`]) and [`repl`] are built on top of it.
//!
//! # Quick start
//!
//! ```
//! use kilat::Sandbox;
//!
//! let mut sandbox = Sandbox::new();
//! let result = sandbox.run("2 + 2").unwrap();
//! assert_eq!(result.repr_str(), "4");
//! ```

mod ast;
mod builtins;
mod bytecode;
pub mod cli;
mod class;
mod compiler;
mod diagnostic;
mod environment;
mod error;
mod exception;
mod interpreter;
mod lexer;
mod operators;
mod parser;
pub mod repl;
pub mod sandbox;
mod serializer;
mod slice;
mod token;
mod value;
mod vm;

pub use diagnostic::{Diagnostic, FunctionCallDiagnostic, Label, Span};
pub use error::{Error, Result};
pub use sandbox::{Backend, Limits, Sandbox};
pub use value::{FromValue, TypeError, Value};

/// Entry point shared by the `kilat` binary and anything that embeds the CLI
/// (e.g. an integration test driving it as a library call instead of a
/// subprocess).
pub fn cli_main(argv: Vec<String>) -> std::process::ExitCode {
    cli::main(argv)
}
