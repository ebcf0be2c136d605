//! Hand-rolled argument parsing over `std::env::args()` (a `Vec<String>`
//! scan, no `clap`) rather than a subcommand-registry CLI: Kilat's CLI is a
//! single mode-selecting launcher, not an application with its own verbs.

use std::process::ExitCode;
use std::rc::Rc;

use crate::compiler::compile;
use crate::diagnostic::{Diagnostic, Span};
use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::sandbox::Sandbox;
use crate::serializer;
use crate::vm::Vm;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Transpile-and-run is not required by a systems-language rewrite;
    /// the default path runs the bytecode VM.
    Bytecode,
    Native,
    CompileBc,
    RunKlc,
    Repl,
    Version,
    Help,
}

struct Args {
    mode: Mode,
    input: Option<String>,
    output: Option<String>,
}

fn parse_args(argv: &[String]) -> Result<Args, String> {
    let mut mode = Mode::Bytecode;
    let mut input = None;
    let mut output = None;
    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "--native" => mode = Mode::Native,
            "--bytecode" => mode = Mode::Bytecode,
            "--compile-bc" => mode = Mode::CompileBc,
            "--run-klc" => mode = Mode::RunKlc,
            "--compile-only" => mode = Mode::CompileBc,
            "--repl" => mode = Mode::Repl,
            "--version" => mode = Mode::Version,
            "--help" | "-h" => mode = Mode::Help,
            "-o" => {
                i += 1;
                let path = argv.get(i).ok_or("-o memerlukan laluan")?;
                output = Some(path.clone());
            }
            other if !other.starts_with('-') => {
                if input.is_some() {
                    return Err(format!("argumen tidak dijangka: {}", other));
                }
                input = Some(other.to_string());
            }
            other => return Err(format!("bendera tidak dikenali: {}", other)),
        }
        i += 1;
    }
    Ok(Args { mode, input, output })
}

pub fn main(argv: Vec<String>) -> ExitCode {
    let args = match parse_args(&argv) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("ralat: {}", msg);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match args.mode {
        Mode::Version => {
            println!("kilat {}", VERSION);
            ExitCode::SUCCESS
        }
        Mode::Help => {
            print_usage();
            ExitCode::SUCCESS
        }
        Mode::Repl => {
            crate::repl::run(Sandbox::new());
            ExitCode::SUCCESS
        }
        _ => run_file(&args),
    }
}

fn run_file(args: &Args) -> ExitCode {
    let Some(path) = &args.input else {
        eprintln!("ralat: tiada fail sumber diberikan");
        print_usage();
        return ExitCode::FAILURE;
    };

    match args.mode {
        Mode::Native => run_source(path, |src| {
            let program = Parser::parse_program(src)?;
            Interpreter::new().run(&program)
        }),
        Mode::Bytecode => run_source(path, |src| {
            let program = Parser::parse_program(src)?;
            let code = compile(&program)?;
            Vm::new().run(Rc::new(code))
        }),
        Mode::CompileBc => compile_to_klc(path, args.output.as_deref()),
        Mode::RunKlc => run_klc(path),
        Mode::Version | Mode::Help | Mode::Repl => unreachable!(),
    }
}

fn run_source(path: &str, f: impl FnOnce(&str) -> Result<(), Error>) -> ExitCode {
    let src = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ralat: tidak dapat baca '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };
    match f(&src) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&src, &e);
            ExitCode::FAILURE
        }
    }
}

fn compile_to_klc(path: &str, output: Option<&str>) -> ExitCode {
    let src = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ralat: tidak dapat baca '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };
    let result = (|| -> Result<(), Error> {
        let program = Parser::parse_program(&src)?;
        let code = compile(&program)?;
        let bytes = serializer::serialize(&code);
        let out_path = output.map(|s| s.to_string()).unwrap_or_else(|| default_klc_path(path));
        std::fs::write(&out_path, bytes)?;
        Ok(())
    })();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&src, &e);
            ExitCode::FAILURE
        }
    }
}

fn run_klc(path: &str) -> ExitCode {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("ralat: tidak dapat baca '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };
    match serializer::deserialize(&bytes).and_then(|code| Vm::new().run(Rc::new(code))) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn default_klc_path(source_path: &str) -> String {
    match source_path.rsplit_once('.') {
        Some((stem, _)) => format!("{}.klc", stem),
        None => format!("{}.klc", source_path),
    }
}

/// Renders `e` as a Rust-compiler-style snippet when it carries a line
/// number that exists in `src`, falling back to the bare `Display` form for
/// line-less errors (`Io`).
fn report_error(src: &str, e: &Error) {
    let line = e.line();
    if line == 0 {
        eprintln!("{}", e);
        return;
    }
    let Some(span) = line_span(src, line as usize) else {
        eprintln!("{}", e);
        return;
    };
    let diag = Diagnostic::new(e.to_string()).with_source(src).with_label(span, "di sini");
    eprintln!("{}", diag);
}

fn line_span(src: &str, line_num: usize) -> Option<Span> {
    let mut offset = 0;
    for (i, line) in src.split_inclusive('\n').enumerate() {
        if i + 1 == line_num {
            let end = offset + line.trim_end_matches('\n').len();
            return Some(Span::new(offset, end));
        }
        offset += line.len();
    }
    None
}

fn print_usage() {
    println!("penggunaan: kilat [bendera] <fail>");
    println!();
    println!("bendera:");
    println!("  --native        jalankan melalui jurubahasa pepohon");
    println!("  --bytecode      kompil ke bytekod dan jalankan pada VM (lalai)");
    println!("  --compile-bc    kompil ke bytekod dan tulis fail .klc");
    println!("  --run-klc       muat dan jalankan fail .klc");
    println!("  --repl          shell interaktif");
    println!("  -o <laluan>     fail output untuk mod kompil");
    println!("  --version       papar versi");
    println!("  --help, -h      papar bantuan ini");
}
