//! The interactive shell (§6 `--repl`).
//!
//! A single [`Sandbox`] is reused across prompts so bindings from one line
//! are visible to the next. Lines are buffered until they parse cleanly and
//! the last non-blank, non-comment line does not end with `:` (an open
//! block).

use std::io::{self, Write};

use crate::sandbox::Sandbox;
use crate::value::Value;

const EXIT_WORDS: [&str; 3] = ["keluar", "exit", "quit"];

pub fn run(mut sandbox: Sandbox) {
    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("{}", if buffer.is_empty() { ">>> " } else { "... " });
        let _ = io::stdout().flush();

        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            println!();
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);

        if buffer.is_empty() && EXIT_WORDS.contains(&trimmed.trim()) {
            break;
        }

        buffer.push_str(trimmed);
        buffer.push('\n');

        if block_is_open(&buffer) {
            continue;
        }

        match sandbox.run(&buffer) {
            Ok(Value::None) => {}
            Ok(value) => println!("{}", value.repr_str()),
            Err(e) => eprintln!("{}", e),
        }
        buffer.clear();
    }
}

/// True while the accumulated buffer still has an open block: either it
/// fails to parse (likely mid-statement), or its last non-blank,
/// non-comment line ends with `:`.
fn block_is_open(buffer: &str) -> bool {
    if crate::parser::Parser::parse_program(buffer).is_err() {
        return true;
    }
    let last_content_line = buffer
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));
    matches!(last_content_line, Some(l) if l.trim_end().ends_with(':'))
}
