//! Error types shared by every stage of the pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The five error kinds named by the language's error-handling design: lexical,
/// syntax, compile-time, runtime, and user-raised exceptions surfaced through
/// `bangkit`. Every variant that can be attributed to a source position carries
/// one.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Ralat Leksikal (baris {line}): {message}")]
    Lexical { message: String, line: u32 },

    #[error("Ralat Sintaks (baris {line}): {message}")]
    Syntax { message: String, line: u32 },

    #[error("Ralat Kompilasi (baris {line}): {message}")]
    Compile { message: String, line: u32 },

    #[error("Ralat Masa Larian (baris {line}): {message}")]
    Runtime { message: String, line: u32 },

    /// A value raised by user code via `bangkit`, carrying the raised value's
    /// display form and, when caught, the value itself (kept out of this enum
    /// to avoid a dependency cycle between `error` and `value`; the VM and
    /// interpreter keep the actual `Value` alongside this error in their own
    /// exception-state slots and only use this variant for top-level reporting).
    #[error("Ralat Masa Larian (baris {line}): {message}")]
    Raised { message: String, line: u32 },

    #[error("{0}")]
    Io(String),
}

impl Error {
    pub fn line(&self) -> u32 {
        match self {
            Error::Lexical { line, .. }
            | Error::Syntax { line, .. }
            | Error::Compile { line, .. }
            | Error::Runtime { line, .. }
            | Error::Raised { line, .. } => *line,
            Error::Io(_) => 0,
        }
    }

    pub fn lexical(message: impl Into<String>, line: u32) -> Self {
        Error::Lexical { message: message.into(), line }
    }

    pub fn syntax(message: impl Into<String>, line: u32) -> Self {
        Error::Syntax { message: message.into(), line }
    }

    pub fn compile(message: impl Into<String>, line: u32) -> Self {
        Error::Compile { message: message.into(), line }
    }

    pub fn runtime(message: impl Into<String>, line: u32) -> Self {
        Error::Runtime { message: message.into(), line }
    }

    pub fn raised(message: impl Into<String>, line: u32) -> Self {
        Error::Raised { message: message.into(), line }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
