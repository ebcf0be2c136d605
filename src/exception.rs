//! A closed set of runtime exception kinds.
//!
//! The reference VM resolved `tangkap NamaRalat` by `eval()`-ing the name
//! against the host runtime's type table — a host-coupling the language
//! design explicitly asks to be removed. `tangkap` here matches only against
//! this closed set (by Malay name) plus `UserRaised`, which always matches
//! any handler name (a `bangkit`-ed value is never, on its own, of one of the
//! built-in kinds unless a builtin itself raised it).

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    JenisRalat,     // TypeError
    NamaRalat,      // NameError
    IndeksRalat,    // IndexError
    KunciRalat,     // KeyError
    BahagiSifar,    // ZeroDivisionError
    AtributRalat,   // AttributeError
    ImportRalat,    // ImportError
    NilaiRalat,     // ValueError
    MasaLarianRalat, // RuntimeError
}

impl ExceptionKind {
    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::JenisRalat => "JenisRalat",
            ExceptionKind::NamaRalat => "NamaRalat",
            ExceptionKind::IndeksRalat => "IndeksRalat",
            ExceptionKind::KunciRalat => "KunciRalat",
            ExceptionKind::BahagiSifar => "BahagiSifar",
            ExceptionKind::AtributRalat => "AtributRalat",
            ExceptionKind::ImportRalat => "ImportRalat",
            ExceptionKind::NilaiRalat => "NilaiRalat",
            ExceptionKind::MasaLarianRalat => "MasaLarianRalat",
        }
    }

    pub fn from_name(name: &str) -> Option<ExceptionKind> {
        Some(match name {
            "JenisRalat" => ExceptionKind::JenisRalat,
            "NamaRalat" => ExceptionKind::NamaRalat,
            "IndeksRalat" => ExceptionKind::IndeksRalat,
            "KunciRalat" => ExceptionKind::KunciRalat,
            "BahagiSifar" => ExceptionKind::BahagiSifar,
            "AtributRalat" => ExceptionKind::AtributRalat,
            "ImportRalat" => ExceptionKind::ImportRalat,
            "NilaiRalat" => ExceptionKind::NilaiRalat,
            "MasaLarianRalat" => ExceptionKind::MasaLarianRalat,
            _ => return None,
        })
    }
}

/// The exception currently in flight: either a built-in kind raised by the
/// runtime itself, or an arbitrary value raised by user code via `bangkit`.
#[derive(Debug, Clone)]
pub enum RuntimeException {
    Builtin(ExceptionKind, String),
    Raised(Value),
}

impl RuntimeException {
    pub fn value(&self) -> Value {
        match self {
            RuntimeException::Builtin(kind, msg) => Value::str(format!("{}: {}", kind.name(), msg)),
            RuntimeException::Raised(v) => v.clone(),
        }
    }

    /// Does this exception match a `tangkap <type_name>` handler? `None`
    /// (bare except) always matches.
    pub fn matches(&self, type_name: Option<&str>) -> bool {
        match type_name {
            None => true,
            // A `bangkit`-ed value carries no built-in kind of its own, so it
            // only matches a bare `tangkap` (handled above), never a named
            // one — this is the fix for the reference VM's bug where any
            // user-raised value matched every named handler.
            Some(name) => match self {
                RuntimeException::Builtin(kind, _) => kind.name() == name,
                RuntimeException::Raised(_) => false,
            },
        }
    }
}
