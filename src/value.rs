//! The runtime value representation shared by the tree interpreter and the VM.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::bytecode::CodeObject;
use crate::class::{Class, Instance};
use crate::environment::Environment;

/// A host-implemented builtin. The second argument lets builtins like
/// `peta`/`tapis`/`mana` invoke a Kilat-level callable without the builtins
/// module depending on the interpreter/VM directly.
pub type Caller<'a> = dyn Fn(&Value, &[Value]) -> crate::error::Result<Value> + 'a;
pub type NativeFn = dyn Fn(&[Value], &Caller) -> crate::error::Result<Value>;

/// A function value, shared by the tree interpreter (closing over an
/// `Environment`) and the compiled path (closing over a `CodeObject`).
///
/// Defaults are stored as unevaluated expressions/constants bound to the
/// defining scope and evaluated lazily at call time, matching the reference
/// implementation's semantics (see `SPEC_FULL.md` for the explicit choice).
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    /// One entry per parameter that has a default, in declaration order among
    /// defaulted parameters.
    pub defaults: Vec<FunctionDefault>,
    pub var_args: Option<String>,
    pub kw_args: Option<String>,
    pub body: FunctionBody,
    pub closure: Option<Rc<RefCell<Environment>>>,
}

pub enum FunctionBody {
    Tree(Rc<crate::ast::Block>),
    Code(Rc<CodeObject>),
}

/// A default value: either an AST expression (tree interpreter) evaluated
/// lazily in the closure scope, or an already-compiled constant index
/// resolved against the owning `CodeObject`'s constant pool (VM path, where
/// "lazy at call time" still holds because `MAKE_FUNCTION` re-evaluates the
/// default-producing instructions each time the `fungsi` statement runs, not
/// each time the function is called — matching the interpreter only insofar
/// as both re-resolve in the defining scope, not the call site).
pub enum FunctionDefault {
    Expr(Rc<crate::ast::Expr>),
    Value(Value),
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fungsi {}>", self.name)
    }
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(Rc<String>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Set(Rc<RefCell<Vec<Value>>>),
    Slice(Rc<SliceValue>),
    Function(Rc<Function>),
    BoundMethod(Rc<RefCell<Instance>>, Rc<Function>),
    NativeFunction(Rc<str>, Rc<NativeFn>),
    Class(Rc<Class>),
    Instance(Rc<RefCell<Instance>>),
    Iterator(Rc<RefCell<IterState>>),
    Module(Rc<Module>),
    /// A nested `CodeObject` stored in an enclosing code object's constant
    /// pool — functions, methods, lambdas, and class bodies compile to one
    /// of these before `MAKE_FUNCTION`/`MAKE_CLASS` turns it into a callable.
    Code(Rc<CodeObject>),
}

#[derive(Debug, Clone)]
pub struct SliceValue {
    pub start: Option<BigInt>,
    pub stop: Option<BigInt>,
    pub step: Option<BigInt>,
}

pub struct IterState {
    pub items: Vec<Value>,
    pub index: usize,
}

pub struct Module {
    pub name: String,
    pub attrs: RefCell<Vec<(String, Value)>>,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    pub fn int(i: i64) -> Value {
        Value::Int(BigInt::from(i))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "TiadaJenis".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Tuple(_) => "tuple".to_string(),
            Value::Dict(_) => "dict".to_string(),
            Value::Set(_) => "set".to_string(),
            Value::Slice(_) => "slice".to_string(),
            Value::Function(_) => "function".to_string(),
            Value::BoundMethod(_, _) => "method".to_string(),
            Value::NativeFunction(_, _) => "builtin_function".to_string(),
            Value::Class(_) => "type".to_string(),
            Value::Instance(inst) => inst.borrow().class.name.clone(),
            Value::Iterator(_) => "iterator".to_string(),
            Value::Module(_) => "module".to_string(),
            Value::Code(_) => "code".to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => !i.is_zero(),
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            _ => true,
        }
    }

    /// Structural equality used by `==`, dict/set key lookup, and `dalam`.
    pub fn kilat_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (None, None) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => a.to_f64().map(|a| a == *b).unwrap_or(false),
            (Bool(a), Int(b)) | (Int(b), Bool(a)) => BigInt::from(*a as i64) == *b,
            (Str(a), Str(b)) => a == b,
            (List(a), List(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.kilat_eq(y))
            }
            (Tuple(a), Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.kilat_eq(y))
            }
            (Dict(a), Dict(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(k2, v2)| k.kilat_eq(k2) && v.kilat_eq(v2))
                    })
            }
            (Set(a), Set(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.kilat_eq(y)))
            }
            (Class(a), Class(b)) => Rc::ptr_eq(a, b),
            (Instance(a), Instance(b)) => Rc::ptr_eq(a, b),
            (Function(a), Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// The display string used by `cetak`, `str()`/`teks()`, and f-string
    /// interpolation.
    pub fn display_str(&self) -> String {
        match self {
            Value::Str(s) => s.as_str().to_string(),
            other => other.repr_str(),
        }
    }

    /// The `repr`-style form used inside collections and by default string
    /// conversion when not the direct argument to `cetak`.
    pub fn repr_str(&self) -> String {
        match self {
            Value::None => "tiada".to_string(),
            Value::Bool(true) => "benar".to_string(),
            Value::Bool(false) => "salah".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(l) => format!(
                "[{}]",
                l.borrow().iter().map(Value::repr_str).collect::<Vec<_>>().join(", ")
            ),
            Value::Tuple(t) => {
                if t.len() == 1 {
                    format!("({},)", t[0].repr_str())
                } else {
                    format!("({})", t.iter().map(Value::repr_str).collect::<Vec<_>>().join(", "))
                }
            }
            Value::Dict(d) => format!(
                "{{{}}}",
                d.borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr_str(), v.repr_str()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Set(s) => {
                let items = s.borrow();
                if items.is_empty() {
                    "set()".to_string()
                } else {
                    format!(
                        "{{{}}}",
                        items.iter().map(Value::repr_str).collect::<Vec<_>>().join(", ")
                    )
                }
            }
            Value::Slice(s) => format!(
                "slice({}, {}, {})",
                opt_bigint(&s.start),
                opt_bigint(&s.stop),
                opt_bigint(&s.step)
            ),
            Value::Function(func) => format!("<fungsi {}>", func.name),
            Value::BoundMethod(_, func) => format!("<kaedah terikat {}>", func.name),
            Value::NativeFunction(name, _) => format!("<fungsi terbina-dalam {}>", name),
            Value::Class(c) => format!("<kelas {}>", c.name),
            Value::Instance(inst) => format!("<{} objek>", inst.borrow().class.name),
            Value::Iterator(_) => "<iterator>".to_string(),
            Value::Module(m) => format!("<modul {}>", m.name),
            Value::Code(c) => format!("<kod {}>", c.name),
        }
    }
}

fn opt_bigint(v: &Option<BigInt>) -> String {
    match v {
        Some(i) => i.to_string(),
        None => "tiada".to_string(),
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f == f.trunc() && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr_str())
    }
}

/// Conversion errors for host-boundary coercions, mirroring the simple
/// `{expected, got}` shape used throughout the pipeline's type errors.
#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: String,
    pub got: String,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, got {}", self.expected, self.got)
    }
}

pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, TypeError>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Int(i) => i.to_i64().ok_or_else(|| TypeError {
                expected: "int".to_string(),
                got: "int (out of range)".to_string(),
            }),
            other => Err(TypeError { expected: "int".to_string(), got: other.type_name().to_string() }),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => i.to_f64().ok_or_else(|| TypeError {
                expected: "float".to_string(),
                got: "int (out of range)".to_string(),
            }),
            other => Err(TypeError { expected: "float".to_string(), got: other.type_name().to_string() }),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Str(s) => Ok(s.as_str().to_string()),
            other => Err(TypeError { expected: "str".to_string(), got: other.type_name().to_string() }),
        }
    }
}
