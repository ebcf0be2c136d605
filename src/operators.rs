//! Binary and comparison operators shared by the tree interpreter and the VM.
//!
//! Generalised from the reference implementation's `i64`/`f64` pair to
//! arbitrary-precision integers via `num-bigint`, since the language requires
//! unbounded integer semantics. There is no bitwise family here: the
//! language's closed opcode set only names an arithmetic `BINARY_*` family.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::ast::{BinOp, CmpOp};
use crate::error::{Error, Result};
use crate::value::Value;

pub fn apply_binop(op: &BinOp, left: &Value, right: &Value, line: u32) -> Result<Value> {
    match op {
        BinOp::Add => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
            (Value::List(a), Value::List(b)) => {
                let mut result = a.borrow().clone();
                result.extend(b.borrow().iter().cloned());
                Ok(Value::list(result))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                let mut result = (**a).clone();
                result.extend(b.iter().cloned());
                Ok(Value::Tuple(std::rc::Rc::new(result)))
            }
            _ => numeric_binop(left, right, |a, b| a + b, |a, b| a + b, line, "+"),
        },
        BinOp::Sub => numeric_binop(left, right, |a, b| a - b, |a, b| a - b, line, "-"),
        BinOp::Mul => match (left, right) {
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                Ok(Value::str(s.repeat(clamp_repeat(n))))
            }
            (Value::List(l), Value::Int(n)) | (Value::Int(n), Value::List(l)) => {
                let times = clamp_repeat(n);
                let base = l.borrow();
                let mut result = Vec::with_capacity(base.len() * times);
                for _ in 0..times {
                    result.extend(base.iter().cloned());
                }
                Ok(Value::list(result))
            }
            _ => numeric_binop(left, right, |a, b| a * b, |a, b| a * b, line, "*"),
        },
        BinOp::Div => {
            let a = as_float(left, line)?;
            let b = as_float(right, line)?;
            if b == 0.0 {
                Err(zero_div(line))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        BinOp::FloorDiv => match (left, right) {
            (Value::Int(a), Value::Int(b)) => {
                if b.is_zero() {
                    Err(zero_div(line))
                } else {
                    Ok(Value::Int(a.div_floor(b)))
                }
            }
            _ => {
                let a = as_float(left, line)?;
                let b = as_float(right, line)?;
                if b == 0.0 {
                    Err(zero_div(line))
                } else {
                    Ok(Value::Float((a / b).floor()))
                }
            }
        },
        BinOp::Mod => match (left, right) {
            (Value::Int(a), Value::Int(b)) => {
                if b.is_zero() {
                    Err(zero_div(line))
                } else {
                    Ok(Value::Int(a.mod_floor(b)))
                }
            }
            _ => {
                let a = as_float(left, line)?;
                let b = as_float(right, line)?;
                if b == 0.0 {
                    Err(zero_div(line))
                } else {
                    Ok(Value::Float(a.rem_euclid(b)))
                }
            }
        },
        BinOp::Pow => match (left, right) {
            (Value::Int(a), Value::Int(b)) if !b.is_negative() => {
                let exp = b.to_u32().ok_or_else(|| {
                    Error::runtime("eksponen terlalu besar", line)
                })?;
                Ok(Value::Int(a.pow(exp)))
            }
            _ => {
                let a = as_float(left, line)?;
                let b = as_float(right, line)?;
                Ok(Value::Float(a.powf(b)))
            }
        },
        BinOp::And | BinOp::Or => unreachable!("dan/atau_logik are short-circuited by the caller"),
    }
}

fn clamp_repeat(n: &BigInt) -> usize {
    if n.is_negative() {
        0
    } else {
        n.to_usize().unwrap_or(usize::MAX)
    }
}

fn zero_div(line: u32) -> Error {
    Error::runtime("pembahagian dengan sifar", line)
}

fn as_float(v: &Value, line: u32) -> Result<f64> {
    match v {
        Value::Int(i) => i.to_f64().ok_or_else(|| Error::runtime("integer terlalu besar untuk float", line)),
        Value::Float(f) => Ok(*f),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(Error::runtime(
            format!("operand bukan nombor: {}", other.type_name()),
            line,
        )),
    }
}

fn numeric_binop<F, G>(left: &Value, right: &Value, int_op: F, float_op: G, line: u32, sym: &str) -> Result<Value>
where
    F: Fn(&BigInt, &BigInt) -> BigInt,
    G: Fn(f64, f64) -> f64,
{
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(a, b))),
        (Value::Bool(_), _) | (_, Value::Bool(_)) | (Value::Float(_), _) | (_, Value::Float(_)) => {
            Ok(Value::Float(float_op(as_float(left, line)?, as_float(right, line)?)))
        }
        _ => Err(Error::runtime(
            format!("operan tidak serasi untuk {}: {} dan {}", sym, left.type_name(), right.type_name()),
            line,
        )),
    }
}

pub fn apply_cmpop(op: &CmpOp, left: &Value, right: &Value, line: u32) -> Result<bool> {
    match op {
        CmpOp::Eq => Ok(left.kilat_eq(right)),
        CmpOp::NotEq => Ok(!left.kilat_eq(right)),
        CmpOp::Lt => Ok(ordering(left, right, line)? == std::cmp::Ordering::Less),
        CmpOp::LtEq => Ok(ordering(left, right, line)? != std::cmp::Ordering::Greater),
        CmpOp::Gt => Ok(ordering(left, right, line)? == std::cmp::Ordering::Greater),
        CmpOp::GtEq => Ok(ordering(left, right, line)? != std::cmp::Ordering::Less),
        CmpOp::In => contains(right, left, line),
        CmpOp::Is => Ok(is_same(left, right)),
    }
}

fn is_same(a: &Value, b: &Value) -> bool {
    use std::rc::Rc;
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Instance(x), Value::Instance(y)) => Rc::ptr_eq(x, y),
        (Value::Class(x), Value::Class(y)) => Rc::ptr_eq(x, y),
        _ => a.kilat_eq(b),
    }
}

fn ordering(left: &Value, right: &Value, line: u32) -> Result<std::cmp::Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ if matches!(left, Value::Int(_) | Value::Float(_) | Value::Bool(_))
            && matches!(right, Value::Int(_) | Value::Float(_) | Value::Bool(_)) =>
        {
            as_float(left, line)?
                .partial_cmp(&as_float(right, line)?)
                .ok_or_else(|| Error::runtime("perbandingan nan", line))
        }
        _ => Err(Error::runtime(
            format!("tidak boleh dibandingkan: {} dan {}", left.type_name(), right.type_name()),
            line,
        )),
    }
}

fn contains(container: &Value, needle: &Value, line: u32) -> Result<bool> {
    match container {
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.kilat_eq(needle))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.kilat_eq(needle))),
        Value::Set(items) => Ok(items.borrow().iter().any(|v| v.kilat_eq(needle))),
        Value::Str(s) => match needle {
            Value::Str(n) => Ok(s.contains(n.as_str())),
            other => Err(Error::runtime(format!("dijangka str, dapat {}", other.type_name()), line)),
        },
        Value::Dict(pairs) => Ok(pairs.borrow().iter().any(|(k, _)| k.kilat_eq(needle))),
        other => Err(Error::runtime(format!("bukan bekas: {}", other.type_name()), line)),
    }
}
