//! Slicing, generalised from the reference implementation to the language's
//! own `Value` variants. Index/step arithmetic stays `i64` — slicing a
//! sequence longer than `i64::MAX` elements is not a real concern even with
//! arbitrary-precision integer *values* elsewhere in the language.

use crate::error::{Error, Result};
use crate::value::Value;

pub fn slice_list(items: &[Value], lower: Option<i64>, upper: Option<i64>, step: Option<i64>, line: u32) -> Result<Value> {
    let indices = resolve_indices(items.len(), lower, upper, step, line)?;
    Ok(Value::list(indices.into_iter().map(|i| items[i].clone()).collect()))
}

pub fn slice_tuple(items: &[Value], lower: Option<i64>, upper: Option<i64>, step: Option<i64>, line: u32) -> Result<Value> {
    let indices = resolve_indices(items.len(), lower, upper, step, line)?;
    Ok(Value::Tuple(std::rc::Rc::new(indices.into_iter().map(|i| items[i].clone()).collect())))
}

pub fn slice_string(s: &str, lower: Option<i64>, upper: Option<i64>, step: Option<i64>, line: u32) -> Result<Value> {
    let chars: Vec<char> = s.chars().collect();
    let indices = resolve_indices(chars.len(), lower, upper, step, line)?;
    Ok(Value::str(indices.into_iter().map(|i| chars[i]).collect::<String>()))
}

fn resolve_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>, line: u32) -> Result<Vec<usize>> {
    let len_i = len as i64;
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Error::runtime("langkah petak tidak boleh sifar", line));
    }
    let mut result = Vec::new();
    if step > 0 {
        let start = match lower {
            Some(i) if i < 0 => (len_i + i).max(0) as usize,
            Some(i) => (i as usize).min(len),
            None => 0,
        };
        let end = match upper {
            Some(i) if i < 0 => (len_i + i).max(0) as usize,
            Some(i) => (i as usize).min(len),
            None => len,
        };
        let mut i = start;
        while i < end {
            result.push(i);
            i += step as usize;
        }
    } else {
        let start = match lower {
            Some(i) if i < 0 => (len_i + i).max(-1),
            Some(i) => (i).min(len_i - 1),
            None => len_i - 1,
        };
        let end = match upper {
            Some(i) if i < 0 => (len_i + i).max(-1),
            Some(i) => i.min(len_i - 1),
            None => -1,
        };
        let mut i = start;
        while i > end && i >= 0 {
            if (i as usize) < len {
                result.push(i as usize);
            }
            i += step;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(vals: &[i64]) -> Vec<Value> {
        vals.iter().map(|&v| Value::int(v)).collect()
    }

    #[test]
    fn forward_slice() {
        let items = ints(&[0, 1, 2, 3, 4]);
        let Value::List(out) = slice_list(&items, Some(1), Some(4), None, 1).unwrap() else { panic!() };
        assert_eq!(out.borrow().len(), 3);
    }

    #[test]
    fn negative_step_reverses() {
        let items = ints(&[0, 1, 2, 3, 4]);
        let Value::List(out) = slice_list(&items, None, None, Some(-1), 1).unwrap() else { panic!() };
        use num_traits::ToPrimitive;
        let got: Vec<i64> = out.borrow().iter().map(|v| if let Value::Int(i) = v { i.to_i64().unwrap() } else { 0 }).collect();
        assert_eq!(got, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn zero_step_errors() {
        let items = ints(&[0, 1, 2]);
        assert!(slice_list(&items, None, None, Some(0), 1).is_err());
    }
}
