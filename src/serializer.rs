//! The `.klc` binary format (C6): little-endian, magic `KLC\0`, version
//! `(1, 0)`. Byte layout matches the reference `serialize_code`/
//! `deserialize_code` functions, with one deliberate deviation: integer
//! constants serialise as a length-prefixed big-endian byte string rather
//! than a fixed `i64`, since the language's integers are arbitrary precision
//! and the reference format's `struct.pack('<q', ...)` would silently
//! truncate a large literal.

use num_bigint::{BigInt, Sign};

use crate::bytecode::{CodeObject, Instruction, OpCode};
use crate::error::{Error, Result};
use crate::value::Value;

pub const MAGIC: &[u8; 4] = b"KLC\0";
pub const VERSION: (u8, u8) = (1, 0);

const TAG_NONE: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_TRUE: u8 = 4;
const TAG_FALSE: u8 = 5;
const TAG_CODE: u8 = 6;
const TAG_LIST: u8 = 7;

pub fn serialize(code: &CodeObject) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(VERSION.0);
    out.push(VERSION.1);
    write_code_obj(&mut out, code);
    out
}

pub fn deserialize(bytes: &[u8]) -> Result<CodeObject> {
    let mut r = Reader { bytes, pos: 0 };
    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(Error::runtime("magik .klc tidak sah", 0));
    }
    let major = r.u8()?;
    let minor = r.u8()?;
    if major != VERSION.0 {
        return Err(Error::runtime(format!("versi .klc tidak serasi: {}.{}", major, minor), 0));
    }
    read_code_obj(&mut r)
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, v: &Value) {
    match v {
        Value::None => out.push(TAG_NONE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Int(i) => {
            out.push(TAG_INT);
            let negative = i.sign() == Sign::Minus;
            out.push(negative as u8);
            let (_, bytes) = i.to_bytes_be();
            write_u32(out, bytes.len() as u32);
            out.extend_from_slice(&bytes);
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::Str(s) => {
            out.push(TAG_STRING);
            write_string(out, s);
        }
        Value::Code(c) => {
            out.push(TAG_CODE);
            write_code_obj(out, c);
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            let items = items.borrow();
            write_u32(out, items.len() as u32);
            for item in items.iter() {
                write_value(out, item);
            }
        }
        other => {
            // Every constant the compiler actually emits is one of the
            // tags above; anything else indicates a compiler bug rather
            // than a representable-but-untagged value.
            debug_assert!(false, "pemalar tidak boleh disiri: {:?}", other);
            out.push(TAG_NONE);
        }
    }
}

fn write_code_obj(out: &mut Vec<u8>, code: &CodeObject) {
    write_string(out, &code.name);
    write_u32(out, code.param_count);
    write_u32(out, code.param_names.len() as u32);
    for p in &code.param_names {
        write_string(out, p);
    }
    write_string(out, code.var_args.as_deref().unwrap_or(""));
    write_string(out, code.kw_args.as_deref().unwrap_or(""));
    write_u32(out, code.constants.len() as u32);
    for c in &code.constants {
        write_value(out, c);
    }
    write_u32(out, code.names.len() as u32);
    for n in &code.names {
        write_string(out, n);
    }
    write_u32(out, code.instructions.len() as u32);
    for instr in &code.instructions {
        out.push(instr.opcode as u8);
        out.extend_from_slice(&instr.arg.to_le_bytes());
        out.extend_from_slice(&instr.line.to_le_bytes());
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::runtime("akhir fail .klc tidak dijangka", 0));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::runtime("utf-8 tidak sah dalam .klc", 0))
    }
}

fn read_value(r: &mut Reader) -> Result<Value> {
    let tag = r.u8()?;
    Ok(match tag {
        TAG_NONE => Value::None,
        TAG_TRUE => Value::Bool(true),
        TAG_FALSE => Value::Bool(false),
        TAG_INT => {
            let negative = r.u8()? != 0;
            let len = r.u32()? as usize;
            let bytes = r.take(len)?;
            let sign = if negative { Sign::Minus } else { Sign::Plus };
            Value::Int(BigInt::from_bytes_be(sign, bytes))
        }
        TAG_FLOAT => Value::Float(r.f64()?),
        TAG_STRING => Value::str(r.string()?),
        TAG_CODE => Value::Code(std::rc::Rc::new(read_code_obj(r)?)),
        TAG_LIST => {
            let count = r.u32()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(read_value(r)?);
            }
            Value::list(items)
        }
        other => return Err(Error::runtime(format!("tag pemalar tidak diketahui: {}", other), 0)),
    })
}

fn read_code_obj(r: &mut Reader) -> Result<CodeObject> {
    let name = r.string()?;
    let param_count = r.u32()?;
    let pn_count = r.u32()?;
    let mut param_names = Vec::with_capacity(pn_count as usize);
    for _ in 0..pn_count {
        param_names.push(r.string()?);
    }
    let var_args = {
        let s = r.string()?;
        if s.is_empty() { None } else { Some(s) }
    };
    let kw_args = {
        let s = r.string()?;
        if s.is_empty() { None } else { Some(s) }
    };
    let const_count = r.u32()?;
    let mut constants = Vec::with_capacity(const_count as usize);
    for _ in 0..const_count {
        constants.push(read_value(r)?);
    }
    let name_count = r.u32()?;
    let mut names = Vec::with_capacity(name_count as usize);
    for _ in 0..name_count {
        names.push(r.string()?);
    }
    let instr_count = r.u32()?;
    let mut instructions = Vec::with_capacity(instr_count as usize);
    for _ in 0..instr_count {
        let op = r.u8()?;
        let arg = r.i16()?;
        let line = r.u16()?;
        let opcode = OpCode::from_u8(op).ok_or_else(|| Error::runtime(format!("opcode tidak diketahui: {}", op), 0))?;
        instructions.push(Instruction::new(opcode, arg, line));
    }
    Ok(CodeObject {
        name,
        constants,
        names,
        param_names,
        param_count,
        var_args,
        kw_args,
        instructions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;

    #[test]
    fn round_trips_a_simple_code_object() {
        let mut code = CodeObject::new("<modul>");
        let idx = code.add_const(Value::int(42)).unwrap();
        code.instructions.push(Instruction::new(OpCode::LoadConst, idx, 1));
        code.instructions.push(Instruction::new(OpCode::ReturnValue, 0, 1));

        let bytes = serialize(&code);
        assert_eq!(&bytes[0..4], MAGIC);
        let back = deserialize(&bytes).unwrap();
        assert_eq!(back.name, code.name);
        assert_eq!(back.instructions, code.instructions);
        assert!(back.constants[0].kilat_eq(&code.constants[0]));
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0, 0, 0, 0, 1, 0];
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn round_trips_large_integers() {
        let mut code = CodeObject::new("<modul>");
        let huge = Value::Int(num_bigint::BigInt::parse_bytes(b"123456789012345678901234567890", 10).unwrap());
        code.add_const(huge.clone()).unwrap();
        let bytes = serialize(&code);
        let back = deserialize(&bytes).unwrap();
        assert!(back.constants[0].kilat_eq(&huge));
    }
}
