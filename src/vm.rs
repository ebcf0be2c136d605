//! The bytecode virtual machine: executes a compiled `CodeObject` tree.
//!
//! A single fetch-decode-execute loop, where each call gets its own operand
//! stack (a fresh `Frame` recursed into for every invocation) rather than
//! one stack shared across frames with base offsets — simpler to get right
//! without running the compiled result, and itself a legitimate
//! bytecode-VM idiom. `tangkap`/`akhirnya` dispatch against a per-frame
//! try-stack of `(handler address, operand-stack depth)` pairs that
//! `SETUP_TRY`/`POP_TRY` push and pop at runtime.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{BinOp, CmpOp};
use crate::builtins;
use crate::bytecode::{CodeObject, Instruction, OpCode};
use crate::class::{Class, Instance};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::exception::{ExceptionKind, RuntimeException};
use crate::operators::{apply_binop, apply_cmpop};
use crate::value::{Function, FunctionBody, FunctionDefault, IterState, Value};

/// A control transfer out of `step`: either a hard pipeline error or a
/// catchable in-flight exception, mirroring the distinction `interpreter.rs`
/// keeps with its own `Unwind` type.
enum Unwind {
    Error(Error),
    Exception(RuntimeException, u32),
}

impl From<Error> for Unwind {
    fn from(e: Error) -> Self {
        Unwind::Error(e)
    }
}

type EvalResult<T> = std::result::Result<T, Unwind>;

enum StepOutcome {
    Continue,
    Return(Value),
}

/// One call's activation: its own code, instruction pointer, lexical
/// environment, and operand stack. `current_exception` lives in
/// `run_frame`'s locals rather than here, since a `cuba` block never spans a
/// call boundary.
struct Frame {
    code: Rc<CodeObject>,
    ip: usize,
    env: Rc<RefCell<Environment>>,
    stack: Vec<Value>,
    /// `(handler address, operand-stack depth at SETUP_TRY)`, pushed by
    /// `SETUP_TRY` and popped by `POP_TRY` or by a caught exception.
    try_stack: Vec<(usize, usize)>,
}

pub struct Vm {
    pub globals: Rc<RefCell<Environment>>,
}

impl Vm {
    pub fn new() -> Self {
        let globals = Environment::new(None);
        builtins::install(&globals);
        Vm { globals }
    }

    /// Executes a module-level `CodeObject` and returns the final value left
    /// by its trailing `ReturnValue`.
    pub fn execute(&self, code: Rc<CodeObject>) -> Result<Value> {
        let mut frame = Frame { code, ip: 0, env: self.globals.clone(), stack: Vec::new(), try_stack: Vec::new() };
        match self.run_frame(&mut frame) {
            Ok(v) => Ok(v),
            Err(Unwind::Error(e)) => Err(e),
            Err(Unwind::Exception(exc, line)) => Err(Error::raised(exc.value().display_str(), line)),
        }
    }

    pub fn run(&self, code: Rc<CodeObject>) -> Result<()> {
        self.execute(code).map(|_| ())
    }

    fn run_frame(&self, frame: &mut Frame) -> EvalResult<Value> {
        let mut current_exception: Option<RuntimeException> = None;
        loop {
            let ip = frame.ip;
            let Some(instr) = frame.code.instructions.get(ip).copied() else {
                return Err(Error::runtime("penuding arahan di luar julat kod", 0).into());
            };
            frame.ip += 1;
            match self.step(frame, &instr, &mut current_exception) {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Return(v)) => return Ok(v),
                Err(Unwind::Error(e)) => return Err(Unwind::Error(e)),
                Err(Unwind::Exception(exc, line)) => match frame.try_stack.pop() {
                    Some((handler, stack_depth)) => {
                        frame.stack.truncate(stack_depth);
                        current_exception = Some(exc);
                        frame.ip = handler;
                    }
                    None => return Err(Unwind::Exception(exc, line)),
                },
            }
        }
    }

    fn step(&self, frame: &mut Frame, instr: &Instruction, current_exception: &mut Option<RuntimeException>) -> EvalResult<StepOutcome> {
        let line = instr.line as u32;
        let arg = instr.arg;
        match instr.opcode {
            OpCode::Nop | OpCode::BreakLoop | OpCode::ContinueLoop => {}
            OpCode::SetupTry => {
                frame.try_stack.push((arg as usize, frame.stack.len()));
            }
            OpCode::PopTry => {
                frame.try_stack.pop();
            }
            OpCode::PopTop => {
                frame.stack.pop();
            }
            OpCode::DupTop => {
                let top = frame.stack.last().cloned().ok_or_else(|| stack_underflow(line))?;
                frame.stack.push(top);
            }
            OpCode::RotTwo => {
                let a = frame.stack.pop().ok_or_else(|| stack_underflow(line))?;
                let b = frame.stack.pop().ok_or_else(|| stack_underflow(line))?;
                frame.stack.push(a);
                frame.stack.push(b);
            }

            OpCode::LoadConst => {
                let value = if arg == -1 {
                    current_exception.take().map(|e| e.value()).unwrap_or(Value::None)
                } else {
                    frame.code.constants[arg as usize].clone()
                };
                frame.stack.push(value);
            }

            OpCode::LoadName => {
                let name = name_at(&frame.code, arg);
                let value = Environment::get(&frame.env, name, line)?;
                frame.stack.push(value);
            }
            OpCode::StoreName => {
                let name = name_at(&frame.code, arg).to_string();
                let value = pop(frame, line)?;
                Environment::set_existing(&frame.env, &name, value, line)?;
            }
            OpCode::StoreNameDefine => {
                let name = name_at(&frame.code, arg).to_string();
                let value = pop(frame, line)?;
                Environment::define(&frame.env, &name, value);
            }
            OpCode::LoadGlobal => {
                let name = name_at(&frame.code, arg);
                let value = Environment::get(&self.globals, name, line)?;
                frame.stack.push(value);
            }
            OpCode::StoreGlobal => {
                let name = name_at(&frame.code, arg).to_string();
                let value = pop(frame, line)?;
                Environment::define(&self.globals, &name, value);
            }
            OpCode::DeleteName => {
                let name = name_at(&frame.code, arg);
                Environment::delete(&frame.env, name, line)?;
            }
            OpCode::DeclareGlobal => {
                let name = name_at(&frame.code, arg);
                Environment::declare_global(&frame.env, name);
            }

            OpCode::LoadAttr => {
                let name = name_at(&frame.code, arg).to_string();
                let obj = pop(frame, line)?;
                let value = self.load_attr(&obj, &name, line)?;
                frame.stack.push(value);
            }
            OpCode::StoreAttr => {
                let name = name_at(&frame.code, arg).to_string();
                let value = pop(frame, line)?;
                let obj = pop(frame, line)?;
                match &obj {
                    Value::Instance(inst) => inst.borrow_mut().set_attr(&name, value),
                    other => return Err(type_error(format!("tidak boleh tetapkan atribut pada {}", other.type_name()), line)),
                }
            }

            OpCode::LoadIndex => {
                let idx = pop(frame, line)?;
                let obj = pop(frame, line)?;
                let value = self.load_index(&obj, &idx, line)?;
                frame.stack.push(value);
            }
            OpCode::StoreIndex => {
                let value = pop(frame, line)?;
                let idx = pop(frame, line)?;
                let obj = pop(frame, line)?;
                self.store_index(&obj, &idx, value, line)?;
            }
            OpCode::DeleteIndex => {
                let idx = pop(frame, line)?;
                let obj = pop(frame, line)?;
                self.delete_index(&obj, &idx, line)?;
            }

            OpCode::BinaryAdd
            | OpCode::BinarySub
            | OpCode::BinaryMul
            | OpCode::BinaryDiv
            | OpCode::BinaryFloorDiv
            | OpCode::BinaryMod
            | OpCode::BinaryPow => {
                let right = pop(frame, line)?;
                let left = pop(frame, line)?;
                let op = binop_from_opcode(instr.opcode);
                let result = apply_binop(&op, &left, &right, line)?;
                frame.stack.push(result);
            }
            OpCode::AugAdd | OpCode::AugSub | OpCode::AugMul | OpCode::AugDiv | OpCode::AugFloorDiv | OpCode::AugMod | OpCode::AugPow => {
                let name = name_at(&frame.code, arg).to_string();
                let rhs = pop(frame, line)?;
                let current = Environment::get(&frame.env, &name, line)?;
                let op = aug_binop(instr.opcode);
                let result = apply_binop(&op, &current, &rhs, line)?;
                Environment::set_existing(&frame.env, &name, result, line)?;
            }

            OpCode::UnaryNeg => {
                let v = pop(frame, line)?;
                let result = match v {
                    Value::Int(i) => Value::Int(-i),
                    Value::Float(f) => Value::Float(-f),
                    other => return Err(type_error(format!("tidak boleh negatifkan {}", other.type_name()), line)),
                };
                frame.stack.push(result);
            }
            OpCode::UnaryPos => {
                let v = pop(frame, line)?;
                match v {
                    Value::Int(_) | Value::Float(_) => frame.stack.push(v),
                    other => return Err(type_error(format!("operan bukan nombor: {}", other.type_name()), line)),
                }
            }
            OpCode::UnaryNot => {
                let v = pop(frame, line)?;
                frame.stack.push(Value::Bool(!v.is_truthy()));
            }

            OpCode::CompareEq
            | OpCode::CompareNotEq
            | OpCode::CompareLt
            | OpCode::CompareGt
            | OpCode::CompareLtEq
            | OpCode::CompareGtEq
            | OpCode::CompareIn
            | OpCode::CompareIs => {
                let right = pop(frame, line)?;
                let left = pop(frame, line)?;
                let op = cmpop_from_opcode(instr.opcode);
                let result = apply_cmpop(&op, &left, &right, line)?;
                frame.stack.push(Value::Bool(result));
            }

            OpCode::JumpAbsolute => {
                frame.ip = arg as usize;
            }
            OpCode::JumpIfFalse => {
                let v = pop(frame, line)?;
                if !v.is_truthy() {
                    frame.ip = arg as usize;
                }
            }
            OpCode::JumpIfTrue => {
                let v = pop(frame, line)?;
                if v.is_truthy() {
                    frame.ip = arg as usize;
                }
            }
            OpCode::JumpIfFalseOrPop => {
                let truthy = frame.stack.last().ok_or_else(|| stack_underflow(line))?.is_truthy();
                if !truthy {
                    frame.ip = arg as usize;
                } else {
                    frame.stack.pop();
                }
            }
            OpCode::JumpIfTrueOrPop => {
                let truthy = frame.stack.last().ok_or_else(|| stack_underflow(line))?.is_truthy();
                if truthy {
                    frame.ip = arg as usize;
                } else {
                    frame.stack.pop();
                }
            }

            OpCode::GetIter => {
                let v = pop(frame, line)?;
                let items = iter_items(&v, line)?;
                frame.stack.push(Value::Iterator(Rc::new(RefCell::new(IterState { items, index: 0 }))));
            }
            OpCode::ForIter => {
                let top = frame.stack.last().cloned().ok_or_else(|| stack_underflow(line))?;
                match top {
                    Value::Iterator(state) => {
                        let next = {
                            let mut s = state.borrow_mut();
                            if s.index < s.items.len() {
                                let item = s.items[s.index].clone();
                                s.index += 1;
                                Some(item)
                            } else {
                                None
                            }
                        };
                        match next {
                            Some(item) => frame.stack.push(item),
                            None => {
                                frame.stack.pop();
                                frame.ip = arg as usize;
                            }
                        }
                    }
                    other => return Err(type_error(format!("bukan iterator: {}", other.type_name()), line)),
                }
            }

            OpCode::MakeFunction => {
                let n_defaults = arg as usize;
                let code_value = pop(frame, line)?;
                let Value::Code(code_obj) = code_value else {
                    return Err(Error::runtime("MAKE_FUNCTION tanpa kod", line).into());
                };
                let mut defaults = Vec::with_capacity(n_defaults);
                for _ in 0..n_defaults {
                    defaults.push(pop(frame, line)?);
                }
                defaults.reverse();
                let function = Function {
                    name: code_obj.name.clone(),
                    params: code_obj.param_names.clone(),
                    defaults: defaults.into_iter().map(FunctionDefault::Value).collect(),
                    var_args: code_obj.var_args.clone(),
                    kw_args: code_obj.kw_args.clone(),
                    body: FunctionBody::Code(code_obj),
                    closure: Some(frame.env.clone()),
                };
                frame.stack.push(Value::Function(Rc::new(function)));
            }

            OpCode::MakeClass => {
                let item_count = arg as usize;
                let names_value = pop(frame, line)?;
                let name_value = pop(frame, line)?;
                let mut items = Vec::with_capacity(item_count);
                for _ in 0..item_count {
                    items.push(pop(frame, line)?);
                }
                items.reverse();
                let base_value = pop(frame, line)?;

                let Value::Str(class_name) = name_value else {
                    return Err(Error::runtime("MAKE_CLASS tanpa nama", line).into());
                };
                let Value::List(item_names) = names_value else {
                    return Err(Error::runtime("MAKE_CLASS tanpa senarai nama", line).into());
                };
                let item_names = item_names.borrow();
                if item_names.len() != items.len() {
                    return Err(Error::runtime("MAKE_CLASS: nama dan nilai tidak sepadan", line).into());
                }

                let base = match base_value {
                    Value::None => None,
                    Value::Class(c) => Some(c),
                    other => return Err(type_error(format!("asas bukan kelas: {}", other.type_name()), line)),
                };

                let mut methods = Vec::new();
                let mut class_vars = Vec::new();
                for (name_val, value) in item_names.iter().zip(items) {
                    let Value::Str(item_name) = name_val else {
                        return Err(Error::runtime("MAKE_CLASS: nama item bukan str", line).into());
                    };
                    if let Some(stripped) = item_name.strip_prefix("__classvar__") {
                        class_vars.push((stripped.to_string(), value));
                    } else {
                        match value {
                            Value::Function(f) => methods.push((item_name.as_str().to_string(), f)),
                            other => return Err(type_error(format!("kaedah bukan fungsi: {}", other.type_name()), line)),
                        }
                    }
                }
                let class = Class { name: class_name.as_str().to_string(), base, methods, class_vars };
                frame.stack.push(Value::Class(Rc::new(class)));
            }

            OpCode::CallFunction => {
                let n_args = arg as usize;
                let mut args = Vec::with_capacity(n_args);
                for _ in 0..n_args {
                    args.push(pop(frame, line)?);
                }
                args.reverse();
                let callee = pop(frame, line)?;
                let result = self.call_value(&callee, args, Vec::new(), line)?;
                frame.stack.push(result);
            }
            OpCode::CallFunctionKw => {
                let n_positional = arg as usize;
                let names_value = pop(frame, line)?;
                let Value::List(names) = names_value else {
                    return Err(Error::runtime("CALL_FUNCTION_KW tanpa nama", line).into());
                };
                let names = names.borrow().clone();
                let mut kwvals = Vec::with_capacity(names.len());
                for _ in 0..names.len() {
                    kwvals.push(pop(frame, line)?);
                }
                kwvals.reverse();
                let mut kwargs = Vec::with_capacity(names.len());
                for (name_val, value) in names.into_iter().zip(kwvals) {
                    let Value::Str(name) = name_val else {
                        return Err(Error::runtime("nama argumen kata kunci bukan str", line).into());
                    };
                    kwargs.push((name.as_str().to_string(), value));
                }
                let mut args = Vec::with_capacity(n_positional);
                for _ in 0..n_positional {
                    args.push(pop(frame, line)?);
                }
                args.reverse();
                let callee = pop(frame, line)?;
                let result = self.call_value(&callee, args, kwargs, line)?;
                frame.stack.push(result);
            }
            OpCode::ReturnValue => {
                let value = pop(frame, line)?;
                return Ok(StepOutcome::Return(value));
            }

            OpCode::BuildList => {
                let n = arg as usize;
                let items = pop_n(frame, n, line)?;
                frame.stack.push(Value::list(items));
            }
            OpCode::BuildTuple => {
                let n = arg as usize;
                let items = pop_n(frame, n, line)?;
                frame.stack.push(Value::Tuple(Rc::new(items)));
            }
            OpCode::BuildDict => {
                let n = arg as usize;
                let flat = pop_n(frame, n * 2, line)?;
                let pairs: Vec<(Value, Value)> = flat.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
                frame.stack.push(Value::Dict(Rc::new(RefCell::new(pairs))));
            }
            OpCode::BuildFstring => {
                let n = arg as usize;
                let parts = pop_n(frame, n, line)?;
                let joined: String = parts.iter().map(Value::display_str).collect();
                frame.stack.push(Value::str(joined));
            }
            OpCode::BuildSlice => {
                let step = pop(frame, line)?;
                let stop = pop(frame, line)?;
                let start = pop(frame, line)?;
                let conv = |v: Value| -> EvalResult<Option<num_bigint::BigInt>> {
                    match v {
                        Value::Int(i) => Ok(Some(i)),
                        Value::None => Ok(None),
                        other => Err(type_error(format!("indeks petak bukan int: {}", other.type_name()), line)),
                    }
                };
                frame.stack.push(Value::Slice(Rc::new(crate::value::SliceValue {
                    start: conv(start)?,
                    stop: conv(stop)?,
                    step: conv(step)?,
                })));
            }
            OpCode::UnpackSequence => {
                let n = arg as usize;
                let value = pop(frame, line)?;
                let items = unpack(&value, n, line)?;
                for item in items.into_iter().rev() {
                    frame.stack.push(item);
                }
            }
            OpCode::Raise => {
                let value = pop(frame, line)?;
                return Err(Unwind::Exception(RuntimeException::Raised(value), line));
            }
            OpCode::EndFinally => {
                if let Some(exc) = current_exception.take() {
                    return Err(Unwind::Exception(exc, line));
                }
            }
            OpCode::MatchException => {
                let matched = match current_exception.as_ref() {
                    Some(exc) => {
                        if arg == -1 {
                            exc.matches(None)
                        } else {
                            exc.matches(Some(name_at(&frame.code, arg)))
                        }
                    }
                    None => false,
                };
                frame.stack.push(Value::Bool(matched));
            }

            OpCode::ImportModule => {
                let name = name_at(&frame.code, arg).to_string();
                let module = builtins::import_module(&name, line)?;
                frame.stack.push(module);
            }
            OpCode::ImportFrom => {
                let pair = pop(frame, line)?;
                let Value::List(items) = &pair else {
                    return Err(Error::runtime("IMPORT_FROM tanpa pasangan modul/nama", line).into());
                };
                let items = items.borrow();
                let (Value::Str(module_name), Value::Str(attr_name)) = (&items[0], &items[1]) else {
                    return Err(Error::runtime("IMPORT_FROM pasangan tidak sah", line).into());
                };
                let module = builtins::import_module(module_name, line)?;
                let Value::Module(module_val) = &module else {
                    return Err(Error::runtime("import bukan modul", line).into());
                };
                let attr = module_val
                    .attrs
                    .borrow()
                    .iter()
                    .find(|(n, _)| n == attr_name.as_str())
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| Error::runtime(format!("tiada atribut sedemikian: {}", attr_name), line))?;
                frame.stack.push(attr);
            }
        }
        Ok(StepOutcome::Continue)
    }

    fn load_attr(&self, obj: &Value, name: &str, line: u32) -> EvalResult<Value> {
        match obj {
            Value::Instance(inst) => {
                if let Some(v) = inst.borrow().get_attr(name) {
                    return Ok(v);
                }
                if let Some(method) = inst.borrow().class.find_method(name) {
                    return Ok(Value::BoundMethod(inst.clone(), method));
                }
                if let Some(v) = inst.borrow().class.find_class_var(name) {
                    return Ok(v);
                }
                let owner = inst.borrow().class.name.clone();
                Err(attr_error(name, &owner, line))
            }
            Value::Class(class) => {
                if let Some(v) = class.find_class_var(name) {
                    return Ok(v);
                }
                if let Some(method) = class.find_method(name) {
                    return Ok(Value::Function(method));
                }
                Err(attr_error(name, &class.name, line))
            }
            Value::Module(module) => module
                .attrs
                .borrow()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| attr_error(name, &module.name, line)),
            other => Err(attr_error(name, &other.type_name(), line)),
        }
    }

    fn load_index(&self, obj: &Value, idx: &Value, line: u32) -> EvalResult<Value> {
        match (obj, idx) {
            (Value::List(items), Value::Slice(s)) => Ok(crate::slice::slice_list(
                &items.borrow(),
                i64_opt(&s.start, line)?,
                i64_opt(&s.stop, line)?,
                i64_opt(&s.step, line)?,
                line,
            )?),
            (Value::Tuple(items), Value::Slice(s)) => Ok(crate::slice::slice_tuple(
                items,
                i64_opt(&s.start, line)?,
                i64_opt(&s.stop, line)?,
                i64_opt(&s.step, line)?,
                line,
            )?),
            (Value::Str(s), Value::Slice(sl)) => Ok(crate::slice::slice_string(
                s,
                i64_opt(&sl.start, line)?,
                i64_opt(&sl.stop, line)?,
                i64_opt(&sl.step, line)?,
                line,
            )?),
            (Value::List(items), _) => {
                let items = items.borrow();
                let i = list_index(items.len(), idx, line)?;
                Ok(items[i].clone())
            }
            (Value::Tuple(items), _) => {
                let i = list_index(items.len(), idx, line)?;
                Ok(items[i].clone())
            }
            (Value::Str(s), _) => {
                let chars: Vec<char> = s.chars().collect();
                let i = list_index(chars.len(), idx, line)?;
                Ok(Value::str(chars[i].to_string()))
            }
            (Value::Dict(pairs), key) => pairs
                .borrow()
                .iter()
                .find(|(k, _)| k.kilat_eq(key))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| key_error(key.repr_str(), line)),
            (other, _) => Err(type_error(format!("tidak boleh diindeks: {}", other.type_name()), line)),
        }
    }

    fn store_index(&self, obj: &Value, idx: &Value, value: Value, line: u32) -> EvalResult<()> {
        match obj {
            Value::List(items) => {
                let i = list_index(items.borrow().len(), idx, line)?;
                items.borrow_mut()[i] = value;
                Ok(())
            }
            Value::Dict(pairs) => {
                let mut pairs = pairs.borrow_mut();
                if let Some(slot) = pairs.iter_mut().find(|(k, _)| k.kilat_eq(idx)) {
                    slot.1 = value;
                } else {
                    pairs.push((idx.clone(), value));
                }
                Ok(())
            }
            other => Err(type_error(format!("tidak boleh tetapkan indeks pada {}", other.type_name()), line)),
        }
    }

    fn delete_index(&self, obj: &Value, idx: &Value, line: u32) -> EvalResult<()> {
        match obj {
            Value::List(items) => {
                let i = list_index(items.borrow().len(), idx, line)?;
                items.borrow_mut().remove(i);
                Ok(())
            }
            Value::Dict(pairs) => {
                let mut pairs = pairs.borrow_mut();
                let pos = pairs.iter().position(|(k, _)| k.kilat_eq(idx));
                match pos {
                    Some(i) => {
                        pairs.remove(i);
                        Ok(())
                    }
                    None => Err(key_error(idx.repr_str(), line)),
                }
            }
            other => Err(type_error(format!("tidak boleh padam indeks pada {}", other.type_name()), line)),
        }
    }

    fn call_value(&self, callee: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>, line: u32) -> EvalResult<Value> {
        match callee {
            Value::Function(func) => self.call_function(func, None, args, kwargs, line),
            Value::BoundMethod(inst, func) => {
                self.call_function(func, Some(Value::Instance(inst.clone())), args, kwargs, line)
            }
            Value::NativeFunction(_, f) => {
                let caller = |callee: &Value, call_args: &[Value]| -> Result<Value> {
                    match self.call_value(callee, call_args.to_vec(), Vec::new(), line) {
                        Ok(v) => Ok(v),
                        Err(Unwind::Error(e)) => Err(e),
                        Err(Unwind::Exception(exc, exc_line)) => Err(Error::raised(exc.value().display_str(), exc_line)),
                    }
                };
                Ok(f(&args, &caller)?)
            }
            Value::Class(class) => {
                let instance = Rc::new(RefCell::new(Instance { class: class.clone(), attributes: Vec::new() }));
                if let Some(init) = class.find_method("__init__") {
                    self.call_function(&init, Some(Value::Instance(instance.clone())), args, kwargs, line)?;
                }
                Ok(Value::Instance(instance))
            }
            other => Err(type_error(format!("bukan boleh panggil: {}", other.type_name()), line)),
        }
    }

    /// Binds `args`/`kwargs` the same way `interpreter.rs::call_function`
    /// does, then runs the callee's compiled body in a fresh frame. A
    /// `FunctionBody::Tree` callee is unreachable from pure programs — only
    /// `MAKE_FUNCTION` produces VM-callable functions — but is rejected
    /// rather than matched with `unreachable!()`.
    fn call_function(
        &self,
        func: &Rc<Function>,
        bound_self: Option<Value>,
        mut args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        line: u32,
    ) -> EvalResult<Value> {
        if let Some(this) = bound_self {
            args.insert(0, this);
        }
        let call_env = Environment::new(func.closure.clone());
        let n_params = func.params.len();
        let n_defaults = func.defaults.len();
        let n_required = n_params - n_defaults;

        let mut bound = vec![false; n_params];
        let mut idx = 0;
        let mut leftover = Vec::new();
        for value in args {
            if idx < n_params {
                Environment::define(&call_env, &func.params[idx], value);
                bound[idx] = true;
                idx += 1;
            } else {
                leftover.push(value);
            }
        }
        if !leftover.is_empty() {
            match &func.var_args {
                Some(name) => Environment::define(&call_env, name, Value::Tuple(Rc::new(leftover))),
                None => return Err(Error::runtime(format!("terlalu banyak argumen kepada '{}'", func.name), line).into()),
            }
        } else if let Some(name) = &func.var_args {
            Environment::define(&call_env, name, Value::Tuple(Rc::new(Vec::new())));
        }

        let mut extra_kwargs = Vec::new();
        for (name, value) in kwargs {
            if let Some(p) = func.params.iter().position(|p| *p == name) {
                Environment::define(&call_env, &name, value);
                bound[p] = true;
            } else {
                extra_kwargs.push((name, value));
            }
        }
        if !extra_kwargs.is_empty() {
            match &func.kw_args {
                Some(name) => {
                    let dict = Value::Dict(Rc::new(RefCell::new(
                        extra_kwargs.into_iter().map(|(k, v)| (Value::str(k), v)).collect(),
                    )));
                    Environment::define(&call_env, name, dict);
                }
                None => {
                    return Err(Error::runtime(format!("argumen kata kunci tidak dikenali kepada '{}'", func.name), line).into())
                }
            }
        } else if let Some(name) = &func.kw_args {
            Environment::define(&call_env, name, Value::Dict(Rc::new(RefCell::new(Vec::new()))));
        }

        for (offset, default) in func.defaults.iter().enumerate() {
            let param_idx = n_required + offset;
            if !bound[param_idx] {
                let value = match default {
                    FunctionDefault::Value(v) => v.clone(),
                    FunctionDefault::Expr(_) => {
                        return Err(Error::runtime("lalai ungkapan tidak disokong oleh VM", line).into())
                    }
                };
                Environment::define(&call_env, &func.params[param_idx], value);
                bound[param_idx] = true;
            }
        }

        if let Some(missing) = bound.iter().position(|b| !b) {
            return Err(Error::runtime(
                format!("argumen diperlukan hilang: '{}' untuk '{}'", func.params[missing], func.name),
                line,
            )
            .into());
        }

        let code = match &func.body {
            FunctionBody::Code(c) => c.clone(),
            FunctionBody::Tree(_) => return Err(Error::runtime("fungsi pepohon tidak disokong oleh VM", line).into()),
        };
        let mut new_frame = Frame { code, ip: 0, env: call_env, stack: Vec::new(), try_stack: Vec::new() };
        self.run_frame(&mut new_frame)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn name_at(code: &CodeObject, idx: i16) -> &str {
    &code.names[idx as usize]
}

fn pop(frame: &mut Frame, line: u32) -> EvalResult<Value> {
    frame.stack.pop().ok_or_else(|| stack_underflow(line))
}

fn pop_n(frame: &mut Frame, n: usize, line: u32) -> EvalResult<Vec<Value>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(pop(frame, line)?);
    }
    out.reverse();
    Ok(out)
}

fn unpack(value: &Value, count: usize, line: u32) -> Result<Vec<Value>> {
    let items: Vec<Value> = match value {
        Value::Tuple(items) => items.as_ref().clone(),
        Value::List(items) => items.borrow().clone(),
        other => return Err(Error::runtime(format!("tidak boleh dinyahbungkus: {}", other.type_name()), line)),
    };
    if items.len() != count {
        return Err(Error::runtime(format!("dijangka {} nilai, dapat {}", count, items.len()), line));
    }
    Ok(items)
}

fn iter_items(value: &Value, line: u32) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.as_ref().clone()),
        Value::Set(items) => Ok(items.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(pairs) => Ok(pairs.borrow().iter().map(|(k, _)| k.clone()).collect()),
        other => Err(Error::runtime(format!("bukan boleh lelar: {}", other.type_name()), line)),
    }
}

fn list_index(len: usize, idx: &Value, line: u32) -> Result<usize> {
    use num_traits::ToPrimitive;
    let Value::Int(i) = idx else {
        return Err(Error::runtime(format!("indeks bukan int: {}", idx.type_name()), line));
    };
    let i = i.to_i64().ok_or_else(|| Error::runtime("indeks terlalu besar", line))?;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved as usize >= len {
        return Err(index_error(line));
    }
    Ok(resolved as usize)
}

fn i64_opt(v: &Option<num_bigint::BigInt>, line: u32) -> Result<Option<i64>> {
    use num_traits::ToPrimitive;
    match v {
        Some(i) => Ok(Some(i.to_i64().ok_or_else(|| Error::runtime("indeks petak terlalu besar", line))?)),
        None => Ok(None),
    }
}

fn binop_from_opcode(op: OpCode) -> BinOp {
    match op {
        OpCode::BinaryAdd => BinOp::Add,
        OpCode::BinarySub => BinOp::Sub,
        OpCode::BinaryMul => BinOp::Mul,
        OpCode::BinaryDiv => BinOp::Div,
        OpCode::BinaryFloorDiv => BinOp::FloorDiv,
        OpCode::BinaryMod => BinOp::Mod,
        OpCode::BinaryPow => BinOp::Pow,
        _ => unreachable!("binop_from_opcode called with a non-binary opcode"),
    }
}

fn aug_binop(op: OpCode) -> BinOp {
    match op {
        OpCode::AugAdd => BinOp::Add,
        OpCode::AugSub => BinOp::Sub,
        OpCode::AugMul => BinOp::Mul,
        OpCode::AugDiv => BinOp::Div,
        OpCode::AugFloorDiv => BinOp::FloorDiv,
        OpCode::AugMod => BinOp::Mod,
        OpCode::AugPow => BinOp::Pow,
        _ => unreachable!("aug_binop called with a non-augmented opcode"),
    }
}

fn cmpop_from_opcode(op: OpCode) -> CmpOp {
    match op {
        OpCode::CompareEq => CmpOp::Eq,
        OpCode::CompareNotEq => CmpOp::NotEq,
        OpCode::CompareLt => CmpOp::Lt,
        OpCode::CompareGt => CmpOp::Gt,
        OpCode::CompareLtEq => CmpOp::LtEq,
        OpCode::CompareGtEq => CmpOp::GtEq,
        OpCode::CompareIn => CmpOp::In,
        OpCode::CompareIs => CmpOp::Is,
        _ => unreachable!("cmpop_from_opcode called with a non-comparison opcode"),
    }
}

fn stack_underflow(line: u32) -> Unwind {
    Unwind::Error(Error::runtime("timbunan operan kosong", line))
}

fn type_error(msg: impl Into<String>, line: u32) -> Unwind {
    Unwind::Exception(RuntimeException::Builtin(ExceptionKind::JenisRalat, msg.into()), line)
}

fn attr_error(attr: &str, owner: &str, line: u32) -> Unwind {
    Unwind::Exception(
        RuntimeException::Builtin(ExceptionKind::AtributRalat, format!("'{}' tiada atribut '{}'", owner, attr)),
        line,
    )
}

fn key_error(key: String, line: u32) -> Unwind {
    Unwind::Exception(RuntimeException::Builtin(ExceptionKind::KunciRalat, key), line)
}

fn index_error(line: u32) -> Unwind {
    Unwind::Exception(RuntimeException::Builtin(ExceptionKind::IndeksRalat, "indeks luar julat".to_string()), line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run_and_capture(src: &str) -> String {
        let program = Parser::parse_program(src).unwrap();
        let code = Rc::new(crate::compiler::compile(&program).unwrap());
        let vm = Vm::new();
        let out = Rc::new(RefCell::new(String::new()));
        builtins::with_test_output(&vm.globals, out.clone());
        vm.run(code).unwrap();
        out.borrow().clone()
    }

    #[test]
    fn hello_world() {
        assert_eq!(run_and_capture("cetak(\"Salam, Dunia!\")\n"), "Salam, Dunia!\n");
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run_and_capture("cetak(2 + 3 * 4)\ncetak(2 ** 3 ** 2)\n"), "14\n512\n");
    }

    #[test]
    fn function_default_and_closure() {
        let src = "fungsi buat(n=10):\n    fungsi dalaman(x):\n        kembali x + n\n    kembali dalaman\nf = buat()\ncetak(f(5))\n";
        assert_eq!(run_and_capture(src), "15\n");
    }

    #[test]
    fn exception_handling() {
        let src = "cuba:\n    bangkit \"ralat\"\ntangkap sebagai e:\n    cetak(\"tangkap:\", e)\nakhirnya:\n    cetak(\"akhir\")\n";
        assert_eq!(run_and_capture(src), "tangkap: ralat\nakhir\n");
    }

    #[test]
    fn finally_runs_when_no_exception() {
        let src = "cuba:\n    cetak(\"cuba\")\nakhirnya:\n    cetak(\"akhir\")\n";
        assert_eq!(run_and_capture(src), "cuba\nakhir\n");
    }

    #[test]
    fn class_and_inheritance() {
        let src = "kelas A:\n    fungsi __init__(diri, x): diri.x = x\n    fungsi bagi(diri): kembali diri.x\nkelas B(A):\n    fungsi bagi(diri): kembali diri.x * 2\ncetak(B(7).bagi())\n";
        assert_eq!(run_and_capture(src), "14\n");
    }

    #[test]
    fn for_loop_and_list_comp() {
        let src = "x = [n * n untuk n dalam julat(4)]\nuntuk diulang v dalam x:\n    cetak(v)\n";
        assert_eq!(run_and_capture(src), "0\n1\n4\n9\n");
    }

    #[test]
    fn break_and_continue_in_while() {
        let src = "n = 0\nselagi benar:\n    n = n + 1\n    jika n == 2:\n        teruskan\n    jika n >= 4:\n        berhenti\n    cetak(n)\n";
        assert_eq!(run_and_capture(src), "1\n3\n");
    }
}
