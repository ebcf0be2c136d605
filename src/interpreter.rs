//! The tree-walking interpreter (C4): evaluates the AST directly over an
//! `Environment` chain. Grounded on `kilat_interpreter.py`'s mutually
//! recursive `execute`/`eval` pair.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{BinOp, Block, ClassDef, CmpOp, Expr, FStringPart, FunctionDef, Params, Stmt};
use crate::builtins;
use crate::class::{Class, Instance};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::exception::{ExceptionKind, RuntimeException};
use crate::operators::{apply_binop, apply_cmpop};
use crate::value::{Function, FunctionBody, FunctionDefault, Value};

/// Non-local exits out of a statement sequence: a loop break/continue or a
/// function return. Ordinary statements resolve to `Normal`.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// A `bangkit`-style control transfer carrying the in-flight exception,
/// distinct from `Error` (a hard pipeline failure) so a `Try` can catch it
/// while a malformed-program `Error` still propagates untouched.
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

pub struct Interpreter {
    pub globals: Rc<RefCell<Environment>>,
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Environment::new(None);
        builtins::install(&globals);
        Interpreter { globals }
    }

    pub fn run(&self, program: &crate::ast::Program) -> Result<()> {
        match self.exec_block(&program.stmts, &self.globals) {
            Ok(_) => Ok(()),
            Err(Unwind::Error(e)) => Err(e),
            Err(Unwind::Exception(exc, line)) => Err(Error::raised(exc.value().display_str(), line)),
        }
    }

    /// Evaluates a single free-standing expression against the persistent
    /// global scope. Used by the REPL to print a bare expression's value
    /// without folding it into a `Pop`-discarded `ExprStmt`.
    pub fn eval_expr(&self, expr: &Expr) -> Result<Value> {
        match self.eval(expr, &self.globals) {
            Ok(v) => Ok(v),
            Err(Unwind::Error(e)) => Err(e),
            Err(Unwind::Exception(exc, line)) => Err(Error::raised(exc.value().display_str(), line)),
        }
    }

    fn exec_block(&self, block: &Block, env: &Rc<RefCell<Environment>>) -> EvalResult<Flow> {
        for stmt in block {
            match stmt {
                Stmt::Global(_, pos) | Stmt::Nonlocal(_, pos) if Environment::is_scope_closed(env) => {
                    return Err(Error::runtime(
                        "pengisytiharan global/nonlokal mesti sebelum pernyataan lain dalam skop",
                        pos.line,
                    )
                    .into());
                }
                Stmt::Global(..) | Stmt::Nonlocal(..) => {}
                _ => Environment::close_scope(env),
            }
            match self.execute(stmt, env)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn execute(&self, stmt: &Stmt, env: &Rc<RefCell<Environment>>) -> EvalResult<Flow> {
        match stmt {
            Stmt::ExprStmt(expr, _) => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign(name, expr, _) => {
                let value = self.eval(expr, env)?;
                Environment::define(env, name, value);
                Ok(Flow::Normal)
            }
            Stmt::AugAssign(name, op, expr, pos) => {
                let rhs = self.eval(expr, env)?;
                let current = Environment::get(env, name, pos.line)?;
                let result = apply_binop(op, &current, &rhs, pos.line)?;
                Environment::set_existing(env, name, result, pos.line)?;
                Ok(Flow::Normal)
            }
            Stmt::AttrAssign(obj_expr, attr, expr, pos) => {
                let obj = self.eval(obj_expr, env)?;
                let value = self.eval(expr, env)?;
                match &obj {
                    Value::Instance(inst) => {
                        inst.borrow_mut().set_attr(attr, value);
                        Ok(Flow::Normal)
                    }
                    other => Err(type_error(format!("tidak boleh tetapkan atribut pada {}", other.type_name()), pos.line)),
                }
            }
            Stmt::IndexAssign(obj_expr, idx_expr, expr, pos) => {
                let obj = self.eval(obj_expr, env)?;
                let idx = self.eval(idx_expr, env)?;
                let value = self.eval(expr, env)?;
                self.store_index(&obj, &idx, value, pos.line)?;
                Ok(Flow::Normal)
            }
            Stmt::MultiAssign(names, expr, pos) => {
                let value = self.eval(expr, env)?;
                let items = unpack(&value, names.len(), pos.line)?;
                for (name, v) in names.iter().zip(items) {
                    Environment::define(env, name, v);
                }
                Ok(Flow::Normal)
            }
            Stmt::If(cond, then_body, elifs, else_body, _) => {
                if self.eval(cond, env)?.is_truthy() {
                    return self.exec_block(then_body, env);
                }
                for (elif_cond, elif_body) in elifs {
                    if self.eval(elif_cond, env)?.is_truthy() {
                        return self.exec_block(elif_body, env);
                    }
                }
                if let Some(body) = else_body {
                    return self.exec_block(body, env);
                }
                Ok(Flow::Normal)
            }
            Stmt::While(cond, body, _) => {
                while self.eval(cond, env)?.is_truthy() {
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        other @ Flow::Return(_) => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For(vars, iter_expr, body, pos) => {
                let iterable = self.eval(iter_expr, env)?;
                let items = iter_items(&iterable, pos.line)?;
                for item in items {
                    if vars.len() == 1 {
                        Environment::define(env, &vars[0], item);
                    } else {
                        let unpacked = unpack(&item, vars.len(), pos.line)?;
                        for (name, v) in vars.iter().zip(unpacked) {
                            Environment::define(env, name, v);
                        }
                    }
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        other @ Flow::Return(_) => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),
            Stmt::Return(expr, _) => {
                let value = match expr {
                    Some(e) => self.eval(e, env)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Pass(_) => Ok(Flow::Normal),
            Stmt::Delete(target, pos) => {
                self.delete_target(target, env, pos.line)?;
                Ok(Flow::Normal)
            }
            Stmt::Global(names, _) => {
                for name in names {
                    Environment::declare_global(env, name);
                }
                Ok(Flow::Normal)
            }
            Stmt::Nonlocal(names, _) => {
                for name in names {
                    Environment::declare_nonlocal(env, name);
                }
                Ok(Flow::Normal)
            }
            Stmt::Try(body, handlers, finally, pos) => self.exec_try(body, handlers, finally, env, pos.line),
            Stmt::Raise(expr, pos) => {
                let value = self.eval(expr, env)?;
                Err(Unwind::Exception(RuntimeException::Raised(value), pos.line))
            }
            Stmt::Import(module, alias, pos) => {
                let m = builtins::import_module(module, pos.line)?;
                let bound_name = alias.clone().unwrap_or_else(|| module.clone());
                Environment::define(env, &bound_name, m);
                Ok(Flow::Normal)
            }
            Stmt::FromImport(module, names, aliases, pos) => {
                let m = builtins::import_module(module, pos.line)?;
                let Value::Module(module_val) = &m else { unreachable!() };
                for (name, alias) in names.iter().zip(aliases) {
                    let attr = module_val
                        .attrs
                        .borrow()
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| Error::runtime(format!("tiada atribut sedemikian: {}", name), pos.line))?;
                    let bound_name = alias.clone().unwrap_or_else(|| name.clone());
                    Environment::define(env, &bound_name, attr);
                }
                Ok(Flow::Normal)
            }
            Stmt::With(ctx_expr, alias, body, pos) => {
                let ctx = self.eval(ctx_expr, env)?;
                if let Some(name) = alias {
                    Environment::define(env, name, ctx);
                }
                self.exec_block(body, env)
            }
            Stmt::Yield(_, pos) => Err(Error::compile("berikan tidak disokong oleh jurubahasa pepohon", pos.line).into()),
            Stmt::FunctionDef(def) => {
                let func = self.make_function(def, env);
                let decorated = self.apply_decorators(&def.decorators, func, env, def.pos.line)?;
                Environment::define(env, &def.name, decorated);
                Ok(Flow::Normal)
            }
            Stmt::ClassDef(def) => {
                let class = self.make_class(def, env)?;
                let decorated = self.apply_decorators(&def.decorators, Value::Class(class), env, def.pos.line)?;
                Environment::define(env, &def.name, decorated);
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_try(
        &self,
        body: &Block,
        handlers: &[crate::ast::Handler],
        finally: &Option<Block>,
        env: &Rc<RefCell<Environment>>,
        line: u32,
    ) -> EvalResult<Flow> {
        let outcome = self.exec_block(body, env);
        let result = match outcome {
            Ok(flow) => Ok(flow),
            Err(Unwind::Exception(exc, exc_line)) => {
                let mut handled = None;
                for handler in handlers {
                    if exc.matches(handler.type_name.as_deref()) {
                        let handler_env = Environment::new(Some(env.clone()));
                        if let Some(alias) = &handler.alias {
                            Environment::define(&handler_env, alias, exc.value());
                        }
                        handled = Some(self.exec_block(&handler.body, &handler_env));
                        break;
                    }
                }
                match handled {
                    Some(r) => r,
                    None => Err(Unwind::Exception(exc, exc_line)),
                }
            }
            Err(e @ Unwind::Error(_)) => Err(e),
        };
        if let Some(finally_body) = finally {
            match self.exec_block(finally_body, env)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        let _ = line;
        result
    }

    fn delete_target(&self, target: &Expr, env: &Rc<RefCell<Environment>>, line: u32) -> EvalResult<()> {
        match target {
            Expr::Identifier(name, _) => Ok(Environment::delete(env, name, line)?),
            Expr::Index(obj_expr, idx_expr, _) => {
                let obj = self.eval(obj_expr, env)?;
                let idx = self.eval(idx_expr, env)?;
                self.delete_index(&obj, &idx, line)
            }
            _ => Err(Error::runtime("sasaran padam tidak sah", line).into()),
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

    fn make_function(&self, def: &FunctionDef, env: &Rc<RefCell<Environment>>) -> Value {
        Value::Function(Rc::new(build_function(&def.name, &def.params, def.body.clone(), env)))
    }

    fn make_class(&self, def: &ClassDef, env: &Rc<RefCell<Environment>>) -> EvalResult<Rc<Class>> {
        let base = match &def.base {
            Some(name) => match Environment::get(env, name, def.pos.line)? {
                Value::Class(c) => Some(c),
                other => return Err(type_error(format!("asas bukan kelas: {}", other.type_name()), def.pos.line)),
            },
            None => None,
        };
        let class_env = Environment::new(Some(env.clone()));
        let mut methods = Vec::new();
        let mut class_vars = Vec::new();
        for stmt in &def.body {
            match stmt {
                Stmt::FunctionDef(method_def) => {
                    let func = build_function(&method_def.name, &method_def.params, method_def.body.clone(), &class_env);
                    methods.push((method_def.name.clone(), Rc::new(func)));
                }
                Stmt::Assign(name, expr, _) => {
                    let value = self.eval(expr, &class_env)?;
                    class_vars.push((name.clone(), value));
                }
                Stmt::Pass(_) => {}
                other => {
                    self.execute(other, &class_env)?;
                }
            }
        }
        Ok(Rc::new(Class { name: def.name.clone(), base, methods, class_vars }))
    }

    fn apply_decorators(
        &self,
        decorators: &[Expr],
        mut value: Value,
        env: &Rc<RefCell<Environment>>,
        line: u32,
    ) -> EvalResult<Value> {
        for deco_expr in decorators.iter().rev() {
            let deco = self.eval(deco_expr, env)?;
            value = self.call_value(&deco, vec![value], Vec::new(), line)?;
        }
        Ok(value)
    }

    fn eval(&self, expr: &Expr, env: &Rc<RefCell<Environment>>) -> EvalResult<Value> {
        match expr {
            Expr::Number(lit, _) => Ok(match lit {
                crate::ast::NumberLit::Int(i) => Value::Int(i.clone()),
                crate::ast::NumberLit::Float(f) => Value::Float(*f),
            }),
            Expr::Str(s, _) => Ok(Value::str(s.clone())),
            Expr::Bool(b, _) => Ok(Value::Bool(*b)),
            Expr::None(_) => Ok(Value::None),
            Expr::FString(parts, pos) => self.eval_fstring(parts, env, pos.line),
            Expr::Identifier(name, pos) => Ok(Environment::get(env, name, pos.line)?),
            Expr::List(elems, _) => {
                let mut out = Vec::with_capacity(elems.len());
                for e in elems {
                    out.push(self.eval(e, env)?);
                }
                Ok(Value::list(out))
            }
            Expr::Tuple(elems, _) => {
                let mut out = Vec::with_capacity(elems.len());
                for e in elems {
                    out.push(self.eval(e, env)?);
                }
                Ok(Value::Tuple(Rc::new(out)))
            }
            Expr::Dict(pairs, _) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    out.push((self.eval(k, env)?, self.eval(v, env)?));
                }
                Ok(Value::Dict(Rc::new(RefCell::new(out))))
            }
            Expr::Slice(start, stop, step, pos) => {
                let conv = |e: &Option<Box<Expr>>| -> EvalResult<Option<num_bigint::BigInt>> {
                    match e {
                        Some(expr) => match self.eval(expr, env)? {
                            Value::Int(i) => Ok(Some(i)),
                            Value::None => Ok(None),
                            other => Err(type_error(format!("indeks petak bukan int: {}", other.type_name()), pos.line)),
                        },
                        None => Ok(None),
                    }
                };
                Ok(Value::Slice(Rc::new(crate::value::SliceValue {
                    start: conv(start)?,
                    stop: conv(stop)?,
                    step: conv(step)?,
                })))
            }
            Expr::Binary(op, l, r, pos) => {
                if matches!(op, BinOp::And) {
                    let left = self.eval(l, env)?;
                    return if !left.is_truthy() { Ok(left) } else { self.eval(r, env) };
                }
                if matches!(op, BinOp::Or) {
                    let left = self.eval(l, env)?;
                    return if left.is_truthy() { Ok(left) } else { self.eval(r, env) };
                }
                let left = self.eval(l, env)?;
                let right = self.eval(r, env)?;
                Ok(apply_binop(op, &left, &right, pos.line)?)
            }
            Expr::Compare(first, rest, pos) => {
                let mut left = self.eval(first, env)?;
                for (op, rhs_expr) in rest {
                    let right = self.eval(rhs_expr, env)?;
                    if !apply_cmpop(op, &left, &right, pos.line)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Unary(op, e, pos) => {
                let v = self.eval(e, env)?;
                Ok(match op {
                    crate::ast::UnaryOp::Not => Value::Bool(!v.is_truthy()),
                    crate::ast::UnaryOp::Neg => match v {
                        Value::Int(i) => Value::Int(-i),
                        Value::Float(f) => Value::Float(-f),
                        other => return Err(type_error(format!("tidak boleh negatifkan {}", other.type_name()), pos.line)),
                    },
                    crate::ast::UnaryOp::Pos => match v {
                        Value::Int(_) | Value::Float(_) => v,
                        other => return Err(type_error(format!("operan bukan nombor: {}", other.type_name()), pos.line)),
                    },
                })
            }
            Expr::Ternary(true_val, cond, false_val, _) => {
                if self.eval(cond, env)?.is_truthy() {
                    self.eval(true_val, env)
                } else {
                    self.eval(false_val, env)
                }
            }
            Expr::Lambda(params, body, pos) => {
                let block = vec![Stmt::Return(Some((**body).clone()), pos.clone())];
                Ok(Value::Function(Rc::new(build_function("<lambda>", params, Rc::new(block), env))))
            }
            Expr::Attribute(obj_expr, name, pos) => {
                let obj = self.eval(obj_expr, env)?;
                self.load_attr(&obj, name, pos.line)
            }
            Expr::Index(obj_expr, idx_expr, pos) => {
                let obj = self.eval(obj_expr, env)?;
                let idx = self.eval(idx_expr, env)?;
                self.load_index(&obj, &idx, pos.line)
            }
            Expr::Call(callee_expr, args, kwargs, pos) => {
                let (callee, bound_self) = self.eval_callee(callee_expr, env)?;
                let mut arg_values = Vec::with_capacity(args.len() + bound_self.is_some() as usize);
                if let Some(this) = bound_self {
                    arg_values.push(this);
                }
                for a in args {
                    arg_values.push(self.eval(a, env)?);
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (name, e) in kwargs {
                    kwarg_values.push((name.clone(), self.eval(e, env)?));
                }
                self.call_value(&callee, arg_values, kwarg_values, pos.line)
            }
            Expr::ListComp(expr, vars, iter_expr, cond, pos) => {
                let iterable = self.eval(iter_expr, env)?;
                let items = iter_items(&iterable, pos.line)?;
                let comp_env = Environment::new(Some(env.clone()));
                let mut out = Vec::new();
                for item in items {
                    if vars.len() == 1 {
                        Environment::define(&comp_env, &vars[0], item);
                    } else {
                        let unpacked = unpack(&item, vars.len(), pos.line)?;
                        for (name, v) in vars.iter().zip(unpacked) {
                            Environment::define(&comp_env, name, v);
                        }
                    }
                    if let Some(cond_expr) = cond {
                        if !self.eval(cond_expr, &comp_env)?.is_truthy() {
                            continue;
                        }
                    }
                    out.push(self.eval(expr, &comp_env)?);
                }
                Ok(Value::list(out))
            }
        }
    }

    /// Evaluates the callee of a `Call` node, returning a bound-`self` value
    /// when the callee is `obj.method` and `method` resolves to the class's
    /// method table rather than an instance attribute.
    fn eval_callee(&self, callee_expr: &Expr, env: &Rc<RefCell<Environment>>) -> EvalResult<(Value, Option<Value>)> {
        if let Expr::Attribute(obj_expr, name, pos) = callee_expr {
            let obj = self.eval(obj_expr, env)?;
            if let Value::Instance(inst) = &obj {
                if inst.borrow().get_attr(name).is_none() {
                    if let Some(method) = inst.borrow().class.find_method(name) {
                        return Ok((Value::Function(method), Some(obj.clone())));
                    }
                }
            }
            return Ok((self.load_attr(&obj, name, pos.line)?, None));
        }
        Ok((self.eval(callee_expr, env)?, None))
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
                Err(attr_error(name, &inst.borrow().class.name, line))
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

    fn eval_fstring(&self, parts: &[FStringPart], env: &Rc<RefCell<Environment>>, line: u32) -> EvalResult<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(s) => out.push_str(s),
                FStringPart::Expr(e) => out.push_str(&self.eval(e, env)?.display_str()),
            }
        }
        let _ = line;
        Ok(Value::str(out))
    }

    pub fn call_value(&self, callee: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>, line: u32) -> EvalResult<Value> {
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

        let positional = args.into_iter();
        let mut bound = vec![false; n_params];
        let mut idx = 0;
        let mut leftover = Vec::new();
        for value in positional {
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
                    return Err(Error::runtime(
                        format!("argumen kata kunci tidak dikenali kepada '{}'", func.name),
                        line,
                    )
                    .into())
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
                    FunctionDefault::Expr(e) => {
                        let defining_scope = func.closure.clone().unwrap_or_else(|| self.globals.clone());
                        self.eval(e, &defining_scope)?
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

        let body = match &func.body {
            FunctionBody::Tree(block) => block.clone(),
            FunctionBody::Code(_) => return Err(Error::runtime("fungsi kod tidak disokong oleh jurubahasa pepohon", line).into()),
        };

        match self.exec_block(&body, &call_env)? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn build_function(name: &str, params: &Params, body: Rc<Block>, env: &Rc<RefCell<Environment>>) -> Function {
    Function {
        name: name.to_string(),
        params: params
            .required
            .iter()
            .cloned()
            .chain(params.defaulted.iter().map(|(n, _)| n.clone()))
            .collect(),
        defaults: params.defaulted.iter().map(|(_, e)| FunctionDefault::Expr(Rc::new(e.clone()))).collect(),
        var_args: params.var_args.clone(),
        kw_args: params.kw_args.clone(),
        body: FunctionBody::Tree(body),
        closure: Some(env.clone()),
    }
}

fn unpack(value: &Value, count: usize, line: u32) -> Result<Vec<Value>> {
    let items: Vec<Value> = match value {
        Value::Tuple(items) => items.as_ref().clone(),
        Value::List(items) => items.borrow().clone(),
        other => return Err(type_error_plain(format!("tidak boleh dinyahbungkus: {}", other.type_name()), line)),
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
        other => Err(type_error_plain(format!("bukan boleh lelar: {}", other.type_name()), line)),
    }
}

fn list_index(len: usize, idx: &Value, line: u32) -> Result<usize> {
    use num_traits::ToPrimitive;
    let Value::Int(i) = idx else {
        return Err(type_error_plain(format!("indeks bukan int: {}", idx.type_name()), line));
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

fn type_error(msg: impl Into<String>, line: u32) -> Unwind {
    Unwind::Exception(RuntimeException::Builtin(ExceptionKind::JenisRalat, msg.into()), line)
}

fn type_error_plain(msg: impl Into<String>, line: u32) -> Error {
    Error::runtime(msg, line)
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
        let interp = Interpreter::new();
        let out = Rc::new(RefCell::new(String::new()));
        builtins::with_test_output(&interp.globals, out.clone());
        interp.run(&program).unwrap();
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
    fn class_and_inheritance() {
        let src = "kelas A:\n    fungsi __init__(self, x): self.x = x\n    fungsi bagi(self): kembali self.x\nkelas B(A):\n    fungsi bagi(self): kembali self.x * 2\ncetak(B(7).bagi())\n";
        assert_eq!(run_and_capture(src), "14\n");
    }
}
