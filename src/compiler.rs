//! The bytecode compiler (C5): lowers the AST into a `CodeObject` tree.
//! Grounded on `kilat_compiler.py`'s `KilatBytecodeCompiler`, with its
//! class/kwarg/exception-handling protocols followed closely enough that
//! `vm.rs` can consume them the way `kilat_vm.py` does, and a handful of
//! deliberate generalisations recorded in `DESIGN.md` (a `akhirnya` that
//! always runs, `wujud luar` closure-write support via `StoreName` reusing
//! `Environment::set_existing`, and chained comparisons, which the
//! reference compiler never had to lower at all).

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{
    BinOp, Block, ClassDef, CmpOp, Expr, FStringPart, FunctionDef, Handler, Params, Program, Stmt,
    UnaryOp,
};
use crate::bytecode::{CodeObject, Instruction, OpCode};
use crate::error::{Error, Result};
use crate::value::Value;

/// A lexically enclosing loop: `berhenti`/`teruskan` patch against these.
struct LoopCtx {
    start: usize,
    break_patches: Vec<usize>,
    is_for: bool,
}

pub struct Compiler {
    code: CodeObject,
    loops: Vec<LoopCtx>,
    /// Names declared `global` in this function's scope; loads/stores of
    /// them route through `LOAD_GLOBAL`/`STORE_GLOBAL` instead of the
    /// current-scope opcodes. Compile-time only, fresh per function.
    globals: HashSet<String>,
    /// Names declared `wujud luar` (nonlocal): plain assignment of these
    /// routes through `STORE_NAME` (walk to the existing binding) instead of
    /// `STORE_NAME_DEFINE`, since there is no separate opcode for it.
    nonlocals: HashSet<String>,
    /// Set once any statement other than `global`/`nonlokal` has been
    /// compiled anywhere in this scope; a later `Global`/`Nonlocal` is a
    /// compile error (late declaration).
    scope_closed: bool,
    synth_counter: u32,
}

/// Compiles a whole program into its module-level `CodeObject`.
pub fn compile(program: &Program) -> Result<CodeObject> {
    let mut c = Compiler::new("<modul>");
    c.compile_block(&program.stmts)?;
    let none_idx = c.add_const(Value::None, 0)?;
    c.emit(OpCode::LoadConst, none_idx, 0);
    c.emit(OpCode::ReturnValue, 0, 0);
    Ok(c.code)
}

/// Compiles one free-standing expression to a `CodeObject` that pushes its
/// value and returns it, without the trailing-`None` wrapping `compile`
/// gives a whole module. Used by the REPL's bytecode mode to print a bare
/// expression's value.
pub fn compile_expr_standalone(expr: &Expr) -> Result<CodeObject> {
    let mut c = Compiler::new("<ungkapan>");
    c.compile_expr(expr)?;
    c.emit(OpCode::ReturnValue, 0, 0);
    Ok(c.code)
}

impl Compiler {
    fn new(name: impl Into<String>) -> Self {
        Compiler {
            code: CodeObject::new(name),
            loops: Vec::new(),
            globals: HashSet::new(),
            nonlocals: HashSet::new(),
            scope_closed: false,
            synth_counter: 0,
        }
    }

    fn synth_name(&mut self, prefix: &str) -> String {
        self.synth_counter += 1;
        format!("{prefix}{}", self.synth_counter)
    }

    fn emit(&mut self, op: OpCode, arg: i16, line: u32) -> usize {
        let idx = self.code.current_offset();
        self.code.instructions.push(Instruction::new(op, arg, line as u16));
        idx
    }

    fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.emit(op, 0, line)
    }

    fn patch_jump(&mut self, idx: usize) {
        let target = self.code.current_offset();
        self.code.instructions[idx].arg = target as i16;
    }

    fn patch_jump_to(&mut self, idx: usize, target: usize) {
        self.code.instructions[idx].arg = target as i16;
    }

    fn add_const(&mut self, value: Value, line: u32) -> Result<i16> {
        self.code.add_const(value).map_err(|m| Error::compile(m, line))
    }

    fn add_name(&mut self, name: &str, line: u32) -> Result<i16> {
        self.code.add_name(name).map_err(|m| Error::compile(m, line))
    }

    fn compile_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            match stmt {
                Stmt::Global(_, pos) | Stmt::Nonlocal(_, pos) if self.scope_closed => {
                    return Err(Error::compile(
                        "pengisytiharan global/nonlokal mesti sebelum pernyataan lain dalam skop",
                        pos.line,
                    ));
                }
                Stmt::Global(..) | Stmt::Nonlocal(..) => {}
                _ => self.scope_closed = true,
            }
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::ExprStmt(expr, pos) => {
                self.compile_expr(expr)?;
                self.emit(OpCode::PopTop, 0, pos.line);
                Ok(())
            }
            Stmt::Assign(name, expr, pos) => {
                self.compile_expr(expr)?;
                let idx = self.add_name(name, pos.line)?;
                if self.globals.contains(name) {
                    self.emit(OpCode::StoreGlobal, idx, pos.line);
                } else if self.nonlocals.contains(name) {
                    self.emit(OpCode::StoreName, idx, pos.line);
                } else {
                    self.emit(OpCode::StoreNameDefine, idx, pos.line);
                }
                Ok(())
            }
            Stmt::AugAssign(name, op, expr, pos) => {
                self.compile_expr(expr)?;
                let idx = self.add_name(name, pos.line)?;
                let opcode = aug_opcode(op, pos.line)?;
                self.emit(opcode, idx, pos.line);
                Ok(())
            }
            Stmt::AttrAssign(obj, name, expr, pos) => {
                self.compile_expr(obj)?;
                self.compile_expr(expr)?;
                let idx = self.add_name(name, pos.line)?;
                self.emit(OpCode::StoreAttr, idx, pos.line);
                Ok(())
            }
            Stmt::IndexAssign(obj, index, expr, pos) => {
                self.compile_expr(obj)?;
                self.compile_expr(index)?;
                self.compile_expr(expr)?;
                self.emit(OpCode::StoreIndex, 0, pos.line);
                Ok(())
            }
            Stmt::MultiAssign(names, expr, pos) => {
                self.compile_expr(expr)?;
                self.emit(OpCode::UnpackSequence, names.len() as i16, pos.line);
                for name in names {
                    let idx = self.add_name(name, pos.line)?;
                    if self.globals.contains(name) {
                        self.emit(OpCode::StoreGlobal, idx, pos.line);
                    } else {
                        self.emit(OpCode::StoreNameDefine, idx, pos.line);
                    }
                }
                Ok(())
            }
            Stmt::If(cond, then_body, elifs, else_body, pos) => {
                self.compile_if(cond, then_body, elifs, else_body, pos.line)
            }
            Stmt::While(cond, body, pos) => self.compile_while(cond, body, pos.line),
            Stmt::For(vars, iterable, body, pos) => self.compile_for(vars, iterable, body, pos.line),
            Stmt::Break(pos) => {
                let ctx = self
                    .loops
                    .last()
                    .ok_or_else(|| Error::compile("'berhenti' di luar gelung", pos.line))?;
                if ctx.is_for {
                    self.emit(OpCode::PopTop, 0, pos.line);
                }
                let patch = self.emit_jump(OpCode::JumpAbsolute, pos.line);
                self.loops.last_mut().unwrap().break_patches.push(patch);
                Ok(())
            }
            Stmt::Continue(pos) => {
                let start = self
                    .loops
                    .last()
                    .ok_or_else(|| Error::compile("'teruskan' di luar gelung", pos.line))?
                    .start;
                self.emit(OpCode::JumpAbsolute, start as i16, pos.line);
                Ok(())
            }
            Stmt::Return(expr, pos) => {
                match expr {
                    Some(e) => self.compile_expr(e)?,
                    None => {
                        let idx = self.add_const(Value::None, pos.line)?;
                        self.emit(OpCode::LoadConst, idx, pos.line);
                    }
                }
                self.emit(OpCode::ReturnValue, 0, pos.line);
                Ok(())
            }
            Stmt::Pass(_) => Ok(()),
            Stmt::Delete(target, pos) => self.compile_delete(target, pos.line),
            Stmt::Global(names, pos) => {
                for name in names {
                    self.globals.insert(name.clone());
                    let idx = self.add_name(name, pos.line)?;
                    self.emit(OpCode::DeclareGlobal, idx, pos.line);
                }
                Ok(())
            }
            Stmt::Nonlocal(names, _) => {
                for name in names {
                    self.nonlocals.insert(name.clone());
                }
                Ok(())
            }
            Stmt::Try(body, handlers, finally, pos) => self.compile_try(body, handlers, finally, pos.line),
            Stmt::Raise(expr, pos) => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Raise, 0, pos.line);
                Ok(())
            }
            Stmt::Import(module, alias, pos) => {
                let mod_idx = self.add_name(module, pos.line)?;
                self.emit(OpCode::ImportModule, mod_idx, pos.line);
                let bound = alias.clone().unwrap_or_else(|| module.clone());
                let bound_idx = self.add_name(&bound, pos.line)?;
                self.emit(OpCode::StoreNameDefine, bound_idx, pos.line);
                Ok(())
            }
            Stmt::FromImport(module, names, aliases, pos) => {
                for (name, alias) in names.iter().zip(aliases.iter()) {
                    let pair = Value::list(vec![Value::str(module.clone()), Value::str(name.clone())]);
                    let pair_idx = self.add_const(pair, pos.line)?;
                    self.emit(OpCode::LoadConst, pair_idx, pos.line);
                    self.emit(OpCode::ImportFrom, 0, pos.line);
                    let bound = alias.clone().unwrap_or_else(|| name.clone());
                    let bound_idx = self.add_name(&bound, pos.line)?;
                    self.emit(OpCode::StoreNameDefine, bound_idx, pos.line);
                }
                Ok(())
            }
            Stmt::With(ctx_expr, alias, body, pos) => {
                self.compile_expr(ctx_expr)?;
                match alias {
                    Some(name) => {
                        let idx = self.add_name(name, pos.line)?;
                        self.emit(OpCode::StoreNameDefine, idx, pos.line);
                    }
                    None => {
                        self.emit(OpCode::PopTop, 0, pos.line);
                    }
                }
                self.compile_block(body)
            }
            Stmt::Yield(_, pos) => Err(Error::compile("berikan tidak disokong oleh kompilar", pos.line)),
            Stmt::FunctionDef(def) => self.compile_function_def(def),
            Stmt::ClassDef(def) => self.compile_class_def(def),
        }
    }

    fn compile_delete(&mut self, target: &Expr, line: u32) -> Result<()> {
        match target {
            Expr::Identifier(name, pos) => {
                let idx = self.add_name(name, pos.line)?;
                self.emit(OpCode::DeleteName, idx, pos.line);
                Ok(())
            }
            Expr::Index(obj, index, pos) => {
                self.compile_expr(obj)?;
                self.compile_expr(index)?;
                self.emit(OpCode::DeleteIndex, 0, pos.line);
                Ok(())
            }
            _ => Err(Error::compile("sasaran padam tidak sah", line)),
        }
    }

    fn compile_if(
        &mut self,
        cond: &Expr,
        then_body: &Block,
        elifs: &[(Expr, Block)],
        else_body: &Option<Block>,
        line: u32,
    ) -> Result<()> {
        let mut end_jumps = Vec::new();

        self.compile_expr(cond)?;
        let false_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        self.compile_block(then_body)?;
        end_jumps.push(self.emit_jump(OpCode::JumpAbsolute, line));
        self.patch_jump(false_jump);

        for (elif_cond, elif_body) in elifs {
            let elif_line = elif_cond.pos().line;
            self.compile_expr(elif_cond)?;
            let false_jump = self.emit_jump(OpCode::JumpIfFalse, elif_line);
            self.compile_block(elif_body)?;
            end_jumps.push(self.emit_jump(OpCode::JumpAbsolute, elif_line));
            self.patch_jump(false_jump);
        }

        if let Some(body) = else_body {
            self.compile_block(body)?;
        }

        for j in end_jumps {
            self.patch_jump(j);
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block, line: u32) -> Result<()> {
        let start = self.code.current_offset();
        self.loops.push(LoopCtx { start, break_patches: Vec::new(), is_for: false });

        self.compile_expr(cond)?;
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        self.compile_block(body)?;
        self.emit(OpCode::JumpAbsolute, start as i16, line);
        self.patch_jump(exit_jump);

        let ctx = self.loops.pop().unwrap();
        for bp in ctx.break_patches {
            self.patch_jump(bp);
        }
        Ok(())
    }

    fn compile_for(&mut self, vars: &[String], iterable: &Expr, body: &Block, line: u32) -> Result<()> {
        self.compile_expr(iterable)?;
        self.emit(OpCode::GetIter, 0, line);

        let start = self.code.current_offset();
        self.loops.push(LoopCtx { start, break_patches: Vec::new(), is_for: true });

        let iter_jump = self.emit_jump(OpCode::ForIter, line);
        // Reference compiler uses plain STORE_NAME (walk-to-existing) here,
        // but `Environment::set_existing` errors when the name has never
        // been bound — which a loop variable's first iteration always is.
        // Rebinding it fresh each iteration sidesteps that.
        if vars.len() == 1 {
            let idx = self.add_name(&vars[0], line)?;
            self.emit(OpCode::StoreNameDefine, idx, line);
        } else {
            self.emit(OpCode::UnpackSequence, vars.len() as i16, line);
            for var in vars {
                let idx = self.add_name(var, line)?;
                self.emit(OpCode::StoreNameDefine, idx, line);
            }
        }

        self.compile_block(body)?;
        self.emit(OpCode::JumpAbsolute, start as i16, line);
        self.patch_jump(iter_jump);

        let ctx = self.loops.pop().unwrap();
        for bp in ctx.break_patches {
            self.patch_jump(bp);
        }
        Ok(())
    }

    /// `cuba`/`tangkap`/`akhirnya`: `SETUP_TRY <handler_addr>`, body,
    /// `POP_TRY`, jump past the handlers; the VM's per-frame try-stack (not
    /// a side table) is what routes a fault in the body to `dispatch_start`.
    /// A fault while a handler or `akhirnya` body itself runs is no longer
    /// covered by this `cuba`'s own entry (it was already popped), matching
    /// the reference VM's try-stack discipline.
    fn compile_try(
        &mut self,
        body: &Block,
        handlers: &[Handler],
        finally: &Option<Block>,
        line: u32,
    ) -> Result<()> {
        let setup_idx = self.emit_jump(OpCode::SetupTry, line);
        self.compile_block(body)?;
        self.emit(OpCode::PopTry, 0, line);
        let body_end_jump = self.emit_jump(OpCode::JumpAbsolute, line);
        let dispatch_start = self.code.current_offset();
        self.patch_jump(setup_idx);

        let mut handler_end_jumps = Vec::new();
        for handler in handlers {
            let h_line = handler.body.first().map(stmt_line).unwrap_or(line);
            let match_arg = match &handler.type_name {
                Some(name) => self.add_name(name, h_line)?,
                None => -1,
            };
            self.emit(OpCode::MatchException, match_arg, h_line);
            let no_match = self.emit_jump(OpCode::JumpIfFalse, h_line);

            // Matched: consume the pending exception exactly once. `-1` is a
            // reserved `LOAD_CONST` argument meaning "the in-flight
            // exception's value", mirroring `MATCH_EXCEPTION`'s own use of
            // `-1` for a bare handler.
            self.emit(OpCode::LoadConst, -1, h_line);
            match &handler.alias {
                Some(alias) => {
                    let idx = self.add_name(alias, h_line)?;
                    self.emit(OpCode::StoreNameDefine, idx, h_line);
                }
                None => {
                    self.emit(OpCode::PopTop, 0, h_line);
                }
            }

            self.compile_block(&handler.body)?;
            handler_end_jumps.push(self.emit_jump(OpCode::JumpAbsolute, h_line));
            self.patch_jump(no_match);
        }
        // No handler matched: re-raise whatever is still pending.
        self.emit(OpCode::EndFinally, 0, line);

        let finally_start = self.code.current_offset();
        if let Some(finally_body) = finally {
            self.compile_block(finally_body)?;
            // Re-raise if `akhirnya` was entered carrying a still-pending
            // exception (the bare `EndFinally` re-raise above).
            self.emit(OpCode::EndFinally, 0, line);
        }

        self.patch_jump_to(body_end_jump, finally_start);
        for j in handler_end_jumps {
            self.patch_jump_to(j, finally_start);
        }
        Ok(())
    }

    fn compile_function_def(&mut self, def: &FunctionDef) -> Result<()> {
        self.compile_nested_function(&def.name, &def.params, &def.body, def.pos.line)?;
        for deco in def.decorators.iter().rev() {
            self.compile_expr(deco)?;
            self.emit(OpCode::RotTwo, 0, def.pos.line);
            self.emit(OpCode::CallFunction, 1, def.pos.line);
        }
        let idx = self.add_name(&def.name, def.pos.line)?;
        self.emit(OpCode::StoreNameDefine, idx, def.pos.line);
        Ok(())
    }

    /// Compiles `params`/`body` into a nested `CodeObject`, pushes its
    /// defaults (evaluated against the *enclosing* scope, per
    /// `kilat_compiler.py`) and the code constant, then emits `MAKE_FUNCTION`.
    /// Leaves the resulting function value on the stack.
    fn compile_nested_function(&mut self, name: &str, params: &Params, body: &Block, line: u32) -> Result<()> {
        let mut inner = Compiler::new(name);
        inner.code.param_names = params.required.clone();
        inner.code.param_names.extend(params.defaulted.iter().map(|(n, _)| n.clone()));
        inner.code.param_count = inner.code.param_names.len() as u32;
        inner.code.var_args = params.var_args.clone();
        inner.code.kw_args = params.kw_args.clone();
        inner.compile_block(body)?;
        let none_idx = inner.add_const(Value::None, line)?;
        inner.emit(OpCode::LoadConst, none_idx, line);
        inner.emit(OpCode::ReturnValue, 0, line);

        for (_, default_expr) in &params.defaulted {
            self.compile_expr(default_expr)?;
        }

        let code_idx = self.add_const(Value::Code(Rc::new(inner.code)), line)?;
        self.emit(OpCode::LoadConst, code_idx, line);
        self.emit(OpCode::MakeFunction, params.defaulted.len() as i16, line);
        Ok(())
    }

    /// `kelas`. Follows `kilat_compiler.py`'s flat item scheme: each method
    /// compiles as an ordinary nested function pushed onto the stack, each
    /// class variable as its evaluated initialiser, tagged in a parallel
    /// names list (`__classvar__`-prefixed) so `MAKE_CLASS` can tell them
    /// apart without a second opcode.
    fn compile_class_def(&mut self, def: &ClassDef) -> Result<()> {
        match &def.base {
            Some(name) => {
                let idx = self.add_name(name, def.pos.line)?;
                if self.globals.contains(name) {
                    self.emit(OpCode::LoadGlobal, idx, def.pos.line);
                } else {
                    self.emit(OpCode::LoadName, idx, def.pos.line);
                }
            }
            None => {
                let idx = self.add_const(Value::None, def.pos.line)?;
                self.emit(OpCode::LoadConst, idx, def.pos.line);
            }
        }

        let mut item_names: Vec<String> = Vec::new();
        for stmt in &def.body {
            match stmt {
                Stmt::FunctionDef(method) => {
                    self.compile_nested_function(&method.name, &method.params, &method.body, method.pos.line)?;
                    item_names.push(method.name.clone());
                }
                Stmt::Assign(name, expr, _) => {
                    self.compile_expr(expr)?;
                    item_names.push(format!("__classvar__{name}"));
                }
                Stmt::Pass(_) => {}
                other => self.compile_stmt(other)?,
            }
        }
        let item_count = item_names.len() as i16;

        let name_idx = self.add_const(Value::str(def.name.clone()), def.pos.line)?;
        self.emit(OpCode::LoadConst, name_idx, def.pos.line);
        let names_const = Value::list(item_names.into_iter().map(Value::str).collect());
        let names_idx = self.add_const(names_const, def.pos.line)?;
        self.emit(OpCode::LoadConst, names_idx, def.pos.line);
        self.emit(OpCode::MakeClass, item_count, def.pos.line);

        for deco in def.decorators.iter().rev() {
            self.compile_expr(deco)?;
            self.emit(OpCode::RotTwo, 0, def.pos.line);
            self.emit(OpCode::CallFunction, 1, def.pos.line);
        }
        let idx = self.add_name(&def.name, def.pos.line)?;
        self.emit(OpCode::StoreNameDefine, idx, def.pos.line);
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Number(lit, pos) => {
                let value = match lit {
                    crate::ast::NumberLit::Int(i) => Value::Int(i.clone()),
                    crate::ast::NumberLit::Float(f) => Value::Float(*f),
                };
                let idx = self.add_const(value, pos.line)?;
                self.emit(OpCode::LoadConst, idx, pos.line);
                Ok(())
            }
            Expr::Str(s, pos) => {
                let idx = self.add_const(Value::str(s.clone()), pos.line)?;
                self.emit(OpCode::LoadConst, idx, pos.line);
                Ok(())
            }
            Expr::Bool(b, pos) => {
                let idx = self.add_const(Value::Bool(*b), pos.line)?;
                self.emit(OpCode::LoadConst, idx, pos.line);
                Ok(())
            }
            Expr::None(pos) => {
                let idx = self.add_const(Value::None, pos.line)?;
                self.emit(OpCode::LoadConst, idx, pos.line);
                Ok(())
            }
            Expr::FString(parts, pos) => self.compile_fstring(parts, pos.line),
            Expr::Identifier(name, pos) => {
                let idx = self.add_name(name, pos.line)?;
                if self.globals.contains(name) {
                    self.emit(OpCode::LoadGlobal, idx, pos.line);
                } else {
                    self.emit(OpCode::LoadName, idx, pos.line);
                }
                Ok(())
            }
            Expr::List(elems, pos) => {
                for e in elems {
                    self.compile_expr(e)?;
                }
                self.emit(OpCode::BuildList, elems.len() as i16, pos.line);
                Ok(())
            }
            Expr::Tuple(elems, pos) => {
                for e in elems {
                    self.compile_expr(e)?;
                }
                self.emit(OpCode::BuildTuple, elems.len() as i16, pos.line);
                Ok(())
            }
            Expr::Dict(pairs, pos) => {
                for (k, v) in pairs {
                    self.compile_expr(k)?;
                    self.compile_expr(v)?;
                }
                self.emit(OpCode::BuildDict, pairs.len() as i16, pos.line);
                Ok(())
            }
            Expr::Slice(start, stop, step, pos) => {
                self.compile_slice_part(start, pos.line)?;
                self.compile_slice_part(stop, pos.line)?;
                self.compile_slice_part(step, pos.line)?;
                self.emit(OpCode::BuildSlice, 0, pos.line);
                Ok(())
            }
            Expr::Binary(BinOp::And, l, r, pos) => self.compile_boolop(true, l, r, pos.line),
            Expr::Binary(BinOp::Or, l, r, pos) => self.compile_boolop(false, l, r, pos.line),
            Expr::Binary(op, l, r, pos) => {
                self.compile_expr(l)?;
                self.compile_expr(r)?;
                self.emit(binop_opcode(op), 0, pos.line);
                Ok(())
            }
            Expr::Compare(first, rest, pos) => self.compile_compare(first, rest, pos.line),
            Expr::Unary(op, operand, pos) => {
                self.compile_expr(operand)?;
                let opcode = match op {
                    UnaryOp::Neg => OpCode::UnaryNeg,
                    UnaryOp::Pos => OpCode::UnaryPos,
                    UnaryOp::Not => OpCode::UnaryNot,
                };
                self.emit(opcode, 0, pos.line);
                Ok(())
            }
            Expr::Ternary(true_val, cond, false_val, pos) => {
                self.compile_expr(cond)?;
                let false_jump = self.emit_jump(OpCode::JumpIfFalse, pos.line);
                self.compile_expr(true_val)?;
                let end_jump = self.emit_jump(OpCode::JumpAbsolute, pos.line);
                self.patch_jump(false_jump);
                self.compile_expr(false_val)?;
                self.patch_jump(end_jump);
                Ok(())
            }
            Expr::Lambda(params, body, pos) => self.compile_lambda(params, body, pos.line),
            Expr::Attribute(obj, name, pos) => {
                self.compile_expr(obj)?;
                let idx = self.add_name(name, pos.line)?;
                self.emit(OpCode::LoadAttr, idx, pos.line);
                Ok(())
            }
            Expr::Index(obj, index, pos) => {
                self.compile_expr(obj)?;
                self.compile_expr(index)?;
                self.emit(OpCode::LoadIndex, 0, pos.line);
                Ok(())
            }
            Expr::Call(callee, args, kwargs, pos) => self.compile_call(callee, args, kwargs, pos.line),
            Expr::ListComp(elem, vars, iterable, cond, pos) => {
                self.compile_list_comp(elem, vars, iterable, cond, pos.line)
            }
        }
    }

    fn compile_slice_part(&mut self, part: &Option<Box<Expr>>, line: u32) -> Result<()> {
        match part {
            Some(e) => self.compile_expr(e),
            None => {
                let idx = self.add_const(Value::None, line)?;
                self.emit(OpCode::LoadConst, idx, line);
                Ok(())
            }
        }
    }

    fn compile_fstring(&mut self, parts: &[FStringPart], line: u32) -> Result<()> {
        for part in parts {
            match part {
                FStringPart::Literal(s) => {
                    let idx = self.add_const(Value::str(s.clone()), line)?;
                    self.emit(OpCode::LoadConst, idx, line);
                }
                FStringPart::Expr(e) => self.compile_expr(e)?,
            }
        }
        self.emit(OpCode::BuildFstring, parts.len() as i16, line);
        Ok(())
    }

    /// `dan`/`atau` short-circuiting via `JUMP_IF_*_OR_POP`: the left value
    /// is left on the stack (and jumped past the right side) when it already
    /// decides the result.
    fn compile_boolop(&mut self, is_and: bool, l: &Expr, r: &Expr, line: u32) -> Result<()> {
        self.compile_expr(l)?;
        let op = if is_and { OpCode::JumpIfFalseOrPop } else { OpCode::JumpIfTrueOrPop };
        let short_circuit = self.emit_jump(op, line);
        self.compile_expr(r)?;
        self.patch_jump(short_circuit);
        Ok(())
    }

    /// Chained comparisons (`a < b < c`) have no reference lowering to copy;
    /// values are stashed in compiler-synthesised names (never producible by
    /// the lexer) so each operand is evaluated exactly once, short-circuiting
    /// through the same `JUMP_IF_FALSE_OR_POP` used for `dan`.
    fn compile_compare(&mut self, first: &Expr, rest: &[(CmpOp, Expr)], line: u32) -> Result<()> {
        if rest.len() == 1 {
            self.compile_expr(first)?;
            self.compile_expr(&rest[0].1)?;
            self.emit(cmpop_opcode(&rest[0].0), 0, line);
            return Ok(());
        }

        let mut prev = self.synth_name("#cmp");
        self.compile_expr(first)?;
        let idx = self.add_name(&prev, line)?;
        self.emit(OpCode::StoreNameDefine, idx, line);

        let mut end_jumps = Vec::new();
        for (i, (op, rhs)) in rest.iter().enumerate() {
            let rhs_line = rhs.pos().line;
            self.compile_expr(rhs)?;
            let cur = self.synth_name("#cmp");
            let cur_idx = self.add_name(&cur, rhs_line)?;
            self.emit(OpCode::StoreNameDefine, cur_idx, rhs_line);

            let prev_idx = self.add_name(&prev, rhs_line)?;
            self.emit(OpCode::LoadName, prev_idx, rhs_line);
            self.emit(OpCode::LoadName, cur_idx, rhs_line);
            self.emit(cmpop_opcode(op), 0, rhs_line);

            prev = cur;
            if i + 1 < rest.len() {
                end_jumps.push(self.emit_jump(OpCode::JumpIfFalseOrPop, rhs_line));
            }
        }
        for j in end_jumps {
            self.patch_jump(j);
        }
        Ok(())
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], kwargs: &[(String, Expr)], line: u32) -> Result<()> {
        self.compile_expr(callee)?;
        for arg in args {
            self.compile_expr(arg)?;
        }
        if kwargs.is_empty() {
            self.emit(OpCode::CallFunction, args.len() as i16, line);
        } else {
            for (_, value) in kwargs {
                self.compile_expr(value)?;
            }
            let names = Value::list(kwargs.iter().map(|(n, _)| Value::str(n.clone())).collect());
            let names_idx = self.add_const(names, line)?;
            self.emit(OpCode::LoadConst, names_idx, line);
            self.emit(OpCode::CallFunctionKw, args.len() as i16, line);
        }
        Ok(())
    }

    fn compile_lambda(&mut self, params: &Params, body: &Expr, line: u32) -> Result<()> {
        let mut inner = Compiler::new("<lambda>");
        inner.code.param_names = params.required.clone();
        inner.code.param_names.extend(params.defaulted.iter().map(|(n, _)| n.clone()));
        inner.code.param_count = inner.code.param_names.len() as u32;
        inner.code.var_args = params.var_args.clone();
        inner.code.kw_args = params.kw_args.clone();
        inner.compile_expr(body)?;
        inner.emit(OpCode::ReturnValue, 0, line);

        for (_, default_expr) in &params.defaulted {
            self.compile_expr(default_expr)?;
        }
        let code_idx = self.add_const(Value::Code(Rc::new(inner.code)), line)?;
        self.emit(OpCode::LoadConst, code_idx, line);
        self.emit(OpCode::MakeFunction, params.defaulted.len() as i16, line);
        Ok(())
    }

    /// `[expr untuk v dalam iterable jika cond]` lowers to an accumulator
    /// loop: a synthetic list variable is concatenated into on each
    /// surviving iteration, then loaded as the expression's value.
    fn compile_list_comp(
        &mut self,
        elem: &Expr,
        vars: &[String],
        iterable: &Expr,
        cond: &Option<Box<Expr>>,
        line: u32,
    ) -> Result<()> {
        let acc = self.synth_name("#acc");
        let acc_idx = self.add_name(&acc, line)?;
        self.emit(OpCode::BuildList, 0, line);
        self.emit(OpCode::StoreNameDefine, acc_idx, line);

        self.compile_expr(iterable)?;
        self.emit(OpCode::GetIter, 0, line);

        let start = self.code.current_offset();
        self.loops.push(LoopCtx { start, break_patches: Vec::new(), is_for: true });
        let iter_jump = self.emit_jump(OpCode::ForIter, line);

        if vars.len() == 1 {
            let idx = self.add_name(&vars[0], line)?;
            self.emit(OpCode::StoreNameDefine, idx, line);
        } else {
            self.emit(OpCode::UnpackSequence, vars.len() as i16, line);
            for var in vars {
                let idx = self.add_name(var, line)?;
                self.emit(OpCode::StoreNameDefine, idx, line);
            }
        }

        let skip_jump = match cond {
            Some(c) => {
                self.compile_expr(c)?;
                Some(self.emit_jump(OpCode::JumpIfFalse, line))
            }
            None => None,
        };

        let acc_idx = self.add_name(&acc, line)?;
        self.emit(OpCode::LoadName, acc_idx, line);
        self.compile_expr(elem)?;
        self.emit(OpCode::BuildList, 1, line);
        self.emit(OpCode::BinaryAdd, 0, line);
        self.emit(OpCode::StoreNameDefine, acc_idx, line);

        if let Some(j) = skip_jump {
            self.patch_jump(j);
        }
        self.emit(OpCode::JumpAbsolute, start as i16, line);
        self.patch_jump(iter_jump);

        let ctx = self.loops.pop().unwrap();
        for bp in ctx.break_patches {
            self.patch_jump(bp);
        }

        let acc_idx = self.add_name(&acc, line)?;
        self.emit(OpCode::LoadName, acc_idx, line);
        Ok(())
    }
}

fn stmt_line(stmt: &Stmt) -> u32 {
    match stmt {
        Stmt::ExprStmt(_, p)
        | Stmt::Assign(_, _, p)
        | Stmt::AugAssign(_, _, _, p)
        | Stmt::AttrAssign(_, _, _, p)
        | Stmt::IndexAssign(_, _, _, p)
        | Stmt::MultiAssign(_, _, p)
        | Stmt::If(_, _, _, _, p)
        | Stmt::While(_, _, p)
        | Stmt::For(_, _, _, p)
        | Stmt::Break(p)
        | Stmt::Continue(p)
        | Stmt::Return(_, p)
        | Stmt::Pass(p)
        | Stmt::Delete(_, p)
        | Stmt::Global(_, p)
        | Stmt::Nonlocal(_, p)
        | Stmt::Try(_, _, _, p)
        | Stmt::Raise(_, p)
        | Stmt::Import(_, _, p)
        | Stmt::FromImport(_, _, _, p)
        | Stmt::With(_, _, _, p)
        | Stmt::Yield(_, p) => p.line,
        Stmt::FunctionDef(def) => def.pos.line,
        Stmt::ClassDef(def) => def.pos.line,
    }
}

fn binop_opcode(op: &BinOp) -> OpCode {
    match op {
        BinOp::Add => OpCode::BinaryAdd,
        BinOp::Sub => OpCode::BinarySub,
        BinOp::Mul => OpCode::BinaryMul,
        BinOp::Div => OpCode::BinaryDiv,
        BinOp::FloorDiv => OpCode::BinaryFloorDiv,
        BinOp::Mod => OpCode::BinaryMod,
        BinOp::Pow => OpCode::BinaryPow,
        BinOp::And | BinOp::Or => unreachable!("dan/atau lowers via compile_boolop"),
    }
}

fn aug_opcode(op: &BinOp, line: u32) -> Result<OpCode> {
    Ok(match op {
        BinOp::Add => OpCode::AugAdd,
        BinOp::Sub => OpCode::AugSub,
        BinOp::Mul => OpCode::AugMul,
        BinOp::Div => OpCode::AugDiv,
        BinOp::FloorDiv => OpCode::AugFloorDiv,
        BinOp::Mod => OpCode::AugMod,
        BinOp::Pow => OpCode::AugPow,
        BinOp::And | BinOp::Or => return Err(Error::compile("operator tambah-tetap tidak sah", line)),
    })
}

fn cmpop_opcode(op: &CmpOp) -> OpCode {
    match op {
        CmpOp::Eq => OpCode::CompareEq,
        CmpOp::NotEq => OpCode::CompareNotEq,
        CmpOp::Lt => OpCode::CompareLt,
        CmpOp::Gt => OpCode::CompareGt,
        CmpOp::LtEq => OpCode::CompareLtEq,
        CmpOp::GtEq => OpCode::CompareGtEq,
        CmpOp::In => OpCode::CompareIn,
        CmpOp::Is => OpCode::CompareIs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile_source(src: &str) -> CodeObject {
        let program = Parser::parse_program(src).unwrap();
        compile(&program).unwrap()
    }

    #[test]
    fn compiles_a_simple_assignment() {
        let code = compile_source("x = 1 + 2\n");
        assert!(code.instructions.iter().any(|i| i.opcode == OpCode::BinaryAdd));
        assert!(code.instructions.iter().any(|i| i.opcode == OpCode::StoreNameDefine));
    }

    #[test]
    fn compiles_chained_comparison_with_synthetic_names() {
        let code = compile_source("jika 1 < x < 10:\n    tiada\n");
        assert!(code.names.iter().any(|n| n.starts_with('#')));
        assert!(code.instructions.iter().any(|i| i.opcode == OpCode::JumpIfFalseOrPop));
    }

    #[test]
    fn compiles_try_except_finally_with_setup_and_pop_try() {
        let code = compile_source(
            "cuba:\n    x = 1\ntangkap NilaiRalat sebagai e:\n    x = 2\nakhirnya:\n    x = 3\n",
        );
        assert!(code.instructions.iter().any(|i| i.opcode == OpCode::SetupTry));
        assert!(code.instructions.iter().any(|i| i.opcode == OpCode::PopTry));
    }

    #[test]
    fn compiles_class_with_method_and_classvar() {
        let code = compile_source("kelas A:\n    n = 1\n    fungsi f(diri):\n        kembali diri.n\n");
        assert!(code.instructions.iter().any(|i| i.opcode == OpCode::MakeClass));
        let names_const_present = code.constants.iter().any(|c| match c {
            Value::List(items) => items.borrow().iter().any(|v| matches!(v, Value::Str(s) if s.starts_with("__classvar__"))),
            _ => false,
        });
        assert!(names_const_present);
    }
}
