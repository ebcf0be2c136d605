//! Recursive-descent, precedence-climbing parser (C3).

use crate::ast::*;
use crate::error::{Error, Result};
use crate::lexer;
use crate::token::{NumberLit as TokNum, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse_program(src: &str) -> Result<Program> {
        let tokens = lexer::lex(src)?;
        let mut parser = Parser::new(tokens);
        parser.skip_newlines();
        let mut stmts = Vec::new();
        while !parser.is_eof() {
            stmts.push(parser.parse_statement()?);
            parser.skip_newlines();
        }
        Ok(Program { stmts })
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens.get(self.pos + offset).map(|t| &t.kind).unwrap_or(&TokenKind::Eof)
    }

    fn cur_pos(&self) -> Pos {
        let t = &self.tokens[self.pos];
        Pos { line: t.line, column: t.column }
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) -> TokenKind {
        let k = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        k
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<TokenKind> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.err(format!("dijangka {} tetapi dapat {:?}", what, self.peek())))
        }
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        Error::syntax(msg.into(), self.tokens[self.pos].line)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.err("dijangka pengecam")),
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Result<Stmt> {
        match self.peek().clone() {
            TokenKind::At => self.parse_decorated(),
            TokenKind::Jika => self.parse_if(),
            TokenKind::Selagi => self.parse_while(),
            TokenKind::UntukDiulang => self.parse_for(),
            TokenKind::Fungsi => Ok(Stmt::FunctionDef(self.parse_function_def(Vec::new())?)),
            TokenKind::Kelas => Ok(Stmt::ClassDef(self.parse_class_def(Vec::new())?)),
            TokenKind::Kembali => self.parse_return(),
            TokenKind::Berhenti => {
                let pos = self.cur_pos();
                self.advance();
                Ok(Stmt::Break(pos))
            }
            TokenKind::Teruskan => {
                let pos = self.cur_pos();
                self.advance();
                Ok(Stmt::Continue(pos))
            }
            TokenKind::Cuba => self.parse_try(),
            TokenKind::Bangkit => self.parse_raise(),
            TokenKind::Import => self.parse_import(),
            TokenKind::Dari => self.parse_from_import(),
            TokenKind::Lulus => {
                let pos = self.cur_pos();
                self.advance();
                Ok(Stmt::Pass(pos))
            }
            TokenKind::Global => self.parse_global(),
            TokenKind::Nonlokal => self.parse_nonlocal(),
            TokenKind::Padam => self.parse_delete(),
            TokenKind::Dengan => self.parse_with(),
            TokenKind::Berikan => {
                let pos = self.cur_pos();
                self.advance();
                let expr = if matches!(self.peek(), TokenKind::Newline | TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                Ok(Stmt::Yield(expr, pos))
            }
            _ => self.parse_expr_or_assign_statement(),
        }
    }

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(TokenKind::Colon, ":")?;
        self.skip_semis();
        self.expect(TokenKind::Newline, "baris baharu")?;
        self.skip_newlines();
        self.expect(TokenKind::Indent, "inden")?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), TokenKind::Dedent) {
            stmts.push(self.parse_statement()?);
            self.skip_newlines();
        }
        self.expect(TokenKind::Dedent, "dedent")?;
        Ok(stmts)
    }

    fn skip_semis(&mut self) {
        while matches!(self.peek(), TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn parse_decorated(&mut self) -> Result<Stmt> {
        let mut decorators = Vec::new();
        while matches!(self.peek(), TokenKind::At) {
            self.advance();
            decorators.push(self.parse_expression()?);
            self.skip_newlines();
        }
        match self.peek() {
            TokenKind::Fungsi => Ok(Stmt::FunctionDef(self.parse_function_def(decorators)?)),
            TokenKind::Kelas => Ok(Stmt::ClassDef(self.parse_class_def(decorators)?)),
            _ => Err(self.err("penghias mesti diikuti oleh definisi fungsi atau kelas")),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let cond = self.parse_expression()?;
        let then = self.parse_block()?;
        let mut elifs = Vec::new();
        let mut else_body = None;
        loop {
            match self.peek() {
                TokenKind::AtauJika => {
                    self.advance();
                    let c = self.parse_expression()?;
                    let b = self.parse_block()?;
                    elifs.push((c, b));
                }
                TokenKind::Atau => {
                    self.advance();
                    else_body = Some(self.parse_block()?);
                    break;
                }
                _ => break,
            }
        }
        Ok(Stmt::If(cond, then, elifs, else_body, pos))
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::While(cond, body, pos))
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let mut vars = vec![self.ident()?];
        while matches!(self.peek(), TokenKind::Comma) {
            self.advance();
            vars.push(self.ident()?);
        }
        self.expect(TokenKind::Dalam, "dalam")?;
        let iter = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::For(vars, iter, body, pos))
    }

    fn parse_params(&mut self) -> Result<Params> {
        self.expect(TokenKind::LParen, "(")?;
        let mut params = Params::default();
        let mut seen_default = false;
        while !matches!(self.peek(), TokenKind::RParen) {
            if matches!(self.peek(), TokenKind::StarStar) {
                self.advance();
                params.kw_args = Some(self.ident()?);
            } else if matches!(self.peek(), TokenKind::Star) {
                self.advance();
                params.var_args = Some(self.ident()?);
            } else {
                let name = self.ident()?;
                if matches!(self.peek(), TokenKind::Assign) {
                    self.advance();
                    let default = self.parse_expression()?;
                    params.defaulted.push((name, default));
                    seen_default = true;
                } else {
                    if seen_default {
                        return Err(self.err("parameter wajib tidak boleh selepas parameter lalai"));
                    }
                    params.required.push(name);
                }
            }
            if matches!(self.peek(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        if matches!(self.peek(), TokenKind::Arrow) {
            self.advance();
            self.parse_expression()?; // return annotation, consumed and ignored
        }
        Ok(params)
    }

    fn parse_function_def(&mut self, decorators: Vec<Expr>) -> Result<FunctionDef> {
        let pos = self.cur_pos();
        self.advance(); // fungsi
        let name = self.ident()?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(FunctionDef { name, params, decorators, body, pos })
    }

    fn parse_class_def(&mut self, decorators: Vec<Expr>) -> Result<ClassDef> {
        let pos = self.cur_pos();
        self.advance(); // kelas
        let name = self.ident()?;
        let mut base = None;
        if matches!(self.peek(), TokenKind::LParen) {
            self.advance();
            if !matches!(self.peek(), TokenKind::RParen) {
                base = Some(self.ident()?);
            }
            self.expect(TokenKind::RParen, ")")?;
        }
        let body = self.parse_block()?;
        Ok(ClassDef { name, base, decorators, body, pos })
    }

    fn parse_return(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let expr = if matches!(self.peek(), TokenKind::Newline | TokenKind::Semicolon | TokenKind::Dedent) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        Ok(Stmt::Return(expr, pos))
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while matches!(self.peek(), TokenKind::Tangkap) {
            self.advance();
            let mut type_name = None;
            let mut alias = None;
            if !matches!(self.peek(), TokenKind::Colon | TokenKind::Sebagai) {
                type_name = Some(self.ident()?);
            }
            if matches!(self.peek(), TokenKind::Sebagai) {
                self.advance();
                alias = Some(self.ident()?);
            }
            let hbody = self.parse_block()?;
            handlers.push(Handler { type_name, alias, body: hbody });
        }
        let finally = if matches!(self.peek(), TokenKind::Akhirnya) {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Stmt::Try(body, handlers, finally, pos))
    }

    fn parse_raise(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let expr = self.parse_expression()?;
        Ok(Stmt::Raise(expr, pos))
    }

    fn parse_import(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let module = self.ident()?;
        let alias = if matches!(self.peek(), TokenKind::Sebagai) {
            self.advance();
            Some(self.ident()?)
        } else {
            None
        };
        Ok(Stmt::Import(module, alias, pos))
    }

    fn parse_from_import(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let module = self.ident()?;
        self.expect(TokenKind::Import, "import")?;
        let mut names = Vec::new();
        let mut aliases = Vec::new();
        loop {
            names.push(self.ident()?);
            if matches!(self.peek(), TokenKind::Sebagai) {
                self.advance();
                aliases.push(Some(self.ident()?));
            } else {
                aliases.push(None);
            }
            if matches!(self.peek(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(Stmt::FromImport(module, names, aliases, pos))
    }

    fn parse_global(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let mut names = vec![self.ident()?];
        while matches!(self.peek(), TokenKind::Comma) {
            self.advance();
            names.push(self.ident()?);
        }
        Ok(Stmt::Global(names, pos))
    }

    fn parse_nonlocal(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let mut names = vec![self.ident()?];
        while matches!(self.peek(), TokenKind::Comma) {
            self.advance();
            names.push(self.ident()?);
        }
        Ok(Stmt::Nonlocal(names, pos))
    }

    fn parse_delete(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let target = self.parse_expression()?;
        Ok(Stmt::Delete(target, pos))
    }

    fn parse_with(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        self.advance();
        let ctx = self.parse_expression()?;
        let alias = if matches!(self.peek(), TokenKind::Sebagai) {
            self.advance();
            Some(self.ident()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Stmt::With(ctx, alias, body, pos))
    }

    fn parse_expr_or_assign_statement(&mut self) -> Result<Stmt> {
        let pos = self.cur_pos();
        // Try multi-assign: comma-separated identifiers followed by `=`.
        if let TokenKind::Identifier(_) = self.peek() {
            let save = self.pos;
            let mut names = Vec::new();
            if let TokenKind::Identifier(n) = self.peek().clone() {
                names.push(n);
            }
            let mut p = self.pos + 1;
            let mut ok = true;
            while matches!(self.tokens.get(p).map(|t| &t.kind), Some(TokenKind::Comma)) {
                p += 1;
                match self.tokens.get(p).map(|t| t.kind.clone()) {
                    Some(TokenKind::Identifier(n)) => {
                        names.push(n);
                        p += 1;
                    }
                    _ => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok && names.len() > 1 && matches!(self.tokens.get(p).map(|t| &t.kind), Some(TokenKind::Assign)) {
                self.pos = p + 1;
                let rhs = self.parse_assignment_rhs()?;
                return Ok(Stmt::MultiAssign(names, rhs, pos));
            }
            let _ = save;
        }

        let expr = self.parse_expression()?;
        match self.peek().clone() {
            TokenKind::Assign => {
                self.advance();
                let rhs = self.parse_assignment_rhs()?;
                self.build_assign(expr, rhs, pos)
            }
            TokenKind::PlusEq
            | TokenKind::MinusEq
            | TokenKind::StarEq
            | TokenKind::SlashEq
            | TokenKind::SlashSlashEq
            | TokenKind::PercentEq
            | TokenKind::StarStarEq => {
                let op = match self.advance() {
                    TokenKind::PlusEq => BinOp::Add,
                    TokenKind::MinusEq => BinOp::Sub,
                    TokenKind::StarEq => BinOp::Mul,
                    TokenKind::SlashEq => BinOp::Div,
                    TokenKind::SlashSlashEq => BinOp::FloorDiv,
                    TokenKind::PercentEq => BinOp::Mod,
                    TokenKind::StarStarEq => BinOp::Pow,
                    _ => unreachable!(),
                };
                let rhs = self.parse_expression()?;
                self.build_aug_assign(expr, op, rhs, pos)
            }
            _ => Ok(Stmt::ExprStmt(expr, pos)),
        }
    }

    fn parse_assignment_rhs(&mut self) -> Result<Expr> {
        let first = self.parse_expression()?;
        if matches!(self.peek(), TokenKind::Comma) {
            let pos = first.pos().clone();
            let mut elems = vec![first];
            while matches!(self.peek(), TokenKind::Comma) {
                self.advance();
                if matches!(self.peek(), TokenKind::Newline | TokenKind::Assign) {
                    break;
                }
                elems.push(self.parse_expression()?);
            }
            Ok(Expr::Tuple(elems, pos))
        } else {
            Ok(first)
        }
    }

    fn build_assign(&self, lhs: Expr, rhs: Expr, pos: Pos) -> Result<Stmt> {
        match lhs {
            Expr::Identifier(name, _) => Ok(Stmt::Assign(name, rhs, pos)),
            Expr::Attribute(obj, name, _) => Ok(Stmt::AttrAssign(*obj, name, rhs, pos)),
            Expr::Index(obj, idx, _) => Ok(Stmt::IndexAssign(*obj, *idx, rhs, pos)),
            _ => Err(Error::syntax("sasaran penetapan tidak sah", pos.line)),
        }
    }

    fn build_aug_assign(&self, lhs: Expr, op: BinOp, rhs: Expr, pos: Pos) -> Result<Stmt> {
        match lhs {
            Expr::Identifier(name, _) => Ok(Stmt::AugAssign(name, op, rhs, pos)),
            Expr::Attribute(obj, name, p) => {
                let read = Expr::Attribute(obj.clone(), name.clone(), p.clone());
                let value = Expr::Binary(op, Box::new(read), Box::new(rhs), p.clone());
                Ok(Stmt::AttrAssign(*obj, name, value, pos))
            }
            Expr::Index(obj, idx, p) => {
                let read = Expr::Index(obj.clone(), idx.clone(), p.clone());
                let value = Expr::Binary(op, Box::new(read), Box::new(rhs), p.clone());
                Ok(Stmt::IndexAssign(*obj, *idx, value, pos))
            }
            _ => Err(Error::syntax("sasaran penetapan tambahan tidak sah", pos.line)),
        }
    }

    // ---- expressions, lowest to highest precedence ----
    // lambda < ternary < or < and < not < comparison < additive < multiplicative < power < unary < postfix < primary

    pub fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_lambda()
    }

    fn parse_lambda(&mut self) -> Result<Expr> {
        if matches!(self.peek(), TokenKind::Lambda) {
            let pos = self.cur_pos();
            self.advance();
            let mut params = Params::default();
            let mut seen_default = false;
            while !matches!(self.peek(), TokenKind::Colon) {
                if matches!(self.peek(), TokenKind::StarStar) {
                    self.advance();
                    params.kw_args = Some(self.ident()?);
                } else if matches!(self.peek(), TokenKind::Star) {
                    self.advance();
                    params.var_args = Some(self.ident()?);
                } else {
                    let name = self.ident()?;
                    if matches!(self.peek(), TokenKind::Assign) {
                        self.advance();
                        params.defaulted.push((name, self.parse_ternary()?));
                        seen_default = true;
                    } else {
                        if seen_default {
                            return Err(self.err("parameter wajib tidak boleh selepas parameter lalai"));
                        }
                        params.required.push(name);
                    }
                }
                if matches!(self.peek(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::Colon, ":")?;
            let body = self.parse_lambda()?;
            return Ok(Expr::Lambda(params, Box::new(body), pos));
        }
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let value = self.parse_or()?;
        if matches!(self.peek(), TokenKind::Jika) {
            let pos = value.pos().clone();
            self.advance();
            let cond = self.parse_or()?;
            self.expect(TokenKind::Atau, "atau")?;
            let else_val = self.parse_ternary()?;
            return Ok(Expr::Ternary(Box::new(value), Box::new(cond), Box::new(else_val), pos));
        }
        Ok(value)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), TokenKind::AtauLogik) {
            let pos = left.pos().clone();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right), pos);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), TokenKind::Dan) {
            let pos = left.pos().clone();
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right), pos);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if matches!(self.peek(), TokenKind::Bukan) {
            let pos = self.cur_pos();
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand), pos));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::Eq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::NotEq,
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::LtEq => CmpOp::LtEq,
                TokenKind::GtEq => CmpOp::GtEq,
                TokenKind::Dalam => CmpOp::In,
                TokenKind::Adalah => CmpOp::Is,
                _ => break,
            };
            self.advance();
            ops.push((op, self.parse_additive()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            let pos = left.pos().clone();
            Ok(Expr::Compare(Box::new(left), ops, pos))
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let pos = left.pos().clone();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right), pos);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let pos = left.pos().clone();
            self.advance();
            let right = self.parse_power()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right), pos);
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_unary()?;
        if matches!(self.peek(), TokenKind::StarStar) {
            let pos = base.pos().clone();
            self.advance();
            let exp = self.parse_power()?; // right-associative
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp), pos));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            TokenKind::Minus => {
                let pos = self.cur_pos();
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?), pos))
            }
            TokenKind::Plus => {
                let pos = self.cur_pos();
                self.advance();
                Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.parse_unary()?), pos))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    let pos = expr.pos().clone();
                    self.advance();
                    let name = self.ident()?;
                    expr = Expr::Attribute(Box::new(expr), name, pos);
                }
                TokenKind::LParen => {
                    let pos = expr.pos().clone();
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    self.expect(TokenKind::RParen, ")")?;
                    expr = Expr::Call(Box::new(expr), args, kwargs, pos);
                }
                TokenKind::LBracket => {
                    let pos = expr.pos().clone();
                    self.advance();
                    let idx = self.parse_subscript()?;
                    self.expect(TokenKind::RBracket, "]")?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx), pos);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !matches!(self.peek(), TokenKind::RParen) {
            if let (TokenKind::Identifier(name), TokenKind::Assign) = (self.peek().clone(), self.peek_at(1).clone()) {
                self.advance();
                self.advance();
                let value = self.parse_expression()?;
                kwargs.push((name, value));
            } else {
                args.push(self.parse_expression()?);
            }
            if matches!(self.peek(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self) -> Result<Expr> {
        let pos = self.cur_pos();
        let start = if matches!(self.peek(), TokenKind::Colon) { None } else { Some(Box::new(self.parse_expression()?)) };
        if matches!(self.peek(), TokenKind::Colon) {
            self.advance();
            let stop = if matches!(self.peek(), TokenKind::Colon | TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            let step = if matches!(self.peek(), TokenKind::Colon) {
                self.advance();
                if matches!(self.peek(), TokenKind::RBracket) { None } else { Some(Box::new(self.parse_expression()?)) }
            } else {
                None
            };
            return Ok(Expr::Slice(start, stop, step, pos));
        }
        Ok(*start.unwrap())
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let pos = self.cur_pos();
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                let lit = match n {
                    TokNum::Int(i) => NumberLit::Int(i),
                    TokNum::Float(f) => NumberLit::Float(f),
                };
                Ok(Expr::Number(lit, pos))
            }
            TokenKind::Str(s) => {
                self.advance();
                let mut combined = s;
                while let TokenKind::Str(more) = self.peek().clone() {
                    self.advance();
                    combined.push_str(&more);
                }
                Ok(Expr::Str(combined, pos))
            }
            TokenKind::FString(raw) => {
                self.advance();
                let parts = self.parse_fstring_parts(&raw, pos.line)?;
                Ok(Expr::FString(parts, pos))
            }
            TokenKind::Benar => {
                self.advance();
                Ok(Expr::Bool(true, pos))
            }
            TokenKind::Salah => {
                self.advance();
                Ok(Expr::Bool(false, pos))
            }
            TokenKind::Tiada => {
                self.advance();
                Ok(Expr::None(pos))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Identifier(name, pos))
            }
            TokenKind::LParen => {
                self.advance();
                if matches!(self.peek(), TokenKind::RParen) {
                    self.advance();
                    return Ok(Expr::Tuple(Vec::new(), pos));
                }
                let first = self.parse_expression()?;
                if matches!(self.peek(), TokenKind::Comma) {
                    let mut elems = vec![first];
                    while matches!(self.peek(), TokenKind::Comma) {
                        self.advance();
                        if matches!(self.peek(), TokenKind::RParen) {
                            break;
                        }
                        elems.push(self.parse_expression()?);
                    }
                    self.expect(TokenKind::RParen, ")")?;
                    Ok(Expr::Tuple(elems, pos))
                } else {
                    self.expect(TokenKind::RParen, ")")?;
                    Ok(first)
                }
            }
            TokenKind::LBracket => self.parse_list_or_comp(pos),
            TokenKind::LBrace => self.parse_dict(pos),
            other => Err(self.err(format!("token tidak dijangka: {:?}", other))),
        }
    }

    fn parse_list_or_comp(&mut self, pos: Pos) -> Result<Expr> {
        self.advance(); // [
        if matches!(self.peek(), TokenKind::RBracket) {
            self.advance();
            return Ok(Expr::List(Vec::new(), pos));
        }
        let first = self.parse_expression()?;
        if matches!(self.peek(), TokenKind::UntukDiulang) {
            self.advance();
            let mut vars = vec![self.ident()?];
            while matches!(self.peek(), TokenKind::Comma) {
                self.advance();
                vars.push(self.ident()?);
            }
            self.expect(TokenKind::Dalam, "dalam")?;
            let iter = self.parse_expression()?;
            let cond = if matches!(self.peek(), TokenKind::Jika) {
                self.advance();
                Some(Box::new(self.parse_expression()?))
            } else {
                None
            };
            self.expect(TokenKind::RBracket, "]")?;
            return Ok(Expr::ListComp(Box::new(first), vars, Box::new(iter), cond, pos));
        }
        let mut elems = vec![first];
        while matches!(self.peek(), TokenKind::Comma) {
            self.advance();
            if matches!(self.peek(), TokenKind::RBracket) {
                break;
            }
            elems.push(self.parse_expression()?);
        }
        self.expect(TokenKind::RBracket, "]")?;
        Ok(Expr::List(elems, pos))
    }

    fn parse_dict(&mut self, pos: Pos) -> Result<Expr> {
        self.advance(); // {
        if matches!(self.peek(), TokenKind::RBrace) {
            self.advance();
            return Ok(Expr::Dict(Vec::new(), pos));
        }
        let first_key = self.parse_expression()?;
        self.expect(TokenKind::Colon, ":")?;
        let first_val = self.parse_expression()?;
        let mut pairs = vec![(first_key, first_val)];
        while matches!(self.peek(), TokenKind::Comma) {
            self.advance();
            if matches!(self.peek(), TokenKind::RBrace) {
                break;
            }
            let k = self.parse_expression()?;
            self.expect(TokenKind::Colon, ":")?;
            let v = self.parse_expression()?;
            pairs.push((k, v));
        }
        self.expect(TokenKind::RBrace, "}")?;
        Ok(Expr::Dict(pairs, pos))
    }

    /// Splits the raw f-string body on `{expr}` regions (honoring `{{`/`}}`
    /// escapes and brace-depth-tracked expressions), re-lexing and
    /// re-parsing each expression region with a fresh `Parser`.
    fn parse_fstring_parts(&self, raw: &str, line: u32) -> Result<Vec<FStringPart>> {
        let mut parts = Vec::new();
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;
        let mut literal = String::new();
        while i < chars.len() {
            let c = chars[i];
            if c == '{' && chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }
            if c == '}' && chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            if c == '{' {
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                i += 1;
                let mut depth = 1;
                let start = i;
                let mut spec_at = None;
                while i < chars.len() && depth > 0 {
                    match chars[i] {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        ':' if depth == 1 && spec_at.is_none() => spec_at = Some(i),
                        _ => {}
                    }
                    i += 1;
                }
                let end = spec_at.unwrap_or(i);
                let expr_src: String = chars[start..end].iter().collect();
                i += 1; // consume closing '}'
                let tokens = lexer::lex(&expr_src)
                    .map_err(|_| Error::syntax("ungkapan f-string tidak sah", line))?;
                let mut sub = Parser::new(tokens);
                let expr = sub.parse_expression()?;
                parts.push(FStringPart::Expr(expr));
            } else {
                literal.push(c);
                i += 1;
            }
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }
}
