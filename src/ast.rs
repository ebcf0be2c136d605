//! Closed AST node set (C2). Every node carries its source position.

use num_bigint::BigInt;

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    In,
    Is,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(NumberLit, Pos),
    Str(String, Pos),
    Bool(bool, Pos),
    None(Pos),
    FString(Vec<FStringPart>, Pos),
    Identifier(String, Pos),

    List(Vec<Expr>, Pos),
    Tuple(Vec<Expr>, Pos),
    Dict(Vec<(Expr, Expr)>, Pos),
    Slice(Option<Box<Expr>>, Option<Box<Expr>>, Option<Box<Expr>>, Pos),

    Binary(BinOp, Box<Expr>, Box<Expr>, Pos),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>, Pos),
    Unary(UnaryOp, Box<Expr>, Pos),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>, Pos),
    Lambda(Params, Box<Expr>, Pos),

    Attribute(Box<Expr>, String, Pos),
    Index(Box<Expr>, Box<Expr>, Pos),
    Call(Box<Expr>, Vec<Expr>, Vec<(String, Expr)>, Pos),

    ListComp(Box<Expr>, Vec<String>, Box<Expr>, Option<Box<Expr>>, Pos),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NumberLit {
    Int(BigInt),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub required: Vec<String>,
    pub defaulted: Vec<(String, Expr)>,
    pub var_args: Option<String>,
    pub kw_args: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    pub type_name: Option<String>,
    pub alias: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    ExprStmt(Expr, Pos),
    Assign(String, Expr, Pos),
    AugAssign(String, BinOp, Expr, Pos),
    AttrAssign(Expr, String, Expr, Pos),
    IndexAssign(Expr, Expr, Expr, Pos),
    MultiAssign(Vec<String>, Expr, Pos),

    If(Expr, Block, Vec<(Expr, Block)>, Option<Block>, Pos),
    While(Expr, Block, Pos),
    For(Vec<String>, Expr, Block, Pos),
    Break(Pos),
    Continue(Pos),
    Return(Option<Expr>, Pos),
    Pass(Pos),
    Delete(Expr, Pos),
    Global(Vec<String>, Pos),
    Nonlocal(Vec<String>, Pos),
    Try(Block, Vec<Handler>, Option<Block>, Pos),
    Raise(Expr, Pos),
    Import(String, Option<String>, Pos),
    FromImport(String, Vec<String>, Vec<Option<String>>, Pos),
    With(Expr, Option<String>, Block, Pos),
    Yield(Option<Expr>, Pos),

    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Params,
    pub decorators: Vec<Expr>,
    pub body: Block,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub base: Option<String>,
    pub decorators: Vec<Expr>,
    pub body: Block,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub stmts: Block,
}

impl Expr {
    pub fn pos(&self) -> &Pos {
        match self {
            Expr::Number(_, p)
            | Expr::Str(_, p)
            | Expr::Bool(_, p)
            | Expr::None(p)
            | Expr::FString(_, p)
            | Expr::Identifier(_, p)
            | Expr::List(_, p)
            | Expr::Tuple(_, p)
            | Expr::Dict(_, p)
            | Expr::Slice(_, _, _, p)
            | Expr::Binary(_, _, _, p)
            | Expr::Compare(_, _, p)
            | Expr::Unary(_, _, p)
            | Expr::Ternary(_, _, _, p)
            | Expr::Lambda(_, _, p)
            | Expr::Attribute(_, _, p)
            | Expr::Index(_, _, p)
            | Expr::Call(_, _, _, p)
            | Expr::ListComp(_, _, _, _, p) => p,
        }
    }
}
