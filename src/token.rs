//! Token kinds produced by the lexer.

use num_bigint::BigInt;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn new(kind: TokenKind, line: u32, column: u32) -> Self {
        Token { kind, line, column }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(NumberLit),
    Str(String),
    FString(String),
    Benar,
    Salah,
    Tiada,
    Identifier(String),

    // Keywords
    Jika,
    AtauJika,
    Atau,
    Selagi,
    UntukDiulang,
    Dalam,
    Fungsi,
    Kelas,
    Kembali,
    Berhenti,
    Teruskan,
    Lulus,
    Cuba,
    Tangkap,
    Akhirnya,
    Bangkit,
    Import,
    Dari,
    Sebagai,
    Global,
    Nonlokal,
    Padam,
    Dengan,
    Berikan, // yield
    Lambda,
    Dan,
    AtauLogik,
    Bukan,
    Adalah,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    StarStar,
    Assign,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    SlashSlashEq,
    PercentEq,
    StarStarEq,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Arrow,
    At,

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Semicolon,

    // Synthetic
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NumberLit {
    Int(BigInt),
    Float(f64),
}
