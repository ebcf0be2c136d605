//! Indentation-sensitive lexer (C1).
//!
//! Grounded on the reference `KilatLexer2`: an indent-unit stack seeded with
//! `[0]`, longest-match operator scanning, and raw (unescaped-at-lex-time)
//! capture of f-string bodies for the parser to re-lex later.

use std::str::FromStr;

use num_bigint::BigInt;

use crate::error::{Error, Result};
use crate::token::{NumberLit, Token, TokenKind};

fn keyword(word: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match word {
        "jika" => Jika,
        "ataujika" => AtauJika,
        "atau" => Atau,
        "selagi" => Selagi,
        "untuk" => return None, // handled specially: only valid as "untuk diulang"
        "dalam" => Dalam,
        "fungsi" => Fungsi,
        "kelas" => Kelas,
        "kembali" => Kembali,
        "berhenti" => Berhenti,
        "teruskan" => Teruskan,
        "lulus" => Lulus,
        "cuba" => Cuba,
        "tangkap" => Tangkap,
        "akhirnya" => Akhirnya,
        "bangkit" => Bangkit,
        "import" => Import,
        "dari" => Dari,
        "sebagai" => Sebagai,
        "global" => Global,
        "nonlokal" => Nonlokal,
        "padam" => Padam,
        "dengan" => Dengan,
        "berikan" => Berikan,
        "lambda" => Lambda,
        "dan" => Dan,
        "atau_logik" => AtauLogik,
        "bukan" => Bukan,
        "adalah" => Adalah,
        "benar" => Benar,
        "salah" => Salah,
        "tiada" => Tiada,
        _ => return None,
    })
}

pub struct Lexer<'a> {
    src: &'a [u8],
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    indent_stack: Vec<u32>,
    at_line_start: bool,
    paren_depth: i32,
    tokens: Vec<Token>,
}

const INDENT_WIDTH: u32 = 4;

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            at_line_start: true,
            paren_depth: 0,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        loop {
            if self.at_line_start && self.paren_depth == 0 {
                if !self.handle_line_start()? {
                    continue;
                }
            }
            self.skip_inline_whitespace();
            match self.peek() {
                None => break,
                Some(c) => {
                    if c == '\n' {
                        self.advance();
                        self.push(TokenKind::Newline);
                        self.at_line_start = true;
                        continue;
                    }
                    if c == '\r' {
                        self.advance();
                        continue;
                    }
                    if c == '#' {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                        continue;
                    }
                    if c == ';' {
                        self.advance();
                        self.push(TokenKind::Semicolon);
                        continue;
                    }
                    if c.is_ascii_digit() {
                        self.scan_number()?;
                        continue;
                    }
                    if c == '"' || c == '\'' {
                        self.scan_string(c, false)?;
                        continue;
                    }
                    if (c == 'f' || c == 'F') && matches!(self.peek_at(1), Some('"') | Some('\'')) {
                        self.advance();
                        let quote = self.peek().unwrap();
                        self.scan_string(quote, true)?;
                        continue;
                    }
                    if c.is_alphabetic() || c == '_' {
                        self.scan_identifier_or_keyword()?;
                        continue;
                    }
                    self.scan_operator()?;
                }
            }
        }
        // EOF: synthesize trailing NEWLINE if needed then DEDENTs.
        if !matches!(self.tokens.last().map(|t| &t.kind), Some(TokenKind::Newline) | None) {
            self.push(TokenKind::Newline);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Dedent);
        }
        self.push(TokenKind::Eof);
        Ok(self.tokens)
    }

    /// Returns `Ok(true)` if a logical line was found to lex (indentation
    /// resolved); `Ok(false)` if the line was blank/comment-only and the
    /// caller should loop again.
    fn handle_line_start(&mut self) -> Result<bool> {
        let start = self.pos;
        let mut units = 0u32;
        loop {
            match self.peek() {
                Some(' ') => {
                    units += 1;
                    self.advance();
                }
                Some('\t') => {
                    units += INDENT_WIDTH - (units % INDENT_WIDTH);
                    self.advance();
                }
                _ => break,
            }
        }
        match self.peek() {
            None => {
                self.at_line_start = false;
                return Ok(true);
            }
            Some('\n') => {
                self.advance();
                self.at_line_start = true;
                return Ok(false);
            }
            Some('\r') => {
                return Ok(false);
            }
            Some('#') => {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
                return Ok(false);
            }
            _ => {}
        }
        let _ = start;
        self.at_line_start = false;
        let top = *self.indent_stack.last().unwrap();
        if units > top {
            self.indent_stack.push(units);
            self.push(TokenKind::Indent);
        } else if units < top {
            while *self.indent_stack.last().unwrap() > units {
                self.indent_stack.pop();
                self.push(TokenKind::Dedent);
            }
            if *self.indent_stack.last().unwrap() != units {
                return Err(Error::lexical("inden tidak konsisten", self.line));
            }
        }
        Ok(true)
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind) {
        self.tokens.push(Token::new(kind, self.line, self.column));
    }

    fn scan_number(&mut self) -> Result<()> {
        let line = self.line;
        let col = self.column;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let kind = if is_float {
            let f: f64 = text.parse().map_err(|_| Error::lexical("nombor tidak sah", line))?;
            NumberLit::Float(f)
        } else {
            let i = BigInt::from_str(&text).map_err(|_| Error::lexical("nombor tidak sah", line))?;
            NumberLit::Int(i)
        };
        self.tokens.push(Token::new(TokenKind::Number(kind), line, col));
        Ok(())
    }

    fn scan_identifier_or_keyword(&mut self) -> Result<()> {
        let line = self.line;
        let col = self.column;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        if word == "untuk" {
            let save = self.pos;
            let save_line = self.line;
            let save_col = self.column;
            self.skip_inline_whitespace();
            let ds = self.pos;
            while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
                self.advance();
            }
            let word2: String = self.chars[ds..self.pos].iter().collect();
            if word2 == "diulang" {
                self.tokens.push(Token::new(TokenKind::UntukDiulang, line, col));
                return Ok(());
            }
            self.pos = save;
            self.line = save_line;
            self.column = save_col;
            self.tokens.push(Token::new(TokenKind::Identifier("untuk".to_string()), line, col));
            return Ok(());
        }
        let kind = keyword(&word).unwrap_or(TokenKind::Identifier(word));
        self.tokens.push(Token::new(kind, line, col));
        Ok(())
    }

    fn scan_string(&mut self, quote: char, is_fstring: bool) -> Result<()> {
        let line = self.line;
        let col = self.column;
        self.advance(); // opening quote
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }
        let mut content = String::new();
        loop {
            match self.peek() {
                None => return Err(Error::lexical("rentetan tidak ditamatkan", line)),
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => content.push('\n'),
                        Some('t') => content.push('\t'),
                        Some('r') => content.push('\r'),
                        Some('\\') => content.push('\\'),
                        Some('"') => content.push('"'),
                        Some('\'') => content.push('\''),
                        Some('0') => content.push('\0'),
                        Some(other) => {
                            content.push('\\');
                            content.push(other);
                        }
                        None => return Err(Error::lexical("rentetan tidak ditamatkan", line)),
                    }
                }
                Some(c) if c == quote => {
                    if triple {
                        if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                            self.advance();
                            self.advance();
                            self.advance();
                            break;
                        } else {
                            content.push(c);
                            self.advance();
                        }
                    } else {
                        self.advance();
                        break;
                    }
                }
                Some('\n') if !triple => {
                    return Err(Error::lexical("rentetan tidak ditamatkan", line));
                }
                Some(c) => {
                    content.push(c);
                    self.advance();
                }
            }
        }
        let kind = if is_fstring { TokenKind::FString(content) } else { TokenKind::Str(content) };
        self.tokens.push(Token::new(kind, line, col));
        Ok(())
    }

    fn scan_operator(&mut self) -> Result<()> {
        let line = self.line;
        let col = self.column;
        let three: String = self.chars[self.pos..(self.pos + 3).min(self.chars.len())].iter().collect();
        let two: String = self.chars[self.pos..(self.pos + 2).min(self.chars.len())].iter().collect();
        let one = self.peek().unwrap();

        let (kind, len) = match three.as_str() {
            "//=" => (TokenKind::SlashSlashEq, 3),
            "**=" => (TokenKind::StarStarEq, 3),
            _ => match two.as_str() {
                "==" => (TokenKind::Eq, 2),
                "!=" => (TokenKind::NotEq, 2),
                "<=" => (TokenKind::LtEq, 2),
                ">=" => (TokenKind::GtEq, 2),
                "//" => (TokenKind::SlashSlash, 2),
                "**" => (TokenKind::StarStar, 2),
                "+=" => (TokenKind::PlusEq, 2),
                "-=" => (TokenKind::MinusEq, 2),
                "*=" => (TokenKind::StarEq, 2),
                "/=" => (TokenKind::SlashEq, 2),
                "%=" => (TokenKind::PercentEq, 2),
                "->" => (TokenKind::Arrow, 2),
                _ => match one {
                    '+' => (TokenKind::Plus, 1),
                    '-' => (TokenKind::Minus, 1),
                    '*' => (TokenKind::Star, 1),
                    '/' => (TokenKind::Slash, 1),
                    '%' => (TokenKind::Percent, 1),
                    '=' => (TokenKind::Assign, 1),
                    '<' => (TokenKind::Lt, 1),
                    '>' => (TokenKind::Gt, 1),
                    '(' => {
                        self.paren_depth += 1;
                        (TokenKind::LParen, 1)
                    }
                    ')' => {
                        self.paren_depth -= 1;
                        (TokenKind::RParen, 1)
                    }
                    '{' => {
                        self.paren_depth += 1;
                        (TokenKind::LBrace, 1)
                    }
                    '}' => {
                        self.paren_depth -= 1;
                        (TokenKind::RBrace, 1)
                    }
                    '[' => {
                        self.paren_depth += 1;
                        (TokenKind::LBracket, 1)
                    }
                    ']' => {
                        self.paren_depth -= 1;
                        (TokenKind::RBracket, 1)
                    }
                    ',' => (TokenKind::Comma, 1),
                    ':' => (TokenKind::Colon, 1),
                    '.' => (TokenKind::Dot, 1),
                    '@' => (TokenKind::At, 1),
                    other => {
                        return Err(Error::lexical(format!("aksara tidak sah: '{}'", other), line));
                    }
                },
            },
        };
        for _ in 0..len {
            self.advance();
        }
        self.tokens.push(Token::new(kind, line, col));
        Ok(())
    }
}

pub fn lex(src: &str) -> Result<Vec<Token>> {
    Lexer::new(src).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind::*;

    #[test]
    fn lexes_simple_assignment() {
        let toks = lex("x = 1\n").unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| &t.kind).collect();
        assert_eq!(kinds, vec![&Identifier("x".into()), &Assign, &Number(NumberLit::Int(BigInt::from(1))), &Newline, &Eof]);
    }

    #[test]
    fn lexes_untuk_diulang_as_one_token() {
        let toks = lex("untuk diulang x dalam y:\n    lulus\n").unwrap();
        assert!(matches!(toks[0].kind, UntukDiulang));
    }

    #[test]
    fn tracks_indent_dedent() {
        let toks = lex("jika benar:\n    lulus\nlulus\n").unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| &t.kind).collect();
        assert!(kinds.contains(&&Indent));
        assert!(kinds.contains(&&Dedent));
    }

    #[test]
    fn rejects_inconsistent_dedent() {
        let err = lex("jika benar:\n    jika benar:\n        lulus\n  lulus\n");
        assert!(err.is_err());
    }
}
