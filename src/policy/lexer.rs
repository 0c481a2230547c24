//! Tokenizer for policy text.

use crate::{Error, Result};

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    /// String literal body, escapes still unresolved
    Str(String),
    Long(i64),
    Decimal(f64),
    At,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    DoubleColon,
    Dot,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
}

impl Token {
    /// Human-readable description for error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("`{}`", s),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Long(n) => format!("number {}", n),
            Token::Decimal(n) => format!("number {}", n),
            Token::At => "`@`".into(),
            Token::LParen => "`(`".into(),
            Token::RParen => "`)`".into(),
            Token::LBrace => "`{`".into(),
            Token::RBrace => "`}`".into(),
            Token::LBracket => "`[`".into(),
            Token::RBracket => "`]`".into(),
            Token::Comma => "`,`".into(),
            Token::Semi => "`;`".into(),
            Token::Colon => "`:`".into(),
            Token::DoubleColon => "`::`".into(),
            Token::Dot => "`.`".into(),
            Token::Eq => "`==`".into(),
            Token::Ne => "`!=`".into(),
            Token::Lt => "`<`".into(),
            Token::Le => "`<=`".into(),
            Token::Gt => "`>`".into(),
            Token::Ge => "`>=`".into(),
            Token::And => "`&&`".into(),
            Token::Or => "`||`".into(),
            Token::Not => "`!`".into(),
            Token::Plus => "`+`".into(),
            Token::Minus => "`-`".into(),
            Token::Star => "`*`".into(),
        }
    }
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.src.len())
    }

    fn bump(&mut self) -> Option<char> {
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

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    fn tokenize(mut self) -> Result<Vec<Spanned>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia();
            let Some(c) = self.peek() else {
                return Ok(tokens);
            };
            let (line, column, start) = (self.line, self.column, self.offset());

            let token = match c {
                '"' => self.string(line, column)?,
                c if c.is_ascii_digit() => self.number(line, column)?,
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut word = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            word.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    Token::Ident(word)
                }
                _ => self.symbol(c, line, column)?,
            };

            tokens.push(Spanned {
                token,
                line,
                column,
                start,
                end: self.offset(),
            });
        }
    }

    fn string(&mut self, line: usize, column: usize) -> Result<Token> {
        self.bump();
        let mut body = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(Token::Str(body)),
                Some('\\') => {
                    body.push('\\');
                    match self.bump() {
                        Some(c) => body.push(c),
                        None => break,
                    }
                }
                Some(c) => body.push(c),
                None => break,
            }
        }
        Err(Error::parse_at("unterminated string literal", line, column))
    }

    fn number(&mut self, line: usize, column: usize) -> Result<Token> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }

        let is_decimal = self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit());
        if is_decimal {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            return text
                .parse::<f64>()
                .map(Token::Decimal)
                .map_err(|_| Error::parse_at(format!("invalid decimal `{}`", text), line, column));
        }

        text.parse::<i64>()
            .map(Token::Long)
            .map_err(|_| Error::parse_at(format!("integer `{}` out of range", text), line, column))
    }

    fn symbol(&mut self, c: char, line: usize, column: usize) -> Result<Token> {
        let next = self.peek_next();
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            (':', Some(':')) => (Token::DoubleColon, 2),
            ('!', _) => (Token::Not, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('@', _) => (Token::At, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            (';', _) => (Token::Semi, 1),
            (':', _) => (Token::Colon, 1),
            ('.', _) => (Token::Dot, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('=', _) => {
                return Err(Error::parse_at(
                    "unexpected `=`, use `==` for comparison",
                    line,
                    column,
                ))
            }
            (other, _) => {
                return Err(Error::parse_at(
                    format!("unexpected character `{}`", other),
                    line,
                    column,
                ))
            }
        };
        for _ in 0..width {
            self.bump();
        }
        Ok(token)
    }
}

/// Split policy text into tokens.
pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>> {
    Lexer::new(src).tokenize()
}
