use std::fmt::Debug;

use crate::token::{ParseError, Position, Span};
use anyhow::{Result, anyhow};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Dot,       // .
    Ellipsis,  // ...
    Colon,     // :
    Comma,     // ,
    Semicolon, // ;
    Assign,    // =
    At,        // @
    Question,  // ?
    Eq,        // ==
    Ne,        // !=
    Gt,        // >
    Lt,        // <
    Ge,        // >=
    Le,        // <=
    And,       // &&
    Or,        // ||
    Impl,      // ->
    Not,       // !
    Add,       // +
    Sub,       // -
    Mul,       // *
    Div,       // /
    Concat,    // ++
    Update,    // //
    Let,       // let
    In,        // in
    If,        // if
    Then,      // then
    Else,      // else
    Assert,    // assert
    With,      // with
    Rec,       // rec
    Inherit,   // inherit
    Null,      // null
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Id(String),
}

impl Token {
    /// Short human readable form used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Int(i) => format!("integer {}", i),
            Token::Float(f) => format!("float {}", f),
            Token::Bool(b) => b.to_string(),
            Token::Id(name) => format!("identifier '{}'", name),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Dot => ".",
            Token::Ellipsis => "...",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Assign => "=",
            Token::At => "@",
            Token::Question => "?",
            Token::Eq => "==",
            Token::Ne => "!=",
            Token::Gt => ">",
            Token::Lt => "<",
            Token::Ge => ">=",
            Token::Le => "<=",
            Token::And => "&&",
            Token::Or => "||",
            Token::Impl => "->",
            Token::Not => "!",
            Token::Add => "+",
            Token::Sub => "-",
            Token::Mul => "*",
            Token::Div => "/",
            Token::Concat => "++",
            Token::Update => "//",
            Token::Let => "let",
            Token::In => "in",
            Token::If => "if",
            Token::Then => "then",
            Token::Else => "else",
            Token::Assert => "assert",
            Token::With => "with",
            Token::Rec => "rec",
            Token::Inherit => "inherit",
            Token::Null => "null",
            Token::Str(_) | Token::Int(_) | Token::Float(_) | Token::Bool(_) | Token::Id(_) => "literal",
        }
    }
}

const KEYWORDS: &[(&str, Token)] = &[
    ("let", Token::Let),
    ("in", Token::In),
    ("if", Token::If),
    ("then", Token::Then),
    ("else", Token::Else),
    ("assert", Token::Assert),
    ("with", Token::With),
    ("rec", Token::Rec),
    ("inherit", Token::Inherit),
    ("null", Token::Null),
    ("true", Token::Bool(true)),
    ("false", Token::Bool(false)),
];

#[inline]
fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '\'' | '-')
}

/// [chars] and [idx] can be used for syntax error reporting.
pub struct Tokenizer<'a> {
    chars: Vec<char>,
    idx: usize,
    len: usize,
    pub tokens: Vec<Token>,
    pub token_spans: Vec<Span>,
    line: u32,
    column: u32,
    input: &'a str,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        Self {
            len: chars.len(),
            chars,
            idx: 0,
            tokens: Vec::with_capacity(input.len() / 4),
            token_spans: Vec::with_capacity(input.len() / 4),
            line: 1,
            column: 1,
            input,
        }
    }

    pub fn tokenize(s: &str) -> Result<Vec<Token>> {
        let mut t = Tokenizer::new(s);
        t.parse()?;
        Ok(t.tokens)
    }

    /// Tokenize and return tokens with precise spans aligned by index
    pub fn tokenize_with_spans(s: &str) -> std::result::Result<(Vec<Token>, Vec<Span>), ParseError> {
        let mut t = Tokenizer::new(s);
        match t.parse() {
            Ok(()) => Ok((t.tokens, t.token_spans)),
            Err(err) => Err(t.enhanced_error(&format!("{}", err))),
        }
    }

    /// Attach the tokenizer's current cursor to an error message.
    pub fn enhanced_error(&self, msg: &str) -> ParseError {
        ParseError::with_position(msg.to_string(), self.current_position())
    }

    pub fn current_position(&self) -> Position {
        Position::new(self.line, self.column, self.idx)
    }

    fn eof(&self) -> bool {
        self.idx >= self.len
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.idx + ahead).copied()
    }

    fn expect(&mut self, s: &str) -> bool {
        let start_idx = self.idx;
        let start_line = self.line;
        let start_column = self.column;

        for c in s.chars() {
            if self.idx >= self.len || self.chars[self.idx] != c {
                self.idx = start_idx;
                self.line = start_line;
                self.column = start_column;
                return false;
            }
            self.advance_char();
        }
        true
    }

    fn err<T: AsRef<str>>(&self, msg: T) -> String {
        let line_context = self
            .input
            .lines()
            .nth((self.line as usize).saturating_sub(1))
            .unwrap_or_default();
        match self.chars.get(self.idx) {
            Some(c) => format!("{} ('{}' in line {}: {})", msg.as_ref(), c, self.line, line_context.trim()),
            None => format!("{} (at end of input)", msg.as_ref()),
        }
    }

    fn advance_char(&mut self) {
        if !self.eof() && self.chars[self.idx] == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.idx += 1;
    }

    fn skip_whitespace(&mut self) {
        while self.idx < self.len && self.chars[self.idx].is_whitespace() {
            self.advance_char();
        }
    }

    fn skip_line_comment(&mut self) {
        while !self.eof() {
            let c = self.chars[self.idx];
            self.advance_char();
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        // '/*' already consumed
        while !self.eof() {
            if self.expect("*/") {
                return Ok(());
            }
            self.advance_char();
        }
        Err(anyhow!(self.err("Block comment not closed")))
    }

    fn parse_str(&mut self) -> Result<()> {
        let start_pos = self.current_position();
        self.advance_char(); // opening quote
        let mut content = String::new();

        while !self.eof() {
            let c = self.chars[self.idx];
            match c {
                '"' => {
                    self.advance_char();
                    let end_pos = self.current_position();
                    self.push_with_span(Token::Str(content), start_pos, end_pos);
                    return Ok(());
                }
                '\\' => {
                    self.advance_char();
                    let Some(escaped) = self.peek_at(0) else {
                        break;
                    };
                    match escaped {
                        'n' => content.push('\n'),
                        'r' => content.push('\r'),
                        't' => content.push('\t'),
                        '\\' => content.push('\\'),
                        '"' => content.push('"'),
                        '$' => content.push('$'),
                        other => {
                            content.push('\\');
                            content.push(other);
                        }
                    }
                    self.advance_char();
                }
                _ => {
                    content.push(c);
                    self.advance_char();
                }
            }
        }

        Err(anyhow!(self.err("String not closed")))
    }

    fn parse_num(&mut self) -> Result<()> {
        let start_pos = self.current_position();
        let mut num = String::new();
        let mut is_float = false;

        while let Some(c) = self.peek_at(0) {
            if c.is_ascii_digit() {
                num.push(c);
                self.advance_char();
            } else if c == '.' && !is_float && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) {
                is_float = true;
                num.push(c);
                self.advance_char();
            } else if (c == 'e' || c == 'E') && !num.contains(['e', 'E']) {
                let signed = matches!(self.peek_at(1), Some('+' | '-'));
                let digit_at = if signed { 2 } else { 1 };
                if !self.peek_at(digit_at).is_some_and(|n| n.is_ascii_digit()) {
                    break;
                }
                is_float = true;
                num.push(c);
                self.advance_char();
                if signed {
                    if let Some(sign) = self.peek_at(0) {
                        num.push(sign);
                    }
                    self.advance_char();
                }
            } else {
                break;
            }
        }

        let token = if is_float {
            match num.parse() {
                Ok(f) => Token::Float(f),
                Err(_) => return Err(anyhow!("{}: {}", self.err("Invalid float"), num)),
            }
        } else {
            match num.parse() {
                Ok(i) => Token::Int(i),
                Err(_) => return Err(anyhow!("{}: {}", self.err("Invalid int"), num)),
            }
        };
        let end_pos = self.current_position();
        self.push_with_span(token, start_pos, end_pos);
        Ok(())
    }

    fn parse_word(&mut self) -> Result<()> {
        let start_pos = self.current_position();
        let mut word = String::new();
        while let Some(c) = self.peek_at(0) {
            if is_ident_continue(c) {
                word.push(c);
                self.advance_char();
            } else {
                break;
            }
        }
        if word.is_empty() {
            return Err(anyhow!(self.err("Invalid identifier start or unknown character")));
        }
        let end_pos = self.current_position();
        let token = KEYWORDS
            .iter()
            .find(|(kw, _)| *kw == word)
            .map(|(_, tok)| tok.clone())
            .unwrap_or(Token::Id(word));
        self.push_with_span(token, start_pos, end_pos);
        Ok(())
    }

    fn parse_punctuation(&mut self) -> Result<()> {
        // Longest operators first so `//` never lexes as two `/`.
        const OPERATORS: &[(&str, Token)] = &[
            ("...", Token::Ellipsis),
            ("==", Token::Eq),
            ("!=", Token::Ne),
            (">=", Token::Ge),
            ("<=", Token::Le),
            ("&&", Token::And),
            ("||", Token::Or),
            ("->", Token::Impl),
            ("++", Token::Concat),
            ("//", Token::Update),
            ("(", Token::LParen),
            (")", Token::RParen),
            ("{", Token::LBrace),
            ("}", Token::RBrace),
            ("[", Token::LBracket),
            ("]", Token::RBracket),
            (".", Token::Dot),
            (":", Token::Colon),
            (",", Token::Comma),
            (";", Token::Semicolon),
            ("=", Token::Assign),
            ("@", Token::At),
            ("?", Token::Question),
            (">", Token::Gt),
            ("<", Token::Lt),
            ("!", Token::Not),
            ("+", Token::Add),
            ("-", Token::Sub),
            ("*", Token::Mul),
            ("/", Token::Div),
        ];

        let start = self.current_position();
        for (text, token) in OPERATORS {
            if self.expect(text) {
                let end = self.current_position();
                self.push_with_span(token.clone(), start, end);
                return Ok(());
            }
        }
        Err(anyhow!(self.err("Unknown punctuation")))
    }

    fn parse(&mut self) -> Result<()> {
        loop {
            self.skip_whitespace();
            let Some(c) = self.peek_at(0) else {
                break;
            };
            match c {
                '#' => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('*') => {
                    self.advance_char();
                    self.advance_char();
                    self.skip_block_comment()?;
                }
                '"' => self.parse_str()?,
                '0'..='9' => self.parse_num()?,
                c if is_ident_start(c) => self.parse_word()?,
                _ => self.parse_punctuation()?,
            }
        }
        Ok(())
    }

    fn push_with_span(&mut self, token: Token, start: Position, end: Position) {
        self.tokens.push(token);
        self.token_spans.push(Span::new(start, end));
    }
}
