//! Hand-written lexer for EAC source.
//!
//! Statements end at `.`; newlines are structural only for indentation
//! blocks, which follow the Python model: the lexer emits `Newline`,
//! `Indent` and `Dedent` tokens and the parser decides what matters.
//! Typed literals (money, dates, ranges) are decoded here so later stages
//! never re-parse lexemes.

use chrono::NaiveDate;
use thiserror::Error;

use crate::money::{Currency, Money};
use crate::range::Range;
use crate::token::{Keyword, SourceLoc, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character '{character}' at {line}:{column}")]
    UnexpectedCharacter {
        character: char,
        line: usize,
        column: usize,
    },
    #[error("unterminated string literal at {line}:{column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("invalid date literal \"{literal}\" at {line}:{column}")]
    InvalidDate {
        literal: String,
        line: usize,
        column: usize,
    },
    #[error("invalid number literal '{literal}' at {line}:{column}")]
    InvalidNumber {
        literal: String,
        line: usize,
        column: usize,
    },
    #[error("invalid range '{literal}' at {line}:{column}: end cell lies before start cell")]
    BackwardsRange {
        literal: String,
        line: usize,
        column: usize,
    },
    #[error("inconsistent indentation at {line}:{column}")]
    InconsistentDedent { line: usize, column: usize },
}

impl LexError {
    pub fn loc(&self) -> SourceLoc {
        match *self {
            LexError::UnexpectedCharacter { line, column, .. }
            | LexError::UnterminatedString { line, column }
            | LexError::InvalidDate { line, column, .. }
            | LexError::InvalidNumber { line, column, .. }
            | LexError::BackwardsRange { line, column, .. }
            | LexError::InconsistentDedent { line, column } => SourceLoc::new(line, column),
        }
    }
}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    indent_stack: Vec<usize>,
    pending: Vec<Token>,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            pending: Vec::new(),
            at_line_start: true,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token> {
        loop {
            if let Some(token) = self.pending.pop() {
                return Ok(token);
            }

            if self.at_line_start {
                self.at_line_start = false;
                self.handle_indentation()?;
                continue;
            }

            self.skip_inline_whitespace();

            if self.peek_char().is_none() {
                self.flush_eof_dedents();
                if !self.pending.is_empty() {
                    continue;
                }
                return Ok(Token::new(TokenKind::Eof, "", self.loc()));
            }

            if self.at_comment_start() {
                self.skip_comment();
                continue;
            }

            return self.read_token();
        }
    }

    /// Measure leading whitespace and queue Indent/Dedent tokens. Blank and
    /// comment-only lines leave the indentation depth untouched.
    fn handle_indentation(&mut self) -> LexResult<()> {
        let loc = self.loc();
        let mut width = 0usize;
        while let Some(c) = self.peek_char() {
            match c {
                ' ' => width += 1,
                '\t' => width += 4,
                _ => break,
            }
            self.consume_char();
        }
        if matches!(self.peek_char(), Some('\n') | None) || self.at_comment_start() {
            return Ok(());
        }

        let current = *self.indent_stack.last().unwrap_or(&0);
        if width > current {
            self.indent_stack.push(width);
            self.pending.push(Token::new(TokenKind::Indent, "", loc));
        } else if width < current {
            while self.indent_stack.last().is_some_and(|&top| top > width) {
                self.indent_stack.pop();
                self.pending.push(Token::new(TokenKind::Dedent, "", loc));
            }
            if *self.indent_stack.last().unwrap_or(&0) != width {
                return Err(LexError::InconsistentDedent {
                    line: loc.line,
                    column: loc.column,
                });
            }
        }
        Ok(())
    }

    fn read_token(&mut self) -> LexResult<Token> {
        let loc = self.loc();
        let c = self.peek_char().expect("read_token called at EOF");

        if c == '\n' {
            self.consume_char();
            self.at_line_start = true;
            return Ok(Token::new(TokenKind::Newline, "\n", loc));
        }
        if c == '"' {
            return self.read_string(loc);
        }
        if c.is_ascii_digit() {
            return self.read_number(loc, false);
        }
        if c.is_alphabetic() || c == '_' {
            return self.read_word(loc);
        }
        if let Some(token) = self.read_punct(loc) {
            return Ok(token);
        }

        Err(LexError::UnexpectedCharacter {
            character: c,
            line: loc.line,
            column: loc.column,
        })
    }

    fn read_punct(&mut self, loc: SourceLoc) -> Option<Token> {
        let c = self.peek_char()?;
        let (kind, lexeme) = match c {
            '.' => (TokenKind::Dot, "."),
            ',' => (TokenKind::Comma, ","),
            ':' => (TokenKind::Colon, ":"),
            ';' => (TokenKind::Semicolon, ";"),
            '(' => (TokenKind::LParen, "("),
            ')' => (TokenKind::RParen, ")"),
            '+' => (TokenKind::Plus, "+"),
            '*' => (TokenKind::Star, "*"),
            '/' => (TokenKind::Slash, "/"),
            '-' => (TokenKind::Minus, "-"),
            '=' => (TokenKind::Eq, "="),
            '!' if self.peek_second() == Some('=') => (TokenKind::Ne, "!="),
            '>' if self.peek_second() == Some('=') => (TokenKind::Ge, ">="),
            '>' => (TokenKind::Gt, ">"),
            '<' if self.peek_second() == Some('=') => (TokenKind::Le, "<="),
            '<' => (TokenKind::Lt, "<"),
            _ => return None,
        };
        for _ in 0..lexeme.len() {
            self.consume_char();
        }
        Some(Token::new(kind, lexeme, loc))
    }

    fn read_string(&mut self, loc: SourceLoc) -> LexResult<Token> {
        self.consume_char(); // opening quote
        let mut decoded = String::new();
        let mut raw = String::from('"');
        loop {
            match self.consume_char() {
                Some('"') => {
                    raw.push('"');
                    return Ok(Token::new(TokenKind::Str(decoded), raw, loc));
                }
                Some('\\') => {
                    raw.push('\\');
                    match self.consume_char() {
                        Some(escaped @ ('"' | '\\')) => {
                            raw.push(escaped);
                            decoded.push(escaped);
                        }
                        Some(other) => {
                            raw.push(other);
                            decoded.push('\\');
                            decoded.push(other);
                        }
                        None => {
                            return Err(LexError::UnterminatedString {
                                line: loc.line,
                                column: loc.column,
                            });
                        }
                    }
                }
                Some('\n') | None => {
                    return Err(LexError::UnterminatedString {
                        line: loc.line,
                        column: loc.column,
                    });
                }
                Some(other) => {
                    raw.push(other);
                    decoded.push(other);
                }
            }
        }
    }

    /// Read an integer-and-optional-fraction literal. A `.` is only part of
    /// the number when a digit follows, so the sentence period after
    /// `Set x to 1.` stays a separate token. Underscore separators are
    /// accepted (and stripped) only inside money amounts.
    fn read_number(&mut self, loc: SourceLoc, allow_underscores: bool) -> LexResult<Token> {
        let mut raw = String::new();
        self.consume_digits(&mut raw, allow_underscores);
        if self.peek_char() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.consume_char();
            raw.push('.');
            self.consume_digits(&mut raw, allow_underscores);
        }
        let cleaned: String = raw.chars().filter(|&c| c != '_').collect();
        let value: f64 = cleaned.parse().map_err(|_| LexError::InvalidNumber {
            literal: raw.clone(),
            line: loc.line,
            column: loc.column,
        })?;
        Ok(Token::new(TokenKind::Number(value), raw, loc))
    }

    fn consume_digits(&mut self, raw: &mut String, allow_underscores: bool) {
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || (allow_underscores && c == '_') {
                raw.push(c);
                self.consume_char();
            } else {
                break;
            }
        }
    }

    /// Words resolve in priority order: range literal shape, money literal
    /// head, the `date` literal head, keyword, identifier.
    fn read_word(&mut self, loc: SourceLoc) -> LexResult<Token> {
        let input = self.input;
        let start = self.pos;
        while self
            .peek_char()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.consume_char();
        }
        let word = &input[start..self.pos];

        if Range::matches(word) {
            return match Range::parse(word) {
                Ok(range) => Ok(Token::new(TokenKind::Range(range), word, loc)),
                Err(_) => Err(LexError::BackwardsRange {
                    literal: word.to_string(),
                    line: loc.line,
                    column: loc.column,
                }),
            };
        }

        if let Some(currency) = Currency::from_code(word) {
            if let Some(token) = self.try_read_money(currency, word, loc)? {
                return Ok(token);
            }
        }

        match Keyword::from_lexeme(word) {
            Some(Keyword::Date) => {
                if let Some(token) = self.try_read_date(loc)? {
                    return Ok(token);
                }
                Ok(Token::new(TokenKind::Keyword(Keyword::Date), word, loc))
            }
            Some(keyword) => Ok(Token::new(TokenKind::Keyword(keyword), word, loc)),
            None => Ok(Token::new(TokenKind::Ident(word.to_string()), word, loc)),
        }
    }

    /// `USD 1_000.50` — a currency code immediately followed by an amount.
    /// A bare currency code stays an identifier.
    fn try_read_money(
        &mut self,
        currency: Currency,
        code: &str,
        loc: SourceLoc,
    ) -> LexResult<Option<Token>> {
        let checkpoint = (self.pos, self.line, self.column);
        self.skip_inline_whitespace();
        if !self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            (self.pos, self.line, self.column) = checkpoint;
            return Ok(None);
        }
        let amount_loc = self.loc();
        let number = self.read_number(amount_loc, true)?;
        let cleaned: String = number.lexeme.chars().filter(|&c| c != '_').collect();
        let (int_digits, frac_digits) = match cleaned.split_once('.') {
            Some((int_part, frac_part)) => (int_part.to_string(), frac_part.to_string()),
            None => (cleaned, String::new()),
        };
        let money = Money::from_literal_parts(currency, &int_digits, &frac_digits).ok_or(
            LexError::InvalidNumber {
                literal: number.lexeme.clone(),
                line: amount_loc.line,
                column: amount_loc.column,
            },
        )?;
        let lexeme = format!("{code} {}", number.lexeme);
        Ok(Some(Token::new(TokenKind::Money(money), lexeme, loc)))
    }

    /// `date "2026-02-11"` — the keyword followed by a quoted ISO date.
    /// Shape and calendar validity are both checked here.
    fn try_read_date(&mut self, loc: SourceLoc) -> LexResult<Option<Token>> {
        let checkpoint = (self.pos, self.line, self.column);
        self.skip_inline_whitespace();
        if self.peek_char() != Some('"') {
            (self.pos, self.line, self.column) = checkpoint;
            return Ok(None);
        }
        let string_loc = self.loc();
        let token = self.read_string(string_loc)?;
        let TokenKind::Str(literal) = &token.kind else {
            unreachable!("read_string yields Str");
        };
        let date = parse_iso_date(literal).ok_or_else(|| LexError::InvalidDate {
            literal: literal.clone(),
            line: string_loc.line,
            column: string_loc.column,
        })?;
        let lexeme = format!("date {}", token.lexeme);
        Ok(Some(Token::new(TokenKind::Date(date), lexeme, loc)))
    }

    fn at_comment_start(&self) -> bool {
        self.peek_char() == Some('-') && self.peek_second() == Some('-')
    }

    fn skip_comment(&mut self) {
        while self.peek_char().is_some_and(|c| c != '\n') {
            self.consume_char();
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(' ' | '\t' | '\r')) {
            self.consume_char();
        }
    }

    fn flush_eof_dedents(&mut self) {
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.pending.push(Token::new(TokenKind::Dedent, "", self.loc()));
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.line, self.column)
    }
}

/// Strict `YYYY-MM-DD`, then Gregorian calendar validation.
fn parse_iso_date(literal: &str) -> Option<NaiveDate> {
    let bytes = literal.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let digits_at = |range: std::ops::Range<usize>| -> Option<u32> {
        let part = &literal[range];
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        part.parse().ok()
    };
    let year = digits_at(0..4)? as i32;
    let month = digits_at(5..7)?;
    let day = digits_at(8..10)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}
