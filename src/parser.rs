//! Recursive-descent parser: tokens -> AST, one token of look-ahead.
//!
//! Statements are dispatched on their leading keyword; each grammar sentence
//! has one `parse_*` production. Every simple statement must end with `.`,
//! and the missing-period diagnostic is the canonical
//! `Expected ., got <KIND> '<lexeme>'` message.

use thiserror::Error;

use crate::ast::{
    AggOp, Aggregation, BuiltinFn, BinaryOp, Expr, ExprKind, Program, Stmt, StmtKind, TypeName,
    UnaryOp,
};
use crate::token::{Keyword, SourceLoc, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Expected {expected}, got {found_tag} '{found_lexeme}'")]
    UnexpectedToken {
        expected: String,
        found_tag: String,
        found_lexeme: String,
        line: usize,
        column: usize,
    },
    #[error("comparisons cannot be chained")]
    ChainedComparison { line: usize, column: usize },
    #[error("unknown function '{name}'")]
    UnknownFunction {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("'{keyword}' is reserved but has no statement form")]
    ReservedStatement {
        keyword: String,
        line: usize,
        column: usize,
    },
}

impl ParseError {
    pub fn loc(&self) -> SourceLoc {
        match *self {
            ParseError::UnexpectedToken { line, column, .. }
            | ParseError::ChainedComparison { line, column }
            | ParseError::UnknownFunction { line, column, .. }
            | ParseError::ReservedStatement { line, column, .. } => SourceLoc::new(line, column),
        }
    }
}

type ParseResult<T> = Result<T, ParseError>;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::Eof, "", SourceLoc::default()));
        }
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> ParseResult<Program> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.current().kind, TokenKind::Eof) {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let token = self.current().clone();
        let TokenKind::Keyword(keyword) = token.kind else {
            return Err(self.error("a statement"));
        };
        match keyword {
            Keyword::Open => self.parse_open_workbook(),
            Keyword::In => self.parse_treat_range(),
            Keyword::Set => self.parse_set_var(),
            Keyword::Add => self.parse_add_column(),
            Keyword::Filter => self.parse_filter(),
            Keyword::Sort => self.parse_sort(),
            Keyword::Group => self.parse_group(),
            Keyword::Join => self.parse_join(),
            Keyword::Export => self.parse_export(),
            Keyword::For => self.parse_for_each(),
            Keyword::If => self.parse_if(),
            Keyword::Use => self.parse_use_system(),
            Keyword::Log => self.parse_log(),
            Keyword::Go => self.parse_go_to_page(),
            Keyword::Enter => self.parse_enter_field(),
            Keyword::Click => self.parse_click(),
            Keyword::Extract => self.parse_extract(),
            Keyword::Define => self.parse_define(),
            Keyword::Call => self.parse_call_result(),
            Keyword::On => self.parse_on_error(),
            Keyword::Download
            | Keyword::Select
            | Keyword::Lookup
            | Keyword::Wait
            | Keyword::Verify => Err(ParseError::ReservedStatement {
                keyword: keyword.as_str().to_string(),
                line: token.loc.line,
                column: token.loc.column,
            }),
            _ => Err(self.error("a statement")),
        }
    }

    // Open workbook "path".
    fn parse_open_workbook(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        self.expect_keyword(Keyword::Workbook)?;
        let path = self.expect_string()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::OpenWorkbook { path },
            loc,
        })
    }

    // In sheet "name", treat range A1G999 as table T.
    fn parse_treat_range(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        self.expect_keyword(Keyword::Sheet)?;
        let sheet = self.expect_string()?;
        self.expect(TokenKind::Comma, ",")?;
        self.expect_keyword(Keyword::Treat)?;
        self.expect_keyword(Keyword::Range)?;
        let range = match &self.current().kind {
            TokenKind::Range(range) => {
                let range = *range;
                self.advance();
                range
            }
            _ => return Err(self.error("a range like A1G999")),
        };
        self.expect_keyword(Keyword::As)?;
        self.expect_keyword(Keyword::Table)?;
        let table = self.expect_ident()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::TreatRange {
                sheet,
                range,
                table,
            },
            loc,
        })
    }

    // Set x to expr.
    fn parse_set_var(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let name = self.expect_ident()?;
        self.expect_keyword(Keyword::To)?;
        let expr = self.parse_expression()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::SetVar { name, expr },
            loc,
        })
    }

    // Add column C to T as expr.
    fn parse_add_column(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        self.expect_keyword(Keyword::Column)?;
        let column = self.expect_ident()?;
        self.expect_keyword(Keyword::To)?;
        let table = self.expect_ident()?;
        self.expect_keyword(Keyword::As)?;
        let expr = self.parse_expression()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::AddColumn {
                column,
                table,
                expr,
            },
            loc,
        })
    }

    // Filter T where predicate.
    fn parse_filter(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let table = self.expect_ident()?;
        self.expect_keyword(Keyword::Where)?;
        let predicate = self.parse_expression()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::Filter { table, predicate },
            loc,
        })
    }

    // Sort T by key [ascending|descending].
    fn parse_sort(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let table = self.expect_ident()?;
        self.expect_keyword(Keyword::By)?;
        let key = self.parse_expression()?;
        let ascending = match self.current().kind {
            TokenKind::Keyword(Keyword::Ascending) => {
                self.advance();
                true
            }
            TokenKind::Keyword(Keyword::Descending) => {
                self.advance();
                false
            }
            _ => true,
        };
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::Sort {
                table,
                key,
                ascending,
            },
            loc,
        })
    }

    // Group T by key, sum T.C as Name, count as N.
    //
    // A clause starting with sum/min/max (or count followed by `as`) is an
    // aggregation; anything else is a grouping key. Parenthesise a key to
    // force an expression that begins with one of those words.
    fn parse_group(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let table = self.expect_ident()?;
        self.expect_keyword(Keyword::By)?;
        let mut keys = Vec::new();
        let mut aggregations = Vec::new();
        loop {
            if let Some(aggregation) = self.try_parse_aggregation()? {
                aggregations.push(aggregation);
            } else {
                keys.push(self.parse_expression()?);
            }
            if matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::Group {
                table,
                keys,
                aggregations,
            },
            loc,
        })
    }

    fn try_parse_aggregation(&mut self) -> ParseResult<Option<Aggregation>> {
        let TokenKind::Ident(word) = &self.current().kind else {
            return Ok(None);
        };
        let Some(op) = AggOp::from_word(word) else {
            return Ok(None);
        };
        match op {
            AggOp::Count => {
                if !matches!(self.peek_kind(), TokenKind::Keyword(Keyword::As)) {
                    return Ok(None);
                }
                self.advance(); // count
                self.advance(); // as
                let name = self.expect_ident()?;
                Ok(Some(Aggregation {
                    op,
                    expr: None,
                    name,
                }))
            }
            _ => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_keyword(Keyword::As)?;
                let name = self.expect_ident()?;
                Ok(Some(Aggregation {
                    op,
                    expr: Some(expr),
                    name,
                }))
            }
        }
    }

    // Join L to R by Column.
    fn parse_join(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let left = self.expect_ident()?;
        self.expect_keyword(Keyword::To)?;
        let right = self.expect_ident()?;
        self.expect_keyword(Keyword::By)?;
        let on = self.expect_ident()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::Join { left, right, on },
            loc,
        })
    }

    // Export expr to "path".
    fn parse_export(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let source = self.parse_expression()?;
        self.expect_keyword(Keyword::To)?;
        let path = self.expect_string()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::Export { source, path },
            loc,
        })
    }

    // For each row r in T: <indented block>
    fn parse_for_each(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        self.expect_keyword(Keyword::Each)?;
        self.expect_keyword(Keyword::Row)?;
        let var = self.expect_ident()?;
        self.expect_keyword(Keyword::LowerIn)?;
        let table = self.expect_ident()?;
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::ForEach { var, table, body },
            loc,
        })
    }

    // If cond: <block> [Otherwise: <block>]
    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let cond = self.parse_expression()?;
        let then_body = self.parse_block()?;
        let mut else_body = Vec::new();
        let checkpoint = self.pos;
        self.skip_newlines();
        if matches!(self.current().kind, TokenKind::Keyword(Keyword::Otherwise)) {
            self.advance();
            else_body = self.parse_block()?;
        } else {
            self.pos = checkpoint;
        }
        Ok(Stmt {
            kind: StmtKind::If {
                cond,
                then_body,
                else_body,
            },
            loc,
        })
    }

    /// `:` NEWLINE INDENT statement+ DEDENT
    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(TokenKind::Colon, ":")?;
        self.skip_newlines();
        self.expect(TokenKind::Indent, "an indented block")?;
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.current().kind, TokenKind::Dedent | TokenKind::Eof) {
                break;
            }
            body.push(self.parse_statement()?);
        }
        if body.is_empty() {
            return Err(self.error("a statement"));
        }
        if matches!(self.current().kind, TokenKind::Dedent) {
            self.advance();
        }
        Ok(body)
    }

    // Use system "name" version "v".
    fn parse_use_system(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        self.expect_keyword(Keyword::System)?;
        let name = self.expect_string()?;
        self.expect_keyword(Keyword::Version)?;
        let version = self.expect_string()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::UseSystem { name, version },
            loc,
        })
    }

    // Log in [as credential "name"]. / Log out.
    fn parse_log(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        match &self.current().kind {
            TokenKind::Keyword(Keyword::LowerIn) => {
                self.advance();
                let mut credential = None;
                if matches!(self.current().kind, TokenKind::Keyword(Keyword::As)) {
                    self.advance();
                    self.expect_keyword(Keyword::Credential)?;
                    credential = Some(self.expect_string()?);
                }
                self.expect_period()?;
                Ok(Stmt {
                    kind: StmtKind::LogIn { credential },
                    loc,
                })
            }
            TokenKind::Ident(word) if word == "out" => {
                self.advance();
                self.expect_period()?;
                Ok(Stmt {
                    kind: StmtKind::LogOut,
                    loc,
                })
            }
            _ => Err(self.error("in or out")),
        }
    }

    // Go to page "name".
    fn parse_go_to_page(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        self.expect_keyword(Keyword::To)?;
        self.expect_keyword(Keyword::Page)?;
        let name = self.expect_string()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::GoToPage { name },
            loc,
        })
    }

    // Enter "selector" = expr.
    fn parse_enter_field(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let selector = self.expect_string()?;
        self.expect(TokenKind::Eq, "=")?;
        let expr = self.parse_expression()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::EnterField { selector, expr },
            loc,
        })
    }

    // Click "selector".
    fn parse_click(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let selector = self.expect_string()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::Click { selector },
            loc,
        })
    }

    // Extract x from field "selector".
    fn parse_extract(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let var = self.expect_ident()?;
        self.expect_keyword(Keyword::From)?;
        self.expect_word("field")?;
        let selector = self.expect_string()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::Extract { var, selector },
            loc,
        })
    }

    // Define x as number.
    fn parse_define(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        let name = self.expect_ident()?;
        self.expect_keyword(Keyword::As)?;
        let ty = match &self.current().kind {
            TokenKind::Ident(word) => TypeName::from_word(word),
            TokenKind::Keyword(Keyword::Date) => Some(TypeName::Date),
            TokenKind::Keyword(Keyword::Table) => Some(TypeName::Table),
            TokenKind::Keyword(Keyword::Row) => Some(TypeName::Row),
            _ => None,
        };
        let Some(ty) = ty else {
            return Err(self.error("a type name"));
        };
        self.advance();
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::Define { name, ty },
            loc,
        })
    }

    // Call result x.
    fn parse_call_result(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        self.expect_keyword(Keyword::Result)?;
        let name = self.expect_ident()?;
        self.expect_period()?;
        Ok(Stmt {
            kind: StmtKind::CallResult { name },
            loc,
        })
    }

    // On error: <statement>  (the handler carries its own period)
    fn parse_on_error(&mut self) -> ParseResult<Stmt> {
        let loc = self.advance().loc;
        self.expect_keyword(Keyword::Error)?;
        self.expect(TokenKind::Colon, ":")?;
        let handler = Box::new(self.parse_statement()?);
        Ok(Stmt {
            kind: StmtKind::OnError { handler },
            loc,
        })
    }

    // --- expressions ---

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_and()?;
        while matches!(self.current().kind, TokenKind::Keyword(Keyword::Or)) {
            let loc = self.advance().loc;
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right, loc);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_not()?;
        while matches!(self.current().kind, TokenKind::Keyword(Keyword::And)) {
            let loc = self.advance().loc;
            let right = self.parse_not()?;
            expr = binary(BinaryOp::And, expr, right, loc);
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if matches!(self.current().kind, TokenKind::Keyword(Keyword::Not)) {
            let loc = self.advance().loc;
            let operand = self.parse_not()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                loc,
            });
        }
        self.parse_comparison()
    }

    /// Comparisons are non-associative; `a < b < c` is a syntax error.
    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_additive()?;
        let Some(op) = self.comparison_op() else {
            return Ok(left);
        };
        let loc = self.advance().loc;
        let right = self.parse_additive()?;
        if self.comparison_op().is_some() {
            let chain_loc = self.current().loc;
            return Err(ParseError::ChainedComparison {
                line: chain_loc.line,
                column: chain_loc.column,
            });
        }
        Ok(binary(op, left, right, loc))
    }

    fn comparison_op(&self) -> Option<BinaryOp> {
        match self.current().kind {
            TokenKind::Eq => Some(BinaryOp::Eq),
            TokenKind::Ne => Some(BinaryOp::Ne),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            _ => None,
        }
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let loc = self.advance().loc;
            let right = self.parse_multiplicative()?;
            expr = binary(op, expr, right, loc);
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            let loc = self.advance().loc;
            let right = self.parse_unary()?;
            expr = binary(op, expr, right, loc);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if matches!(self.current().kind, TokenKind::Minus) {
            let loc = self.advance().loc;
            let operand = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                loc,
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        let loc = token.loc;
        match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Number(value),
                    loc,
                })
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::String(value),
                    loc,
                })
            }
            TokenKind::Money(money) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Money(money),
                    loc,
                })
            }
            TokenKind::Date(date) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Date(date),
                    loc,
                })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Boolean(true),
                    loc,
                })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Boolean(false),
                    loc,
                })
            }
            TokenKind::Keyword(Keyword::Row) => {
                // `row.Balance` inside a loop body written with the literal
                // keyword as the variable name.
                self.advance();
                let column = self.expect_qualifier()?;
                Ok(Expr {
                    kind: ExprKind::ColRef {
                        table: "row".to_string(),
                        column,
                    },
                    loc,
                })
            }
            TokenKind::Ident(name) => {
                self.advance();
                if matches!(self.current().kind, TokenKind::LParen) {
                    return self.parse_call(name, loc);
                }
                // Qualified T.C only when an identifier follows the dot;
                // otherwise the dot is the sentence period.
                if matches!(self.current().kind, TokenKind::Dot)
                    && matches!(self.peek_kind(), TokenKind::Ident(_))
                {
                    self.advance(); // dot
                    let column = self.expect_ident()?;
                    return Ok(Expr {
                        kind: ExprKind::ColRef {
                            table: name,
                            column,
                        },
                        loc,
                    });
                }
                Ok(Expr {
                    kind: ExprKind::Ident(name),
                    loc,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, ")")?;
                Ok(Expr { kind: expr.kind, loc })
            }
            _ => Err(self.error("an expression")),
        }
    }

    fn parse_call(&mut self, name: String, loc: SourceLoc) -> ParseResult<Expr> {
        let Some(function) = BuiltinFn::from_name(&name) else {
            return Err(ParseError::UnknownFunction {
                name,
                line: loc.line,
                column: loc.column,
            });
        };
        self.expect(TokenKind::LParen, "(")?;
        let mut args = Vec::new();
        if !matches!(self.current().kind, TokenKind::RParen) {
            args.push(self.parse_expression()?);
            while matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
                args.push(self.parse_expression()?);
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        Ok(Expr {
            kind: ExprKind::Call { function, args },
            loc,
        })
    }

    fn expect_qualifier(&mut self) -> ParseResult<String> {
        if !(matches!(self.current().kind, TokenKind::Dot)
            && matches!(self.peek_kind(), TokenKind::Ident(_)))
        {
            return Err(self.error("a column reference"));
        }
        self.advance();
        self.expect_ident()
    }

    // --- token plumbing ---

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|token| &token.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn skip_newlines(&mut self) {
        while matches!(self.current().kind, TokenKind::Newline) {
            self.advance();
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Token> {
        if self.current().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(expected))
        }
    }

    /// The period may sit on the next line; only real tokens count as
    /// offenders in the diagnostic.
    fn expect_period(&mut self) -> ParseResult<()> {
        self.skip_newlines();
        self.expect(TokenKind::Dot, ".")?;
        Ok(())
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<()> {
        if self.current().kind == TokenKind::Keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(keyword.as_str()))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        if let TokenKind::Ident(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error("an identifier"))
        }
    }

    fn expect_string(&mut self) -> ParseResult<String> {
        if let TokenKind::Str(value) = &self.current().kind {
            let value = value.clone();
            self.advance();
            Ok(value)
        } else {
            Err(self.error("a string"))
        }
    }

    /// Grammar words outside the closed keyword set (`field`, aggregation
    /// heads) are matched as identifier lexemes.
    fn expect_word(&mut self, word: &str) -> ParseResult<()> {
        match &self.current().kind {
            TokenKind::Ident(name) if name == word => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error(word)),
        }
    }

    fn error(&self, expected: &str) -> ParseError {
        let token = self.current();
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found_tag: token.kind.tag().to_string(),
            found_lexeme: token.lexeme.clone(),
            line: token.loc.line,
            column: token.loc.column,
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, loc: SourceLoc) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        loc,
    }
}

pub fn parse_tokens(tokens: Vec<Token>) -> ParseResult<Program> {
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use indoc::indoc;

    fn parse(source: &str) -> Program {
        parse_tokens(tokenize(source).expect("tokenize should succeed")).expect("parse failed")
    }

    fn parse_err(source: &str) -> ParseError {
        parse_tokens(tokenize(source).expect("tokenize should succeed"))
            .expect_err("expected parse failure")
    }

    #[test]
    fn empty_source_parses_to_empty_program() {
        assert!(parse("").statements.is_empty());
        assert!(parse("\n\n   \n").statements.is_empty());
    }

    #[test]
    fn parses_open_workbook() {
        let program = parse(r#"Open workbook "data/ar.xlsx"."#);
        assert_eq!(program.statements.len(), 1);
        assert_eq!(
            program.statements[0].kind,
            StmtKind::OpenWorkbook {
                path: "data/ar.xlsx".to_string()
            }
        );
    }

    #[test]
    fn parses_aging_report_skeleton() {
        let program = parse(indoc! {r#"
            Open workbook "a.xlsx".
            In sheet "Open Items", treat range A1G999 as table O.
            Set today to date "2026-02-11".
            Filter O where O.Balance > USD 0.00.
            Export O to "out.csv".
        "#});
        assert_eq!(program.statements.len(), 5);
        assert!(matches!(
            program.statements[1].kind,
            StmtKind::TreatRange { .. }
        ));
        assert!(matches!(program.statements[3].kind, StmtKind::Filter { .. }));
    }

    #[test]
    fn statements_carry_source_locations() {
        let program = parse("Set x to 1.\nSet y to 2.");
        assert_eq!(program.statements[0].loc, SourceLoc::new(1, 1));
        assert_eq!(program.statements[1].loc, SourceLoc::new(2, 1));
    }

    #[test]
    fn missing_period_reports_eof() {
        let err = parse_err("Filter T where T.x > 0");
        assert_eq!(err.to_string(), "Expected ., got EOF ''");
        assert_eq!(err.loc(), SourceLoc::new(1, 23));
    }

    #[test]
    fn missing_period_reports_next_statement_keyword() {
        let err = parse_err("Set x to 1\nSet y to 2.");
        assert_eq!(err.to_string(), "Expected ., got KEYWORD 'Set'");
        assert_eq!(err.loc(), SourceLoc::new(2, 1));
    }

    #[test]
    fn qualified_reference_does_not_eat_sentence_period() {
        let program = parse("Filter T where T.Balance > 0.");
        let StmtKind::Filter { predicate, .. } = &program.statements[0].kind else {
            panic!("expected filter");
        };
        let ExprKind::Binary { left, .. } = &predicate.kind else {
            panic!("expected comparison");
        };
        assert_eq!(
            left.kind,
            ExprKind::ColRef {
                table: "T".to_string(),
                column: "Balance".to_string()
            }
        );
    }

    #[test]
    fn comparison_chaining_is_rejected() {
        let err = parse_err("Filter T where 1 < 2 < 3.");
        assert!(matches!(err, ParseError::ChainedComparison { .. }));
    }

    #[test]
    fn precedence_or_binds_loosest() {
        let program = parse("Set x to true or false and not true.");
        let StmtKind::SetVar { expr, .. } = &program.statements[0].kind else {
            panic!("expected set");
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Or);
        let ExprKind::Binary { op: right_op, .. } = &right.kind else {
            panic!("expected nested and");
        };
        assert_eq!(*right_op, BinaryOp::And);
    }

    #[test]
    fn arithmetic_precedence_mul_over_add() {
        let program = parse("Set x to 1 + 2 * 3.");
        let StmtKind::SetVar { expr, .. } = &program.statements[0].kind else {
            panic!("expected set");
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn unary_minus_parses_negative_literals() {
        let program = parse("Set x to -3.");
        let StmtKind::SetVar { expr, .. } = &program.statements[0].kind else {
            panic!("expected set");
        };
        assert!(matches!(
            &expr.kind,
            ExprKind::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn parses_for_each_block() {
        let program = parse(indoc! {r##"
            For each row r in Items:
                Enter "#amount" = r.Amount.
                Click "#post".
            Log out.
        "##});
        assert_eq!(program.statements.len(), 2);
        let StmtKind::ForEach { var, table, body } = &program.statements[0].kind else {
            panic!("expected for-each");
        };
        assert_eq!(var, "r");
        assert_eq!(table, "Items");
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn parses_if_otherwise() {
        let program = parse(indoc! {r#"
            If x > 0:
                Set y to 1.
            Otherwise:
                Set y to 2.
        "#});
        let StmtKind::If {
            then_body,
            else_body,
            ..
        } = &program.statements[0].kind
        else {
            panic!("expected if");
        };
        assert_eq!(then_body.len(), 1);
        assert_eq!(else_body.len(), 1);
    }

    #[test]
    fn if_without_otherwise_leaves_else_empty() {
        let program = parse(indoc! {r#"
            If x > 0:
                Set y to 1.
            Set z to 3.
        "#});
        assert_eq!(program.statements.len(), 2);
        let StmtKind::If { else_body, .. } = &program.statements[0].kind else {
            panic!("expected if");
        };
        assert!(else_body.is_empty());
    }

    #[test]
    fn parses_group_keys_and_aggregations() {
        let program = parse("Group T by T.Region, sum T.Balance as Total, count as N.");
        let StmtKind::Group {
            keys, aggregations, ..
        } = &program.statements[0].kind
        else {
            panic!("expected group");
        };
        assert_eq!(keys.len(), 1);
        assert_eq!(aggregations.len(), 2);
        assert_eq!(aggregations[0].op, AggOp::Sum);
        assert_eq!(aggregations[0].name, "Total");
        assert_eq!(aggregations[1].op, AggOp::Count);
        assert!(aggregations[1].expr.is_none());
    }

    #[test]
    fn parses_join() {
        let program = parse("Join Orders to Customers by CustomerId.");
        assert_eq!(
            program.statements[0].kind,
            StmtKind::Join {
                left: "Orders".to_string(),
                right: "Customers".to_string(),
                on: "CustomerId".to_string()
            }
        );
    }

    #[test]
    fn parses_web_statements() {
        let program = parse(indoc! {r##"
            Use system "SAP-Portal" version "2026.1".
            Log in as credential "erp_bot".
            Go to page "Invoice Entry".
            Enter "#vendor" = "ACME".
            Click "#submit".
            Extract doc from field "#docno".
            Log out.
        "##});
        assert_eq!(program.statements.len(), 7);
        assert_eq!(
            program.statements[1].kind,
            StmtKind::LogIn {
                credential: Some("erp_bot".to_string())
            }
        );
        assert_eq!(program.statements[6].kind, StmtKind::LogOut);
        assert_eq!(
            program.statements[5].kind,
            StmtKind::Extract {
                var: "doc".to_string(),
                selector: "#docno".to_string()
            }
        );
    }

    #[test]
    fn log_in_credential_is_optional() {
        let program = parse("Log in.");
        assert_eq!(
            program.statements[0].kind,
            StmtKind::LogIn { credential: None }
        );
    }

    #[test]
    fn parses_define_and_call_result() {
        let program = parse("Define total as money.\nCall result total.");
        assert_eq!(
            program.statements[0].kind,
            StmtKind::Define {
                name: "total".to_string(),
                ty: TypeName::Money
            }
        );
        assert_eq!(
            program.statements[1].kind,
            StmtKind::CallResult {
                name: "total".to_string()
            }
        );
    }

    #[test]
    fn parses_on_error_with_nested_handler() {
        let program = parse("On error: Click \"#retry\".\nClick \"#go\".");
        assert_eq!(program.statements.len(), 2);
        let StmtKind::OnError { handler } = &program.statements[0].kind else {
            panic!("expected on-error");
        };
        assert_eq!(
            handler.kind,
            StmtKind::Click {
                selector: "#retry".to_string()
            }
        );
    }

    #[test]
    fn parses_builtin_calls() {
        let program = parse("Set age to days_between(today(), d).");
        let StmtKind::SetVar { expr, .. } = &program.statements[0].kind else {
            panic!("expected set");
        };
        let ExprKind::Call { function, args } = &expr.kind else {
            panic!("expected call");
        };
        assert_eq!(*function, BuiltinFn::DaysBetween);
        assert_eq!(args.len(), 2);
        assert!(matches!(
            args[0].kind,
            ExprKind::Call {
                function: BuiltinFn::Today,
                ..
            }
        ));
    }

    #[test]
    fn unknown_function_is_rejected() {
        let err = parse_err("Set x to frobnicate(1).");
        assert!(matches!(err, ParseError::UnknownFunction { .. }));
    }

    #[test]
    fn reserved_keywords_have_no_statement_form() {
        let err = parse_err("Wait until x > 0.");
        assert_eq!(
            err.to_string(),
            "'Wait' is reserved but has no statement form"
        );
    }

    #[test]
    fn sort_defaults_to_ascending() {
        let program = parse("Sort T by T.Age.\nSort T by T.Age descending.");
        let StmtKind::Sort { ascending, .. } = program.statements[0].kind else {
            panic!("expected sort");
        };
        assert!(ascending);
        let StmtKind::Sort { ascending, .. } = program.statements[1].kind else {
            panic!("expected sort");
        };
        assert!(!ascending);
    }
}
