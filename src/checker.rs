//! Static type checker.
//!
//! A single left-to-right pass over the AST that builds the symbol table,
//! resolves variables, tables and column references, and enforces the
//! literal domains: money arithmetic never mixes currencies, dates follow
//! the date algebra, predicates must be boolean. Errors are accumulated in
//! a vector; the first fatal error inside a statement aborts that statement
//! and checking resumes with the next one.

use std::collections::HashMap;

use thiserror::Error;

use crate::ast::{
    Aggregation, AggOp, BinaryOp, BuiltinFn, Expr, ExprKind, Program, Stmt, StmtKind, TypeName,
    UnaryOp,
};
use crate::money::Currency;
use crate::token::SourceLoc;

/// Inferred type of an expression or binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    String,
    Number,
    Money(Currency),
    Date,
    Boolean,
    /// A row of the named table; `None` when the table is not statically
    /// known (a bare `Define r as row.`).
    Row(Option<String>),
    Table,
    Unknown,
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::String => write!(f, "String"),
            Type::Number => write!(f, "Number"),
            Type::Money(currency) => write!(f, "Money({currency})"),
            Type::Date => write!(f, "Date"),
            Type::Boolean => write!(f, "Boolean"),
            Type::Row(Some(table)) => write!(f, "Row({table})"),
            Type::Row(None) => write!(f, "Row"),
            Type::Table => write!(f, "Table"),
            Type::Unknown => write!(f, "Unknown"),
        }
    }
}

impl Type {
    fn is_orderable(&self) -> bool {
        matches!(
            self,
            Type::Number | Type::Money(_) | Type::Date | Type::String | Type::Unknown
        )
    }

    fn accepts_boolean(&self) -> bool {
        matches!(self, Type::Boolean | Type::Unknown)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("unknown table '{name}'")]
    UnknownTable {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("'{name}' is not defined")]
    UnknownVariable {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn {
        table: String,
        column: String,
        line: usize,
        column_no: usize,
    },
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        left: Currency,
        right: Currency,
        line: usize,
        column: usize,
    },
    #[error("operator '{op}' cannot combine {left} and {right}")]
    InvalidOperands {
        op: &'static str,
        left: Type,
        right: Type,
        line: usize,
        column: usize,
    },
    #[error("expected Boolean, got {found}")]
    NotBoolean {
        found: Type,
        line: usize,
        column: usize,
    },
    #[error("sort key of type {found} is not orderable")]
    NotOrderable {
        found: Type,
        line: usize,
        column: usize,
    },
    #[error("{function}() expects {expected} arguments, got {found}")]
    BuiltinArityMismatch {
        function: &'static str,
        expected: usize,
        found: usize,
        line: usize,
        column: usize,
    },
    #[error("{function}() expects Date arguments, got {found}")]
    BuiltinArgumentType {
        function: &'static str,
        found: Type,
        line: usize,
        column: usize,
    },
}

impl TypeError {
    pub fn loc(&self) -> SourceLoc {
        match *self {
            TypeError::UnknownTable { line, column, .. }
            | TypeError::UnknownVariable { line, column, .. }
            | TypeError::CurrencyMismatch { line, column, .. }
            | TypeError::InvalidOperands { line, column, .. }
            | TypeError::NotBoolean { line, column, .. }
            | TypeError::NotOrderable { line, column, .. }
            | TypeError::BuiltinArityMismatch { line, column, .. }
            | TypeError::BuiltinArgumentType { line, column, .. } => SourceLoc::new(line, column),
            TypeError::UnknownColumn {
                line, column_no, ..
            } => SourceLoc::new(line, column_no),
        }
    }
}

type CheckResult<T> = Result<T, TypeError>;

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub columns: HashMap<String, Type>,
    /// False until the full column set is known (a freshly read range has an
    /// open schema; columns register lazily as they are referenced).
    pub schema_known: bool,
    pub origin_stmt_index: usize,
}

impl TableInfo {
    fn open(origin_stmt_index: usize) -> Self {
        Self {
            columns: HashMap::new(),
            schema_known: false,
            origin_stmt_index,
        }
    }
}

/// Built during checking and carried forward to later consumers.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    pub variables: HashMap<String, Type>,
    pub tables: HashMap<String, TableInfo>,
}

impl SymbolTable {
    /// Look up `table.column`, registering the column as `Unknown` when the
    /// table's schema is still open.
    fn column_type(&mut self, table: &str, column: &str, loc: SourceLoc) -> CheckResult<Type> {
        let Some(info) = self.tables.get_mut(table) else {
            return Err(TypeError::UnknownTable {
                name: table.to_string(),
                line: loc.line,
                column: loc.column,
            });
        };
        if let Some(ty) = info.columns.get(column) {
            return Ok(ty.clone());
        }
        if info.schema_known {
            return Err(TypeError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
                line: loc.line,
                column_no: loc.column,
            });
        }
        info.columns.insert(column.to_string(), Type::Unknown);
        Ok(Type::Unknown)
    }
}

pub fn check(program: &Program) -> Result<SymbolTable, Vec<TypeError>> {
    let mut checker = Checker {
        symbols: SymbolTable::default(),
        errors: Vec::new(),
    };
    for (index, stmt) in program.statements.iter().enumerate() {
        if let Err(error) = checker.check_stmt(stmt, index) {
            checker.errors.push(error);
        }
    }
    if checker.errors.is_empty() {
        Ok(checker.symbols)
    } else {
        Err(checker.errors)
    }
}

struct Checker {
    symbols: SymbolTable,
    errors: Vec<TypeError>,
}

impl Checker {
    fn check_stmt(&mut self, stmt: &Stmt, index: usize) -> CheckResult<()> {
        match &stmt.kind {
            StmtKind::OpenWorkbook { .. } => Ok(()),
            StmtKind::TreatRange { table, .. } => {
                self.symbols
                    .tables
                    .insert(table.clone(), TableInfo::open(index));
                Ok(())
            }
            StmtKind::SetVar { name, expr } => {
                let ty = self.check_expr(expr, None)?;
                self.bind_variable(name, ty);
                Ok(())
            }
            StmtKind::AddColumn {
                column,
                table,
                expr,
            } => {
                self.require_table(table, stmt.loc)?;
                let ty = self.check_expr(expr, Some(table.as_str()))?;
                if let Some(info) = self.symbols.tables.get_mut(table) {
                    info.columns.insert(column.clone(), ty);
                }
                Ok(())
            }
            StmtKind::Filter { table, predicate } => {
                self.require_table(table, stmt.loc)?;
                let ty = self.check_expr(predicate, Some(table.as_str()))?;
                if !ty.accepts_boolean() {
                    return Err(TypeError::NotBoolean {
                        found: ty,
                        line: predicate.loc.line,
                        column: predicate.loc.column,
                    });
                }
                Ok(())
            }
            StmtKind::Sort { table, key, .. } => {
                self.require_table(table, stmt.loc)?;
                let ty = self.check_expr(key, Some(table.as_str()))?;
                if !ty.is_orderable() {
                    return Err(TypeError::NotOrderable {
                        found: ty,
                        line: key.loc.line,
                        column: key.loc.column,
                    });
                }
                Ok(())
            }
            StmtKind::Group {
                table,
                keys,
                aggregations,
            } => {
                self.require_table(table, stmt.loc)?;
                let mut grouped: HashMap<String, Type> = HashMap::new();
                for key in keys {
                    let ty = self.check_expr(key, Some(table.as_str()))?;
                    if let ExprKind::ColRef { column, .. } = &key.kind {
                        grouped.insert(column.clone(), ty);
                    }
                }
                for aggregation in aggregations {
                    let ty = self.check_aggregation(aggregation, table)?;
                    grouped.insert(aggregation.name.clone(), ty);
                }
                // The grouped result replaces the table with a closed schema.
                self.symbols.tables.insert(
                    table.clone(),
                    TableInfo {
                        columns: grouped,
                        schema_known: true,
                        origin_stmt_index: index,
                    },
                );
                Ok(())
            }
            StmtKind::Join { left, right, on } => {
                self.require_table(left, stmt.loc)?;
                self.require_table(right, stmt.loc)?;
                self.symbols.column_type(left, on, stmt.loc)?;
                self.symbols.column_type(right, on, stmt.loc)?;
                // Joined rows carry both sides' columns and replace `left`.
                let right_info = self.symbols.tables.get(right).cloned();
                if let (Some(right_info), Some(left_info)) =
                    (right_info, self.symbols.tables.get_mut(left))
                {
                    for (name, ty) in right_info.columns {
                        left_info.columns.entry(name).or_insert(ty);
                    }
                    left_info.schema_known = left_info.schema_known && right_info.schema_known;
                }
                Ok(())
            }
            StmtKind::Export { source, .. } => {
                self.check_expr(source, None)?;
                Ok(())
            }
            StmtKind::ForEach { var, table, body } => {
                self.require_table(table, stmt.loc)?;
                let shadowed = self
                    .symbols
                    .variables
                    .insert(var.clone(), Type::Row(Some(table.clone())));
                let result = self.check_block(body, index);
                match shadowed {
                    Some(previous) => {
                        self.symbols.variables.insert(var.clone(), previous);
                    }
                    None => {
                        self.symbols.variables.remove(var);
                    }
                }
                result
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let ty = self.check_expr(cond, None)?;
                if !ty.accepts_boolean() {
                    return Err(TypeError::NotBoolean {
                        found: ty,
                        line: cond.loc.line,
                        column: cond.loc.column,
                    });
                }
                self.check_block(then_body, index)?;
                self.check_block(else_body, index)
            }
            StmtKind::UseSystem { .. }
            | StmtKind::LogIn { .. }
            | StmtKind::LogOut
            | StmtKind::GoToPage { .. }
            | StmtKind::Click { .. } => Ok(()),
            StmtKind::EnterField { expr, .. } => {
                self.check_expr(expr, None)?;
                Ok(())
            }
            StmtKind::Extract { var, .. } => {
                self.bind_variable(var, Type::String);
                Ok(())
            }
            StmtKind::Define { name, ty } => {
                let ty = match ty {
                    TypeName::Number => Type::Number,
                    TypeName::String => Type::String,
                    TypeName::Boolean => Type::Boolean,
                    // Currency is only known once a value is assigned.
                    TypeName::Money => Type::Unknown,
                    TypeName::Date => Type::Date,
                    TypeName::Table => Type::Table,
                    TypeName::Row => Type::Row(None),
                };
                self.symbols.variables.insert(name.clone(), ty);
                Ok(())
            }
            StmtKind::CallResult { name } => {
                self.bind_variable(name, Type::Unknown);
                Ok(())
            }
            StmtKind::OnError { handler } => self.check_stmt(handler, index),
        }
    }

    fn check_block(&mut self, body: &[Stmt], index: usize) -> CheckResult<()> {
        for stmt in body {
            self.check_stmt(stmt, index)?;
        }
        Ok(())
    }

    fn check_aggregation(&mut self, aggregation: &Aggregation, table: &str) -> CheckResult<Type> {
        match (&aggregation.op, &aggregation.expr) {
            (AggOp::Count, _) => Ok(Type::Number),
            (_, Some(expr)) => self.check_expr(expr, Some(table)),
            (_, None) => Ok(Type::Unknown),
        }
    }

    fn require_table(&self, name: &str, loc: SourceLoc) -> CheckResult<()> {
        if self.symbols.tables.contains_key(name) {
            Ok(())
        } else {
            Err(TypeError::UnknownTable {
                name: name.to_string(),
                line: loc.line,
                column: loc.column,
            })
        }
    }

    /// Rebinding with a different type widens to Unknown (the variable stays
    /// in scope either way).
    fn bind_variable(&mut self, name: &str, ty: Type) {
        let widened = match self.symbols.variables.get(name) {
            Some(existing) if *existing != ty => Type::Unknown,
            _ => ty,
        };
        self.symbols.variables.insert(name.to_string(), widened);
    }

    /// Infer an expression's type. `row_table` is the row context of the
    /// enclosing table operation: inside it, bare identifiers fall back to
    /// columns of that table, and unknown columns register lazily.
    fn check_expr(&mut self, expr: &Expr, row_table: Option<&str>) -> CheckResult<Type> {
        match &expr.kind {
            ExprKind::String(_) => Ok(Type::String),
            ExprKind::Number(_) => Ok(Type::Number),
            ExprKind::Money(money) => Ok(Type::Money(money.currency())),
            ExprKind::Date(_) => Ok(Type::Date),
            ExprKind::Boolean(_) => Ok(Type::Boolean),
            ExprKind::Ident(name) => {
                if let Some(ty) = self.symbols.variables.get(name) {
                    return Ok(ty.clone());
                }
                if let Some(table) = row_table {
                    return self.symbols.column_type(table, name, expr.loc);
                }
                if self.symbols.tables.contains_key(name) {
                    return Ok(Type::Table);
                }
                Err(TypeError::UnknownVariable {
                    name: name.clone(),
                    line: expr.loc.line,
                    column: expr.loc.column,
                })
            }
            ExprKind::ColRef { table, column } => {
                // A row variable (or the bare `row` keyword) qualifies
                // columns of its table; otherwise the base must be a table
                // declared earlier in program order.
                if let Some(Type::Row(of_table)) = self.symbols.variables.get(table).cloned() {
                    return match of_table {
                        Some(of_table) => self.symbols.column_type(&of_table, column, expr.loc),
                        None => Ok(Type::Unknown),
                    };
                }
                if table == "row" {
                    if let Some(context) = row_table {
                        let context = context.to_string();
                        return self.symbols.column_type(&context, column, expr.loc);
                    }
                }
                self.symbols.column_type(table, column, expr.loc)
            }
            ExprKind::Binary { op, left, right } => {
                let left_ty = self.check_expr(left, row_table)?;
                let right_ty = self.check_expr(right, row_table)?;
                self.combine(*op, left_ty, right_ty, expr.loc)
            }
            ExprKind::Unary { op, operand } => {
                let ty = self.check_expr(operand, row_table)?;
                match op {
                    UnaryOp::Not => {
                        if ty.accepts_boolean() {
                            Ok(Type::Boolean)
                        } else {
                            Err(TypeError::NotBoolean {
                                found: ty,
                                line: operand.loc.line,
                                column: operand.loc.column,
                            })
                        }
                    }
                    UnaryOp::Neg => match ty {
                        Type::Number | Type::Unknown => Ok(Type::Number),
                        Type::Money(currency) => Ok(Type::Money(currency)),
                        other => Err(TypeError::InvalidOperands {
                            op: "-",
                            left: other,
                            right: Type::Number,
                            line: expr.loc.line,
                            column: expr.loc.column,
                        }),
                    },
                }
            }
            ExprKind::Call { function, args } => self.check_call(*function, args, row_table, expr),
        }
    }

    fn check_call(
        &mut self,
        function: BuiltinFn,
        args: &[Expr],
        row_table: Option<&str>,
        expr: &Expr,
    ) -> CheckResult<Type> {
        if args.len() != function.arity() {
            return Err(TypeError::BuiltinArityMismatch {
                function: function.name(),
                expected: function.arity(),
                found: args.len(),
                line: expr.loc.line,
                column: expr.loc.column,
            });
        }
        match function {
            BuiltinFn::Today => Ok(Type::Date),
            BuiltinFn::DaysBetween => {
                for arg in args {
                    let ty = self.check_expr(arg, row_table)?;
                    if !matches!(ty, Type::Date | Type::Unknown) {
                        return Err(TypeError::BuiltinArgumentType {
                            function: function.name(),
                            found: ty,
                            line: arg.loc.line,
                            column: arg.loc.column,
                        });
                    }
                }
                Ok(Type::Number)
            }
        }
    }

    /// The binary-operator typing table: money arithmetic is currency-safe,
    /// date algebra produces day counts, comparisons are boolean.
    fn combine(&self, op: BinaryOp, left: Type, right: Type, loc: SourceLoc) -> CheckResult<Type> {
        use BinaryOp::*;
        if matches!(op, And | Or) {
            for side in [&left, &right] {
                if !side.accepts_boolean() {
                    return Err(TypeError::NotBoolean {
                        found: side.clone(),
                        line: loc.line,
                        column: loc.column,
                    });
                }
            }
            return Ok(Type::Boolean);
        }

        if op.is_comparison() {
            if let (Type::Money(lc), Type::Money(rc)) = (&left, &right) {
                if lc != rc {
                    return Err(TypeError::CurrencyMismatch {
                        left: *lc,
                        right: *rc,
                        line: loc.line,
                        column: loc.column,
                    });
                }
            }
            // Ordering across value families never holds; equality across
            // families is permitted (and simply false at run time).
            let ordered = matches!(op, Lt | Le | Gt | Ge);
            if ordered && !same_family(&left, &right) {
                return Err(TypeError::InvalidOperands {
                    op: op.tag(),
                    left,
                    right,
                    line: loc.line,
                    column: loc.column,
                });
            }
            return Ok(Type::Boolean);
        }

        match (op, left, right) {
            (_, Type::Unknown, _) | (_, _, Type::Unknown) => Ok(Type::Unknown),
            (Add | Sub, Type::Money(lc), Type::Money(rc)) => {
                if lc == rc {
                    Ok(Type::Money(lc))
                } else {
                    Err(TypeError::CurrencyMismatch {
                        left: lc,
                        right: rc,
                        line: loc.line,
                        column: loc.column,
                    })
                }
            }
            (Mul, Type::Money(currency), Type::Number)
            | (Mul, Type::Number, Type::Money(currency))
            | (Div, Type::Money(currency), Type::Number) => Ok(Type::Money(currency)),
            (Sub, Type::Date, Type::Date) => Ok(Type::Number),
            (Add | Sub, Type::Date, Type::Number) | (Add, Type::Number, Type::Date) => {
                Ok(Type::Date)
            }
            (Add | Sub | Mul | Div, Type::Number, Type::Number) => Ok(Type::Number),
            (op, left, right) => Err(TypeError::InvalidOperands {
                op: op.tag(),
                left,
                right,
                line: loc.line,
                column: loc.column,
            }),
        }
    }
}

/// Two definite types belong to the same comparable family; `Unknown`
/// matches anything.
fn same_family(left: &Type, right: &Type) -> bool {
    match (left, right) {
        (Type::Unknown, _) | (_, Type::Unknown) => true,
        (Type::Money(_), Type::Money(_)) => true,
        (left, right) => left == right,
    }
}
