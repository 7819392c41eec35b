//! Expression-tree evaluation.
//!
//! One evaluator serves two scopes: the interpreter evaluates argument
//! expressions against its full environment, and table-algebra providers
//! evaluate predicates and derived columns per row. The scope is supplied
//! through the [`Lookup`] seam; the operator semantics are shared.
//!
//! Null is absorbing in comparisons: any comparison against null is false,
//! except `!=`, which is true.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{Days, NaiveDate};

use crate::ast::{BinaryOp, BuiltinFn, UnaryOp};
use crate::ir::{ExprNode, Value};

use super::error::RuntimeError;
use super::value::{Datum, Row, Rows};

type EvalResult = Result<Datum, RuntimeError>;

/// Name-resolution seam for expression evaluation.
pub trait Lookup {
    fn variable(&self, name: &str) -> Option<Datum>;
    fn table(&self, name: &str) -> Option<Datum>;
    fn column(&self, base: &str, column: &str) -> Option<Datum>;
    fn today(&self) -> NaiveDate;
}

/// Full-environment scope used by the interpreter.
pub struct EnvScope<'a> {
    pub variables: &'a HashMap<String, Datum>,
    pub tables: &'a HashMap<String, Rows>,
    pub today: NaiveDate,
}

impl Lookup for EnvScope<'_> {
    fn variable(&self, name: &str) -> Option<Datum> {
        self.variables.get(name).cloned()
    }

    fn table(&self, name: &str) -> Option<Datum> {
        self.tables.get(name).map(|rows| Datum::Rows(rows.clone()))
    }

    fn column(&self, base: &str, column: &str) -> Option<Datum> {
        match self.variables.get(base) {
            Some(Datum::Row(row)) => Some(row.get(column).cloned().unwrap_or(Datum::Null)),
            _ => None,
        }
    }

    fn today(&self) -> NaiveDate {
        self.today
    }
}

/// Row context used by providers for predicates and derived columns. Bare
/// identifiers and qualified references to the context table both resolve
/// to fields of the current row; a missing field is null.
pub struct RowScope<'a> {
    pub table: &'a str,
    pub row: &'a Row,
    pub today: NaiveDate,
}

impl Lookup for RowScope<'_> {
    fn variable(&self, name: &str) -> Option<Datum> {
        Some(self.row.get(name).cloned().unwrap_or(Datum::Null))
    }

    fn table(&self, _name: &str) -> Option<Datum> {
        None
    }

    fn column(&self, base: &str, column: &str) -> Option<Datum> {
        if base == self.table || base == "row" {
            Some(self.row.get(column).cloned().unwrap_or(Datum::Null))
        } else {
            None
        }
    }

    fn today(&self) -> NaiveDate {
        self.today
    }
}

pub fn evaluate(node: &ExprNode, scope: &dyn Lookup) -> EvalResult {
    match node {
        ExprNode::Leaf(value) => evaluate_leaf(value, scope),
        ExprNode::Binary { op, left, right } => {
            // and/or short-circuit before the right side is touched.
            match op {
                BinaryOp::And => {
                    if !as_bool(&evaluate(left, scope)?)? {
                        return Ok(Datum::Bool(false));
                    }
                    Ok(Datum::Bool(as_bool(&evaluate(right, scope)?)?))
                }
                BinaryOp::Or => {
                    if as_bool(&evaluate(left, scope)?)? {
                        return Ok(Datum::Bool(true));
                    }
                    Ok(Datum::Bool(as_bool(&evaluate(right, scope)?)?))
                }
                _ => {
                    let left = evaluate(left, scope)?;
                    let right = evaluate(right, scope)?;
                    apply_binary(*op, left, right)
                }
            }
        }
        ExprNode::Unary { op, operand } => {
            let value = evaluate(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Datum::Bool(!as_bool(&value)?)),
                UnaryOp::Neg => match value {
                    Datum::Number(n) => Ok(Datum::Number(-n)),
                    Datum::Money(money) => Ok(Datum::Money(money.scaled_by(-1.0)?)),
                    other => Err(RuntimeError::InvalidOperands {
                        op: "neg",
                        left: other.type_name(),
                        right: "number",
                    }),
                },
            }
        }
        ExprNode::Call { function, args } => evaluate_call(*function, args, scope),
    }
}

fn evaluate_leaf(value: &Value, scope: &dyn Lookup) -> EvalResult {
    match value {
        Value::Literal(scalar) => Ok(Datum::from_scalar(scalar)),
        Value::VarRef(name) => scope
            .variable(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable { name: name.clone() }),
        Value::TableRef(name) => scope
            .table(name)
            .ok_or_else(|| RuntimeError::UndefinedTable { name: name.clone() }),
        Value::ColRef { table, column } => {
            scope
                .column(table, column)
                .ok_or_else(|| RuntimeError::UnresolvedColumn {
                    base: table.clone(),
                    column: column.clone(),
                })
        }
        Value::ExprTree(node) => evaluate(node, scope),
        Value::Block(_) | Value::List(_) => Err(RuntimeError::InvalidOperands {
            op: "eval",
            left: "block",
            right: "expression",
        }),
    }
}

fn evaluate_call(function: BuiltinFn, args: &[ExprNode], scope: &dyn Lookup) -> EvalResult {
    match function {
        BuiltinFn::Today => Ok(Datum::Date(scope.today())),
        BuiltinFn::DaysBetween => {
            let [from, to] = args else {
                return Err(RuntimeError::InvalidOperands {
                    op: "days_between",
                    left: "arguments",
                    right: "2 dates",
                });
            };
            let from = evaluate(from, scope)?;
            let to = evaluate(to, scope)?;
            match (from, to) {
                (Datum::Date(from), Datum::Date(to)) => {
                    Ok(Datum::Number((to - from).num_days() as f64))
                }
                (Datum::Null, _) | (_, Datum::Null) => Ok(Datum::Null),
                (from, to) => Err(RuntimeError::InvalidOperands {
                    op: "days_between",
                    left: from.type_name(),
                    right: to.type_name(),
                }),
            }
        }
    }
}

pub fn as_bool(value: &Datum) -> Result<bool, RuntimeError> {
    match value {
        Datum::Bool(value) => Ok(*value),
        other => Err(RuntimeError::ExpectedBoolean {
            got: other.type_name(),
        }),
    }
}

fn apply_binary(op: BinaryOp, left: Datum, right: Datum) -> EvalResult {
    if op.is_comparison() {
        return apply_comparison(op, &left, &right);
    }
    use BinaryOp::*;
    match (op, left, right) {
        (Add, Datum::Number(a), Datum::Number(b)) => Ok(Datum::Number(a + b)),
        (Sub, Datum::Number(a), Datum::Number(b)) => Ok(Datum::Number(a - b)),
        (Mul, Datum::Number(a), Datum::Number(b)) => Ok(Datum::Number(a * b)),
        (Div, Datum::Number(a), Datum::Number(b)) => Ok(Datum::Number(a / b)),
        (Add, Datum::Money(a), Datum::Money(b)) => Ok(Datum::Money(a.checked_add(b)?)),
        (Sub, Datum::Money(a), Datum::Money(b)) => Ok(Datum::Money(a.checked_sub(b)?)),
        (Mul, Datum::Money(money), Datum::Number(factor))
        | (Mul, Datum::Number(factor), Datum::Money(money)) => {
            Ok(Datum::Money(money.scaled_by(factor)?))
        }
        (Div, Datum::Money(money), Datum::Number(divisor)) => {
            Ok(Datum::Money(money.divided_by(divisor)?))
        }
        (Sub, Datum::Date(a), Datum::Date(b)) => Ok(Datum::Number((a - b).num_days() as f64)),
        (Add, Datum::Date(date), Datum::Number(days))
        | (Add, Datum::Number(days), Datum::Date(date)) => Ok(Datum::Date(shift_date(date, days)?)),
        (Sub, Datum::Date(date), Datum::Number(days)) => Ok(Datum::Date(shift_date(date, -days)?)),
        (Add, Datum::Str(a), Datum::Str(b)) => Ok(Datum::Str(a + &b)),
        (_, Datum::Null, _) | (_, _, Datum::Null) => Ok(Datum::Null),
        (op, left, right) => Err(RuntimeError::InvalidOperands {
            op: op.tag(),
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}

fn shift_date(date: NaiveDate, days: f64) -> Result<NaiveDate, RuntimeError> {
    let whole = days.trunc() as i64;
    let shifted = if whole >= 0 {
        date.checked_add_days(Days::new(whole as u64))
    } else {
        date.checked_sub_days(Days::new(whole.unsigned_abs()))
    };
    shifted.ok_or(RuntimeError::InvalidOperands {
        op: "+",
        left: "date",
        right: "number",
    })
}

fn apply_comparison(op: BinaryOp, left: &Datum, right: &Datum) -> EvalResult {
    // Null never orders; only `!=` sees it as different.
    if matches!(left, Datum::Null) || matches!(right, Datum::Null) {
        return Ok(Datum::Bool(op == BinaryOp::Ne));
    }
    if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
        let equal = match ordering(left, right) {
            Ok(ordering) => ordering == Ordering::Equal,
            // Values of different shapes are simply unequal.
            Err(RuntimeError::Incomparable { .. }) => false,
            Err(error) => return Err(error),
        };
        return Ok(Datum::Bool(if op == BinaryOp::Eq { equal } else { !equal }));
    }
    let ordering = ordering(left, right)?;
    let holds = match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        _ => unreachable!("non-comparison handled above"),
    };
    Ok(Datum::Bool(holds))
}

/// Total order over comparable datum pairs, used by comparisons and sort
/// keys. Nulls sort first so sorting a ragged column stays deterministic.
pub fn ordering(left: &Datum, right: &Datum) -> Result<Ordering, RuntimeError> {
    match (left, right) {
        (Datum::Null, Datum::Null) => Ok(Ordering::Equal),
        (Datum::Null, _) => Ok(Ordering::Less),
        (_, Datum::Null) => Ok(Ordering::Greater),
        (Datum::Number(a), Datum::Number(b)) => Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal)),
        (Datum::Str(a), Datum::Str(b)) => Ok(a.cmp(b)),
        (Datum::Date(a), Datum::Date(b)) => Ok(a.cmp(b)),
        (Datum::Money(a), Datum::Money(b)) => Ok(a.compare(*b)?),
        (Datum::Bool(a), Datum::Bool(b)) => Ok(a.cmp(b)),
        (left, right) => Err(RuntimeError::Incomparable {
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Scalar;
    use crate::money::{Currency, Money};

    fn leaf(scalar: Scalar) -> ExprNode {
        ExprNode::Leaf(Box::new(Value::Literal(scalar)))
    }

    fn binary(op: BinaryOp, left: ExprNode, right: ExprNode) -> ExprNode {
        ExprNode::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn usd(int_digits: &str, frac_digits: &str) -> Money {
        Money::from_literal_parts(Currency::Usd, int_digits, frac_digits).expect("money")
    }

    fn row_scope<'a>(row: &'a Row, today: NaiveDate) -> RowScope<'a> {
        RowScope {
            table: "T",
            row,
            today,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn compares_row_columns_against_money() {
        let mut row = Row::new();
        row.insert("Balance".to_string(), Datum::Money(usd("10", "00")));
        let predicate = binary(
            BinaryOp::Gt,
            ExprNode::Leaf(Box::new(Value::ColRef {
                table: "T".to_string(),
                column: "Balance".to_string(),
            })),
            leaf(Scalar::Money(usd("0", "00"))),
        );
        let result = evaluate(&predicate, &row_scope(&row, date(2026, 1, 1))).expect("evaluate");
        assert_eq!(result, Datum::Bool(true));
    }

    #[test]
    fn missing_row_field_is_null_and_comparisons_are_false() {
        let row = Row::new();
        let predicate = binary(
            BinaryOp::Gt,
            ExprNode::Leaf(Box::new(Value::VarRef("Balance".to_string()))),
            leaf(Scalar::Number(0.0)),
        );
        let scope = row_scope(&row, date(2026, 1, 1));
        assert_eq!(evaluate(&predicate, &scope).expect("gt"), Datum::Bool(false));

        let not_equal = binary(
            BinaryOp::Ne,
            ExprNode::Leaf(Box::new(Value::VarRef("Balance".to_string()))),
            leaf(Scalar::Number(0.0)),
        );
        assert_eq!(
            evaluate(&not_equal, &scope).expect("ne"),
            Datum::Bool(true)
        );
    }

    #[test]
    fn and_short_circuits_before_errors() {
        let row = Row::new();
        // Right side would fail (number as boolean), but the left is false.
        let expr = binary(
            BinaryOp::And,
            leaf(Scalar::Bool(false)),
            leaf(Scalar::Number(1.0)),
        );
        let result = evaluate(&expr, &row_scope(&row, date(2026, 1, 1))).expect("evaluate");
        assert_eq!(result, Datum::Bool(false));
    }

    #[test]
    fn money_arithmetic_rejects_mixed_currencies_at_runtime() {
        let eur = Money::from_literal_parts(Currency::Eur, "1", "00").expect("money");
        let row = Row::new();
        let expr = binary(
            BinaryOp::Add,
            leaf(Scalar::Money(usd("1", "00"))),
            leaf(Scalar::Money(eur)),
        );
        let err = evaluate(&expr, &row_scope(&row, date(2026, 1, 1))).expect_err("mismatch");
        assert!(matches!(err, RuntimeError::CurrencyMismatch { .. }));
    }

    #[test]
    fn date_algebra() {
        let row = Row::new();
        let scope = row_scope(&row, date(2026, 2, 11));
        let diff = binary(
            BinaryOp::Sub,
            leaf(Scalar::Date(date(2026, 2, 11))),
            leaf(Scalar::Date(date(2026, 1, 31))),
        );
        assert_eq!(evaluate(&diff, &scope).expect("sub"), Datum::Number(11.0));

        let shifted = binary(
            BinaryOp::Add,
            leaf(Scalar::Date(date(2026, 1, 31))),
            leaf(Scalar::Number(11.0)),
        );
        assert_eq!(
            evaluate(&shifted, &scope).expect("add"),
            Datum::Date(date(2026, 2, 11))
        );
    }

    #[test]
    fn today_and_days_between_use_scope_clock() {
        let row = Row::new();
        let scope = row_scope(&row, date(2026, 2, 11));
        let expr = ExprNode::Call {
            function: BuiltinFn::DaysBetween,
            args: vec![
                leaf(Scalar::Date(date(2026, 2, 1))),
                ExprNode::Call {
                    function: BuiltinFn::Today,
                    args: vec![],
                },
            ],
        };
        assert_eq!(evaluate(&expr, &scope).expect("call"), Datum::Number(10.0));
    }
}
