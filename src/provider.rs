//! Effect providers: the interpreter's pluggable side-effect surface.
//!
//! The interpreter resolves each record's arguments and calls one typed
//! method per opcode. [`DryRunProvider`] answers everything with synthetic
//! empty results and never fails; [`MemoryProvider`] keeps workbooks, web
//! fixtures and exports in memory and implements the real table algebra,
//! which makes it the vehicle for runtime tests and local `run`.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;
use thiserror::Error;

use crate::ast::AggOp;
use crate::interpreter::error::RuntimeError;
use crate::interpreter::eval::{self, RowScope};
use crate::interpreter::value::{Datum, Row, Rows};
use crate::ir::ExprNode;
use crate::money::Money;
use crate::range::Range;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<RuntimeError> for ProviderError {
    fn from(error: RuntimeError) -> Self {
        ProviderError::new(error.to_string())
    }
}

pub type ProviderResult = Result<Datum, ProviderError>;

/// One aggregation requested by `table.group`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggSpec {
    pub op: AggOp,
    /// `None` for `count`.
    pub expr: Option<ExprNode>,
    pub name: String,
}

/// The capability surface the interpreter drives: one method per effectful
/// opcode (`control.*` stays inside the interpreter). Row-scoped expression
/// arguments arrive as argument-substituted trees and are evaluated per row
/// through [`eval::RowScope`].
pub trait EffectProvider {
    fn name(&self) -> &'static str;

    /// The date `today()` resolves to for the lifetime of one run.
    fn today(&self) -> NaiveDate;

    fn open_workbook(&mut self, path: &str) -> ProviderResult;
    fn read_table(&mut self, sheet: &str, range: &Range) -> ProviderResult;
    fn export(&mut self, source: &Datum, path: &str) -> ProviderResult;

    fn add_column(&mut self, rows: Rows, table: &str, column: &str, expr: &ExprNode)
    -> ProviderResult;
    fn filter(&mut self, rows: Rows, table: &str, predicate: &ExprNode) -> ProviderResult;
    fn sort(&mut self, rows: Rows, table: &str, key: &ExprNode, ascending: bool)
    -> ProviderResult;
    fn group(
        &mut self,
        rows: Rows,
        table: &str,
        keys: &[ExprNode],
        aggregations: &[AggSpec],
    ) -> ProviderResult;
    fn join(&mut self, left: Rows, right: Rows, on: &str) -> ProviderResult;

    fn set_var(&mut self, name: &str, value: &Datum) -> ProviderResult;
    fn call_result(&mut self, name: &str) -> ProviderResult;

    fn use_system(&mut self, name: &str, version: &str) -> ProviderResult;
    fn login(&mut self, credential: Option<&str>) -> ProviderResult;
    fn logout(&mut self) -> ProviderResult;
    fn goto_page(&mut self, page: &str) -> ProviderResult;
    fn enter(&mut self, field: &str, value: &Datum) -> ProviderResult;
    fn click(&mut self, element: &str) -> ProviderResult;
    fn extract(&mut self, selector: &str) -> ProviderResult;
}

/// Synthetic provider: empty tables, null results, pinned clock. The
/// primary vehicle for exercising the pipeline without I/O.
#[derive(Debug, Default)]
pub struct DryRunProvider;

impl DryRunProvider {
    pub fn new() -> Self {
        Self
    }
}

fn pinned_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is a valid date")
}

impl EffectProvider for DryRunProvider {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn today(&self) -> NaiveDate {
        pinned_epoch()
    }

    fn open_workbook(&mut self, _path: &str) -> ProviderResult {
        Ok(Datum::Null)
    }

    fn read_table(&mut self, _sheet: &str, _range: &Range) -> ProviderResult {
        Ok(Datum::Rows(Vec::new()))
    }

    fn export(&mut self, _source: &Datum, _path: &str) -> ProviderResult {
        Ok(Datum::Null)
    }

    fn add_column(
        &mut self,
        rows: Rows,
        _table: &str,
        _column: &str,
        _expr: &ExprNode,
    ) -> ProviderResult {
        Ok(Datum::Rows(rows))
    }

    fn filter(&mut self, rows: Rows, _table: &str, _predicate: &ExprNode) -> ProviderResult {
        Ok(Datum::Rows(rows))
    }

    fn sort(
        &mut self,
        rows: Rows,
        _table: &str,
        _key: &ExprNode,
        _ascending: bool,
    ) -> ProviderResult {
        Ok(Datum::Rows(rows))
    }

    fn group(
        &mut self,
        rows: Rows,
        _table: &str,
        _keys: &[ExprNode],
        _aggregations: &[AggSpec],
    ) -> ProviderResult {
        Ok(Datum::Rows(rows))
    }

    fn join(&mut self, left: Rows, _right: Rows, _on: &str) -> ProviderResult {
        Ok(Datum::Rows(left))
    }

    fn set_var(&mut self, _name: &str, value: &Datum) -> ProviderResult {
        Ok(value.clone())
    }

    fn call_result(&mut self, _name: &str) -> ProviderResult {
        Ok(Datum::Null)
    }

    fn use_system(&mut self, _name: &str, _version: &str) -> ProviderResult {
        Ok(Datum::Null)
    }

    fn login(&mut self, _credential: Option<&str>) -> ProviderResult {
        Ok(Datum::Null)
    }

    fn logout(&mut self) -> ProviderResult {
        Ok(Datum::Null)
    }

    fn goto_page(&mut self, _page: &str) -> ProviderResult {
        Ok(Datum::Null)
    }

    fn enter(&mut self, _field: &str, _value: &Datum) -> ProviderResult {
        Ok(Datum::Null)
    }

    fn click(&mut self, _element: &str) -> ProviderResult {
        Ok(Datum::Null)
    }

    fn extract(&mut self, _selector: &str) -> ProviderResult {
        Ok(Datum::Str(String::new()))
    }
}

type Grid = Vec<Vec<Datum>>;

/// In-memory workbook and web fixture with real table algebra.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    workbooks: HashMap<String, HashMap<String, Grid>>,
    current_workbook: Option<String>,
    exports: HashMap<String, Rows>,
    extracts: HashMap<String, String>,
    call_result: Option<Datum>,
    actions: Vec<String>,
    today: Option<NaiveDate>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Seed a sheet with a cell grid; the first row inside a read range is
    /// treated as the header row.
    pub fn with_sheet(mut self, path: &str, sheet: &str, grid: Grid) -> Self {
        self.workbooks
            .entry(path.to_string())
            .or_default()
            .insert(sheet.to_string(), grid);
        self
    }

    pub fn with_extract(mut self, selector: &str, value: &str) -> Self {
        self.extracts
            .insert(selector.to_string(), value.to_string());
        self
    }

    pub fn with_call_result(mut self, value: Datum) -> Self {
        self.call_result = Some(value);
        self
    }

    pub fn exports(&self) -> &HashMap<String, Rows> {
        &self.exports
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    fn row_value(&self, table: &str, row: &Row, expr: &ExprNode) -> Result<Datum, ProviderError> {
        let scope = RowScope {
            table,
            row,
            today: self.today(),
        };
        Ok(eval::evaluate(expr, &scope)?)
    }
}

impl EffectProvider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(pinned_epoch)
    }

    fn open_workbook(&mut self, path: &str) -> ProviderResult {
        if !self.workbooks.contains_key(path) {
            return Err(ProviderError::new(format!("workbook not found: {path}")));
        }
        self.current_workbook = Some(path.to_string());
        Ok(Datum::Null)
    }

    fn read_table(&mut self, sheet: &str, range: &Range) -> ProviderResult {
        let Some(path) = &self.current_workbook else {
            return Err(ProviderError::new("no workbook is open"));
        };
        let Some(grid) = self
            .workbooks
            .get(path)
            .and_then(|sheets| sheets.get(sheet))
        else {
            return Err(ProviderError::new(format!("sheet not found: {sheet}")));
        };

        // The first range row names the columns; the rest become rows.
        let first = range.start_row as usize - 1;
        let last = (range.end_row as usize).min(grid.len());
        if first >= grid.len() {
            return Ok(Datum::Rows(Vec::new()));
        }
        let cell = |line: &Vec<Datum>, col: u32| -> Datum {
            line.get(col as usize - 1).cloned().unwrap_or(Datum::Null)
        };
        let mut headers = Vec::new();
        for col in range.start_col..=range.end_col {
            match cell(&grid[first], col) {
                Datum::Str(name) => headers.push(Some(name)),
                Datum::Null => headers.push(None),
                other => headers.push(Some(format!("{other:?}"))),
            }
        }
        let mut rows = Vec::new();
        for line in grid.iter().take(last).skip(first + 1) {
            let mut row = Row::new();
            for (offset, header) in headers.iter().enumerate() {
                if let Some(header) = header {
                    row.insert(header.clone(), cell(line, range.start_col + offset as u32));
                }
            }
            rows.push(row);
        }
        Ok(Datum::Rows(rows))
    }

    fn export(&mut self, source: &Datum, path: &str) -> ProviderResult {
        let rows = match source {
            Datum::Rows(rows) => rows.clone(),
            other => {
                let mut row = Row::new();
                row.insert("value".to_string(), other.clone());
                vec![row]
            }
        };
        self.exports.insert(path.to_string(), rows);
        Ok(Datum::Null)
    }

    fn add_column(
        &mut self,
        rows: Rows,
        table: &str,
        column: &str,
        expr: &ExprNode,
    ) -> ProviderResult {
        let mut result = Vec::with_capacity(rows.len());
        for mut row in rows {
            let value = self.row_value(table, &row, expr)?;
            row.insert(column.to_string(), value);
            result.push(row);
        }
        Ok(Datum::Rows(result))
    }

    fn filter(&mut self, rows: Rows, table: &str, predicate: &ExprNode) -> ProviderResult {
        let mut kept = Vec::new();
        for row in rows {
            let keep = eval::as_bool(&self.row_value(table, &row, predicate)?)
                .map_err(ProviderError::from)?;
            if keep {
                kept.push(row);
            }
        }
        Ok(Datum::Rows(kept))
    }

    fn sort(
        &mut self,
        rows: Rows,
        table: &str,
        key: &ExprNode,
        ascending: bool,
    ) -> ProviderResult {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let key_value = self.row_value(table, &row, key)?;
            keyed.push((key_value, row));
        }
        // Reject mixed-type keys up front so the sort itself cannot fail.
        for pair in keyed.windows(2) {
            eval::ordering(&pair[0].0, &pair[1].0).map_err(ProviderError::from)?;
        }
        keyed.sort_by(|a, b| {
            let ordering = eval::ordering(&a.0, &b.0).unwrap_or(Ordering::Equal);
            if ascending { ordering } else { ordering.reverse() }
        });
        Ok(Datum::Rows(keyed.into_iter().map(|(_, row)| row).collect()))
    }

    fn group(
        &mut self,
        rows: Rows,
        table: &str,
        keys: &[ExprNode],
        aggregations: &[AggSpec],
    ) -> ProviderResult {
        // Buckets keep first-appearance order, so grouping is deterministic.
        let mut buckets: Vec<(Vec<Datum>, Vec<Row>)> = Vec::new();
        for row in rows {
            let mut key_values = Vec::with_capacity(keys.len());
            for key in keys {
                key_values.push(self.row_value(table, &row, key)?);
            }
            match buckets.iter_mut().find(|(existing, _)| *existing == key_values) {
                Some((_, bucket)) => bucket.push(row),
                None => buckets.push((key_values, vec![row])),
            }
        }

        let key_names: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(index, key)| match key {
                ExprNode::Leaf(value) => match value.as_ref() {
                    crate::ir::Value::ColRef { column, .. } => column.clone(),
                    _ => format!("key_{index}"),
                },
                _ => format!("key_{index}"),
            })
            .collect();

        let mut result = Vec::with_capacity(buckets.len());
        for (key_values, bucket) in buckets {
            let mut row = Row::new();
            for (name, value) in key_names.iter().zip(key_values) {
                row.insert(name.clone(), value);
            }
            for spec in aggregations {
                let value = self.aggregate(table, &bucket, spec)?;
                row.insert(spec.name.clone(), value);
            }
            result.push(row);
        }
        Ok(Datum::Rows(result))
    }

    fn join(&mut self, left: Rows, right: Rows, on: &str) -> ProviderResult {
        let mut joined = Vec::new();
        for left_row in &left {
            let Some(key) = left_row.get(on) else {
                continue;
            };
            if matches!(key, Datum::Null) {
                continue;
            }
            for right_row in &right {
                if right_row.get(on) == Some(key) {
                    let mut row = left_row.clone();
                    for (column, value) in right_row {
                        row.entry(column.clone()).or_insert_with(|| value.clone());
                    }
                    joined.push(row);
                }
            }
        }
        Ok(Datum::Rows(joined))
    }

    fn set_var(&mut self, _name: &str, value: &Datum) -> ProviderResult {
        Ok(value.clone())
    }

    fn call_result(&mut self, _name: &str) -> ProviderResult {
        Ok(self.call_result.clone().unwrap_or(Datum::Null))
    }

    fn use_system(&mut self, name: &str, version: &str) -> ProviderResult {
        self.actions.push(format!("use_system {name} {version}"));
        Ok(Datum::Null)
    }

    fn login(&mut self, credential: Option<&str>) -> ProviderResult {
        self.actions
            .push(format!("login {}", credential.unwrap_or("-")));
        Ok(Datum::Null)
    }

    fn logout(&mut self) -> ProviderResult {
        self.actions.push("logout".to_string());
        Ok(Datum::Null)
    }

    fn goto_page(&mut self, page: &str) -> ProviderResult {
        self.actions.push(format!("goto_page {page}"));
        Ok(Datum::Null)
    }

    fn enter(&mut self, field: &str, _value: &Datum) -> ProviderResult {
        self.actions.push(format!("enter {field}"));
        Ok(Datum::Null)
    }

    fn click(&mut self, element: &str) -> ProviderResult {
        self.actions.push(format!("click {element}"));
        Ok(Datum::Null)
    }

    fn extract(&mut self, selector: &str) -> ProviderResult {
        self.actions.push(format!("extract {selector}"));
        let value = self.extracts.get(selector).cloned().unwrap_or_default();
        Ok(Datum::Str(value))
    }
}

impl MemoryProvider {
    fn aggregate(
        &self,
        table: &str,
        bucket: &[Row],
        spec: &AggSpec,
    ) -> Result<Datum, ProviderError> {
        if spec.op == AggOp::Count {
            return Ok(Datum::Number(bucket.len() as f64));
        }
        let expr = spec.expr.as_ref().ok_or_else(|| {
            ProviderError::new(format!("aggregation '{}' needs an expression", spec.op.as_str()))
        })?;
        let mut values = Vec::with_capacity(bucket.len());
        for row in bucket {
            let value = self.row_value(table, row, expr)?;
            if !matches!(value, Datum::Null) {
                values.push(value);
            }
        }
        match spec.op {
            AggOp::Sum => sum_values(values).map_err(ProviderError::from),
            AggOp::Min => extreme(values, Ordering::Less),
            AggOp::Max => extreme(values, Ordering::Greater),
            AggOp::Count => unreachable!("count handled above"),
        }
    }
}

fn sum_values(values: Vec<Datum>) -> Result<Datum, RuntimeError> {
    let mut numbers = 0.0;
    let mut money: Option<Money> = None;
    let mut saw_number = false;
    for value in values {
        match value {
            Datum::Number(n) => {
                saw_number = true;
                numbers += n;
            }
            Datum::Money(amount) => {
                money = Some(match money {
                    Some(total) => total.checked_add(amount)?,
                    None => amount,
                });
            }
            other => {
                return Err(RuntimeError::InvalidOperands {
                    op: "sum",
                    left: other.type_name(),
                    right: "number",
                });
            }
        }
    }
    match (money, saw_number) {
        (Some(total), false) => Ok(Datum::Money(total)),
        (None, _) => Ok(Datum::Number(numbers)),
        (Some(_), true) => Err(RuntimeError::InvalidOperands {
            op: "sum",
            left: "money",
            right: "number",
        }),
    }
}

fn extreme(values: Vec<Datum>, keep: Ordering) -> Result<Datum, ProviderError> {
    let mut best: Option<Datum> = None;
    for value in values {
        best = Some(match best {
            None => value,
            Some(current) => {
                if eval::ordering(&value, &current).map_err(ProviderError::from)? == keep {
                    value
                } else {
                    current
                }
            }
        });
    }
    Ok(best.unwrap_or(Datum::Null))
}
