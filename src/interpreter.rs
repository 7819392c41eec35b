//! The deterministic IR interpreter.
//!
//! Walks the record list in order against an [`EffectProvider`]. For each
//! record: resolve arguments against the environment, call the provider
//! method for the opcode, append a trace entry, then apply the op's
//! environment effect (`set_var` binds a variable, table ops replace the
//! table binding wholesale). `control.*` records are executed here rather
//! than by the provider. Cancellation is cooperative and checked between
//! records.
//!
//! Execution pipeline:
//! run -> exec_block (top-level records) -> exec_record
//! -> invoke (resolve args + provider call) -> finish (trace + env effect).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use log::debug;

use crate::ast::AggOp;
use crate::ir::{ExprNode, OpCode, OpRecord, Scalar, Value};
use crate::provider::{AggSpec, EffectProvider, ProviderError};
use crate::range::Range;
use crate::trace::{Trace, TraceEntry};

pub mod error;
pub mod eval;
pub mod value;

use error::RuntimeError;
use eval::EnvScope;
use value::{Datum, Rows};

/// Caller-supplied cooperative cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Mutable run state: variable and table bindings, owned exclusively by one
/// interpreter invocation.
#[derive(Debug, Default)]
pub struct Environment {
    pub variables: HashMap<String, Datum>,
    pub tables: HashMap<String, Rows>,
}

/// Outcome of one `run`: the full trace plus how execution ended.
#[derive(Debug)]
pub struct RunReport {
    pub trace: Trace,
    pub error: Option<RuntimeError>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }
}

enum Stop {
    Cancelled,
    Fatal(RuntimeError),
}

/// What a successful record does to the environment.
enum EnvUpdate {
    None,
    BindVar(String),
    BindTable(String),
}

/// Resolved arguments as they appear in the trace.
type Args = BTreeMap<String, serde_json::Value>;

pub struct Interpreter<'a, P: EffectProvider> {
    provider: &'a mut P,
    env: Environment,
    cancel: Option<CancelToken>,
    today: NaiveDate,
}

impl<'a, P: EffectProvider> Interpreter<'a, P> {
    pub fn new(provider: &'a mut P) -> Self {
        let today = provider.today();
        Self {
            provider,
            env: Environment::default(),
            cancel: None,
            today,
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn run(mut self, records: &[OpRecord]) -> RunReport {
        let mut trace = Vec::new();
        match self.exec_block(records, &mut trace) {
            Ok(()) => RunReport {
                trace,
                error: None,
                cancelled: false,
            },
            Err(Stop::Cancelled) => RunReport {
                trace,
                error: None,
                cancelled: true,
            },
            Err(Stop::Fatal(error)) => RunReport {
                trace,
                error: Some(error),
                cancelled: false,
            },
        }
    }

    fn exec_block(&mut self, records: &[OpRecord], trace: &mut Trace) -> Result<(), Stop> {
        for record in records {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                debug!("cancellation requested, stopping before {}", record.op);
                trace.push(TraceEntry {
                    op: "cancelled".to_string(),
                    args: Args::new(),
                    result: serde_json::Value::Null,
                    error: None,
                    duration_nanos: 0,
                });
                return Err(Stop::Cancelled);
            }
            self.exec_record(record, trace)?;
        }
        Ok(())
    }

    fn exec_record(&mut self, record: &OpRecord, trace: &mut Trace) -> Result<(), Stop> {
        debug!("executing {}", record.op);
        let started = Instant::now();
        match record.op {
            OpCode::ControlForEach => self.exec_for_each(record, trace, started),
            OpCode::ControlIf => self.exec_if(record, trace, started),
            _ => match self.invoke(record) {
                Ok((args, result, update)) => {
                    self.apply_update(update, &result);
                    trace.push(entry(record.op.as_str(), args, to_json(&result), None, started));
                    Ok(())
                }
                Err(error) => self.handle_record_error(record, trace, started, Args::new(), error),
            },
        }
    }

    /// Resolve arguments and call the provider method for one effect
    /// record. Returns the resolved-argument view for the trace, the
    /// provider's result, and the environment effect to apply.
    fn invoke(&mut self, record: &OpRecord) -> Result<(Args, Datum, EnvUpdate), RuntimeError> {
        let op = record.op;
        match op {
            OpCode::ExcelOpenWorkbook => {
                let path = str_arg(record, "path")?;
                let args = args([("path", json_str(&path))]);
                let result = provider_call(self.provider.open_workbook(&path))?;
                Ok((args, result, EnvUpdate::None))
            }
            OpCode::ExcelReadTable => {
                let sheet = str_arg(record, "sheet")?;
                let range = range_arg(record, "range")?;
                let table = table_arg(record, "table")?;
                let args = args([
                    ("range", json_str(&range.to_string())),
                    ("sheet", json_str(&sheet)),
                    ("table", json_str(&table)),
                ]);
                let result = provider_call(self.provider.read_table(&sheet, &range))?;
                Ok((args, result, EnvUpdate::BindTable(table)))
            }
            OpCode::ExcelExport => {
                let path = str_arg(record, "path")?;
                let source = self.eval_arg(record, "source")?;
                let args = args([("path", json_str(&path)), ("source", to_json(&source))]);
                let result = provider_call(self.provider.export(&source, &path))?;
                Ok((args, result, EnvUpdate::None))
            }
            OpCode::SetVar => {
                let name = str_arg(record, "name")?;
                let value = self.eval_arg(record, "value")?;
                let args = args([("name", json_str(&name)), ("value", to_json(&value))]);
                let result = provider_call(self.provider.set_var(&name, &value))?;
                Ok((args, result, EnvUpdate::BindVar(name)))
            }
            OpCode::CallResult => {
                let name = str_arg(record, "name")?;
                let args = args([("name", json_str(&name))]);
                let result = provider_call(self.provider.call_result(&name))?;
                Ok((args, result, EnvUpdate::BindVar(name)))
            }
            OpCode::TableAddColumn => {
                let table = table_arg(record, "table")?;
                let column = str_arg(record, "column")?;
                let expr = self.substituted_expr(record, "expr")?;
                let rows = self.table_rows(&table)?;
                let args = args([
                    ("column", json_str(&column)),
                    ("expr", expr_json(&expr)),
                    ("table", json_str(&table)),
                ]);
                let result =
                    provider_call(self.provider.add_column(rows, &table, &column, &expr))?;
                Ok((args, result, EnvUpdate::BindTable(table)))
            }
            OpCode::TableFilter => {
                let table = table_arg(record, "table")?;
                let predicate = self.substituted_expr(record, "predicate")?;
                let rows = self.table_rows(&table)?;
                let args = args([
                    ("predicate", expr_json(&predicate)),
                    ("table", json_str(&table)),
                ]);
                let result = provider_call(self.provider.filter(rows, &table, &predicate))?;
                Ok((args, result, EnvUpdate::BindTable(table)))
            }
            OpCode::TableSort => {
                let table = table_arg(record, "table")?;
                let key = self.substituted_expr(record, "key")?;
                let ascending = bool_arg(record, "ascending")?;
                let rows = self.table_rows(&table)?;
                let args = args([
                    ("ascending", serde_json::Value::Bool(ascending)),
                    ("key", expr_json(&key)),
                    ("table", json_str(&table)),
                ]);
                let result = provider_call(self.provider.sort(rows, &table, &key, ascending))?;
                Ok((args, result, EnvUpdate::BindTable(table)))
            }
            OpCode::TableGroup => {
                let table = table_arg(record, "table")?;
                let keys = self.group_keys(record)?;
                let aggregations = self.group_aggregations(record)?;
                let rows = self.table_rows(&table)?;
                let args = args([
                    (
                        "aggregations",
                        serde_json::Value::Array(
                            aggregations
                                .iter()
                                .map(|spec| json_str(&format!("{} as {}", spec.op.as_str(), spec.name)))
                                .collect(),
                        ),
                    ),
                    (
                        "keys",
                        serde_json::Value::Array(keys.iter().map(expr_json).collect()),
                    ),
                    ("table", json_str(&table)),
                ]);
                let result =
                    provider_call(self.provider.group(rows, &table, &keys, &aggregations))?;
                Ok((args, result, EnvUpdate::BindTable(table)))
            }
            OpCode::TableJoin => {
                let left = table_arg(record, "left")?;
                let right = table_arg(record, "right")?;
                let on = str_arg(record, "on")?;
                let left_rows = self.table_rows(&left)?;
                let right_rows = self.table_rows(&right)?;
                let args = args([
                    ("left", json_str(&left)),
                    ("on", json_str(&on)),
                    ("right", json_str(&right)),
                ]);
                let result = provider_call(self.provider.join(left_rows, right_rows, &on))?;
                Ok((args, result, EnvUpdate::BindTable(left)))
            }
            OpCode::WebUseSystem => {
                let name = str_arg(record, "name")?;
                let version = str_arg(record, "version")?;
                let args = args([("name", json_str(&name)), ("version", json_str(&version))]);
                let result = provider_call(self.provider.use_system(&name, &version))?;
                Ok((args, result, EnvUpdate::None))
            }
            OpCode::WebLogin => {
                let credential = opt_str_arg(record, "credential")?;
                let args = args([(
                    "credential",
                    credential
                        .as_deref()
                        .map(|value| json_str(value))
                        .unwrap_or(serde_json::Value::Null),
                )]);
                let result = provider_call(self.provider.login(credential.as_deref()))?;
                Ok((args, result, EnvUpdate::None))
            }
            OpCode::WebLogout => {
                let result = provider_call(self.provider.logout())?;
                Ok((Args::new(), result, EnvUpdate::None))
            }
            OpCode::WebGotoPage => {
                let page = str_arg(record, "page")?;
                let args = args([("page", json_str(&page))]);
                let result = provider_call(self.provider.goto_page(&page))?;
                Ok((args, result, EnvUpdate::None))
            }
            OpCode::WebEnter => {
                let field = str_arg(record, "field")?;
                let value = self.eval_arg(record, "value")?;
                let args = args([("field", json_str(&field)), ("value", to_json(&value))]);
                let result = provider_call(self.provider.enter(&field, &value))?;
                Ok((args, result, EnvUpdate::None))
            }
            OpCode::WebClick => {
                let element = str_arg(record, "element")?;
                let args = args([("element", json_str(&element))]);
                let result = provider_call(self.provider.click(&element))?;
                Ok((args, result, EnvUpdate::None))
            }
            OpCode::WebExtract => {
                let selector = str_arg(record, "selector")?;
                let var = str_arg(record, "var")?;
                let args = args([("selector", json_str(&selector)), ("var", json_str(&var))]);
                let result = provider_call(self.provider.extract(&selector))?;
                Ok((args, result, EnvUpdate::BindVar(var)))
            }
            OpCode::ControlForEach | OpCode::ControlIf => {
                unreachable!("control records are executed by exec_record")
            }
        }
    }

    /// `control.for_each`: one trace entry for the loop itself, then the
    /// body block executes once per row with the row variable bound.
    fn exec_for_each(
        &mut self,
        record: &OpRecord,
        trace: &mut Trace,
        started: Instant,
    ) -> Result<(), Stop> {
        let resolved = (|| -> Result<(String, String, Rows), RuntimeError> {
            let var = str_arg(record, "var")?;
            let table = table_arg(record, "table")?;
            let rows = self.table_rows(&table)?;
            Ok((var, table, rows))
        })();
        let (var, table, rows) = match resolved {
            Ok(resolved) => resolved,
            Err(error) => {
                return self.handle_record_error(record, trace, started, Args::new(), error);
            }
        };

        let entry_args = args([
            ("rows", serde_json::Value::from(rows.len())),
            ("table", json_str(&table)),
            ("var", json_str(&var)),
        ]);
        trace.push(entry(
            record.op.as_str(),
            entry_args,
            serde_json::Value::Null,
            None,
            started,
        ));

        let Some(Value::Block(body)) = record.arg("body") else {
            return Err(Stop::Fatal(RuntimeError::MalformedRecord {
                op: record.op.as_str(),
                arg: "body",
            }));
        };

        let shadowed = self.env.variables.get(&var).cloned();
        let mut outcome = Ok(());
        for row in rows {
            self.env.variables.insert(var.clone(), Datum::Row(row));
            outcome = self.exec_block(body, trace);
            if outcome.is_err() {
                break;
            }
        }
        match shadowed {
            Some(previous) => {
                self.env.variables.insert(var, previous);
            }
            None => {
                self.env.variables.remove(&var);
            }
        }
        outcome
    }

    /// `control.if`: evaluate the condition, then run exactly one branch.
    fn exec_if(
        &mut self,
        record: &OpRecord,
        trace: &mut Trace,
        started: Instant,
    ) -> Result<(), Stop> {
        let condition = match self
            .eval_arg(record, "condition")
            .and_then(|value| eval::as_bool(&value).map(|_| value))
        {
            Ok(value) => value,
            Err(error) => {
                return self.handle_record_error(record, trace, started, Args::new(), error);
            }
        };
        let taken = matches!(condition, Datum::Bool(true));
        let entry_args = args([("condition", to_json(&condition))]);
        trace.push(entry(
            record.op.as_str(),
            entry_args,
            serde_json::Value::Bool(taken),
            None,
            started,
        ));

        let branch = if taken { "then" } else { "otherwise" };
        match record.arg(branch) {
            Some(Value::Block(body)) => self.exec_block(body, trace),
            _ => Err(Stop::Fatal(RuntimeError::MalformedRecord {
                op: record.op.as_str(),
                arg: if taken { "then" } else { "otherwise" },
            })),
        }
    }

    fn handle_record_error(
        &mut self,
        record: &OpRecord,
        trace: &mut Trace,
        started: Instant,
        resolved: Args,
        error: RuntimeError,
    ) -> Result<(), Stop> {
        trace.push(entry(
            record.op.as_str(),
            resolved,
            serde_json::Value::Null,
            Some(error.to_string()),
            started,
        ));
        if let Some(Value::Block(handler)) = record.arg("on_error") {
            debug!("{} failed, running on_error handler", record.op);
            self.exec_block(handler, trace)?;
            return Ok(());
        }
        Err(Stop::Fatal(error))
    }

    fn apply_update(&mut self, update: EnvUpdate, result: &Datum) {
        match update {
            EnvUpdate::None => {}
            EnvUpdate::BindVar(name) => {
                self.env.variables.insert(name, result.clone());
            }
            EnvUpdate::BindTable(name) => {
                let rows = result.clone().into_rows().unwrap_or_default();
                self.env.tables.insert(name, rows);
            }
        }
    }

    fn table_rows(&self, name: &str) -> Result<Rows, RuntimeError> {
        self.env
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedTable {
                name: name.to_string(),
            })
    }

    /// Fully evaluate a non-row expression argument against the current
    /// environment.
    fn eval_arg(&self, record: &OpRecord, name: &'static str) -> Result<Datum, RuntimeError> {
        let node = expr_arg(record, name)?;
        let scope = EnvScope {
            variables: &self.env.variables,
            tables: &self.env.tables,
            today: self.today,
        };
        eval::evaluate(node, &scope)
    }

    /// Substitute environment bindings into a row-context expression: bound
    /// scalars become literals, row-variable columns become literals, and
    /// the remaining names resolve per row inside the provider.
    fn substituted_expr(
        &self,
        record: &OpRecord,
        name: &'static str,
    ) -> Result<ExprNode, RuntimeError> {
        Ok(self.substitute(expr_arg(record, name)?))
    }

    fn substitute(&self, node: &ExprNode) -> ExprNode {
        match node {
            ExprNode::Leaf(value) => match value.as_ref() {
                Value::VarRef(name) => match self.env.variables.get(name).and_then(Datum::to_scalar)
                {
                    Some(scalar) => leaf(Value::Literal(scalar)),
                    None => node.clone(),
                },
                Value::ColRef { table, column } => match self.env.variables.get(table) {
                    Some(Datum::Row(row)) => {
                        let scalar = row
                            .get(column)
                            .and_then(Datum::to_scalar)
                            .unwrap_or(Scalar::Null);
                        leaf(Value::Literal(scalar))
                    }
                    _ => node.clone(),
                },
                _ => node.clone(),
            },
            ExprNode::Binary { op, left, right } => ExprNode::Binary {
                op: *op,
                left: Box::new(self.substitute(left)),
                right: Box::new(self.substitute(right)),
            },
            ExprNode::Unary { op, operand } => ExprNode::Unary {
                op: *op,
                operand: Box::new(self.substitute(operand)),
            },
            ExprNode::Call { function, args } => ExprNode::Call {
                function: *function,
                args: args.iter().map(|arg| self.substitute(arg)).collect(),
            },
        }
    }

    fn group_keys(&self, record: &OpRecord) -> Result<Vec<ExprNode>, RuntimeError> {
        let Some(Value::List(values)) = record.arg("keys") else {
            return Err(RuntimeError::MalformedRecord {
                op: record.op.as_str(),
                arg: "keys",
            });
        };
        values
            .iter()
            .map(|value| match value {
                Value::ExprTree(node) => Ok(self.substitute(node)),
                _ => Err(RuntimeError::MalformedRecord {
                    op: record.op.as_str(),
                    arg: "keys",
                }),
            })
            .collect()
    }

    fn group_aggregations(&self, record: &OpRecord) -> Result<Vec<AggSpec>, RuntimeError> {
        let malformed = || RuntimeError::MalformedRecord {
            op: record.op.as_str(),
            arg: "aggregations",
        };
        let Some(Value::List(specs)) = record.arg("aggregations") else {
            return Err(malformed());
        };
        specs
            .iter()
            .map(|spec| {
                let Value::List(triple) = spec else {
                    return Err(malformed());
                };
                let [op, expr, name] = triple.as_slice() else {
                    return Err(malformed());
                };
                let Value::Literal(Scalar::Str(op)) = op else {
                    return Err(malformed());
                };
                let op = AggOp::from_word(op).ok_or_else(malformed)?;
                let expr = match expr {
                    Value::ExprTree(node) => Some(self.substitute(node)),
                    Value::Literal(Scalar::Null) => None,
                    _ => return Err(malformed()),
                };
                let Value::Literal(Scalar::Str(name)) = name else {
                    return Err(malformed());
                };
                Ok(AggSpec {
                    op,
                    expr,
                    name: name.clone(),
                })
            })
            .collect()
    }
}

fn provider_call(result: Result<Datum, ProviderError>) -> Result<Datum, RuntimeError> {
    result.map_err(|error| RuntimeError::Provider {
        message: error.message,
    })
}

fn entry(
    op: &str,
    args: Args,
    result: serde_json::Value,
    error: Option<String>,
    started: Instant,
) -> TraceEntry {
    TraceEntry {
        op: op.to_string(),
        args,
        result,
        error,
        duration_nanos: started.elapsed().as_nanos() as u64,
    }
}

fn args<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Args {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn json_str(value: &str) -> serde_json::Value {
    serde_json::Value::String(value.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).expect("runtime values serialize infallibly")
}

fn expr_json(node: &ExprNode) -> serde_json::Value {
    let mut wrapper = serde_json::Map::new();
    wrapper.insert("expr".to_string(), to_json(node));
    serde_json::Value::Object(wrapper)
}

fn leaf(value: Value) -> ExprNode {
    ExprNode::Leaf(Box::new(value))
}

fn str_arg(record: &OpRecord, name: &'static str) -> Result<String, RuntimeError> {
    match record.arg(name) {
        Some(Value::Literal(Scalar::Str(value))) => Ok(value.clone()),
        _ => Err(RuntimeError::MalformedRecord {
            op: record.op.as_str(),
            arg: name,
        }),
    }
}

fn opt_str_arg(record: &OpRecord, name: &'static str) -> Result<Option<String>, RuntimeError> {
    match record.arg(name) {
        Some(Value::Literal(Scalar::Str(value))) => Ok(Some(value.clone())),
        Some(Value::Literal(Scalar::Null)) | None => Ok(None),
        _ => Err(RuntimeError::MalformedRecord {
            op: record.op.as_str(),
            arg: name,
        }),
    }
}

fn bool_arg(record: &OpRecord, name: &'static str) -> Result<bool, RuntimeError> {
    match record.arg(name) {
        Some(Value::Literal(Scalar::Bool(value))) => Ok(*value),
        _ => Err(RuntimeError::MalformedRecord {
            op: record.op.as_str(),
            arg: name,
        }),
    }
}

fn range_arg(record: &OpRecord, name: &'static str) -> Result<Range, RuntimeError> {
    match record.arg(name) {
        Some(Value::Literal(Scalar::Range(range))) => Ok(*range),
        _ => Err(RuntimeError::MalformedRecord {
            op: record.op.as_str(),
            arg: name,
        }),
    }
}

fn table_arg(record: &OpRecord, name: &'static str) -> Result<String, RuntimeError> {
    match record.arg(name) {
        Some(Value::TableRef(table)) => Ok(table.clone()),
        _ => Err(RuntimeError::MalformedRecord {
            op: record.op.as_str(),
            arg: name,
        }),
    }
}

fn expr_arg<'r>(record: &'r OpRecord, name: &'static str) -> Result<&'r ExprNode, RuntimeError> {
    match record.arg(name) {
        Some(Value::ExprTree(node)) => Ok(node),
        _ => Err(RuntimeError::MalformedRecord {
            op: record.op.as_str(),
            arg: name,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::check;
    use crate::lexer::tokenize;
    use crate::lower::lower;
    use crate::money::{Currency, Money};
    use crate::parser::parse_tokens;
    use crate::provider::{DryRunProvider, MemoryProvider};
    use indoc::indoc;

    fn compile(source: &str) -> Vec<OpRecord> {
        let program = parse_tokens(tokenize(source).expect("tokenize")).expect("parse");
        let symbols = check(&program).expect("check");
        lower(&program, &symbols).expect("lower")
    }

    fn dry_run(source: &str) -> RunReport {
        let mut provider = DryRunProvider::new();
        Interpreter::new(&mut provider).run(&compile(source))
    }

    fn trace_ops(report: &RunReport) -> Vec<String> {
        report.trace.iter().map(|entry| entry.op.clone()).collect()
    }

    fn str_cell(value: &str) -> Datum {
        Datum::Str(value.to_string())
    }

    fn usd(int_digits: &str, frac_digits: &str) -> Datum {
        Datum::Money(
            Money::from_literal_parts(Currency::Usd, int_digits, frac_digits).expect("money"),
        )
    }

    const AGING_REPORT: &str = indoc! {r#"
        Open workbook "book.xlsx".
        In sheet "Data", treat range A1C4 as table O.
        Set today to date "2026-02-11".
        Filter O where O.Balance > USD 0.00.
        Export O to "out.csv".
    "#};

    #[test]
    fn empty_ir_yields_empty_trace() {
        let report = dry_run("");
        assert!(report.is_ok());
        assert!(report.trace.is_empty());
    }

    #[test]
    fn dry_run_traces_every_record_without_errors() {
        let report = dry_run(AGING_REPORT);
        assert!(report.is_ok(), "unexpected error: {:?}", report.error);
        assert_eq!(
            trace_ops(&report),
            vec![
                "excel.open_workbook",
                "excel.read_table",
                "set_var",
                "table.filter",
                "excel.export",
            ]
        );
        assert!(report.trace.iter().all(|entry| entry.error.is_none()));
    }

    #[test]
    fn dry_run_traces_are_reproducible_modulo_duration() {
        let first = dry_run(AGING_REPORT);
        let second = dry_run(AGING_REPORT);
        assert_eq!(first.trace.len(), second.trace.len());
        for (a, b) in first.trace.iter().zip(second.trace.iter()) {
            assert!(a.same_outcome(b), "trace entries differ: {a:?} vs {b:?}");
        }
    }

    #[test]
    fn set_var_binds_and_later_records_resolve_it() {
        let report = dry_run(indoc! {r#"
            Set x to 10.
            Set y to x.
        "#});
        assert!(report.is_ok());
        assert_eq!(report.trace[1].result, serde_json::json!(10.0));
    }

    #[test]
    fn memory_provider_filters_and_exports() {
        let mut provider = MemoryProvider::new().with_sheet(
            "book.xlsx",
            "Data",
            vec![
                vec![str_cell("Name"), str_cell("Balance"), str_cell("Due")],
                vec![str_cell("Alice"), usd("50", "00"), str_cell("-")],
                vec![str_cell("Bob"), usd("0", "00"), str_cell("-")],
                vec![str_cell("Carol"), usd("75", "50"), str_cell("-")],
            ],
        );
        let report = Interpreter::new(&mut provider).run(&compile(AGING_REPORT));
        assert!(report.is_ok(), "unexpected error: {:?}", report.error);
        let exported = &provider.exports()["out.csv"];
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0]["Name"], str_cell("Alice"));
        assert_eq!(exported[1]["Name"], str_cell("Carol"));
    }

    #[test]
    fn for_each_runs_body_once_per_row() {
        let mut provider = MemoryProvider::new().with_sheet(
            "book.xlsx",
            "Data",
            vec![
                vec![str_cell("Amount")],
                vec![Datum::Number(10.0)],
                vec![Datum::Number(20.0)],
            ],
        );
        let report = Interpreter::new(&mut provider).run(&compile(indoc! {r##"
            Open workbook "book.xlsx".
            In sheet "Data", treat range A1A3 as table T.
            For each row r in T:
                Enter "#amount" = r.Amount.
        "##}));
        assert!(report.is_ok(), "unexpected error: {:?}", report.error);
        let enters: Vec<&TraceEntry> = report
            .trace
            .iter()
            .filter(|entry| entry.op == "web.enter")
            .collect();
        assert_eq!(enters.len(), 2);
        assert_eq!(enters[0].args["value"], serde_json::json!(10.0));
        assert_eq!(enters[1].args["value"], serde_json::json!(20.0));
    }

    #[test]
    fn if_executes_only_the_taken_branch() {
        let report = dry_run(indoc! {r#"
            Set x to 5.
            If x > 3:
                Set y to 1.
            Otherwise:
                Set y to 2.
        "#});
        assert!(report.is_ok());
        assert_eq!(
            trace_ops(&report),
            vec!["set_var", "control.if", "set_var"]
        );
        assert_eq!(report.trace[1].result, serde_json::Value::Bool(true));
        assert_eq!(report.trace[2].args["value"], serde_json::json!(1.0));
    }

    #[test]
    fn unhandled_provider_error_halts_execution() {
        let mut provider = MemoryProvider::new();
        let report = Interpreter::new(&mut provider).run(&compile(indoc! {r#"
            Open workbook "missing.xlsx".
            Set x to 1.
        "#}));
        assert!(!report.is_ok());
        assert_eq!(report.trace.len(), 1);
        assert!(
            report.trace[0]
                .error
                .as_deref()
                .is_some_and(|error| error.contains("workbook not found"))
        );
        assert!(matches!(report.error, Some(RuntimeError::Provider { .. })));
    }

    #[test]
    fn on_error_handler_runs_and_execution_continues() {
        let mut provider = MemoryProvider::new();
        let report = Interpreter::new(&mut provider).run(&compile(indoc! {r##"
            On error: Click "#retry".
            Open workbook "missing.xlsx".
            Set x to 1.
        "##}));
        assert!(report.is_ok(), "unexpected error: {:?}", report.error);
        assert_eq!(
            trace_ops(&report),
            vec!["excel.open_workbook", "web.click", "set_var"]
        );
        assert!(report.trace[0].error.is_some());
    }

    #[test]
    fn cancellation_records_a_trace_entry_and_stops() {
        let token = CancelToken::new();
        token.cancel();
        let mut provider = DryRunProvider::new();
        let report = Interpreter::new(&mut provider)
            .with_cancel_token(token)
            .run(&compile("Set x to 1.\nSet y to 2."));
        assert!(report.cancelled);
        assert_eq!(trace_ops(&report), vec!["cancelled"]);
    }

    #[test]
    fn extract_binds_variable_for_later_use() {
        let mut provider = MemoryProvider::new().with_extract("#docno", "INV-7");
        let report = Interpreter::new(&mut provider).run(&compile(indoc! {r##"
            Extract doc from field "#docno".
            Enter "#confirm" = doc.
        "##}));
        assert!(report.is_ok());
        assert_eq!(report.trace[1].args["value"], serde_json::json!("INV-7"));
    }

    #[test]
    fn today_builtin_uses_provider_clock() {
        let mut provider = MemoryProvider::new()
            .with_today(NaiveDate::from_ymd_opt(2026, 2, 11).expect("date"));
        let report = Interpreter::new(&mut provider).run(&compile(indoc! {r#"
            Set d to today().
            Set n to days_between(date "2026-02-01", today()).
        "#}));
        assert!(report.is_ok());
        assert_eq!(
            report.trace[0].result,
            serde_json::json!({"date": "2026-02-11"})
        );
        assert_eq!(report.trace[1].result, serde_json::json!(10.0));
    }

    #[test]
    fn define_binds_null_and_null_comparisons_are_false() {
        let report = dry_run(indoc! {r#"
            Define total as number.
            If total > 0:
                Set x to 1.
            Otherwise:
                Set x to 2.
        "#});
        assert!(report.is_ok());
        assert_eq!(report.trace[1].result, serde_json::Value::Bool(false));
        assert_eq!(report.trace[2].args["value"], serde_json::json!(2.0));
    }
}
