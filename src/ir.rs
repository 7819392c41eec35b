//! Intermediate representation: a linear list of opcode records.
//!
//! The IR is the stable contract between the compiler front-end, the
//! interpreter, the explainer and external consumers (the editor reads the
//! JSON form). Serialization is hand-written so the wire shape is exact:
//! scalars as JSON scalars, money as `{"currency","amount"}`, dates as
//! `{"date"}`, references as `{"ref"}` / `{"table"}` / `{"table","column"}`,
//! expression trees as `{"expr"}` and nested blocks as `{"block"}`.
//! Argument maps are ordered, so two lowerings of the same program are
//! byte-identical.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};

use crate::ast::{BinaryOp, BuiltinFn, UnaryOp};
use crate::money::Money;
use crate::range::Range;

/// The closed set of primitive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    ExcelOpenWorkbook,
    ExcelReadTable,
    ExcelExport,
    TableAddColumn,
    TableFilter,
    TableSort,
    TableGroup,
    TableJoin,
    SetVar,
    CallResult,
    WebUseSystem,
    WebLogin,
    WebLogout,
    WebGotoPage,
    WebEnter,
    WebClick,
    WebExtract,
    ControlForEach,
    ControlIf,
}

impl OpCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpCode::ExcelOpenWorkbook => "excel.open_workbook",
            OpCode::ExcelReadTable => "excel.read_table",
            OpCode::ExcelExport => "excel.export",
            OpCode::TableAddColumn => "table.add_column",
            OpCode::TableFilter => "table.filter",
            OpCode::TableSort => "table.sort",
            OpCode::TableGroup => "table.group",
            OpCode::TableJoin => "table.join",
            OpCode::SetVar => "set_var",
            OpCode::CallResult => "call_result",
            OpCode::WebUseSystem => "web.use_system",
            OpCode::WebLogin => "web.login",
            OpCode::WebLogout => "web.logout",
            OpCode::WebGotoPage => "web.goto_page",
            OpCode::WebEnter => "web.enter",
            OpCode::WebClick => "web.click",
            OpCode::WebExtract => "web.extract",
            OpCode::ControlForEach => "control.for_each",
            OpCode::ControlIf => "control.if",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OpCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A compile-time constant carried in IR arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Money(Money),
    Date(NaiveDate),
    Range(Range),
}

impl Serialize for Scalar {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(value) => serializer.serialize_bool(*value),
            Scalar::Number(value) => serializer.serialize_f64(*value),
            Scalar::Str(value) => serializer.serialize_str(value),
            Scalar::Money(money) => money.serialize(serializer),
            Scalar::Date(date) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("date", &date.format("%Y-%m-%d").to_string())?;
                map.end()
            }
            Scalar::Range(range) => range.serialize(serializer),
        }
    }
}

/// An IR argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(Scalar),
    VarRef(String),
    TableRef(String),
    ColRef { table: String, column: String },
    ExprTree(ExprNode),
    Block(Vec<OpRecord>),
    /// Ordered argument list (grouping keys, aggregation specs), serialized
    /// as a plain JSON array.
    List(Vec<Value>),
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Literal(scalar) => scalar.serialize(serializer),
            Value::VarRef(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ref", name)?;
                map.end()
            }
            Value::TableRef(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("table", name)?;
                map.end()
            }
            Value::ColRef { table, column } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("table", table)?;
                map.serialize_entry("column", column)?;
                map.end()
            }
            Value::ExprTree(node) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("expr", node)?;
                map.end()
            }
            Value::Block(records) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("block", records)?;
                map.end()
            }
            Value::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
        }
    }
}

/// An expression carried verbatim into the IR: no folding, no
/// simplification, the same operator tags as the AST.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Leaf(Box<Value>),
    Binary {
        op: BinaryOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ExprNode>,
    },
    Call {
        function: BuiltinFn,
        args: Vec<ExprNode>,
    },
}

impl Serialize for ExprNode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExprNode::Leaf(value) => value.serialize(serializer),
            ExprNode::Binary { op, left, right } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("op", op.tag())?;
                map.serialize_entry("left", left)?;
                map.serialize_entry("right", right)?;
                map.end()
            }
            ExprNode::Unary { op, operand } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("op", op.tag())?;
                map.serialize_entry("operand", operand)?;
                map.end()
            }
            ExprNode::Call { function, args } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("op", "call")?;
                map.serialize_entry("name", function.name())?;
                map.serialize_entry("args", args)?;
                map.end()
            }
        }
    }
}

/// One executable record: an opcode plus named arguments. The argument map
/// is a `BTreeMap` so serialization order is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct OpRecord {
    pub op: OpCode,
    pub args: BTreeMap<String, Value>,
}

impl OpRecord {
    pub fn new(op: OpCode) -> Self {
        Self {
            op,
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, name: &str, value: Value) -> Self {
        self.args.insert(name.to_string(), value);
        self
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }
}

impl Serialize for OpRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("OpRecord", 2)?;
        record.serialize_field("op", &self.op)?;
        record.serialize_field("args", &self.args)?;
        record.end()
    }
}

/// The stable IR JSON: a top-level array of records.
pub fn to_json(records: &[OpRecord]) -> String {
    serde_json::to_string(records).expect("IR serialization is infallible")
}

pub fn to_json_pretty(records: &[OpRecord]) -> String {
    serde_json::to_string_pretty(records).expect("IR serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    #[test]
    fn serializes_open_workbook_record() {
        let record = OpRecord::new(OpCode::ExcelOpenWorkbook)
            .with_arg("path", Value::Literal(Scalar::Str("data/x.xlsx".to_string())));
        assert_eq!(
            to_json(&[record]),
            r#"[{"op":"excel.open_workbook","args":{"path":"data/x.xlsx"}}]"#
        );
    }

    #[test]
    fn serializes_typed_scalars() {
        let money = Money::from_literal_parts(Currency::Usd, "0", "00").expect("money");
        let record = OpRecord::new(OpCode::SetVar)
            .with_arg("name", Value::Literal(Scalar::Str("x".to_string())))
            .with_arg("value", Value::Literal(Scalar::Money(money)));
        assert_eq!(
            to_json(&[record]),
            r#"[{"op":"set_var","args":{"name":"x","value":{"currency":"USD","amount":"0.00"}}}]"#
        );
    }

    #[test]
    fn serializes_refs_and_expression_trees() {
        let predicate = ExprNode::Binary {
            op: BinaryOp::Gt,
            left: Box::new(ExprNode::Leaf(Box::new(Value::ColRef {
                table: "O".to_string(),
                column: "Balance".to_string(),
            }))),
            right: Box::new(ExprNode::Leaf(Box::new(Value::Literal(Scalar::Number(
                0.0,
            ))))),
        };
        let record = OpRecord::new(OpCode::TableFilter)
            .with_arg("table", Value::TableRef("O".to_string()))
            .with_arg("predicate", Value::ExprTree(predicate));
        assert_eq!(
            to_json(&[record]),
            concat!(
                r#"[{"op":"table.filter","args":{"#,
                r#""predicate":{"expr":{"op":">","left":{"table":"O","column":"Balance"},"right":0.0}},"#,
                r#""table":{"table":"O"}}}]"#
            )
        );
    }

    #[test]
    fn serializes_nested_blocks() {
        let body = OpRecord::new(OpCode::WebClick)
            .with_arg("element", Value::Literal(Scalar::Str("#post".to_string())));
        let record = OpRecord::new(OpCode::ControlForEach)
            .with_arg("var", Value::Literal(Scalar::Str("r".to_string())))
            .with_arg("table", Value::TableRef("T".to_string()))
            .with_arg("body", Value::Block(vec![body]));
        let json = to_json(&[record]);
        assert!(json.contains(r#""body":{"block":[{"op":"web.click""#));
    }

    #[test]
    fn argument_order_is_stable() {
        let build = || {
            OpRecord::new(OpCode::WebUseSystem)
                .with_arg("version", Value::Literal(Scalar::Str("1".to_string())))
                .with_arg("name", Value::Literal(Scalar::Str("s".to_string())))
        };
        assert_eq!(to_json(&[build()]), to_json(&[build()]));
        // BTreeMap keys serialize sorted regardless of insertion order.
        assert!(to_json(&[build()]).find("name").unwrap() < to_json(&[build()]).find("version").unwrap());
    }
}
