//! Plain-English summaries of IR programs.
//!
//! A read-only walk that renders one sentence per record from a fixed
//! per-opcode template. Total and idempotent: every opcode has a template,
//! malformed arguments render as `?` instead of failing, and the output
//! depends only on the IR.

use crate::ir::{ExprNode, OpCode, OpRecord, Scalar, Value};

pub fn explain(records: &[OpRecord]) -> String {
    let mut lines = Vec::new();
    explain_block(records, 0, &mut lines);
    lines.join("\n")
}

fn explain_block(records: &[OpRecord], depth: usize, lines: &mut Vec<String>) {
    for record in records {
        explain_record(record, depth, lines);
    }
}

fn explain_record(record: &OpRecord, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    let sentence = match record.op {
        OpCode::ExcelOpenWorkbook => {
            format!("Open the workbook {}.", quoted(record, "path"))
        }
        OpCode::ExcelReadTable => format!(
            "Read range {} of sheet {} as table {}.",
            text(record, "range"),
            quoted(record, "sheet"),
            text(record, "table"),
        ),
        OpCode::ExcelExport => format!(
            "Export {} to {}.",
            text(record, "source"),
            quoted(record, "path"),
        ),
        OpCode::TableAddColumn => format!(
            "Add a column {} to table {}, computed as {}.",
            text(record, "column"),
            text(record, "table"),
            text(record, "expr"),
        ),
        OpCode::TableFilter => format!(
            "Keep only the rows of {} where {}.",
            text(record, "table"),
            text(record, "predicate"),
        ),
        OpCode::TableSort => {
            let direction = match record.arg("ascending") {
                Some(Value::Literal(Scalar::Bool(false))) => "descending",
                _ => "ascending",
            };
            format!(
                "Sort {} by {} in {direction} order.",
                text(record, "table"),
                text(record, "key"),
            )
        }
        OpCode::TableGroup => format!(
            "Group {} by {}, computing {}.",
            text(record, "table"),
            list_text(record, "keys"),
            aggregations_text(record),
        ),
        OpCode::TableJoin => format!(
            "Join {} with {} on column {}.",
            text(record, "left"),
            text(record, "right"),
            text(record, "on"),
        ),
        OpCode::SetVar => format!(
            "Set {} to {}.",
            text(record, "name"),
            text(record, "value"),
        ),
        OpCode::CallResult => format!("Store the call result in {}.", text(record, "name")),
        OpCode::WebUseSystem => format!(
            "Target the system {} at version {}.",
            quoted(record, "name"),
            quoted(record, "version"),
        ),
        OpCode::WebLogin => match record.arg("credential") {
            Some(Value::Literal(Scalar::Str(credential))) => {
                format!("Log in with the credential \"{credential}\".")
            }
            _ => "Log in.".to_string(),
        },
        OpCode::WebLogout => "Log out.".to_string(),
        OpCode::WebGotoPage => format!("Go to the page {}.", quoted(record, "page")),
        OpCode::WebEnter => format!(
            "Enter {} into the field {}.",
            text(record, "value"),
            quoted(record, "field"),
        ),
        OpCode::WebClick => format!("Click {}.", quoted(record, "element")),
        OpCode::WebExtract => format!(
            "Extract the field {} into {}.",
            quoted(record, "selector"),
            text(record, "var"),
        ),
        OpCode::ControlForEach => format!(
            "For each row {} of table {}:",
            text(record, "var"),
            text(record, "table"),
        ),
        OpCode::ControlIf => format!("If {}:", text(record, "condition")),
    };
    lines.push(format!("{indent}{sentence}"));

    match record.op {
        OpCode::ControlForEach => {
            if let Some(Value::Block(body)) = record.arg("body") {
                explain_block(body, depth + 1, lines);
            }
        }
        OpCode::ControlIf => {
            if let Some(Value::Block(body)) = record.arg("then") {
                explain_block(body, depth + 1, lines);
            }
            if let Some(Value::Block(body)) = record.arg("otherwise") {
                if !body.is_empty() {
                    lines.push(format!("{indent}Otherwise:"));
                    explain_block(body, depth + 1, lines);
                }
            }
        }
        _ => {}
    }

    if let Some(Value::Block(handler)) = record.arg("on_error") {
        lines.push(format!("{indent}If that step fails:"));
        explain_block(handler, depth + 1, lines);
    }
}

fn text(record: &OpRecord, name: &str) -> String {
    record.arg(name).map(value_text).unwrap_or_else(|| "?".to_string())
}

fn quoted(record: &OpRecord, name: &str) -> String {
    match record.arg(name) {
        Some(Value::Literal(Scalar::Str(value))) => format!("\"{value}\""),
        Some(other) => value_text(other),
        None => "?".to_string(),
    }
}

fn list_text(record: &OpRecord, name: &str) -> String {
    match record.arg(name) {
        Some(Value::List(values)) if !values.is_empty() => values
            .iter()
            .map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        _ => "nothing".to_string(),
    }
}

fn aggregations_text(record: &OpRecord) -> String {
    let Some(Value::List(specs)) = record.arg("aggregations") else {
        return "nothing".to_string();
    };
    if specs.is_empty() {
        return "nothing".to_string();
    }
    specs
        .iter()
        .map(|spec| match spec {
            Value::List(triple) => match triple.as_slice() {
                [Value::Literal(Scalar::Str(op)), Value::Literal(Scalar::Null), Value::Literal(Scalar::Str(name))] => {
                    format!("{op} as {name}")
                }
                [Value::Literal(Scalar::Str(op)), expr, Value::Literal(Scalar::Str(name))] => {
                    format!("{op} of {} as {name}", value_text(expr))
                }
                _ => "?".to_string(),
            },
            _ => "?".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Literal(scalar) => scalar_text(scalar),
        Value::VarRef(name) => name.clone(),
        Value::TableRef(name) => name.clone(),
        Value::ColRef { table, column } => format!("{table}.{column}"),
        Value::ExprTree(node) => expr_text(node),
        Value::Block(_) => "a nested block".to_string(),
        Value::List(values) => values
            .iter()
            .map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn scalar_text(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Null => "null".to_string(),
        Scalar::Bool(value) => value.to_string(),
        Scalar::Number(value) => {
            if value.fract() == 0.0 && value.abs() < 1e15 {
                format!("{}", *value as i64)
            } else {
                value.to_string()
            }
        }
        Scalar::Str(value) => format!("\"{value}\""),
        Scalar::Money(money) => money.to_string(),
        Scalar::Date(date) => date.format("%Y-%m-%d").to_string(),
        Scalar::Range(range) => range.to_string(),
    }
}

fn expr_text(node: &ExprNode) -> String {
    match node {
        ExprNode::Leaf(value) => value_text(value),
        ExprNode::Binary { op, left, right } => format!(
            "{} {} {}",
            operand_text(left),
            op.tag(),
            operand_text(right),
        ),
        ExprNode::Unary { op, operand } => match op.tag() {
            "not" => format!("not {}", operand_text(operand)),
            _ => format!("-{}", operand_text(operand)),
        },
        ExprNode::Call { function, args } => format!(
            "{}({})",
            function.name(),
            args.iter().map(expr_text).collect::<Vec<_>>().join(", "),
        ),
    }
}

fn operand_text(node: &ExprNode) -> String {
    match node {
        ExprNode::Binary { .. } => format!("({})", expr_text(node)),
        _ => expr_text(node),
    }
}
