//! AST -> IR lowering.
//!
//! A deterministic single pass. Each statement emits exactly one record in
//! source order; compound statements nest their bodies as `Block` arguments.
//! Expressions are carried verbatim as `ExprTree` values. `On error`
//! statements do not emit a record of their own: the handler attaches to the
//! next sibling's record as an `on_error` block.

use thiserror::Error;

use crate::ast::{Aggregation, Expr, ExprKind, Program, Stmt, StmtKind};
use crate::checker::SymbolTable;
use crate::ir::{ExprNode, OpCode, OpRecord, Scalar, Value};
use crate::token::SourceLoc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LowerError {
    #[error("On error must be followed by a statement")]
    DanglingOnError { line: usize, column: usize },
    #[error("On error cannot guard another On error")]
    NestedOnError { line: usize, column: usize },
}

impl LowerError {
    pub fn loc(&self) -> SourceLoc {
        match *self {
            LowerError::DanglingOnError { line, column }
            | LowerError::NestedOnError { line, column } => SourceLoc::new(line, column),
        }
    }
}

pub fn lower(program: &Program, symbols: &SymbolTable) -> Result<Vec<OpRecord>, LowerError> {
    Lowerer { symbols }.lower_block(&program.statements)
}

struct Lowerer<'a> {
    symbols: &'a SymbolTable,
}

impl Lowerer<'_> {
    fn lower_block(&self, statements: &[Stmt]) -> Result<Vec<OpRecord>, LowerError> {
        let mut records = Vec::new();
        let mut pending_handler: Option<(Vec<OpRecord>, SourceLoc)> = None;
        for stmt in statements {
            if let StmtKind::OnError { handler } = &stmt.kind {
                if matches!(handler.kind, StmtKind::OnError { .. }) {
                    return Err(LowerError::NestedOnError {
                        line: stmt.loc.line,
                        column: stmt.loc.column,
                    });
                }
                // Handlers do not stack; the latest one wins.
                pending_handler = Some((vec![self.lower_stmt(handler)?], stmt.loc));
                continue;
            }
            let mut record = self.lower_stmt(stmt)?;
            if let Some((handler, _)) = pending_handler.take() {
                record.args.insert("on_error".to_string(), Value::Block(handler));
            }
            records.push(record);
        }
        if let Some((_, loc)) = pending_handler {
            return Err(LowerError::DanglingOnError {
                line: loc.line,
                column: loc.column,
            });
        }
        Ok(records)
    }

    fn lower_stmt(&self, stmt: &Stmt) -> Result<OpRecord, LowerError> {
        let record = match &stmt.kind {
            StmtKind::OpenWorkbook { path } => {
                OpRecord::new(OpCode::ExcelOpenWorkbook).with_arg("path", string(path))
            }
            StmtKind::TreatRange {
                sheet,
                range,
                table,
            } => OpRecord::new(OpCode::ExcelReadTable)
                .with_arg("sheet", string(sheet))
                .with_arg("range", Value::Literal(Scalar::Range(*range)))
                .with_arg("table", Value::TableRef(table.clone())),
            StmtKind::SetVar { name, expr } => OpRecord::new(OpCode::SetVar)
                .with_arg("name", string(name))
                .with_arg("value", self.lower_expr_arg(expr)),
            StmtKind::AddColumn {
                column,
                table,
                expr,
            } => OpRecord::new(OpCode::TableAddColumn)
                .with_arg("table", Value::TableRef(table.clone()))
                .with_arg("column", string(column))
                .with_arg("expr", self.lower_expr_arg(expr)),
            StmtKind::Filter { table, predicate } => OpRecord::new(OpCode::TableFilter)
                .with_arg("table", Value::TableRef(table.clone()))
                .with_arg("predicate", self.lower_expr_arg(predicate)),
            StmtKind::Sort {
                table,
                key,
                ascending,
            } => OpRecord::new(OpCode::TableSort)
                .with_arg("table", Value::TableRef(table.clone()))
                .with_arg("key", self.lower_expr_arg(key))
                .with_arg("ascending", Value::Literal(Scalar::Bool(*ascending))),
            StmtKind::Group {
                table,
                keys,
                aggregations,
            } => OpRecord::new(OpCode::TableGroup)
                .with_arg("table", Value::TableRef(table.clone()))
                .with_arg(
                    "keys",
                    Value::List(keys.iter().map(|key| self.lower_expr_arg(key)).collect()),
                )
                .with_arg(
                    "aggregations",
                    Value::List(
                        aggregations
                            .iter()
                            .map(|aggregation| self.lower_aggregation(aggregation))
                            .collect(),
                    ),
                ),
            StmtKind::Join { left, right, on } => OpRecord::new(OpCode::TableJoin)
                .with_arg("left", Value::TableRef(left.clone()))
                .with_arg("right", Value::TableRef(right.clone()))
                .with_arg("on", string(on)),
            StmtKind::Export { source, path } => OpRecord::new(OpCode::ExcelExport)
                .with_arg("source", self.lower_expr_arg(source))
                .with_arg("path", string(path)),
            StmtKind::ForEach { var, table, body } => OpRecord::new(OpCode::ControlForEach)
                .with_arg("var", string(var))
                .with_arg("table", Value::TableRef(table.clone()))
                .with_arg("body", Value::Block(self.lower_block(body)?)),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => OpRecord::new(OpCode::ControlIf)
                .with_arg("condition", self.lower_expr_arg(cond))
                .with_arg("then", Value::Block(self.lower_block(then_body)?))
                .with_arg("otherwise", Value::Block(self.lower_block(else_body)?)),
            StmtKind::UseSystem { name, version } => OpRecord::new(OpCode::WebUseSystem)
                .with_arg("name", string(name))
                .with_arg("version", string(version)),
            StmtKind::LogIn { credential } => {
                let credential = match credential {
                    Some(name) => string(name),
                    None => Value::Literal(Scalar::Null),
                };
                OpRecord::new(OpCode::WebLogin).with_arg("credential", credential)
            }
            StmtKind::LogOut => OpRecord::new(OpCode::WebLogout),
            StmtKind::GoToPage { name } => {
                OpRecord::new(OpCode::WebGotoPage).with_arg("page", string(name))
            }
            StmtKind::EnterField { selector, expr } => OpRecord::new(OpCode::WebEnter)
                .with_arg("field", string(selector))
                .with_arg("value", self.lower_expr_arg(expr)),
            StmtKind::Click { selector } => {
                OpRecord::new(OpCode::WebClick).with_arg("element", string(selector))
            }
            StmtKind::Extract { var, selector } => OpRecord::new(OpCode::WebExtract)
                .with_arg("selector", string(selector))
                .with_arg("var", string(var)),
            // A declaration binds the name to null at run time; its real
            // effect happened in the checker.
            StmtKind::Define { name, .. } => OpRecord::new(OpCode::SetVar)
                .with_arg("name", string(name))
                .with_arg(
                    "value",
                    Value::ExprTree(ExprNode::Leaf(Box::new(Value::Literal(Scalar::Null)))),
                ),
            StmtKind::CallResult { name } => {
                OpRecord::new(OpCode::CallResult).with_arg("name", string(name))
            }
            StmtKind::OnError { .. } => {
                unreachable!("On error is folded into its sibling by lower_block")
            }
        };
        Ok(record)
    }

    fn lower_aggregation(&self, aggregation: &Aggregation) -> Value {
        let expr = match &aggregation.expr {
            Some(expr) => self.lower_expr_arg(expr),
            None => Value::Literal(Scalar::Null),
        };
        Value::List(vec![
            Value::Literal(Scalar::Str(aggregation.op.as_str().to_string())),
            expr,
            Value::Literal(Scalar::Str(aggregation.name.clone())),
        ])
    }

    fn lower_expr_arg(&self, expr: &Expr) -> Value {
        Value::ExprTree(self.lower_expr(expr))
    }

    fn lower_expr(&self, expr: &Expr) -> ExprNode {
        match &expr.kind {
            ExprKind::String(value) => leaf(Value::Literal(Scalar::Str(value.clone()))),
            ExprKind::Number(value) => leaf(Value::Literal(Scalar::Number(*value))),
            ExprKind::Money(money) => leaf(Value::Literal(Scalar::Money(*money))),
            ExprKind::Date(date) => leaf(Value::Literal(Scalar::Date(*date))),
            ExprKind::Boolean(value) => leaf(Value::Literal(Scalar::Bool(*value))),
            ExprKind::Ident(name) => {
                // Table names that are not shadowed by a variable become
                // table references; everything else resolves at run time.
                if self.symbols.tables.contains_key(name)
                    && !self.symbols.variables.contains_key(name)
                {
                    leaf(Value::TableRef(name.clone()))
                } else {
                    leaf(Value::VarRef(name.clone()))
                }
            }
            ExprKind::ColRef { table, column } => leaf(Value::ColRef {
                table: table.clone(),
                column: column.clone(),
            }),
            ExprKind::Binary { op, left, right } => ExprNode::Binary {
                op: *op,
                left: Box::new(self.lower_expr(left)),
                right: Box::new(self.lower_expr(right)),
            },
            ExprKind::Unary { op, operand } => ExprNode::Unary {
                op: *op,
                operand: Box::new(self.lower_expr(operand)),
            },
            ExprKind::Call { function, args } => ExprNode::Call {
                function: *function,
                args: args.iter().map(|arg| self.lower_expr(arg)).collect(),
            },
        }
    }
}

fn string(value: &str) -> Value {
    Value::Literal(Scalar::Str(value.to_string()))
}

fn leaf(value: Value) -> ExprNode {
    ExprNode::Leaf(Box::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::check;
    use crate::ir;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;
    use indoc::indoc;

    fn lowered(source: &str) -> Vec<OpRecord> {
        let program = parse_tokens(tokenize(source).expect("tokenize")).expect("parse");
        let symbols = check(&program).expect("check");
        lower(&program, &symbols).expect("lower")
    }

    fn ops(records: &[OpRecord]) -> Vec<&'static str> {
        records.iter().map(|record| record.op.as_str()).collect()
    }

    #[test]
    fn empty_program_lowers_to_empty_ir() {
        assert!(lowered("").is_empty());
    }

    #[test]
    fn open_workbook_matches_wire_format() {
        let records = lowered(r#"Open workbook "data/x.xlsx"."#);
        assert_eq!(
            ir::to_json(&records),
            r#"[{"op":"excel.open_workbook","args":{"path":"data/x.xlsx"}}]"#
        );
    }

    #[test]
    fn aging_report_lowers_in_source_order() {
        let records = lowered(indoc! {r#"
            Open workbook "a.xlsx".
            In sheet "Open Items", treat range A1G999 as table O.
            Set today to date "2026-02-11".
            Filter O where O.Balance > USD 0.00.
            Export O to "out.csv".
        "#});
        assert_eq!(
            ops(&records),
            vec![
                "excel.open_workbook",
                "excel.read_table",
                "set_var",
                "table.filter",
                "excel.export",
            ]
        );
    }

    #[test]
    fn lowering_is_deterministic() {
        let source = indoc! {r#"
            In sheet "S", treat range A1G999 as table T.
            Filter T where T.Balance > USD 0.00 and not T.Closed = true.
            Sort T by T.Balance descending.
        "#};
        assert_eq!(ir::to_json(&lowered(source)), ir::to_json(&lowered(source)));
    }

    #[test]
    fn table_idents_lower_to_table_refs() {
        let records = lowered(indoc! {r#"
            In sheet "S", treat range A1B2 as table T.
            Export T to "out.csv".
        "#});
        let source = records[1].arg("source").expect("source arg");
        assert_eq!(
            *source,
            Value::ExprTree(ExprNode::Leaf(Box::new(Value::TableRef("T".to_string()))))
        );
    }

    #[test]
    fn variable_idents_lower_to_var_refs() {
        let records = lowered(indoc! {r#"
            Set x to 1.
            Set y to x.
        "#});
        let value = records[1].arg("value").expect("value arg");
        assert_eq!(
            *value,
            Value::ExprTree(ExprNode::Leaf(Box::new(Value::VarRef("x".to_string()))))
        );
    }

    #[test]
    fn for_each_nests_body_as_block() {
        let records = lowered(indoc! {r##"
            In sheet "S", treat range A1B9 as table T.
            For each row r in T:
                Enter "#amount" = r.Amount.
                Click "#post".
        "##});
        assert_eq!(records.len(), 2);
        let Some(Value::Block(body)) = records[1].arg("body") else {
            panic!("expected body block");
        };
        assert_eq!(ops(body), vec!["web.enter", "web.click"]);
    }

    #[test]
    fn if_lowers_both_branches() {
        let records = lowered(indoc! {r#"
            Set x to 1.
            If x > 0:
                Set y to 1.
            Otherwise:
                Set y to 2.
        "#});
        let Some(Value::Block(then_block)) = records[1].arg("then") else {
            panic!("expected then block");
        };
        let Some(Value::Block(else_block)) = records[1].arg("otherwise") else {
            panic!("expected otherwise block");
        };
        assert_eq!(then_block.len(), 1);
        assert_eq!(else_block.len(), 1);
    }

    #[test]
    fn define_lowers_to_null_binding() {
        let records = lowered("Define total as number.");
        assert_eq!(records[0].op, OpCode::SetVar);
        assert_eq!(
            records[0].arg("value"),
            Some(&Value::ExprTree(ExprNode::Leaf(Box::new(Value::Literal(
                Scalar::Null
            )))))
        );
    }

    #[test]
    fn on_error_attaches_to_next_sibling() {
        let records = lowered(indoc! {r##"
            On error: Click "#retry".
            Click "#go".
        "##});
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].op, OpCode::WebClick);
        let Some(Value::Block(handler)) = records[0].arg("on_error") else {
            panic!("expected handler block");
        };
        assert_eq!(ops(handler), vec!["web.click"]);
    }

    #[test]
    fn trailing_on_error_is_rejected() {
        let program = parse_tokens(
            tokenize("On error: Click \"#retry\".").expect("tokenize"),
        )
        .expect("parse");
        let symbols = check(&program).expect("check");
        let err = lower(&program, &symbols).expect_err("expected lowering failure");
        assert_eq!(err.to_string(), "On error must be followed by a statement");
    }

    #[test]
    fn record_count_tracks_statements_minus_handlers() {
        let source = indoc! {r#"
            Set x to 1.
            On error: Set x to 0.
            Set y to 2.
            Set z to 3.
        "#};
        let program = parse_tokens(tokenize(source).expect("tokenize")).expect("parse");
        let records = lowered(source);
        assert_eq!(records.len(), program.statements.len() - 1);
    }

    #[test]
    fn group_lowers_keys_and_aggregations() {
        let records = lowered(indoc! {r#"
            In sheet "S", treat range A1G999 as table T.
            Group T by T.Region, sum T.Balance as Total, count as N.
        "#});
        let Some(Value::List(keys)) = records[1].arg("keys") else {
            panic!("expected keys list");
        };
        assert_eq!(keys.len(), 1);
        let Some(Value::List(aggregations)) = records[1].arg("aggregations") else {
            panic!("expected aggregations list");
        };
        assert_eq!(aggregations.len(), 2);
        let Value::List(first) = &aggregations[0] else {
            panic!("expected aggregation triple");
        };
        assert_eq!(first[0], Value::Literal(Scalar::Str("sum".to_string())));
        assert_eq!(first[2], Value::Literal(Scalar::Str("Total".to_string())));
    }
}
