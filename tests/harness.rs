//! Fixture-driven end-to-end tests: every program under `tests/programs/`
//! runs through the full pipeline (lex, parse, check, lower, dry run) and
//! is compared against its `case.yaml` expectations.

use std::path::Path;

use anyhow::{Context, Result, ensure};

use eac::fixtures::{self, Case, CaseClass};
use eac::interpreter::Interpreter;
use eac::ir::{self, OpRecord};
use eac::provider::DryRunProvider;

fn compile_case(case: &Case) -> Result<Result<Vec<OpRecord>, eac::CompileError>> {
    let source = case.read_program()?;
    Ok(eac::compile(&source))
}

fn top_level_ops(records: &[OpRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| record.op.as_str().to_string())
        .collect()
}

fn check_compiles(case: &Case, records: Vec<OpRecord>) -> Result<()> {
    let expected = &case.spec.expected;

    if let Some(ops) = &expected.ops {
        assert_eq!(
            &top_level_ops(&records),
            ops,
            "opcode sequence mismatch in {}",
            case.name
        );
    }

    let json = ir::to_json(&records);
    if let Some(ir_json) = &expected.ir_json {
        assert_eq!(&json, ir_json, "IR JSON mismatch in {}", case.name);
    }
    if let Some(fragment) = &expected.ir_contains {
        ensure!(
            json.contains(fragment),
            "IR JSON for {} does not contain '{fragment}': {json}",
            case.name
        );
    }

    // Lowering the same source twice must be byte-identical.
    let source = case.read_program()?;
    let again = eac::compile(&source)
        .map_err(|error| anyhow::anyhow!("recompile failed: {error}"))?;
    assert_eq!(
        json,
        ir::to_json(&again),
        "non-deterministic IR for {}",
        case.name
    );

    if let Some(trace_ops) = &expected.trace_ops {
        let mut provider = DryRunProvider::new();
        let report = Interpreter::new(&mut provider).run(&records);
        ensure!(
            report.is_ok(),
            "dry run of {} failed: {:?}",
            case.name,
            report.error
        );
        let actual: Vec<String> = report.trace.iter().map(|entry| entry.op.clone()).collect();
        assert_eq!(&actual, trace_ops, "trace mismatch in {}", case.name);
        ensure!(
            report.trace.iter().all(|entry| entry.error.is_none()),
            "dry run of {} recorded an error entry",
            case.name
        );
    }

    Ok(())
}

fn check_frontend_error(case: &Case, error: eac::CompileError) -> Result<()> {
    let expected = case
        .spec
        .expected
        .error_contains
        .as_deref()
        .with_context(|| format!("case {} is missing error_contains", case.name))?;
    let rendered = error.messages("program.eac").join("\n");
    ensure!(
        rendered.contains(expected),
        "expected error containing '{expected}' in {}, got '{rendered}'",
        case.name
    );
    Ok(())
}

#[test]
fn runs_fixture_programs() -> Result<()> {
    let cases = fixtures::load_cases(Path::new("tests/programs"))?;
    for case in cases {
        match (case.spec.class, compile_case(&case)?) {
            (CaseClass::Compiles, Ok(records)) => check_compiles(&case, records)?,
            (CaseClass::Compiles, Err(error)) => {
                anyhow::bail!("case {} failed to compile: {error}", case.name)
            }
            (CaseClass::FrontendError, Err(error)) => check_frontend_error(&case, error)?,
            (CaseClass::FrontendError, Ok(_)) => {
                anyhow::bail!("case {} compiled but should have failed", case.name)
            }
        }
    }
    Ok(())
}

#[test]
fn qualified_references_resolve_to_earlier_read_tables() -> Result<()> {
    // Every ColRef table in the IR must name a table declared by an earlier
    // excel.read_table record.
    let source = std::fs::read_to_string("tests/programs/aging_report/program.eac")?;
    let records = eac::compile(&source).map_err(|error| anyhow::anyhow!("{error}"))?;

    let mut declared = Vec::new();
    for record in &records {
        let json = serde_json::to_value(record)?;
        if record.op.as_str() == "excel.read_table" {
            declared.push(json["args"]["table"]["table"].as_str().unwrap().to_string());
            continue;
        }
        for table in colref_tables(&json["args"]) {
            ensure!(
                declared.contains(&table),
                "reference to table '{table}' before its read_table record"
            );
        }
    }
    Ok(())
}

/// Collect `{"table": T, "column": C}` reference targets from arg JSON.
fn colref_tables(value: &serde_json::Value) -> Vec<String> {
    let mut found = Vec::new();
    match value {
        serde_json::Value::Object(map) => {
            if let (Some(table), Some(_)) = (map.get("table"), map.get("column")) {
                if let Some(table) = table.as_str() {
                    found.push(table.to_string());
                }
            }
            for nested in map.values() {
                found.extend(colref_tables(nested));
            }
        }
        serde_json::Value::Array(values) => {
            for nested in values {
                found.extend(colref_tables(nested));
            }
        }
        _ => {}
    }
    found
}
