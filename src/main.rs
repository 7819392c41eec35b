use std::fs;

use anyhow::{Context, Result, bail};

use eac::interpreter::Interpreter;
use eac::provider::{DryRunProvider, EffectProvider, MemoryProvider};
use eac::{checker, explain, ir, trace};

static USAGE: &str = r#"
usage: eac CMD [OPTIONS] FILE

commands:
    parse      Parse the file and list its statements
    check      Type-check the program
    lower      Emit the IR JSON to stdout
    run        Compile and execute (in-memory provider)
    explain    Print a plain-English summary of the program

options:
    --dry-run  With run: use the dry-run provider (empty tables, no effects)
    --compact  With lower: single-line JSON instead of pretty-printed
"#;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        bail!("Missing command.{USAGE}");
    };

    let mut dry_run = false;
    let mut compact = false;
    let mut input_path: Option<String> = None;
    for arg in args {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            "--compact" => compact = true,
            _ if input_path.is_none() => input_path = Some(arg),
            _ => bail!("Only one input file is supported"),
        }
    }
    let Some(path) = input_path else {
        bail!("Missing input file.{USAGE}");
    };
    let source = fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?;

    match command.as_str() {
        "parse" => cmd_parse(&source, &path),
        "check" => cmd_check(&source, &path),
        "lower" => cmd_lower(&source, &path, compact),
        "run" => cmd_run(&source, &path, dry_run),
        "explain" => cmd_explain(&source, &path),
        other => bail!("Unknown command '{other}'.{USAGE}"),
    }
}

fn fail(error: eac::CompileError, path: &str) -> Result<()> {
    for line in error.messages(path) {
        eprintln!("{line}");
    }
    std::process::exit(1);
}

fn cmd_parse(source: &str, path: &str) -> Result<()> {
    let program = match eac::parse(source) {
        Ok(program) => program,
        Err(error) => return fail(error, path),
    };
    println!("Parsed {} statements.", program.statements.len());
    for (index, stmt) in program.statements.iter().enumerate() {
        println!("  {}. {}", index + 1, statement_name(&stmt.kind));
    }
    Ok(())
}

fn cmd_check(source: &str, path: &str) -> Result<()> {
    let program = match eac::parse(source) {
        Ok(program) => program,
        Err(error) => return fail(error, path),
    };
    match checker::check(&program) {
        Ok(_) => {
            println!("OK");
            Ok(())
        }
        Err(errors) => fail(errors.into(), path),
    }
}

fn cmd_lower(source: &str, path: &str, compact: bool) -> Result<()> {
    let records = match eac::compile(source) {
        Ok(records) => records,
        Err(error) => return fail(error, path),
    };
    if compact {
        println!("{}", ir::to_json(&records));
    } else {
        println!("{}", ir::to_json_pretty(&records));
    }
    Ok(())
}

fn cmd_run(source: &str, path: &str, dry_run: bool) -> Result<()> {
    let records = match eac::compile(source) {
        Ok(records) => records,
        Err(error) => return fail(error, path),
    };
    let report = if dry_run {
        let mut provider = DryRunProvider::new();
        run_with(&mut provider, &records)
    } else {
        let mut provider = MemoryProvider::new();
        run_with(&mut provider, &records)
    };
    println!("{}", trace::to_json_lines(&report.trace));
    if let Some(error) = report.error {
        eprintln!("Runtime error: {error}");
        std::process::exit(1);
    }
    if report.cancelled {
        eprintln!("Cancelled.");
        std::process::exit(1);
    }
    eprintln!(
        "Completed {} steps.{}",
        report.trace.len(),
        if dry_run { " (dry run)" } else { "" }
    );
    Ok(())
}

fn run_with<P: EffectProvider>(
    provider: &mut P,
    records: &[ir::OpRecord],
) -> eac::interpreter::RunReport {
    Interpreter::new(provider).run(records)
}

fn cmd_explain(source: &str, path: &str) -> Result<()> {
    let records = match eac::compile(source) {
        Ok(records) => records,
        Err(error) => return fail(error, path),
    };
    println!("{}", explain::explain(&records));
    Ok(())
}

fn statement_name(kind: &eac::ast::StmtKind) -> &'static str {
    use eac::ast::StmtKind::*;
    match kind {
        OpenWorkbook { .. } => "OpenWorkbook",
        TreatRange { .. } => "TreatRange",
        SetVar { .. } => "SetVar",
        AddColumn { .. } => "AddColumn",
        Filter { .. } => "Filter",
        Sort { .. } => "Sort",
        Group { .. } => "Group",
        Join { .. } => "Join",
        Export { .. } => "Export",
        ForEach { .. } => "ForEach",
        If { .. } => "If",
        UseSystem { .. } => "UseSystem",
        LogIn { .. } => "LogIn",
        LogOut => "LogOut",
        GoToPage { .. } => "GoToPage",
        EnterField { .. } => "EnterField",
        Click { .. } => "Click",
        Extract { .. } => "Extract",
        Define { .. } => "Define",
        CallResult { .. } => "CallResult",
        OnError { .. } => "OnError",
    }
}
