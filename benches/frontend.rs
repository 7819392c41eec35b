//! Front-end throughput: lex + parse + check + lower on a representative
//! automation program.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

static AGING_REPORT: &str = r#"
Open workbook "data/receivables.xlsx".
In sheet "Open Items", treat range A1G999 as table O.
Set today to date "2026-02-11".
Add column Age to O as days_between(O.DueDate, today).
Filter O where O.Balance > USD 0.00 and O.Age > 30.
Sort O by O.Balance descending.
Group O by O.Region, sum O.Balance as Total, count as N.
Export O to "out/aging.csv".
"#;

fn bench_tokenize(c: &mut Criterion) {
    c.bench_function("tokenize_aging_report", |b| {
        b.iter(|| eac::lexer::tokenize(black_box(AGING_REPORT)).expect("tokenize"))
    });
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_aging_report", |b| {
        b.iter(|| eac::parse(black_box(AGING_REPORT)).expect("parse"))
    });
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_aging_report", |b| {
        b.iter(|| eac::compile(black_box(AGING_REPORT)).expect("compile"))
    });
}

criterion_group!(frontend, bench_tokenize, bench_parse, bench_compile);
criterion_main!(frontend);
