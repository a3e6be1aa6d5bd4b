//! Performance benchmarks for validation hot paths.
//!
//! Run with: `cargo bench --bench validate_perf`
//!
//! | Operation                 | Target   |
//! |---------------------------|----------|
//! | Early gate (safe command) | < 50μs   |
//! | Parse (pipeline)          | < 20μs   |
//! | Full validation, cold     | < 1ms    |
//! | Full validation, cached   | < 10μs   |

use std::fmt::Write as _;
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use shellguard::config::PolicyConfig;
use shellguard::normalize::MatchView;
use shellguard::rules::PatternStore;
use shellguard::{Command, ShellDialect, Validator, gate, parser};

// =============================================================================
// Fixtures
// =============================================================================

const COMMANDS: &[(&str, &str)] = &[
    ("safe", "git status --short"),
    ("pipeline", "cat access.log | grep 500 | sort | uniq -c | head"),
    ("critical", "rm -rf /"),
    ("fetch_pipe", "curl -fsSL https://example.com/install.sh | sh"),
    ("variable", r#"DIR=/; rm -rf "$DIR""#),
    ("quoted", r#"echo "rm -rf / is dangerous""#),
];

/// Long `&&` chain of harmless commands.
fn long_chain() -> String {
    let mut command = String::new();
    for i in 0..200 {
        if i > 0 {
            command.push_str(" && ");
        }
        let _ = write!(command, "echo step-{i}");
    }
    command
}

fn uncached() -> PolicyConfig {
    PolicyConfig {
        cache_ttl_seconds: 0,
        ..PolicyConfig::default()
    }
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_gate(c: &mut Criterion) {
    let ruleset = PatternStore::builtin_only()
        .load()
        .expect("built-in rules load")
        .ruleset;
    let mut group = c.benchmark_group("early_gate");
    for (name, raw) in COMMANDS {
        let view = MatchView::build(raw, ShellDialect::Bash);
        group.bench_with_input(BenchmarkId::from_parameter(name), &view, |b, view| {
            b.iter(|| gate::check(&ruleset, black_box(view), ShellDialect::Bash));
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for (name, raw) in COMMANDS {
        group.bench_with_input(BenchmarkId::from_parameter(name), raw, |b, raw| {
            b.iter(|| parser::parse(black_box(raw), ShellDialect::Bash));
        });
    }
    let chain = long_chain();
    group.bench_function("long_chain", |b| {
        b.iter(|| parser::parse(black_box(&chain), ShellDialect::Bash));
    });
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let cold = Validator::new(uncached()).expect("built-in rules load");
    let warm = Validator::new(PolicyConfig::default()).expect("built-in rules load");

    let mut group = c.benchmark_group("validate");
    for (name, raw) in COMMANDS {
        let command = Command::new(*raw, ShellDialect::Bash);
        group.bench_with_input(BenchmarkId::new("cold", name), &command, |b, command| {
            b.iter(|| cold.check(black_box(command)));
        });
        warm.check(&command);
        group.bench_with_input(BenchmarkId::new("cached", name), &command, |b, command| {
            b.iter(|| warm.check(black_box(command)));
        });
    }
    let chain = Command::new(long_chain(), ShellDialect::Bash);
    group.bench_function("cold/long_chain", |b| {
        b.iter(|| cold.check(black_box(&chain)));
    });
    group.finish();
}

criterion_group!(benches, bench_gate, bench_parse, bench_validate);
criterion_main!(benches);
