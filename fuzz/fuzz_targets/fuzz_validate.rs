//! Fuzz target for the full validation pipeline.
//!
//! Every input must produce a verdict whose match spans lie inside the
//! command, and validating twice must give the same verdict.

#![no_main]

use std::sync::LazyLock;

use libfuzzer_sys::fuzz_target;
use shellguard::config::PolicyConfig;
use shellguard::{Command, ShellDialect, Validator};

static VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let config = PolicyConfig {
        cache_ttl_seconds: 0,
        ..PolicyConfig::default()
    };
    Validator::new(config).expect("built-in rules load")
});

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let Ok(command) = std::str::from_utf8(rest) else {
        return;
    };
    if command.len() > 4_096 {
        return;
    }

    let shell = ShellDialect::ALL[usize::from(selector) % ShellDialect::ALL.len()];
    let candidate = Command::new(command, shell);
    let first = VALIDATOR.check(&candidate);
    for m in &first.matched {
        assert!(m.span.fits(command.len()), "span out of range: {m:?}");
    }
    let second = VALIDATOR.check(&candidate);
    assert!(first.same_verdict(&second));
});
