//! Invariants over generated commands.

mod common;

use std::sync::{Arc, OnceLock};

use common::{BrokenClassifier, FixedClassifier, uncached_policy, with_classifier};
use proptest::prelude::*;
use shellguard::config::PolicyConfig;
use shellguard::{Command, Domain, RiskLevel, ShellDialect, Validator};

fn shared() -> &'static Validator {
    static VALIDATOR: OnceLock<Validator> = OnceLock::new();
    VALIDATOR.get_or_init(|| Validator::new(uncached_policy()).unwrap())
}

fn unscoped() -> &'static Validator {
    static VALIDATOR: OnceLock<Validator> = OnceLock::new();
    VALIDATOR.get_or_init(|| with_classifier(Arc::new(BrokenClassifier)))
}

fn misrouted() -> &'static Validator {
    static VALIDATOR: OnceLock<Validator> = OnceLock::new();
    VALIDATOR.get_or_init(|| with_classifier(Arc::new(FixedClassifier(Domain::Container))))
}

fn dialect() -> impl Strategy<Value = ShellDialect> {
    prop::sample::select(ShellDialect::ALL.to_vec())
}

/// Shell-flavoured text: command words, operators, quotes and expansions.
fn shellish() -> impl Strategy<Value = String> {
    let token = prop_oneof![
        Just("rm"),
        Just("-rf"),
        Just("/"),
        Just("/tmp/x"),
        Just("chmod"),
        Just("777"),
        Just("/etc/passwd"),
        Just("curl"),
        Just("http://x"),
        Just("|"),
        Just("sh"),
        Just(";"),
        Just("&&"),
        Just("echo"),
        Just("\""),
        Just("'"),
        Just("$DIR"),
        Just("DIR=/"),
        Just("$("),
        Just(")"),
        Just("{"),
        Just("}"),
        Just(">"),
        Just("/dev/sda"),
        Just("ls"),
    ];
    prop::collection::vec(token, 0..12).prop_map(|tokens| tokens.join(" "))
}

fn harmless() -> impl Strategy<Value = String> {
    let command = prop_oneof![
        Just("ls -la"),
        Just("cd /tmp"),
        Just("echo hello"),
        Just("git status"),
        Just("X=1"),
        Just("cat README.md | head"),
    ];
    prop::collection::vec(command, 1..5).prop_map(|commands| commands.join(" && "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn arbitrary_input_never_panics(raw in "\\PC{0,80}", shell in dialect()) {
        let result = shared().check(&Command::new(raw.as_str(), shell));
        for m in &result.matched {
            prop_assert!(m.span.fits(raw.len()));
        }
    }

    #[test]
    fn validation_is_idempotent(raw in shellish(), shell in dialect()) {
        let command = Command::new(raw.as_str(), shell);
        let first = shared().check(&command);
        let second = shared().check(&command);
        prop_assert!(first.same_verdict(&second));
    }

    #[test]
    fn spans_point_at_the_matched_text(raw in shellish()) {
        let result = shared().check(&Command::new(raw.as_str(), ShellDialect::Bash));
        for m in &result.matched {
            prop_assert!(m.span.slice(&raw).is_some());
        }
    }

    #[test]
    fn fallback_is_never_less_strict_than_scoped(raw in shellish()) {
        let command = Command::new(raw.as_str(), ShellDialect::Bash);
        let fallback = unscoped().check(&command);
        let scoped = misrouted().check(&command);
        prop_assert!(fallback.risk_level >= scoped.risk_level);
        prop_assert!(fallback.blocked || !scoped.blocked);
    }

    #[test]
    fn structural_analysis_only_adds(raw in shellish()) {
        let command = Command::new(raw.as_str(), ShellDialect::Bash);
        let text_only = PolicyConfig {
            enable_structural_analysis: false,
            ..uncached_policy()
        };
        let with = shared().validate(&command, &uncached_policy());
        let without = shared().validate(&command, &text_only);
        prop_assert!(with.risk_level >= without.risk_level);
        for m in &without.matched {
            prop_assert!(with.has_match(&m.pattern_id), "{} lost", m.pattern_id);
        }
    }

    #[test]
    fn critical_commands_stay_critical_after_harmless_prefixes(prefix in harmless()) {
        let raw = format!("{prefix}; rm -rf /");
        let result = shared().check(&Command::new(raw.as_str(), ShellDialect::Bash));
        prop_assert_eq!(result.risk_level, RiskLevel::Critical);
        prop_assert!(result.blocked);
    }

    #[test]
    fn quoted_arguments_to_echo_are_data(body in shellish()) {
        let body = body.replace('\'', "");
        let raw = format!("echo '{body}'");
        let result = shared().check(&Command::new(raw.as_str(), ShellDialect::Bash));
        prop_assert!(result.risk_level < RiskLevel::Critical, "{:?}", result.matched);
    }

    #[test]
    fn blocked_implies_not_confirm(raw in shellish()) {
        let result = shared().check(&Command::new(raw.as_str(), ShellDialect::Bash));
        prop_assert!(!(result.blocked && result.requires_confirmation));
    }
}
