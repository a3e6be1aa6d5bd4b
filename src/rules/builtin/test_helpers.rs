//! Assertion helpers for catalogue tests.
//!
//! Rules are matched against the match view exactly as the engine sees it,
//! so quoting, wrapper and data-argument handling apply. Filters are not
//! consulted here.

use crate::error::SourceLocation;
use crate::model::ShellDialect;
use crate::normalize::MatchView;
use crate::rules::{Pattern, RuleDefinition};

fn compiled(rules: &[RuleDefinition]) -> Vec<Pattern> {
    rules
        .iter()
        .map(|def| {
            Pattern::compile(def, SourceLocation::builtin())
                .unwrap_or_else(|e| panic!("rule {} failed to compile: {e}", def.id))
        })
        .collect()
}

fn firing(rules: &[RuleDefinition], command: &str, shell: ShellDialect) -> Vec<String> {
    let view = MatchView::build(command, shell);
    compiled(rules)
        .into_iter()
        .filter(|p| p.shells.contains(shell))
        .filter(|p| p.regex().is_some_and(|re| re.is_match(view.text())))
        .map(|p| p.id)
        .collect()
}

/// Assert that rule `id` fires on a bash `command`.
#[track_caller]
pub fn assert_fires(rules: &[RuleDefinition], id: &str, command: &str) {
    assert_fires_in(rules, id, command, ShellDialect::Bash);
}

#[track_caller]
pub fn assert_fires_in(rules: &[RuleDefinition], id: &str, command: &str, shell: ShellDialect) {
    let fired = firing(rules, command, shell);
    assert!(
        fired.iter().any(|f| f == id),
        "expected `{id}` to fire on {command:?} ({shell}); fired: {fired:?}\nview: {:?}",
        MatchView::build(command, shell).text()
    );
}

/// Assert that no text rule in `rules` fires on a bash `command`.
#[track_caller]
pub fn assert_quiet(rules: &[RuleDefinition], command: &str) {
    assert_quiet_in(rules, command, ShellDialect::Bash);
}

#[track_caller]
pub fn assert_quiet_in(rules: &[RuleDefinition], command: &str, shell: ShellDialect) {
    let fired = firing(rules, command, shell);
    assert!(
        fired.is_empty(),
        "expected no rule to fire on {command:?} ({shell}); fired: {fired:?}"
    );
}

/// Assert that rule `id` does not fire on a bash `command`. Other rules may.
#[track_caller]
pub fn assert_not_fires(rules: &[RuleDefinition], id: &str, command: &str) {
    let fired = firing(rules, command, ShellDialect::Bash);
    assert!(
        !fired.iter().any(|f| f == id),
        "expected `{id}` not to fire on {command:?}"
    );
}
