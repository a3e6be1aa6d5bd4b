//! Early safety gate.
//!
//! A cheap first pass over the match view: the global-critical patterns and
//! a short list of intents (power off, format, wipe) that always deserve a
//! second look. Needs no domain information, so it runs alongside routing.

use crate::engine::match_critical;
use crate::model::{RuleMatch, ShellDialect};
use crate::normalize::MatchView;
use crate::rules::RuleSet;

/// Commands whose mere use warrants confirmation.
const INTENT_KEYWORDS: &[(&str, &str)] = &[
    ("shutdown", "powers off or restarts the machine"),
    ("reboot", "restarts the machine"),
    ("halt", "stops the machine"),
    ("poweroff", "powers off the machine"),
    ("shred", "irrecoverably overwrites files"),
    ("wipefs", "erases filesystem signatures"),
    ("format-volume", "formats a volume"),
    ("clear-disk", "erases a disk"),
    ("diskpart", "edits disk partitions"),
];

/// Outcome of the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// A global-critical pattern matched. Terminal.
    Block {
        matches: Vec<RuleMatch>,
        reason: String,
    },
    /// Evaluation continues, but the verdict must ask before running.
    RequireConfirmation { reasons: Vec<String> },
    Continue,
}

impl GateDecision {
    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self, Self::Block { .. })
    }

    /// Confirmation reasons carried into the final verdict.
    #[must_use]
    pub fn confirmation_reasons(&self) -> &[String] {
        match self {
            Self::RequireConfirmation { reasons } => reasons,
            _ => &[],
        }
    }
}

/// Run the gate over a prepared view.
#[must_use]
pub fn check(ruleset: &RuleSet, view: &MatchView, shell: ShellDialect) -> GateDecision {
    let hits = ruleset.keyword_hits(view.text());
    let matches = match_critical(ruleset, view, &hits, shell);
    if let Some(first) = matches.first() {
        let reason = format!("{}: {}", first.pattern_id, first.message);
        return GateDecision::Block { matches, reason };
    }

    let reasons = intent_reasons(view);
    if reasons.is_empty() {
        GateDecision::Continue
    } else {
        GateDecision::RequireConfirmation { reasons }
    }
}

fn intent_reasons(view: &MatchView) -> Vec<String> {
    let mut reasons: Vec<String> = Vec::new();
    for segment in view.segments() {
        let command = segment.command.to_ascii_lowercase();
        let reason = if command == "init" {
            view.args(segment)
                .next()
                .filter(|arg| *arg == "0")
                .map(|_| "`init 0` halts the machine".to_string())
        } else if command.starts_with("mkfs") {
            Some(format!("`{command}` creates a filesystem, erasing the target"))
        } else {
            INTENT_KEYWORDS
                .iter()
                .find(|(keyword, _)| *keyword == command)
                .map(|(keyword, what)| format!("`{keyword}` {what}"))
        };
        if let Some(reason) = reason {
            if !reasons.contains(&reason) {
                reasons.push(reason);
            }
        }
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::PatternStore;

    fn gate(command: &str, shell: ShellDialect) -> GateDecision {
        let ruleset = PatternStore::builtin_only().load().unwrap().ruleset;
        check(&ruleset, &MatchView::build(command, shell), shell)
    }

    #[test]
    fn critical_patterns_block() {
        let decision = gate(":(){ :|:& };:", ShellDialect::Bash);
        let GateDecision::Block { matches, reason } = decision else {
            panic!("expected block, got {decision:?}");
        };
        assert_eq!(matches[0].pattern_id, "fork-bomb");
        assert!(reason.starts_with("fork-bomb: "));
        assert!(gate("Format-Volume -DriveLetter D", ShellDialect::PowerShell).is_block());
    }

    #[test]
    fn intents_require_confirmation() {
        let decision = gate("sudo shutdown -h now", ShellDialect::Bash);
        assert_eq!(
            decision.confirmation_reasons(),
            ["`shutdown` powers off or restarts the machine".to_string()]
        );
        assert!(!gate("init 0", ShellDialect::Bash).confirmation_reasons().is_empty());
        assert!(gate("init 5", ShellDialect::Bash).confirmation_reasons().is_empty());
        assert!(
            !gate("diskpart /s script.txt", ShellDialect::Cmd)
                .confirmation_reasons()
                .is_empty()
        );
    }

    #[test]
    fn intents_inside_data_are_ignored() {
        assert_eq!(gate("echo shutdown", ShellDialect::Bash), GateDecision::Continue);
        assert_eq!(gate("ls -la", ShellDialect::Bash), GateDecision::Continue);
    }
}
