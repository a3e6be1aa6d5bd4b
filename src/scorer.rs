//! Risk scoring: matches in, verdict out.

use std::cmp::Reverse;

use crate::config::PolicyConfig;
use crate::model::{Diagnostics, RiskLevel, RuleMatch, ValidationResult, VerdictSource};

/// Score cap.
pub const MAX_SCORE: f32 = 10.0;

/// Everything the scorer needs besides the policy.
#[derive(Debug, Clone, Default)]
pub struct ScoreInput {
    pub matches: Vec<RuleMatch>,
    /// The early gate blocked; the verdict is blocked whatever the policy.
    pub gate_blocked: bool,
    /// Reasons the gate asked for confirmation.
    pub confirmations: Vec<String>,
    pub diagnostics: Diagnostics,
}

/// Aggregate matches into a [`ValidationResult`].
#[must_use]
pub fn score(input: ScoreInput, policy: &PolicyConfig, source: VerdictSource) -> ValidationResult {
    let ScoreInput {
        mut matches,
        gate_blocked,
        confirmations,
        mut diagnostics,
    } = input;

    matches.sort_by_key(|m| (Reverse(m.severity), m.span.start, m.span.end));

    let risk_level = matches
        .iter()
        .map(|m| m.severity)
        .max()
        .unwrap_or(RiskLevel::Safe);

    let blocked = gate_blocked || (risk_level > RiskLevel::Safe && risk_level >= policy.block_at());
    let requires_confirmation = !blocked
        && (!confirmations.is_empty()
            || (risk_level > RiskLevel::Safe && risk_level >= policy.strictness.confirm_at()));

    let total: f32 = matches
        .iter()
        .map(|m| m.severity.weight() * m.weight.clamp(0.0, 1.0))
        .sum();

    let suggestions = suggestions(&matches);
    diagnostics.confirmation_reasons = confirmations;

    ValidationResult {
        risk_level,
        blocked,
        requires_confirmation,
        suggestion: suggestions.first().cloned(),
        suggestions,
        score: total.min(MAX_SCORE),
        source,
        matched: matches,
        diagnostics,
    }
}

/// Distinct suggestions, highest severity first. Expects sorted matches.
fn suggestions(matches: &[RuleMatch]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for suggestion in matches.iter().filter_map(|m| m.suggestion.as_ref()) {
        if !out.contains(suggestion) {
            out.push(suggestion.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Strictness;
    use crate::model::{Category, MatchLayer, Span};

    fn rule_match(id: &str, severity: RiskLevel, weight: f32, suggestion: Option<&str>) -> RuleMatch {
        RuleMatch {
            pattern_id: id.to_string(),
            span: Span::new(0, 2),
            matched_text: "rm".to_string(),
            message: format!("{id} fired"),
            severity,
            category: Category::FileDestruction,
            layer: MatchLayer::Domain,
            domain: None,
            weight,
            suggestion: suggestion.map(str::to_string),
        }
    }

    fn scored(matches: Vec<RuleMatch>, strictness: Strictness) -> ValidationResult {
        let policy = PolicyConfig {
            strictness,
            ..PolicyConfig::default()
        };
        let input = ScoreInput {
            matches,
            ..ScoreInput::default()
        };
        score(input, &policy, VerdictSource::RuleEngine)
    }

    #[test]
    fn no_matches_is_safe() {
        let result = scored(Vec::new(), Strictness::Strict);
        assert!(result.is_safe());
        assert!(!result.requires_confirmation);
        assert!(result.score.abs() < f32::EPSILON);
        assert_eq!(result.suggestion, None);
    }

    #[test]
    fn thresholds_follow_strictness() {
        let high = || vec![rule_match("a", RiskLevel::High, 1.0, None)];

        let strict = scored(high(), Strictness::Strict);
        assert!(strict.blocked);
        assert!(!strict.requires_confirmation);

        let moderate = scored(high(), Strictness::Moderate);
        assert!(!moderate.blocked);
        assert!(moderate.requires_confirmation);

        let permissive = scored(high(), Strictness::Permissive);
        assert!(!permissive.blocked);
        assert!(!permissive.requires_confirmation);
    }

    #[test]
    fn block_threshold_overrides_strictness() {
        let policy = PolicyConfig {
            block_threshold: Some(RiskLevel::Moderate),
            ..PolicyConfig::default()
        };
        let input = ScoreInput {
            matches: vec![rule_match("a", RiskLevel::Moderate, 1.0, None)],
            ..ScoreInput::default()
        };
        assert!(score(input, &policy, VerdictSource::RuleEngine).blocked);
    }

    #[test]
    fn gate_decisions_override_policy() {
        let policy = PolicyConfig {
            strictness: Strictness::Permissive,
            block_threshold: Some(RiskLevel::Critical),
            ..PolicyConfig::default()
        };
        let input = ScoreInput {
            gate_blocked: true,
            ..ScoreInput::default()
        };
        assert!(score(input, &policy, VerdictSource::EarlyExit).blocked);

        let input = ScoreInput {
            confirmations: vec!["`reboot` restarts the machine".to_string()],
            ..ScoreInput::default()
        };
        let result = score(input, &policy, VerdictSource::RuleEngine);
        assert!(result.requires_confirmation);
        assert_eq!(result.diagnostics.confirmation_reasons.len(), 1);
    }

    #[test]
    fn score_is_weighted_and_capped() {
        let result = scored(
            vec![
                rule_match("a", RiskLevel::Moderate, 1.0, None),
                rule_match("b", RiskLevel::Low, 0.5, None),
            ],
            Strictness::Moderate,
        );
        assert!((result.score - 3.5).abs() < 1e-6);

        let result = scored(
            vec![
                rule_match("a", RiskLevel::Critical, 1.0, None),
                rule_match("b", RiskLevel::High, 1.0, None),
            ],
            Strictness::Moderate,
        );
        assert!((result.score - MAX_SCORE).abs() < f32::EPSILON);
    }

    #[test]
    fn suggestions_are_distinct_and_ordered_by_severity() {
        let result = scored(
            vec![
                rule_match("low", RiskLevel::Low, 1.0, Some("use trash")),
                rule_match("high", RiskLevel::High, 1.0, Some("check the target")),
                rule_match("also-low", RiskLevel::Low, 1.0, Some("use trash")),
            ],
            Strictness::Moderate,
        );
        assert_eq!(result.suggestions, vec!["check the target", "use trash"]);
        assert_eq!(result.suggestion.as_deref(), Some("check the target"));
        assert_eq!(result.matched[0].pattern_id, "high");
    }
}
