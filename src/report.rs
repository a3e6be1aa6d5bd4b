//! Verdict rendering: JSON, annotated terminal text and one-line summaries.

use std::fmt::Write;

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};

use crate::model::{ParseStatus, RiskLevel, RuleMatch, ValidationResult};

/// Terminal colour policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

/// Apply a colour policy process-wide. `Auto` keeps the terminal detection
/// already in effect.
pub fn set_color(choice: ColorChoice) {
    match choice {
        ColorChoice::Auto => {}
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Never => colored::control::set_override(false),
    }
}

/// Serialise the verdict.
///
/// # Errors
/// Propagates `serde_json` failures.
pub fn render_json(result: &ValidationResult, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(result)
    } else {
        serde_json::to_string(result)
    }
}

fn paint_level(level: RiskLevel) -> ColoredString {
    let label = level.as_str().to_ascii_uppercase();
    match level {
        RiskLevel::Safe => label.green(),
        RiskLevel::Low => label.cyan(),
        RiskLevel::Moderate => label.yellow(),
        RiskLevel::High => label.red(),
        RiskLevel::Critical => label.red().bold(),
    }
}

fn verdict_label(result: &ValidationResult) -> ColoredString {
    if result.blocked {
        "BLOCKED".red().bold()
    } else if result.requires_confirmation {
        "CONFIRM".yellow().bold()
    } else {
        "ALLOWED".green().bold()
    }
}

/// Multi-line report with each match highlighted under the command.
#[must_use]
pub fn render_pretty(result: &ValidationResult, command: &str) -> String {
    let mut out = String::with_capacity(512);
    let _ = writeln!(
        out,
        "{} {} (score {:.1})",
        verdict_label(result),
        paint_level(result.risk_level),
        result.score
    );

    if result.matched.is_empty() {
        let _ = writeln!(out, "  {}", "no dangerous patterns found".dimmed());
    }

    for m in &result.matched {
        out.push('\n');
        let _ = writeln!(
            out,
            "{} [{}] {}",
            paint_level(m.severity),
            m.pattern_id.bold(),
            m.message
        );
        for line in highlight(command, m) {
            let _ = writeln!(out, "  {line}");
        }
    }

    if !result.suggestions.is_empty() {
        let _ = writeln!(out, "\n{}", "Suggestions:".bold());
        for suggestion in &result.suggestions {
            let _ = writeln!(out, "  - {suggestion}");
        }
    }

    if let Some(impact) = result.diagnostics.impact.as_ref().filter(|i| !i.factors.is_empty()) {
        let factors: Vec<&str> = impact.factors.iter().map(|f| f.name.as_str()).collect();
        let _ = writeln!(
            out,
            "\n{} {}, data loss {:.0}%, {} ({})",
            "impact:".bold(),
            impact.blast_radius,
            impact.data_loss_risk * 100.0,
            if impact.reversible { "reversible" } else { "irreversible" },
            factors.join(", ")
        );
    }

    for reason in &result.diagnostics.confirmation_reasons {
        let _ = writeln!(out, "{} {reason}", "confirm:".yellow());
    }
    if result.diagnostics.degraded {
        let reasons = result.diagnostics.degraded_reasons.join("; ");
        let _ = writeln!(
            out,
            "\n{} domain routing fell back to heuristics ({reasons}); all domains were checked",
            "degraded:".yellow().bold()
        );
    }
    if let ParseStatus::Incomplete { reason, offset } = &result.diagnostics.parse {
        let _ = writeln!(
            out,
            "{} parse stopped at byte {offset}: {reason}",
            "note:".dimmed()
        );
    }
    out
}

/// The source line holding the match and a `^~~~` marker under its span.
fn highlight(command: &str, m: &RuleMatch) -> Vec<String> {
    let start = m.span.start.min(command.len());
    let end = m.span.end.clamp(start, command.len());
    let (Some(_), Some(_)) = (command.get(start..), command.get(..end)) else {
        return vec![m.matched_text.clone()];
    };

    let line_start = command[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = command[start..]
        .find('\n')
        .map_or(command.len(), |i| start + i);
    let line = &command[line_start..line_end];

    let column = command[line_start..start].chars().count();
    let width = command[start..end.min(line_end)].chars().count().max(1);
    let marker = format!("^{}", "~".repeat(width - 1));

    vec![
        line.to_string(),
        format!("{}{}", " ".repeat(column), marker.red().bold()),
    ]
}

/// `BLOCKED critical rm-rf-root,pipe-to-shell`.
#[must_use]
pub fn render_compact(result: &ValidationResult) -> String {
    let verdict = if result.blocked {
        "BLOCKED"
    } else if result.requires_confirmation {
        "CONFIRM"
    } else {
        "ALLOWED"
    };
    let ids: Vec<&str> = result.matched.iter().map(|m| m.pattern_id.as_str()).collect();
    let mut line = format!("{verdict} {}", result.risk_level);
    if !ids.is_empty() {
        line.push(' ');
        line.push_str(&ids.join(","));
    }
    if result.diagnostics.degraded {
        line.push_str(" (degraded)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Diagnostics, MatchLayer, Span, VerdictSource};

    fn verdict(command: &str, span: Span, id: &str, blocked: bool) -> ValidationResult {
        ValidationResult {
            risk_level: RiskLevel::Critical,
            matched: vec![RuleMatch {
                pattern_id: id.to_string(),
                span,
                matched_text: span.slice(command).unwrap_or_default().to_string(),
                message: "Recursive deletion of the root".to_string(),
                severity: RiskLevel::Critical,
                category: Category::FileDestruction,
                layer: MatchLayer::GlobalCritical,
                domain: None,
                weight: 1.0,
                suggestion: None,
            }],
            blocked,
            requires_confirmation: false,
            suggestion: Some("use a trash command".to_string()),
            suggestions: vec!["use a trash command".to_string()],
            score: 10.0,
            source: VerdictSource::EarlyExit,
            diagnostics: Diagnostics::default(),
        }
    }

    #[test]
    fn pretty_output_marks_the_span() {
        colored::control::set_override(false);
        let command = "cd /tmp && rm -rf /";
        let result = verdict(command, Span::new(11, 19), "rm-rf-root", true);
        let text = render_pretty(&result, command);
        assert!(text.starts_with("BLOCKED CRITICAL"), "{text}");
        assert!(text.contains("[rm-rf-root] Recursive deletion of the root"));
        assert!(text.contains(&format!("  {command}\n  {}^~~~~~~\n", " ".repeat(11))));
        assert!(text.contains("  - use a trash command"));
    }

    #[test]
    fn highlight_uses_the_line_holding_the_span() {
        colored::control::set_override(false);
        let command = "echo start\nrm -rf /\necho end";
        let result = verdict(command, Span::new(11, 19), "rm-rf-root", true);
        let lines = highlight(command, &result.matched[0]);
        assert_eq!(lines, vec!["rm -rf /".to_string(), "^~~~~~~".to_string()]);
    }

    #[test]
    fn degraded_notice_is_rendered() {
        colored::control::set_override(false);
        let mut result = verdict("ls", Span::new(0, 2), "x", false);
        result.diagnostics.degraded = true;
        result.diagnostics.degraded_reasons = vec!["classifier timed out after 50ms".to_string()];
        let text = render_pretty(&result, "ls");
        assert!(text.contains("degraded: domain routing fell back to heuristics"));
        assert!(render_compact(&result).ends_with("(degraded)"));
    }

    #[test]
    fn impact_line_lists_the_factors() {
        colored::control::set_override(false);
        let command = "rm -rf /";
        let mut result = verdict(command, Span::new(0, 8), "rm-rf-root", true);
        let view = crate::normalize::MatchView::build(command, crate::model::ShellDialect::Bash);
        result.diagnostics.impact =
            Some(crate::impact::RuleBasedPredictor::new().estimate(&view, &result.matched));
        let text = render_pretty(&result, command);
        assert!(text.contains("impact: system (system-wide), data loss 90%, irreversible"), "{text}");
        assert!(text.contains("Root filesystem operation"));

        let plain = verdict("ls", Span::new(0, 2), "x", false);
        assert!(!render_pretty(&plain, "ls").contains("impact:"));
    }

    #[test]
    fn compact_and_json_forms() {
        let result = verdict("rm -rf /", Span::new(0, 8), "rm-rf-root", true);
        assert_eq!(render_compact(&result), "BLOCKED critical rm-rf-root");

        let json = render_json(&result, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["risk_level"], "critical");
        assert_eq!(value["matched"][0]["span"]["start"], 0);
        assert!(render_json(&result, true).unwrap().contains('\n'));
    }
}
