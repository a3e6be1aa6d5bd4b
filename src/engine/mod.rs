//! Layered rule evaluation.
//!
//! ```text
//!   global-critical ──match──▶ stop
//!        │
//!   domain rules (scoped: primary, secondaries, generic | unscoped: all)
//!        │            stops after the first domain reaching Critical
//!        │
//!   structural (AST predicates + variable-resolved replay)
//!        only when enabled, parsed, and nothing Critical so far
//! ```
//!
//! Every layer only adds matches; none can lower what an earlier layer
//! found.

pub mod resolve;
pub mod structural;

use std::collections::HashSet;
use std::ops::Range;

use tracing::trace;

use crate::model::{Domain, MatchLayer, RiskLevel, RoutingResult, RuleMatch, ShellDialect, Span};
use crate::normalize::MatchView;
use crate::parser::ParsedCommand;
use crate::router::Routed;
use crate::rules::ruleset::{KeywordHits, RuleEntry};
use crate::rules::{Matcher, Pattern, RuleSet, StructuralPredicate};

use resolve::ReplayedCommand;

/// Which domain rule sets a validation consults.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Routing was confident: primary at full weight, secondaries reduced.
    Scoped {
        primary: Domain,
        secondary: Vec<Domain>,
    },
    /// Routing was unsure or unavailable: every domain at full weight.
    Unscoped,
}

impl Scope {
    #[must_use]
    pub fn from_routed(routed: &Routed, threshold: f32) -> Self {
        if routed.is_unscoped(threshold) {
            Self::Unscoped
        } else {
            Self::from_routing(&routed.routing)
        }
    }

    #[must_use]
    pub fn from_routing(routing: &RoutingResult) -> Self {
        Self::Scoped {
            primary: routing.primary.clone(),
            secondary: routing.secondary.clone(),
        }
    }

    #[must_use]
    pub const fn is_unscoped(&self) -> bool {
        matches!(self, Self::Unscoped)
    }
}

/// Evaluation knobs taken from the policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub structural: bool,
    pub secondary_weight: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            structural: true,
            secondary_weight: crate::config::DEFAULT_SECONDARY_WEIGHT,
        }
    }
}

/// What the engine found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutcome {
    pub matches: Vec<RuleMatch>,
    pub domains_checked: Vec<Domain>,
    /// Layers that ran, in order.
    pub layers: Vec<MatchLayer>,
}

impl EngineOutcome {
    #[must_use]
    pub fn max_severity(&self) -> RiskLevel {
        max_severity(&self.matches)
    }
}

/// The command being evaluated.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub view: &'a MatchView,
    pub parsed: Option<&'a ParsedCommand>,
    pub shell: ShellDialect,
}

/// A match at this level settles the verdict; later layers cannot raise it.
const DECISIVE: RiskLevel = RiskLevel::Critical;

fn max_severity(matches: &[RuleMatch]) -> RiskLevel {
    matches
        .iter()
        .map(|m| m.severity)
        .max()
        .unwrap_or(RiskLevel::Safe)
}

/// Run the rule layers over `subject`.
#[must_use]
pub fn evaluate(
    ruleset: &RuleSet,
    subject: Subject<'_>,
    scope: &Scope,
    settings: EngineSettings,
) -> EngineOutcome {
    let mut outcome = EngineOutcome::default();
    let hits = ruleset.keyword_hits(subject.view.text());

    // Layer 1
    outcome.layers.push(MatchLayer::GlobalCritical);
    outcome.matches = match_critical(ruleset, subject.view, &hits, subject.shell);
    if !outcome.matches.is_empty() {
        return outcome;
    }

    // Layer 2
    outcome.layers.push(MatchLayer::Domain);
    for (domain, weight) in domain_plan(ruleset, scope, settings) {
        if domain == Domain::Generic {
            continue;
        }
        check_domain(ruleset, &subject, &hits, &domain, weight, &mut outcome);
        if outcome.max_severity() >= DECISIVE {
            break;
        }
    }
    check_domain(ruleset, &subject, &hits, &Domain::Generic, 1.0, &mut outcome);

    // Layer 3
    if let Some(parsed) = subject.parsed {
        if settings.structural && outcome.max_severity() < DECISIVE {
            outcome.layers.push(MatchLayer::Structural);
            let found = match_structural(ruleset, &subject, parsed);
            let seen: HashSet<String> =
                outcome.matches.iter().map(|m| m.pattern_id.clone()).collect();
            outcome
                .matches
                .extend(found.into_iter().filter(|m| !seen.contains(&m.pattern_id)));
        }
    }

    trace!(
        matches = outcome.matches.len(),
        domains = outcome.domains_checked.len(),
        "rule layers evaluated"
    );
    outcome
}

/// Domains to check, in order, with the weight their matches carry.
fn domain_plan(ruleset: &RuleSet, scope: &Scope, settings: EngineSettings) -> Vec<(Domain, f32)> {
    match scope {
        Scope::Unscoped => ruleset.domains().map(|d| (d.clone(), 1.0)).collect(),
        Scope::Scoped { primary, secondary } => {
            let mut plan = vec![(primary.clone(), 1.0)];
            for domain in secondary {
                if !plan.iter().any(|(d, _)| d == domain) {
                    plan.push((domain.clone(), settings.secondary_weight));
                }
            }
            plan
        }
    }
}

fn check_domain(
    ruleset: &RuleSet,
    subject: &Subject<'_>,
    hits: &KeywordHits,
    domain: &Domain,
    weight: f32,
    outcome: &mut EngineOutcome,
) {
    if outcome.domains_checked.contains(domain) {
        return;
    }
    outcome.domains_checked.push(domain.clone());
    for entry in ruleset.domain(domain) {
        if let Some(found) = match_entry(entry, subject.view, hits, subject.shell) {
            outcome.matches.push(found.into_match(
                &entry.pattern,
                MatchLayer::Domain,
                Some(domain.clone()),
                weight,
            ));
        }
    }
}

/// Global-critical matches over a view. Shared with the early gate.
#[must_use]
pub fn match_critical(
    ruleset: &RuleSet,
    view: &MatchView,
    hits: &KeywordHits,
    shell: ShellDialect,
) -> Vec<RuleMatch> {
    ruleset
        .global_critical()
        .iter()
        .filter_map(|entry| {
            match_entry(entry, view, hits, shell).map(|found| {
                found.into_match(&entry.pattern, MatchLayer::GlobalCritical, None, 1.0)
            })
        })
        .collect()
}

// ============================================================================
// Text matching
// ============================================================================

/// A text match location before it is attributed to a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextHit {
    pub span: Span,
    pub matched_text: String,
}

impl TextHit {
    fn into_match(
        self,
        pattern: &Pattern,
        layer: MatchLayer,
        domain: Option<Domain>,
        weight: f32,
    ) -> RuleMatch {
        RuleMatch {
            pattern_id: pattern.id.clone(),
            span: self.span,
            matched_text: self.matched_text,
            message: pattern.message.clone(),
            severity: pattern.severity,
            category: pattern.category,
            layer,
            domain,
            weight,
            suggestion: pattern.advice(),
        }
    }
}

/// First occurrence of a text entry in `view` that no filter suppresses.
#[must_use]
pub fn match_entry(
    entry: &RuleEntry,
    view: &MatchView,
    hits: &KeywordHits,
    shell: ShellDialect,
) -> Option<TextHit> {
    if !entry.applies_to(shell) || !entry.might_match(hits) {
        return None;
    }
    let range = first_surviving(&entry.pattern, view)?;
    let span = view.raw_span(range);
    let matched_text = span.slice(view.raw()).unwrap_or_default().to_string();
    Some(TextHit { span, matched_text })
}

fn first_surviving(pattern: &Pattern, view: &MatchView) -> Option<Range<usize>> {
    let regex = pattern.regex()?;
    regex
        .find_all(view.text())
        .into_iter()
        .map(|(start, end)| start..end)
        .find(|range| {
            if pattern.filters.is_empty() {
                return true;
            }
            let Some(segment) = view.segment_at(range.start) else {
                return true;
            };
            let args: Vec<&str> = view.args(segment).collect();
            let text = view.segment_text(segment);
            !pattern.filters.iter().any(|f| f.suppresses(&args, text))
        })
}

// ============================================================================
// Structural layer
// ============================================================================

fn match_structural(
    ruleset: &RuleSet,
    subject: &Subject<'_>,
    parsed: &ParsedCommand,
) -> Vec<RuleMatch> {
    let replays = resolve::replay(&parsed.root, subject.shell);
    let mut out: Vec<RuleMatch> = Vec::new();
    let mut replayed = false;

    for entry in ruleset.structural() {
        let pattern = &entry.pattern;
        if !entry.applies_to(subject.shell) {
            continue;
        }
        let Matcher::Structural(predicate) = &pattern.matcher else {
            continue;
        };
        if matches!(predicate, StructuralPredicate::ExpandedTarget { .. }) && !replayed {
            replayed = true;
            for found in match_replays(ruleset, &replays, subject) {
                if !out.iter().any(|m| m.pattern_id == found.pattern_id) {
                    out.push(found);
                }
            }
        }
        let hit = structural::find(predicate, &parsed.root, &replays, subject.shell)
            .into_iter()
            .find(|hit| {
                let args: Vec<&str> = hit.args.iter().map(String::as_str).collect();
                !pattern.filters.iter().any(|f| f.suppresses(&args, &hit.text))
            });
        if let Some(hit) = hit {
            let matched_text = hit.span.slice(subject.view.raw()).unwrap_or_default().to_string();
            out.push(
                TextHit {
                    span: hit.span,
                    matched_text,
                }
                .into_match(pattern, MatchLayer::Structural, None, 1.0),
            );
        }
    }
    out
}

/// Text rules re-run on each command after variable substitution.
fn match_replays(
    ruleset: &RuleSet,
    replays: &[ReplayedCommand<'_>],
    subject: &Subject<'_>,
) -> Vec<RuleMatch> {
    let mut out: Vec<RuleMatch> = Vec::new();
    for replay in replays.iter().filter(|r| r.resolved_any()) {
        let text = replay.replay_text(subject.shell);
        let view = MatchView::build(&text, subject.shell);
        let hits = ruleset.keyword_hits(view.text());
        for entry in ruleset.text_entries() {
            if out.iter().any(|m| m.pattern_id == entry.pattern.id) {
                continue;
            }
            if match_entry(entry, &view, &hits, subject.shell).is_none() {
                continue;
            }
            let span = replay.command.span;
            let mut found = TextHit {
                span,
                matched_text: span.slice(subject.view.raw()).unwrap_or_default().to_string(),
            }
            .into_match(&entry.pattern, MatchLayer::Structural, None, 1.0);
            found.message = format!("{} (expands to `{text}`)", found.message);
            out.push(found);
        }
    }
    out
}
