//! Rule model: patterns, matchers, filters and the built-in catalogue.
//!
//! A rule starts life as a [`RuleDefinition`] (from a built-in macro record or
//! a TOML `[[rule]]` entry) and is compiled into an immutable [`Pattern`].
//! Patterns are grouped into a [`RuleSet`] by the [`PatternStore`].
//!
//! # Layers
//!
//! | Layer | Matcher | Scope |
//! |-------|---------|-------|
//! | `critical` | text | every command, before routing matters |
//! | `domain` | text | the command's routed domains plus `generic` |
//! | `structural` | AST predicate | every parsed command |

pub mod builtin;
pub mod definition;
pub mod regex_engine;
pub mod remote;
pub mod ruleset;
pub mod store;

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PatternLoadError, SourceLocation};
use crate::model::{Category, Domain, RiskLevel, ShellSet};

pub use definition::{FilterDefinition, PathList, RuleDefinition, parse_rule_file};
pub use regex_engine::{CompiledRegex, RegexError, needs_backtracking_engine};
pub use ruleset::{RuleSet, RuleSetHandle};
pub use store::{LoadReport, PatternStore, RuleSource};

// ============================================================================
// Sources and layers
// ============================================================================

/// Where a pattern was defined. Later sources may override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Builtin,
    Local,
    Vendor,
    Remote,
}

impl SourceKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Local => "local",
            Self::Vendor => "vendor",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Evaluation layer a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleLayer {
    /// Global-critical: evaluated for every command regardless of routing.
    Critical,
    /// Scoped to one domain.
    #[default]
    Domain,
    /// Runs against the parsed AST.
    Structural,
}

impl RuleLayer {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Domain => "domain",
            Self::Structural => "structural",
        }
    }
}

// ============================================================================
// Structural predicates
// ============================================================================

/// AST-level check for a structural pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralPredicate {
    /// An earlier pipeline stage running one of `sources` feeds a later stage
    /// running one of `sinks`. An empty source list matches any command; an
    /// empty sink list matches any stage that reads its program from stdin.
    PipelineSink {
        #[serde(default)]
        sources: Vec<String>,
        #[serde(default)]
        sinks: Vec<String>,
    },
    /// Output of a download command runs as a program: piped into an
    /// interpreter, passed as `<(...)` script, `-c` code or `eval` operand.
    FetchExecuted,
    /// Variable-resolved replay of each simple command against the text
    /// rules, plus unresolved expansions used as path targets of `verbs`.
    ExpandedTarget {
        #[serde(default)]
        verbs: Vec<String>,
    },
    /// A command or process substitution whose body runs one of `verbs`.
    SubstitutedCommand { verbs: Vec<String> },
    /// Output redirection whose target starts with one of `paths`.
    RedirectTarget { paths: Vec<String> },
    /// A function whose body calls itself in a pipeline or in the background.
    RecursiveFunction,
    /// `eval` or `source` of an expansion that cannot be resolved.
    EvalOfExpansion,
}

impl StructuralPredicate {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PipelineSink { .. } => "pipeline_sink",
            Self::FetchExecuted => "fetch_executed",
            Self::ExpandedTarget { .. } => "expanded_target",
            Self::SubstitutedCommand { .. } => "substituted_command",
            Self::RedirectTarget { .. } => "redirect_target",
            Self::RecursiveFunction => "recursive_function",
            Self::EvalOfExpansion => "eval_of_expansion",
        }
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// How a pattern recognises a dangerous command.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Regex over the match view.
    Text(CompiledRegex),
    /// Predicate over the parsed AST.
    Structural(StructuralPredicate),
}

impl Matcher {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Text(re) => re.as_str().to_string(),
            Self::Structural(predicate) => format!("structural:{}", predicate.kind()),
        }
    }
}

/// A compiled suppression filter. If any filter holds, the match is dropped.
#[derive(Debug, Clone)]
pub enum Filter {
    /// The matched command carries this flag.
    UnlessFlag(String),
    /// Every path argument lies strictly beneath one of these directories.
    UnlessPathUnder(Vec<PathBuf>),
    /// The matched command text matches this regex.
    UnlessMatches(CompiledRegex),
}

impl Filter {
    /// True if this filter suppresses a match on a command with `args`
    /// (arguments only, no command word) and full text `segment`.
    #[must_use]
    pub fn suppresses(&self, args: &[&str], segment: &str) -> bool {
        match self {
            Self::UnlessFlag(flag) => args.iter().any(|a| flag_present(a, flag)),
            Self::UnlessPathUnder(prefixes) => {
                let paths: Vec<&str> = args
                    .iter()
                    .copied()
                    .filter(|a| !a.starts_with('-') || *a == "-")
                    .collect();
                !paths.is_empty()
                    && paths
                        .iter()
                        .all(|p| prefixes.iter().any(|prefix| is_strictly_under(p, prefix)))
            }
            Self::UnlessMatches(re) => re.is_match(segment),
        }
    }
}

/// `--force` matches `--force` and `--force=x`; `-f` also matches bundled
/// short flags such as `-rf`.
fn flag_present(arg: &str, flag: &str) -> bool {
    if arg == flag {
        return true;
    }
    if flag.starts_with("--") {
        return arg
            .strip_prefix(flag)
            .is_some_and(|rest| rest.starts_with('='));
    }
    match (flag.strip_prefix('-'), arg.strip_prefix('-')) {
        (Some(short), Some(bundle)) if short.len() == 1 && !bundle.starts_with('-') => {
            bundle.contains(short)
        }
        _ => false,
    }
}

/// Lexically normalise `path` (resolving `.` and `..`) and check that it sits
/// beneath `prefix`. The prefix itself does not count.
fn is_strictly_under(path: &str, prefix: &Path) -> bool {
    let path = Path::new(path);
    if !path.is_absolute() {
        return false;
    }
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized != prefix && normalized.starts_with(prefix)
}

/// A compiled, immutable rule.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub id: String,
    pub category: Category,
    pub severity: RiskLevel,
    pub layer: RuleLayer,
    pub domain: Domain,
    pub shells: ShellSet,
    pub matcher: Matcher,
    /// Human-readable reason shown with every match.
    pub message: String,
    pub filters: Vec<Filter>,
    pub suggestion: Option<String>,
    pub keywords: Vec<String>,
    pub origin: SourceLocation,
}

impl Pattern {
    /// Compile a definition.
    ///
    /// # Errors
    ///
    /// Returns [`PatternLoadError::InvalidMatcher`] for bad regexes or an
    /// inconsistent matcher/layer/severity combination, and
    /// [`PatternLoadError::MalformedEntry`] for missing required fields.
    pub fn compile(def: &RuleDefinition, origin: SourceLocation) -> Result<Self, PatternLoadError> {
        let invalid = |message: String| PatternLoadError::InvalidMatcher {
            location: origin.clone(),
            id: def.id.clone(),
            message,
        };

        if def.id.trim().is_empty() {
            return Err(PatternLoadError::MalformedEntry {
                location: origin,
                message: "rule has an empty id".to_string(),
            });
        }

        let (matcher, layer) = match (&def.pattern, &def.structural) {
            (Some(_), Some(_)) => {
                return Err(invalid("set either `pattern` or `structural`, not both".into()));
            }
            (None, None) => {
                return Err(invalid("rule needs a `pattern` or a `structural` matcher".into()));
            }
            (Some(re), None) => {
                if def.layer == RuleLayer::Structural {
                    return Err(invalid("structural layer requires a `structural` matcher".into()));
                }
                let compiled = CompiledRegex::new(re).map_err(|e| invalid(e.to_string()))?;
                (Matcher::Text(compiled), def.layer)
            }
            (None, Some(predicate)) => {
                if def.layer == RuleLayer::Critical {
                    return Err(invalid("global-critical rules must use a text `pattern`".into()));
                }
                (Matcher::Structural(predicate.clone()), RuleLayer::Structural)
            }
        };

        if layer == RuleLayer::Critical && def.severity != RiskLevel::Critical {
            return Err(invalid(format!(
                "global-critical rules must have severity critical, not {}",
                def.severity
            )));
        }
        if def.severity == RiskLevel::Safe {
            return Err(invalid("severity `safe` never fires; remove the rule instead".into()));
        }

        let filters = def
            .filters
            .iter()
            .map(|f| f.compile().map_err(|e| invalid(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let shells = def
            .shells
            .as_ref()
            .map_or(ShellSet::ALL, |list| list.iter().copied().collect());
        if shells.is_empty() {
            return Err(invalid("`shells` must name at least one shell".into()));
        }

        Ok(Self {
            id: def.id.clone(),
            category: def.category,
            severity: def.severity,
            layer,
            domain: def.domain.clone(),
            shells,
            matcher,
            message: def.description.clone(),
            filters,
            suggestion: def.suggestion.clone(),
            keywords: def.keywords.iter().map(|k| k.to_ascii_lowercase()).collect(),
            origin,
        })
    }

    #[must_use]
    pub const fn is_global_critical(&self) -> bool {
        matches!(self.layer, RuleLayer::Critical)
    }

    /// Text regex, if this is a text pattern.
    #[must_use]
    pub const fn regex(&self) -> Option<&CompiledRegex> {
        match &self.matcher {
            Matcher::Text(re) => Some(re),
            Matcher::Structural(_) => None,
        }
    }

    /// Pattern suggestion, else the category default.
    #[must_use]
    pub fn advice(&self) -> Option<String> {
        self.suggestion
            .clone()
            .or_else(|| self.category.default_suggestion().map(str::to_string))
    }
}

// ============================================================================
// Catalogue macros
// ============================================================================

/// Declare a global-critical text rule.
///
/// `critical_rule!("id", Category, r"regex", "reason")`
#[macro_export]
macro_rules! critical_rule {
    ($id:literal, $category:ident, $re:literal, $reason:literal) => {
        $crate::rules::RuleDefinition::text(
            $id,
            $crate::model::Category::$category,
            $crate::model::RiskLevel::Critical,
            $re,
            $reason,
        )
        .layer($crate::rules::RuleLayer::Critical)
    };
}

/// Declare a domain-scoped text rule. Severity defaults to High.
///
/// - `domain_rule!("id", Domain, Category, r"regex", "reason")`
/// - `domain_rule!("id", Domain, Category, r"regex", "reason", Severity)`
#[macro_export]
macro_rules! domain_rule {
    ($id:literal, $domain:ident, $category:ident, $re:literal, $reason:literal) => {
        $crate::domain_rule!($id, $domain, $category, $re, $reason, High)
    };
    ($id:literal, $domain:ident, $category:ident, $re:literal, $reason:literal, $severity:ident) => {
        $crate::rules::RuleDefinition::text(
            $id,
            $crate::model::Category::$category,
            $crate::model::RiskLevel::$severity,
            $re,
            $reason,
        )
        .domain($crate::model::Domain::$domain)
    };
}

/// Declare a structural rule.
///
/// `structural_rule!("id", Category, predicate, "reason", Severity)`
#[macro_export]
macro_rules! structural_rule {
    ($id:literal, $category:ident, $predicate:expr, $reason:literal, $severity:ident) => {
        $crate::rules::RuleDefinition::structural(
            $id,
            $crate::model::Category::$category,
            $crate::model::RiskLevel::$severity,
            $predicate,
            $reason,
        )
    };
}
