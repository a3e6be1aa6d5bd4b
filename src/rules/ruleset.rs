//! Immutable compiled rule sets and the handle used to swap them.
//!
//! A [`RuleSet`] is built once per load and never mutated. Readers take an
//! `Arc` snapshot from the [`RuleSetHandle`]; a reload swaps the `Arc`, so
//! in-flight validations finish against the snapshot they started with.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::model::{Domain, ShellDialect};
use crate::rules::{Pattern, RuleLayer};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// A compiled pattern plus the prefilter keywords that gate it.
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub pattern: Arc<Pattern>,
    keyword_ids: SmallVec<[usize; 4]>,
}

impl RuleEntry {
    /// True if the pattern could match text with these keyword hits.
    /// Patterns without keywords always run.
    #[must_use]
    pub fn might_match(&self, hits: &KeywordHits) -> bool {
        self.keyword_ids.is_empty() || self.keyword_ids.iter().any(|id| hits.contains(*id))
    }

    #[must_use]
    pub fn applies_to(&self, shell: ShellDialect) -> bool {
        self.pattern.shells.contains(shell)
    }
}

/// Which prefilter keywords occur in a text.
#[derive(Debug, Clone, Default)]
pub struct KeywordHits {
    seen: Vec<bool>,
    all: bool,
}

impl KeywordHits {
    /// Hits that let every pattern through.
    #[must_use]
    pub const fn everything() -> Self {
        Self {
            seen: Vec::new(),
            all: true,
        }
    }

    #[must_use]
    pub fn contains(&self, id: usize) -> bool {
        self.all || self.seen.get(id).copied().unwrap_or(false)
    }
}

/// Aho-Corasick automaton over every keyword declared by any pattern.
#[derive(Debug, Clone)]
struct Prefilter {
    automaton: AhoCorasick,
    len: usize,
}

impl Prefilter {
    fn build(keywords: &[String]) -> Option<Self> {
        if keywords.is_empty() {
            return None;
        }
        match AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(keywords)
        {
            Ok(automaton) => Some(Self {
                automaton,
                len: keywords.len(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "keyword prefilter unavailable; every pattern will run");
                None
            }
        }
    }

    fn scan(&self, text: &str) -> KeywordHits {
        let mut seen = vec![false; self.len];
        for found in self.automaton.find_overlapping_iter(text) {
            seen[found.pattern().as_usize()] = true;
        }
        KeywordHits { seen, all: false }
    }
}

/// All compiled patterns of one load, grouped by layer and domain.
#[derive(Debug, Clone)]
pub struct RuleSet {
    generation: u64,
    global_critical: Vec<RuleEntry>,
    by_domain: BTreeMap<Domain, Vec<RuleEntry>>,
    structural: Vec<RuleEntry>,
    prefilter: Option<Prefilter>,
}

impl RuleSet {
    /// Group `patterns` (in load order) into a new generation.
    #[must_use]
    pub fn build(patterns: Vec<Pattern>) -> Self {
        let mut keywords: Vec<String> = Vec::new();
        let mut keyword_index: HashMap<String, usize> = HashMap::new();

        let mut global_critical = Vec::new();
        let mut by_domain: BTreeMap<Domain, Vec<RuleEntry>> = BTreeMap::new();
        let mut structural = Vec::new();

        for pattern in patterns {
            let keyword_ids = pattern
                .keywords
                .iter()
                .map(|k| {
                    *keyword_index.entry(k.clone()).or_insert_with(|| {
                        keywords.push(k.clone());
                        keywords.len() - 1
                    })
                })
                .collect();
            let layer = pattern.layer;
            let entry = RuleEntry {
                pattern: Arc::new(pattern),
                keyword_ids,
            };
            match layer {
                RuleLayer::Critical => global_critical.push(entry),
                RuleLayer::Structural => structural.push(entry),
                RuleLayer::Domain => by_domain
                    .entry(entry.pattern.domain.clone())
                    .or_default()
                    .push(entry),
            }
        }

        Self {
            generation: next_generation(),
            global_critical,
            by_domain,
            structural,
            prefilter: Prefilter::build(&keywords),
        }
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn global_critical(&self) -> &[RuleEntry] {
        &self.global_critical
    }

    /// Domain-layer entries for `domain` (empty if none).
    #[must_use]
    pub fn domain(&self, domain: &Domain) -> &[RuleEntry] {
        self.by_domain.get(domain).map_or(&[], Vec::as_slice)
    }

    /// Every domain that has at least one rule, in sorted order.
    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.by_domain.keys()
    }

    #[must_use]
    pub fn structural(&self) -> &[RuleEntry] {
        &self.structural
    }

    /// Every text entry: global-critical first, then each domain.
    pub fn text_entries(&self) -> impl Iterator<Item = &RuleEntry> {
        self.global_critical
            .iter()
            .chain(self.by_domain.values().flatten())
    }

    /// Every pattern in the set.
    pub fn patterns(&self) -> impl Iterator<Item = &Arc<Pattern>> {
        self.text_entries()
            .chain(self.structural.iter())
            .map(|entry| &entry.pattern)
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Arc<Pattern>> {
        self.patterns().find(|p| p.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.global_critical.len()
            + self.structural.len()
            + self.by_domain.values().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keyword hits for `text`.
    #[must_use]
    pub fn keyword_hits(&self, text: &str) -> KeywordHits {
        self.prefilter
            .as_ref()
            .map_or_else(KeywordHits::everything, |p| p.scan(text))
    }
}

/// Shared, swappable pointer to the active [`RuleSet`].
#[derive(Debug)]
pub struct RuleSetHandle {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleSetHandle {
    #[must_use]
    pub fn new(ruleset: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(ruleset)),
        }
    }

    /// The active rule set. Holding the snapshot never blocks a reload.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read())
    }

    /// Install `ruleset` and return the one it replaced.
    pub fn swap(&self, ruleset: RuleSet) -> Arc<RuleSet> {
        let next = Arc::new(ruleset);
        std::mem::replace(&mut *self.current.write(), next)
    }
}
