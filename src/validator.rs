//! Validation orchestration.
//!
//! ```text
//! cache ─hit──────────────────────────────────────────────▶ verdict
//!   │miss
//!   ├─▶ router (classifier | heuristic) ─┐
//!   └─▶ early gate (spawn_blocking) ─────┴─▶ join ─Block──▶ verdict
//!                                              │
//!                          parse ─▶ engine ─▶ score ─▶ cache ─▶ verdict
//! ```
//!
//! The validator owns a multi-thread Tokio runtime for its synchronous API.
//! Async callers use [`Validator::validate_async`] on their own runtime.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheKey, DecisionCache};
use crate::config::PolicyConfig;
use crate::engine::{self, EngineSettings, Scope, Subject};
use crate::error::{PatternLoadError, ValidatorError};
use crate::gate::{self, GateDecision};
use crate::impact::RuleBasedPredictor;
use crate::logging::DecisionLogger;
use crate::model::{Command, Diagnostics, ParseStatus, ValidationResult, VerdictSource};
use crate::normalize::MatchView;
use crate::parser;
use crate::router::{IntentClassifier, Router};
use crate::rules::{PatternStore, RuleDefinition, RuleSet, RuleSetHandle};
use crate::scorer::{self, ScoreInput};

const RUNTIME_THREADS: usize = 2;

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    validations: AtomicU64,
    cache_hits: AtomicU64,
    early_exits: AtomicU64,
    degraded: AtomicU64,
}

/// Point-in-time copy of the validator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidatorStats {
    pub validations: u64,
    pub cache_hits: u64,
    pub early_exits: u64,
    pub degraded: u64,
    pub ruleset_generation: u64,
    pub patterns: usize,
}

// ============================================================================
// Builder
// ============================================================================

/// Configures a [`Validator`].
#[derive(Default)]
pub struct ValidatorBuilder {
    config: PolicyConfig,
    classifier: Option<Arc<dyn IntentClassifier>>,
    builtins: Option<Vec<RuleDefinition>>,
}

impl ValidatorBuilder {
    #[must_use]
    pub fn config(mut self, config: PolicyConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Replace the built-in catalogue.
    #[must_use]
    pub fn builtins(mut self, builtins: Vec<RuleDefinition>) -> Self {
        self.builtins = Some(builtins);
        self
    }

    /// Load the rules and start the runtime.
    ///
    /// # Errors
    /// [`ValidatorError::CriticalPatternsUnavailable`] when the global-critical
    /// layer cannot be built, [`ValidatorError::Runtime`] when the runtime
    /// cannot start.
    pub fn build(self) -> Result<Validator, ValidatorError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_THREADS)
            .thread_name("shellguard")
            .enable_all()
            .build()?;

        let mut store = PatternStore::new(self.config.rule_sources.clone())
            .with_remote_options(self.config.remote.options());
        if let Some(builtins) = self.builtins {
            store = store.with_builtins(builtins);
        }

        let report = block_on(&runtime, store.load_async())?;
        for error in &report.errors {
            warn!(%error, "rule entry skipped");
        }

        let mut router = Router::new(&self.config.routing);
        if let Some(classifier) = self.classifier {
            router = router.with_classifier(classifier);
        }

        let logger = DecisionLogger::open(&self.config.logging).unwrap_or_else(|error| {
            warn!(%error, "decision log unavailable");
            None
        });

        Ok(Validator {
            cache: DecisionCache::new(self.config.cache_capacity, self.config.cache_ttl()),
            rules: RuleSetHandle::new(report.ruleset),
            load_errors: Mutex::new(report.errors),
            predictor: RuleBasedPredictor::new(),
            store,
            router,
            logger,
            counters: Counters::default(),
            config: self.config,
            runtime: Some(runtime),
        })
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Shell command validator. Cheap to share behind an `Arc`.
pub struct Validator {
    config: PolicyConfig,
    store: PatternStore,
    rules: RuleSetHandle,
    router: Router,
    cache: DecisionCache,
    logger: Option<DecisionLogger>,
    counters: Counters,
    load_errors: Mutex<Vec<PatternLoadError>>,
    predictor: RuleBasedPredictor,
    runtime: Option<Runtime>,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("generation", &self.rules.snapshot().generation())
            .field("router", &self.router)
            .field("cache_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Validator {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside another runtime.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Validator {
    #[must_use]
    pub fn builder() -> ValidatorBuilder {
        ValidatorBuilder::default()
    }

    /// Validator with `config` and no external classifier.
    ///
    /// # Errors
    /// See [`ValidatorBuilder::build`].
    pub fn new(config: PolicyConfig) -> Result<Self, ValidatorError> {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Current rule snapshot.
    #[must_use]
    pub fn ruleset(&self) -> Arc<RuleSet> {
        self.rules.snapshot()
    }

    /// Entry errors from the most recent load.
    #[must_use]
    pub fn load_errors(&self) -> Vec<PatternLoadError> {
        self.load_errors.lock().clone()
    }

    #[must_use]
    pub fn stats(&self) -> ValidatorStats {
        let ruleset = self.rules.snapshot();
        ValidatorStats {
            validations: self.counters.validations.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            early_exits: self.counters.early_exits.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            ruleset_generation: ruleset.generation(),
            patterns: ruleset.len(),
        }
    }

    fn runtime(&self) -> &Runtime {
        match &self.runtime {
            Some(runtime) => runtime,
            None => unreachable!("runtime is only taken on drop"),
        }
    }

    /// Validate under the validator's own policy.
    #[must_use]
    pub fn check(&self, command: &Command) -> ValidationResult {
        self.validate(command, &self.config)
    }

    /// Validate `command` under `policy`. Blocks the calling thread.
    #[must_use]
    pub fn validate(&self, command: &Command, policy: &PolicyConfig) -> ValidationResult {
        block_on(self.runtime(), self.validate_async(command, policy))
    }

    /// Like [`Self::validate`], but returns `None` if `cancel` fires first.
    /// A cancelled validation leaves the cache untouched.
    #[must_use]
    pub fn validate_with_cancel(
        &self,
        command: &Command,
        policy: &PolicyConfig,
        cancel: &CancellationToken,
    ) -> Option<ValidationResult> {
        block_on(
            self.runtime(),
            self.validate_async_with_cancel(command, policy, cancel),
        )
    }

    pub async fn validate_async_with_cancel(
        &self,
        command: &Command,
        policy: &PolicyConfig,
        cancel: &CancellationToken,
    ) -> Option<ValidationResult> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("validation cancelled");
                None
            }
            result = self.validate_async(command, policy) => Some(result),
        }
    }

    /// Validate on the caller's runtime.
    #[instrument(skip_all, fields(shell = %command.shell(), len = command.raw_text().len()))]
    pub async fn validate_async(&self, command: &Command, policy: &PolicyConfig) -> ValidationResult {
        let started = Instant::now();
        self.counters.validations.fetch_add(1, Ordering::Relaxed);

        let ruleset = self.rules.snapshot();
        let generation = ruleset.generation();
        let key = CacheKey {
            raw: command.raw_text().to_string(),
            shell: command.shell(),
            hint: command.domain_hint().cloned(),
            policy: policy.fingerprint(),
        };

        if let Some(mut hit) = self.cache.get(&key, generation) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            hit.diagnostics.elapsed_us = elapsed_us(started);
            self.record(&hit, command);
            return hit;
        }

        let shell = command.shell();
        let view = Arc::new(MatchView::build(command.raw_text(), shell));
        let gate_task = {
            let ruleset = Arc::clone(&ruleset);
            let view = Arc::clone(&view);
            tokio::task::spawn_blocking(move || gate::check(&ruleset, &view, shell))
        };
        let (routed, gate) = tokio::join!(self.router.route(command, &view), gate_task);
        let gate = gate.unwrap_or_else(|error| {
            warn!(%error, "gate task failed, re-running inline");
            gate::check(&ruleset, &view, shell)
        });

        let unscoped = routed.is_unscoped(policy.routing.confidence_threshold);
        let mut diagnostics = Diagnostics {
            degraded: routed.degraded.is_some(),
            degraded_reasons: routed.degraded.iter().map(ToString::to_string).collect(),
            unscoped,
            routing: Some(routed.routing.clone()),
            ruleset_generation: generation,
            ..Diagnostics::default()
        };
        if diagnostics.degraded {
            self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        }

        let mut result = match gate {
            GateDecision::Block { matches, reason } => {
                debug!(%reason, "early gate blocked");
                self.counters.early_exits.fetch_add(1, Ordering::Relaxed);
                let input = ScoreInput {
                    matches,
                    gate_blocked: true,
                    confirmations: Vec::new(),
                    diagnostics,
                };
                scorer::score(input, policy, VerdictSource::EarlyExit)
            }
            decision => {
                let parsed = match parser::parse(command.raw_text(), shell) {
                    Ok(parsed) => {
                        diagnostics.parse = ParseStatus::Parsed;
                        Some(parsed)
                    }
                    Err(incomplete) => {
                        debug!(reason = %incomplete.reason, offset = incomplete.offset, "parse incomplete");
                        diagnostics.parse = ParseStatus::Incomplete {
                            reason: incomplete.reason,
                            offset: incomplete.offset,
                        };
                        None
                    }
                };
                let scope = Scope::from_routed(&routed, policy.routing.confidence_threshold);
                let settings = EngineSettings {
                    structural: policy.enable_structural_analysis,
                    secondary_weight: policy.routing.secondary_weight,
                };
                let subject = Subject {
                    view: &view,
                    parsed: parsed.as_ref(),
                    shell,
                };
                let outcome = engine::evaluate(&ruleset, subject, &scope, settings);
                diagnostics.domains_checked = outcome.domains_checked;
                let input = ScoreInput {
                    matches: outcome.matches,
                    gate_blocked: false,
                    confirmations: decision.confirmation_reasons().to_vec(),
                    diagnostics,
                };
                scorer::score(input, policy, VerdictSource::RuleEngine)
            }
        };

        result.diagnostics.impact = Some(self.predictor.estimate(&view, &result.matched));
        result.diagnostics.elapsed_us = elapsed_us(started);
        self.cache.insert(key, &result, generation);
        self.record(&result, command);
        result
    }

    fn record(&self, result: &ValidationResult, command: &Command) {
        if let Some(logger) = &self.logger {
            logger.log(result, command.raw_text(), command.shell().as_str());
        }
    }

    /// Rebuild the rule set from the configured sources and swap it in.
    ///
    /// Returns the entry errors of the new load. On a fatal error the
    /// current rule set stays active.
    ///
    /// # Errors
    /// [`ValidatorError::CriticalPatternsUnavailable`].
    pub fn reload(&self) -> Result<Vec<PatternLoadError>, ValidatorError> {
        block_on(self.runtime(), self.reload_async())
    }

    /// # Errors
    /// See [`Self::reload`].
    pub async fn reload_async(&self) -> Result<Vec<PatternLoadError>, ValidatorError> {
        let report = self.store.load_async().await?;
        let previous = self.rules.swap(report.ruleset);
        let current = self.rules.snapshot();
        debug!(
            from = previous.generation(),
            to = current.generation(),
            patterns = current.len(),
            "rule set reloaded"
        );
        self.cache.clear();
        (*self.load_errors.lock()).clone_from(&report.errors);
        Ok(report.errors)
    }
}

fn elapsed_us(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Drive `future` on `runtime`, from a helper thread when the caller is
/// already inside a runtime.
fn block_on<F>(runtime: &Runtime, future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    if Handle::try_current().is_err() {
        return runtime.block_on(future);
    }
    std::thread::scope(|scope| {
        match scope.spawn(|| runtime.block_on(future)).join() {
            Ok(output) => output,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}
