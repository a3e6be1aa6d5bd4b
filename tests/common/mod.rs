//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use shellguard::config::PolicyConfig;
use shellguard::{
    ClassifierUnavailable, Command, Domain, IntentClassifier, RiskLevel, RoutingResult,
    RoutingSource, ShellDialect, ValidationResult, Validator,
};

/// Validator over the built-in catalogue with the default policy.
pub fn validator() -> Validator {
    Validator::new(PolicyConfig::default()).expect("built-in rules load")
}

/// Default policy with the decision cache turned off.
pub fn uncached_policy() -> PolicyConfig {
    PolicyConfig {
        cache_ttl_seconds: 0,
        ..PolicyConfig::default()
    }
}

pub fn bash(raw: &str) -> Command {
    Command::new(raw, ShellDialect::Bash)
}

pub fn check(validator: &Validator, raw: &str, shell: ShellDialect) -> ValidationResult {
    validator.check(&Command::new(raw, shell))
}

/// Write `content` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

#[track_caller]
pub fn assert_at_least(result: &ValidationResult, level: RiskLevel) {
    assert!(
        result.risk_level >= level,
        "expected at least {level}, got {} ({:?})",
        result.risk_level,
        result.matched.iter().map(|m| &m.pattern_id).collect::<Vec<_>>()
    );
}

#[track_caller]
pub fn assert_safe(result: &ValidationResult) {
    assert!(
        result.is_safe(),
        "expected safe, got {} ({:?})",
        result.risk_level,
        result.matched.iter().map(|m| &m.pattern_id).collect::<Vec<_>>()
    );
}

/// Classifier that always answers with one domain at high confidence.
pub struct FixedClassifier(pub Domain);

#[async_trait]
impl IntentClassifier for FixedClassifier {
    async fn classify(&self, _: &Command) -> Result<RoutingResult, ClassifierUnavailable> {
        Ok(RoutingResult {
            primary: self.0.clone(),
            secondary: Vec::new(),
            confidence: 0.99,
            source: RoutingSource::Model,
        })
    }
}

/// Classifier that always fails.
pub struct BrokenClassifier;

#[async_trait]
impl IntentClassifier for BrokenClassifier {
    async fn classify(&self, _: &Command) -> Result<RoutingResult, ClassifierUnavailable> {
        Err(ClassifierUnavailable::Failed("model offline".to_string()))
    }
}

pub fn with_classifier(classifier: Arc<dyn IntentClassifier>) -> Validator {
    Validator::builder()
        .config(uncached_policy())
        .classifier(classifier)
        .build()
        .expect("built-in rules load")
}
