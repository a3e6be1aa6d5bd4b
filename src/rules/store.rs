//! Pattern store: loads rule sources in precedence order into a [`RuleSet`].
//!
//! Sources apply in the order builtin → local → vendor → remote. A later
//! entry with an id that already exists is rejected unless it sets
//! `override = true`; global-critical patterns can be replaced but never
//! weakened. Entry errors are collected into the [`LoadReport`] and the rest
//! of the source still loads. The only fatal outcome is a global-critical
//! layer that cannot be built.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PatternLoadError, SourceLocation, ValidatorError};
use crate::rules::builtin::builtin_definitions;
use crate::rules::definition::parse_rule_file;
use crate::rules::remote::{RemoteFetcher, RemoteOptions};
use crate::rules::{Pattern, RuleDefinition, RuleLayer, RuleSet, SourceKind};

/// A configured external rule source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuleSource {
    /// Operator rule file or directory of `*.toml` files.
    Local { path: PathBuf },
    /// Third-party rule file or directory.
    Vendor { path: PathBuf },
    /// `https://` URL of a rule file.
    Remote { url: String },
}

impl RuleSource {
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::Local { .. } => SourceKind::Local,
            Self::Vendor { .. } => SourceKind::Vendor,
            Self::Remote { .. } => SourceKind::Remote,
        }
    }
}

/// Result of a (re)load: the new rule set plus every non-fatal error.
#[derive(Debug)]
pub struct LoadReport {
    pub ruleset: RuleSet,
    pub errors: Vec<PatternLoadError>,
}

/// Summary of checking one rule file in isolation.
#[derive(Debug, Default)]
pub struct FileCheck {
    pub rules: usize,
    pub errors: Vec<PatternLoadError>,
}

/// Knows where rules come from and how to build a [`RuleSet`] from them.
#[derive(Debug, Clone)]
pub struct PatternStore {
    builtins: Vec<RuleDefinition>,
    sources: Vec<RuleSource>,
    fetcher: RemoteFetcher,
}

impl PatternStore {
    #[must_use]
    pub fn new(sources: Vec<RuleSource>) -> Self {
        Self {
            builtins: builtin_definitions(),
            sources,
            fetcher: RemoteFetcher::new(RemoteOptions::default()),
        }
    }

    /// Store with only the built-in catalogue.
    #[must_use]
    pub fn builtin_only() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn with_remote_options(mut self, options: RemoteOptions) -> Self {
        self.fetcher = RemoteFetcher::new(options);
        self
    }

    /// Replace the built-in catalogue (embedders shipping their own).
    #[must_use]
    pub fn with_builtins(mut self, builtins: Vec<RuleDefinition>) -> Self {
        self.builtins = builtins;
        self
    }

    #[must_use]
    pub fn sources(&self) -> &[RuleSource] {
        &self.sources
    }

    /// Load synchronously. Remote sources come from the verified cache only.
    ///
    /// # Errors
    ///
    /// [`ValidatorError::CriticalPatternsUnavailable`] if the global-critical
    /// layer cannot be built.
    #[tracing::instrument(skip(self), fields(sources = self.sources.len()))]
    pub fn load(&self) -> Result<LoadReport, ValidatorError> {
        self.assemble(|url| {
            self.fetcher
                .cached(url)
                .map_err(|message| PatternLoadError::RemoteUnavailable {
                    url: url.to_string(),
                    message,
                })
        })
    }

    /// Load, fetching remote sources over the network first.
    ///
    /// # Errors
    ///
    /// [`ValidatorError::CriticalPatternsUnavailable`] if the global-critical
    /// layer cannot be built.
    #[tracing::instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn load_async(&self) -> Result<LoadReport, ValidatorError> {
        let mut fetched: HashMap<String, Result<String, PatternLoadError>> = HashMap::new();
        for source in &self.sources {
            if let RuleSource::Remote { url } = source {
                if !fetched.contains_key(url) {
                    let body = self.fetcher.fetch(url).await;
                    fetched.insert(url.clone(), body);
                }
            }
        }
        self.assemble(|url| {
            fetched.get(url).cloned().unwrap_or_else(|| {
                Err(PatternLoadError::RemoteUnavailable {
                    url: url.to_string(),
                    message: "not fetched".to_string(),
                })
            })
        })
    }

    fn assemble<F>(&self, remote_body: F) -> Result<LoadReport, ValidatorError>
    where
        F: Fn(&str) -> Result<String, PatternLoadError>,
    {
        let mut assembly = Assembly::default();
        let mut fatal = Vec::new();

        for (index, def) in self.builtins.iter().enumerate() {
            let location = SourceLocation::builtin().with_entry(index);
            if let Err(e) = assembly.apply(def, location) {
                if def.layer == RuleLayer::Critical {
                    fatal.push(e);
                } else {
                    assembly.errors.push(e);
                }
            }
        }

        let mut ordered: Vec<&RuleSource> = self.sources.iter().collect();
        ordered.sort_by_key(|source| source.kind());

        for source in ordered {
            match source {
                RuleSource::Local { path } | RuleSource::Vendor { path } => {
                    assembly.load_path(source.kind(), path);
                }
                RuleSource::Remote { url } => match remote_body(url) {
                    Ok(body) => {
                        let location = SourceLocation::file(SourceKind::Remote, url.as_str());
                        assembly.load_content(&body, &location);
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "remote rule source skipped");
                        assembly.errors.push(e);
                    }
                },
            }
        }

        let critical = assembly
            .patterns
            .iter()
            .filter(|p| p.is_global_critical())
            .count();
        if !fatal.is_empty() || critical == 0 {
            return Err(ValidatorError::CriticalPatternsUnavailable(fatal));
        }

        let ruleset = RuleSet::build(assembly.patterns);
        info!(
            patterns = ruleset.len(),
            critical,
            errors = assembly.errors.len(),
            generation = ruleset.generation(),
            "rule set loaded"
        );
        Ok(LoadReport {
            ruleset,
            errors: assembly.errors,
        })
    }

    /// Parse and compile one rule file on its own, reporting every problem
    /// including ids that would collide with the built-in catalogue.
    #[must_use]
    pub fn check_file(&self, path: &Path) -> FileCheck {
        let mut assembly = Assembly::default();
        for def in &self.builtins {
            let _ = assembly.apply(def, SourceLocation::builtin());
        }
        let before = assembly.patterns.len();
        assembly.load_path(SourceKind::Local, path);
        FileCheck {
            rules: assembly.patterns.len() - before + assembly.replaced,
            errors: assembly.errors,
        }
    }
}

/// Patterns in load order with an id index.
#[derive(Default)]
struct Assembly {
    patterns: Vec<Pattern>,
    index: HashMap<String, usize>,
    errors: Vec<PatternLoadError>,
    replaced: usize,
}

impl Assembly {
    fn apply(&mut self, def: &RuleDefinition, location: SourceLocation) -> Result<(), PatternLoadError> {
        let pattern = Pattern::compile(def, location.clone())?;
        let Some(&slot) = self.index.get(&pattern.id) else {
            self.index.insert(pattern.id.clone(), self.patterns.len());
            self.patterns.push(pattern);
            return Ok(());
        };

        if !def.override_existing {
            return Err(PatternLoadError::DuplicateId {
                location,
                id: pattern.id,
            });
        }
        if self.patterns[slot].is_global_critical() && !pattern.is_global_critical() {
            return Err(PatternLoadError::CriticalWeakened {
                location,
                id: pattern.id,
            });
        }
        debug!(id = %pattern.id, origin = %location, "pattern overridden");
        self.patterns[slot] = pattern;
        self.replaced += 1;
        Ok(())
    }

    fn load_path(&mut self, kind: SourceKind, path: &Path) {
        if path.is_dir() {
            let entries = match fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    self.errors.push(PatternLoadError::Unreadable {
                        location: SourceLocation::file(kind, path),
                        message: e.to_string(),
                    });
                    return;
                }
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
                .collect();
            files.sort();
            for file in files {
                self.load_file(kind, &file);
            }
        } else {
            self.load_file(kind, path);
        }
    }

    fn load_file(&mut self, kind: SourceKind, path: &Path) {
        let location = SourceLocation::file(kind, path);
        match fs::read_to_string(path) {
            Ok(content) => self.load_content(&content, &location),
            Err(e) => self.errors.push(PatternLoadError::Unreadable {
                location,
                message: e.to_string(),
            }),
        }
    }

    fn load_content(&mut self, content: &str, location: &SourceLocation) {
        let file = parse_rule_file(content, location);
        self.errors.extend(file.errors);
        for (index, def) in file.definitions {
            if let Err(e) = self.apply(&def, location.clone().with_entry(index)) {
                warn!(error = %e, "rule entry skipped");
                self.errors.push(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical_rule;
    use crate::model::RiskLevel;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn builtins_load_without_errors() {
        let report = PatternStore::builtin_only().load().unwrap();
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(report.ruleset.find("fork-bomb").is_some());
    }

    #[test]
    fn local_rules_add_and_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "rules.toml",
            r#"
[[rule]]
id = "terraform-destroy"
category = "system_modification"
severity = "high"
domain = "infrastructure"
pattern = 'terraform\s+destroy'

[[rule]]
id = "rm-recursive-force"
category = "file_destruction"
severity = "moderate"
domain = "filesystem"
pattern = 'rm\s+-rf'
override = true
"#,
        );
        let report = PatternStore::new(vec![RuleSource::Local { path }]).load().unwrap();
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(report.ruleset.find("terraform-destroy").is_some());
        let replaced = report.ruleset.find("rm-recursive-force").unwrap();
        assert_eq!(replaced.severity, RiskLevel::Moderate);
        assert_eq!(replaced.origin.source, SourceKind::Local);
    }

    #[test]
    fn duplicate_without_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "dup.toml",
            "[[rule]]\nid = 'fork-bomb'\ncategory = 'other'\nseverity = 'low'\npattern = 'x'\n",
        );
        let report = PatternStore::new(vec![RuleSource::Local { path }]).load().unwrap();
        assert!(matches!(
            report.errors.as_slice(),
            [PatternLoadError::DuplicateId { id, .. }] if id == "fork-bomb"
        ));
        assert_eq!(report.ruleset.find("fork-bomb").unwrap().severity, RiskLevel::Critical);
    }

    #[test]
    fn critical_cannot_be_weakened() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "weaken.toml",
            "[[rule]]\nid = 'fork-bomb'\ncategory = 'other'\nseverity = 'low'\npattern = 'x'\noverride = true\n",
        );
        let report = PatternStore::new(vec![RuleSource::Local { path }]).load().unwrap();
        assert!(matches!(
            report.errors.as_slice(),
            [PatternLoadError::CriticalWeakened { .. }]
        ));
        assert!(report.ruleset.find("fork-bomb").unwrap().is_global_critical());
    }

    #[test]
    fn directories_load_sorted_and_missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "b.toml",
            "[[rule]]\nid = 'b-rule'\ncategory = 'other'\nseverity = 'low'\npattern = 'b'\n",
        );
        write(
            dir.path(),
            "a.toml",
            "[[rule]]\nid = 'a-rule'\ncategory = 'other'\nseverity = 'low'\npattern = '('\n",
        );
        write(dir.path(), "notes.txt", "ignored");

        let report = PatternStore::new(vec![
            RuleSource::Vendor { path: dir.path().to_path_buf() },
            RuleSource::Local { path: dir.path().join("missing.toml") },
        ])
        .load()
        .unwrap();

        assert!(report.ruleset.find("b-rule").is_some());
        assert!(report.ruleset.find("a-rule").is_none());
        assert_eq!(report.errors.len(), 2);
        // local is applied before vendor regardless of configuration order
        assert!(matches!(report.errors[0], PatternLoadError::Unreadable { .. }));
        assert!(matches!(report.errors[1], PatternLoadError::InvalidMatcher { .. }));
    }

    #[test]
    fn remote_without_cache_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatternStore::new(vec![RuleSource::Remote {
            url: "https://rules.example/x.toml".to_string(),
        }])
        .with_remote_options(RemoteOptions {
            timeout: std::time::Duration::from_millis(10),
            cache_dir: Some(dir.path().to_path_buf()),
        });
        let report = store.load().unwrap();
        assert!(matches!(
            report.errors.as_slice(),
            [PatternLoadError::RemoteUnavailable { .. }]
        ));
    }

    #[test]
    fn broken_builtin_critical_is_fatal() {
        let store = PatternStore::builtin_only()
            .with_builtins(vec![critical_rule!("broken", Other, r"(", "broken")]);
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn no_critical_patterns_is_fatal() {
        let store = PatternStore::builtin_only().with_builtins(Vec::new());
        assert!(matches!(
            store.load(),
            Err(ValidatorError::CriticalPatternsUnavailable(_))
        ));
    }

    #[test]
    fn check_file_counts_rules_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "check.toml",
            "[[rule]]\nid='ok'\ncategory='other'\nseverity='low'\npattern='ok'\n\n[[rule]]\nid='rm-rf-root'\ncategory='other'\nseverity='low'\npattern='x'\n",
        );
        let check = PatternStore::builtin_only().check_file(&path);
        assert_eq!(check.rules, 1);
        assert_eq!(check.errors.len(), 1);
    }
}
