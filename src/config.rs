//! Policy configuration.
//!
//! Supports layered configuration from multiple sources:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.shellguard.toml`, searched up to the repository root)
//! 3. User config (`~/.config/shellguard/config.toml`)
//! 4. System config (`/etc/shellguard/config.toml`)
//! 5. Compiled defaults (lowest priority)
//!
//! Files are merged table by table, so a later file only needs the keys it
//! changes. Invalid files and values are reported as warnings and skipped.

use std::collections::hash_map::DefaultHasher;
use std::env;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use crate::model::{RiskLevel, UnknownValue};
use crate::rules::RuleSource;
use crate::rules::remote::{DEFAULT_REMOTE_TIMEOUT, RemoteOptions, default_cache_dir};

/// Environment variable prefix for all config options.
pub const ENV_PREFIX: &str = "SHELLGUARD";

/// Default config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Project-level config file name.
pub const PROJECT_CONFIG_NAME: &str = ".shellguard.toml";

const SYSTEM_CONFIG_DIR: &str = "/etc/shellguard";

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;
pub const DEFAULT_SECONDARY_WEIGHT: f32 = 0.5;
pub const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

// ============================================================================
// Strictness
// ============================================================================

/// How eagerly verdicts block or ask for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Block High and above, confirm Moderate and above.
    Strict,
    /// Block Critical, confirm High and above.
    #[default]
    Moderate,
    /// Block Critical, confirm Critical.
    Permissive,
}

impl Strictness {
    /// Lowest level that blocks.
    #[must_use]
    pub const fn block_at(self) -> RiskLevel {
        match self {
            Self::Strict => RiskLevel::High,
            Self::Moderate | Self::Permissive => RiskLevel::Critical,
        }
    }

    /// Lowest level that requires confirmation.
    #[must_use]
    pub const fn confirm_at(self) -> RiskLevel {
        match self {
            Self::Strict => RiskLevel::Moderate,
            Self::Moderate => RiskLevel::High,
            Self::Permissive => RiskLevel::Critical,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Moderate => "moderate",
            Self::Permissive => "permissive",
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strictness {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "moderate" | "default" => Ok(Self::Moderate),
            "permissive" | "lenient" => Ok(Self::Permissive),
            _ => Err(UnknownValue {
                kind: "strictness",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// `[routing]`: domain classifier tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Below this confidence every domain is checked.
    pub confidence_threshold: f32,
    /// Score weight of matches from secondary domains.
    pub secondary_weight: f32,
    pub classifier_timeout_ms: u64,
    /// Routing results remembered per command text.
    pub memo_capacity: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            secondary_weight: DEFAULT_SECONDARY_WEIGHT,
            classifier_timeout_ms: DEFAULT_CLASSIFIER_TIMEOUT_MS,
            memo_capacity: 256,
        }
    }
}

impl RoutingConfig {
    #[must_use]
    pub const fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }
}

/// `[remote]`: remote rule source fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_ms: u64::try_from(DEFAULT_REMOTE_TIMEOUT.as_millis()).unwrap_or(2000),
            cache_dir: None,
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub fn options(&self) -> RemoteOptions {
        RemoteOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            cache_dir: self.cache_dir.clone().or_else(default_cache_dir),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Everything that shapes a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub strictness: Strictness,
    pub enable_structural_analysis: bool,
    /// Overrides the blocking threshold implied by `strictness`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_threshold: Option<RiskLevel>,
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,
    pub rule_sources: Vec<RuleSource>,
    pub routing: RoutingConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::Moderate,
            enable_structural_analysis: true,
            block_threshold: None,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            rule_sources: Vec::new(),
            routing: RoutingConfig::default(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Result of a layered load.
#[derive(Debug, Default)]
pub struct ConfigLoad {
    pub config: PolicyConfig,
    /// Files that contributed, lowest priority first.
    pub files: Vec<PathBuf>,
    pub warnings: Vec<ConfigError>,
}

impl PolicyConfig {
    /// Load all layers relative to the current directory.
    #[must_use]
    pub fn load() -> ConfigLoad {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::load_layers(&Self::default_paths(&cwd), |key| env::var(key).ok())
    }

    /// Default file layers, lowest priority first.
    #[must_use]
    pub fn default_paths(cwd: &Path) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME)];
        if let Some(user) = Self::user_config_path() {
            paths.push(user);
        }
        if let Some(project) = find_project_config(cwd) {
            paths.push(project);
        }
        paths
    }

    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shellguard").join(CONFIG_FILE_NAME))
    }

    /// Merge `paths` (missing files are skipped) and then the environment
    /// read through `env_lookup`.
    pub fn load_layers<F>(paths: &[PathBuf], env_lookup: F) -> ConfigLoad
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = toml::Table::new();
        let mut files = Vec::new();
        let mut warnings = Vec::new();

        for path in paths {
            if !path.is_file() {
                continue;
            }
            match read_table(path) {
                Ok(table) => {
                    merge_tables(&mut merged, table);
                    files.push(path.clone());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "config file skipped");
                    warnings.push(e);
                }
            }
        }

        let mut config = match toml::Value::Table(merged).try_into::<Self>() {
            Ok(config) => config,
            Err(e) => {
                warnings.push(ConfigError::Parse {
                    path: files.last().cloned().unwrap_or_default(),
                    source: e,
                });
                Self::default()
            }
        };
        config.apply_env_overrides(&env_lookup, &mut warnings);
        config.sanitize(&mut warnings);
        ConfigLoad {
            config,
            files,
            warnings,
        }
    }

    /// Load exactly one file on top of the defaults (`--config`).
    ///
    /// # Errors
    ///
    /// Unlike layered loading, an unreadable or invalid file is an error.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let table = read_table(path)?;
        let mut config: Self = toml::Value::Table(table)
            .try_into()
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let mut warnings = Vec::new();
        config.sanitize(&mut warnings);
        if let Some(first) = warnings.into_iter().next() {
            return Err(first);
        }
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for invalid documents.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Effective configuration as TOML.
    #[must_use]
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Lowest level that blocks under this policy.
    #[must_use]
    pub fn block_at(&self) -> RiskLevel {
        self.block_threshold.unwrap_or_else(|| self.strictness.block_at())
    }

    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Hash of every field that changes a verdict, used in cache keys.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.strictness.hash(&mut hasher);
        self.enable_structural_analysis.hash(&mut hasher);
        self.block_threshold.hash(&mut hasher);
        self.routing.confidence_threshold.to_bits().hash(&mut hasher);
        self.routing.secondary_weight.to_bits().hash(&mut hasher);
        hasher.finish()
    }

    fn apply_env_overrides<F>(&mut self, lookup: &F, warnings: &mut Vec<ConfigError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |name: &str| format!("{ENV_PREFIX}_{name}");

        // SHELLGUARD_STRICTNESS=strict
        if let Some(value) = lookup(&key("STRICTNESS")) {
            match value.parse() {
                Ok(strictness) => self.strictness = strictness,
                Err(_) => warnings.push(invalid(&key("STRICTNESS"), &value)),
            }
        }

        // SHELLGUARD_STRUCTURAL=0
        if let Some(value) = lookup(&key("STRUCTURAL")) {
            match parse_bool(&value) {
                Some(enabled) => self.enable_structural_analysis = enabled,
                None => warnings.push(invalid(&key("STRUCTURAL"), &value)),
            }
        }

        // SHELLGUARD_CACHE_TTL=60
        if let Some(value) = lookup(&key("CACHE_TTL")) {
            match value.trim().parse() {
                Ok(ttl) => self.cache_ttl_seconds = ttl,
                Err(_) => warnings.push(invalid(&key("CACHE_TTL"), &value)),
            }
        }

        // SHELLGUARD_CONFIDENCE_THRESHOLD=0.6
        if let Some(value) = lookup(&key("CONFIDENCE_THRESHOLD")) {
            match value.trim().parse() {
                Ok(threshold) => self.routing.confidence_threshold = threshold,
                Err(_) => warnings.push(invalid(&key("CONFIDENCE_THRESHOLD"), &value)),
            }
        }

        // SHELLGUARD_RULES=/etc/rules.toml,./more.toml
        if let Some(value) = lookup(&key("RULES")) {
            self.rule_sources.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|path| RuleSource::Local {
                        path: PathBuf::from(path),
                    }),
            );
        }
    }

    /// Reset out-of-range values to their defaults.
    fn sanitize(&mut self, warnings: &mut Vec<ConfigError>) {
        let defaults = RoutingConfig::default();
        if !(0.0..=1.0).contains(&self.routing.confidence_threshold) {
            warnings.push(invalid(
                "routing.confidence_threshold",
                &self.routing.confidence_threshold.to_string(),
            ));
            self.routing.confidence_threshold = defaults.confidence_threshold;
        }
        if !(0.0..=1.0).contains(&self.routing.secondary_weight) {
            warnings.push(invalid(
                "routing.secondary_weight",
                &self.routing.secondary_weight.to_string(),
            ));
            self.routing.secondary_weight = defaults.secondary_weight;
        }
        if self.cache_capacity == 0 {
            warnings.push(invalid("cache_capacity", "0"));
            self.cache_capacity = DEFAULT_CACHE_CAPACITY;
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    content.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge `overlay` into `base`; nested tables merge, everything else replaces.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Walk up from `start` looking for `.shellguard.toml`, stopping at the
/// repository root.
fn find_project_config(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(PROJECT_CONFIG_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if current.join(".git").exists() || !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PolicyConfig::default();
        assert_eq!(config.strictness, Strictness::Moderate);
        assert!(config.enable_structural_analysis);
        assert!((config.routing.confidence_threshold - 0.4).abs() < f32::EPSILON);
        assert!((config.routing.secondary_weight - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.routing.classifier_timeout_ms, 50);
        assert_eq!(config.cache_ttl_seconds, 300);
        assert_eq!(config.cache_capacity, 1024);
        assert_eq!(config.block_at(), RiskLevel::Critical);
    }

    #[test]
    fn strictness_thresholds() {
        assert_eq!(Strictness::Strict.block_at(), RiskLevel::High);
        assert_eq!(Strictness::Strict.confirm_at(), RiskLevel::Moderate);
        assert_eq!(Strictness::Moderate.confirm_at(), RiskLevel::High);
        assert_eq!(Strictness::Permissive.confirm_at(), RiskLevel::Critical);
        assert_eq!("STRICT".parse::<Strictness>().unwrap(), Strictness::Strict);
        assert!("paranoid".parse::<Strictness>().is_err());
    }

    #[test]
    fn parses_full_document() {
        let config = PolicyConfig::from_toml_str(
            r#"
strictness = "strict"
enable_structural_analysis = false
block_threshold = "high"
cache_ttl_seconds = 0
rule_sources = [
  { kind = "local", path = "/etc/shellguard/rules.d" },
  { kind = "remote", url = "https://rules.example/shellguard.toml" },
]

[routing]
confidence_threshold = 0.6

[logging]
redaction = "full"
events = ["blocked"]
"#,
        )
        .unwrap();
        assert_eq!(config.strictness, Strictness::Strict);
        assert!(!config.enable_structural_analysis);
        assert_eq!(config.block_threshold, Some(RiskLevel::High));
        assert_eq!(config.cache_ttl_seconds, 0);
        assert_eq!(config.rule_sources.len(), 2);
        assert!(matches!(config.rule_sources[1], RuleSource::Remote { .. }));
        assert!((config.routing.confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert!((config.routing.secondary_weight - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn later_layers_override_earlier_ones_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let system = write(
            dir.path(),
            "system.toml",
            "strictness = \"strict\"\n[routing]\nconfidence_threshold = 0.7\nsecondary_weight = 0.2\n",
        );
        let project = write(dir.path(), "project.toml", "[routing]\nconfidence_threshold = 0.5\n");
        let missing = dir.path().join("missing.toml");

        let load = PolicyConfig::load_layers(&[system, missing, project], no_env);
        assert!(load.warnings.is_empty(), "{:?}", load.warnings);
        assert_eq!(load.files.len(), 2);
        assert_eq!(load.config.strictness, Strictness::Strict);
        assert!((load.config.routing.confidence_threshold - 0.5).abs() < f32::EPSILON);
        assert!((load.config.routing.secondary_weight - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_file_is_a_warning_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let broken = write(dir.path(), "broken.toml", "strictness = [");
        let load = PolicyConfig::load_layers(&[broken], no_env);
        assert_eq!(load.warnings.len(), 1);
        assert_eq!(load.config, PolicyConfig::default());
    }

    #[test]
    fn environment_overrides_files() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SHELLGUARD_STRICTNESS", "permissive"),
            ("SHELLGUARD_STRUCTURAL", "off"),
            ("SHELLGUARD_CACHE_TTL", "soon"),
            ("SHELLGUARD_RULES", "/a.toml, /b.toml"),
        ]);
        let load = PolicyConfig::load_layers(&[], |k| env.get(k).map(ToString::to_string));
        assert_eq!(load.config.strictness, Strictness::Permissive);
        assert!(!load.config.enable_structural_analysis);
        assert_eq!(load.config.cache_ttl_seconds, DEFAULT_CACHE_TTL_SECONDS);
        assert_eq!(load.config.rule_sources.len(), 2);
        assert!(matches!(
            load.warnings.as_slice(),
            [ConfigError::InvalidValue { key, .. }] if key == "SHELLGUARD_CACHE_TTL"
        ));
    }

    #[test]
    fn out_of_range_values_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(dir.path(), "c.toml", "[routing]\nconfidence_threshold = 4.0\n");
        let load = PolicyConfig::load_layers(&[file.clone()], no_env);
        assert_eq!(load.warnings.len(), 1);
        assert!((load.config.routing.confidence_threshold - 0.4).abs() < f32::EPSILON);
        assert!(PolicyConfig::load_file(&file).is_err());
    }

    #[test]
    fn fingerprint_tracks_verdict_fields_only() {
        let base = PolicyConfig::default();
        let mut other = base.clone();
        other.cache_ttl_seconds = 1;
        assert_eq!(base.fingerprint(), other.fingerprint());
        other.strictness = Strictness::Strict;
        assert_ne!(base.fingerprint(), other.fingerprint());
    }

    #[test]
    fn effective_config_round_trips_through_toml() {
        let config = PolicyConfig {
            rule_sources: vec![RuleSource::Local {
                path: PathBuf::from("/rules.toml"),
            }],
            ..PolicyConfig::default()
        };
        let text = config.to_toml_string();
        assert!(text.contains("strictness = \"moderate\""));
        assert_eq!(PolicyConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn project_config_search_stops_at_repo_root() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let nested = repo.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(repo.join(".git")).unwrap();
        assert!(find_project_config(&nested).is_none());

        write(&repo, PROJECT_CONFIG_NAME, "strictness = \"strict\"\n");
        assert_eq!(find_project_config(&nested), Some(repo.join(PROJECT_CONFIG_NAME)));
    }
}
