//! Core request and verdict types shared by every layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::impact::ImpactEstimate;

// ============================================================================
// Shell dialects
// ============================================================================

/// Shell dialect a candidate command is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellDialect {
    Sh,
    #[default]
    Bash,
    Zsh,
    Fish,
    #[serde(alias = "pwsh")]
    PowerShell,
    Cmd,
}

impl ShellDialect {
    pub const ALL: [Self; 6] = [
        Self::Sh,
        Self::Bash,
        Self::Zsh,
        Self::Fish,
        Self::PowerShell,
        Self::Cmd,
    ];

    /// True for the POSIX-style family (sh, bash, zsh, fish).
    #[must_use]
    pub const fn is_posix(self) -> bool {
        matches!(self, Self::Sh | Self::Bash | Self::Zsh | Self::Fish)
    }

    /// Windows dialects compare command names case-insensitively.
    #[must_use]
    pub const fn case_insensitive(self) -> bool {
        matches!(self, Self::PowerShell | Self::Cmd)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sh => "sh",
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
            Self::PowerShell => "powershell",
            Self::Cmd => "cmd",
        }
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for ShellDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellDialect {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sh" | "posix" | "dash" | "ksh" => Ok(Self::Sh),
            "bash" => Ok(Self::Bash),
            "zsh" => Ok(Self::Zsh),
            "fish" => Ok(Self::Fish),
            "powershell" | "pwsh" | "ps" => Ok(Self::PowerShell),
            "cmd" | "cmd.exe" | "batch" => Ok(Self::Cmd),
            _ => Err(UnknownValue::new("shell", s)),
        }
    }
}

/// Set of shell dialects a pattern applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShellSet(u8);

impl ShellSet {
    pub const ALL: Self = Self(0b11_1111);
    pub const POSIX: Self = Self(0b00_1111);
    pub const WINDOWS: Self = Self(0b11_0000);
    pub const POWERSHELL: Self = Self(0b01_0000);
    pub const CMD: Self = Self(0b10_0000);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, shell: ShellDialect) -> bool {
        self.0 & shell.bit() != 0
    }

    #[must_use]
    pub const fn with(self, shell: ShellDialect) -> Self {
        Self(self.0 | shell.bit())
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = ShellDialect> {
        ShellDialect::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl Default for ShellSet {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromIterator<ShellDialect> for ShellSet {
    fn from_iter<I: IntoIterator<Item = ShellDialect>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl Serialize for ShellSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

// ============================================================================
// Spans
// ============================================================================

/// Byte range into the raw command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.end <= self.start
    }

    /// Smallest span covering both.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    #[must_use]
    pub const fn shifted(self, by: usize) -> Self {
        Self {
            start: self.start + by,
            end: self.end + by,
        }
    }

    /// The covered text, or `None` if the span is out of bounds or splits a char.
    #[must_use]
    pub fn slice(self, text: &str) -> Option<&str> {
        text.get(self.start..self.end)
    }

    #[must_use]
    pub const fn fits(self, len: usize) -> bool {
        self.start <= self.end && self.end <= len
    }
}

// ============================================================================
// Risk levels and categories
// ============================================================================

/// Severity of a finding. Totally ordered; worst case wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Safe,
    Low,
    #[serde(alias = "medium")]
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// Advisory weight used for the aggregate score.
    #[must_use]
    pub const fn weight(self) -> f32 {
        match self {
            Self::Safe => 0.0,
            Self::Low => 1.0,
            Self::Moderate => 3.0,
            Self::High => 7.0,
            Self::Critical => 10.0,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "low" => Ok(Self::Low),
            "moderate" | "medium" => Ok(Self::Moderate),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(UnknownValue::new("risk level", s)),
        }
    }
}

/// What kind of damage a pattern guards against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FileDestruction,
    DiskOperation,
    PrivilegeEscalation,
    NetworkExposure,
    ProcessControl,
    SystemModification,
    PackageManagement,
    ContainerEscape,
    ResourceExhaustion,
    RemoteExecution,
    CredentialExposure,
    Other,
}

impl Category {
    /// Fallback advice when a pattern defines no suggestion of its own.
    #[must_use]
    pub const fn default_suggestion(self) -> Option<&'static str> {
        match self {
            Self::FileDestruction => Some(
                "Move files to a trash or temporary location instead of deleting them permanently",
            ),
            Self::DiskOperation => {
                Some("Double-check the target device and back up its data before writing to it")
            }
            Self::SystemModification | Self::PrivilegeEscalation => {
                Some("Back up the affected system files and test the change in a disposable environment first")
            }
            Self::NetworkExposure => {
                Some("Verify the target host and limit the exposure to the hosts that need it")
            }
            Self::RemoteExecution => {
                Some("Download the script, review it, then run it explicitly")
            }
            Self::PackageManagement => Some("Use `--dry-run` (or the tool's simulate flag) to preview changes"),
            Self::ProcessControl => Some("Target a specific PID or service name instead of a broad match"),
            Self::ContainerEscape => {
                Some("Grant only the specific capabilities or mounts the container needs")
            }
            Self::CredentialExposure => Some("Keep secrets out of command lines and world-readable files"),
            Self::ResourceExhaustion | Self::Other => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileDestruction => "file_destruction",
            Self::DiskOperation => "disk_operation",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::NetworkExposure => "network_exposure",
            Self::ProcessControl => "process_control",
            Self::SystemModification => "system_modification",
            Self::PackageManagement => "package_management",
            Self::ContainerEscape => "container_escape",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::RemoteExecution => "remote_execution",
            Self::CredentialExposure => "credential_exposure",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Domains
// ============================================================================

/// Coarse command intent used to scope which rules apply. Open for extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Domain {
    Filesystem,
    Network,
    Process,
    PackageManager,
    Permissions,
    System,
    Container,
    Generic,
    Other(String),
}

impl Domain {
    pub const BUILTIN: [Self; 8] = [
        Self::Filesystem,
        Self::Network,
        Self::Process,
        Self::PackageManager,
        Self::Permissions,
        Self::System,
        Self::Container,
        Self::Generic,
    ];

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Network => "network",
            Self::Process => "process",
            Self::PackageManager => "package-manager",
            Self::Permissions => "permissions",
            Self::System => "system",
            Self::Container => "container",
            Self::Generic => "generic",
            Self::Other(name) => name,
        }
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::Generic
    }
}

impl From<String> for Domain {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "filesystem" | "fs" => Self::Filesystem,
            "network" | "net" => Self::Network,
            "process" | "process-control" => Self::Process,
            "package-manager" | "packages" | "package" => Self::PackageManager,
            "permissions" | "permission" => Self::Permissions,
            "system" => Self::System,
            "container" | "containers" => Self::Container,
            "generic" | "" => Self::Generic,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<&str> for Domain {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Domain> for String {
    fn from(value: Domain) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for Domain {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A string did not name a known value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} {value:?}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A candidate command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Command {
    raw_text: String,
    shell: ShellDialect,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain_hint: Option<Domain>,
}

impl Command {
    #[must_use]
    pub fn new(raw_text: impl Into<String>, shell: ShellDialect) -> Self {
        Self {
            raw_text: raw_text.into(),
            shell,
            domain_hint: None,
        }
    }

    #[must_use]
    pub fn with_domain_hint(mut self, hint: Option<Domain>) -> Self {
        self.domain_hint = hint;
        self
    }

    #[must_use]
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    #[must_use]
    pub const fn shell(&self) -> ShellDialect {
        self.shell
    }

    #[must_use]
    pub const fn domain_hint(&self) -> Option<&Domain> {
        self.domain_hint.as_ref()
    }
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingSource {
    Heuristic,
    Model,
    Cache,
}

/// Domain routing for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingResult {
    pub primary: Domain,
    #[serde(default)]
    pub secondary: Vec<Domain>,
    pub confidence: f32,
    pub source: RoutingSource,
}

impl RoutingResult {
    /// Routing that carries no domain signal at all.
    #[must_use]
    pub const fn unscoped(source: RoutingSource) -> Self {
        Self {
            primary: Domain::Generic,
            secondary: Vec::new(),
            confidence: 0.0,
            source,
        }
    }

    #[must_use]
    pub fn is_unscoped(&self, threshold: f32) -> bool {
        self.confidence < threshold
    }
}

// ============================================================================
// Verdicts
// ============================================================================

/// Which layer produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLayer {
    EarlyGate,
    GlobalCritical,
    Domain,
    Structural,
}

impl MatchLayer {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EarlyGate => "early-gate",
            Self::GlobalCritical => "global-critical",
            Self::Domain => "domain",
            Self::Structural => "structural",
        }
    }
}

/// One pattern that fired, with the raw-text span it fired on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub pattern_id: String,
    pub span: Span,
    pub matched_text: String,
    pub message: String,
    pub severity: RiskLevel,
    pub category: Category,
    pub layer: MatchLayer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    EarlyExit,
    RuleEngine,
    Cache,
}

/// Outcome of the best-effort parse.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParseStatus {
    Parsed,
    Incomplete {
        reason: String,
        offset: usize,
    },
    #[default]
    Skipped,
}

/// Observability details that do not affect the verdict fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_reasons: Vec<String>,
    pub unscoped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingResult>,
    pub parse: ParseStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains_checked: Vec<Domain>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirmation_reasons: Vec<String>,
    pub ruleset_generation: u64,
    pub elapsed_us: u64,
    /// Advisory estimate of what running the command would touch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactEstimate>,
}

/// The verdict returned for every validation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub risk_level: RiskLevel,
    pub matched: Vec<RuleMatch>,
    pub blocked: bool,
    pub requires_confirmation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub score: f32,
    pub source: VerdictSource,
    pub diagnostics: Diagnostics,
}

impl ValidationResult {
    #[must_use]
    pub fn is_safe(&self) -> bool {
        self.risk_level == RiskLevel::Safe && !self.blocked
    }

    /// True if `pattern_id` fired.
    #[must_use]
    pub fn has_match(&self, pattern_id: &str) -> bool {
        self.matched.iter().any(|m| m.pattern_id == pattern_id)
    }

    /// Compare the verdict fields, ignoring where the verdict came from and
    /// how long it took.
    #[must_use]
    pub fn same_verdict(&self, other: &Self) -> bool {
        self.risk_level == other.risk_level
            && self.matched == other.matched
            && self.blocked == other.blocked
            && self.requires_confirmation == other.requires_confirmation
            && self.suggestion == other.suggestion
            && self.suggestions == other.suggestions
            && (self.score - other.score).abs() < f32::EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Moderate);
        assert!(RiskLevel::Moderate > RiskLevel::Low);
        assert!(RiskLevel::Low > RiskLevel::Safe);
        assert_eq!("medium".parse::<RiskLevel>(), Ok(RiskLevel::Moderate));
    }

    #[test]
    fn shell_set_membership() {
        assert!(ShellSet::POSIX.contains(ShellDialect::Zsh));
        assert!(!ShellSet::POSIX.contains(ShellDialect::PowerShell));
        assert!(ShellSet::WINDOWS.contains(ShellDialect::Cmd));
        assert_eq!(ShellSet::ALL.iter().count(), 6);

        let set: ShellSet = [ShellDialect::Bash, ShellDialect::Cmd].into_iter().collect();
        assert!(set.contains(ShellDialect::Bash));
        assert!(!set.contains(ShellDialect::Sh));
    }

    #[test]
    fn shell_names_parse_case_insensitively() {
        assert_eq!("PWSH".parse::<ShellDialect>(), Ok(ShellDialect::PowerShell));
        assert_eq!("cmd.exe".parse::<ShellDialect>(), Ok(ShellDialect::Cmd));
        assert!("tcsh".parse::<ShellDialect>().is_err());
    }

    #[test]
    fn domain_round_trips_through_strings() {
        assert_eq!(Domain::from("package_manager"), Domain::PackageManager);
        assert_eq!(Domain::from("Kubernetes"), Domain::Other("kubernetes".into()));
        let json = serde_json::to_string(&Domain::PackageManager).unwrap();
        assert_eq!(json, "\"package-manager\"");
        let back: Domain = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Domain::PackageManager);
    }

    #[test]
    fn span_helpers() {
        let text = "rm -rf /";
        let span = Span::new(3, 6);
        assert_eq!(span.slice(text), Some("-rf"));
        assert_eq!(span.join(Span::new(7, 8)), Span::new(3, 8));
        assert!(span.fits(text.len()));
        assert!(!Span::new(4, 20).fits(text.len()));
    }

    #[test]
    fn command_is_immutable_value() {
        let cmd = Command::new("ls", ShellDialect::Bash).with_domain_hint(Some(Domain::Filesystem));
        assert_eq!(cmd.raw_text(), "ls");
        assert_eq!(cmd.domain_hint(), Some(&Domain::Filesystem));
    }

    #[test]
    fn every_destructive_category_has_advice() {
        assert!(Category::FileDestruction.default_suggestion().is_some());
        assert!(Category::RemoteExecution.default_suggestion().is_some());
        assert!(Category::Other.default_suggestion().is_none());
    }
}
