//! Rule-based impact estimate: how far a command reaches and what it can undo.
//!
//! The estimate is advisory. It never changes the verdict; it fills
//! [`Diagnostics::impact`](crate::model::Diagnostics) from the normalized
//! view and the rules that fired.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::COMMAND_TABLES;
use crate::model::{Category, RuleMatch};
use crate::normalize::{MatchView, Segment};

/// Score cap, matching the scorer.
const MAX_RISK_SCORE: f32 = 10.0;

const SYSTEM_PREFIXES: &[&str] = &[
    "/usr", "/bin", "/sbin", "/etc", "/sys", "/boot", "/lib", "/lib64", "/var", "/opt", "/proc",
    "/dev",
];

const WINDOWS_SYSTEM_PREFIXES: &[&str] = &["c:\\windows", "c:\\program files", "%systemroot%"];

const HOME_PREFIXES: &[&str] = &["~", "$HOME", "${HOME}", "/home/", "/root", "/Users/"];

const DISK_COMMANDS: &[&str] = &[
    "dd", "mkfs", "fdisk", "parted", "lvm", "mdadm", "mount", "umount", "fsck", "e2fsck", "wipefs",
    "format", "diskpart",
];

const NETWORK_COMMANDS: &[&str] = &[
    "ssh", "scp", "rsync", "ftp", "telnet", "nmap", "iptables", "firewall-cmd", "ufw", "netcat",
];

// ============================================================================
// Types
// ============================================================================

/// Privilege the command runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeLevel {
    #[default]
    User,
    /// `sudo`, `doas`.
    Elevated,
    /// `su`.
    Root,
}

/// Widest set of targets a command names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetScope {
    #[default]
    SingleFile,
    /// Wildcards in the current directory.
    LocalFiles,
    Recursive,
    /// The user's home directory.
    Home,
    Network,
    /// `/usr`, `/etc`, `C:\Windows` and the like.
    System,
    /// The filesystem root.
    Root,
}

impl TargetScope {
    const fn rank(self) -> u8 {
        match self {
            Self::SingleFile => 0,
            Self::LocalFiles => 1,
            Self::Recursive => 2,
            Self::Home => 3,
            Self::Network => 4,
            Self::System => 5,
            Self::Root => 6,
        }
    }

    fn widest(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }
}

/// How far the damage of a command reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlastRadius {
    /// Current directory only.
    #[default]
    Local,
    Project,
    /// The user's home directory.
    User,
    System,
    Network,
}

impl From<TargetScope> for BlastRadius {
    fn from(scope: TargetScope) -> Self {
        match scope {
            TargetScope::SingleFile | TargetScope::LocalFiles => Self::Local,
            TargetScope::Recursive => Self::Project,
            TargetScope::Home => Self::User,
            TargetScope::System | TargetScope::Root => Self::System,
            TargetScope::Network => Self::Network,
        }
    }
}

impl fmt::Display for BlastRadius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local (current directory)",
            Self::Project => "project (directory tree)",
            Self::User => "user (home directory)",
            Self::System => "system (system-wide)",
            Self::Network => "network (external resources)",
        })
    }
}

/// One named reason the command is risky.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// 0.0 to 1.0.
    pub severity: f32,
    pub explanation: String,
}

impl RiskFactor {
    fn new(name: &str, severity: f32, explanation: &str) -> Self {
        Self {
            name: name.to_string(),
            severity,
            explanation: explanation.to_string(),
        }
    }
}

/// What running the command would do.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImpactEstimate {
    pub blast_radius: BlastRadius,
    pub target_scope: TargetScope,
    pub privilege: PrivilegeLevel,
    /// 0.0 to 1.0.
    pub data_loss_risk: f32,
    pub reversible: bool,
    /// 0.0 to 10.0.
    pub risk_score: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub factors: Vec<RiskFactor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mitigations: Vec<String>,
}

// ============================================================================
// Features
// ============================================================================

/// Facts about the whole command, merged over its segments.
#[derive(Debug, Default)]
struct Features {
    destructive: f32,
    privilege: PrivilegeLevel,
    scope: TargetScope,
    recursive_force: bool,
    recursive: bool,
    force: bool,
    wildcard: bool,
    system_path: bool,
    root_path: bool,
    disk: bool,
    disk_wipe: bool,
    shred_or_dd: bool,
    world_writable: bool,
    starts_with_rm: bool,
}

/// Base weight of a command that deletes or rewrites data.
fn destructive_weight(command: &str) -> f32 {
    match command {
        "rm" | "remove-item" => 0.7,
        "dd" => 0.9,
        "fdisk" => 0.8,
        "format" => 1.0,
        "del" | "erase" | "rd" | "rmdir" => 0.6,
        "truncate" => 0.5,
        "shred" => 0.8,
        "chmod" | "chown" | "chgrp" => 0.3,
        c if c == "mkfs" || c.starts_with("mkfs.") => 1.0,
        _ => 0.0,
    }
}

fn is_disk_command(command: &str) -> bool {
    DISK_COMMANDS.contains(&command) || command.starts_with("mkfs.")
}

/// `-rf`, `-Rf`, `--recursive`, PowerShell `-Recurse`.
fn short_cluster(arg: &str) -> Option<&str> {
    let rest = arg.strip_prefix('-')?;
    (!rest.starts_with('-') && !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphabetic()))
        .then_some(rest)
}

fn is_recursive_flag(arg: &str) -> bool {
    let lowered = arg.to_ascii_lowercase();
    if matches!(lowered.as_str(), "--recursive" | "-recurse" | "/s") {
        return true;
    }
    short_cluster(arg).is_some_and(|cluster| cluster.len() <= 4 && cluster.contains(['r', 'R']))
}

fn is_force_flag(arg: &str) -> bool {
    let lowered = arg.to_ascii_lowercase();
    if matches!(lowered.as_str(), "--force" | "-force" | "/q" | "/f") {
        return true;
    }
    short_cluster(arg).is_some_and(|cluster| cluster.len() <= 4 && cluster.contains(['f', 'F']))
}

fn is_root_path(arg: &str) -> bool {
    matches!(arg, "/" | "/*") || {
        let lowered = arg.to_ascii_lowercase();
        lowered.len() <= 4
            && lowered.as_bytes().first().is_some_and(u8::is_ascii_alphabetic)
            && matches!(&lowered[1..], ":" | ":\\" | ":/" | ":\\*")
    }
}

fn is_system_path(arg: &str) -> bool {
    let lowered = arg.to_ascii_lowercase();
    SYSTEM_PREFIXES
        .iter()
        .any(|p| arg == *p || arg.strip_prefix(p).is_some_and(|rest| rest.starts_with('/')))
        || WINDOWS_SYSTEM_PREFIXES.iter().any(|p| lowered.starts_with(p))
}

impl Features {
    fn extract(view: &MatchView) -> Self {
        let mut features = Self::default();
        let lowered = view.text().to_ascii_lowercase();
        for (i, segment) in view.segments().iter().filter(|s| !s.command.is_empty()).enumerate() {
            features.add_segment(view, segment, i == 0);
        }
        if lowered.contains("drop database") || lowered.contains("drop table") {
            features.destructive = features.destructive.max(0.9);
        }
        if lowered.contains("truncate table") {
            features.destructive = features.destructive.max(0.7);
        }
        features
    }

    fn add_segment(&mut self, view: &MatchView, segment: &Segment, first: bool) {
        let command = segment.command.as_str();
        let args: Vec<&str> = segment
            .args
            .iter()
            .filter_map(|range| view.text().get(range.clone()))
            .collect();

        if command == "su" {
            self.privilege = self.privilege.max(PrivilegeLevel::Root);
        } else if segment.elevated {
            self.privilege = self.privilege.max(PrivilegeLevel::Elevated);
        }

        let recursive = args.iter().any(|a| is_recursive_flag(a));
        let force = args.iter().any(|a| is_force_flag(a));
        let base = destructive_weight(command);
        let mut scope = TargetScope::SingleFile;

        if base > 0.0 {
            let mut score = base;
            if force {
                score += 0.2;
            }
            if recursive {
                score += 0.2;
            }
            self.destructive = self.destructive.max(score.min(1.0));
            self.recursive |= recursive;
            self.force |= force;
            self.recursive_force |= recursive && force;
            self.starts_with_rm |= first && command == "rm";
            if recursive {
                scope = TargetScope::Recursive;
            }
        }
        if matches!(command, "shred" | "dd") {
            self.shred_or_dd = true;
        }
        if is_disk_command(command) {
            self.disk = true;
        }
        if command == "dd"
            && args.iter().any(|a| {
                matches!(*a, "if=/dev/zero" | "if=/dev/random" | "if=/dev/urandom")
            })
        {
            self.disk_wipe = true;
        }
        if command == "chmod" && recursive && args.iter().any(|a| a.ends_with("777")) {
            self.world_writable = true;
        }

        for arg in args.iter().filter(|a| !a.starts_with('-')) {
            let target = arg.rsplit_once('=').map_or(*arg, |(_, value)| value);
            if target.contains(['*', '?']) {
                self.wildcard = true;
                scope = scope.widest(TargetScope::LocalFiles);
            }
            if target.contains("://") {
                scope = scope.widest(TargetScope::Network);
            }
            if HOME_PREFIXES.iter().any(|p| target.starts_with(p)) {
                scope = scope.widest(TargetScope::Home);
            }
            if is_system_path(target) {
                self.system_path = true;
                scope = scope.widest(TargetScope::System);
            }
            if is_root_path(target) {
                self.root_path = true;
                scope = scope.widest(TargetScope::Root);
            }
        }
        if COMMAND_TABLES.is_fetcher(command) || NETWORK_COMMANDS.contains(&command) {
            scope = scope.widest(TargetScope::Network);
        }
        self.scope = self.scope.widest(scope);
    }
}

// ============================================================================
// Predictor
// ============================================================================

/// Estimates impact from fixed rules over command features.
#[derive(Debug, Clone)]
pub struct RuleBasedPredictor {
    max_risk_score: f32,
}

impl Default for RuleBasedPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBasedPredictor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_risk_score: MAX_RISK_SCORE,
        }
    }

    /// Estimate the impact of the command behind `view`, given the rules
    /// that fired on it.
    #[must_use]
    pub fn estimate(&self, view: &MatchView, matches: &[RuleMatch]) -> ImpactEstimate {
        let features = Features::extract(view);
        let factors = risk_factors(&features, matches);
        let data_loss_risk = match features.destructive {
            d if d > 0.7 => 0.9,
            d if d > 0.4 => 0.6,
            d if d > 0.1 => 0.3,
            _ => 0.0,
        };
        ImpactEstimate {
            blast_radius: features.scope.into(),
            target_scope: features.scope,
            privilege: features.privilege,
            data_loss_risk,
            reversible: !features.disk && data_loss_risk < 0.7 && !features.shred_or_dd,
            risk_score: self.risk_score(&factors, &features),
            mitigations: mitigations(&features, &factors),
            factors,
        }
    }

    fn risk_score(&self, factors: &[RiskFactor], features: &Features) -> f32 {
        if factors.is_empty() {
            return 0.0;
        }
        let max_severity = factors.iter().map(|f| f.severity).fold(0.0_f32, f32::max);
        let mut score = max_severity * 8.0;
        score += match features.privilege {
            PrivilegeLevel::Root => 1.0,
            PrivilegeLevel::Elevated => 0.5,
            PrivilegeLevel::User => 0.0,
        };
        score += match features.scope {
            TargetScope::Root => 1.5,
            TargetScope::System => 1.0,
            _ => 0.0,
        };
        if features.recursive_force {
            score += 0.5;
        }
        score.min(self.max_risk_score)
    }
}

fn risk_factors(features: &Features, matches: &[RuleMatch]) -> Vec<RiskFactor> {
    let mut factors = Vec::new();
    if features.recursive_force {
        let severity = match features.scope {
            TargetScope::Root => 1.0,
            TargetScope::System => 0.95,
            _ => 0.7,
        };
        factors.push(RiskFactor::new(
            "Recursive forced deletion",
            severity,
            "Deletes files recursively without asking for confirmation",
        ));
    }
    match features.privilege {
        PrivilegeLevel::Elevated => factors.push(RiskFactor::new(
            "Elevated privileges",
            0.6,
            "Runs with administrator privileges",
        )),
        PrivilegeLevel::Root => factors.push(RiskFactor::new(
            "Root privileges",
            0.8,
            "Runs as the root user",
        )),
        PrivilegeLevel::User => {}
    }
    if features.system_path && features.destructive > 0.3 {
        factors.push(RiskFactor::new(
            "System path modification",
            0.9,
            "Modifies critical system directories",
        ));
    }
    if features.root_path && features.destructive > 0.5 {
        factors.push(RiskFactor::new(
            "Root filesystem operation",
            1.0,
            "Operates on the root of the filesystem",
        ));
    }
    if features.disk {
        factors.push(RiskFactor::new(
            "Disk operation",
            0.85,
            "Performs low-level disk or filesystem operations",
        ));
    }
    if features.disk_wipe {
        factors.push(RiskFactor::new(
            "Disk wipe",
            1.0,
            "Overwrites a target with zeros or random data",
        ));
    }
    if matches.iter().any(|m| m.category == Category::ResourceExhaustion) {
        factors.push(RiskFactor::new(
            "Fork bomb",
            1.0,
            "Spawns processes until the system stops responding",
        ));
    }
    if features.destructive > 0.7 {
        let severity = if features.wildcard { 0.8 } else { 0.6 };
        factors.push(RiskFactor::new(
            "High data loss risk",
            severity,
            "May cause data loss that cannot be undone",
        ));
    }
    if features.world_writable {
        factors.push(RiskFactor::new(
            "Insecure permissions",
            0.7,
            "Makes files world-writable recursively",
        ));
    }
    factors
}

fn mitigations(features: &Features, factors: &[RiskFactor]) -> Vec<String> {
    let mut out = Vec::new();
    if features.destructive > 0.5 && features.starts_with_rm {
        out.push("List the targets with `ls` first to preview what will be deleted".to_string());
        out.push("Use `rm -i` to confirm each deletion".to_string());
    }
    if features.force && features.destructive > 0.5 {
        out.push("Drop the force flag to keep confirmations and error messages".to_string());
    }
    if features.wildcard || features.recursive {
        out.push("Name the files instead of using wildcards or recursion".to_string());
    }
    if features.privilege != PrivilegeLevel::User && !factors.is_empty() {
        out.push("Check whether elevated privileges are needed".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MatchLayer, RiskLevel, ShellDialect, Span};

    fn estimate(raw: &str) -> ImpactEstimate {
        let view = MatchView::build(raw, ShellDialect::Bash);
        RuleBasedPredictor::new().estimate(&view, &[])
    }

    fn factor_names(impact: &ImpactEstimate) -> Vec<&str> {
        impact.factors.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn listing_has_no_impact() {
        let impact = estimate("ls -la");
        assert!(impact.factors.is_empty());
        assert_eq!(impact.blast_radius, BlastRadius::Local);
        assert!(impact.reversible);
        assert!(impact.risk_score.abs() < f32::EPSILON);
        assert!(impact.data_loss_risk.abs() < f32::EPSILON);
    }

    #[test]
    fn rm_rf_root_reaches_the_system() {
        let impact = estimate("sudo rm -rf /");
        assert_eq!(impact.target_scope, TargetScope::Root);
        assert_eq!(impact.blast_radius, BlastRadius::System);
        assert_eq!(impact.privilege, PrivilegeLevel::Elevated);
        assert!(!impact.reversible);
        assert!((impact.data_loss_risk - 0.9).abs() < f32::EPSILON);
        assert!((impact.risk_score - MAX_RISK_SCORE).abs() < f32::EPSILON);
        let names = factor_names(&impact);
        assert!(names.contains(&"Recursive forced deletion"));
        assert!(names.contains(&"Root filesystem operation"));
        assert!(names.contains(&"Elevated privileges"));
    }

    #[test]
    fn blast_radius_follows_the_targets() {
        assert_eq!(estimate("rm notes.txt").blast_radius, BlastRadius::Local);
        assert_eq!(estimate("rm *.log").target_scope, TargetScope::LocalFiles);
        assert_eq!(estimate("rm -r build").blast_radius, BlastRadius::Project);
        assert_eq!(estimate("rm -rf ~/Documents").blast_radius, BlastRadius::User);
        assert_eq!(estimate("rm -rf /etc/nginx").blast_radius, BlastRadius::System);
        assert_eq!(estimate("curl -o x https://example.com/x").blast_radius, BlastRadius::Network);
    }

    #[test]
    fn quoted_paths_are_not_targets() {
        let impact = estimate(r#"grep -r "rm -rf /" ."#);
        assert_eq!(impact.target_scope, TargetScope::SingleFile);
        assert!(impact.factors.is_empty());
    }

    #[test]
    fn disk_tools_are_irreversible() {
        let impact = estimate("dd if=/dev/zero of=/dev/sda bs=1M");
        assert!(!impact.reversible);
        let names = factor_names(&impact);
        assert!(names.contains(&"Disk operation"));
        assert!(names.contains(&"Disk wipe"));

        assert!(!estimate("shred -u secrets.txt").reversible);
        assert!(!estimate("mkfs.ext4 /dev/sdb1").reversible);
    }

    #[test]
    fn su_is_root() {
        let impact = estimate("su -c 'rm -rf /var/lib/app'");
        assert_eq!(impact.privilege, PrivilegeLevel::Root);
        assert!(factor_names(&impact).contains(&"Root privileges"));
    }

    #[test]
    fn fork_bomb_factor_comes_from_the_rules() {
        let view = MatchView::build(":(){ :|:& };:", ShellDialect::Bash);
        let fork = RuleMatch {
            pattern_id: "fork-bomb".to_string(),
            span: Span::new(0, 13),
            matched_text: ":(){ :|:& };:".to_string(),
            message: "fork bomb".to_string(),
            severity: RiskLevel::Critical,
            category: Category::ResourceExhaustion,
            layer: MatchLayer::GlobalCritical,
            domain: None,
            weight: 1.0,
            suggestion: None,
        };
        let impact = RuleBasedPredictor::new().estimate(&view, &[fork]);
        assert!(factor_names(&impact).contains(&"Fork bomb"));
        assert!(impact.risk_score >= 8.0);
    }

    #[test]
    fn recursive_chmod_777_is_flagged() {
        let impact = estimate("chmod -R 777 /var/www");
        assert!(factor_names(&impact).contains(&"Insecure permissions"));
        assert!(impact.reversible);
    }

    #[test]
    fn mitigations_follow_the_features() {
        let impact = estimate("rm -rf ./build/*");
        assert!(impact.mitigations.iter().any(|m| m.contains("rm -i")));
        assert!(impact.mitigations.iter().any(|m| m.contains("force flag")));
        assert!(estimate("ls").mitigations.is_empty());
    }

    #[test]
    fn impact_serializes_snake_case() {
        let json = serde_json::to_value(estimate("sudo rm -rf /")).unwrap();
        assert_eq!(json["blast_radius"], "system");
        assert_eq!(json["target_scope"], "root");
        assert_eq!(json["privilege"], "elevated");
        assert_eq!(json["reversible"], false);
    }
}
