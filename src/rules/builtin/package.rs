//! Package manager rules - removal of essential packages and installs that
//! bypass the system package database.

use crate::domain_rule;
use crate::model::ShellSet;
use crate::rules::{FilterDefinition, RuleDefinition};

/// Create the package-manager records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        domain_rule!(
            "remove-essential-package",
            PackageManager,
            PackageManagement,
            r"\b(?:apt|apt-get|aptitude|yum|dnf|zypper|pacman)\s+(?:\S+\s+)*?(?:remove|purge|erase|autoremove|-R\w*)\s+(?:\S+\s+)*?(?:libc6|glibc|systemd|coreutils|bash|sudo|openssh-server|linux-image\S*|kernel|grub\S*|python3)(?:\s|$)",
            "Removing essential packages can leave the system unbootable"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["apt", "yum", "dnf", "zypper", "pacman"])
        .filter(FilterDefinition::UnlessFlag("--simulate".to_string()))
        .filter(FilterDefinition::UnlessFlag("--dry-run".to_string())),
        domain_rule!(
            "rpm-force-erase",
            PackageManager,
            PackageManagement,
            r"\brpm\s+(?:\S+\s+)*?-e\s+(?:\S+\s+)*?--nodeps\b|\bdpkg\s+(?:\S+\s+)*?--force-(?:remove-essential|depends|all)\b",
            "Forcing removal past dependency checks breaks dependent packages"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["rpm", "dpkg"]),
        domain_rule!(
            "pip-break-system-packages",
            PackageManager,
            PackageManagement,
            r"\bpip[0-9.]*\s+install\s+(?:\S+\s+)*?--break-system-packages\b",
            "Installing over the system Python can break OS tools that depend on it",
            Moderate
        )
        .shells(ShellSet::POSIX)
        .keywords(&["pip"])
        .suggestion("Use a virtual environment (`python3 -m venv .venv`) or pipx"),
        domain_rule!(
            "untrusted-package-source",
            PackageManager,
            PackageManagement,
            r"\b(?:pip[0-9.]*\s+install\s+(?:\S+\s+)*?(?:--index-url|-i|--extra-index-url)[\s=]+http://|npm\s+(?:\S+\s+)*?--registry[\s=]+http://|apt-key\s+add\b|--allow-unauthenticated\b|--nogpgcheck\b)",
            "Installing from unauthenticated sources lets anyone on the path inject code",
            Moderate
        )
        .shells(ShellSet::POSIX),
        domain_rule!(
            "npm-unsafe-global",
            PackageManager,
            PackageManagement,
            r"\bnpm\s+(?:\S+\s+)*?(?:-g|--global)\s+(?:\S+\s+)*?--unsafe-perm\b",
            "Global npm installs with --unsafe-perm run package scripts as root",
            Moderate
        )
        .keywords(&["npm"]),
    ]
}
