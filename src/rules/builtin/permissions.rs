//! Permission rules - world-writable modes, setuid bits, ownership of system
//! paths and privilege configuration.

use crate::domain_rule;
use crate::model::ShellSet;
use crate::rules::RuleDefinition;

/// Create the permission records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        domain_rule!(
            "chmod-world-writable-system",
            Permissions,
            PrivilegeEscalation,
            r"\bchmod\s+(?:-\S+\s+)*(?:0?777|[ao]?\+rwx|o\+w|a\+w)\s+(?:\S+\s+)*?/(?:etc|usr|bin|sbin|boot|lib|lib64|var|root|dev)(?:/|\s|$)",
            "Making system files world-writable lets any user tamper with them"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["chmod"]),
        domain_rule!(
            "chmod-world-writable",
            Permissions,
            PrivilegeEscalation,
            r"\bchmod\s+(?:-\S+\s+)*(?:0?777|a\+rwx)(?:\s|$)",
            "Mode 777 lets every user modify and execute the target",
            Moderate
        )
        .shells(ShellSet::POSIX)
        .keywords(&["chmod"])
        .filter(crate::rules::FilterDefinition::unless_path_under(&["/tmp", "/var/tmp"])),
        domain_rule!(
            "chmod-setuid",
            Permissions,
            PrivilegeEscalation,
            r"\bchmod\s+(?:-\S+\s+)*(?:[ugo]*\+[rwx]*s|[2467][0-7]{3})\s",
            "Setting setuid/setgid bits lets programs run with elevated privileges",
            Moderate
        )
        .shells(ShellSet::POSIX)
        .keywords(&["chmod"]),
        domain_rule!(
            "chown-system-path",
            Permissions,
            PrivilegeEscalation,
            r"\bch(?:own|grp)\s+(?:-\S+\s+)*\S+\s+(?:\S+\s+)*?/(?:etc|usr|bin|sbin|boot|lib|lib64)(?:/|\s|$)",
            "Changing ownership of system paths can break services or grant access"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["chown", "chgrp"]),
        domain_rule!(
            "sudoers-write",
            Permissions,
            PrivilegeEscalation,
            r"(?:>>?\s*|\btee\s+(?:-a\s+)?)/etc/sudoers\b",
            "Writing to sudoers directly can grant root or lock out administrators"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["sudoers"])
        .suggestion("Edit sudoers with `visudo`, which validates the syntax"),
        domain_rule!(
            "root-shell",
            Permissions,
            PrivilegeEscalation,
            r"(?:^|[;&|(]\s*)su(?:\s+-|\s+root|\s+-l)?\s*(?:$|[;&|)])",
            "Opening a root shell bypasses per-command review",
            Moderate
        )
        .shells(ShellSet::POSIX)
        .keywords(&["su"]),
        domain_rule!(
            "passwordless-sudo",
            Permissions,
            PrivilegeEscalation,
            r"NOPASSWD\s*:\s*ALL",
            "Passwordless sudo for every command removes the last privilege check"
        )
        .keywords(&["nopasswd"]),
    ]
}
