//! System rules - power state, scheduled jobs, shell environment hijacks and
//! critical services.

use crate::domain_rule;
use crate::model::ShellSet;
use crate::rules::{FilterDefinition, RuleDefinition};

/// Create the system records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        domain_rule!(
            "power-off",
            System,
            SystemModification,
            r"(?:^|[;&|(]\s*)(?:shutdown|reboot|halt|poweroff)\b|\binit\s+[06]\b|\bsystemctl\s+(?:poweroff|reboot|halt|kexec)\b",
            "Shutting down or rebooting interrupts every user and service on the host"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["shutdown", "reboot", "halt", "poweroff", "init", "systemctl"])
        .filter(FilterDefinition::UnlessFlag("-c".to_string())),
        domain_rule!(
            "crontab-remove",
            System,
            SystemModification,
            r"\bcrontab\s+(?:-\S+\s+)*-[a-zA-Z]*r\b",
            "crontab -r deletes every scheduled job without a backup"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["crontab"])
        .suggestion("Run `crontab -l > crontab.bak` first, or edit with `crontab -e`"),
        domain_rule!(
            "path-clobber",
            System,
            SystemModification,
            r"\bexport\s+PATH=(?![^\s;&|]*\$\{?PATH\b)",
            "Replacing PATH without keeping $PATH hijacks every later command",
            Moderate
        )
        .shells(ShellSet::POSIX)
        .keywords(&["path="]),
        domain_rule!(
            "alias-core-command",
            System,
            SystemModification,
            r"\balias\s+(?:rm|ls|cd|sudo|cp|mv|cat|git)=",
            "Aliasing a core command changes what later commands actually run",
            Moderate
        )
        .shells(ShellSet::POSIX)
        .keywords(&["alias"]),
        domain_rule!(
            "stop-critical-service",
            System,
            SystemModification,
            r"\bsystemctl\s+(?:stop|disable|mask)\s+(?:\S+\s+)*?(?:sshd?|systemd-\S+|dbus|networking|NetworkManager|network)(?:\.service)?(?:\s|$)",
            "Stopping core services can cut off remote access to the host"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["systemctl"]),
        domain_rule!(
            "kernel-module-removal",
            System,
            SystemModification,
            r"\b(?:rmmod|modprobe\s+-r)\s+",
            "Unloading kernel modules can take down drivers still in use",
            Moderate
        )
        .shells(ShellSet::POSIX)
        .keywords(&["rmmod", "modprobe"]),
        domain_rule!(
            "history-wipe",
            System,
            SystemModification,
            r"\bhistory\s+-c\b|\bunset\s+HISTFILE\b|>\s*~/\.bash_history",
            "Clearing shell history erases the audit trail",
            Low
        )
        .shells(ShellSet::POSIX)
        .keywords(&["history", "histfile"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::builtin::test_helpers::{assert_fires, assert_not_fires, assert_quiet};

    #[test]
    fn power_state() {
        let rules = create_rules();
        assert_fires(&rules, "power-off", "shutdown -h now");
        assert_fires(&rules, "power-off", "sudo reboot");
        assert_fires(&rules, "power-off", "systemctl poweroff");
        assert_fires(&rules, "power-off", "init 0");
        assert_quiet(&rules, "cat shutdown.log");
    }

    #[test]
    fn environment_hijacks() {
        let rules = create_rules();
        assert_fires(&rules, "path-clobber", "export PATH=/tmp/evil");
        assert_not_fires(&rules, "path-clobber", "export PATH=$HOME/bin:$PATH");
        assert_not_fires(&rules, "path-clobber", "export PATH=\"${PATH}:/opt/bin\"");
        assert_fires(&rules, "alias-core-command", "alias rm='rm -rf'");
    }

    #[test]
    fn services_and_jobs() {
        let rules = create_rules();
        assert_fires(&rules, "crontab-remove", "crontab -r");
        assert_fires(&rules, "stop-critical-service", "systemctl stop sshd");
        assert_fires(&rules, "stop-critical-service", "sudo systemctl mask NetworkManager.service");
        assert_quiet(&rules, "systemctl restart nginx");
        assert_quiet(&rules, "crontab -l");
    }
}
