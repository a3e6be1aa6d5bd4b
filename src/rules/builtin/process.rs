//! Process rules - signals to every process, init, or whole service trees.

use crate::domain_rule;
use crate::model::ShellSet;
use crate::rules::RuleDefinition;

/// Create the process-control records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        domain_rule!(
            "kill-all-processes",
            Process,
            ProcessControl,
            r"\bkill\s+(?:-\S+\s+)*-1(?:\s|$|[;&|)])",
            "kill -1 signals every process the user can reach"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["kill"]),
        domain_rule!(
            "kill-init",
            Process,
            ProcessControl,
            r"\bkill\s+(?:-\S+\s+)*1(?:\s|$|[;&|)])",
            "Killing PID 1 brings down the whole system"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["kill"]),
        domain_rule!(
            "kill-system-daemons",
            Process,
            ProcessControl,
            r"\b(?:killall|pkill)\s+(?:-\S+\s+)*(?:-u\s+root\b|(?:systemd|init|sshd|dockerd|containerd|kubelet)(?:\s|$))",
            "Killing core daemons drops remote access or running workloads"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["killall", "pkill"]),
        domain_rule!(
            "killall-broad",
            Process,
            ProcessControl,
            r"\bkillall5?\b",
            "killall matches every process with that name",
            Moderate
        )
        .shells(ShellSet::POSIX)
        .keywords(&["killall"]),
        domain_rule!(
            "ps-stop-all-processes",
            Process,
            ProcessControl,
            r"(?i)\b(?:get-process|gps|ps)\s*\|\s*(?:stop-process|kill|spps)\b",
            "Piping every process into Stop-Process kills the session"
        )
        .shells(ShellSet::POWERSHELL),
        domain_rule!(
            "taskkill-system",
            Process,
            ProcessControl,
            r"(?i)\btaskkill\b[^&|\n]*/im\s+(?:csrss|wininit|winlogon|lsass|svchost|services)(?:\.exe)?\b",
            "Killing core Windows processes crashes the system"
        )
        .shells(ShellSet::WINDOWS),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShellDialect;
    use crate::rules::builtin::test_helpers::{assert_fires, assert_fires_in, assert_quiet};

    #[test]
    fn signals_to_everything() {
        let rules = create_rules();
        assert_fires(&rules, "kill-all-processes", "kill -9 -1");
        assert_fires(&rules, "kill-init", "sudo kill -9 1");
        assert_fires(&rules, "kill-system-daemons", "pkill -9 sshd");
        assert_fires(&rules, "kill-system-daemons", "killall -u root");
        assert_quiet(&rules, "kill -9 12345");
        assert_quiet(&rules, "kill -TERM 4242");
    }

    #[test]
    fn windows_process_control() {
        let rules = create_rules();
        assert_fires_in(
            &rules,
            "ps-stop-all-processes",
            "Get-Process | Stop-Process -Force",
            ShellDialect::PowerShell,
        );
        assert_fires_in(&rules, "taskkill-system", "taskkill /f /im lsass.exe", ShellDialect::Cmd);
    }
}
