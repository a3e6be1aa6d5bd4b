//! Windows rules - PowerShell and cmd.exe equivalents of the POSIX rules,
//! plus obfuscated PowerShell payloads.
//!
//! Command words are lowercased in the match view for these dialects, but
//! arguments keep their case, so every pattern is case-insensitive.

use crate::domain_rule;
use crate::model::ShellSet;
use crate::rules::RuleDefinition;

/// Create the Windows records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        domain_rule!(
            "ps-remove-recurse-force",
            Filesystem,
            FileDestruction,
            r"(?i)\b(?:remove-item|ri|rm|del|erase|rd|rmdir)\b[^;|&\n]*(?:\s-r(?:ecurse)?\b[^;|&\n]*\s-fo(?:rce)?\b|\s-fo(?:rce)?\b[^;|&\n]*\s-r(?:ecurse)?\b)",
            "Remove-Item -Recurse -Force deletes without confirmation",
            Moderate
        )
        .shells(ShellSet::POWERSHELL),
        domain_rule!(
            "ps-remove-system-path",
            Filesystem,
            FileDestruction,
            r"(?i)\b(?:remove-item|ri|rm|del|erase|rd|rmdir)\b[^;|&\n]*\s[a-z]:\\(?:windows|program files(?: \(x86\))?|programdata|users)\\?(?:\s|$|[;|&])",
            "Deleting a Windows system directory breaks the installation"
        )
        .shells(ShellSet::WINDOWS),
        domain_rule!(
            "cmd-recursive-delete",
            Filesystem,
            FileDestruction,
            r"(?i)\b(?:del|erase|rd|rmdir)\b[^&|\n]*\s/s\b[^&|\n]*\s/q\b|\b(?:del|erase|rd|rmdir)\b[^&|\n]*\s/q\b[^&|\n]*\s/s\b",
            "Quiet recursive delete removes whole trees without prompting",
            Moderate
        )
        .shells(ShellSet::CMD),
        domain_rule!(
            "execution-policy-bypass",
            System,
            SystemModification,
            r"(?i)\bset-executionpolicy\s+(?:-\S+\s+)*(?:unrestricted|bypass)\b",
            "Lifting the execution policy lets any script run unsigned"
        )
        .shells(ShellSet::POWERSHELL),
        domain_rule!(
            "powershell-encoded-command",
            Generic,
            RemoteExecution,
            r"(?i)\b(?:powershell|pwsh)(?:\.exe)?\s+(?:\S+\s+)*?-(?:e|ec|en|enc|enco|encodedcommand)\s+[A-Za-z0-9+/=]{8,}",
            "An encoded PowerShell payload hides the commands it runs"
        )
        .keywords(&["powershell", "pwsh"]),
        domain_rule!(
            "registry-delete-machine",
            System,
            SystemModification,
            r"(?i)\breg(?:\.exe)?\s+delete\s+(?:hklm|hkey_local_machine)\\|\bremove-item\b[^;|&\n]*hklm:\\",
            "Deleting machine-wide registry keys can break Windows and installed software"
        )
        .shells(ShellSet::WINDOWS),
        domain_rule!(
            "boot-configuration",
            System,
            DiskOperation,
            r"(?i)\b(?:bcdedit(?:\.exe)?\s+/(?:delete|set|deletevalue)|diskpart)\b",
            "Editing boot configuration or partitions can leave the machine unbootable"
        )
        .shells(ShellSet::WINDOWS),
        domain_rule!(
            "ps-power-off",
            System,
            SystemModification,
            r"(?i)\b(?:stop-computer|restart-computer)\b|\bshutdown(?:\.exe)?\s+(?:\S+\s+)*?/[srp]\b",
            "Shutting down or restarting interrupts every user and service"
        )
        .shells(ShellSet::WINDOWS),
        domain_rule!(
            "defender-disable",
            System,
            SystemModification,
            r"(?i)\bset-mppreference\b[^;|&\n]*-disable(?:realtimemonitoring|behaviormonitoring|ioavprotection)\s+(?:\$true|1)\b",
            "Disabling Defender protection removes malware scanning"
        )
        .shells(ShellSet::POWERSHELL),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShellDialect;
    use crate::rules::builtin::test_helpers::{assert_fires, assert_fires_in, assert_quiet_in};

    #[test]
    fn powershell_deletes() {
        let rules = create_rules();
        let ps = ShellDialect::PowerShell;
        assert_fires_in(&rules, "ps-remove-recurse-force", "Remove-Item -Recurse -Force .\\build", ps);
        assert_fires_in(&rules, "ps-remove-recurse-force", "rm -Force -Recurse node_modules", ps);
        assert_fires_in(&rules, "ps-remove-system-path", "Remove-Item -Recurse C:\\Windows", ps);
        assert_quiet_in(&rules, "Remove-Item .\\out.txt", ps);
        assert_quiet_in(&rules, "Write-Output 'Remove-Item -Recurse -Force C:\\Windows'", ps);
    }

    #[test]
    fn cmd_deletes() {
        let rules = create_rules();
        assert_fires_in(&rules, "cmd-recursive-delete", "rd /s /q build", ShellDialect::Cmd);
        assert_fires_in(&rules, "ps-remove-system-path", "rd /s /q C:\\Windows", ShellDialect::Cmd);
        assert_quiet_in(&rules, "dir /s", ShellDialect::Cmd);
    }

    #[test]
    fn policy_and_payloads() {
        let rules = create_rules();
        assert_fires_in(
            &rules,
            "execution-policy-bypass",
            "Set-ExecutionPolicy Unrestricted -Scope CurrentUser",
            ShellDialect::PowerShell,
        );
        assert_fires(&rules, "powershell-encoded-command", "powershell -EncodedCommand SQBFAFgAIAAoAE4AZQB3AC0ATwBiAGoAZQBjAHQA");
        assert_fires_in(
            &rules,
            "powershell-encoded-command",
            "powershell.exe -NoProfile -enc SQBFAFgAIAAoAE4AZQB3AC0A",
            ShellDialect::Cmd,
        );
        assert_fires_in(
            &rules,
            "registry-delete-machine",
            "reg delete HKLM\\Software\\Vendor /f",
            ShellDialect::Cmd,
        );
    }
}
