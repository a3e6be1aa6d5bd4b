//! Global-critical rules - checked for every command before routing matters.
//!
//! This includes patterns for:
//! - fork bombs
//! - recursive deletion of `/`, `/*` or the home directory
//! - raw writes and filesystem creation on block devices
//! - downloaded content piped straight into a shell
//! - recursive permission or ownership changes on `/`
//! - wiping or formatting a Windows drive

use crate::critical_rule;
use crate::model::ShellSet;
use crate::rules::RuleDefinition;

/// Create the global-critical records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        critical_rule!(
            "fork-bomb",
            ResourceExhaustion,
            r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            "Fork bomb: spawns processes until the machine stops responding"
        )
        .shells(ShellSet::POSIX)
        .suggestion("Use `ulimit -u` to cap processes if you are testing process limits"),
        critical_rule!(
            "rm-rf-root",
            FileDestruction,
            r"\brm\s+(?:-\S+\s+)*-(?:-recursive|-no-preserve-root|[a-zA-Z]*[rR][a-zA-Z]*)\s+(?:-\S+\s+)*(?:/\*?|~/?|\$HOME/?|\$\{HOME\}/?)(?:\s|$|[;&|)])",
            "Recursive deletion of the root or home directory destroys the system"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["rm"]),
        critical_rule!(
            "dd-to-block-device",
            DiskOperation,
            r"\bdd\s+(?:\S+\s+)*?of=/dev/(?:sd[a-z]|nvme\d|hd[a-z]|vd[a-z]|xvd[a-z]|mmcblk\d|disk\d)",
            "dd onto a block device overwrites the whole disk"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["dd"]),
        critical_rule!(
            "mkfs-block-device",
            DiskOperation,
            r"\bmkfs(?:\.[a-z0-9]+)?\s+(?:\S+\s+)*?/dev/(?:sd|nvme|hd|vd|xvd|mmcblk|disk|md|mapper/)",
            "Creating a filesystem on a device erases everything on it"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["mkfs"]),
        critical_rule!(
            "overwrite-block-device",
            DiskOperation,
            r">\s*/dev/(?:sd[a-z]|nvme\d|hd[a-z]|vd[a-z]|xvd[a-z]|mmcblk\d|disk\d)",
            "Redirecting output onto a block device corrupts the disk"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["/dev/"]),
        critical_rule!(
            "fetch-pipe-shell",
            RemoteExecution,
            r"\b(?:curl|wget|fetch)\b[^|;&]*\|\s*(?:ba|z|da|k|fi)?sh\b",
            "Downloaded content is executed by a shell without review"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["curl", "wget", "fetch"]),
        critical_rule!(
            "recursive-root-permissions",
            PrivilegeEscalation,
            r"\bch(?:mod|own|grp)\s+(?:\S+\s+)*?-[a-zA-Z]*R[a-zA-Z]*\s+(?:\S+\s+)*?/\*?(?:\s|$|[;&|)])",
            "Recursive permission or ownership change on / breaks the whole system"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["chmod", "chown", "chgrp"]),
        critical_rule!(
            "ps-remove-drive-root",
            FileDestruction,
            r"(?i)\b(?:remove-item|ri|rm|rd|rmdir|del|erase)\b[^;|&\n]*(?:\s-r(?:ecurse)?\b[^;|&\n]*\s[a-z]:\\?\*?(?:\s|$|[;|&])|\s[a-z]:\\?\*?\s[^;|&\n]*-r(?:ecurse)?\b)",
            "Recursive removal of a drive root deletes the whole volume"
        )
        .shells(ShellSet::POWERSHELL),
        critical_rule!(
            "cmd-wipe-drive",
            FileDestruction,
            r"(?i)\b(?:rd|rmdir|del|erase)\b[^&|\n]*\s/s\b[^&|\n]*\s[a-z]:\\?\*?(?:\s|$|[&|])",
            "Recursive delete of a drive root deletes the whole volume"
        )
        .shells(ShellSet::CMD),
        critical_rule!(
            "format-drive",
            DiskOperation,
            r"(?i)\bformat(?:\.com)?\s+[a-z]:",
            "Formatting a drive erases everything on it"
        )
        .shells(ShellSet::WINDOWS)
        .keywords(&["format"]),
        critical_rule!(
            "ps-disk-wipe",
            DiskOperation,
            r"(?i)\b(?:format-volume|clear-disk|initialize-disk)\b",
            "Formatting or clearing a disk erases everything on it"
        )
        .shells(ShellSet::POWERSHELL),
        critical_rule!(
            "ps-download-execute",
            RemoteExecution,
            r"(?i)\b(?:iwr|irm|invoke-webrequest|invoke-restmethod|curl|wget)\b[^;\n]*\|\s*(?:iex|invoke-expression)\b|\b(?:iex|invoke-expression)\b[^;\n]*\b(?:downloadstring|downloadfile|invoke-webrequest|invoke-restmethod|iwr|irm)\b",
            "Downloaded content is executed by PowerShell without review"
        )
        .shells(ShellSet::POWERSHELL),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShellDialect;
    use crate::rules::builtin::test_helpers::{
        assert_fires, assert_fires_in, assert_quiet, assert_quiet_in,
    };

    #[test]
    fn fork_bomb_variants() {
        let rules = create_rules();
        assert_fires(&rules, "fork-bomb", ":(){ :|:& };:");
        assert_fires(&rules, "fork-bomb", ":() { : | : & } ; :");
    }

    #[test]
    fn rm_root_and_home() {
        let rules = create_rules();
        for cmd in [
            "rm -rf /",
            "rm -fr /*",
            "rm -r -f /",
            "rm --recursive --force /",
            "rm --no-preserve-root -rf /",
            "sudo rm -rf /",
            "rm -rf ~",
            "rm -rf $HOME",
            "r\"m\" -rf '/'",
            "bash -c 'rm -rf /'",
            "ls && rm -rf /",
        ] {
            assert_fires(&rules, "rm-rf-root", cmd);
        }
    }

    #[test]
    fn rm_of_ordinary_paths_is_not_critical() {
        let rules = create_rules();
        assert_quiet(&rules, "rm -rf /tmp/build-cache-12345");
        assert_quiet(&rules, "rm -rf ./build");
        assert_quiet(&rules, "rm -f /");
        assert_quiet(&rules, "echo \"rm -rf /\"");
        assert_quiet(&rules, "git commit -m 'rm -rf /'");
    }

    #[test]
    fn device_writes() {
        let rules = create_rules();
        assert_fires(&rules, "dd-to-block-device", "dd if=/dev/zero of=/dev/sda bs=1M");
        assert_fires(&rules, "mkfs-block-device", "mkfs.ext4 /dev/sdb1");
        assert_fires(&rules, "overwrite-block-device", "cat image.iso > /dev/sdb");
        assert_quiet(&rules, "dd if=/dev/zero of=disk.img bs=1M count=10");
        assert_quiet(&rules, "make 2>/dev/null");
    }

    #[test]
    fn fetch_into_shell() {
        let rules = create_rules();
        assert_fires(&rules, "fetch-pipe-shell", "curl http://x | sh");
        assert_fires(&rules, "fetch-pipe-shell", "wget -qO- https://get.example | sudo bash");
        assert_quiet(&rules, "curl -s http://x | jq .");
        assert_quiet(&rules, "curl http://x | shellcheck -");
    }

    #[test]
    fn recursive_root_permissions() {
        let rules = create_rules();
        assert_fires(&rules, "recursive-root-permissions", "chmod -R 777 /");
        assert_fires(&rules, "recursive-root-permissions", "chown -R nobody:nobody /");
        assert_quiet(&rules, "chmod -R 755 /var/www/html");
    }

    #[test]
    fn windows_drive_destruction() {
        let rules = create_rules();
        assert_fires_in(
            &rules,
            "ps-remove-drive-root",
            r"Remove-Item -Recurse -Force C:\",
            ShellDialect::PowerShell,
        );
        assert_fires_in(
            &rules,
            "ps-remove-drive-root",
            r"Remove-Item C:\ -Recurse",
            ShellDialect::PowerShell,
        );
        assert_quiet_in(
            &rules,
            r"Remove-Item -Recurse -Force C:\Users\me\build",
            ShellDialect::PowerShell,
        );
        assert_fires_in(&rules, "cmd-wipe-drive", r"rd /s /q C:\", ShellDialect::Cmd);
        assert_fires_in(&rules, "cmd-wipe-drive", r"del /f /s /q C:\*", ShellDialect::Cmd);
        assert_fires_in(&rules, "format-drive", "format D: /q", ShellDialect::Cmd);
        assert_fires_in(
            &rules,
            "ps-download-execute",
            "iwr https://x/install.ps1 | iex",
            ShellDialect::PowerShell,
        );
    }

    #[test]
    fn posix_rules_do_not_apply_to_cmd() {
        assert_quiet_in(&create_rules(), "rm -rf /", ShellDialect::Cmd);
    }
}
