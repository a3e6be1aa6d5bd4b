//! Filesystem rules - destructive deletes and moves.
//!
//! This includes patterns for:
//! - rm -rf anywhere (low; silent beneath temp directories)
//! - rm -rf of top-level system directories
//! - find / -delete and find -exec rm at the root
//! - shred, truncation of system files, moves into /dev/null

use crate::domain_rule;
use crate::model::ShellSet;
use crate::rules::{FilterDefinition, RuleDefinition};

/// Create the filesystem records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        domain_rule!(
            "rm-recursive-force",
            Filesystem,
            FileDestruction,
            r"\brm\s+(?:-\S+\s+)*-[a-zA-Z]*(?:[rR][a-zA-Z]*f|f[a-zA-Z]*[rR])[a-zA-Z]*\b|\brm\s+(?:-\S+\s+)*-[rR]\s+(?:-\S+\s+)*-f\b|\brm\s+(?:-\S+\s+)*-f\s+(?:-\S+\s+)*-[rR]\b|\brm\s+(?:-\S+\s+)*--recursive\s+(?:-\S+\s+)*--force\b",
            "rm -rf deletes without confirmation and cannot be undone",
            Low
        )
        .shells(ShellSet::POSIX)
        .keywords(&["rm"])
        .filter(FilterDefinition::unless_path_under(&["/tmp", "/var/tmp", "$TMPDIR"])),
        domain_rule!(
            "rm-system-directory",
            Filesystem,
            FileDestruction,
            r"\brm\s+(?:-\S+\s+)*-(?:-recursive|[a-zA-Z]*[rR][a-zA-Z]*)\s+(?:\S+\s+)*?/(?:etc|usr|var|boot|bin|sbin|lib|lib32|lib64|opt|root|home|srv|sys|proc|dev)/?\*?(?:\s|$|[;&|)])",
            "Recursive deletion of a top-level system directory breaks the system"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["rm"]),
        domain_rule!(
            "find-delete-root",
            Filesystem,
            FileDestruction,
            r"\bfind\s+/\s+(?:\S+\s+)*?(?:-delete\b|-exec\s+rm\b)",
            "find from / with -delete removes files across the whole system"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["find"]),
        domain_rule!(
            "shred-files",
            Filesystem,
            FileDestruction,
            r"\bshred\s+",
            "shred overwrites file contents so they cannot be recovered",
            Moderate
        )
        .shells(ShellSet::POSIX)
        .keywords(&["shred"])
        .filter(FilterDefinition::unless_path_under(&["/tmp", "/var/tmp"])),
        domain_rule!(
            "truncate-system-file",
            Filesystem,
            FileDestruction,
            r"\btruncate\s+(?:\S+\s+)*?-s\s*0\s+(?:\S+\s+)*?/(?:etc|var/log|boot)/",
            "Truncating system files or logs destroys their contents"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["truncate"]),
        domain_rule!(
            "move-to-dev-null",
            Filesystem,
            FileDestruction,
            r"\bmv\s+(?:\S+\s+)+/dev/null(?:\s|$|[;&|)])",
            "Moving files onto /dev/null destroys them"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["mv"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::builtin::test_helpers::{assert_fires, assert_not_fires, assert_quiet};

    #[test]
    fn rm_recursive_force_flag_spellings() {
        let rules = create_rules();
        for cmd in [
            "rm -rf build",
            "rm -fr build",
            "rm -Rf build",
            "rm -r -f build",
            "rm -f -r build",
            "rm --recursive --force build",
            "rm -v -rf build",
        ] {
            assert_fires(&rules, "rm-recursive-force", cmd);
        }
        assert_quiet(&rules, "rm -f build.log");
        assert_quiet(&rules, "rm -r build");
        assert_quiet(&rules, "echo rm -rf build");
    }

    #[test]
    fn system_directories() {
        let rules = create_rules();
        assert_fires(&rules, "rm-system-directory", "rm -rf /etc");
        assert_fires(&rules, "rm-system-directory", "sudo rm -rf /usr/");
        assert_fires(&rules, "rm-system-directory", "rm -r /var/*");
        assert_fires(&rules, "rm-system-directory", "rm -rf ./dist /boot");
    }

    #[test]
    fn subdirectories_are_not_system_directories() {
        let rules = create_rules();
        assert_not_fires(&rules, "rm-system-directory", "rm -rf /var/tmp/cache");
        assert_not_fires(&rules, "rm-system-directory", "rm -rf /usr/local/lib/node_modules/foo");
        assert_not_fires(&rules, "rm-system-directory", "rm -rf /tmp/build-cache-12345");
    }

    #[test]
    fn find_and_friends() {
        let rules = create_rules();
        assert_fires(&rules, "find-delete-root", "find / -name '*.log' -delete");
        assert_fires(&rules, "find-delete-root", "find / -type f -exec rm {} +");
        assert_fires(&rules, "truncate-system-file", "truncate -s 0 /var/log/syslog");
        assert_fires(&rules, "move-to-dev-null", "mv important.db /dev/null");
        assert_fires(&rules, "shred-files", "shred -u secrets.txt");
        assert_quiet(&rules, "find . -name '*.tmp' -delete");
        assert_quiet(&rules, "ls -la /etc");
    }
}
