//! Structural rules - dangers visible only in the shape of the command.
//!
//! This includes patterns for:
//! - downloaded content run as a program (piped, `<(...)`, `-c`, `eval`)
//! - any pipe into an interpreter reading its program from stdin
//! - variables expanding to dangerous targets (`DIR=/; rm -rf "$DIR"`)
//! - destructive commands hidden in command substitutions
//! - redirections onto devices and system files
//! - self-recursive background functions (fork bombs under any name)
//! - eval of values that cannot be resolved

use crate::model::ShellSet;
use crate::rules::{RuleDefinition, StructuralPredicate};
use crate::structural_rule;

const DESTRUCTIVE_VERBS: &[&str] = &[
    "rm", "rmdir", "shred", "dd", "mkfs", "wipefs", "truncate", "mv", "chmod", "chown", "chgrp",
    "find", "remove-item", "del", "erase", "rd",
];

const DEVICES: &[&str] = &[
    "/dev/sd", "/dev/nvme", "/dev/hd", "/dev/vd", "/dev/xvd", "/dev/mmcblk", "/dev/disk", "/dev/mem",
    "/dev/kmem", "/dev/port",
];

const SYSTEM_FILES: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/group",
    "/etc/gshadow",
    "/etc/sudoers",
    "/etc/hosts",
    "/etc/fstab",
    "/etc/crontab",
    "/etc/ld.so.preload",
    "/boot/",
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Create the structural records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        structural_rule!(
            "fetched-code-execution",
            RemoteExecution,
            StructuralPredicate::FetchExecuted,
            "Downloaded content runs as a program without being reviewed",
            Critical
        )
        .suggestion("Download to a file, inspect it, then run it"),
        structural_rule!(
            "pipe-to-shell",
            RemoteExecution,
            StructuralPredicate::PipelineSink {
                sources: Vec::new(),
                sinks: Vec::new(),
            },
            "Piping text into an interpreter runs whatever the earlier stage produces",
            High
        ),
        structural_rule!(
            "unresolved-expansion-target",
            FileDestruction,
            StructuralPredicate::ExpandedTarget {
                verbs: owned(DESTRUCTIVE_VERBS),
            },
            "A destructive command targets a path built from a variable that cannot be resolved",
            High
        )
        .suggestion("Check the variable is set (`${VAR:?}`) before using it in a destructive path"),
        structural_rule!(
            "substituted-command",
            FileDestruction,
            StructuralPredicate::SubstitutedCommand {
                verbs: owned(&[
                    "rm", "dd", "mkfs", "shred", "wipefs", "chmod", "chown", "kill", "killall",
                    "shutdown", "reboot", "remove-item",
                ]),
            },
            "A destructive command is hidden inside a command substitution",
            High
        ),
        structural_rule!(
            "redirect-to-device",
            DiskOperation,
            StructuralPredicate::RedirectTarget {
                paths: owned(DEVICES),
            },
            "Output is redirected onto a raw device",
            Critical
        )
        .shells(ShellSet::POSIX),
        structural_rule!(
            "redirect-to-system-file",
            SystemModification,
            StructuralPredicate::RedirectTarget {
                paths: owned(SYSTEM_FILES),
            },
            "Output is redirected onto a critical system file",
            High
        )
        .shells(ShellSet::POSIX),
        structural_rule!(
            "fork-bomb-function",
            ResourceExhaustion,
            StructuralPredicate::RecursiveFunction,
            "A function calls itself in a pipeline or in the background: a fork bomb",
            Critical
        )
        .shells(ShellSet::POSIX),
        structural_rule!(
            "eval-unresolved",
            RemoteExecution,
            StructuralPredicate::EvalOfExpansion,
            "eval or source of a value that cannot be resolved statically",
            Moderate
        ),
    ]
}
