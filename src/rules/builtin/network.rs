//! Network rules - reverse shells, firewall teardown, exfiltration of
//! credentials and downloads into system paths.

use crate::domain_rule;
use crate::model::ShellSet;
use crate::rules::RuleDefinition;

/// Create the network records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        domain_rule!(
            "netcat-exec",
            Network,
            RemoteExecution,
            r"\b(?:nc|ncat|netcat)\s+(?:\S+\s+)*?(?:-[a-zA-Z]*[ec]\b|--(?:sh-)?exec\b)",
            "netcat with -e/-c hands a shell to whoever connects"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["nc", "ncat", "netcat"]),
        domain_rule!(
            "dev-tcp-socket",
            Network,
            RemoteExecution,
            r"/dev/(?:tcp|udp)/\S+",
            "Redirection through /dev/tcp is the classic reverse-shell primitive"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["/dev/tcp", "/dev/udp"]),
        domain_rule!(
            "firewall-flush",
            Network,
            NetworkExposure,
            r"\b(?:ip6?tables\s+(?:\S+\s+)*?(?:-F|--flush|-X)\b|ufw\s+disable\b|nft\s+flush\s+ruleset\b|systemctl\s+(?:stop|disable)\s+(?:firewalld|ufw)\b)",
            "Flushing or disabling the firewall exposes every listening service"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["iptables", "ip6tables", "ufw", "nft", "firewalld"]),
        domain_rule!(
            "download-to-system-path",
            Network,
            SystemModification,
            r"\b(?:curl|wget)\s+(?:\S+\s+)*?(?:-o|-O|--output(?:-document)?)[\s=]*/(?:etc|usr|bin|sbin|boot|lib)/",
            "Downloading straight into a system directory replaces system files unreviewed"
        )
        .shells(ShellSet::POSIX)
        .keywords(&["curl", "wget"]),
        domain_rule!(
            "upload-credentials",
            Network,
            CredentialExposure,
            r"\b(?:curl|wget|scp|rsync|nc)\b[^;&|]*(?:\.ssh/|id_rsa|id_ed25519|\.aws/credentials|\.netrc|\.docker/config\.json|/etc/shadow)",
            "Sending credential files to another host leaks secrets"
        )
        .keywords(&["curl", "wget", "scp", "rsync", "nc"]),
        domain_rule!(
            "expose-docker-socket",
            Network,
            NetworkExposure,
            r"\b(?:socat|dockerd)\b[^;&|]*(?:tcp-listen:2375|tcp://0\.0\.0\.0:2375|-H\s+tcp://0\.0\.0\.0)",
            "Exposing the Docker daemon on TCP gives anyone on the network root"
        )
        .shells(ShellSet::POSIX),
    ]
}
