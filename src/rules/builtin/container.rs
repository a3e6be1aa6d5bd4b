//! Container rules - privileged containers, host mounts and cluster-wide
//! deletes.

use crate::domain_rule;
use crate::model::ShellSet;
use crate::rules::{FilterDefinition, RuleDefinition};

/// Create the container records.
#[must_use]
pub fn create_rules() -> Vec<RuleDefinition> {
    vec![
        domain_rule!(
            "container-privileged",
            Container,
            ContainerEscape,
            r"\b(?:docker|podman|nerdctl)\s+(?:\S+\s+)*?--privileged\b",
            "Privileged containers have full access to the host kernel and devices"
        )
        .keywords(&["--privileged"]),
        domain_rule!(
            "container-host-root-mount",
            Container,
            ContainerEscape,
            r"\b(?:docker|podman|nerdctl)\s+(?:\S+\s+)*?(?:-v|--volume)[\s=]+/:|\b(?:docker|podman)\s+(?:\S+\s+)*?--mount[\s=]+\S*source=/(?:,|\s|$)",
            "Mounting the host root filesystem into a container exposes the whole host"
        )
        .keywords(&["docker", "podman", "nerdctl"]),
        domain_rule!(
            "container-docker-socket-mount",
            Container,
            ContainerEscape,
            r"\b(?:docker|podman)\s+(?:\S+\s+)*?(?:-v|--volume)[\s=]+/var/run/docker\.sock",
            "Mounting the Docker socket gives the container control of the host daemon"
        )
        .keywords(&["docker.sock"]),
        domain_rule!(
            "container-host-namespaces",
            Container,
            ContainerEscape,
            r"\b(?:docker|podman)\s+(?:\S+\s+)*?--(?:pid|net|network|ipc|uts)[\s=]+host\b",
            "Sharing host namespaces weakens container isolation",
            Moderate
        )
        .keywords(&["docker", "podman"]),
        domain_rule!(
            "container-prune-all",
            Container,
            FileDestruction,
            r"\b(?:docker|podman)\s+(?:system|volume)\s+prune\s+(?:\S+\s+)*?(?:-a|--all|--volumes|-f|--force)\b",
            "Pruning everything deletes images, stopped containers and volumes",
            Moderate
        )
        .keywords(&["prune"]),
        domain_rule!(
            "kubectl-delete-broad",
            Container,
            FileDestruction,
            r"\bkubectl\s+delete\s+(?:\S+\s+)*?(?:--all\b|(?:namespace|namespaces|ns)\s+\S+|-A\b|--all-namespaces\b)",
            "Deleting every resource or a whole namespace removes running workloads"
        )
        .shells(ShellSet::ALL)
        .keywords(&["kubectl"])
        .filter(FilterDefinition::UnlessFlag("--dry-run".to_string())),
    ]
}
