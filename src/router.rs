//! Domain classifier.
//!
//! Routing decides which domain-scoped rules run. The keyword heuristic is
//! always available; an external [`IntentClassifier`] may be consulted first
//! under a short timeout. Any classifier failure falls back to the heuristic
//! and marks the result degraded, which the engine treats as unscoped.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::RoutingConfig;
use crate::error::ClassifierUnavailable;
use crate::model::{Command, Domain, RoutingResult, RoutingSource, ShellDialect};
use crate::normalize::MatchView;

/// Score for a command word found in the domain table.
const COMMAND_SCORE: f32 = 1.0;
/// Score for a keyword found among the arguments.
const ARGUMENT_SCORE: f32 = 0.3;

/// External intent/domain classifier.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify `command`. The router bounds the call with its timeout.
    async fn classify(&self, command: &Command) -> Result<RoutingResult, ClassifierUnavailable>;
}

// ============================================================================
// Keyword heuristic
// ============================================================================

static COMMAND_DOMAINS: &[(&str, Domain)] = &[
    // filesystem
    ("rm", Domain::Filesystem),
    ("rmdir", Domain::Filesystem),
    ("mv", Domain::Filesystem),
    ("cp", Domain::Filesystem),
    ("find", Domain::Filesystem),
    ("shred", Domain::Filesystem),
    ("truncate", Domain::Filesystem),
    ("ln", Domain::Filesystem),
    ("rsync", Domain::Filesystem),
    ("tar", Domain::Filesystem),
    ("remove-item", Domain::Filesystem),
    ("ri", Domain::Filesystem),
    ("del", Domain::Filesystem),
    ("erase", Domain::Filesystem),
    ("rd", Domain::Filesystem),
    ("move-item", Domain::Filesystem),
    ("copy-item", Domain::Filesystem),
    // permissions
    ("chmod", Domain::Permissions),
    ("chown", Domain::Permissions),
    ("chgrp", Domain::Permissions),
    ("setfacl", Domain::Permissions),
    ("visudo", Domain::Permissions),
    ("su", Domain::Permissions),
    ("passwd", Domain::Permissions),
    ("usermod", Domain::Permissions),
    ("icacls", Domain::Permissions),
    ("takeown", Domain::Permissions),
    // network
    ("curl", Domain::Network),
    ("wget", Domain::Network),
    ("nc", Domain::Network),
    ("ncat", Domain::Network),
    ("netcat", Domain::Network),
    ("socat", Domain::Network),
    ("ssh", Domain::Network),
    ("scp", Domain::Network),
    ("iptables", Domain::Network),
    ("ip6tables", Domain::Network),
    ("nft", Domain::Network),
    ("ufw", Domain::Network),
    ("invoke-webrequest", Domain::Network),
    ("iwr", Domain::Network),
    ("invoke-restmethod", Domain::Network),
    ("irm", Domain::Network),
    // process
    ("kill", Domain::Process),
    ("pkill", Domain::Process),
    ("killall", Domain::Process),
    ("stop-process", Domain::Process),
    ("taskkill", Domain::Process),
    ("nohup", Domain::Process),
    // package managers
    ("apt", Domain::PackageManager),
    ("apt-get", Domain::PackageManager),
    ("dpkg", Domain::PackageManager),
    ("yum", Domain::PackageManager),
    ("dnf", Domain::PackageManager),
    ("rpm", Domain::PackageManager),
    ("pacman", Domain::PackageManager),
    ("zypper", Domain::PackageManager),
    ("brew", Domain::PackageManager),
    ("pip", Domain::PackageManager),
    ("pip3", Domain::PackageManager),
    ("npm", Domain::PackageManager),
    ("yarn", Domain::PackageManager),
    ("gem", Domain::PackageManager),
    ("cargo", Domain::PackageManager),
    ("choco", Domain::PackageManager),
    ("winget", Domain::PackageManager),
    // system
    ("shutdown", Domain::System),
    ("reboot", Domain::System),
    ("halt", Domain::System),
    ("poweroff", Domain::System),
    ("init", Domain::System),
    ("systemctl", Domain::System),
    ("service", Domain::System),
    ("crontab", Domain::System),
    ("modprobe", Domain::System),
    ("rmmod", Domain::System),
    ("insmod", Domain::System),
    ("sysctl", Domain::System),
    ("export", Domain::System),
    ("alias", Domain::System),
    ("history", Domain::System),
    ("mount", Domain::System),
    ("umount", Domain::System),
    ("mkfs", Domain::System),
    ("dd", Domain::System),
    ("wipefs", Domain::System),
    ("fdisk", Domain::System),
    ("parted", Domain::System),
    ("reg", Domain::System),
    ("bcdedit", Domain::System),
    ("diskpart", Domain::System),
    ("set-executionpolicy", Domain::System),
    ("set-mppreference", Domain::System),
    ("stop-computer", Domain::System),
    ("restart-computer", Domain::System),
    ("stop-service", Domain::System),
    // containers
    ("docker", Domain::Container),
    ("podman", Domain::Container),
    ("nerdctl", Domain::Container),
    ("kubectl", Domain::Container),
    ("helm", Domain::Container),
    ("crictl", Domain::Container),
];

/// Substrings of arguments that hint at a domain.
static ARGUMENT_DOMAINS: &[(&str, Domain)] = &[
    ("http://", Domain::Network),
    ("https://", Domain::Network),
    ("ftp://", Domain::Network),
    ("/dev/tcp/", Domain::Network),
    ("/etc/", Domain::System),
    ("/dev/", Domain::System),
    ("/boot", Domain::System),
    ("hklm", Domain::System),
    ("/var/run/docker.sock", Domain::Container),
    ("sudoers", Domain::Permissions),
];

fn command_domain(word: &str) -> Option<&'static Domain> {
    let word = word.split_once('.').map_or(word, |(head, _)| head);
    COMMAND_DOMAINS
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, domain)| domain)
}

/// Keyword routing over the command words and arguments of the match view.
#[must_use]
pub fn heuristic(view: &MatchView) -> RoutingResult {
    let mut scores: BTreeMap<Domain, f32> = BTreeMap::new();
    for segment in view.segments() {
        if let Some(domain) = command_domain(&segment.command) {
            *scores.entry(domain.clone()).or_default() += COMMAND_SCORE;
        }
        for arg in view.args(segment) {
            let lowered = arg.to_ascii_lowercase();
            let hinted = ARGUMENT_DOMAINS
                .iter()
                .filter(|(needle, _)| lowered.contains(needle))
                .map(|(_, domain)| domain)
                .chain(command_domain(&lowered));
            let mut seen: Vec<&Domain> = Vec::new();
            for domain in hinted {
                if !seen.contains(&domain) {
                    seen.push(domain);
                    *scores.entry(domain.clone()).or_default() += ARGUMENT_SCORE;
                }
            }
        }
    }
    from_scores(scores)
}

fn from_scores(scores: BTreeMap<Domain, f32>) -> RoutingResult {
    let total: f32 = scores.values().sum();
    if total <= 0.0 {
        return RoutingResult::unscoped(RoutingSource::Heuristic);
    }
    let mut ranked: Vec<(Domain, f32)> = scores.into_iter().collect();
    // stable: ties keep domain order
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (primary, top) = ranked.remove(0);
    RoutingResult {
        primary,
        secondary: ranked.into_iter().map(|(domain, _)| domain).collect(),
        confidence: top / total,
        source: RoutingSource::Heuristic,
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routing outcome plus the classifier failure, if one forced the fallback.
#[derive(Debug, Clone)]
pub struct Routed {
    pub routing: RoutingResult,
    pub degraded: Option<ClassifierUnavailable>,
}

impl Routed {
    /// Every domain must be checked.
    #[must_use]
    pub fn is_unscoped(&self, threshold: f32) -> bool {
        self.degraded.is_some() || self.routing.is_unscoped(threshold)
    }
}

/// Domain router with optional classifier and a memo of past results.
pub struct Router {
    classifier: Option<Arc<dyn IntentClassifier>>,
    timeout: Duration,
    memo: Option<Mutex<LruCache<(String, ShellDialect), RoutingResult>>>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("classifier", &self.classifier.is_some())
            .field("timeout", &self.timeout)
            .field("memo", &self.memo.as_ref().map(|m| m.lock().len()))
            .finish()
    }
}

impl Router {
    #[must_use]
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            classifier: None,
            timeout: config.classifier_timeout(),
            memo: NonZeroUsize::new(config.memo_capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Route `command`. Never fails: classifier problems are reported in
    /// [`Routed::degraded`].
    pub async fn route(&self, command: &Command, view: &MatchView) -> Routed {
        let key = (command.raw_text().to_string(), command.shell());
        let remembered = self.memo.as_ref().and_then(|memo| memo.lock().get(&key).cloned());

        let (routing, degraded) = if let Some(mut routing) = remembered {
            routing.source = RoutingSource::Cache;
            (routing, None)
        } else {
            let (routing, degraded) = self.compute(command, view).await;
            if degraded.is_none() {
                if let Some(memo) = &self.memo {
                    memo.lock().put(key, routing.clone());
                }
            }
            (routing, degraded)
        };

        Routed {
            routing: apply_hint(routing, command.domain_hint()),
            degraded,
        }
    }

    async fn compute(
        &self,
        command: &Command,
        view: &MatchView,
    ) -> (RoutingResult, Option<ClassifierUnavailable>) {
        let Some(classifier) = &self.classifier else {
            return (heuristic(view), None);
        };
        let answer = match tokio::time::timeout(self.timeout, classifier.classify(command)).await {
            Ok(answer) => answer,
            Err(_) => Err(ClassifierUnavailable::Timeout(self.timeout)),
        };
        match answer {
            Ok(mut routing) => {
                routing.confidence = if routing.confidence.is_nan() {
                    0.0
                } else {
                    routing.confidence.clamp(0.0, 1.0)
                };
                routing.source = RoutingSource::Model;
                debug!(primary = %routing.primary, confidence = routing.confidence, "classifier routed command");
                (routing, None)
            }
            Err(e) => {
                warn!(error = %e, "intent classifier unavailable; checking every domain");
                (heuristic(view), Some(e))
            }
        }
    }
}

/// A declared hint becomes the primary domain at full confidence.
fn apply_hint(routing: RoutingResult, hint: Option<&Domain>) -> RoutingResult {
    let Some(hint) = hint else {
        return routing;
    };
    let mut secondary = Vec::new();
    let routed = (routing.confidence > 0.0).then_some(routing.primary);
    for domain in routed.into_iter().chain(routing.secondary) {
        if &domain != hint && !secondary.contains(&domain) {
            secondary.push(domain);
        }
    }
    RoutingResult {
        primary: hint.clone(),
        secondary,
        confidence: 1.0,
        source: routing.source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn view(cmd: &str) -> MatchView {
        MatchView::build(cmd, ShellDialect::Bash)
    }

    fn router() -> Router {
        Router::new(&RoutingConfig::default())
    }

    struct Fixed(RoutingResult, Arc<AtomicUsize>);

    #[async_trait]
    impl IntentClassifier for Fixed {
        async fn classify(&self, _: &Command) -> Result<RoutingResult, ClassifierUnavailable> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.clone())
        }
    }

    struct Slow;

    #[async_trait]
    impl IntentClassifier for Slow {
        async fn classify(&self, _: &Command) -> Result<RoutingResult, ClassifierUnavailable> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RoutingResult::unscoped(RoutingSource::Model))
        }
    }

    struct Broken;

    #[async_trait]
    impl IntentClassifier for Broken {
        async fn classify(&self, _: &Command) -> Result<RoutingResult, ClassifierUnavailable> {
            Err(ClassifierUnavailable::Failed("model offline".into()))
        }
    }

    #[test]
    fn command_words_score_their_domain() {
        let routing = heuristic(&view("chmod 777 /etc/passwd"));
        assert_eq!(routing.primary, Domain::Permissions);
        assert_eq!(routing.secondary, vec![Domain::System]);
        assert!((routing.confidence - 1.0 / 1.3).abs() < 1e-4);
        assert_eq!(routing.source, RoutingSource::Heuristic);
    }

    #[test]
    fn wrappers_do_not_hide_the_command() {
        let routing = heuristic(&view("sudo -u root docker run --privileged alpine"));
        assert_eq!(routing.primary, Domain::Container);
    }

    #[test]
    fn mixed_commands_split_confidence() {
        let routing = heuristic(&view("curl -o x https://a && rm -rf x"));
        assert!(routing.confidence < 0.6);
        assert!(routing.secondary.contains(&Domain::Filesystem) || routing.primary == Domain::Filesystem);
    }

    #[test]
    fn no_signal_is_unscoped() {
        let routing = heuristic(&view("ls -la"));
        assert_eq!(routing.primary, Domain::Generic);
        assert!(routing.is_unscoped(0.4));
    }

    #[test]
    fn hint_becomes_primary() {
        let routing = apply_hint(heuristic(&view("rm -rf build")), Some(&Domain::Network));
        assert_eq!(routing.primary, Domain::Network);
        assert_eq!(routing.secondary, vec![Domain::Filesystem]);
        assert!((routing.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn classifier_answers_are_memoised() {
        let calls = Arc::new(AtomicUsize::new(0));
        let answer = RoutingResult {
            primary: Domain::Process,
            secondary: Vec::new(),
            confidence: 3.0,
            source: RoutingSource::Heuristic,
        };
        let router = router().with_classifier(Arc::new(Fixed(answer, Arc::clone(&calls))));
        let cmd = Command::new("kill -9 1", ShellDialect::Bash);

        let first = router.route(&cmd, &view("kill -9 1")).await;
        assert_eq!(first.routing.source, RoutingSource::Model);
        assert!((first.routing.confidence - 1.0).abs() < f32::EPSILON);

        let second = router.route(&cmd, &view("kill -9 1")).await;
        assert_eq!(second.routing.source, RoutingSource::Cache);
        assert_eq!(second.routing.primary, Domain::Process);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_classifier_times_out_to_heuristic() {
        let config = RoutingConfig {
            classifier_timeout_ms: 10,
            ..RoutingConfig::default()
        };
        let router = Router::new(&config).with_classifier(Arc::new(Slow));
        let cmd = Command::new("rm -rf build", ShellDialect::Bash);
        let routed = router.route(&cmd, &view(cmd.raw_text())).await;
        assert!(matches!(routed.degraded, Some(ClassifierUnavailable::Timeout(_))));
        assert_eq!(routed.routing.primary, Domain::Filesystem);
        assert!(routed.is_unscoped(0.4));
    }

    #[tokio::test]
    async fn failed_classifier_is_degraded_and_not_memoised() {
        let router = router().with_classifier(Arc::new(Broken));
        let cmd = Command::new("kill 1", ShellDialect::Bash);
        for _ in 0..2 {
            let routed = router.route(&cmd, &view("kill 1")).await;
            assert!(routed.degraded.is_some());
            assert_eq!(routed.routing.source, RoutingSource::Heuristic);
        }
    }
}
