//! Validation from many threads, reloads under load, and cancellation.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use common::{bash, validator};
use shellguard::config::PolicyConfig;
use shellguard::{
    ClassifierUnavailable, Command, IntentClassifier, RiskLevel, RoutingResult, Validator,
};
use tokio_util::sync::CancellationToken;

const COMMANDS: &[(&str, RiskLevel)] = &[
    ("rm -rf /", RiskLevel::Critical),
    ("cat file | grep pattern", RiskLevel::Safe),
    ("chmod 777 /etc/passwd", RiskLevel::High),
    ("rm -rf /tmp/build-cache-12345", RiskLevel::Safe),
    ("dd if=/dev/zero of=/dev/sda bs=1M", RiskLevel::Critical),
    ("ls -la", RiskLevel::Safe),
];

#[test]
fn parallel_validations_agree_with_sequential_ones() {
    let v = Arc::new(validator());
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let v = Arc::clone(&v);
            thread::spawn(move || {
                for round in 0..25 {
                    let (raw, expected) = COMMANDS[(worker + round) % COMMANDS.len()];
                    let result = v.check(&bash(raw));
                    assert_eq!(result.risk_level, expected, "{raw}");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let stats = v.stats();
    assert_eq!(stats.validations, 200);
    assert!(stats.cache_hits > 0);
}

#[test]
fn reload_during_validation_never_yields_a_partial_rule_set() {
    let v = Arc::new(Validator::new(common::uncached_policy()).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let reloader = {
        let v = Arc::clone(&v);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reloads = 0;
            while !done.load(Ordering::Relaxed) {
                v.reload().unwrap();
                reloads += 1;
                thread::sleep(Duration::from_millis(1));
            }
            reloads
        })
    };

    let checkers: Vec<_> = (0..4)
        .map(|_| {
            let v = Arc::clone(&v);
            thread::spawn(move || {
                for _ in 0..50 {
                    let result = v.check(&bash("rm -rf /"));
                    assert!(result.blocked);
                    assert!(result.has_match("rm-rf-root"));
                    let safe = v.check(&bash("ls -la"));
                    assert!(safe.is_safe());
                }
            })
        })
        .collect();
    for checker in checkers {
        checker.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    let reloads = reloader.join().unwrap();
    assert!(reloads > 0);
    assert!(v.stats().ruleset_generation >= 1);
}

struct Stalled;

#[async_trait]
impl IntentClassifier for Stalled {
    async fn classify(&self, _: &Command) -> Result<RoutingResult, ClassifierUnavailable> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(ClassifierUnavailable::Failed("never answers".to_string()))
    }
}

#[test]
fn cancellation_from_another_thread_stops_the_request() {
    let mut config = PolicyConfig::default();
    config.routing.classifier_timeout_ms = 10_000;
    let v = Validator::builder()
        .config(config)
        .classifier(Arc::new(Stalled))
        .build()
        .unwrap();
    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };
    let command = bash("chmod 777 /etc/passwd");
    assert!(v.validate_with_cancel(&command, v.config(), &token).is_none());
    canceller.join().unwrap();
}

#[test]
fn slow_classifier_never_delays_past_its_timeout() {
    let mut config = common::uncached_policy();
    config.routing.classifier_timeout_ms = 20;
    let v = Validator::builder()
        .config(config)
        .classifier(Arc::new(Stalled))
        .build()
        .unwrap();
    let started = std::time::Instant::now();
    let result = v.check(&bash("chmod 777 /etc/passwd"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.diagnostics.degraded);
    assert!(result.risk_level >= RiskLevel::High);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_validations_run_concurrently() {
    let v = Arc::new(validator());
    let tasks: Vec<_> = COMMANDS
        .iter()
        .map(|(raw, expected)| {
            let v = Arc::clone(&v);
            tokio::spawn(async move {
                let result = v.validate_async(&bash(raw), v.config()).await;
                assert_eq!(result.risk_level, *expected, "{raw}");
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
}
