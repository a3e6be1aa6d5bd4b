#![cfg_attr(not(test), forbid(unsafe_code))]
//! shellguard: a layered safety validator for machine-generated shell commands.
//!
//! A candidate command (plus its shell dialect and an optional domain hint)
//! goes in; a [`ValidationResult`] comes out, telling the caller whether the
//! command is safe to show or run, needs confirmation, or must be blocked,
//! and which parts of the text are responsible.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Configuration                             │
//! │     (env vars → project config → user config → system file)     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Validator (per call)                        │
//! │   Decision cache ─hit─▶ verdict                                  │
//! │   Router (classifier/heuristic)  ∥  Early gate ─Block─▶ verdict  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Rule engine                               │
//! │  global-critical → domain-scoped → structural (parser + replay)  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │           Scorer → Renderer (json / pretty / compact)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rules come from the built-in catalogue plus local, vendor and remote TOML
//! files, compiled into an immutable [`RuleSet`] that reloads swap atomically.
//!
//! # Usage
//!
//! ```no_run
//! use shellguard::{Command, PolicyConfig, ShellDialect, Validator};
//!
//! let validator = Validator::new(PolicyConfig::default())?;
//! let result = validator.check(&Command::new("rm -rf /", ShellDialect::Bash));
//! assert!(result.blocked);
//! # Ok::<(), shellguard::ValidatorError>(())
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gate;
pub mod impact;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod report;
pub mod router;
pub mod rules;
pub mod scorer;
pub mod validator;

pub use config::{PolicyConfig, Strictness};
pub use error::{
    CacheCorruption, ClassifierUnavailable, ConfigError, ParseIncomplete, PatternLoadError,
    ValidatorError,
};
pub use model::{
    Category, Command, Domain, MatchLayer, RiskLevel, RoutingResult, RoutingSource, RuleMatch,
    ShellDialect, Span, ValidationResult, VerdictSource,
};
pub use router::IntentClassifier;
pub use rules::{PatternStore, RuleSet, RuleSource};
pub use validator::{Validator, ValidatorStats};
