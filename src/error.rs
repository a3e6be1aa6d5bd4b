//! Error taxonomy.
//!
//! Only [`ValidatorError`] is fatal. Everything else is collected into a load
//! report or recorded on the verdict as a degraded-mode diagnostic.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::rules::SourceKind;

/// Where a rule entry came from, for operator-facing error messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_index: Option<usize>,
}

impl SourceLocation {
    #[must_use]
    pub const fn builtin() -> Self {
        Self {
            source: SourceKind::Builtin,
            path: None,
            entry_index: None,
        }
    }

    #[must_use]
    pub fn file(source: SourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            path: Some(path.into()),
            entry_index: None,
        }
    }

    #[must_use]
    pub fn with_entry(mut self, index: usize) -> Self {
        self.entry_index = Some(index);
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source.label())?;
        if let Some(path) = &self.path {
            write!(f, ":{}", path.display())?;
        }
        if let Some(index) = self.entry_index {
            write!(f, "[rule {index}]")?;
        }
        Ok(())
    }
}

/// A rule entry or rule source that could not be loaded.
///
/// The offending entry is skipped; the rest of the source still loads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternLoadError {
    #[error("{location}: pattern `{id}` has an invalid matcher: {message}")]
    InvalidMatcher {
        location: SourceLocation,
        id: String,
        message: String,
    },

    #[error("{location}: duplicate pattern id `{id}` (set `override = true` to replace it)")]
    DuplicateId { location: SourceLocation, id: String },

    #[error("{location}: override of global-critical pattern `{id}` must stay critical")]
    CriticalWeakened { location: SourceLocation, id: String },

    #[error("{location}: malformed rule entry: {message}")]
    MalformedEntry {
        location: SourceLocation,
        message: String,
    },

    #[error("{location}: cannot read rule source: {message}")]
    Unreadable {
        location: SourceLocation,
        message: String,
    },

    #[error("remote rules from {url} unavailable: {message}")]
    RemoteUnavailable { url: String, message: String },
}

impl PatternLoadError {
    /// Pattern id the error refers to, if any.
    #[must_use]
    pub fn pattern_id(&self) -> Option<&str> {
        match self {
            Self::InvalidMatcher { id, .. }
            | Self::DuplicateId { id, .. }
            | Self::CriticalWeakened { id, .. } => Some(id),
            _ => None,
        }
    }

    #[must_use]
    pub const fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::InvalidMatcher { location, .. }
            | Self::DuplicateId { location, .. }
            | Self::CriticalWeakened { location, .. }
            | Self::MalformedEntry { location, .. }
            | Self::Unreadable { location, .. } => Some(location),
            Self::RemoteUnavailable { .. } => None,
        }
    }
}

/// The shell text could not be fully parsed. Text-only layers still run.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("shell syntax incomplete at byte {offset}: {reason}")]
pub struct ParseIncomplete {
    pub reason: String,
    pub offset: usize,
}

impl ParseIncomplete {
    #[must_use]
    pub fn new(reason: impl Into<String>, offset: usize) -> Self {
        Self {
            reason: reason.into(),
            offset,
        }
    }
}

/// The external intent classifier could not answer in time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifierUnavailable {
    #[error("intent classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("intent classifier failed: {0}")]
    Failed(String),
}

/// A cached verdict failed its consistency check and was discarded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cache entry for {key:?} is corrupt: {reason}")]
pub struct CacheCorruption {
    pub key: String,
    pub reason: String,
}

/// Errors reading or interpreting policy configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Fatal errors: the validator refuses to start.
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("global-critical patterns failed to load: {}", join_errors(.0))]
    CriticalPatternsUnavailable(Vec<PatternLoadError>),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn join_errors(errors: &[PatternLoadError]) -> String {
    if errors.is_empty() {
        return "no critical patterns present".to_string();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_display_includes_path_and_entry() {
        let loc = SourceLocation::file(SourceKind::Local, "/etc/shellguard/rules.toml").with_entry(3);
        assert_eq!(loc.to_string(), "local:/etc/shellguard/rules.toml[rule 3]");
        assert_eq!(SourceLocation::builtin().to_string(), "builtin");
    }

    #[test]
    fn duplicate_id_message_mentions_override() {
        let err = PatternLoadError::DuplicateId {
            location: SourceLocation::builtin(),
            id: "rm-rf-root".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rm-rf-root"));
        assert!(msg.contains("override = true"));
        assert_eq!(err.pattern_id(), Some("rm-rf-root"));
    }

    #[test]
    fn fatal_error_lists_causes() {
        let err = ValidatorError::CriticalPatternsUnavailable(vec![PatternLoadError::InvalidMatcher {
            location: SourceLocation::builtin(),
            id: "fork-bomb".to_string(),
            message: "unclosed group".to_string(),
        }]);
        assert!(err.to_string().contains("fork-bomb"));

        let empty = ValidatorError::CriticalPatternsUnavailable(Vec::new());
        assert!(empty.to_string().contains("no critical patterns"));
    }
}
