//! Diagnostics logging and the decision audit log.
//!
//! The library only emits `tracing` events. [`init_tracing`] is for the
//! binary; embedders install their own subscriber. [`DecisionLogger`] writes
//! one line per verdict to an append-only file, independent of `tracing`.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::model::{RiskLevel, ValidationResult};

/// Environment variable holding the `tracing` filter directive.
pub const LOG_ENV: &str = "SHELLGUARD_LOG";

// ============================================================================
// Configuration Types
// ============================================================================

/// Output format for diagnostics and audit lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// How much of the command text reaches the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMode {
    /// Log the command verbatim.
    None,
    /// Keep command words, shorten long arguments and quoted strings.
    #[default]
    Arguments,
    /// Replace the whole command.
    Full,
}

/// Verdict kinds that can be written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEvent {
    Blocked,
    Confirm,
    Allowed,
}

impl LogEvent {
    #[must_use]
    pub const fn of(result: &ValidationResult) -> Self {
        if result.blocked {
            Self::Blocked
        } else if result.requires_confirmation {
            Self::Confirm
        } else {
            Self::Allowed
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Confirm => "confirm",
            Self::Allowed => "allowed",
        }
    }
}

/// `[logging]` section of the policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Audit log file. Supports `~/`. `None` disables the audit log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_log: Option<PathBuf>,
    pub format: LogFormat,
    pub redaction: RedactionMode,
    /// Longest argument kept verbatim in `arguments` mode.
    pub max_argument_len: usize,
    pub events: Vec<LogEvent>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            decision_log: None,
            format: LogFormat::Text,
            redaction: RedactionMode::Arguments,
            max_argument_len: 48,
            events: vec![LogEvent::Blocked, LogEvent::Confirm],
        }
    }
}

// ============================================================================
// tracing initialisation
// ============================================================================

/// Install the global `tracing` subscriber on stderr.
///
/// The filter comes from `SHELLGUARD_LOG`, defaulting to `warn` (`debug` when
/// `verbose`). Calling this twice is harmless: the second call is ignored.
pub fn init_tracing(verbose: bool, format: LogFormat) {
    let fallback = if verbose { "shellguard=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(verbose);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::trace!("tracing subscriber already installed");
    }
}

// ============================================================================
// Audit entries
// ============================================================================

/// One audit line.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEntry {
    pub timestamp: String,
    pub event: LogEvent,
    pub risk_level: RiskLevel,
    pub shell: String,
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub degraded: bool,
    pub elapsed_us: u64,
}

impl DecisionEntry {
    #[must_use]
    pub fn new(result: &ValidationResult, command: &str, shell: &str, config: &LoggingConfig) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event: LogEvent::of(result),
            risk_level: result.risk_level,
            shell: shell.to_string(),
            command: redact_command(command, config.redaction, config.max_argument_len),
            patterns: result.matched.iter().map(|m| m.pattern_id.clone()).collect(),
            reason: result.matched.first().map(|m| m.message.clone()),
            degraded: result.diagnostics.degraded,
            elapsed_us: result.diagnostics.elapsed_us,
        }
    }

    #[must_use]
    pub fn format_text(&self) -> String {
        let mut parts = Vec::with_capacity(8);
        parts.push(format!("[{}]", self.timestamp));
        parts.push(self.event.as_str().to_uppercase());
        parts.push(self.risk_level.to_string());
        if !self.patterns.is_empty() {
            parts.push(self.patterns.join(","));
        }
        parts.push(format!("{}: \"{}\"", self.shell, self.command));
        if let Some(reason) = &self.reason {
            parts.push(format!("-- {reason}"));
        }
        if self.degraded {
            parts.push("[degraded]".to_string());
        }
        parts.push(format!("({}us)", self.elapsed_us));
        parts.join(" ")
    }

    #[must_use]
    pub fn format_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// Logger
// ============================================================================

/// Append-only audit log of verdicts.
#[derive(Debug)]
pub struct DecisionLogger {
    config: LoggingConfig,
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl DecisionLogger {
    /// Open the configured audit log. `Ok(None)` when no log file is set.
    ///
    /// # Errors
    ///
    /// Fails if the file or its parent directory cannot be created.
    pub fn open(config: &LoggingConfig) -> io::Result<Option<Self>> {
        let Some(path) = &config.decision_log else {
            return Ok(None);
        };
        let path = expand_tilde(path);
        let file = open_log_file(&path)?;
        Ok(Some(Self {
            config: config.clone(),
            path,
            writer: Mutex::new(BufWriter::new(file)),
        }))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `result` if its event kind is enabled. Write failures are
    /// reported through `tracing` and otherwise ignored.
    pub fn log(&self, result: &ValidationResult, command: &str, shell: &str) {
        if !self.config.events.contains(&LogEvent::of(result)) {
            return;
        }
        let entry = DecisionEntry::new(result, command, shell, &self.config);
        let line = match self.config.format {
            LogFormat::Text => entry.format_text(),
            LogFormat::Json => entry.format_json(),
        };
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            tracing::warn!(path = %self.path.display(), error = %e, "audit log write failed");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Apply `mode` to a command line.
#[must_use]
pub fn redact_command(command: &str, mode: RedactionMode, max_len: usize) -> String {
    match mode {
        RedactionMode::None => command.to_string(),
        RedactionMode::Full => "[REDACTED]".to_string(),
        RedactionMode::Arguments => redact_arguments(command, max_len),
    }
}

/// Keep the first word of every command; shorten any other word longer
/// than `max_len` and the body of every quoted string.
fn redact_arguments(command: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(command.len());
    let mut word = String::new();
    let mut command_position = true;
    let mut quote: Option<char> = None;
    let mut quoted_len = 0usize;
    let mut quoted_word = false;

    let flush = |word: &mut String, out: &mut String, command_position: &mut bool, quoted: &mut bool| {
        if word.is_empty() {
            return;
        }
        if *command_position || *quoted || word.chars().count() <= max_len {
            out.push_str(word);
        } else {
            out.extend(word.chars().take(max_len));
            out.push_str("...");
        }
        if !word.contains('=') || !*command_position {
            *command_position = false;
        }
        *quoted = false;
        word.clear();
    };

    for c in command.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
                if quoted_len > max_len {
                    word.push_str("...");
                }
                word.push(c);
            } else {
                if quoted_len < max_len {
                    word.push(c);
                }
                quoted_len += 1;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                quoted_len = 0;
                quoted_word = true;
                word.push(c);
            }
            ';' | '|' | '&' | '\n' => {
                flush(&mut word, &mut out, &mut command_position, &mut quoted_word);
                out.push(c);
                command_position = true;
            }
            c if c.is_whitespace() => {
                flush(&mut word, &mut out, &mut command_position, &mut quoted_word);
                out.push(c);
            }
            c => word.push(c),
        }
    }
    flush(&mut word, &mut out, &mut command_position, &mut quoted_word);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Diagnostics, VerdictSource};

    fn verdict(blocked: bool, confirm: bool) -> ValidationResult {
        ValidationResult {
            risk_level: if blocked { RiskLevel::Critical } else { RiskLevel::Safe },
            matched: Vec::new(),
            blocked,
            requires_confirmation: confirm,
            suggestion: None,
            suggestions: Vec::new(),
            score: 0.0,
            source: VerdictSource::RuleEngine,
            diagnostics: Diagnostics::default(),
        }
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert!(config.decision_log.is_none());
        assert_eq!(config.redaction, RedactionMode::Arguments);
        assert!(config.events.contains(&LogEvent::Blocked));
        assert!(!config.events.contains(&LogEvent::Allowed));
    }

    #[test]
    fn redact_modes() {
        assert_eq!(redact_command("rm -rf /", RedactionMode::None, 4), "rm -rf /");
        assert_eq!(redact_command("rm -rf /", RedactionMode::Full, 4), "[REDACTED]");
    }

    #[test]
    fn redact_arguments_keeps_command_words() {
        let redacted = redact_arguments("curl https://secret.example/token | sh", 8);
        assert_eq!(redacted, "curl https://... | sh");
        let quoted = redact_arguments("echo 'a very long secret value'", 6);
        assert_eq!(quoted, "echo 'a very...'");
        assert_eq!(redact_arguments("TOKEN=abc rm x", 2), "TOKEN=abc rm x");
    }

    #[test]
    fn event_kind_follows_verdict() {
        assert_eq!(LogEvent::of(&verdict(true, true)), LogEvent::Blocked);
        assert_eq!(LogEvent::of(&verdict(false, true)), LogEvent::Confirm);
        assert_eq!(LogEvent::of(&verdict(false, false)), LogEvent::Allowed);
    }

    #[test]
    fn text_line_has_timestamp_and_event() {
        let entry = DecisionEntry::new(&verdict(true, false), "rm -rf /", "bash", &LoggingConfig::default());
        let line = entry.format_text();
        assert!(line.starts_with('['));
        assert!(line.contains("BLOCKED critical"));
        assert!(chrono::DateTime::parse_from_rfc3339(&entry.timestamp).is_ok());
    }

    #[test]
    fn logger_appends_only_enabled_events() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            decision_log: Some(dir.path().join("audit").join("decisions.log")),
            format: LogFormat::Json,
            ..LoggingConfig::default()
        };
        let logger = DecisionLogger::open(&config).unwrap().unwrap();
        logger.log(&verdict(true, false), "rm -rf /", "bash");
        logger.log(&verdict(false, false), "ls", "bash");
        logger.log(&verdict(false, true), "shutdown now", "bash");

        let content = std::fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "blocked");
        assert_eq!(first["command"], "rm -rf /");
    }

    #[test]
    fn no_log_file_means_no_logger() {
        assert!(DecisionLogger::open(&LoggingConfig::default()).unwrap().is_none());
    }
}
