//! CLI argument parsing and command handling.
//!
//! ```text
//! shellguard check [--shell bash] [--domain D] [--format pretty|json|compact] COMMAND
//! shellguard parse [--shell bash] COMMAND
//! shellguard rules list [--domain D] [--format table|json]
//! shellguard rules check FILE...
//! shellguard config [--format toml|json]
//! ```
//!
//! Exit codes: 0 allowed, 1 blocked, 2 needs confirmation (with
//! `--fail-on-confirm`), 3 usage or configuration error, 4 fatal rule load.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigLoad, PolicyConfig, Strictness};
use crate::error::{ConfigError, ValidatorError};
use crate::logging::LogFormat;
use crate::model::{Command as Candidate, Domain, ShellDialect};
use crate::parser;
use crate::report::{self, ColorChoice};
use crate::rules::{PatternStore, RuleSource};
use crate::validator::Validator;

/// Exit statuses.
pub mod exit {
    pub const ALLOWED: i32 = 0;
    pub const BLOCKED: i32 = 1;
    pub const CONFIRM: i32 = 2;
    pub const USAGE: i32 = 3;
    pub const FATAL: i32 = 4;
}

/// Safety validator for machine-generated shell commands.
///
/// Classifies a command as safe, risky or dangerous before it is shown to a
/// user or executed, explaining each finding against the command text.
#[derive(Parser, Debug)]
#[command(name = "shellguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (overridden by SHELLGUARD_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Log line format on stderr
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Use only this configuration file (environment overrides still apply)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// When to colour output
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a command and print the verdict
    #[command(name = "check")]
    Check(CheckArgs),

    /// Print the parsed syntax tree of a command as JSON
    #[command(name = "parse")]
    Parse {
        /// Command text
        command: String,

        /// Shell dialect
        #[arg(long, short, default_value = "bash")]
        shell: ShellDialect,
    },

    /// Inspect the loaded rules
    #[command(name = "rules")]
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Show the effective configuration
    #[command(name = "config")]
    Config {
        #[arg(long, short, value_enum, default_value_t = ConfigFormat::Toml)]
        format: ConfigFormat,
    },
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Command text (read from stdin when omitted)
    pub command: Option<String>,

    /// Read the command from stdin
    #[arg(long, conflicts_with = "command")]
    pub stdin: bool,

    /// Shell dialect
    #[arg(long, short, default_value = "bash")]
    pub shell: ShellDialect,

    /// Domain hint (filesystem, network, process, ...)
    #[arg(long, short)]
    pub domain: Option<String>,

    /// Override the configured strictness
    #[arg(long)]
    pub strictness: Option<Strictness>,

    /// Output format
    #[arg(long, short, value_enum, default_value_t = CheckFormat::Pretty)]
    pub format: CheckFormat,

    /// Skip structural (AST) analysis
    #[arg(long)]
    pub no_structural: bool,

    /// Extra rule files or directories, applied as local sources
    #[arg(long = "rules", value_name = "PATH")]
    pub rules: Vec<PathBuf>,

    /// Exit 2 when the verdict requires confirmation
    #[arg(long)]
    pub fail_on_confirm: bool,
}

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// List loaded rules
    #[command(name = "list")]
    List {
        /// Only rules of this domain
        #[arg(long, short)]
        domain: Option<String>,

        #[arg(long, short, value_enum, default_value_t = ListFormat::Table)]
        format: ListFormat,
    },

    /// Validate rule files without loading them
    #[command(name = "check")]
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CheckFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fatal(#[from] ValidatorError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Fatal(_) => exit::FATAL,
            Self::Usage(_) | Self::Config(_) | Self::Io(_) | Self::Json(_) => exit::USAGE,
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Run a parsed command line, returning the process exit status.
///
/// # Errors
/// Configuration, usage and fatal load errors; see [`CliError::exit_code`].
pub fn run(cli: Cli) -> Result<i32, CliError> {
    report::set_color(cli.color);
    match cli.command {
        Command::Check(args) => {
            let config = load_config(cli.config.as_ref())?;
            run_check(args, config)
        }
        Command::Parse { command, shell } => run_parse(&command, shell),
        Command::Rules { action } => {
            let config = load_config(cli.config.as_ref())?;
            match action {
                RulesAction::List { domain, format } => run_rules_list(&config, domain, format),
                RulesAction::Check { files } => Ok(run_rules_check(&config, &files)),
            }
        }
        Command::Config { format } => {
            let loaded = load_layers(cli.config.as_ref())?;
            for file in &loaded.files {
                eprintln!("{} {}", "loaded:".dimmed(), file.display());
            }
            let text = match format {
                ConfigFormat::Toml => loaded.config.to_toml_string(),
                ConfigFormat::Json => serde_json::to_string_pretty(&loaded.config)?,
            };
            println!("{text}");
            Ok(exit::ALLOWED)
        }
    }
}

fn load_layers(explicit: Option<&PathBuf>) -> Result<ConfigLoad, CliError> {
    let Some(path) = explicit else {
        let loaded = PolicyConfig::load();
        for warning in &loaded.warnings {
            warn_line(&warning.to_string());
        }
        return Ok(loaded);
    };
    if !path.is_file() {
        return Err(CliError::Usage(format!(
            "config file {} does not exist",
            path.display()
        )));
    }
    let mut loaded =
        PolicyConfig::load_layers(std::slice::from_ref(path), |key| std::env::var(key).ok());
    if !loaded.warnings.is_empty() {
        return Err(CliError::Config(loaded.warnings.remove(0)));
    }
    Ok(loaded)
}

fn load_config(explicit: Option<&PathBuf>) -> Result<PolicyConfig, CliError> {
    load_layers(explicit).map(|loaded| loaded.config)
}

fn warn_line(message: &str) {
    eprintln!("{} {message}", "warning:".yellow().bold());
}

fn read_command(args: &CheckArgs) -> Result<String, CliError> {
    if let (Some(command), false) = (&args.command, args.stdin) {
        return Ok(command.clone());
    }
    if !args.stdin && io::stdin().is_terminal() {
        return Err(CliError::Usage(
            "no command given (pass it as an argument or use --stdin)".to_string(),
        ));
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    let trimmed = buf.trim_end_matches(['\n', '\r']);
    if trimmed.trim().is_empty() {
        return Err(CliError::Usage("empty command on stdin".to_string()));
    }
    Ok(trimmed.to_string())
}

fn run_check(args: CheckArgs, mut config: PolicyConfig) -> Result<i32, CliError> {
    let raw = read_command(&args)?;
    if let Some(strictness) = args.strictness {
        config.strictness = strictness;
    }
    if args.no_structural {
        config.enable_structural_analysis = false;
    }
    config
        .rule_sources
        .extend(args.rules.iter().cloned().map(|path| RuleSource::Local { path }));

    let validator = Validator::new(config)?;
    for error in validator.load_errors() {
        warn_line(&error.to_string());
    }

    let command = Candidate::new(raw.as_str(), args.shell)
        .with_domain_hint(args.domain.as_deref().map(Domain::from));
    let result = validator.check(&command);

    let rendered = match args.format {
        CheckFormat::Pretty => report::render_pretty(&result, &raw),
        CheckFormat::Json => report::render_json(&result, true)?,
        CheckFormat::Compact => report::render_compact(&result),
    };
    println!("{}", rendered.trim_end());

    Ok(if result.blocked {
        exit::BLOCKED
    } else if result.requires_confirmation && args.fail_on_confirm {
        exit::CONFIRM
    } else {
        exit::ALLOWED
    })
}

fn run_parse(raw: &str, shell: ShellDialect) -> Result<i32, CliError> {
    match parser::parse(raw, shell) {
        Ok(parsed) => {
            println!("{}", serde_json::to_string_pretty(&parsed)?);
            Ok(exit::ALLOWED)
        }
        Err(incomplete) => {
            let body = serde_json::json!({
                "status": "incomplete",
                "reason": incomplete.reason,
                "offset": incomplete.offset,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(exit::BLOCKED)
        }
    }
}

/// One row of `rules list`.
#[derive(Debug, Serialize)]
struct RuleSummary<'a> {
    id: &'a str,
    severity: String,
    layer: &'static str,
    domain: String,
    category: &'static str,
    matcher: String,
    description: &'a str,
    source: String,
}

fn run_rules_list(
    config: &PolicyConfig,
    domain: Option<String>,
    format: ListFormat,
) -> Result<i32, CliError> {
    let store = PatternStore::new(config.rule_sources.clone())
        .with_remote_options(config.remote.options());
    let report = store.load()?;
    for error in &report.errors {
        warn_line(&error.to_string());
    }

    let wanted = domain.as_deref().map(Domain::from);
    let mut rows: Vec<RuleSummary<'_>> = report
        .ruleset
        .patterns()
        .filter(|p| wanted.as_ref().is_none_or(|d| &p.domain == d))
        .map(|p| RuleSummary {
            id: &p.id,
            severity: p.severity.to_string(),
            layer: p.layer.as_str(),
            domain: p.domain.to_string(),
            category: p.category.as_str(),
            matcher: p.matcher.describe(),
            description: &p.message,
            source: p.origin.to_string(),
        })
        .collect();
    rows.sort_by(|a, b| a.id.cmp(b.id));

    match format {
        ListFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        ListFormat::Table => {
            for row in &rows {
                println!(
                    "{:<34} {:<9} {:<11} {:<15} {}",
                    row.id.bold(),
                    row.severity,
                    row.layer,
                    row.domain,
                    row.description
                );
            }
            eprintln!("{} rules", rows.len());
        }
    }
    Ok(exit::ALLOWED)
}

fn run_rules_check(config: &PolicyConfig, files: &[PathBuf]) -> i32 {
    let store = PatternStore::new(Vec::new()).with_remote_options(config.remote.options());
    let mut failed = false;
    for path in files {
        let check = store.check_file(path);
        if check.errors.is_empty() {
            println!("{} {}: {} rules", "ok".green(), path.display(), check.rules);
        } else {
            failed = true;
            println!(
                "{} {}: {} rules, {} errors",
                "error".red().bold(),
                path.display(),
                check.rules,
                check.errors.len()
            );
            for error in &check.errors {
                println!("  {error}");
            }
        }
    }
    if failed { exit::USAGE } else { exit::ALLOWED }
}
