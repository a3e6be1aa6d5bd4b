#![forbid(unsafe_code)]
//! `shellguard` command-line front end.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use shellguard::cli::{self, Cli};
use shellguard::logging::init_tracing;

/// Disable colour when stderr is not a terminal, unless `--color` says otherwise.
fn configure_colors() {
    if !io::stderr().is_terminal() {
        colored::control::set_override(false);
    }
}

fn main() -> ExitCode {
    configure_colors();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                exit(cli::exit::USAGE)
            } else {
                exit(cli::exit::ALLOWED)
            };
        }
    };

    init_tracing(cli.verbose, cli.log_format);

    match cli::run(cli) {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            exit(err.exit_code())
        }
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
