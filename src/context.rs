//! Command-word classification.
//!
//! Tables that decide, for a command word, whether its arguments are data
//! (never executed), inline code (executed by an interpreter), or the real
//! command hidden behind a wrapper such as `sudo` or `env`.
//!
//! The tables are conservative: a command is only listed as data-only when
//! none of its arguments can ever reach a shell.

use std::borrow::Cow;

use crate::model::ShellDialect;

/// An entry for a command+flag combination whose argument is data.
#[derive(Debug, Clone, Copy)]
pub struct DataFlagEntry {
    /// The command (base name, without path)
    pub command: &'static str,
    pub short_flag: Option<&'static str>,
    pub long_flag: Option<&'static str>,
}

impl DataFlagEntry {
    #[must_use]
    pub const fn short(command: &'static str, flag: &'static str) -> Self {
        Self {
            command,
            short_flag: Some(flag),
            long_flag: None,
        }
    }

    #[must_use]
    pub const fn long(command: &'static str, flag: &'static str) -> Self {
        Self {
            command,
            short_flag: None,
            long_flag: Some(flag),
        }
    }

    #[must_use]
    pub const fn both(command: &'static str, short: &'static str, long: &'static str) -> Self {
        Self {
            command,
            short_flag: Some(short),
            long_flag: Some(long),
        }
    }
}

/// An interpreter that runs the argument of one of its flags as code.
#[derive(Debug, Clone, Copy)]
pub struct InterpreterEntry {
    pub command: &'static str,
    /// Flags whose value is a program. Short flags may be clustered (`-lc`).
    pub code_flags: &'static [&'static str],
    /// Reads a program from stdin when given no script operand.
    pub reads_stdin: bool,
}

/// A command that runs another command given as its operands.
#[derive(Debug, Clone, Copy)]
pub struct WrapperEntry {
    pub command: &'static str,
    /// Options that consume the following word.
    pub arg_flags: &'static [&'static str],
    /// Positional operands consumed before the wrapped command (`timeout 5 rm`).
    pub leading_operands: usize,
    /// `NAME=value` words before the command are environment, not the command.
    pub takes_assignments: bool,
    /// Options that turn the wrapper into a query (`command -v rm`).
    pub query_flags: &'static [&'static str],
    /// Runs the wrapped command with raised privileges.
    pub elevates: bool,
}

/// A client that hands its trailing operands to a remote shell.
#[derive(Debug, Clone, Copy)]
pub struct RemoteShellEntry {
    pub command: &'static str,
    /// Options that consume the following word.
    pub arg_flags: &'static [&'static str],
}

/// Classification tables for command words.
#[derive(Debug, Clone)]
pub struct CommandTables {
    /// Commands whose arguments are all printed, never executed.
    data_commands: &'static [&'static str],
    /// Command + flag combinations where the flag's value is data.
    data_flags: &'static [DataFlagEntry],
    interpreters: &'static [InterpreterEntry],
    /// Commands that execute all of their operands as code.
    eval_commands: &'static [&'static str],
    wrappers: &'static [WrapperEntry],
    remote_shells: &'static [RemoteShellEntry],
    /// Command + flag combinations that run the following words as a
    /// command, up to a `;` or `+` terminator.
    exec_flags: &'static [(&'static str, &'static str)],
    /// Commands that fetch remote content to stdout.
    fetchers: &'static [&'static str],
}

/// Interpreter options that consume the following word.
pub const INTERPRETER_VALUE_FLAGS: &[&str] = &["-o", "-O", "+o", "+O", "-W", "-X"];

/// The default tables.
pub static COMMAND_TABLES: CommandTables = CommandTables {
    data_commands: &[
        "echo",
        "printf",
        "write-output",
        "write-host",
        "write-verbose",
        "write-warning",
        "write-information",
        "rem",
        ":",
    ],
    data_flags: &[
        DataFlagEntry::both("git", "-m", "--message"),
        DataFlagEntry::both("grep", "-e", "--regexp"),
        DataFlagEntry::both("rg", "-e", "--regexp"),
        DataFlagEntry::both("gh", "-t", "--title"),
        DataFlagEntry::both("gh", "-b", "--body"),
        DataFlagEntry::long("cargo", "--message"),
        DataFlagEntry::long("npm", "--message"),
        DataFlagEntry::short("logger", "-t"),
    ],
    interpreters: &[
        InterpreterEntry { command: "sh", code_flags: &["-c"], reads_stdin: true },
        InterpreterEntry { command: "bash", code_flags: &["-c"], reads_stdin: true },
        InterpreterEntry { command: "zsh", code_flags: &["-c"], reads_stdin: true },
        InterpreterEntry { command: "ksh", code_flags: &["-c"], reads_stdin: true },
        InterpreterEntry { command: "dash", code_flags: &["-c"], reads_stdin: true },
        InterpreterEntry { command: "fish", code_flags: &["-c", "--command"], reads_stdin: true },
        InterpreterEntry { command: "su", code_flags: &["-c", "--command"], reads_stdin: false },
        InterpreterEntry { command: "python", code_flags: &["-c"], reads_stdin: true },
        InterpreterEntry { command: "python2", code_flags: &["-c"], reads_stdin: true },
        InterpreterEntry { command: "python3", code_flags: &["-c"], reads_stdin: true },
        InterpreterEntry { command: "node", code_flags: &["-e", "--eval", "-p", "--print"], reads_stdin: true },
        InterpreterEntry { command: "nodejs", code_flags: &["-e", "--eval"], reads_stdin: true },
        InterpreterEntry { command: "ruby", code_flags: &["-e"], reads_stdin: true },
        InterpreterEntry { command: "perl", code_flags: &["-e", "-E"], reads_stdin: true },
        InterpreterEntry { command: "php", code_flags: &["-r"], reads_stdin: true },
        InterpreterEntry { command: "lua", code_flags: &["-e"], reads_stdin: true },
        InterpreterEntry { command: "powershell", code_flags: &["-command", "-c"], reads_stdin: true },
        InterpreterEntry { command: "pwsh", code_flags: &["-command", "-c"], reads_stdin: true },
        InterpreterEntry { command: "cmd", code_flags: &["/c", "/k"], reads_stdin: true },
    ],
    eval_commands: &["eval", "iex", "invoke-expression"],
    wrappers: &[
        WrapperEntry {
            command: "sudo",
            arg_flags: &["-u", "-g", "-h", "-p", "-C", "-r", "-U", "-D", "-t", "-a", "-T"],
            leading_operands: 0,
            takes_assignments: true,
            query_flags: &["-l", "-v", "-V", "-k", "-K"],
            elevates: true,
        },
        WrapperEntry {
            command: "doas",
            arg_flags: &["-u", "-C"],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: true,
        },
        WrapperEntry {
            command: "env",
            arg_flags: &["-u", "-C", "-S", "--unset", "--chdir"],
            leading_operands: 0,
            takes_assignments: true,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "nohup",
            arg_flags: &[],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "time",
            arg_flags: &["-f", "-o"],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "nice",
            arg_flags: &["-n", "--adjustment"],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "ionice",
            arg_flags: &["-c", "-n", "-p"],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "timeout",
            arg_flags: &["-s", "-k", "--signal", "--kill-after"],
            leading_operands: 1,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "stdbuf",
            arg_flags: &["-i", "-o", "-e"],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "command",
            arg_flags: &[],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &["-v", "-V"],
            elevates: false,
        },
        WrapperEntry {
            command: "builtin",
            arg_flags: &[],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "exec",
            arg_flags: &["-a"],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "xargs",
            arg_flags: &["-I", "-n", "-P", "-d", "-L", "-s", "-E", "-a"],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "watch",
            arg_flags: &["-n", "-d", "--interval"],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
        WrapperEntry {
            command: "start-process",
            arg_flags: &[],
            leading_operands: 0,
            takes_assignments: false,
            query_flags: &[],
            elevates: false,
        },
    ],
    remote_shells: &[
        RemoteShellEntry {
            command: "ssh",
            arg_flags: &[
                "-B", "-b", "-c", "-D", "-E", "-e", "-F", "-I", "-i", "-J", "-L", "-l", "-m", "-O", "-o", "-p",
                "-Q", "-R", "-S", "-W", "-w",
            ],
        },
        RemoteShellEntry { command: "rsh", arg_flags: &["-l"] },
    ],
    exec_flags: &[("find", "-exec"), ("find", "-execdir"), ("find", "-ok"), ("find", "-okdir")],
    fetchers: &[
        "curl",
        "wget",
        "fetch",
        "aria2c",
        "invoke-webrequest",
        "iwr",
        "invoke-restmethod",
        "irm",
        "nc",
        "ncat",
    ],
};

impl CommandTables {
    /// Every argument of `command` is printed output.
    #[must_use]
    pub fn is_data_command(&self, command: &str) -> bool {
        self.data_commands.contains(&command)
    }

    /// The value following `flag` is data for `command`.
    #[must_use]
    pub fn is_data_flag(&self, command: &str, flag: &str) -> bool {
        self.data_flags.iter().any(|entry| {
            entry.command == command
                && (entry.short_flag == Some(flag) || entry.long_flag == Some(flag))
        })
    }

    #[must_use]
    pub fn interpreter(&self, command: &str) -> Option<&'static InterpreterEntry> {
        let name = strip_version_suffix(command);
        self.interpreters.iter().find(|entry| entry.command == name)
    }

    /// True if `flag` makes `command` run its next argument as code.
    ///
    /// Clustered short options such as `bash -lc` count when the cluster
    /// ends with the code flag letter.
    #[must_use]
    pub fn is_inline_code_flag(&self, command: &str, flag: &str) -> bool {
        let Some(entry) = self.interpreter(command) else {
            return false;
        };
        let lowered = flag.to_ascii_lowercase();
        if matches!(entry.command, "powershell" | "pwsh") {
            // PowerShell accepts any unambiguous prefix: -c, -com, -command.
            return lowered.len() >= 2 && "-command".starts_with(lowered.as_str());
        }
        entry.code_flags.iter().any(|code| {
            if *code == lowered || *code == flag {
                return true;
            }
            // -lc, -xc, -ec
            code.len() == 2
                && code.starts_with('-')
                && flag.len() > 2
                && flag.starts_with('-')
                && !flag.starts_with("--")
                && flag.ends_with(&code[1..])
                && flag[1..].bytes().all(|b| b.is_ascii_alphabetic())
        })
    }

    /// Commands whose operands are all code (`eval`, `Invoke-Expression`).
    #[must_use]
    pub fn is_eval_command(&self, command: &str) -> bool {
        self.eval_commands.contains(&command)
    }

    #[must_use]
    pub fn wrapper(&self, command: &str) -> Option<&'static WrapperEntry> {
        self.wrappers.iter().find(|entry| entry.command == command)
    }

    /// Shells and language runtimes that execute a program read from stdin.
    #[must_use]
    pub fn is_stdin_interpreter(&self, command: &str) -> bool {
        self.interpreter(command).is_some_and(|entry| entry.reads_stdin)
            || self.is_eval_command(command)
    }

    /// Shell interpreters proper (targets for heredoc bodies).
    #[must_use]
    pub fn is_shell(&self, command: &str) -> bool {
        matches!(
            strip_version_suffix(command),
            "sh" | "bash" | "zsh" | "ksh" | "dash" | "fish" | "powershell" | "pwsh" | "cmd"
        )
    }

    #[must_use]
    pub fn is_fetcher(&self, command: &str) -> bool {
        self.fetchers.contains(&command)
    }

    /// Index into `args` where the remote command of `ssh host ...` starts.
    #[must_use]
    pub fn remote_command_index(&self, command: &str, args: &[&str]) -> Option<usize> {
        let entry = self.remote_shells.iter().find(|entry| entry.command == command)?;
        let mut i = 0;
        while i < args.len() {
            let arg = args[i];
            if arg.len() > 1 && arg.starts_with('-') {
                i += if entry.arg_flags.contains(&arg) { 2 } else { 1 };
                continue;
            }
            // args[i] is the host
            return (i + 1 < args.len()).then_some(i + 1);
        }
        None
    }

    /// `flag` makes `command` execute the words that follow it.
    #[must_use]
    pub fn is_exec_flag(&self, command: &str, flag: &str) -> bool {
        self.exec_flags.iter().any(|(c, f)| *c == command && *f == flag)
    }

    /// `command args...` executes a program read from stdin: a stdin
    /// interpreter with no inline code and no script operand, or one told
    /// explicitly to read stdin (`bash -s`, `python3 -`).
    #[must_use]
    pub fn reads_program_from_stdin(&self, command: &str, args: &[&str]) -> bool {
        if !self.is_stdin_interpreter(command) {
            return false;
        }
        let Some(entry) = self.interpreter(command) else {
            // eval commands
            return true;
        };
        let shell = self.is_shell(command);
        let mut i = 0;
        while i < args.len() {
            let arg = args[i];
            if arg == "-" || (shell && arg == "-s") {
                return true;
            }
            if self.is_inline_code_flag(command, arg) {
                // `pwsh -Command -` reads the script from stdin.
                return args.get(i + 1) == Some(&"-");
            }
            if arg == "-m" && entry.command.starts_with("python") {
                return false;
            }
            if arg.len() > 1 && (arg.starts_with('-') || arg.starts_with('+')) {
                i += if INTERPRETER_VALUE_FLAGS.contains(&arg) { 2 } else { 1 };
                continue;
            }
            if entry.command == "cmd" && arg.starts_with('/') {
                i += 1;
                continue;
            }
            return false;
        }
        true
    }
}

/// Reduce a command word to the name the tables use.
///
/// Strips a leading backslash (alias bypass), any directory prefix and, for
/// Windows dialects, the `.exe` suffix and letter case.
#[must_use]
pub fn base_command(word: &str, dialect: ShellDialect) -> Cow<'_, str> {
    let trimmed = word.strip_prefix('\\').unwrap_or(word);
    let base = if dialect.case_insensitive() {
        trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
    } else {
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    };
    if dialect.case_insensitive() {
        let lowered = base.to_ascii_lowercase();
        let stem = lowered
            .strip_suffix(".exe")
            .map_or_else(|| lowered.clone(), str::to_string);
        return Cow::Owned(stem);
    }
    Cow::Borrowed(base)
}

/// `python3.11` -> `python3`, `bash5` stays `bash5`.
fn strip_version_suffix(command: &str) -> &str {
    match command.split_once('.') {
        Some((head, tail)) if !head.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => command,
    }
}

/// `NAME=value` with a valid shell identifier on the left.
#[must_use]
pub fn is_env_assignment(token: &str) -> bool {
    let Some((name, _)) = token.split_once('=') else {
        return false;
    };
    let name = name.strip_suffix('+').unwrap_or(name);
    is_identifier(name)
}

#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
