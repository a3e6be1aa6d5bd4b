//! Static variable resolution over the parsed command.
//!
//! Walks the AST in execution order, tracking assignments (`X=1`,
//! `export X=1`, `declare`, `local`, `readonly`, `for X in ...`) and
//! substituting known values into every simple command. Nothing is
//! executed: a value is known only when it is built from literals and other
//! known values. Command substitutions are always unknown.
//!
//! Unquoted substituted values are split into fields on `IFS`, which holds
//! its default blanks until the command assigns it.

use std::collections::HashMap;

use crate::context::{COMMAND_TABLES, base_command, is_env_assignment, is_identifier};
use crate::model::ShellDialect;
use crate::parser::{CompoundKind, Expansion, Node, SimpleCommand, Word, WordPart};

/// Loop bodies are replayed for at most this many items.
const MAX_LOOP_ITEMS: usize = 16;

/// Replays stop after this many commands.
const MAX_REPLAYS: usize = 512;

const DECLARATION_BUILTINS: &[&str] = &["export", "declare", "typeset", "local", "readonly", "set-variable"];

/// Value of `IFS` in a fresh shell.
const DEFAULT_IFS: &str = " \t\n";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    Known(String),
    Unknown,
}

/// One word after substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedWord {
    /// Text with known values substituted; unknown expansions stay `$NAME`.
    pub text: String,
    /// Names of expansions that could not be resolved.
    pub unresolved: Vec<String>,
    /// At least one expansion was replaced by a known value.
    pub substituted: bool,
    /// Contains a command substitution.
    pub has_substitution: bool,
    /// Starts with an unresolved expansion immediately followed by `/`.
    pub unresolved_path_prefix: bool,
}

impl ResolvedWord {
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        !self.unresolved.is_empty() || self.has_substitution
    }
}

/// A resolved word and the byte ranges of `IFS` characters that came from
/// unquoted substituted values.
#[derive(Debug, Default)]
struct Expanded {
    word: ResolvedWord,
    splits: Vec<std::ops::Range<usize>>,
}

impl Expanded {
    /// The fields the shell would pass as separate words. Empty fields from
    /// leading, trailing or repeated separators are dropped.
    fn fields(self) -> Vec<ResolvedWord> {
        if self.splits.is_empty() {
            return vec![self.word];
        }
        let text = &self.word.text;
        let mut bounds = Vec::new();
        let mut start = 0;
        for split in &self.splits {
            bounds.push(start..split.start);
            start = split.end;
        }
        bounds.push(start..text.len());
        bounds
            .into_iter()
            .filter(|range| !range.is_empty())
            .enumerate()
            .map(|(i, range)| ResolvedWord {
                text: text[range].to_string(),
                unresolved: self.word.unresolved.clone(),
                substituted: self.word.substituted,
                has_substitution: self.word.has_substitution,
                unresolved_path_prefix: i == 0 && self.word.unresolved_path_prefix,
            })
            .collect()
    }
}

/// A simple command with its words resolved.
#[derive(Debug, Clone)]
pub struct ReplayedCommand<'a> {
    pub command: &'a SimpleCommand,
    pub words: Vec<ResolvedWord>,
    /// Effective command after wrapper stripping, and its word index.
    pub name: Option<(usize, String)>,
}

impl ReplayedCommand<'_> {
    /// Some expansion was replaced, so the replay differs from the source.
    #[must_use]
    pub fn resolved_any(&self) -> bool {
        self.words.iter().any(|w| w.substituted)
    }

    #[must_use]
    pub fn command_name(&self) -> Option<&str> {
        self.name.as_ref().map(|(_, name)| name.as_str())
    }

    /// Words after the effective command.
    #[must_use]
    pub fn operands(&self) -> &[ResolvedWord] {
        match &self.name {
            Some((index, _)) => &self.words[index + 1..],
            None => &[],
        }
    }

    /// The resolved command as shell text in `shell`'s quoting.
    #[must_use]
    pub fn replay_text(&self, shell: ShellDialect) -> String {
        self.words
            .iter()
            .map(|w| quote(&w.text, shell))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Resolve every simple command under `root` in execution order.
#[must_use]
pub fn replay(root: &Node, shell: ShellDialect) -> Vec<ReplayedCommand<'_>> {
    let mut walker = Walker {
        env: HashMap::new(),
        out: Vec::new(),
        shell,
    };
    walker.node(root);
    walker.out
}

struct Walker<'a> {
    env: HashMap<String, Binding>,
    out: Vec<ReplayedCommand<'a>>,
    shell: ShellDialect,
}

impl<'a> Walker<'a> {
    fn node(&mut self, node: &'a Node) {
        if self.out.len() >= MAX_REPLAYS {
            return;
        }
        match node {
            Node::Simple(cmd) => self.simple(cmd),
            Node::Pipeline { commands, .. } => commands.iter().for_each(|c| self.node(c)),
            Node::List { items, .. } => items.iter().for_each(|i| self.node(&i.node)),
            Node::Compound { kind, .. } => self.compound(kind),
        }
    }

    fn compound(&mut self, kind: &'a CompoundKind) {
        match kind {
            CompoundKind::Subshell { body }
            | CompoundKind::BraceGroup { body }
            | CompoundKind::ArithFor { body, .. }
            | CompoundKind::FunctionDef { body, .. } => self.node(body),
            CompoundKind::If {
                branches,
                else_body,
            } => {
                for (condition, body) in branches {
                    self.node(condition);
                    self.node(body);
                }
                if let Some(body) = else_body {
                    self.node(body);
                }
            }
            CompoundKind::While {
                condition, body, ..
            } => {
                self.node(condition);
                self.node(body);
            }
            CompoundKind::Case { arms, .. } => {
                for body in arms.iter().filter_map(|a| a.body.as_ref()) {
                    self.node(body);
                }
            }
            CompoundKind::For { var, items, body } => {
                let values: Vec<Binding> = items.as_ref().map_or_else(
                    || vec![Binding::Unknown],
                    |words| {
                        words
                            .iter()
                            .take(MAX_LOOP_ITEMS)
                            .map(|w| self.binding_of(w))
                            .collect()
                    },
                );
                for value in values {
                    self.env.insert(var.clone(), value);
                    self.node(body);
                }
            }
            CompoundKind::Arithmetic { .. } => {}
        }
    }

    fn simple(&mut self, cmd: &'a SimpleCommand) {
        for word in cmd.all_words() {
            for sub in word.substitutions() {
                if let Some(body) = &sub.body {
                    self.node(body);
                }
            }
        }

        for assignment in &cmd.assignments {
            let value = assignment
                .value
                .as_ref()
                .map_or_else(|| Binding::Known(String::new()), |w| self.binding_of(w));
            let value = match (assignment.append, self.env.get(&assignment.name), value) {
                (true, Some(Binding::Known(prev)), Binding::Known(more)) => {
                    Binding::Known(format!("{prev}{more}"))
                }
                (true, _, _) => Binding::Unknown,
                (false, _, value) => value,
            };
            self.env.insert(assignment.name.clone(), value);
        }
        if cmd.words.is_empty() {
            return;
        }

        let expanded: Vec<Expanded> = cmd.words.iter().map(|w| self.expand(w)).collect();
        let unsplit: Vec<ResolvedWord> = expanded.iter().map(|e| e.word.clone()).collect();
        if let Some((index, command)) = effective_command(&unsplit, self.shell) {
            if DECLARATION_BUILTINS.contains(&command.as_str()) {
                for (word, source) in unsplit[index + 1..].iter().zip(&cmd.words[index + 1..]) {
                    self.declare(word, source);
                }
            }
        }
        let words: Vec<ResolvedWord> = expanded.into_iter().flat_map(Expanded::fields).collect();
        let name = effective_command(&words, self.shell);

        self.out.push(ReplayedCommand {
            command: cmd,
            words,
            name,
        });
    }

    /// `export X=1`, `declare -r X=$Y`.
    fn declare(&mut self, resolved: &ResolvedWord, source: &Word) {
        if !is_env_assignment(&resolved.text) {
            return;
        }
        let Some((name, value)) = resolved.text.split_once('=') else {
            return;
        };
        let name = name.trim_end_matches('+');
        let binding = if source.substitutions().is_empty() && resolved.unresolved.is_empty() {
            Binding::Known(value.to_string())
        } else {
            Binding::Unknown
        };
        self.env.insert(name.to_string(), binding);
    }

    fn binding_of(&self, word: &Word) -> Binding {
        let resolved = self.resolve(word);
        if resolved.is_dynamic() {
            Binding::Unknown
        } else {
            Binding::Known(resolved.text)
        }
    }

    fn resolve(&self, word: &Word) -> ResolvedWord {
        self.expand(word).word
    }

    fn expand(&self, word: &Word) -> Expanded {
        let mut out = Expanded::default();
        let ifs = self.ifs();
        self.resolve_parts(&word.parts, false, &ifs, &mut out);
        if word.starts_with_expansion() {
            if let Some(first) = word.expansions().first() {
                if self.lookup(first).is_none() {
                    let placeholder_len = first.name.len() + 1;
                    out.word.unresolved_path_prefix = out
                        .word
                        .text
                        .get(placeholder_len..)
                        .is_some_and(|rest| rest.starts_with('/'));
                }
            }
        }
        out
    }

    /// Field separators currently in effect.
    fn ifs(&self) -> String {
        match self.env.get("IFS") {
            Some(Binding::Known(value)) => value.clone(),
            _ => DEFAULT_IFS.to_string(),
        }
    }

    fn resolve_parts(&self, parts: &[WordPart], quoted: bool, ifs: &str, expanded: &mut Expanded) {
        for part in parts {
            let out = &mut expanded.word;
            match part {
                WordPart::Literal(s) | WordPart::SingleQuoted(s) | WordPart::AnsiC(s) => {
                    out.text.push_str(s);
                }
                WordPart::DoubleQuoted(inner) => self.resolve_parts(inner, true, ifs, expanded),
                WordPart::Expansion(exp) => match self.lookup(exp) {
                    Some(value) => {
                        let base = out.text.len();
                        out.text.push_str(&value);
                        out.substituted = true;
                        if !quoted {
                            expanded.splits.extend(
                                value
                                    .char_indices()
                                    .filter(|(_, ch)| ifs.contains(*ch))
                                    .map(|(i, ch)| base + i..base + i + ch.len_utf8()),
                            );
                        }
                    }
                    None => {
                        out.text.push('$');
                        out.text.push_str(&exp.name);
                        out.unresolved.push(exp.name.clone());
                    }
                },
                WordPart::CommandSubst(sub) => {
                    out.text.push_str(&sub.raw);
                    out.has_substitution = true;
                }
                WordPart::Arithmetic(expr) => {
                    out.text.push_str("$((");
                    out.text.push_str(expr);
                    out.text.push_str("))");
                }
            }
        }
    }

    /// Value of an expansion, honouring `${X:-default}`-style operators.
    fn lookup(&self, exp: &Expansion) -> Option<String> {
        let known = match self.env.get(&exp.name) {
            Some(Binding::Known(value)) => Some(value.as_str()),
            None if exp.name == "IFS" => Some(DEFAULT_IFS),
            _ => None,
        };
        let argument = exp
            .argument
            .as_deref()
            .filter(|arg| !arg.contains(['$', '`']));
        match exp.operator.as_deref() {
            None => known.map(str::to_string),
            Some(":-" | ":=") => match known {
                Some(value) if !value.is_empty() => Some(value.to_string()),
                _ if self.env.get(&exp.name) == Some(&Binding::Unknown) => None,
                _ => argument.map(str::to_string),
            },
            Some("-" | "=") => match known {
                Some(value) => Some(value.to_string()),
                None if self.env.contains_key(&exp.name) => None,
                None => argument.map(str::to_string),
            },
            Some(":+" | "+") => match known {
                Some(value) if !value.is_empty() || exp.operator.as_deref() == Some("+") => {
                    argument.map(str::to_string)
                }
                Some(_) => Some(String::new()),
                None => None,
            },
            Some(":?" | "?") => known.map(str::to_string),
            Some(_) => None,
        }
    }
}

/// Index and base name of the command a word list runs, skipping wrappers
/// such as `sudo -u root` and `timeout 5`. `None` for a query like
/// `command -v rm`.
#[must_use]
pub fn effective_command(words: &[ResolvedWord], shell: ShellDialect) -> Option<(usize, String)> {
    let mut i = 0;
    while i < words.len() {
        let name = base_command(&words[i].text, shell).into_owned();
        let Some(wrapper) = COMMAND_TABLES.wrapper(&name) else {
            return Some((i, name));
        };
        i += 1;
        while let Some(word) = words.get(i) {
            let text = word.text.as_str();
            if wrapper.query_flags.contains(&text) {
                return None;
            }
            if wrapper.takes_assignments && is_env_assignment(text) {
                i += 1;
            } else if text == "--" {
                i += 1;
                break;
            } else if text.len() > 1 && text.starts_with('-') {
                i += if wrapper.arg_flags.contains(&text) { 2 } else { 1 };
            } else {
                break;
            }
        }
        i += wrapper.leading_operands;
    }
    None
}

/// Quote `text` so it reads back as one word in `shell`.
fn quote(text: &str, shell: ShellDialect) -> String {
    let plain = !text.is_empty()
        && text
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_-./:=@%+,~".contains(&b));
    if plain {
        return text.to_string();
    }
    match shell {
        ShellDialect::PowerShell => format!("'{}'", text.replace('\'', "''")),
        ShellDialect::Cmd => format!("\"{}\"", text.replace('"', "")),
        _ => format!("'{}'", text.replace('\'', r"'\''")),
    }
}

/// Variable names bound anywhere under `root` (for diagnostics).
#[must_use]
pub fn assigned_names(root: &Node) -> Vec<String> {
    let mut names = Vec::new();
    for cmd in root.simple_commands() {
        for assignment in &cmd.assignments {
            if is_identifier(&assignment.name) && !names.contains(&assignment.name) {
                names.push(assignment.name.clone());
            }
        }
    }
    names
}
