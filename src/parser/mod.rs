//! Shell syntax parser.
//!
//! Two parser families share one AST:
//!
//! - [`posix`]: sh, bash, zsh and the POSIX-compatible subset of fish,
//!   tokenized by [`lexer`].
//! - [`windows`]: PowerShell and cmd.exe.
//!
//! Every node and word carries a byte [`Span`] into the raw command. The
//! parser is strict: anything it cannot fully understand is reported as
//! [`ParseIncomplete`] and the caller falls back to text-only layers.

pub mod lexer;
pub mod posix;
pub mod windows;

use serde::Serialize;

use crate::error::ParseIncomplete;
use crate::model::{ShellDialect, Span};

/// Commands longer than this are not parsed.
pub const MAX_INPUT_BYTES: usize = 64 * 1024;

/// Maximum nesting of compounds and substitutions.
pub const MAX_DEPTH: usize = 64;

/// Parse `raw` as a command line in `dialect`.
///
/// # Errors
///
/// Returns [`ParseIncomplete`] on unterminated constructs, unexpected
/// tokens, oversized input or nesting deeper than [`MAX_DEPTH`].
#[tracing::instrument(level = "trace", skip(raw), fields(len = raw.len()))]
pub fn parse(raw: &str, dialect: ShellDialect) -> Result<ParsedCommand, ParseIncomplete> {
    if raw.len() > MAX_INPUT_BYTES {
        return Err(ParseIncomplete::new(
            format!("input exceeds {MAX_INPUT_BYTES} bytes"),
            MAX_INPUT_BYTES,
        ));
    }
    let root = match dialect {
        ShellDialect::PowerShell => windows::parse_powershell(raw, 0, 0)?,
        ShellDialect::Cmd => windows::parse_cmd(raw, 0, 0)?,
        _ => posix::parse_posix(raw, 0, 0)?,
    };
    Ok(ParsedCommand { dialect, root })
}

pub(crate) fn check_depth(depth: usize, offset: usize) -> Result<(), ParseIncomplete> {
    if depth > MAX_DEPTH {
        return Err(ParseIncomplete::new(
            format!("nesting deeper than {MAX_DEPTH}"),
            offset,
        ));
    }
    Ok(())
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedCommand {
    pub dialect: ShellDialect,
    pub root: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Simple(SimpleCommand),
    Pipeline {
        commands: Vec<Node>,
        negated: bool,
        span: Span,
    },
    List {
        items: Vec<ListItem>,
        span: Span,
    },
    Compound {
        kind: Box<CompoundKind>,
        redirections: Vec<Redirection>,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListItem {
    pub node: Node,
    /// Operator following this item (`None` for the last item).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<ListOp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOp {
    And,
    Or,
    Seq,
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompoundKind {
    Subshell {
        body: Node,
    },
    BraceGroup {
        body: Node,
    },
    If {
        /// `(condition, body)` for `if` and each `elif`.
        branches: Vec<(Node, Node)>,
        else_body: Option<Node>,
    },
    For {
        var: String,
        /// `None` iterates the positional parameters.
        items: Option<Vec<Word>>,
        body: Node,
    },
    ArithFor {
        header: String,
        body: Node,
    },
    While {
        until: bool,
        condition: Node,
        body: Node,
    },
    Case {
        subject: Word,
        arms: Vec<CaseArm>,
    },
    Arithmetic {
        expression: String,
    },
    FunctionDef {
        name: String,
        body: Node,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseArm {
    pub patterns: Vec<Word>,
    pub body: Option<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleCommand {
    pub assignments: Vec<Assignment>,
    pub words: Vec<Word>,
    pub redirections: Vec<Redirection>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub name: String,
    pub value: Option<Word>,
    pub append: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redirection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fd: Option<u32>,
    pub op: String,
    pub target: RedirectTarget,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RedirectTarget {
    Word { word: Word },
    HereDoc {
        delimiter: String,
        body: String,
        /// Quoted delimiter: the body is taken literally.
        quoted: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Word {
    pub parts: Vec<WordPart>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "part", content = "value", rename_all = "snake_case")]
pub enum WordPart {
    Literal(String),
    SingleQuoted(String),
    DoubleQuoted(Vec<WordPart>),
    AnsiC(String),
    Expansion(Expansion),
    CommandSubst(Substitution),
    Arithmetic(String),
}

/// Parameter expansion: `$X`, `${X}`, `${X:-default}`, `$env:X`, `%X%`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Expansion {
    pub name: String,
    /// Modifier operator such as `:-`, `#`, `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Substitution {
    pub style: SubstStyle,
    /// Parsed body; `None` when the body is empty.
    pub body: Option<Box<Node>>,
    pub raw: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstStyle {
    Dollar,
    Backtick,
    ProcessIn,
    ProcessOut,
    PsSubexpression,
    ScriptBlock,
    Group,
}

// ============================================================================
// Accessors and traversal
// ============================================================================

impl Node {
    #[must_use]
    pub const fn span(&self) -> Span {
        match self {
            Self::Simple(cmd) => cmd.span,
            Self::Pipeline { span, .. } | Self::List { span, .. } | Self::Compound { span, .. } => {
                *span
            }
        }
    }

    /// Visit this node and every node below it in source order, including
    /// the bodies of command substitutions.
    pub fn walk<'a, F: FnMut(&'a Self)>(&'a self, f: &mut F) {
        f(self);
        match self {
            Self::Simple(cmd) => {
                for word in cmd.all_words() {
                    word.walk_substitutions(f);
                }
                walk_redirections(&cmd.redirections, f);
            }
            Self::Pipeline { commands, .. } => commands.iter().for_each(|c| c.walk(f)),
            Self::List { items, .. } => items.iter().for_each(|i| i.node.walk(f)),
            Self::Compound {
                kind, redirections, ..
            } => {
                kind.walk(f);
                walk_redirections(redirections, f);
            }
        }
    }

    /// Simple commands in source order, at any depth.
    #[must_use]
    pub fn simple_commands(&self) -> Vec<&SimpleCommand> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let Self::Simple(cmd) = node {
                out.push(cmd);
            }
        });
        out
    }
}

fn walk_redirections<'a, F: FnMut(&'a Node)>(redirections: &'a [Redirection], f: &mut F) {
    for redir in redirections {
        if let RedirectTarget::Word { word } = &redir.target {
            word.walk_substitutions(f);
        }
    }
}

impl CompoundKind {
    fn walk<'a, F: FnMut(&'a Node)>(&'a self, f: &mut F) {
        match self {
            Self::Subshell { body }
            | Self::BraceGroup { body }
            | Self::ArithFor { body, .. }
            | Self::FunctionDef { body, .. } => body.walk(f),
            Self::If {
                branches,
                else_body,
            } => {
                for (cond, body) in branches {
                    cond.walk(f);
                    body.walk(f);
                }
                if let Some(body) = else_body {
                    body.walk(f);
                }
            }
            Self::For { items, body, .. } => {
                for word in items.iter().flatten() {
                    word.walk_substitutions(f);
                }
                body.walk(f);
            }
            Self::While {
                condition, body, ..
            } => {
                condition.walk(f);
                body.walk(f);
            }
            Self::Case { subject, arms } => {
                subject.walk_substitutions(f);
                for body in arms.iter().filter_map(|a| a.body.as_ref()) {
                    body.walk(f);
                }
            }
            Self::Arithmetic { .. } => {}
        }
    }
}

impl SimpleCommand {
    /// Assignment values, then words.
    pub fn all_words(&self) -> impl Iterator<Item = &Word> {
        self.assignments
            .iter()
            .filter_map(|a| a.value.as_ref())
            .chain(self.words.iter())
    }

    /// Literal text of the first word, if it has no expansions.
    #[must_use]
    pub fn command_name(&self) -> Option<String> {
        self.words.first().and_then(Word::literal_text)
    }
}

impl Word {
    #[must_use]
    pub fn literal(text: impl Into<String>, span: Span) -> Self {
        Self {
            parts: vec![WordPart::Literal(text.into())],
            span,
        }
    }

    /// Concatenated value when the word contains no expansion or substitution.
    #[must_use]
    pub fn literal_text(&self) -> Option<String> {
        let mut out = String::new();
        push_literal_parts(&self.parts, &mut out).then_some(out)
    }

    /// Dequoted text with expansions and substitutions shown in source form.
    #[must_use]
    pub fn display_text(&self) -> String {
        let mut out = String::new();
        push_display_parts(&self.parts, &mut out);
        out
    }

    #[must_use]
    pub fn is_quoted(&self) -> bool {
        self.parts.iter().any(|p| {
            matches!(
                p,
                WordPart::SingleQuoted(_) | WordPart::DoubleQuoted(_) | WordPart::AnsiC(_)
            )
        })
    }

    /// Expansions in this word, including those inside double quotes.
    #[must_use]
    pub fn expansions(&self) -> Vec<&Expansion> {
        let mut out = Vec::new();
        collect_expansions(&self.parts, &mut out);
        out
    }

    #[must_use]
    pub fn substitutions(&self) -> Vec<&Substitution> {
        let mut out = Vec::new();
        collect_substitutions(&self.parts, &mut out);
        out
    }

    /// The first part is an expansion (`"$DIR"/x`, `$HOME`).
    #[must_use]
    pub fn starts_with_expansion(&self) -> bool {
        match self.parts.first() {
            Some(WordPart::Expansion(_)) => true,
            Some(WordPart::DoubleQuoted(inner)) => {
                matches!(inner.first(), Some(WordPart::Expansion(_)))
            }
            _ => false,
        }
    }

    fn walk_substitutions<'a, F: FnMut(&'a Node)>(&'a self, f: &mut F) {
        for sub in self.substitutions() {
            if let Some(body) = &sub.body {
                body.walk(f);
            }
        }
    }
}

fn push_literal_parts(parts: &[WordPart], out: &mut String) -> bool {
    for part in parts {
        match part {
            WordPart::Literal(s) | WordPart::SingleQuoted(s) | WordPart::AnsiC(s) => out.push_str(s),
            WordPart::DoubleQuoted(inner) => {
                if !push_literal_parts(inner, out) {
                    return false;
                }
            }
            WordPart::Expansion(_) | WordPart::CommandSubst(_) | WordPart::Arithmetic(_) => {
                return false;
            }
        }
    }
    true
}

fn push_display_parts(parts: &[WordPart], out: &mut String) {
    for part in parts {
        match part {
            WordPart::Literal(s) | WordPart::SingleQuoted(s) | WordPart::AnsiC(s) => out.push_str(s),
            WordPart::DoubleQuoted(inner) => push_display_parts(inner, out),
            WordPart::Expansion(exp) => {
                out.push('$');
                out.push_str(&exp.name);
            }
            WordPart::CommandSubst(sub) => out.push_str(&sub.raw),
            WordPart::Arithmetic(expr) => {
                out.push_str("$((");
                out.push_str(expr);
                out.push_str("))");
            }
        }
    }
}

fn collect_expansions<'a>(parts: &'a [WordPart], out: &mut Vec<&'a Expansion>) {
    for part in parts {
        match part {
            WordPart::Expansion(exp) => out.push(exp),
            WordPart::DoubleQuoted(inner) => collect_expansions(inner, out),
            _ => {}
        }
    }
}

fn collect_substitutions<'a>(parts: &'a [WordPart], out: &mut Vec<&'a Substitution>) {
    for part in parts {
        match part {
            WordPart::CommandSubst(sub) => out.push(sub),
            WordPart::DoubleQuoted(inner) => collect_substitutions(inner, out),
            _ => {}
        }
    }
}
