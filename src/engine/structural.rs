//! Structural predicates evaluated over the parsed command.

use crate::context::{COMMAND_TABLES, INTERPRETER_VALUE_FLAGS};
use crate::engine::resolve::{ReplayedCommand, ResolvedWord, effective_command};
use crate::model::{ShellDialect, Span};
use crate::parser::{CompoundKind, ListOp, Node, RedirectTarget, SimpleCommand, Substitution, Word};
use crate::rules::StructuralPredicate;

/// Output redirection operators.
const OUTPUT_OPS: &[&str] = &[">", ">>", ">|", "&>", "&>>", "<>"];

const SOURCING_COMMANDS: &[&str] = &["source", "."];

/// One place where a predicate holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralHit {
    pub span: Span,
    /// Arguments of the offending command, for filters.
    pub args: Vec<String>,
    /// Text the `UnlessMatches` filter is applied to.
    pub text: String,
}

/// Every place `predicate` holds under `root`.
#[must_use]
pub fn find(
    predicate: &StructuralPredicate,
    root: &Node,
    replays: &[ReplayedCommand<'_>],
    shell: ShellDialect,
) -> Vec<StructuralHit> {
    match predicate {
        StructuralPredicate::PipelineSink { sources, sinks } => {
            pipeline_sinks(root, sources, sinks, shell)
        }
        StructuralPredicate::FetchExecuted => fetch_executed(root, shell),
        StructuralPredicate::ExpandedTarget { verbs } => unresolved_targets(replays, verbs),
        StructuralPredicate::SubstitutedCommand { verbs } => substituted(root, verbs, shell),
        StructuralPredicate::RedirectTarget { paths } => redirects(root, paths),
        StructuralPredicate::RecursiveFunction => recursive_functions(root, shell),
        StructuralPredicate::EvalOfExpansion => eval_of_expansion(replays),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Index and name of the effective command word, using source text.
fn effective(cmd: &SimpleCommand, shell: ShellDialect) -> Option<(usize, String)> {
    let words: Vec<ResolvedWord> = cmd
        .words
        .iter()
        .map(|w| ResolvedWord {
            text: w.display_text(),
            ..ResolvedWord::default()
        })
        .collect();
    effective_command(&words, shell)
}

/// Effective command and operands of a simple command, using source text.
fn static_command(cmd: &SimpleCommand, shell: ShellDialect) -> Option<(String, Vec<String>)> {
    let (index, name) = effective(cmd, shell)?;
    let args = cmd.words[index + 1..].iter().map(Word::display_text).collect();
    Some((name, args))
}

fn as_strs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}

/// `sinks` lists the stage, or it is empty and the stage reads its program
/// from stdin.
fn is_sink(sinks: &[String], name: &str, args: &[String]) -> bool {
    if sinks.is_empty() {
        COMMAND_TABLES.reads_program_from_stdin(name, &as_strs(args))
    } else {
        listed(sinks, name)
    }
}

fn listed(list: &[String], name: &str) -> bool {
    list.iter().any(|entry| entry.eq_ignore_ascii_case(name))
}

fn hit(span: Span, args: Vec<String>, root_text: String) -> StructuralHit {
    StructuralHit {
        span,
        args,
        text: root_text,
    }
}

fn joined(name: &str, args: &[String]) -> String {
    let mut text = name.to_string();
    for arg in args {
        text.push(' ');
        text.push_str(arg);
    }
    text
}

/// Every node under `root`, substitution bodies included.
fn nodes(root: &Node) -> Vec<&Node> {
    let mut out = Vec::new();
    root.walk(&mut |node| out.push(node));
    out
}

// ============================================================================
// Predicates
// ============================================================================

fn pipeline_sinks(
    root: &Node,
    sources: &[String],
    sinks: &[String],
    shell: ShellDialect,
) -> Vec<StructuralHit> {
    let mut hits = Vec::new();
    for node in nodes(root) {
        let Node::Pipeline { commands, .. } = node else {
            continue;
        };
        let stages: Vec<Option<(String, Vec<String>)>> = commands
            .iter()
            .map(|stage| {
                stage
                    .simple_commands()
                    .first()
                    .and_then(|cmd| static_command(cmd, shell))
            })
            .collect();
        for (j, sink) in stages.iter().enumerate().skip(1) {
            let Some((sink_name, sink_args)) = sink else {
                continue;
            };
            if !is_sink(sinks, sink_name, sink_args) {
                continue;
            }
            let feeder = stages[..j].iter().position(|stage| {
                stage
                    .as_ref()
                    .is_some_and(|(name, _)| sources.is_empty() || listed(sources, name))
            });
            if let Some(i) = feeder {
                let span = commands[i].span().join(commands[j].span());
                hits.push(hit(span, sink_args.clone(), joined(sink_name, sink_args)));
            }
        }
    }
    hits
}

fn fetch_executed(root: &Node, shell: ShellDialect) -> Vec<StructuralHit> {
    let mut hits = Vec::new();
    for node in nodes(root) {
        match node {
            Node::Pipeline { commands, .. } => {
                let stages: Vec<Option<(String, Vec<String>)>> = commands
                    .iter()
                    .map(|stage| {
                        stage
                            .simple_commands()
                            .first()
                            .and_then(|cmd| static_command(cmd, shell))
                    })
                    .collect();
                for (j, sink) in stages.iter().enumerate().skip(1) {
                    let Some((name, args)) = sink else { continue };
                    if !COMMAND_TABLES.reads_program_from_stdin(name, &as_strs(args)) {
                        continue;
                    }
                    let fetcher = stages[..j].iter().position(|stage| {
                        stage
                            .as_ref()
                            .is_some_and(|(feeder, _)| COMMAND_TABLES.is_fetcher(feeder))
                    });
                    if let Some(i) = fetcher {
                        let span = commands[i].span().join(commands[j].span());
                        hits.push(hit(span, args.clone(), joined(name, args)));
                    }
                }
            }
            Node::Simple(cmd) => {
                let Some((index, name)) = effective(cmd, shell) else {
                    continue;
                };
                let operands = &cmd.words[index + 1..];
                let fetched = code_operands(&name, operands)
                    .iter()
                    .flat_map(|word| word.substitutions())
                    .any(|sub| runs_fetcher(sub, shell));
                if fetched {
                    let args: Vec<String> = operands.iter().map(Word::display_text).collect();
                    let text = joined(&name, &args);
                    hits.push(hit(cmd.span, args, text));
                }
            }
            _ => {}
        }
    }
    hits
}

/// Operands `command` executes as a program: every operand of `eval` and
/// `source`, the value of an inline code flag, or an interpreter's script.
fn code_operands<'a>(command: &str, args: &'a [Word]) -> &'a [Word] {
    if COMMAND_TABLES.is_eval_command(command) || SOURCING_COMMANDS.contains(&command) {
        return args;
    }
    let Some(entry) = COMMAND_TABLES.interpreter(command) else {
        return &[];
    };
    let mut i = 0;
    while i < args.len() {
        let text = args[i].display_text();
        if COMMAND_TABLES.is_inline_code_flag(command, &text) {
            let rest = &args[(i + 1).min(args.len())..];
            // PowerShell and cmd join everything after the flag.
            return if matches!(entry.command, "powershell" | "pwsh" | "cmd") {
                rest
            } else {
                &rest[..rest.len().min(1)]
            };
        }
        if text == "-m" && entry.command.starts_with("python") {
            return &[];
        }
        if text.len() > 1 && (text.starts_with('-') || text.starts_with('+')) {
            i += if INTERPRETER_VALUE_FLAGS.contains(&text.as_str()) { 2 } else { 1 };
            continue;
        }
        if entry.command == "cmd" && text.starts_with('/') {
            i += 1;
            continue;
        }
        return &args[i..=i];
    }
    &[]
}

/// The substitution body runs a download command.
fn runs_fetcher(sub: &Substitution, shell: ShellDialect) -> bool {
    sub.body.as_ref().is_some_and(|body| {
        body.simple_commands().iter().any(|cmd| {
            static_command(cmd, shell).is_some_and(|(name, _)| COMMAND_TABLES.is_fetcher(&name))
        })
    })
}

fn unresolved_targets(replays: &[ReplayedCommand<'_>], verbs: &[String]) -> Vec<StructuralHit> {
    replays
        .iter()
        .filter(|r| r.command_name().is_some_and(|name| listed(verbs, name)))
        .filter(|r| r.operands().iter().any(|w| w.unresolved_path_prefix))
        .map(|r| {
            let args: Vec<String> = r.operands().iter().map(|w| w.text.clone()).collect();
            let text = joined(r.command_name().unwrap_or_default(), &args);
            hit(r.command.span, args, text)
        })
        .collect()
}

fn substituted(root: &Node, verbs: &[String], shell: ShellDialect) -> Vec<StructuralHit> {
    let mut hits = Vec::new();
    for cmd in root.simple_commands() {
        for word in cmd.all_words() {
            for sub in word.substitutions() {
                let Some(body) = &sub.body else { continue };
                for inner in body.simple_commands() {
                    if let Some((name, args)) = static_command(inner, shell) {
                        if listed(verbs, &name) {
                            hits.push(hit(sub.span, args.clone(), joined(&name, &args)));
                        }
                    }
                }
            }
        }
    }
    hits
}

fn redirects(root: &Node, paths: &[String]) -> Vec<StructuralHit> {
    let mut hits = Vec::new();
    for node in nodes(root) {
        let redirections = match node {
            Node::Simple(cmd) => &cmd.redirections,
            Node::Compound { redirections, .. } => redirections,
            _ => continue,
        };
        for redirection in redirections {
            if !OUTPUT_OPS.contains(&redirection.op.as_str()) {
                continue;
            }
            let RedirectTarget::Word { word } = &redirection.target else {
                continue;
            };
            let target = word.display_text();
            if paths.iter().any(|p| target.starts_with(p.as_str())) {
                let text = format!("{} {target}", redirection.op);
                hits.push(hit(redirection.span, vec![target], text));
            }
        }
    }
    hits
}

fn recursive_functions(root: &Node, shell: ShellDialect) -> Vec<StructuralHit> {
    let mut hits = Vec::new();
    for node in nodes(root) {
        let Node::Compound { kind, span, .. } = node else {
            continue;
        };
        let CompoundKind::FunctionDef { name, body } = kind.as_ref() else {
            continue;
        };
        if calls_self_concurrently(body, name, shell) {
            hits.push(hit(*span, Vec::new(), name.clone()));
        }
    }
    hits
}

/// The body runs `name` as a pipeline stage or as a background job.
fn calls_self_concurrently(body: &Node, name: &str, shell: ShellDialect) -> bool {
    let calls_self = |node: &Node| {
        node.simple_commands()
            .iter()
            .any(|cmd| static_command(cmd, shell).is_some_and(|(called, _)| called == name))
    };
    let mut found = false;
    body.walk(&mut |node| match node {
        Node::Pipeline { commands, .. } => {
            found |= commands.iter().any(|stage| calls_self(stage));
        }
        Node::List { items, .. } => {
            found |= items
                .iter()
                .any(|item| item.op == Some(ListOp::Background) && calls_self(&item.node));
        }
        _ => {}
    });
    found
}

fn eval_of_expansion(replays: &[ReplayedCommand<'_>]) -> Vec<StructuralHit> {
    replays
        .iter()
        .filter(|r| {
            r.command_name().is_some_and(|name| {
                COMMAND_TABLES.is_eval_command(name) || SOURCING_COMMANDS.contains(&name)
            })
        })
        .filter(|r| r.operands().iter().any(ResolvedWord::is_dynamic))
        .map(|r| {
            let args: Vec<String> = r.operands().iter().map(|w| w.text.clone()).collect();
            let text = joined(r.command_name().unwrap_or_default(), &args);
            hit(r.command.span, args, text)
        })
        .collect()
}
