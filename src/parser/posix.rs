//! Recursive-descent parser for the POSIX shell family.

use super::lexer::{self, Operator, Token, TokenKind};
use super::{
    Assignment, CaseArm, CompoundKind, ListItem, ListOp, Node, RedirectTarget, Redirection,
    SimpleCommand, Word, WordPart, check_depth,
};
use crate::context::is_identifier;
use crate::error::ParseIncomplete;
use crate::model::Span;

/// Words that close a compound and may not start a command.
const CLOSERS: &[&str] = &["then", "else", "elif", "fi", "do", "done", "esac", "}"];

/// Parse `src` (starting at absolute offset `base`) into a command tree.
///
/// # Errors
///
/// [`ParseIncomplete`] for lexical errors, unexpected tokens, unclosed
/// compounds and excessive nesting.
pub fn parse_posix(src: &str, base: usize, depth: usize) -> Result<Node, ParseIncomplete> {
    check_depth(depth, base)?;
    let lexed = lexer::tokenize(src, base, depth)?;
    let mut parser = Parser {
        tokens: lexed.tokens,
        bodies: lexed.heredoc_bodies,
        pos: 0,
        depth,
        end: base + src.len(),
        last_end: base,
    };
    let node = parser.parse_list(&[])?;
    if let Some(token) = parser.peek() {
        return Err(ParseIncomplete::new(
            format!("unexpected {}", describe(&token.kind)),
            token.span.start,
        ));
    }
    Ok(node)
}

struct Parser {
    tokens: Vec<Token>,
    bodies: Vec<String>,
    pos: usize,
    depth: usize,
    end: usize,
    last_end: usize,
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Word(word) => format!("word `{}`", word.display_text()),
        TokenKind::Op(op) => format!("operator {op:?}"),
        TokenKind::Redirect { op, .. } | TokenKind::HereDoc { op, .. } => format!("redirection `{op}`"),
        TokenKind::Arith(_) => "arithmetic command".to_string(),
        TokenKind::Newline => "newline".to_string(),
    }
}

/// Unquoted single-literal word text, used for reserved-word checks.
fn plain_text(word: &Word) -> Option<&str> {
    match word.parts.as_slice() {
        [WordPart::Literal(text)] => Some(text),
        _ => None,
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn peek_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        self.last_end = token.span.end;
        Some(token)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |t| t.span.start)
    }

    fn error(&self, reason: impl Into<String>) -> ParseIncomplete {
        ParseIncomplete::new(reason, self.offset())
    }

    fn peek_reserved(&self) -> Option<&str> {
        match self.peek_kind() {
            Some(TokenKind::Word(word)) => plain_text(word),
            _ => None,
        }
    }

    fn at_op(&self, op: Operator) -> bool {
        self.peek_kind() == Some(&TokenKind::Op(op))
    }

    fn eat_op(&mut self, op: Operator) -> bool {
        let hit = self.at_op(op);
        if hit {
            self.advance();
        }
        hit
    }

    fn expect_op(&mut self, op: Operator, context: &str) -> Result<(), ParseIncomplete> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected {op:?} {context}")))
        }
    }

    fn expect_reserved(&mut self, word: &str) -> Result<(), ParseIncomplete> {
        if self.peek_reserved() == Some(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected `{word}`")))
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek_kind() == Some(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(
            self.peek_kind(),
            Some(TokenKind::Newline | TokenKind::Op(Operator::Semi))
        ) {
            self.advance();
        }
    }

    fn enter(&mut self) -> Result<(), ParseIncomplete> {
        self.depth += 1;
        check_depth(self.depth, self.offset())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn at_list_end(&self, terminators: &[&str]) -> bool {
        match self.peek_kind() {
            None | Some(TokenKind::Op(Operator::RParen | Operator::DSemi)) => true,
            Some(TokenKind::Word(word)) => {
                plain_text(word).is_some_and(|text| terminators.contains(&text))
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------------
    // Lists and pipelines
    // ------------------------------------------------------------------------

    fn parse_list(&mut self, terminators: &[&str]) -> Result<Node, ParseIncomplete> {
        let start = self.offset();
        let mut items: Vec<ListItem> = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_list_end(terminators) {
                break;
            }
            let node = self.parse_pipeline()?;
            let op = match self.peek_kind() {
                Some(TokenKind::Op(Operator::AndIf)) => Some(ListOp::And),
                Some(TokenKind::Op(Operator::OrIf)) => Some(ListOp::Or),
                Some(TokenKind::Op(Operator::Semi) | TokenKind::Newline) => Some(ListOp::Seq),
                Some(TokenKind::Op(Operator::Amp)) => Some(ListOp::Background),
                _ => None,
            };
            if op.is_some() {
                self.advance();
            }
            if matches!(op, Some(ListOp::And | ListOp::Or)) {
                self.skip_newlines();
                if self.at_list_end(terminators) {
                    return Err(self.error("expected command after `&&` or `||`"));
                }
            }
            let last = op.is_none();
            items.push(ListItem { node, op });
            if last {
                break;
            }
        }

        if items.len() == 1 && matches!(items[0].op, None | Some(ListOp::Seq)) {
            return Ok(items.remove(0).node);
        }
        let span = Span::new(start.min(self.last_end), self.last_end.max(start));
        Ok(Node::List { items, span })
    }

    /// A list that must contain at least one command.
    fn parse_body(&mut self, terminators: &[&str], what: &str) -> Result<Node, ParseIncomplete> {
        let body = self.parse_list(terminators)?;
        if matches!(&body, Node::List { items, .. } if items.is_empty()) {
            return Err(self.error(format!("empty {what}")));
        }
        Ok(body)
    }

    fn parse_pipeline(&mut self) -> Result<Node, ParseIncomplete> {
        let start = self.offset();
        let negated = self.peek_reserved() == Some("!");
        if negated {
            self.advance();
        }
        let mut commands = vec![self.parse_command()?];
        while matches!(
            self.peek_kind(),
            Some(TokenKind::Op(Operator::Pipe | Operator::PipeAmp))
        ) {
            self.advance();
            self.skip_newlines();
            commands.push(self.parse_command()?);
        }
        if commands.len() == 1 && !negated {
            return Ok(commands.remove(0));
        }
        Ok(Node::Pipeline {
            commands,
            negated,
            span: Span::new(start, self.last_end),
        })
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn parse_command(&mut self) -> Result<Node, ParseIncomplete> {
        let start = self.offset();
        let kind = match self.peek_kind() {
            None => return Err(self.error("expected command")),
            Some(TokenKind::Op(Operator::LParen)) => {
                self.advance();
                self.enter()?;
                let body = self.parse_body(&[], "subshell")?;
                self.expect_op(Operator::RParen, "to close subshell")?;
                self.leave();
                CompoundKind::Subshell { body }
            }
            Some(TokenKind::Arith(expr)) => {
                let expression = expr.clone();
                self.advance();
                CompoundKind::Arithmetic { expression }
            }
            Some(TokenKind::Word(word)) => match plain_text(word) {
                Some("{") => {
                    self.advance();
                    self.enter()?;
                    let body = self.parse_body(&["}"], "brace group")?;
                    self.expect_reserved("}")?;
                    self.leave();
                    CompoundKind::BraceGroup { body }
                }
                Some("if") => self.parse_if()?,
                Some("for") => self.parse_for()?,
                Some(keyword @ ("while" | "until")) => {
                    let until = keyword == "until";
                    self.parse_while(until)?
                }
                Some("case") => self.parse_case()?,
                Some("function") => self.parse_function_keyword()?,
                Some(closer) if CLOSERS.contains(&closer) => {
                    return Err(self.error(format!("unexpected `{closer}`")));
                }
                Some(name)
                    if self.peek_at(1) == Some(&TokenKind::Op(Operator::LParen))
                        && self.peek_at(2) == Some(&TokenKind::Op(Operator::RParen)) =>
                {
                    let name = name.to_string();
                    self.advance();
                    self.advance();
                    self.advance();
                    self.parse_function_body(name)?
                }
                _ => return self.parse_simple().map(Node::Simple),
            },
            Some(TokenKind::Redirect { .. } | TokenKind::HereDoc { .. }) => {
                return self.parse_simple().map(Node::Simple);
            }
            Some(other) => {
                let reason = format!("unexpected {}", describe(other));
                return Err(self.error(reason));
            }
        };
        let mut redirections = Vec::new();
        while let Some(redir) = self.parse_redirection()? {
            redirections.push(redir);
        }
        Ok(Node::Compound {
            kind: Box::new(kind),
            redirections,
            span: Span::new(start, self.last_end),
        })
    }

    fn parse_if(&mut self) -> Result<CompoundKind, ParseIncomplete> {
        self.advance();
        self.enter()?;
        let mut branches = Vec::new();
        let condition = self.parse_body(&["then"], "if condition")?;
        self.expect_reserved("then")?;
        let body = self.parse_body(&["elif", "else", "fi"], "then branch")?;
        branches.push((condition, body));
        let mut else_body = None;
        loop {
            match self.peek_reserved() {
                Some("elif") => {
                    self.advance();
                    let condition = self.parse_body(&["then"], "elif condition")?;
                    self.expect_reserved("then")?;
                    let body = self.parse_body(&["elif", "else", "fi"], "elif branch")?;
                    branches.push((condition, body));
                }
                Some("else") => {
                    self.advance();
                    else_body = Some(self.parse_body(&["fi"], "else branch")?);
                }
                _ => break,
            }
        }
        self.expect_reserved("fi")?;
        self.leave();
        Ok(CompoundKind::If {
            branches,
            else_body,
        })
    }

    fn parse_do_group(&mut self) -> Result<Node, ParseIncomplete> {
        self.skip_separators();
        self.expect_reserved("do")?;
        let body = self.parse_body(&["done"], "loop body")?;
        self.expect_reserved("done")?;
        Ok(body)
    }

    fn parse_for(&mut self) -> Result<CompoundKind, ParseIncomplete> {
        self.advance();
        self.enter()?;
        if let Some(TokenKind::Arith(header)) = self.peek_kind() {
            let header = header.clone();
            self.advance();
            let body = self.parse_do_group()?;
            self.leave();
            return Ok(CompoundKind::ArithFor { header, body });
        }
        let var = match self.advance() {
            Some(Token {
                kind: TokenKind::Word(word),
                ..
            }) => plain_text(&word)
                .filter(|name| is_identifier(name))
                .map(str::to_string)
                .ok_or_else(|| self.error("invalid for-loop variable"))?,
            _ => return Err(self.error("expected for-loop variable")),
        };
        self.skip_newlines();
        let items = if self.peek_reserved() == Some("in") {
            self.advance();
            let mut items = Vec::new();
            while let Some(TokenKind::Word(word)) = self.peek_kind() {
                items.push(word.clone());
                self.advance();
            }
            Some(items)
        } else {
            None
        };
        let body = self.parse_do_group()?;
        self.leave();
        Ok(CompoundKind::For { var, items, body })
    }

    fn parse_while(&mut self, until: bool) -> Result<CompoundKind, ParseIncomplete> {
        self.advance();
        self.enter()?;
        let condition = self.parse_body(&["do"], "loop condition")?;
        let body = self.parse_do_group()?;
        self.leave();
        Ok(CompoundKind::While {
            until,
            condition,
            body,
        })
    }

    fn parse_case(&mut self) -> Result<CompoundKind, ParseIncomplete> {
        self.advance();
        self.enter()?;
        let subject = match self.advance() {
            Some(Token {
                kind: TokenKind::Word(word),
                ..
            }) => word,
            _ => return Err(self.error("expected case subject")),
        };
        self.skip_newlines();
        self.expect_reserved("in")?;
        let mut arms = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek_reserved() == Some("esac") {
                self.advance();
                break;
            }
            if self.peek().is_none() {
                return Err(self.error("expected `esac`"));
            }
            self.eat_op(Operator::LParen);
            let mut patterns = Vec::new();
            loop {
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::Word(word),
                        ..
                    }) => patterns.push(word),
                    _ => return Err(self.error("expected case pattern")),
                }
                if !self.eat_op(Operator::Pipe) {
                    break;
                }
            }
            self.expect_op(Operator::RParen, "after case pattern")?;
            let body = self.parse_list(&["esac"])?;
            let body = match body {
                Node::List { ref items, .. } if items.is_empty() => None,
                other => Some(other),
            };
            arms.push(CaseArm { patterns, body });
            if !self.eat_op(Operator::DSemi) {
                self.skip_newlines();
                if self.peek_reserved() != Some("esac") {
                    return Err(self.error("expected `;;` or `esac`"));
                }
            }
        }
        self.leave();
        Ok(CompoundKind::Case { subject, arms })
    }

    fn parse_function_keyword(&mut self) -> Result<CompoundKind, ParseIncomplete> {
        self.advance();
        let name = match self.advance() {
            Some(Token {
                kind: TokenKind::Word(word),
                ..
            }) => word.display_text(),
            _ => return Err(self.error("expected function name")),
        };
        if self.at_op(Operator::LParen) && self.peek_at(1) == Some(&TokenKind::Op(Operator::RParen)) {
            self.advance();
            self.advance();
        }
        self.parse_function_body(name)
    }

    fn parse_function_body(&mut self, name: String) -> Result<CompoundKind, ParseIncomplete> {
        self.skip_newlines();
        self.enter()?;
        let body = self.parse_command()?;
        if matches!(body, Node::Simple(_)) {
            return Err(self.error("function body must be a compound command"));
        }
        self.leave();
        Ok(CompoundKind::FunctionDef { name, body })
    }

    // ------------------------------------------------------------------------
    // Simple commands
    // ------------------------------------------------------------------------

    fn parse_simple(&mut self) -> Result<SimpleCommand, ParseIncomplete> {
        let start = self.offset();
        let mut assignments = Vec::new();
        let mut words = Vec::new();
        let mut redirections = Vec::new();
        loop {
            if let Some(redir) = self.parse_redirection()? {
                redirections.push(redir);
                continue;
            }
            let Some(TokenKind::Word(word)) = self.peek_kind() else {
                break;
            };
            if words.is_empty() {
                if let Some(assignment) = split_assignment(word) {
                    assignments.push(assignment);
                    self.advance();
                    continue;
                }
            }
            words.push(word.clone());
            self.advance();
        }
        if assignments.is_empty() && words.is_empty() && redirections.is_empty() {
            return Err(self.error("expected command"));
        }
        Ok(SimpleCommand {
            assignments,
            words,
            redirections,
            span: Span::new(start, self.last_end),
        })
    }

    fn parse_redirection(&mut self) -> Result<Option<Redirection>, ParseIncomplete> {
        match self.peek().cloned() {
            Some(Token {
                kind: TokenKind::Redirect { fd, op },
                span,
            }) => {
                self.advance();
                let word = match self.advance() {
                    Some(Token {
                        kind: TokenKind::Word(word),
                        ..
                    }) => word,
                    _ => return Err(ParseIncomplete::new(format!("missing target for `{op}`"), span.end)),
                };
                Ok(Some(Redirection {
                    fd,
                    op: op.to_string(),
                    span: span.join(word.span),
                    target: RedirectTarget::Word { word },
                }))
            }
            Some(Token {
                kind:
                    TokenKind::HereDoc {
                        fd,
                        op,
                        delimiter,
                        quoted,
                        index,
                    },
                span,
            }) => {
                self.advance();
                let body = self.bodies.get(index).cloned().unwrap_or_default();
                Ok(Some(Redirection {
                    fd,
                    op: op.to_string(),
                    span,
                    target: RedirectTarget::HereDoc {
                        delimiter,
                        body,
                        quoted,
                    },
                }))
            }
            _ => Ok(None),
        }
    }
}

/// `NAME=value` / `NAME+=value` as an assignment, else `None`.
fn split_assignment(word: &Word) -> Option<Assignment> {
    let Some(WordPart::Literal(first)) = word.parts.first() else {
        return None;
    };
    let eq = first.find('=')?;
    let (name, append) = match first[..eq].strip_suffix('+') {
        Some(name) => (name, true),
        None => (&first[..eq], false),
    };
    if !is_identifier(name) {
        return None;
    }
    let mut parts = Vec::with_capacity(word.parts.len());
    let remainder = &first[eq + 1..];
    if !remainder.is_empty() {
        parts.push(WordPart::Literal(remainder.to_string()));
    }
    parts.extend(word.parts[1..].iter().cloned());
    let value_start = (word.span.start + eq + 1).min(word.span.end);
    let value = (!parts.is_empty()).then(|| Word {
        parts,
        span: Span::new(value_start, word.span.end),
    });
    Some(Assignment {
        name: name.to_string(),
        value,
        append,
        span: word.span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SubstStyle;

    fn parse(src: &str) -> Node {
        parse_posix(src, 0, 0).unwrap_or_else(|e| panic!("{src:?} failed: {e}"))
    }

    #[track_caller]
    fn assert_incomplete(src: &str) {
        assert!(parse_posix(src, 0, 0).is_err(), "{src:?} should be incomplete");
    }

    fn names(node: &Node) -> Vec<String> {
        node.simple_commands()
            .iter()
            .filter_map(|c| c.command_name())
            .collect()
    }

    #[test]
    fn simple_command_with_assignments_and_redirections() {
        let Node::Simple(cmd) = parse("DIR=/ LANG=C rm -rf \"$DIR\" 2>/dev/null") else {
            panic!("expected simple command");
        };
        assert_eq!(cmd.assignments.len(), 2);
        assert_eq!(cmd.assignments[0].name, "DIR");
        assert_eq!(cmd.assignments[0].value.as_ref().unwrap().literal_text().as_deref(), Some("/"));
        assert_eq!(cmd.command_name().as_deref(), Some("rm"));
        assert_eq!(cmd.redirections[0].fd, Some(2));
        assert_eq!(cmd.redirections[0].op, ">");
    }

    #[test]
    fn list_operators() {
        let Node::List { items, .. } = parse("DIR=/; rm -rf \"$DIR\" && echo ok || echo no &") else {
            panic!("expected list");
        };
        let ops: Vec<_> = items.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![Some(ListOp::Seq), Some(ListOp::And), Some(ListOp::Or), Some(ListOp::Background)]
        );
    }

    #[test]
    fn pipelines_and_negation() {
        let Node::Pipeline { commands, negated, .. } = parse("! curl -s http://x |& sudo sh") else {
            panic!("expected pipeline");
        };
        assert!(negated);
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn fork_bomb_is_a_function_definition() {
        let node = parse(":(){ :|:& };:");
        let Node::List { items, .. } = &node else {
            panic!("expected list, got {node:?}");
        };
        let Node::Compound { kind, .. } = &items[0].node else {
            panic!("expected compound");
        };
        let CompoundKind::FunctionDef { name, body } = kind.as_ref() else {
            panic!("expected function");
        };
        assert_eq!(name, ":");
        assert_eq!(names(body), vec![":", ":"]);
    }

    #[test]
    fn compound_commands() {
        let node = parse(
            "if test -d /x; then rm -rf /x; elif true; then :; else echo no; fi\n\
             for f in a b; do rm \"$f\"; done\n\
             while false; do sleep 1; done\n\
             case $x in a|b) echo ab ;; *) echo other ;; esac\n\
             function cleanup { rm -f /tmp/x; }\n\
             (cd /tmp && ls) > out\n\
             { echo a; echo b; }",
        );
        let Node::List { items, .. } = node else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 7);
        assert!(items.iter().all(|i| matches!(i.node, Node::Compound { .. })));
    }

    #[test]
    fn for_loop_items() {
        let Node::Compound { kind, .. } = parse("for d in /tmp /var; do rm -rf $d; done") else {
            panic!("expected compound");
        };
        let CompoundKind::For { var, items, .. } = *kind else {
            panic!("expected for");
        };
        assert_eq!(var, "d");
        let items: Vec<_> = items.unwrap().iter().map(Word::display_text).collect();
        assert_eq!(items, vec!["/tmp", "/var"]);
    }

    #[test]
    fn substitutions_are_parsed() {
        let Node::Simple(cmd) = parse("echo $(rm -rf /) `ls` <(cat a)") else {
            panic!("expected simple command");
        };
        let styles: Vec<_> = cmd
            .words
            .iter()
            .flat_map(|w| w.substitutions())
            .map(|s| s.style)
            .collect();
        assert_eq!(styles, vec![SubstStyle::Dollar, SubstStyle::Backtick, SubstStyle::ProcessIn]);
    }

    #[test]
    fn heredoc_redirection() {
        let Node::Pipeline { commands, .. } = parse("cat <<EOF | bash\nrm -rf /\nEOF") else {
            panic!("expected pipeline");
        };
        let Node::Simple(cat) = &commands[0] else {
            panic!("expected simple");
        };
        assert!(matches!(
            &cat.redirections[0].target,
            RedirectTarget::HereDoc { body, quoted: false, .. } if body == "rm -rf /\n"
        ));
    }

    #[test]
    fn spans_cover_source() {
        let src = "ls -la && rm -rf /tmp/x";
        let Node::List { items, span } = parse(src) else {
            panic!("expected list");
        };
        assert_eq!(span, Span::new(0, src.len()));
        assert_eq!(items[1].node.span().slice(src), Some("rm -rf /tmp/x"));
    }

    #[test]
    fn incomplete_inputs() {
        for src in [
            "if true; then echo",
            "for x in a; do echo",
            "case x in a) echo",
            "(ls",
            "ls &&",
            "| grep x",
            "fi",
            "{ echo",
            "echo 'unterminated",
        ] {
            assert_incomplete(src);
        }
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let src = format!("{}ls{}", "( ".repeat(200), " )".repeat(200));
        assert_incomplete(&src);
        let src = format!("{}ls{}", "$(echo ".repeat(100), ")".repeat(100));
        assert_incomplete(&src);
    }

    #[test]
    fn empty_input_is_an_empty_list() {
        assert!(matches!(parse("   # just a comment"), Node::List { items, .. } if items.is_empty()));
    }
}
