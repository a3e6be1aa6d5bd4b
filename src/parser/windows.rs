//! PowerShell and cmd.exe parser.
//!
//! Both dialects share one scanner. Script blocks, `$(...)` subexpressions
//! and parenthesized groups become command substitutions whose bodies are
//! parsed recursively, so the structural layer can walk them like POSIX
//! substitutions.
//!
//! [`tokenize_lenient`] reuses the word scanner to emit the same token
//! stream as the POSIX lexer, recovering from every unterminated construct.

use super::lexer::{Lexed, Operator, Token, TokenKind};
use super::{
    Assignment, CompoundKind, Expansion, ListItem, ListOp, Node, RedirectTarget, Redirection,
    SimpleCommand, SubstStyle, Substitution, Word, WordPart, check_depth,
};
use crate::error::ParseIncomplete;
use crate::model::{ShellDialect, Span};

/// Parse a PowerShell command line.
///
/// # Errors
///
/// [`ParseIncomplete`] on unterminated strings or blocks, stray closers
/// and excessive nesting.
pub fn parse_powershell(src: &str, base: usize, depth: usize) -> Result<Node, ParseIncomplete> {
    WinParser::new(src, base, depth, Flavor::PowerShell, false).parse_top()
}

/// Parse a cmd.exe command line.
///
/// # Errors
///
/// [`ParseIncomplete`] on unterminated quotes or groups.
pub fn parse_cmd(src: &str, base: usize, depth: usize) -> Result<Node, ParseIncomplete> {
    WinParser::new(src, base, depth, Flavor::Cmd, false).parse_top()
}

/// Token stream for a PowerShell or cmd.exe line. Never fails: unterminated
/// strings and blocks run to the end of input, and blocks keep only their
/// raw text.
#[must_use]
pub fn tokenize_lenient(src: &str, dialect: ShellDialect) -> Lexed {
    let flavor = if dialect == ShellDialect::Cmd {
        Flavor::Cmd
    } else {
        Flavor::PowerShell
    };
    WinParser::new(src, 0, 0, flavor, true).tokens()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    PowerShell,
    Cmd,
}

const PS_ASSIGN_OPS: &[&str] = &["=", "+=", "-=", "*=", "/=", "%=", "??="];

struct WinParser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    base: usize,
    depth: usize,
    flavor: Flavor,
    lenient: bool,
}

impl<'a> WinParser<'a> {
    const fn new(src: &'a str, base: usize, depth: usize, flavor: Flavor, lenient: bool) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            base,
            depth,
            flavor,
            lenient,
        }
    }

    fn tokens(mut self) -> Lexed {
        let mut out = Lexed::default();
        let mut command_start = true;
        loop {
            self.skip_blanks();
            let Some(b) = self.cur() else { break };
            let start = self.pos;
            if let Some((op, len)) = self.operator_at(b, command_start) {
                self.pos += len;
                let kind = if op == Operator::Semi && b == b'\n' {
                    TokenKind::Newline
                } else {
                    TokenKind::Op(op)
                };
                out.tokens.push(Token { kind, span: self.span(start) });
                command_start = !matches!(op, Operator::RParen);
                continue;
            }
            if let Some((fd, op)) = self.read_redirect_op() {
                out.tokens.push(Token {
                    kind: TokenKind::Redirect { fd, op },
                    span: self.span(start),
                });
                continue;
            }
            let word = match self.read_word() {
                Ok(word) if self.pos > start => word,
                _ => {
                    self.pos = start;
                    let mut skipped = String::new();
                    self.take_char(&mut skipped);
                    continue;
                }
            };
            let is_rem = self.flavor == Flavor::Cmd
                && command_start
                && word.literal_text().is_some_and(|w| w.trim_start_matches('@').eq_ignore_ascii_case("rem"));
            out.tokens.push(Token {
                span: word.span,
                kind: TokenKind::Word(word),
            });
            command_start = false;
            if is_rem {
                self.skip_blanks();
                let rest_start = self.pos;
                self.skip_line();
                if self.pos > rest_start {
                    let text = self.src[rest_start..self.pos].trim_end();
                    out.tokens.push(Token {
                        kind: TokenKind::Word(Word::literal(text, self.span(rest_start))),
                        span: self.span(rest_start),
                    });
                }
            }
        }
        out
    }

    /// Control operator at the cursor for the token stream.
    fn operator_at(&self, b: u8, command_start: bool) -> Option<(Operator, usize)> {
        if self.starts_with("&&") {
            return Some((Operator::AndIf, 2));
        }
        if self.starts_with("||") {
            return Some((Operator::OrIf, 2));
        }
        match (self.flavor, b) {
            (_, b'\n') => Some((Operator::Semi, 1)),
            (_, b'|') => Some((Operator::Pipe, 1)),
            (Flavor::PowerShell, b';') => Some((Operator::Semi, 1)),
            (Flavor::PowerShell, b'&') => Some((Operator::Amp, 1)),
            (Flavor::Cmd, b'&') => Some((Operator::Semi, 1)),
            (Flavor::Cmd, b'(') if command_start => Some((Operator::LParen, 1)),
            (_, b')') => Some((Operator::RParen, 1)),
            (Flavor::PowerShell, b'}') => Some((Operator::RParen, 1)),
            _ => None,
        }
    }

    fn parse_top(mut self) -> Result<Node, ParseIncomplete> {
        check_depth(self.depth, self.base)?;
        let node = self.parse_list(None)?;
        if self.pos < self.bytes.len() {
            return Err(self.err(format!("unexpected `{}`", char::from(self.bytes[self.pos]))));
        }
        Ok(node)
    }

    fn err(&self, reason: impl Into<String>) -> ParseIncomplete {
        ParseIncomplete::new(reason, self.base + self.pos)
    }

    fn span(&self, start: usize) -> Span {
        Span::new(self.base + start, self.base + self.pos)
    }

    fn cur(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.bytes[self.pos.min(self.bytes.len())..].starts_with(s.as_bytes())
    }

    const fn escape(&self) -> u8 {
        match self.flavor {
            Flavor::PowerShell => b'`',
            Flavor::Cmd => b'^',
        }
    }

    fn take_char(&mut self, into: &mut String) {
        if let Some(ch) = self.src[self.pos..].chars().next() {
            into.push(ch);
            self.pos += ch.len_utf8();
        } else {
            self.pos += 1;
        }
    }

    /// Spaces, tabs, line continuations and comments. Newlines are kept.
    fn skip_blanks(&mut self) {
        loop {
            match self.cur() {
                Some(b' ' | b'\t' | b'\r') => self.pos += 1,
                Some(b) if b == self.escape() && self.peek(1) == Some(b'\n') => self.pos += 2,
                Some(b'#') if self.flavor == Flavor::PowerShell => self.skip_line(),
                Some(b'<') if self.flavor == Flavor::PowerShell && self.peek(1) == Some(b'#') => {
                    self.pos = memchr::memmem::find(&self.bytes[self.pos..], b"#>")
                        .map_or(self.bytes.len(), |o| self.pos + o + 2);
                }
                Some(b':') if self.flavor == Flavor::Cmd && self.peek(1) == Some(b':') => self.skip_line(),
                _ => return,
            }
        }
    }

    fn skip_line(&mut self) {
        self.pos = memchr::memchr(b'\n', &self.bytes[self.pos..]).map_or(self.bytes.len(), |o| self.pos + o);
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn parse_list(&mut self, close: Option<u8>) -> Result<Node, ParseIncomplete> {
        let start = self.pos;
        let mut items: Vec<ListItem> = Vec::new();
        loop {
            loop {
                self.skip_blanks();
                match self.cur() {
                    Some(b'\n') => self.pos += 1,
                    Some(b';') if self.flavor == Flavor::PowerShell => self.pos += 1,
                    _ => break,
                }
            }
            let Some(b) = self.cur() else {
                if close.is_some() {
                    return Err(self.err("unterminated block"));
                }
                break;
            };
            if Some(b) == close {
                break;
            }
            let stray_closer = match self.flavor {
                Flavor::PowerShell => matches!(b, b')' | b'}'),
                Flavor::Cmd => b == b')',
            };
            if stray_closer {
                return Err(self.err(format!("unexpected `{}`", char::from(b))));
            }
            let node = self.parse_pipeline(close)?;
            self.skip_blanks();
            let op = if self.starts_with("&&") {
                self.pos += 2;
                Some(ListOp::And)
            } else if self.starts_with("||") {
                self.pos += 2;
                Some(ListOp::Or)
            } else {
                match self.cur() {
                    Some(b'\n') => Some(ListOp::Seq),
                    Some(b';') if self.flavor == Flavor::PowerShell => Some(ListOp::Seq),
                    // `&` separates commands in cmd; in PowerShell it backgrounds.
                    Some(b'&') if self.flavor == Flavor::Cmd => Some(ListOp::Seq),
                    Some(b'&') => Some(ListOp::Background),
                    _ => None,
                }
                .inspect(|_| self.pos += 1)
            };
            if matches!(op, Some(ListOp::And | ListOp::Or)) {
                self.skip_blanks();
                while self.cur() == Some(b'\n') {
                    self.pos += 1;
                    self.skip_blanks();
                }
                if self.cur().is_none() || self.cur() == close {
                    return Err(self.err("expected command after `&&` or `||`"));
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
        Ok(Node::List {
            items,
            span: self.span(start),
        })
    }

    fn parse_pipeline(&mut self, close: Option<u8>) -> Result<Node, ParseIncomplete> {
        let start = self.pos;
        let mut commands = vec![self.parse_command(close)?];
        loop {
            self.skip_blanks();
            if self.cur() == Some(b'|') && self.peek(1) != Some(b'|') {
                self.pos += 1;
                self.skip_blanks();
                while self.cur() == Some(b'\n') {
                    self.pos += 1;
                    self.skip_blanks();
                }
                commands.push(self.parse_command(close)?);
            } else {
                break;
            }
        }
        if commands.len() == 1 {
            return Ok(commands.remove(0));
        }
        Ok(Node::Pipeline {
            commands,
            negated: false,
            span: self.span(start),
        })
    }

    fn parse_command(&mut self, close: Option<u8>) -> Result<Node, ParseIncomplete> {
        self.skip_blanks();
        let start = self.pos;

        if self.flavor == Flavor::Cmd && self.cur() == Some(b'(') {
            self.pos += 1;
            let body = self.parse_block(b')')?;
            let mut redirections = Vec::new();
            while let Some(redir) = self.parse_redirection()? {
                redirections.push(redir);
            }
            return Ok(Node::Compound {
                kind: Box::new(CompoundKind::Subshell { body }),
                redirections,
                span: self.span(start),
            });
        }

        let mut words: Vec<Word> = Vec::new();
        let mut redirections = Vec::new();
        loop {
            self.skip_blanks();
            let Some(b) = self.cur() else { break };
            if b == b'\n' || b == b'|' || Some(b) == close || self.starts_with("&&") || self.starts_with("||") {
                break;
            }
            if self.flavor == Flavor::PowerShell && matches!(b, b';' | b')' | b'}') {
                break;
            }
            if self.flavor == Flavor::Cmd && b == b')' {
                break;
            }
            if b == b'&' {
                // PowerShell call operator in command position.
                if self.flavor == Flavor::PowerShell && words.is_empty() && redirections.is_empty() {
                    self.pos += 1;
                    continue;
                }
                break;
            }
            if let Some(redir) = self.parse_redirection()? {
                redirections.push(redir);
                continue;
            }
            if self.flavor == Flavor::Cmd && words.is_empty() && b == b'@' {
                self.pos += 1;
                continue;
            }
            let word = self.read_word()?;
            let is_rem = self.flavor == Flavor::Cmd
                && words.is_empty()
                && word.literal_text().is_some_and(|w| w.eq_ignore_ascii_case("rem"));
            words.push(word);
            if is_rem {
                let rest_start = self.pos;
                self.skip_line();
                let text = self.src[rest_start..self.pos].trim();
                if !text.is_empty() {
                    words.push(Word::literal(text, self.span(rest_start)));
                }
                break;
            }
        }
        if words.is_empty() && redirections.is_empty() {
            return Err(self.err("expected command"));
        }
        let span = self.span(start);
        let assignments = match self.flavor {
            Flavor::PowerShell => extract_ps_assignment(&mut words),
            Flavor::Cmd => extract_cmd_assignment(&mut words),
        };
        Ok(Node::Simple(SimpleCommand {
            assignments,
            words,
            redirections,
            span,
        }))
    }

    fn parse_redirection(&mut self) -> Result<Option<Redirection>, ParseIncomplete> {
        let start = self.pos;
        let Some((fd, op)) = self.read_redirect_op() else {
            return Ok(None);
        };
        self.skip_blanks();
        if self.cur().is_none_or(|b| matches!(b, b'\n' | b'|' | b'&' | b';')) {
            return Err(self.err(format!("missing target for `{op}`")));
        }
        let word = self.read_word()?;
        Ok(Some(Redirection {
            fd,
            op: op.to_string(),
            target: RedirectTarget::Word { word },
            span: self.span(start),
        }))
    }

    /// Redirection operator and optional fd at the cursor.
    fn read_redirect_op(&mut self) -> Option<(Option<u32>, &'static str)> {
        let (fd, skip) = match (self.cur(), self.peek(1)) {
            (Some(d), Some(b'>' | b'<')) if d.is_ascii_digit() => (Some(u32::from(d - b'0')), 1),
            (Some(b'*'), Some(b'>')) if self.flavor == Flavor::PowerShell => (None, 1),
            (Some(b'>' | b'<'), _) => (None, 0),
            _ => return None,
        };
        self.pos += skip;
        let op = if self.starts_with(">>") {
            ">>"
        } else if self.starts_with(">&") {
            ">&"
        } else if self.starts_with(">") {
            ">"
        } else {
            "<"
        };
        self.pos += op.len();
        // 2>&1 in PowerShell is spelled the same as in cmd.
        let op = if op == ">" && self.cur() == Some(b'&') {
            self.pos += 1;
            ">&"
        } else {
            op
        };
        Some((fd, op))
    }

    /// Parse a nested block after its opener, consuming the closer.
    fn parse_block(&mut self, close: u8) -> Result<Node, ParseIncomplete> {
        self.depth += 1;
        check_depth(self.depth, self.base + self.pos)?;
        let body = self.parse_list(Some(close))?;
        if self.cur() != Some(close) {
            return Err(self.err(format!("expected `{}`", char::from(close))));
        }
        self.pos += 1;
        self.depth -= 1;
        Ok(body)
    }

    fn block_part(&mut self, style: SubstStyle, open_len: usize, close: u8) -> Result<WordPart, ParseIncomplete> {
        let start = self.pos;
        self.pos += open_len;
        if self.lenient {
            let end = if close == b'}' {
                super::lexer::matching_brace(self.bytes, self.pos)
            } else {
                super::lexer::matching_paren(self.bytes, self.pos)
            };
            self.pos = end.unwrap_or(self.bytes.len());
            return Ok(WordPart::CommandSubst(Substitution {
                style,
                body: None,
                raw: self.src[start..self.pos].to_string(),
                span: self.span(start),
            }));
        }
        let body = self.parse_block(close)?;
        let empty = matches!(&body, Node::List { items, .. } if items.is_empty());
        Ok(WordPart::CommandSubst(Substitution {
            style,
            body: (!empty).then(|| Box::new(body)),
            raw: self.src[start..self.pos].to_string(),
            span: self.span(start),
        }))
    }

    // ------------------------------------------------------------------------
    // Words
    // ------------------------------------------------------------------------

    fn is_break(&self, b: u8) -> bool {
        match self.flavor {
            Flavor::PowerShell => matches!(
                b,
                b' ' | b'\t' | b'\r' | b'\n' | b'|' | b';' | b'&' | b'>' | b'<' | b')' | b'}'
            ),
            Flavor::Cmd => matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'|' | b'&' | b'>' | b'<' | b')'),
        }
    }

    fn read_word(&mut self) -> Result<Word, ParseIncomplete> {
        let start = self.pos;
        let mut parts = Vec::new();
        let mut lit = String::new();
        while let Some(b) = self.cur() {
            if self.is_break(b) {
                break;
            }
            if b == self.escape() {
                self.pos += 1;
                match self.cur() {
                    Some(b'\n') => self.pos += 1,
                    Some(_) => self.take_char(&mut lit),
                    None => {}
                }
                continue;
            }
            match (self.flavor, b) {
                (Flavor::PowerShell, b'\'') => {
                    flush(&mut lit, &mut parts);
                    parts.push(WordPart::SingleQuoted(self.read_ps_single()?));
                }
                (_, b'"') => {
                    flush(&mut lit, &mut parts);
                    parts.push(WordPart::DoubleQuoted(self.read_double()?));
                }
                (Flavor::PowerShell, b'@') if matches!(self.peek(1), Some(b'"' | b'\'')) => {
                    flush(&mut lit, &mut parts);
                    parts.push(self.read_here_string()?);
                }
                (Flavor::PowerShell, b'@') if self.peek(1) == Some(b'(') => {
                    flush(&mut lit, &mut parts);
                    parts.push(self.block_part(SubstStyle::PsSubexpression, 2, b')')?);
                }
                (Flavor::PowerShell, b'@') if self.peek(1) == Some(b'{') => {
                    let end = super::lexer::matching_brace(self.bytes, self.pos + 2)
                        .or(self.lenient.then_some(self.bytes.len()))
                        .ok_or_else(|| self.err("unterminated hashtable"))?;
                    lit.push_str(&self.src[self.pos..end]);
                    self.pos = end;
                }
                (Flavor::PowerShell, b'$') => match self.read_ps_dollar()? {
                    Some(part) => {
                        flush(&mut lit, &mut parts);
                        parts.push(part);
                    }
                    None => {
                        lit.push('$');
                        self.pos += 1;
                    }
                },
                (Flavor::PowerShell, b'{') => {
                    flush(&mut lit, &mut parts);
                    parts.push(self.block_part(SubstStyle::ScriptBlock, 1, b'}')?);
                }
                (_, b'(') => {
                    flush(&mut lit, &mut parts);
                    parts.push(self.block_part(SubstStyle::Group, 1, b')')?);
                }
                (Flavor::Cmd, b'%' | b'!') => match self.read_cmd_variable(b) {
                    Some(part) => {
                        flush(&mut lit, &mut parts);
                        parts.push(part);
                    }
                    None => self.take_char(&mut lit),
                },
                _ => self.take_char(&mut lit),
            }
        }
        flush(&mut lit, &mut parts);
        Ok(Word {
            parts,
            span: self.span(start),
        })
    }

    fn read_ps_single(&mut self) -> Result<String, ParseIncomplete> {
        let open = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.cur() {
                None if self.lenient => return Ok(out),
                None => {
                    self.pos = open;
                    return Err(self.err("unterminated single quote"));
                }
                Some(b'\'') if self.peek(1) == Some(b'\'') => {
                    out.push('\'');
                    self.pos += 2;
                }
                Some(b'\'') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(_) => self.take_char(&mut out),
            }
        }
    }

    fn read_double(&mut self) -> Result<Vec<WordPart>, ParseIncomplete> {
        let open = self.pos;
        self.pos += 1;
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            let Some(b) = self.cur() else {
                if self.lenient {
                    break;
                }
                self.pos = open;
                return Err(self.err("unterminated double quote"));
            };
            match (self.flavor, b) {
                (Flavor::PowerShell, b'"') if self.peek(1) == Some(b'"') => {
                    lit.push('"');
                    self.pos += 2;
                }
                (_, b'"') => {
                    self.pos += 1;
                    break;
                }
                (Flavor::PowerShell, b'`') => {
                    self.pos += 1;
                    if self.cur().is_some() {
                        self.take_char(&mut lit);
                    }
                }
                (Flavor::PowerShell, b'$') => match self.read_ps_dollar()? {
                    Some(part) => {
                        flush(&mut lit, &mut parts);
                        parts.push(part);
                    }
                    None => {
                        lit.push('$');
                        self.pos += 1;
                    }
                },
                (Flavor::Cmd, b'%' | b'!') => match self.read_cmd_variable(b) {
                    Some(part) => {
                        flush(&mut lit, &mut parts);
                        parts.push(part);
                    }
                    None => self.take_char(&mut lit),
                },
                _ => self.take_char(&mut lit),
            }
        }
        flush(&mut lit, &mut parts);
        Ok(parts)
    }

    /// `@"..."@` / `@'...'@`; the closer must start a line.
    fn read_here_string(&mut self) -> Result<WordPart, ParseIncomplete> {
        let quote = self.bytes[self.pos + 1];
        let closer = if quote == b'"' { "\n\"@" } else { "\n'@" };
        let body_start = self.pos + 2;
        let offset = match memchr::memmem::find(&self.bytes[body_start..], closer.as_bytes()) {
            Some(offset) => offset,
            None if self.lenient => self.bytes.len() - body_start,
            None => return Err(self.err("unterminated here-string")),
        };
        let body = self.src[body_start..body_start + offset]
            .trim_start_matches(['\r', '\n'])
            .to_string();
        self.pos = (body_start + offset + closer.len()).min(self.bytes.len());
        Ok(if quote == b'"' {
            WordPart::DoubleQuoted(vec![WordPart::Literal(body)])
        } else {
            WordPart::SingleQuoted(body)
        })
    }

    /// `$name`, `${name}`, `$env:NAME`, `$(...)`. `None` for a bare `$`.
    fn read_ps_dollar(&mut self) -> Result<Option<WordPart>, ParseIncomplete> {
        let start = self.pos;
        match self.peek(1) {
            Some(b'(') => self.block_part(SubstStyle::PsSubexpression, 2, b')').map(Some),
            Some(b'{') => {
                let len = match memchr::memchr(b'}', &self.bytes[start + 2..]) {
                    Some(len) => len,
                    None if self.lenient => self.bytes.len() - start - 2,
                    None => return Err(self.err("unterminated variable reference")),
                };
                let name = self.src[start + 2..start + 2 + len].to_string();
                self.pos = (start + 3 + len).min(self.bytes.len());
                Ok(Some(self.expansion(name, start)))
            }
            Some(b'?' | b'^' | b'$' | b'_') if !self.peek(2).is_some_and(is_ps_name_byte) => {
                self.pos = start + 2;
                let name = self.src[start + 1..start + 2].to_string();
                Ok(Some(self.expansion(name, start)))
            }
            Some(b) if is_ps_name_byte(b) => {
                let mut end = start + 1;
                while end < self.bytes.len() {
                    let b = self.bytes[end];
                    let scope_colon = b == b':'
                        && self.bytes.get(end + 1).is_some_and(|n| is_ps_name_byte(*n));
                    if is_ps_name_byte(b) || scope_colon {
                        end += 1;
                    } else {
                        break;
                    }
                }
                let name = self.src[start + 1..end].to_string();
                self.pos = end;
                Ok(Some(self.expansion(name, start)))
            }
            _ => Ok(None),
        }
    }

    /// `%NAME%`, `%1`, `%~dp0`, `!NAME!`. `None` when not a variable.
    fn read_cmd_variable(&mut self, sigil: u8) -> Option<WordPart> {
        let start = self.pos;
        let next = self.peek(1)?;
        if sigil == b'%' && (next.is_ascii_digit() || next == b'~' || next == b'*') {
            let mut end = start + 2;
            if next == b'~' {
                while self.bytes.get(end).is_some_and(u8::is_ascii_alphanumeric) {
                    end += 1;
                }
            }
            let name = self.src[start + 1..end].to_string();
            self.pos = end;
            return Some(self.expansion(name, start));
        }
        let len = memchr::memchr(sigil, &self.bytes[start + 1..])?;
        let name = &self.src[start + 1..start + 1 + len];
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() && c != ' ') || name.contains('\n') {
            return None;
        }
        let (name, operator, argument) = match name.split_once(':') {
            Some((n, arg)) => (n.to_string(), Some(":".to_string()), Some(arg.to_string())),
            None => (name.to_string(), None, None),
        };
        self.pos = start + 2 + len;
        Some(WordPart::Expansion(Expansion {
            name,
            operator,
            argument,
            span: self.span(start),
        }))
    }

    fn expansion(&self, name: String, start: usize) -> WordPart {
        WordPart::Expansion(Expansion {
            name,
            operator: None,
            argument: None,
            span: self.span(start),
        })
    }
}

const fn is_ps_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn flush(lit: &mut String, parts: &mut Vec<WordPart>) {
    if !lit.is_empty() {
        parts.push(WordPart::Literal(std::mem::take(lit)));
    }
}

/// `$x = value` / `$x=value` statements become assignments.
fn extract_ps_assignment(words: &mut Vec<Word>) -> Vec<Assignment> {
    let Some(first) = words.first() else {
        return Vec::new();
    };
    let name = match first.parts.as_slice() {
        [WordPart::Expansion(exp), ..] if exp.operator.is_none() => exp.name.clone(),
        _ => return Vec::new(),
    };
    let first_span = first.span;

    // `$x=value` in one word.
    if let [_, WordPart::Literal(rest), tail @ ..] = first.parts.as_slice() {
        if let Some(value) = rest.strip_prefix('=') {
            let mut parts = Vec::new();
            if !value.is_empty() {
                parts.push(WordPart::Literal(value.to_string()));
            }
            parts.extend(tail.iter().cloned());
            let value = (!parts.is_empty()).then(|| Word {
                parts,
                span: first_span,
            });
            words.remove(0);
            return vec![Assignment {
                name,
                value,
                append: false,
                span: first_span,
            }];
        }
    }
    if first.parts.len() != 1 {
        return Vec::new();
    }

    let op = match words.get(1).and_then(Word::literal_text) {
        Some(op) if PS_ASSIGN_OPS.contains(&op.as_str()) => op,
        _ => return Vec::new(),
    };
    let mut rest: Vec<Word> = words.drain(..).skip(2).collect();
    let end = rest.last().map_or(first_span.end, |w| w.span.end);
    let value = if rest.len() == 1 { rest.pop() } else { None };
    *words = rest;
    vec![Assignment {
        name,
        value,
        append: op == "+=",
        span: Span::new(first_span.start, end),
    }]
}

/// `set NAME=value` becomes an assignment; `set /a` and `set /p` stay commands.
fn extract_cmd_assignment(words: &mut Vec<Word>) -> Vec<Assignment> {
    let is_set = words
        .first()
        .and_then(Word::literal_text)
        .is_some_and(|w| w.eq_ignore_ascii_case("set"));
    if !is_set || words.len() != 2 {
        return Vec::new();
    }
    let target = &words[1];
    let text = target.display_text();
    let Some((name, value)) = text.split_once('=') else {
        return Vec::new();
    };
    if name.is_empty() || name.starts_with('/') {
        return Vec::new();
    }
    let assignment = Assignment {
        name: name.to_string(),
        value: (!value.is_empty()).then(|| Word::literal(value, target.span)),
        append: false,
        span: words[0].span.join(target.span),
    };
    words.clear();
    vec![assignment]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ps(src: &str) -> Node {
        parse_powershell(src, 0, 0).unwrap_or_else(|e| panic!("{src:?} failed: {e}"))
    }

    fn cmd(src: &str) -> Node {
        parse_cmd(src, 0, 0).unwrap_or_else(|e| panic!("{src:?} failed: {e}"))
    }

    fn names(node: &Node) -> Vec<String> {
        node.simple_commands()
            .iter()
            .filter_map(|c| c.command_name())
            .collect()
    }

    #[test]
    fn powershell_pipeline_and_statements() {
        let node = ps("Get-ChildItem C:\\temp | Remove-Item -Recurse; Write-Output done");
        let Node::List { items, .. } = &node else {
            panic!("expected list");
        };
        assert!(matches!(items[0].node, Node::Pipeline { .. }));
        assert_eq!(names(&node), vec!["Get-ChildItem", "Remove-Item", "Write-Output"]);
    }

    #[test]
    fn powershell_strings_and_variables() {
        let Node::Simple(c) = ps("Remove-Item \"$env:TEMP\\x\" 'it''s' `$literal") else {
            panic!("expected simple");
        };
        assert_eq!(c.words[1].expansions()[0].name, "env:TEMP");
        assert_eq!(c.words[2].literal_text().as_deref(), Some("it's"));
        assert_eq!(c.words[3].literal_text().as_deref(), Some("$literal"));
    }

    #[test]
    fn powershell_blocks_are_parsed() {
        let node = ps("Get-ChildItem | ForEach-Object { Remove-Item $_ -Force } ; $(Stop-Computer)");
        assert_eq!(
            names(&node),
            vec!["Get-ChildItem", "ForEach-Object", "Remove-Item", "Stop-Computer"]
        );
    }

    #[test]
    fn powershell_assignments() {
        let node = ps("$target = 'C:\\'; Remove-Item $target -Recurse -Force");
        let cmds = node.simple_commands();
        assert_eq!(cmds[0].assignments[0].name, "target");
        assert_eq!(
            cmds[0].assignments[0].value.as_ref().and_then(Word::literal_text).as_deref(),
            Some("C:\\")
        );
        assert!(cmds[0].words.is_empty());
    }

    #[test]
    fn powershell_call_operator_and_redirection() {
        let Node::Simple(c) = ps("& 'C:\\tools\\wipe.exe' 2>&1 > out.txt") else {
            panic!("expected simple");
        };
        assert_eq!(c.command_name().as_deref(), Some("C:\\tools\\wipe.exe"));
        assert_eq!(c.redirections.len(), 2);
        assert_eq!(c.redirections[0].op, ">&");
    }

    #[test]
    fn cmd_separators_and_variables() {
        let node = cmd("@echo off & set TARGET=C:\\ & del /f /s /q %TARGET%\\*");
        let cmds = node.simple_commands();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].command_name().as_deref(), Some("echo"));
        assert_eq!(cmds[1].assignments[0].name, "TARGET");
        assert_eq!(cmds[2].words[4].expansions()[0].name, "TARGET");
    }

    #[test]
    fn cmd_groups_and_escapes() {
        let node = cmd("(del a && del b) || echo fail ^& more");
        assert_eq!(names(&node), vec!["del", "del", "echo"]);
    }

    #[test]
    fn cmd_rem_is_one_comment_word() {
        let Node::Simple(c) = cmd("rem rm -rf / & shutdown") else {
            panic!("expected simple");
        };
        assert_eq!(c.words.len(), 2);
    }

    #[test]
    fn incomplete_windows_inputs() {
        for src in ["Write-Host 'abc", "Get-Item | ", "ForEach-Object { Remove-Item", "$(Get-Item", "}"] {
            assert!(parse_powershell(src, 0, 0).is_err(), "{src:?} should be incomplete");
        }
        for src in ["echo \"abc", "(del x", "del x &&"] {
            assert!(parse_cmd(src, 0, 0).is_err(), "{src:?} should be incomplete");
        }
    }

    fn token_texts(src: &str, dialect: ShellDialect) -> Vec<String> {
        tokenize_lenient(src, dialect)
            .tokens
            .into_iter()
            .map(|t| match t.kind {
                TokenKind::Word(w) => w.display_text(),
                TokenKind::Op(op) => format!("{op:?}"),
                TokenKind::Redirect { op, .. } => op.to_string(),
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[test]
    fn lenient_tokens_follow_the_flavor() {
        assert_eq!(
            token_texts("Remove-Item 'C:\\' -Recurse; & $tool > out.txt", ShellDialect::PowerShell),
            vec!["Remove-Item", "C:\\", "-Recurse", "Semi", "Amp", "$tool", ">", "out.txt"]
        );
        assert_eq!(
            token_texts("@echo off & del /q C:\\x", ShellDialect::Cmd),
            vec!["@echo", "off", "Semi", "del", "/q", "C:\\x"]
        );
    }

    #[test]
    fn lenient_tokens_survive_unterminated_input() {
        let texts = token_texts("Remove-Item \"C:\\", ShellDialect::PowerShell);
        assert_eq!(texts, vec!["Remove-Item", "C:\\"]);
        let lexed = tokenize_lenient("ForEach-Object { Remove-Item $_", ShellDialect::PowerShell);
        let TokenKind::Word(block) = &lexed.tokens[1].kind else {
            panic!("expected word");
        };
        let sub = block.substitutions()[0];
        assert!(sub.body.is_none());
        assert_eq!(sub.raw, "{ Remove-Item $_");
    }

    #[test]
    fn lenient_rem_keeps_the_line_as_one_word() {
        assert_eq!(
            token_texts("rem del /s C:\\ & x\ndir", ShellDialect::Cmd),
            vec!["rem", "del /s C:\\ & x", "Newline", "dir"]
        );
    }
}
