//! POSIX tokenizer.
//!
//! Produces the full token stream up front. Words are split into quoted and
//! expanded parts; command substitution bodies are parsed recursively so
//! their spans stay absolute. Here-document bodies are collected when the
//! newline that ends the redirecting line is reached.
//!
//! [`tokenize_lenient`] runs the same scanner without ever failing: an
//! unterminated construct extends to the end of input and substitution
//! bodies are left unparsed. The match view is built on that mode.

use super::{Expansion, Node, SubstStyle, Substitution, Word, WordPart, posix};
use crate::error::ParseIncomplete;
use crate::model::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Pipe,
    PipeAmp,
    AndIf,
    OrIf,
    Semi,
    /// `;;`, `;&` and `;;&`.
    DSemi,
    Amp,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Word(Word),
    Op(Operator),
    Redirect {
        fd: Option<u32>,
        op: &'static str,
    },
    HereDoc {
        fd: Option<u32>,
        op: &'static str,
        delimiter: String,
        quoted: bool,
        index: usize,
    },
    /// `(( expr ))` in command position.
    Arith(String),
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    pub heredoc_bodies: Vec<String>,
    /// Source span of each here-document body, parallel to `heredoc_bodies`.
    pub heredoc_spans: Vec<Span>,
}

const REDIRECT_OPS: [&str; 12] = [
    "&>>", "&>", "<<<", "<<-", "<<", "<>", "<&", "<", ">>", ">&", ">|", ">",
];

const EXPANSION_OPS: [&str; 19] = [
    ":-", ":=", ":?", ":+", "##", "%%", "//", "^^", ",,", "-", "=", "?", "+", "#", "%", "/", ":",
    "^", ",",
];

/// Tokenize `src`, whose first byte sits at absolute offset `base`.
///
/// # Errors
///
/// Unterminated quotes, substitutions and here-documents.
pub fn tokenize(src: &str, base: usize, depth: usize) -> Result<Lexed, ParseIncomplete> {
    Lexer::new(src, base, depth, false).run()
}

/// Tokenize `src` without failing. Unterminated quotes, substitutions and
/// here-documents run to the end of input; substitutions carry no parsed
/// body.
#[must_use]
pub fn tokenize_lenient(src: &str) -> Lexed {
    Lexer::new(src, 0, 0, true).run().unwrap_or_default()
}

/// Parts of `src` read the way an unquoted here-document body is: only
/// backslash escapes, expansions and substitutions are special.
#[must_use]
pub fn expanding_parts(src: &str) -> Vec<WordPart> {
    let mut lexer = Lexer::new(src, 0, 0, true);
    lexer.read_quoted_body(None, 0).unwrap_or_default()
}

struct PendingHereDoc {
    index: usize,
    delimiter: String,
    strip_tabs: bool,
    at: usize,
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    base: usize,
    depth: usize,
    out: Lexed,
    pending: Vec<PendingHereDoc>,
    lenient: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, base: usize, depth: usize, lenient: bool) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            base,
            depth,
            out: Lexed::default(),
            pending: Vec::new(),
            lenient,
        }
    }

    fn run(mut self) -> Result<Lexed, ParseIncomplete> {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'\\' if self.peek(1) == Some(b'\n') => self.pos += 2,
                b'\n' => {
                    self.push(TokenKind::Newline, self.pos, self.pos + 1);
                    self.pos += 1;
                    self.read_heredoc_bodies()?;
                }
                b'#' => {
                    self.pos = memchr::memchr(b'\n', &self.bytes[self.pos..])
                        .map_or(self.bytes.len(), |o| self.pos + o);
                }
                _ => self.lex_token()?,
            }
        }
        if self.lenient {
            self.read_heredoc_bodies()?;
        } else if let Some(doc) = self.pending.first() {
            return Err(self.err(
                format!("unterminated here-document `{}`", doc.delimiter),
                doc.at,
            ));
        }
        Ok(self.out)
    }

    fn err(&self, reason: impl Into<String>, at: usize) -> ParseIncomplete {
        ParseIncomplete::new(reason, self.base + at)
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span::new(self.base + start, self.base + end)
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        let span = self.span(start, end);
        self.out.tokens.push(Token { kind, span });
    }

    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn lex_token(&mut self) -> Result<(), ParseIncomplete> {
        let start = self.pos;

        let digits = self.bytes[self.pos..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits > 0 && matches!(self.peek(digits), Some(b'<' | b'>')) && self.peek(digits + 1) != Some(b'(') {
            let fd = self.src[start..start + digits].parse().ok();
            self.pos += digits;
            return self.lex_redirection(fd, start);
        }

        let op = match self.bytes[self.pos] {
            b'|' if self.peek(1) == Some(b'|') => Some((Operator::OrIf, 2)),
            b'|' if self.peek(1) == Some(b'&') => Some((Operator::PipeAmp, 2)),
            b'|' => Some((Operator::Pipe, 1)),
            b'&' if self.peek(1) == Some(b'&') => Some((Operator::AndIf, 2)),
            b'&' if self.peek(1) == Some(b'>') => return self.lex_redirection(None, start),
            b'&' => Some((Operator::Amp, 1)),
            b';' if self.rest().starts_with(";;&") => Some((Operator::DSemi, 3)),
            b';' if matches!(self.peek(1), Some(b';' | b'&')) => Some((Operator::DSemi, 2)),
            b';' => Some((Operator::Semi, 1)),
            b'(' if self.peek(1) == Some(b'(') => {
                if let Some(end) = self.arith_command_end() {
                    let expr = self.src[start + 2..end - 2].trim().to_string();
                    self.pos = end;
                    self.push(TokenKind::Arith(expr), start, end);
                    return Ok(());
                }
                Some((Operator::LParen, 1))
            }
            b'(' => Some((Operator::LParen, 1)),
            b')' => Some((Operator::RParen, 1)),
            b'<' | b'>' if self.peek(1) == Some(b'(') => None,
            b'<' | b'>' => return self.lex_redirection(None, start),
            _ => None,
        };
        if let Some((op, len)) = op {
            self.pos += len;
            self.push(TokenKind::Op(op), start, self.pos);
            return Ok(());
        }

        let word = self.read_word()?;
        let end = self.pos;
        self.push(TokenKind::Word(word), start, end);
        Ok(())
    }

    /// End of `(( ... ))` if the parens close as a pair, else `None` (nested subshells).
    fn arith_command_end(&self) -> Option<usize> {
        let inner_end = matching_paren(self.bytes, self.pos + 2)?;
        (self.bytes.get(inner_end) == Some(&b')')).then_some(inner_end + 1)
    }

    fn lex_redirection(&mut self, fd: Option<u32>, start: usize) -> Result<(), ParseIncomplete> {
        let Some(op) = REDIRECT_OPS.into_iter().find(|op| self.rest().starts_with(op)) else {
            if self.lenient {
                self.pos += 1;
                return Ok(());
            }
            return Err(self.err("expected redirection operator", self.pos));
        };
        self.pos += op.len();
        if op != "<<" && op != "<<-" {
            self.push(TokenKind::Redirect { fd, op }, start, self.pos);
            return Ok(());
        }

        while matches!(self.peek(0), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
        let delim_start = self.pos;
        if self.pos >= self.bytes.len() || self.bytes[self.pos] == b'\n' {
            if self.lenient {
                self.push(TokenKind::Redirect { fd, op }, start, self.pos);
                return Ok(());
            }
            return Err(self.err("here-document without delimiter", self.pos));
        }
        let word = self.read_word()?;
        let quoted = word.is_quoted() || self.src[delim_start..self.pos].contains('\\');
        let delimiter = word.display_text();
        let index = self.out.heredoc_bodies.len();
        self.out.heredoc_bodies.push(String::new());
        self.out.heredoc_spans.push(self.span(self.pos, self.pos));
        self.pending.push(PendingHereDoc {
            index,
            delimiter: delimiter.clone(),
            strip_tabs: op == "<<-",
            at: start,
        });
        self.push(
            TokenKind::HereDoc {
                fd,
                op,
                delimiter,
                quoted,
                index,
            },
            start,
            self.pos,
        );
        Ok(())
    }

    fn read_heredoc_bodies(&mut self) -> Result<(), ParseIncomplete> {
        for doc in std::mem::take(&mut self.pending) {
            let mut body = String::new();
            let body_start = self.pos;
            let mut body_end = self.bytes.len();
            let mut line_start = self.pos;
            let mut terminated = false;
            while line_start < self.bytes.len() {
                let line_end = memchr::memchr(b'\n', &self.bytes[line_start..])
                    .map_or(self.bytes.len(), |o| line_start + o);
                let mut line = &self.src[line_start..line_end];
                if doc.strip_tabs {
                    line = line.trim_start_matches('\t');
                }
                let next = (line_end + 1).min(self.bytes.len());
                if line.trim_end_matches('\r') == doc.delimiter {
                    terminated = true;
                    body_end = line_start;
                    line_start = next;
                    break;
                }
                line_start = next;
                body.push_str(line);
                body.push('\n');
            }
            if !terminated && !self.lenient {
                return Err(self.err(
                    format!("unterminated here-document `{}`", doc.delimiter),
                    doc.at,
                ));
            }
            self.out.heredoc_bodies[doc.index] = body;
            self.out.heredoc_spans[doc.index] = self.span(body_start, body_end);
            self.pos = line_start;
        }
        Ok(())
    }

    fn current_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn take_char(&mut self, into: &mut String) {
        if let Some(ch) = self.current_char() {
            into.push(ch);
            self.pos += ch.len_utf8();
        } else {
            self.pos += 1;
        }
    }

    fn read_word(&mut self) -> Result<Word, ParseIncomplete> {
        let start = self.pos;
        let mut parts = Vec::new();
        let mut lit = String::new();

        if matches!(self.peek(0), Some(b'<' | b'>')) && self.peek(1) == Some(b'(') {
            let style = if self.bytes[self.pos] == b'<' {
                SubstStyle::ProcessIn
            } else {
                SubstStyle::ProcessOut
            };
            parts.push(WordPart::CommandSubst(self.read_paren_subst(style, 2)?));
            return Ok(Word {
                parts,
                span: self.span(start, self.pos),
            });
        }

        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b';' | b'&' | b'|' | b'<' | b'>' | b'(' | b')') {
                break;
            }
            match b {
                b'\\' => match self.peek(1) {
                    Some(b'\n') => self.pos += 2,
                    Some(_) => {
                        self.pos += 1;
                        self.take_char(&mut lit);
                    }
                    None => {
                        lit.push('\\');
                        self.pos += 1;
                    }
                },
                b'\'' => {
                    flush(&mut lit, &mut parts);
                    let open = self.pos;
                    self.pos += 1;
                    let Some(len) = memchr::memchr(b'\'', &self.bytes[self.pos..]) else {
                        if self.lenient {
                            parts.push(WordPart::SingleQuoted(self.rest().to_string()));
                            self.pos = self.bytes.len();
                            continue;
                        }
                        return Err(self.err("unterminated single quote", open));
                    };
                    parts.push(WordPart::SingleQuoted(self.src[self.pos..self.pos + len].to_string()));
                    self.pos += len + 1;
                }
                b'"' => {
                    flush(&mut lit, &mut parts);
                    parts.push(WordPart::DoubleQuoted(self.read_double_quoted()?));
                }
                b'$' => match self.read_dollar(false)? {
                    Some(part) => {
                        flush(&mut lit, &mut parts);
                        parts.push(part);
                    }
                    None => {
                        lit.push('$');
                        self.pos += 1;
                    }
                },
                b'`' => {
                    flush(&mut lit, &mut parts);
                    parts.push(WordPart::CommandSubst(self.read_backtick()?));
                }
                b'=' if self.peek(1) == Some(b'(') && parts.is_empty() && is_array_prefix(&lit) => {
                    self.read_balanced_literal(&mut lit, 1)?;
                }
                b'@' | b'!' | b'+' | b'?' | b'*' if self.peek(1) == Some(b'(') => {
                    self.read_balanced_literal(&mut lit, 1)?;
                }
                _ => self.take_char(&mut lit),
            }
        }
        flush(&mut lit, &mut parts);
        Ok(Word {
            parts,
            span: self.span(start, self.pos),
        })
    }

    /// Copy `X(...)` verbatim where `(` sits `offset` bytes ahead.
    fn read_balanced_literal(&mut self, lit: &mut String, offset: usize) -> Result<(), ParseIncomplete> {
        let open = self.pos + offset;
        let Some(end) = matching_paren(self.bytes, open + 1).or(self.lenient.then_some(self.bytes.len())) else {
            return Err(self.err("unbalanced parenthesis", open));
        };
        lit.push_str(&self.src[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn read_double_quoted(&mut self) -> Result<Vec<WordPart>, ParseIncomplete> {
        let open = self.pos;
        self.pos += 1;
        self.read_quoted_body(Some(b'"'), open)
    }

    /// Body of a double-quoted string up to `terminator`, or to the end of
    /// input for here-document text.
    fn read_quoted_body(&mut self, terminator: Option<u8>, open: usize) -> Result<Vec<WordPart>, ParseIncomplete> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            let Some(b) = self.peek(0) else {
                if terminator.is_none() || self.lenient {
                    break;
                }
                return Err(self.err("unterminated double quote", open));
            };
            match b {
                b'"' if terminator == Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                b'\\' => match self.peek(1) {
                    Some(b'\n') => self.pos += 2,
                    Some(b'"') if terminator.is_some() => {
                        self.pos += 1;
                        self.take_char(&mut lit);
                    }
                    Some(b'$' | b'`' | b'\\') => {
                        self.pos += 1;
                        self.take_char(&mut lit);
                    }
                    _ => {
                        lit.push('\\');
                        self.pos += 1;
                    }
                },
                b'$' => match self.read_dollar(true)? {
                    Some(part) => {
                        flush(&mut lit, &mut parts);
                        parts.push(part);
                    }
                    None => {
                        lit.push('$');
                        self.pos += 1;
                    }
                },
                b'`' => {
                    flush(&mut lit, &mut parts);
                    parts.push(WordPart::CommandSubst(self.read_backtick()?));
                }
                _ => self.take_char(&mut lit),
            }
        }
        flush(&mut lit, &mut parts);
        Ok(parts)
    }

    /// Handle `$` at `pos`. `None` means a literal dollar sign.
    fn read_dollar(&mut self, in_quotes: bool) -> Result<Option<WordPart>, ParseIncomplete> {
        let start = self.pos;
        let Some(next) = self.peek(1) else {
            return Ok(None);
        };
        let part = match next {
            b'(' if self.peek(2) == Some(b'(') => {
                let Some(end) = matching_paren(self.bytes, start + 3).filter(|&end| self.bytes.get(end) == Some(&b')'))
                else {
                    if self.lenient {
                        let expr = self.src[start + 3..].to_string();
                        self.pos = self.bytes.len();
                        return Ok(Some(WordPart::Arithmetic(expr)));
                    }
                    return Err(self.err("unterminated arithmetic expansion", start));
                };
                let expr = self.src[start + 3..end - 1].to_string();
                self.pos = end + 1;
                WordPart::Arithmetic(expr)
            }
            b'(' => WordPart::CommandSubst(self.read_paren_subst(SubstStyle::Dollar, 2)?),
            b'{' => {
                let Some(end) = matching_brace(self.bytes, start + 2) else {
                    if self.lenient {
                        let text = self.src[start..].to_string();
                        self.pos = self.bytes.len();
                        return Ok(Some(WordPart::Literal(text)));
                    }
                    return Err(self.err("unterminated parameter expansion", start));
                };
                let inner = &self.src[start + 2..end - 1];
                let Some(expansion) = parse_braced(inner, self.span(start, end)) else {
                    if self.lenient {
                        self.pos = end;
                        return Ok(Some(WordPart::Literal(self.src[start..end].to_string())));
                    }
                    return Err(self.err("bad substitution", start));
                };
                self.pos = end;
                WordPart::Expansion(expansion)
            }
            b'\'' if !in_quotes => {
                self.pos += 2;
                let mut decoded = String::new();
                loop {
                    let Some(b) = self.peek(0) else {
                        if self.lenient {
                            break;
                        }
                        return Err(self.err("unterminated ANSI-C quote", start));
                    };
                    match b {
                        b'\'' => {
                            self.pos += 1;
                            break;
                        }
                        b'\\' => {
                            let (ch, used) = decode_c_escape(&self.bytes[self.pos + 1..]);
                            decoded.extend(ch);
                            self.pos += 1 + used;
                        }
                        _ => self.take_char(&mut decoded),
                    }
                }
                WordPart::AnsiC(decoded)
            }
            b'"' if !in_quotes => {
                self.pos += 1;
                WordPart::DoubleQuoted(self.read_double_quoted()?)
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let len = self.bytes[start + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                    .count();
                self.pos = start + 1 + len;
                WordPart::Expansion(Expansion {
                    name: self.src[start + 1..self.pos].to_string(),
                    operator: None,
                    argument: None,
                    span: self.span(start, self.pos),
                })
            }
            b if b.is_ascii_digit() || matches!(b, b'@' | b'*' | b'#' | b'?' | b'$' | b'!' | b'-') => {
                self.pos = start + 2;
                WordPart::Expansion(Expansion {
                    name: char::from(b).to_string(),
                    operator: None,
                    argument: None,
                    span: self.span(start, self.pos),
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(part))
    }

    /// `$(...)`, `<(...)`, `>(...)`: `open_len` bytes precede the body.
    fn read_paren_subst(&mut self, style: SubstStyle, open_len: usize) -> Result<Substitution, ParseIncomplete> {
        let start = self.pos;
        let (end, close_len) = match matching_paren(self.bytes, start + open_len) {
            Some(end) => (end, 1),
            None if self.lenient => (self.bytes.len(), 0),
            None => return Err(self.err("unterminated command substitution", start)),
        };
        let body_start = start + open_len;
        let body = &self.src[body_start.min(end)..end - close_len];
        let parsed = self.parse_body(body, body_start)?;
        self.pos = end;
        Ok(Substitution {
            style,
            body: parsed,
            raw: self.src[start..end].to_string(),
            span: self.span(start, end),
        })
    }

    fn read_backtick(&mut self) -> Result<Substitution, ParseIncomplete> {
        let start = self.pos;
        let mut i = start + 1;
        let mut body = String::new();
        loop {
            let Some(&b) = self.bytes.get(i) else {
                if self.lenient {
                    break;
                }
                return Err(self.err("unterminated backtick substitution", start));
            };
            match b {
                b'`' => break,
                b'\\' if matches!(self.bytes.get(i + 1), Some(b'`' | b'\\' | b'$')) => {
                    body.push(char::from(self.bytes[i + 1]));
                    i += 2;
                }
                _ => {
                    let ch = self.src[i..].chars().next().unwrap_or('\u{fffd}');
                    body.push(ch);
                    i += ch.len_utf8();
                }
            }
        }
        let end = (i + 1).min(self.bytes.len());
        let parsed = self.parse_body(&body, start + 1)?;
        self.pos = end;
        Ok(Substitution {
            style: SubstStyle::Backtick,
            body: parsed,
            raw: self.src[start..end].to_string(),
            span: self.span(start, end),
        })
    }

    fn parse_body(&self, body: &str, at: usize) -> Result<Option<Box<Node>>, ParseIncomplete> {
        if self.lenient || body.trim().is_empty() {
            return Ok(None);
        }
        posix::parse_posix(body, self.base + at, self.depth + 1).map(|node| Some(Box::new(node)))
    }
}

fn flush(lit: &mut String, parts: &mut Vec<WordPart>) {
    if !lit.is_empty() {
        parts.push(WordPart::Literal(std::mem::take(lit)));
    }
}

fn is_array_prefix(lit: &str) -> bool {
    let name = lit.strip_suffix('+').unwrap_or(lit);
    crate::context::is_identifier(name)
}

/// Split the inside of `${...}` into name, operator and argument.
fn parse_braced(inner: &str, span: Span) -> Option<Expansion> {
    let (prefix, body) = match inner.as_bytes().first() {
        Some(b'#') if inner.len() > 1 => (Some("#"), &inner[1..]),
        Some(b'!') if inner.len() > 1 => (Some("!"), &inner[1..]),
        _ => (None, inner),
    };
    let bytes = body.as_bytes();
    let name_len = match bytes.first() {
        Some(b) if b.is_ascii_digit() => bytes.iter().take_while(|b| b.is_ascii_digit()).count(),
        Some(b'@' | b'*' | b'#' | b'?' | b'$' | b'!' | b'-') => 1,
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => bytes
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count(),
        _ => 0,
    };
    if name_len == 0 {
        return None;
    }
    let name = body[..name_len].to_string();
    let mut rest = &body[name_len..];
    // Array subscripts stay part of the name: ${arr[0]}, ${arr[@]}.
    let mut name = name;
    if rest.starts_with('[') {
        let close = rest.find(']')?;
        name.push_str(&rest[..=close]);
        rest = &rest[close + 1..];
    }
    if let Some(prefix) = prefix {
        return rest.is_empty().then(|| Expansion {
            name,
            operator: Some(prefix.to_string()),
            argument: None,
            span,
        });
    }
    if rest.is_empty() {
        return Some(Expansion {
            name,
            operator: None,
            argument: None,
            span,
        });
    }
    let op = EXPANSION_OPS.into_iter().find(|op| rest.starts_with(op))?;
    Some(Expansion {
        name,
        operator: Some(op.to_string()),
        argument: Some(rest[op.len()..].to_string()),
        span,
    })
}

/// Index just past the `)` that closes a paren opened right before `from`,
/// skipping quoted text and escapes. `None` when unterminated.
#[must_use]
pub fn matching_paren(bytes: &[u8], from: usize) -> Option<usize> {
    matching_close(bytes, from, b'(', b')')
}

#[must_use]
pub fn matching_brace(bytes: &[u8], from: usize) -> Option<usize> {
    matching_close(bytes, from, b'{', b'}')
}

fn matching_close(bytes: &[u8], from: usize, open: u8, close: u8) -> Option<usize> {
    let len = bytes.len();
    let mut i = from;
    let mut depth: u32 = 1;
    while i < len {
        let b = bytes[i];
        if b == b'\\' {
            i += 2;
        } else if b == b'\'' {
            i += 1 + memchr::memchr(b'\'', &bytes[(i + 1).min(len)..])? + 1;
        } else if b == b'"' {
            i += 1;
            loop {
                match bytes.get(i)? {
                    b'"' => break,
                    b'\\' => i += 2,
                    _ => i += 1,
                }
            }
            i += 1;
        } else if b == open {
            depth += 1;
            i += 1;
        } else if b == close {
            depth -= 1;
            i += 1;
            if depth == 0 {
                return Some(i);
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Decode the escape after a backslash in `$'...'`. Returns the char (if
/// any) and the number of bytes consumed after the backslash.
#[must_use]
pub fn decode_c_escape(rest: &[u8]) -> (Option<char>, usize) {
    let Some(&first) = rest.first() else {
        return (Some('\\'), 0);
    };
    let simple = match first {
        b'n' => Some('\n'),
        b't' => Some('\t'),
        b'r' => Some('\r'),
        b'a' => Some('\u{7}'),
        b'b' => Some('\u{8}'),
        b'e' | b'E' => Some('\u{1b}'),
        b'f' => Some('\u{c}'),
        b'v' => Some('\u{b}'),
        b'\\' => Some('\\'),
        b'\'' => Some('\''),
        b'"' => Some('"'),
        b'?' => Some('?'),
        _ => None,
    };
    if simple.is_some() {
        return (simple, 1);
    }
    match first {
        b'x' => match radix_digits(&rest[1..], 16, 2) {
            (_, 0) => (Some('x'), 1),
            (value, used) => (char::from_u32(value), 1 + used),
        },
        b'u' | b'U' => {
            let max = if first == b'u' { 4 } else { 8 };
            match radix_digits(&rest[1..], 16, max) {
                (_, 0) => (Some(char::from(first)), 1),
                (value, used) => (char::from_u32(value), 1 + used),
            }
        }
        b'0'..=b'7' => {
            let (value, used) = radix_digits(rest, 8, 3);
            (char::from_u32(value), used)
        }
        _ => (Some(char::from(first)), 1),
    }
}

fn radix_digits(bytes: &[u8], radix: u32, max: usize) -> (u32, usize) {
    let mut value = 0u32;
    let mut used = 0;
    for &b in bytes.iter().take(max) {
        let Some(digit) = char::from(b).to_digit(radix) else {
            break;
        };
        value = value * radix + digit;
        used += 1;
    }
    (value, used)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src, 0, 0).unwrap().tokens.into_iter().map(|t| t.kind).collect()
    }

    fn word_texts(src: &str) -> Vec<String> {
        kinds(src)
            .into_iter()
            .filter_map(|k| match k {
                TokenKind::Word(w) => Some(w.display_text()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn operators_and_words() {
        let k = kinds("a && b || c | d; e &");
        assert_eq!(k.len(), 10);
        assert_eq!(k[1], TokenKind::Op(Operator::AndIf));
        assert_eq!(k[3], TokenKind::Op(Operator::OrIf));
        assert_eq!(k[5], TokenKind::Op(Operator::Pipe));
        assert_eq!(k[7], TokenKind::Op(Operator::Semi));
        assert_eq!(k[9], TokenKind::Op(Operator::Amp));
    }

    #[test]
    fn quoting_is_decoded() {
        assert_eq!(word_texts(r#"r"m" 'a b' $'\x41\n' \z"#), vec!["rm", "a b", "A\n", "z"]);
    }

    #[test]
    fn fd_redirections() {
        let k = kinds("cmd 2>&1 >/dev/null");
        assert_eq!(k[1], TokenKind::Redirect { fd: Some(2), op: ">&" });
        assert_eq!(k[3], TokenKind::Redirect { fd: None, op: ">" });
    }

    #[test]
    fn heredoc_body_is_collected() {
        let lexed = tokenize("cat <<'EOF' | sh\nrm -rf /\nEOF\necho done", 0, 0).unwrap();
        assert_eq!(lexed.heredoc_bodies, vec!["rm -rf /\n".to_string()]);
        assert!(lexed.tokens.iter().any(|t| matches!(
            &t.kind,
            TokenKind::HereDoc { quoted: true, delimiter, .. } if delimiter == "EOF"
        )));
    }

    #[test]
    fn unterminated_constructs_fail() {
        for src in ["echo 'abc", "echo \"abc", "echo $(ls", "echo `ls", "cat <<EOF\nbody", "echo ${X"] {
            assert!(tokenize(src, 0, 0).is_err(), "{src:?} should be incomplete");
        }
    }

    #[test]
    fn braced_expansion_operators() {
        let span = Span::new(0, 0);
        let e = parse_braced("X:-/tmp", span).unwrap();
        assert_eq!(e.name, "X");
        assert_eq!(e.operator.as_deref(), Some(":-"));
        assert_eq!(e.argument.as_deref(), Some("/tmp"));
        assert_eq!(parse_braced("#PATH", span).unwrap().operator.as_deref(), Some("#"));
        assert_eq!(parse_braced("arr[@]", span).unwrap().name, "arr[@]");
        assert!(parse_braced("", span).is_none());
    }

    #[test]
    fn arithmetic_command_vs_nested_subshell() {
        assert_eq!(kinds("(( i++ ))"), vec![TokenKind::Arith("i++".to_string())]);
        assert_eq!(kinds("((ls) )")[0], TokenKind::Op(Operator::LParen));
    }

    #[test]
    fn substitution_spans_are_absolute() {
        let lexed = tokenize("echo $(rm -rf /)", 10, 0).unwrap();
        let TokenKind::Word(word) = &lexed.tokens[1].kind else {
            panic!("expected word");
        };
        let sub = word.substitutions()[0];
        assert_eq!(sub.span, Span::new(15, 26));
        let body = sub.body.as_ref().unwrap();
        assert_eq!(body.span().start, 17);
    }

    #[test]
    fn lenient_mode_recovers_to_end_of_input() {
        for src in ["echo 'abc", "echo \"abc", "echo $(ls", "echo `ls", "cat <<EOF\nbody", "echo ${X", "echo $((1"] {
            let lexed = tokenize_lenient(src);
            assert!(lexed.tokens.len() >= 2, "{src:?} lost tokens");
        }
        let lexed = tokenize_lenient("rm -rf \"/");
        let TokenKind::Word(word) = &lexed.tokens[2].kind else {
            panic!("expected word");
        };
        assert_eq!(word.display_text(), "/");
    }

    #[test]
    fn lenient_substitutions_keep_raw_text_only() {
        let lexed = tokenize_lenient("echo $(rm -rf /");
        let TokenKind::Word(word) = &lexed.tokens[1].kind else {
            panic!("expected word");
        };
        let sub = word.substitutions()[0];
        assert!(sub.body.is_none());
        assert_eq!(sub.raw, "$(rm -rf /");
        assert_eq!(sub.span, Span::new(5, 15));
    }

    #[test]
    fn heredoc_spans_cover_the_body() {
        let src = "bash <<EOF\nrm -rf /\nEOF\n";
        let lexed = tokenize(src, 0, 0).unwrap();
        let span = lexed.heredoc_spans[0];
        assert_eq!(&src[span.start..span.end], "rm -rf /\n");
        let open = tokenize_lenient("bash <<EOF\nrm -rf /");
        let span = open.heredoc_spans[0];
        assert_eq!(&"bash <<EOF\nrm -rf /"[span.start..span.end], "rm -rf /");
    }

    #[test]
    fn expanding_parts_ignore_quotes() {
        let parts = expanding_parts("don't $(rm -rf /) \"x\"");
        let subs: Vec<_> = parts
            .iter()
            .filter_map(|p| match p {
                WordPart::CommandSubst(sub) => Some(sub.raw.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(subs, vec!["$(rm -rf /)"]);
    }
}
