//! Match view construction.
//!
//! Text rules never run on the raw command. They run on a *match view*: a
//! lexical rewrite of the command in which
//!
//! - quotes are removed and escapes decoded (`"r"m` and `$'\x72m'` read `rm`),
//! - wrapper prefixes are stripped (`sudo -u root /bin/rm` reads `rm`),
//! - arguments of data commands are masked (`echo "rm -rf /"` reads `echo`),
//! - every other argument stays one token: blanks inside a quoted argument
//!   read as `_` (`grep "rm -rf /"` reads `grep rm_-rf_/`),
//! - absolute path operands are resolved lexically (`/tmp/../etc` reads
//!   `/etc`, `//` reads `/`),
//! - inline code is unwrapped and appended as its own unit (`bash -c '...'`,
//!   `eval`, `ssh host '...'`, `find -exec`, `$(...)`, backticks, shell
//!   heredocs, here-strings).
//!
//! Every view byte maps back to a raw byte so matches can be reported as
//! spans over the original text. The view is built on the lenient token
//! stream of [`crate::parser::lexer`] and [`crate::parser::windows`], so it
//! is available even when the command does not parse.

use std::collections::VecDeque;
use std::ops::Range;

use smallvec::SmallVec;

use crate::context::{COMMAND_TABLES, base_command, is_env_assignment};
use crate::model::{ShellDialect, Span};
use crate::parser::lexer::{self, Lexed, Operator, TokenKind};
use crate::parser::{SubstStyle, Substitution, Word, WordPart, windows};

/// Nesting depth for unwrapped inline code. Deeper payloads are emitted
/// verbatim (unmasked) rather than dropped.
const MAX_VIEW_DEPTH: usize = 8;

/// Stands in for blanks inside a single argument.
const ARG_BLANK: char = '_';

/// Lexically normalized command text with an offset map to the raw command.
#[derive(Debug, Clone)]
pub struct MatchView {
    raw: String,
    text: String,
    map: Vec<usize>,
    segments: Vec<Segment>,
}

/// One simple command inside the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// View byte range covering the command word, arguments and redirections.
    pub range: Range<usize>,
    /// Base command name (empty for a bare assignment or redirection).
    pub command: String,
    /// View ranges of the emitted arguments, in order.
    pub args: SmallVec<[Range<usize>; 8]>,
    /// Unwrapped from inline code rather than written at top level.
    pub nested: bool,
    /// Runs under `sudo`, `doas` or inside code they run.
    pub elevated: bool,
}

impl MatchView {
    /// Build the view for `raw` in `dialect`.
    #[must_use]
    pub fn build(raw: &str, dialect: ShellDialect) -> Self {
        let mut builder = ViewBuilder::new(dialect);
        builder.scan(&Source::identity(raw), 0, false);
        while let Some(unit) = builder.pending.pop_front() {
            builder.push_unit_break(unit.source.raw_at(0));
            if unit.depth > MAX_VIEW_DEPTH {
                builder.push_verbatim(&unit.source, unit.elevated);
            } else {
                builder.scan(&unit.source, unit.depth, unit.elevated);
            }
        }
        builder.finish(raw)
    }

    /// The normalized text rules match against.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Command names in the order they appear.
    pub fn command_words(&self) -> impl Iterator<Item = &str> {
        self.segments
            .iter()
            .map(|s| s.command.as_str())
            .filter(|c| !c.is_empty())
    }

    /// Segment containing view offset `at`.
    #[must_use]
    pub fn segment_at(&self, at: usize) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.range.start <= at && at < s.range.end.max(s.range.start + 1))
    }

    #[must_use]
    pub fn segment_text(&self, segment: &Segment) -> &str {
        self.text.get(segment.range.clone()).unwrap_or("")
    }

    pub fn args<'a>(&'a self, segment: &'a Segment) -> impl Iterator<Item = &'a str> + 'a {
        segment
            .args
            .iter()
            .filter_map(|r| self.text.get(r.clone()))
    }

    /// Map a view byte range to the raw span it came from.
    #[must_use]
    pub fn raw_span(&self, view: Range<usize>) -> Span {
        let end = view.end.min(self.map.len());
        let start = view.start.min(end);
        let mapped = &self.map[start..end];
        let (Some(&lo), Some(&hi)) = (mapped.iter().min(), mapped.iter().max()) else {
            let at = self.map.get(start).copied().unwrap_or(self.raw.len());
            return Span::new(at, at);
        };
        let mut hi = (hi + 1).min(self.raw.len());
        while hi < self.raw.len() && !self.raw.is_char_boundary(hi) {
            hi += 1;
        }
        let mut lo = lo.min(hi);
        while lo > 0 && !self.raw.is_char_boundary(lo) {
            lo -= 1;
        }
        Span::new(lo, hi)
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Text plus a byte map to raw offsets. Nested code is scanned as a `Source`
/// so its offsets compose back to the original command.
#[derive(Debug, Clone, Default)]
struct Source {
    text: String,
    map: Vec<usize>,
}

impl Source {
    fn identity(raw: &str) -> Self {
        Self {
            text: raw.to_string(),
            map: (0..raw.len()).collect(),
        }
    }

    fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.text.len());
        let start = range.start.min(end);
        match self.text.get(start..end) {
            Some(text) => Self {
                text: text.to_string(),
                map: self.map[start..end].to_vec(),
            },
            None => Self::default(),
        }
    }

    fn raw_at(&self, i: usize) -> usize {
        self.map
            .get(i)
            .copied()
            .or_else(|| self.map.last().map(|last| last + 1))
            .unwrap_or(0)
    }

    fn push_char(&mut self, ch: char, raw: usize) {
        self.text.push(ch);
        for _ in 0..ch.len_utf8() {
            self.map.push(raw);
        }
    }

    fn push_source(&mut self, other: &Self) {
        self.text.push_str(&other.text);
        self.map.extend_from_slice(&other.map);
    }
}

// ============================================================================
// Words
// ============================================================================

/// A word from the token stream, decoded and mapped onto its source.
#[derive(Debug, Clone, Default)]
struct WordTok {
    value: Source,
    /// The word began with a quote character.
    starts_quoted: bool,
    /// Executable bodies found inside the word.
    subs: Vec<Source>,
    /// Byte range of the word in the scanned source.
    range: Range<usize>,
    raw_start: usize,
}

impl WordTok {
    fn from_word(word: &Word, source: &Source) -> Self {
        let range = word.span.start..word.span.end;
        let mut tok = Self {
            starts_quoted: matches!(
                word.parts.first(),
                Some(WordPart::SingleQuoted(_) | WordPart::DoubleQuoted(_) | WordPart::AnsiC(_))
            ),
            raw_start: source.raw_at(range.start),
            range: range.clone(),
            ..Self::default()
        };
        let mut cursor = range.start;
        tok.push_parts(&word.parts, source, &mut cursor, range.end);
        tok
    }

    fn push_parts(&mut self, parts: &[WordPart], source: &Source, cursor: &mut usize, end: usize) {
        for part in parts {
            match part {
                WordPart::Literal(text) | WordPart::SingleQuoted(text) | WordPart::AnsiC(text) => {
                    push_aligned(&mut self.value, text, source, cursor, end);
                }
                WordPart::DoubleQuoted(inner) => self.push_parts(inner, source, cursor, end),
                WordPart::Arithmetic(expr) => {
                    push_aligned(&mut self.value, &format!("$(({expr}))"), source, cursor, end);
                }
                WordPart::Expansion(exp) => {
                    self.value.push_source(&source.slice(exp.span.start..exp.span.end));
                    if let Some(argument) = &exp.argument {
                        let at = exp.span.end.saturating_sub(argument.len() + 1).max(exp.span.start);
                        self.subs.extend(substitution_bodies(&source.slice(at..at + argument.len())));
                    }
                    *cursor = (*cursor).max(exp.span.end);
                }
                WordPart::CommandSubst(sub) => {
                    self.value.push_source(&source.slice(sub.span.start..sub.span.end));
                    self.subs.push(source.slice(body_range(sub)));
                    *cursor = (*cursor).max(sub.span.end);
                }
            }
        }
    }

    fn text(&self) -> &str {
        &self.value.text
    }

    fn is_assignment(&self) -> bool {
        !self.starts_quoted && is_env_assignment(self.text())
    }
}

/// Bytes searched ahead of the cursor when aligning a decoded char.
const ALIGN_WINDOW: usize = 16;

/// Append decoded `text`, mapping each char to its next occurrence in the
/// source word, or to the cursor when it was produced by an escape.
fn push_aligned(out: &mut Source, text: &str, source: &Source, cursor: &mut usize, end: usize) {
    let bytes = source.text.as_bytes();
    for ch in text.chars() {
        let mut buf = [0u8; 4];
        let needle = ch.encode_utf8(&mut buf).as_bytes();
        let window = (*cursor + ALIGN_WINDOW).min(end);
        let found = bytes
            .get(*cursor..window)
            .and_then(|hay| memchr::memmem::find(hay, needle))
            .map(|offset| *cursor + offset);
        match found {
            Some(at) => {
                out.push_char(ch, source.raw_at(at));
                *cursor = at + needle.len();
            }
            None => out.push_char(ch, source.raw_at(*cursor)),
        }
    }
}

/// Source range of a substitution's body, without its delimiters.
fn body_range(sub: &Substitution) -> Range<usize> {
    let (open, close) = match sub.style {
        SubstStyle::Backtick => (1, '`'),
        SubstStyle::ScriptBlock => (1, '}'),
        SubstStyle::Group => (1, ')'),
        SubstStyle::Dollar | SubstStyle::ProcessIn | SubstStyle::ProcessOut | SubstStyle::PsSubexpression => {
            (2, ')')
        }
    };
    let closed = usize::from(sub.raw.len() > open && sub.raw.ends_with(close));
    let start = (sub.span.start + open).min(sub.span.end);
    start..(sub.span.end - closed).max(start)
}

/// `$(...)` and backtick bodies in text read like a here-document body.
fn substitution_bodies(text: &Source) -> Vec<Source> {
    fn collect(parts: &[WordPart], text: &Source, out: &mut Vec<Source>) {
        for part in parts {
            match part {
                WordPart::CommandSubst(sub) => out.push(text.slice(body_range(sub))),
                WordPart::DoubleQuoted(inner) => collect(inner, text, out),
                _ => {}
            }
        }
    }
    let mut found = Vec::new();
    collect(&lexer::expanding_parts(&text.text), text, &mut found);
    found
}

/// Lexically resolve `.`, `..` and repeated separators in an absolute path.
/// Anything else comes back unchanged.
fn normalize_path(value: &Source) -> Source {
    let text = value.text.as_str();
    if !text.starts_with('/') || !(text.contains("//") || text.contains("/.")) {
        return value.clone();
    }
    let mut kept: Vec<Range<usize>> = Vec::new();
    let mut offset = 0;
    for piece in text.split('/') {
        let range = offset..offset + piece.len();
        offset += piece.len() + 1;
        match piece {
            "" | "." => {}
            ".." => {
                kept.pop();
            }
            _ => kept.push(range),
        }
    }
    let mut out = Source::default();
    out.push_char('/', value.raw_at(0));
    for (i, range) in kept.iter().enumerate() {
        if i > 0 {
            out.push_char('/', value.raw_at(range.start - 1));
        }
        out.push_source(&value.slice(range.clone()));
    }
    if !kept.is_empty() && text.ends_with('/') {
        out.push_char('/', value.raw_at(text.len() - 1));
    }
    out
}

#[derive(Debug, Clone)]
struct HereDoc {
    body: Source,
    quoted: bool,
}

struct RedirTok {
    op: &'static str,
    raw: usize,
    target: Option<WordTok>,
    heredoc: Option<HereDoc>,
}

// ============================================================================
// View assembly
// ============================================================================

/// Inline code waiting to be scanned as its own unit.
struct PendingUnit {
    source: Source,
    depth: usize,
    elevated: bool,
}

struct ViewBuilder {
    dialect: ShellDialect,
    text: String,
    map: Vec<usize>,
    segments: Vec<Segment>,
    pending: VecDeque<PendingUnit>,
}

/// Reserved words that keep the parser in command position.
const POSIX_PREFIX_WORDS: &[&str] = &[
    "!", "{", "}", "if", "then", "else", "elif", "fi", "do", "done", "while", "until", "time",
];

const fn op_text(op: Operator) -> &'static str {
    match op {
        Operator::Pipe | Operator::PipeAmp => "|",
        Operator::AndIf => "&&",
        Operator::OrIf => "||",
        Operator::Semi | Operator::DSemi => ";",
        Operator::Amp => "&",
        Operator::LParen => "(",
        Operator::RParen => ")",
    }
}

impl ViewBuilder {
    fn new(dialect: ShellDialect) -> Self {
        Self {
            dialect,
            text: String::new(),
            map: Vec::new(),
            segments: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    fn finish(mut self, raw: &str) -> MatchView {
        while self.text.ends_with(' ') {
            self.text.pop();
            self.map.pop();
        }
        for segment in &mut self.segments {
            segment.range.end = segment.range.end.min(self.text.len());
        }
        MatchView {
            raw: raw.to_string(),
            text: self.text,
            map: self.map,
            segments: self.segments,
        }
    }

    fn lex(&self, text: &str) -> Lexed {
        if self.dialect.case_insensitive() {
            windows::tokenize_lenient(text, self.dialect)
        } else {
            lexer::tokenize_lenient(text)
        }
    }

    fn space(&mut self, raw: usize) {
        if !self.text.is_empty() && !self.text.ends_with(' ') {
            self.text.push(' ');
            self.map.push(raw);
        }
    }

    fn push_literal(&mut self, s: &str, raw: usize) {
        self.text.push_str(s);
        self.map.extend(std::iter::repeat_n(raw, s.len()));
    }

    fn push_mapped(&mut self, source: &Source) -> Range<usize> {
        let start = self.text.len();
        self.text.push_str(&source.text);
        self.map.extend_from_slice(&source.map);
        start..self.text.len()
    }

    /// One argument as one view token.
    fn push_word(&mut self, word: &WordTok) -> Range<usize> {
        self.space(word.raw_start);
        let value = normalize_path(&word.value);
        let start = self.text.len();
        self.text.extend(
            value
                .text
                .chars()
                .map(|ch| if ch.is_ascii_whitespace() { ARG_BLANK } else { ch }),
        );
        self.map.extend_from_slice(&value.map);
        start..self.text.len()
    }

    fn push_op(&mut self, op: &str, raw: usize) {
        self.space(raw);
        self.push_literal(op, raw);
        self.text.push(' ');
        self.map.push(raw);
    }

    fn push_unit_break(&mut self, raw: usize) {
        if !self.text.is_empty() {
            self.push_op(";", raw);
        }
    }

    fn push_verbatim(&mut self, source: &Source, elevated: bool) {
        let start = self.text.len();
        self.push_mapped(source);
        self.segments.push(Segment {
            range: start..self.text.len(),
            command: String::new(),
            args: SmallVec::new(),
            nested: true,
            elevated,
        });
    }

    fn defer(&mut self, source: Source, depth: usize, elevated: bool) {
        if !source.text.trim().is_empty() {
            self.pending.push_back(PendingUnit {
                source,
                depth,
                elevated,
            });
        }
    }

    fn scan(&mut self, source: &Source, depth: usize, elevated: bool) {
        let lexed = self.lex(&source.text);
        let bodies: Vec<Source> = lexed
            .heredoc_spans
            .iter()
            .map(|span| source.slice(span.start..span.end))
            .collect();
        let mut words: Vec<WordTok> = Vec::new();
        let mut redirs: Vec<RedirTok> = Vec::new();
        let mut tokens = lexed.tokens.into_iter().peekable();

        while let Some(token) = tokens.next() {
            let raw = source.raw_at(token.span.start);
            match token.kind {
                TokenKind::Word(word) => {
                    let word = WordTok::from_word(&word, source);
                    let in_command_position = words.iter().all(WordTok::is_assignment) && redirs.is_empty();
                    if self.dialect.is_posix()
                        && in_command_position
                        && !word.starts_quoted
                        && POSIX_PREFIX_WORDS.contains(&word.text())
                    {
                        let unit = (std::mem::take(&mut words), std::mem::take(&mut redirs));
                        self.flush(unit, source, depth, elevated);
                        if matches!(word.text(), "{" | "}") {
                            self.push_op(word.text(), word.raw_start);
                        }
                        continue;
                    }
                    words.push(word);
                }
                TokenKind::Redirect { op, .. } => {
                    let target = tokens
                        .next_if(|next| matches!(next.kind, TokenKind::Word(_)))
                        .and_then(|next| match next.kind {
                            TokenKind::Word(word) => Some(WordTok::from_word(&word, source)),
                            _ => None,
                        });
                    redirs.push(RedirTok {
                        op,
                        raw,
                        target,
                        heredoc: None,
                    });
                }
                TokenKind::HereDoc { op, quoted, index, .. } => redirs.push(RedirTok {
                    op,
                    raw,
                    target: None,
                    heredoc: bodies.get(index).map(|body| HereDoc {
                        body: body.clone(),
                        quoted,
                    }),
                }),
                TokenKind::Arith(_) => {
                    let unit = (std::mem::take(&mut words), std::mem::take(&mut redirs));
                    self.flush(unit, source, depth, elevated);
                }
                TokenKind::Op(op) => {
                    let unit = (std::mem::take(&mut words), std::mem::take(&mut redirs));
                    self.flush(unit, source, depth, elevated);
                    self.push_op(op_text(op), raw);
                }
                TokenKind::Newline => {
                    let unit = (std::mem::take(&mut words), std::mem::take(&mut redirs));
                    self.flush(unit, source, depth, elevated);
                    self.push_op(";", raw);
                }
            }
        }
        self.flush((words, redirs), source, depth, elevated);
    }

    #[allow(clippy::too_many_lines)]
    fn flush(&mut self, unit: (Vec<WordTok>, Vec<RedirTok>), source: &Source, depth: usize, elevated: bool) {
        let (words, redirs) = unit;
        if words.is_empty() && redirs.is_empty() {
            return;
        }
        let next_depth = depth + 1;
        for word in words.iter().chain(redirs.iter().filter_map(|r| r.target.as_ref())) {
            for sub in &word.subs {
                self.defer(sub.clone(), next_depth, elevated);
            }
        }

        let mut idx = 0;
        while idx < words.len() && words[idx].is_assignment() {
            idx += 1;
        }
        let (idx, wrapped_elevated) = skip_wrappers(&words, idx, self.dialect);
        let elevated = elevated || wrapped_elevated;

        let start_raw = words
            .first()
            .map(|w| w.raw_start)
            .or_else(|| redirs.first().map(|r| r.raw))
            .unwrap_or(0);
        self.space(start_raw);
        let seg_start = self.text.len();
        let mut args: SmallVec<[Range<usize>; 8]> = SmallVec::new();

        let mut command = words.get(idx).map_or_else(String::new, |word| {
            let text = word.text();
            let text = if self.dialect == ShellDialect::Cmd {
                text.trim_start_matches('@')
            } else {
                text
            };
            base_command(text, self.dialect).into_owned()
        });
        if self.dialect.is_posix() && words.get(idx).is_some_and(|w| w.text().trim().contains(char::is_whitespace)) {
            // A whole command line in one word, as `watch` and `su` take it.
            if let Some(code) = join_words(&words[idx..]) {
                self.defer(code, next_depth, elevated);
            }
            command.clear();
        }
        if !command.is_empty() {
            self.push_literal(&command, words[idx].raw_start);
        }
        let rest = if command.is_empty() { &[][..] } else { &words[idx + 1..] };

        if command.is_empty() || COMMAND_TABLES.is_data_command(&command) {
            // arguments are printed, not run
        } else if COMMAND_TABLES.is_eval_command(&command) {
            if let Some(code) = join_words(rest) {
                self.defer(code, next_depth, elevated);
            }
        } else if COMMAND_TABLES.interpreter(&command).is_some() {
            let takes_rest = matches!(command.as_str(), "powershell" | "pwsh" | "cmd");
            for (i, word) in rest.iter().enumerate() {
                args.push(self.push_word(word));
                if COMMAND_TABLES.is_inline_code_flag(&command, word.text()) {
                    let code = if takes_rest {
                        join_words(&rest[i + 1..])
                    } else {
                        rest.get(i + 1).map(|w| w.value.clone())
                    };
                    if let Some(code) = code {
                        self.defer(code, next_depth, elevated);
                    }
                    break;
                }
            }
        } else {
            self.defer_code_operands(&command, rest, source, next_depth, elevated);
            let mut skip_next = false;
            for word in rest {
                if skip_next {
                    skip_next = false;
                    continue;
                }
                let text = word.text();
                if let Some((flag, _)) = text.split_once('=') {
                    if flag.starts_with('-') && COMMAND_TABLES.is_data_flag(&command, flag) {
                        self.space(word.raw_start);
                        args.push(self.push_mapped(&Source {
                            text: flag.to_string(),
                            map: word.value.map[..flag.len()].to_vec(),
                        }));
                        continue;
                    }
                }
                if COMMAND_TABLES.is_data_flag(&command, text) {
                    skip_next = true;
                }
                args.push(self.push_word(word));
            }
        }

        let runs_stdin = COMMAND_TABLES.is_stdin_interpreter(&command);
        for redir in &redirs {
            if let Some(doc) = &redir.heredoc {
                self.space(redir.raw);
                self.push_literal(redir.op, redir.raw);
                if COMMAND_TABLES.is_shell(&command) {
                    self.defer(doc.body.clone(), next_depth, elevated);
                } else if !doc.quoted {
                    for sub in substitution_bodies(&doc.body) {
                        self.defer(sub, next_depth, elevated);
                    }
                }
                continue;
            }
            if redir.op == "<<<" && runs_stdin {
                if let Some(target) = &redir.target {
                    self.defer(target.value.clone(), next_depth, elevated);
                }
                continue;
            }
            self.space(redir.raw);
            self.push_literal(redir.op, redir.raw);
            if let Some(target) = &redir.target {
                self.push_word(target);
            }
        }

        self.segments.push(Segment {
            range: seg_start..self.text.len(),
            command,
            args,
            nested: depth > 0,
            elevated,
        });
    }

    /// Operands of an ordinary command that still reach a shell: the remote
    /// command of `ssh host ...`, the words after `find -exec`, and the code
    /// operand of an interpreter named among the arguments
    /// (`docker exec box sh -c '...'`).
    fn defer_code_operands(&mut self, command: &str, rest: &[WordTok], source: &Source, depth: usize, elevated: bool) {
        let texts: Vec<&str> = rest.iter().map(WordTok::text).collect();
        if let Some(at) = COMMAND_TABLES.remote_command_index(command, &texts) {
            if let Some(code) = join_words(&rest[at..]) {
                self.defer(code, depth, elevated);
            }
        }

        let mut exec_from: Option<usize> = None;
        for (i, text) in texts.iter().enumerate() {
            match exec_from {
                None if COMMAND_TABLES.is_exec_flag(command, text) => exec_from = Some(i + 1),
                Some(from) if matches!(*text, ";" | "+") => {
                    if i > from {
                        let code = source.slice(rest[from].range.start..rest[i - 1].range.end);
                        self.defer(code, depth, elevated);
                    }
                    exec_from = None;
                }
                _ => {}
            }
        }
        if let Some(from) = exec_from.filter(|&from| from < rest.len()) {
            let code = source.slice(rest[from].range.start..rest[rest.len() - 1].range.end);
            self.defer(code, depth, elevated);
        }

        for (i, text) in texts.iter().enumerate() {
            let name = base_command(text, self.dialect);
            if COMMAND_TABLES.interpreter(&name).is_none() {
                continue;
            }
            for (j, flag) in texts.iter().enumerate().skip(i + 1) {
                if !flag.starts_with(['-', '/']) {
                    break;
                }
                if COMMAND_TABLES.is_inline_code_flag(&name, flag) {
                    if let Some(code) = rest.get(j + 1) {
                        self.defer(code.value.clone(), depth, elevated);
                    }
                    break;
                }
            }
        }
    }
}

/// Index of the first word after any wrapper prefixes, and whether one of
/// the wrappers raises privileges.
fn skip_wrappers(words: &[WordTok], mut idx: usize, dialect: ShellDialect) -> (usize, bool) {
    let mut elevated = false;
    while idx < words.len() {
        let name = base_command(words[idx].text(), dialect);
        let Some(wrapper) = COMMAND_TABLES.wrapper(&name) else {
            break;
        };
        let mut j = idx + 1;
        let mut operands = wrapper.leading_operands;
        let mut query = false;
        while j < words.len() {
            let text = words[j].text();
            if text == "--" {
                j += 1;
                break;
            }
            if text.len() > 1 && text.starts_with('-') {
                if wrapper.query_flags.contains(&text) {
                    query = true;
                    break;
                }
                j += if wrapper.arg_flags.contains(&text) { 2 } else { 1 };
                continue;
            }
            if wrapper.takes_assignments && is_env_assignment(text) {
                j += 1;
                continue;
            }
            if operands > 0 {
                operands -= 1;
                j += 1;
                continue;
            }
            break;
        }
        if query || j >= words.len() {
            break;
        }
        elevated |= wrapper.elevates;
        idx = j;
    }
    (idx, elevated)
}

/// Join dequoted words with single spaces into one code source.
fn join_words(words: &[WordTok]) -> Option<Source> {
    let mut iter = words.iter();
    let first = iter.next()?;
    let mut code = first.value.clone();
    for word in iter {
        code.push_char(' ', word.raw_start);
        code.push_source(&word.value);
    }
    Some(code)
}
