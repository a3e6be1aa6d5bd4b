//! Dual regex engine for rule matchers.
//!
//! Most rule patterns compile with the linear-time `regex` crate. Patterns
//! that need look-around, atomic groups or backreferences fall back to
//! `fancy_regex`, with a bounded backtrack budget so a hostile rule file
//! cannot stall validation.

use thiserror::Error;

/// Compiled program size cap for the linear engine.
const LINEAR_SIZE_LIMIT: usize = 1 << 21;

/// Backtracking step budget for the fancy engine.
const BACKTRACK_LIMIT: usize = 100_000;

/// A rule matcher pattern that failed to compile.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{engine} compile error: {message}")]
pub struct RegexError {
    pub engine: &'static str,
    pub message: String,
}

/// A compiled regex that auto-selects between linear-time and backtracking engines.
///
/// ```ignore
/// use shellguard::rules::CompiledRegex;
///
/// let simple = CompiledRegex::new(r"rm\s+-rf").unwrap();
/// assert!(!simple.uses_backtracking());
///
/// let lookahead = CompiledRegex::new(r"chmod(?=.*777)").unwrap();
/// assert!(lookahead.uses_backtracking());
/// ```
#[derive(Debug, Clone)]
pub enum CompiledRegex {
    /// Linear-time regex (O(n) guaranteed, no backtracking).
    Linear(regex::Regex),
    /// Backtracking regex (supports lookahead/lookbehind).
    Backtracking(fancy_regex::Regex),
}

impl CompiledRegex {
    /// Compile a pattern, auto-selecting the appropriate engine.
    ///
    /// # Errors
    /// Returns an error if the pattern fails to compile.
    pub fn new(pattern: &str) -> Result<Self, RegexError> {
        if needs_backtracking_engine(pattern) {
            Self::new_backtracking(pattern)
        } else {
            Self::new_linear(pattern)
        }
    }

    /// Compile a pattern using the linear-time engine only.
    ///
    /// # Errors
    /// Returns an error if the pattern uses features the linear engine lacks.
    pub fn new_linear(pattern: &str) -> Result<Self, RegexError> {
        regex::RegexBuilder::new(pattern)
            .size_limit(LINEAR_SIZE_LIMIT)
            .build()
            .map(Self::Linear)
            .map_err(|e| RegexError {
                engine: "regex",
                message: e.to_string(),
            })
    }

    /// Compile a pattern using the backtracking engine.
    ///
    /// # Errors
    /// Returns an error if the pattern fails to compile.
    pub fn new_backtracking(pattern: &str) -> Result<Self, RegexError> {
        fancy_regex::RegexBuilder::new(pattern)
            .backtrack_limit(BACKTRACK_LIMIT)
            .build()
            .map(Self::Backtracking)
            .map_err(|e| RegexError {
                engine: "fancy_regex",
                message: e.to_string(),
            })
    }

    /// Check if the pattern matches the text.
    ///
    /// For the backtracking engine, execution errors (budget exhausted) count
    /// as a match: a rule that cannot be decided is treated as firing.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Linear(re) => re.is_match(text),
            Self::Backtracking(re) => re.is_match(text).unwrap_or(true),
        }
    }

    /// Byte offsets of the first match.
    ///
    /// An execution error on the backtracking engine reports the whole text.
    #[must_use]
    pub fn find(&self, text: &str) -> Option<(usize, usize)> {
        match self {
            Self::Linear(re) => re.find(text).map(|m| (m.start(), m.end())),
            Self::Backtracking(re) => match re.find(text) {
                Ok(found) => found.map(|m| (m.start(), m.end())),
                Err(_) => Some((0, text.len())),
            },
        }
    }

    /// Byte offsets of every non-overlapping match, in order.
    ///
    /// A backtracking execution error ends the scan with the rest of the
    /// text reported as one match.
    #[must_use]
    pub fn find_all(&self, text: &str) -> Vec<(usize, usize)> {
        match self {
            Self::Linear(re) => re.find_iter(text).map(|m| (m.start(), m.end())).collect(),
            Self::Backtracking(re) => {
                let mut found = Vec::new();
                for m in re.find_iter(text) {
                    match m {
                        Ok(m) => found.push((m.start(), m.end())),
                        Err(_) => {
                            let from = found.last().map_or(0, |&(_, end)| end);
                            found.push((from, text.len()));
                            break;
                        }
                    }
                }
                found
            }
        }
    }

    /// Get the pattern string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Linear(re) => re.as_str(),
            Self::Backtracking(re) => re.as_str(),
        }
    }

    /// Check if this regex uses the backtracking engine.
    #[must_use]
    pub const fn uses_backtracking(&self) -> bool {
        matches!(self, Self::Backtracking(_))
    }
}

/// Check if a pattern requires the backtracking engine.
///
/// Syntax heuristic: lookaround, atomic groups, possessive quantifiers and
/// `\1`..`\9` backreferences. False positives only cost speed.
#[must_use]
pub fn needs_backtracking_engine(pattern: &str) -> bool {
    if pattern.contains("(?=")
        || pattern.contains("(?!")
        || pattern.contains("(?<=")
        || pattern.contains("(?<!")
        || pattern.contains("(?>")
    {
        return true;
    }

    if pattern.contains("*+")
        || pattern.contains("++")
        || pattern.contains("?+")
        || pattern.contains("}+")
    {
        return true;
    }

    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            let next = bytes[i + 1];
            if next.is_ascii_digit() && next != b'0' {
                return true;
            }
            // Skip the escaped byte so `\\1` is not read as a backreference.
            i += 2;
            continue;
        }
        i += 1;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_engine_selection() {
        let re = CompiledRegex::new(r"rm\s+-rf").unwrap();
        assert!(!re.uses_backtracking());
        assert!(re.is_match("rm -rf /"));
    }

    #[test]
    fn test_backtracking_engine_selection() {
        let re = CompiledRegex::new(r"chmod\s+(?=.*777)").unwrap();
        assert!(re.uses_backtracking());
        assert!(re.is_match("chmod -R 777 /srv"));
        assert!(!re.is_match("chmod 644 file"));
    }

    #[test]
    fn test_negative_lookahead() {
        let re = CompiledRegex::new(r"rm(?!\s+--dry-run)").unwrap();
        assert!(re.uses_backtracking());
        assert!(re.is_match("rm -rf"));
        assert!(!re.is_match("rm --dry-run"));
    }

    #[test]
    fn test_needs_backtracking_detection() {
        assert!(!needs_backtracking_engine(r"simple"));
        assert!(!needs_backtracking_engine(r"\d+\.\d+"));
        assert!(!needs_backtracking_engine(r"foo\0bar"));
        assert!(!needs_backtracking_engine(r"a\\1"));

        assert!(needs_backtracking_engine(r"(?=lookahead)"));
        assert!(needs_backtracking_engine(r"(?<!negative-behind)"));
        assert!(needs_backtracking_engine(r"(foo)\1"));
        assert!(needs_backtracking_engine(r"a*+"));
    }

    #[test]
    fn test_find_reports_offsets() {
        let re = CompiledRegex::new(r"rm").unwrap();
        assert_eq!(re.find("sudo rm x"), Some((5, 7)));
        assert_eq!(re.find("no match"), None);

        let bt = CompiledRegex::new(r"(?<=sudo\s)rm").unwrap();
        assert_eq!(bt.find("sudo rm x"), Some((5, 7)));
    }

    #[test]
    fn test_find_all_on_both_engines() {
        let re = CompiledRegex::new(r"rm \S+").unwrap();
        assert_eq!(re.find_all("rm a ; rm b"), vec![(0, 4), (7, 11)]);

        let bt = CompiledRegex::new(r"rm(?= )").unwrap();
        assert_eq!(bt.find_all("rm a ; rm b"), vec![(0, 2), (7, 9)]);
        assert!(bt.find_all("ls").is_empty());
    }

    #[test]
    fn test_invalid_pattern_names_engine() {
        let err = CompiledRegex::new(r"rm(").unwrap_err();
        assert_eq!(err.engine, "regex");
        let err = CompiledRegex::new(r"(?=rm(").unwrap_err();
        assert_eq!(err.engine, "fancy_regex");
    }

    #[test]
    fn test_as_str_preserves_source() {
        let re = CompiledRegex::new(r"mkfs\.\w+").unwrap();
        assert_eq!(re.as_str(), r"mkfs\.\w+");
    }
}
