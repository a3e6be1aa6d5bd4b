//! Declarative rule records and the TOML rule-file format.
//!
//! ```toml
//! [[rule]]
//! id = "terraform-destroy"
//! category = "system_modification"
//! severity = "high"
//! domain = "infrastructure"
//! pattern = 'terraform\s+destroy'
//! description = "terraform destroy tears down managed infrastructure"
//! filters = [{ unless_flag = "-target" }]
//! keywords = ["terraform"]
//!
//! [[rule]]
//! id = "pipe-to-python"
//! category = "remote_execution"
//! severity = "high"
//! structural = { kind = "pipeline_sink", sources = ["curl", "wget"], sinks = ["python3"] }
//! description = "downloaded content is executed by python"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PatternLoadError, SourceLocation};
use crate::model::{Category, Domain, RiskLevel, ShellDialect, ShellSet};
use crate::rules::{CompiledRegex, Filter, RegexError, RuleLayer, StructuralPredicate};

/// One rule record, before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    pub id: String,
    pub category: Category,
    pub severity: RiskLevel,
    #[serde(default)]
    pub domain: Domain,
    #[serde(default)]
    pub layer: RuleLayer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural: Option<StructuralPredicate>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shells: Option<Vec<ShellDialect>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

impl RuleDefinition {
    /// A text rule in the domain layer, `generic` domain.
    #[must_use]
    pub fn text(
        id: &str,
        category: Category,
        severity: RiskLevel,
        pattern: &str,
        description: &str,
    ) -> Self {
        Self::new(id, category, severity, description, Some(pattern.to_string()), None)
    }

    /// A structural rule.
    #[must_use]
    pub fn structural(
        id: &str,
        category: Category,
        severity: RiskLevel,
        predicate: StructuralPredicate,
        description: &str,
    ) -> Self {
        let mut def = Self::new(id, category, severity, description, None, Some(predicate));
        def.layer = RuleLayer::Structural;
        def
    }

    fn new(
        id: &str,
        category: Category,
        severity: RiskLevel,
        description: &str,
        pattern: Option<String>,
        structural: Option<StructuralPredicate>,
    ) -> Self {
        Self {
            id: id.to_string(),
            category,
            severity,
            domain: Domain::Generic,
            layer: RuleLayer::Domain,
            pattern,
            structural,
            description: description.to_string(),
            shells: None,
            filters: Vec::new(),
            suggestion: None,
            keywords: Vec::new(),
            override_existing: false,
        }
    }

    #[must_use]
    pub const fn layer(mut self, layer: RuleLayer) -> Self {
        self.layer = layer;
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    #[must_use]
    pub fn shells(mut self, shells: ShellSet) -> Self {
        self.shells = Some(shells.iter().collect());
        self
    }

    #[must_use]
    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| (*k).to_string()).collect();
        self
    }

    #[must_use]
    pub fn suggestion(mut self, suggestion: &str) -> Self {
        self.suggestion = Some(suggestion.to_string());
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: FilterDefinition) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Filter record. Externally tagged: `{ unless_flag = "--dry-run" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDefinition {
    UnlessFlag(String),
    UnlessPathUnder(PathList),
    UnlessMatches(String),
}

/// One path or a list of paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathList {
    One(String),
    Many(Vec<String>),
}

impl PathList {
    fn iter(&self) -> impl Iterator<Item = &str> {
        let items: &[String] = match self {
            Self::One(one) => std::slice::from_ref(one),
            Self::Many(many) => many,
        };
        items.iter().map(String::as_str)
    }
}

impl FilterDefinition {
    /// Builder shorthand for path filters in the built-in catalogue.
    #[must_use]
    pub fn unless_path_under(paths: &[&str]) -> Self {
        Self::UnlessPathUnder(PathList::Many(paths.iter().map(|p| (*p).to_string()).collect()))
    }

    /// Compile the record. A `$NAME` path prefix is read from the
    /// environment; unset variables contribute no prefix.
    ///
    /// # Errors
    ///
    /// Returns the regex error for a bad `unless_matches` pattern.
    pub fn compile(&self) -> Result<Filter, RegexError> {
        Ok(match self {
            Self::UnlessFlag(flag) => Filter::UnlessFlag(flag.clone()),
            Self::UnlessMatches(re) => Filter::UnlessMatches(CompiledRegex::new(re)?),
            Self::UnlessPathUnder(paths) => Filter::UnlessPathUnder(
                paths
                    .iter()
                    .filter_map(expand_prefix)
                    .map(|p| PathBuf::from(p.trim_end_matches('/')))
                    .filter(|p| p.is_absolute())
                    .collect(),
            ),
        })
    }
}

fn expand_prefix(path: &str) -> Option<String> {
    let Some(rest) = path.strip_prefix('$') else {
        return Some(path.to_string());
    };
    let rest = rest.trim_start_matches('{');
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let value = std::env::var(&rest[..end]).ok()?;
    let tail = rest[end..].trim_start_matches('}');
    Some(format!("{value}{tail}"))
}

// ============================================================================
// Rule files
// ============================================================================

/// Entries of one rule file, with the errors of entries that were skipped.
#[derive(Debug, Clone, Default)]
pub struct RuleFile {
    /// `(entry index, definition)` pairs in file order.
    pub definitions: Vec<(usize, RuleDefinition)>,
    pub errors: Vec<PatternLoadError>,
}

/// Parse a TOML rule file. Bad entries are reported and skipped; the rest of
/// the file still loads.
#[must_use]
pub fn parse_rule_file(content: &str, location: &SourceLocation) -> RuleFile {
    let mut file = RuleFile::default();
    let malformed = |message: String, entry: Option<usize>| {
        let location = match entry {
            Some(index) => location.clone().with_entry(index),
            None => location.clone(),
        };
        PatternLoadError::MalformedEntry { location, message }
    };

    let value: toml::Value = match toml::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            file.errors.push(malformed(format!("invalid TOML: {e}"), None));
            return file;
        }
    };

    let Some(root) = value.as_table() else {
        file.errors
            .push(malformed("rule file root must be a table".to_string(), None));
        return file;
    };

    let Some(items) = root.get("rule") else {
        return file;
    };

    let Some(array) = items.as_array() else {
        file.errors.push(malformed(
            "`rule` must be an array of tables (use [[rule]])".to_string(),
            None,
        ));
        return file;
    };

    for (index, item) in array.iter().enumerate() {
        if !item.is_table() {
            file.errors.push(malformed(
                "each [[rule]] entry must be a table".to_string(),
                Some(index),
            ));
            continue;
        }
        match item.clone().try_into::<RuleDefinition>() {
            Ok(def) => file.definitions.push((index, def)),
            Err(e) => {
                let id = item
                    .get("id")
                    .and_then(toml::Value::as_str)
                    .map_or_else(String::new, |id| format!("`{id}`: "));
                file.errors
                    .push(malformed(format!("{id}{}", e.message()), Some(index)));
            }
        }
    }

    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::SourceKind;

    fn location() -> SourceLocation {
        SourceLocation::file(SourceKind::Local, "/tmp/rules.toml")
    }

    #[test]
    fn parses_text_and_structural_entries() {
        let content = r#"
[[rule]]
id = "terraform-destroy"
category = "system_modification"
severity = "high"
domain = "infrastructure"
pattern = 'terraform\s+destroy'
description = "tears down infrastructure"
filters = [{ unless_flag = "-target" }, { unless_path_under = ["/tmp", "/var/tmp"] }]
shells = ["bash", "zsh"]

[[rule]]
id = "pipe-to-python"
category = "remote_execution"
severity = "high"
structural = { kind = "pipeline_sink", sources = ["curl"], sinks = ["python3"] }
"#;
        let file = parse_rule_file(content, &location());
        assert!(file.errors.is_empty(), "{:?}", file.errors);
        assert_eq!(file.definitions.len(), 2);

        let (_, first) = &file.definitions[0];
        assert_eq!(first.domain, Domain::Other("infrastructure".into()));
        assert_eq!(first.filters.len(), 2);
        assert_eq!(first.shells.as_deref(), Some(&[ShellDialect::Bash, ShellDialect::Zsh][..]));

        let (index, second) = &file.definitions[1];
        assert_eq!(*index, 1);
        assert!(matches!(
            second.structural,
            Some(StructuralPredicate::PipelineSink { .. })
        ));
    }

    #[test]
    fn bad_entries_are_reported_and_skipped() {
        let content = r#"
[[rule]]
id = "missing-severity"
category = "other"
pattern = "x"

[[rule]]
id = "ok"
category = "other"
severity = "low"
pattern = "y"

[[rule]]
id = "typo"
category = "other"
severity = "low"
patern = "z"
"#;
        let file = parse_rule_file(content, &location());
        assert_eq!(file.definitions.len(), 1);
        assert_eq!(file.definitions[0].1.id, "ok");
        assert_eq!(file.errors.len(), 2);

        let first = file.errors[0].to_string();
        assert!(first.contains("missing-severity"), "{first}");
        assert!(first.contains("[rule 0]"), "{first}");
        assert!(file.errors[1].to_string().contains("[rule 2]"));
    }

    #[test]
    fn invalid_toml_is_one_file_error() {
        let file = parse_rule_file("[[rule]\nid=", &location());
        assert!(file.definitions.is_empty());
        assert_eq!(file.errors.len(), 1);
        assert!(file.errors[0].to_string().contains("invalid TOML"));
    }

    #[test]
    fn empty_file_is_fine() {
        let file = parse_rule_file("", &location());
        assert!(file.definitions.is_empty());
        assert!(file.errors.is_empty());
    }

    #[test]
    fn override_key_is_renamed() {
        let content = "[[rule]]\nid='a'\ncategory='other'\nseverity='low'\npattern='a'\noverride=true\n";
        let file = parse_rule_file(content, &location());
        assert!(file.definitions[0].1.override_existing);
    }

    #[test]
    fn path_filter_compiles_absolute_prefixes() {
        let filter = FilterDefinition::unless_path_under(&["/tmp/", "relative"])
            .compile()
            .unwrap();
        let Filter::UnlessPathUnder(prefixes) = filter else {
            panic!("expected path filter");
        };
        assert_eq!(prefixes, vec![PathBuf::from("/tmp")]);
    }
}
