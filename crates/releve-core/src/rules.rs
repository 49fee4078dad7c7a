//! Rule engine: field rewrites driven by CSV rule files
//!
//! A rule file is a `;`-delimited CSV. The header names the target field in
//! column 0, then one source field per column pair starting at column 2:
//!
//! ```text
//! label;;motif;;payee;
//! Loyer;set;LOYER;startswith;;
//! Courses;set;^CARTE X\d{4} .* CARREFOUR;regex;;
//! ```
//!
//! Each data row is one rule: `(action value, action method)` then one
//! `(pattern, criterion method)` pair per source field. A pair left empty
//! places no constraint on that field.
//!
//! Within a rule set the first rule that matches and actually changes the
//! value wins. Rule sets are applied one after the other, each committed
//! before the next one reads the transactions.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Field, FieldValue, Transaction};

const UTF8_BOM: char = '\u{feff}';

/// How a criterion compares its pattern to a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionMethod {
    Equals,
    StartsWith,
    EndsWith,
    Regex,
}

impl CriterionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Regex => "regex",
        }
    }
}

impl std::str::FromStr for CriterionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equals" => Ok(Self::Equals),
            "startswith" => Ok(Self::StartsWith),
            "endswith" => Ok(Self::EndsWith),
            "regex" => Ok(Self::Regex),
            _ => Err(format!("Unknown criterion method: {}", s)),
        }
    }
}

impl std::fmt::Display for CriterionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an action combines its value with the current field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMethod {
    Set,
    Before,
    After,
    Replace,
    RegexReplace,
}

impl ActionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Before => "before",
            Self::After => "after",
            Self::Replace => "replace",
            Self::RegexReplace => "regex-replace",
        }
    }
}

impl std::str::FromStr for ActionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "set" => Ok(Self::Set),
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            "replace" => Ok(Self::Replace),
            "regex-replace" => Ok(Self::RegexReplace),
            _ => Err(format!("Unknown action method: {}", s)),
        }
    }
}

impl std::fmt::Display for ActionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A compiled criterion pattern
#[derive(Debug, Clone)]
pub enum Matcher {
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    Regex(Regex),
}

impl Matcher {
    pub fn new(method: CriterionMethod, pattern: &str) -> Result<Self> {
        Ok(match method {
            CriterionMethod::Equals => Self::Equals(pattern.to_string()),
            CriterionMethod::StartsWith => Self::StartsWith(pattern.to_string()),
            CriterionMethod::EndsWith => Self::EndsWith(pattern.to_string()),
            CriterionMethod::Regex => Self::Regex(Regex::new(pattern)?),
        })
    }

    pub fn method(&self) -> CriterionMethod {
        match self {
            Self::Equals(_) => CriterionMethod::Equals,
            Self::StartsWith(_) => CriterionMethod::StartsWith,
            Self::EndsWith(_) => CriterionMethod::EndsWith,
            Self::Regex(_) => CriterionMethod::Regex,
        }
    }

    /// Non-text values (null, amounts) only ever fail
    pub fn matches(&self, value: &FieldValue) -> bool {
        let Some(text) = value.as_text() else {
            return false;
        };
        match self {
            Self::Equals(pattern) => text == pattern,
            Self::StartsWith(pattern) => text.starts_with(pattern.as_str()),
            Self::EndsWith(pattern) => text.ends_with(pattern.as_str()),
            Self::Regex(re) => re.is_match(text),
        }
    }
}

/// One constraint of a rule on a source field
#[derive(Debug, Clone)]
pub struct Criterion {
    pub field: Field,
    pub matcher: Matcher,
}

impl Criterion {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.matcher.matches(&transaction.field(self.field))
    }
}

/// The rewrite a rule performs on its target field
#[derive(Debug, Clone)]
pub enum Action {
    Set(String),
    Before(String),
    After(String),
    Replace { from: String, to: String },
    RegexReplace { pattern: Regex, replacement: String },
}

impl Action {
    /// Build an action; `replace` and `regex-replace` values are `old|new`
    pub fn new(method: ActionMethod, value: &str) -> Result<Self> {
        let split = || {
            value.split_once('|').ok_or_else(|| {
                Error::Rule(format!(
                    "{} value '{}' has no '|' separator",
                    method, value
                ))
            })
        };

        Ok(match method {
            ActionMethod::Set => Self::Set(value.to_string()),
            ActionMethod::Before => Self::Before(value.to_string()),
            ActionMethod::After => Self::After(value.to_string()),
            ActionMethod::Replace => {
                let (from, to) = split()?;
                Self::Replace {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
            ActionMethod::RegexReplace => {
                let (pattern, replacement) = split()?;
                Self::RegexReplace {
                    pattern: Regex::new(pattern)?,
                    replacement: replacement.to_string(),
                }
            }
        })
    }

    pub fn method(&self) -> ActionMethod {
        match self {
            Self::Set(_) => ActionMethod::Set,
            Self::Before(_) => ActionMethod::Before,
            Self::After(_) => ActionMethod::After,
            Self::Replace { .. } => ActionMethod::Replace,
            Self::RegexReplace { .. } => ActionMethod::RegexReplace,
        }
    }

    /// Compute the new field value from the current one
    pub fn apply(&self, current: Option<&str>) -> Option<String> {
        match self {
            Self::Set(value) => Some(value.clone()),
            Self::Before(value) => Some(format!("{}{}", value, current.unwrap_or_default())),
            Self::After(value) => Some(format!("{}{}", current.unwrap_or_default(), value)),
            Self::Replace { from, to } => current.map(|c| c.replace(from.as_str(), to)),
            Self::RegexReplace {
                pattern,
                replacement,
            } => current.map(|c| pattern.replace_all(c, replacement.as_str()).into_owned()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub action: Action,
    /// All must hold; an empty list matches everything
    pub criteria: Vec<Criterion>,
}

impl Rule {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.criteria.iter().all(|c| c.matches(transaction))
    }
}

/// The ordered rules of one rule file, all rewriting the same field
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub field: Field,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Load a rule file, named after its file name
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let text = fs::read_to_string(path)?;
        Self::parse(name, &text)
    }

    /// Parse rule file contents
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self> {
        let name = name.into();
        let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
        let fail = |line: u64, msg: String| Error::Rule(format!("{} line {}: {}", name, line, msg));

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        let mut records = reader.records();

        let header = records
            .next()
            .ok_or_else(|| Error::Rule(format!("{}: empty rule file", name)))??;
        let width = header.len();

        let field: Field = header
            .get(0)
            .unwrap_or_default()
            .parse()
            .map_err(|e| fail(1, e))?;
        if !field.is_rewritable() {
            return Err(fail(1, format!("field '{}' cannot be rewritten", field)));
        }

        let mut sources = Vec::new();
        for column in (2..width).step_by(2) {
            let source: Field = header[column].parse().map_err(|e| fail(1, e))?;
            sources.push(source);
        }

        let mut rules = Vec::new();
        for record in records {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            if record.len() != width {
                return Err(fail(
                    line,
                    format!("expected {} columns, found {}", width, record.len()),
                ));
            }

            let cell = |column: usize| record.get(column).unwrap_or_default();

            let method: ActionMethod = cell(1).parse().map_err(|e| fail(line, e))?;
            let action = Action::new(method, cell(0)).map_err(|e| fail(line, e.to_string()))?;

            let mut criteria = Vec::new();
            for (k, source) in sources.iter().enumerate() {
                let (pattern, method) = (cell(2 + 2 * k), cell(3 + 2 * k));
                if pattern.is_empty() && method.is_empty() {
                    continue;
                }
                let method: CriterionMethod = method.parse().map_err(|e| fail(line, e))?;
                let matcher =
                    Matcher::new(method, pattern).map_err(|e| fail(line, e.to_string()))?;
                criteria.push(Criterion {
                    field: *source,
                    matcher,
                });
            }

            rules.push(Rule { action, criteria });
        }

        debug!("loaded {} rules from {} ({})", rules.len(), name, field);
        Ok(Self {
            name,
            field,
            rules,
        })
    }

    /// New value of the target field, or `None` when no rule changes it
    ///
    /// A matching rule whose action leaves the value unchanged does not stop
    /// the evaluation; the next rules are still tried.
    pub fn evaluate(&self, transaction: &Transaction) -> Option<Option<String>> {
        let current = transaction.rewritable(self.field)?;
        self.rules
            .iter()
            .filter(|rule| rule.matches(transaction))
            .map(|rule| rule.action.apply(current))
            .find(|new| new.as_deref() != current)
    }

    /// Values this set assigns unconditionally
    fn set_values(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter_map(|rule| match &rule.action {
            Action::Set(value) => Some(value.as_str()),
            _ => None,
        })
    }
}

/// Outcome of applying a directory of rule files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulesSummary {
    pub rule_sets_applied: usize,
    pub rows_changed: usize,
}

/// List rule files under `dir`, sorted by name, descending into subdirectories
/// at their sorted position
pub fn discover_rule_sets(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_rule_files(dir, &mut files)?;
    Ok(files)
}

fn collect_rule_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_rule_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Apply one rule set as a single pass over every transaction
///
/// Returns the number of rows changed.
pub fn apply_rule_set(db: &Database, rule_set: &RuleSet) -> Result<usize> {
    let transactions = db.list_transactions()?;
    let updates: Vec<(i64, Option<String>)> = transactions
        .iter()
        .filter_map(|tx| rule_set.evaluate(tx).map(|value| (tx.id, value)))
        .collect();

    let changed = db.update_field(rule_set.field, &updates)?;
    info!(
        "rules applied ({}): {}/{}",
        rule_set.name,
        changed,
        transactions.len()
    );
    Ok(changed)
}

/// Load and apply every rule file under `dir`, in order
///
/// A malformed rule file aborts the run; sets applied before it stay
/// committed.
pub fn apply_rules_dir(db: &Database, dir: &Path) -> Result<RulesSummary> {
    let vocabulary = db.list_categories()?;
    let mut summary = RulesSummary::default();

    for path in discover_rule_sets(dir)? {
        let rule_set = RuleSet::from_path(&path)?;
        if rule_set.field == Field::Category {
            check_vocabulary(&rule_set, &vocabulary);
        }
        summary.rows_changed += apply_rule_set(db, &rule_set)?;
        summary.rule_sets_applied += 1;
    }

    Ok(summary)
}

/// Warn about category values missing from the vocabulary; returns them
fn check_vocabulary<'a>(rule_set: &'a RuleSet, vocabulary: &[String]) -> Vec<&'a str> {
    if vocabulary.is_empty() {
        return Vec::new();
    }
    let unknown: Vec<&str> = rule_set
        .set_values()
        .filter(|value| !vocabulary.iter().any(|c| c == value))
        .collect();
    for value in &unknown {
        warn!("{}: unknown category '{}'", rule_set.name, value);
    }
    unknown
}
