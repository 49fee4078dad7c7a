//! Domain models for Releve

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A bank account whose statements are dropped into `folder`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    /// Bank identifier, e.g. "Société Générale"
    pub bank: String,
    /// Directory holding the account's statement documents
    pub folder: PathBuf,
}

/// Statement period printed in a document header
///
/// Both ends are unset when the header could not be found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub begin: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(begin: NaiveDate, end: NaiveDate) -> Self {
        Self {
            begin: Some(begin),
            end: Some(end),
        }
    }

    pub fn is_unset(&self) -> bool {
        self.begin.is_none() && self.end.is_none()
    }
}

/// One ingested document (provenance of its operations)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: i64,
    pub account_id: i64,
    /// Original filename inside the account folder
    pub path: String,
    pub period: DateRange,
    pub date_scanned: DateTime<Utc>,
}

/// A transaction recovered from a statement, before DB insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub date: NaiveDate,
    pub payee: Option<String>,
    /// Raw multi-line description
    pub motif: String,
    pub label: Option<String>,
    /// Negative = debit, positive = credit
    pub amount: f64,
}

/// Output of parsing one statement's text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedStatement {
    pub period: DateRange,
    /// Drafts in document order
    pub drafts: Vec<TransactionDraft>,
}

/// A persisted transaction (`operation` row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub date: NaiveDate,
    pub payee: Option<String>,
    pub motif: String,
    pub label: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub category: Option<String>,
    pub source_file_id: i64,
}

impl Transaction {
    /// Current value of `field`, as seen by rule criteria
    pub fn field(&self, field: Field) -> FieldValue {
        match field {
            Field::Date => FieldValue::Text(self.date.to_string()),
            Field::Payee => FieldValue::from(self.payee.clone()),
            Field::Motif => FieldValue::Text(self.motif.clone()),
            Field::Label => FieldValue::from(self.label.clone()),
            Field::Amount => FieldValue::Real(self.amount),
            Field::Currency => FieldValue::Text(self.currency.clone()),
            Field::Category => FieldValue::from(self.category.clone()),
        }
    }

    /// Current value of a text field that rules are allowed to rewrite
    ///
    /// Returns `None` for fields that are not rewritable.
    pub fn rewritable(&self, field: Field) -> Option<Option<&str>> {
        match field {
            Field::Payee => Some(self.payee.as_deref()),
            Field::Label => Some(self.label.as_deref()),
            Field::Category => Some(self.category.as_deref()),
            _ => None,
        }
    }
}

/// Columns of the `operation` table addressable from rule files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Date,
    Payee,
    Motif,
    Label,
    Amount,
    Currency,
    Category,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Payee => "payee",
            Self::Motif => "motif",
            Self::Label => "label",
            Self::Amount => "amount",
            Self::Currency => "currency",
            Self::Category => "category",
        }
    }

    /// Payee, label and category are the only fields mutated after ingestion
    pub fn is_rewritable(&self) -> bool {
        matches!(self, Self::Payee | Self::Label | Self::Category)
    }
}

impl std::str::FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "date" => Ok(Self::Date),
            "payee" => Ok(Self::Payee),
            "motif" => Ok(Self::Motif),
            "label" => Ok(Self::Label),
            "amount" => Ok(Self::Amount),
            "currency" => Ok(Self::Currency),
            "category" => Ok(Self::Category),
            _ => Err(format!("Unknown field: {}", s)),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dynamically typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Real(f64),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::Text).unwrap_or(FieldValue::Null)
    }
}
