//! Releve Core Library
//!
//! Bank statement ingestion for a personal ledger:
//! - Database access and migrations
//! - Statement parser for the Société Générale text layout
//! - Concurrent ingestion pipeline (parser workers, single writer)
//! - CSV-driven rule engine rewriting payee, label and category
//! - Internal transfer linking

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod motif;
pub mod pipeline;
pub mod rules;
pub mod statement;
pub mod transfers;

pub use config::{Config, LedgerConfig, ScanConfig, WorkPartition};
pub use db::{Database, RecordedStatement};
pub use error::{Error, Result};
pub use extract::{CommandExtractor, TextExtractor};
pub use models::{
    Account, DateRange, Field, FieldValue, ParsedStatement, SourceFile, Transaction,
    TransactionDraft,
};
pub use pipeline::{
    find_unscanned, run_all, shard_by_size, FileFailure, IngestSummary, PendingFile, Pipeline,
    RunSummary, ScanOutcome,
};
pub use rules::{
    apply_rule_set, apply_rules_dir, discover_rule_sets, Action, ActionMethod, Criterion,
    CriterionMethod, Matcher, Rule, RuleSet, RulesSummary,
};
pub use statement::StatementParser;
pub use transfers::{link_transfers, LinkSummary};
