//! Ledger configuration
//!
//! Every section of the TOML file is optional; missing keys fall back to the
//! defaults below.
//!
//! ```toml
//! [database]
//! path = "ledger.db"
//!
//! [rules]
//! path = "rules"
//!
//! [scan]
//! workers = 10
//! partition = "size"
//!
//! [ledger]
//! self_payee = "Jane Doe"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Bank whose statement dialect this crate parses
pub const DEFAULT_BANK: &str = "Société Générale";

/// How files are spread over the parser workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkPartition {
    /// One shared queue; idle workers pull the next file
    #[default]
    Queue,
    /// Files pre-grouped into byte-size balanced shards, one per worker
    Size,
}

/// Scan (ingestion) settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Number of parser workers
    pub workers: usize,
    pub partition: WorkPartition,
    /// Only accounts held at this bank are scanned
    pub bank: String,
    /// Text extraction command; the output file and document path are appended
    pub extractor_program: String,
    pub extractor_args: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            partition: WorkPartition::Queue,
            bank: DEFAULT_BANK.to_string(),
            extractor_program: "python".to_string(),
            extractor_args: ["-m", "fitz", "gettext", "-m", "layout", "-o"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Identities used when mining motifs and linking transfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Payee given to the account holder's own movements (ATM withdrawals, transfers)
    pub self_payee: String,
    /// Category assigned to both sides of a linked transfer
    pub internal_transfer_category: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            self_payee: "Titulaire".to_string(),
            internal_transfer_category: "Virement interne".to_string(),
        }
    }
}

/// Full configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub rules_path: PathBuf,
    pub scan: ScanConfig,
    pub ledger: LedgerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            rules_path: PathBuf::from("rules"),
            scan: ScanConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML content
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

        let mut config = Config::default();

        if let Some(database) = raw.database {
            if let Some(path) = database.path {
                config.database_path = path;
            }
        }

        if let Some(rules) = raw.rules {
            if let Some(path) = rules.path {
                config.rules_path = path;
            }
        }

        if let Some(scan) = raw.scan {
            if let Some(workers) = scan.workers {
                if workers == 0 {
                    return Err(Error::Config("scan.workers must be at least 1".into()));
                }
                config.scan.workers = workers;
            }
            if let Some(partition) = scan.partition {
                config.scan.partition = partition;
            }
            if let Some(bank) = scan.bank {
                config.scan.bank = bank;
            }
            if let Some(program) = scan.extractor_program {
                config.scan.extractor_program = program;
            }
            if let Some(args) = scan.extractor_args {
                config.scan.extractor_args = args;
            }
        }

        if let Some(ledger) = raw.ledger {
            if let Some(payee) = ledger.self_payee {
                config.ledger.self_payee = payee;
            }
            if let Some(category) = ledger.internal_transfer_category {
                config.ledger.internal_transfer_category = category;
            }
        }

        Ok(config)
    }
}

/// Default database location (~/.local/share/releve/releve.db on Linux)
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("releve")
        .join("releve.db")
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    database: Option<RawDatabase>,
    rules: Option<RawRules>,
    scan: Option<RawScan>,
    ledger: Option<RawLedger>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDatabase {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRules {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScan {
    workers: Option<usize>,
    partition: Option<WorkPartition>,
    bank: Option<String>,
    extractor_program: Option<String>,
    extractor_args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLedger {
    self_payee: Option<String>,
    internal_transfer_category: Option<String>,
}
