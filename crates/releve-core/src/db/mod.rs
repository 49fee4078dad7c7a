//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `accounts` - Bank accounts and their statement folders
//! - `source_files` - Ingested documents and atomic statement persistence
//! - `transactions` - Operation reads and rule/linker field updates
//! - `categories` - The category reference vocabulary

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::Result;

mod accounts;
mod categories;
mod source_files;
mod transactions;

pub use source_files::RecordedStatement;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Format used for `date_scanned` columns
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a SQLite `DATE` column (ISO `YYYY-MM-DD`)
pub(crate) fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Open (or create) the ledger at `path` and bring its schema up to date
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because every pooled
    /// connection to `:memory:` would see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "releve_test_{}_{}.db",
            std::process::id(),
            id
        ));

        // Remove any leftover file from a previous run
        let _ = std::fs::remove_file(&path);

        Self::new(&path.to_string_lossy())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block the single writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            -- Accounts (one statement folder each)
            CREATE TABLE IF NOT EXISTS account (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                bank TEXT NOT NULL,
                folder TEXT NOT NULL
            );

            -- Ingested documents; a filename is scanned at most once per account
            CREATE TABLE IF NOT EXISTS source_file (
                id INTEGER PRIMARY KEY,
                date_begin DATE,
                date_end DATE,
                date_scanned DATETIME NOT NULL,
                path TEXT NOT NULL,
                account INTEGER NOT NULL REFERENCES account(id),
                UNIQUE(account, path)
            );

            CREATE INDEX IF NOT EXISTS idx_source_file_account ON source_file(account);

            -- Operations (transactions)
            CREATE TABLE IF NOT EXISTS operation (
                id INTEGER PRIMARY KEY,
                date DATE NOT NULL,
                payee TEXT,
                motif TEXT NOT NULL,
                label TEXT,
                amount REAL NOT NULL,
                currency TEXT NOT NULL,
                category TEXT,
                source_file INTEGER NOT NULL REFERENCES source_file(id)
            );

            CREATE INDEX IF NOT EXISTS idx_operation_source_file ON operation(source_file);
            CREATE INDEX IF NOT EXISTS idx_operation_category ON operation(category);

            -- Category vocabulary (seeded externally)
            CREATE TABLE IF NOT EXISTS category (
                name TEXT PRIMARY KEY
            );
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
