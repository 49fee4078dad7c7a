//! Source file operations
//!
//! A statement is persisted as one unit of work: its `source_file` row and all
//! of its `operation` rows commit together or not at all.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{parse_date, parse_datetime, Database, DATETIME_FORMAT};
use crate::error::Result;
use crate::models::{DateRange, ParsedStatement, SourceFile};

/// Result of persisting one parsed statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedStatement {
    pub source_file_id: i64,
    pub transactions: usize,
}

impl Database {
    /// Filenames already scanned for an account
    pub fn scanned_paths(&self, account_id: i64) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT path FROM source_file WHERE account = ?")?;
        let paths = stmt
            .query_map(params![account_id], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(paths)
    }

    /// Insert a source file row and its operations atomically
    pub fn record_statement(
        &self,
        account_id: i64,
        filename: &str,
        statement: &ParsedStatement,
        currency: &str,
        scanned_at: DateTime<Utc>,
    ) -> Result<RecordedStatement> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO source_file (date_begin, date_end, date_scanned, path, account)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                statement.period.begin.map(|d| d.to_string()),
                statement.period.end.map(|d| d.to_string()),
                scanned_at.format(DATETIME_FORMAT).to_string(),
                filename,
                account_id,
            ],
        )?;
        let source_file_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO operation (date, payee, motif, label, amount, currency, category, source_file)
                VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
                "#,
            )?;
            for draft in &statement.drafts {
                stmt.execute(params![
                    draft.date.to_string(),
                    draft.payee,
                    draft.motif,
                    draft.label,
                    draft.amount,
                    currency,
                    source_file_id,
                ])?;
            }
        }

        tx.commit()?;

        Ok(RecordedStatement {
            source_file_id,
            transactions: statement.drafts.len(),
        })
    }

    /// List the source files recorded for an account, oldest scan first
    pub fn list_source_files(&self, account_id: i64) -> Result<Vec<SourceFile>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, account, path, date_begin, date_end, date_scanned
            FROM source_file WHERE account = ? ORDER BY id
            "#,
        )?;

        let files = stmt
            .query_map(params![account_id], |row| {
                let begin: Option<String> = row.get(3)?;
                let end: Option<String> = row.get(4)?;
                let scanned: String = row.get(5)?;
                Ok(SourceFile {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    path: row.get(2)?,
                    period: DateRange {
                        begin: begin.as_deref().map(parse_date).transpose()?,
                        end: end.as_deref().map(parse_date).transpose()?,
                    },
                    date_scanned: parse_datetime(&scanned),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }
}
