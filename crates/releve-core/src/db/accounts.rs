//! Account operations

use std::path::{Path, PathBuf};

use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::error::Result;
use crate::models::Account;

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let folder: String = row.get(3)?;
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        bank: row.get(2)?,
        folder: PathBuf::from(folder),
    })
}

impl Database {
    /// Create an account
    pub fn create_account(&self, name: &str, bank: &str, folder: &Path) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO account (name, bank, folder) VALUES (?, ?, ?)",
            params![name, bank, folder.to_string_lossy()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List all accounts
    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, bank, folder FROM account ORDER BY id")?;

        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// List the accounts held at `bank`
    pub fn list_accounts_for_bank(&self, bank: &str) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, bank, folder FROM account WHERE bank = ? ORDER BY id")?;

        let accounts = stmt
            .query_map(params![bank], account_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Get an account by ID
    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                "SELECT id, name, bank, folder FROM account WHERE id = ?",
                params![id],
                account_from_row,
            )
            .optional()?;

        Ok(account)
    }
}
