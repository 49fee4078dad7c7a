//! Transaction (operation) operations

use rusqlite::{params, Row};

use super::{parse_date, Database};
use crate::error::{Error, Result};
use crate::models::{Field, Transaction};

const SELECT_COLUMNS: &str =
    "SELECT id, date, payee, motif, label, amount, currency, category, source_file FROM operation";

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let date: String = row.get(1)?;
    Ok(Transaction {
        id: row.get(0)?,
        date: parse_date(&date)?,
        payee: row.get(2)?,
        motif: row.get(3)?,
        label: row.get(4)?,
        amount: row.get(5)?,
        currency: row.get(6)?,
        category: row.get(7)?,
        source_file_id: row.get(8)?,
    })
}

impl Database {
    /// List every transaction in insertion order
    pub fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_COLUMNS))?;
        let transactions = stmt
            .query_map([], transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    /// List the transactions of one source file in document order
    pub fn list_transactions_for_source(&self, source_file_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE source_file = ? ORDER BY id",
            SELECT_COLUMNS
        ))?;
        let transactions = stmt
            .query_map(params![source_file_id], transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    /// Uncategorized transactions whose payee is `payee`, in insertion order
    pub fn list_uncategorized_for_payee(&self, payee: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE category IS NULL AND payee = ? ORDER BY id",
            SELECT_COLUMNS
        ))?;
        let transactions = stmt
            .query_map(params![payee], transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    /// Count all transactions
    pub fn count_transactions(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM operation", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Write new values of one rewritable field, in a single SQLite transaction
    ///
    /// Returns the number of rows updated.
    pub fn update_field(&self, field: Field, updates: &[(i64, Option<String>)]) -> Result<usize> {
        if !field.is_rewritable() {
            return Err(Error::Rule(format!("Field '{}' cannot be rewritten", field)));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            // Column name comes from the closed `Field` enum
            let mut stmt = tx.prepare(&format!(
                "UPDATE operation SET {} = ? WHERE id = ?",
                field.as_str()
            ))?;
            for (id, value) in updates {
                updated += stmt.execute(params![value, id])?;
            }
        }
        tx.commit()?;

        Ok(updated)
    }

    /// Assign `category` to each transaction in `ids`
    pub fn set_category(&self, ids: &[i64], category: &str) -> Result<usize> {
        let updates: Vec<(i64, Option<String>)> = ids
            .iter()
            .map(|id| (*id, Some(category.to_string())))
            .collect();
        self.update_field(Field::Category, &updates)
    }
}
