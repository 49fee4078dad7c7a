//! Category vocabulary

use rusqlite::params;

use super::Database;
use crate::error::Result;

impl Database {
    /// Add names to the category vocabulary (existing names are kept)
    pub fn insert_categories(&self, names: &[&str]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO category (name) VALUES (?)")?;
            for name in names {
                inserted += stmt.execute(params![name])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// List the category vocabulary, sorted by name
    pub fn list_categories(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM category ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}
