//! CRUD operations for persisted documents.

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use tandem_shared::DocumentPath;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Insert or replace the body stored at `path`.
    pub fn put_document(&self, path: &DocumentPath, body: &Value) -> Result<()> {
        self.conn().execute(
            "INSERT INTO documents (path, collection, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at",
            params![
                path.to_string(),
                path.collection.name(),
                serde_json::to_string(body)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_document(&self, path: &DocumentPath) -> Result<Value> {
        let body: String = self
            .conn()
            .query_row(
                "SELECT body FROM documents WHERE path = ?1",
                params![path.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(path.to_string()),
                other => StoreError::Sqlite(other),
            })?;
        Ok(serde_json::from_str(&body)?)
    }

    pub fn delete_document(&self, path: &DocumentPath) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM documents WHERE path = ?1",
            params![path.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Load every stored document. Rows with an unparseable path or body are
    /// skipped with a warning rather than failing the whole load.
    pub fn load_documents(&self) -> Result<Vec<(DocumentPath, Value)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT path, body FROM documents ORDER BY path ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (raw_path, body) = row?;
            let path = match DocumentPath::parse(&raw_path) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(path = %raw_path, error = %e, "skipping stored document");
                    continue;
                }
            };
            match serde_json::from_str(&body) {
                Ok(value) => documents.push((path, value)),
                Err(e) => {
                    tracing::warn!(path = %raw_path, error = %e, "skipping stored document");
                }
            }
        }
        Ok(documents)
    }
}
