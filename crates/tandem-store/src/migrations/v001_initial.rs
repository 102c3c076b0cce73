//! v001 -- Initial schema creation.
//!
//! A single `documents` table: one row per document path with its JSON body.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Documents
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS documents (
    path       TEXT PRIMARY KEY NOT NULL,   -- "collection/key"
    collection TEXT NOT NULL,               -- users | userChats | chats
    body       TEXT NOT NULL,               -- JSON document
    updated_at TEXT NOT NULL                -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_documents_collection
    ON documents(collection);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
