use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL,
            text        TEXT NOT NULL,
            timestamp   INTEGER NOT NULL,
            image_data  BLOB,
            image_type  TEXT
        );

        -- rowid breaks ties between messages stored in the same millisecond
        CREATE INDEX IF NOT EXISTS idx_messages_timestamp
            ON messages(timestamp);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
