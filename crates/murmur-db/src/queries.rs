use crate::models::{MessageRow, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str = "id, username, text, timestamp, image_data, image_type";

impl Database {
    // -- Users --

    /// Returns `false` when the username is already taken.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    // -- Messages --

    /// Store a message and return the timestamp it was stored with.
    ///
    /// The timestamp is raised to the newest stored one if needed, so
    /// insertion order and (timestamp, rowid) order always agree. A cursor
    /// handed out earlier therefore never skips a message committed later.
    pub fn insert_message(&self, message: &MessageRow) -> Result<i64> {
        self.with_conn(|conn| {
            let newest: Option<i64> =
                conn.query_row("SELECT MAX(timestamp) FROM messages", [], |row| row.get(0))?;
            let timestamp = newest.map_or(message.timestamp, |newest| newest.max(message.timestamp));

            conn.execute(
                "INSERT INTO messages (id, username, text, timestamp, image_data, image_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    message.id,
                    message.username,
                    message.text,
                    timestamp,
                    message.image_data,
                    message.image_type,
                ],
            )?;
            Ok(timestamp)
        })
    }

    /// The newest `limit` messages, returned oldest first.
    pub fn get_latest_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_latest_messages(conn, limit))
    }

    /// Every message stored strictly after `message_id` in (timestamp,
    /// insertion) order. Returns `None` when `message_id` is unknown.
    pub fn get_messages_after(&self, message_id: &str) -> Result<Option<Vec<MessageRow>>> {
        self.with_conn(|conn| query_messages_after(conn, message_id))
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_latest_messages(conn: &Connection, limit: u32) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM (
             SELECT rowid AS seq, {MESSAGE_COLUMNS} FROM messages
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?1
         )
         ORDER BY timestamp ASC, seq ASC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([limit], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_messages_after(conn: &Connection, message_id: &str) -> Result<Option<Vec<MessageRow>>> {
    let cursor: Option<(i64, i64)> = conn
        .query_row(
            "SELECT timestamp, rowid FROM messages WHERE id = ?1",
            [message_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((timestamp, seq)) = cursor else {
        return Ok(None);
    };

    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE timestamp > ?1 OR (timestamp = ?1 AND rowid > ?2)
         ORDER BY timestamp ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(rusqlite::params![timestamp, seq], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(rows))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        username: row.get(1)?,
        text: row.get(2)?,
        timestamp: row.get(3)?,
        image_data: row.get(4)?,
        image_type: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, timestamp: i64) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            username: "alice".to_string(),
            text: format!("message {id}"),
            timestamp,
            image_data: None,
            image_type: None,
        }
    }

    fn ids(rows: &[MessageRow]) -> Vec<&str> {
        rows.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn users_are_found_by_username() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u1", "alice", "hash").unwrap();

        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.password, "hash");
        assert!(db.get_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_keeps_first_account() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_user("u1", "alice", "hash").unwrap());
        assert!(!db.create_user("u2", "alice", "other").unwrap());
        assert_eq!(db.get_user_by_username("alice").unwrap().unwrap().id, "u1");
    }

    #[test]
    fn latest_messages_are_capped_and_ascending() {
        let db = Database::open_in_memory().unwrap();
        for (i, ts) in [10, 20, 30, 40, 50].into_iter().enumerate() {
            db.insert_message(&row(&format!("m{i}"), ts)).unwrap();
        }

        let rows = db.get_latest_messages(3).unwrap();
        let stamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![30, 40, 50]);
        assert_eq!(ids(&rows), vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn messages_after_cursor_are_strictly_newer() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&row("a", 100)).unwrap();
        db.insert_message(&row("b", 200)).unwrap();
        db.insert_message(&row("c", 200)).unwrap();
        db.insert_message(&row("d", 300)).unwrap();

        let after_a = db.get_messages_after("a").unwrap().unwrap();
        assert_eq!(ids(&after_a), vec!["b", "c", "d"]);

        // same-millisecond messages are split by insertion order
        let after_b = db.get_messages_after("b").unwrap().unwrap();
        assert_eq!(ids(&after_b), vec!["c", "d"]);

        let after_d = db.get_messages_after("d").unwrap().unwrap();
        assert!(after_d.is_empty());
    }

    #[test]
    fn late_commit_with_older_clock_is_still_after_cursor() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.insert_message(&row("b", 200)).unwrap(), 200);
        // stamped before b but committed after it
        assert_eq!(db.insert_message(&row("a", 100)).unwrap(), 200);

        let after_b = db.get_messages_after("b").unwrap().unwrap();
        assert_eq!(ids(&after_b), vec!["a"]);
        assert_eq!(after_b[0].timestamp, 200);

        let latest = db.get_latest_messages(20).unwrap();
        assert_eq!(ids(&latest), vec!["b", "a"]);
    }

    #[test]
    fn unknown_cursor_is_none() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&row("a", 100)).unwrap();
        assert!(db.get_messages_after("missing").unwrap().is_none());
    }

    #[test]
    fn image_payload_round_trips_through_storage() {
        let db = Database::open_in_memory().unwrap();
        let mut with_image = row("img", 1);
        with_image.image_data = Some(vec![0x89, b'P', b'N', b'G']);
        with_image.image_type = Some("png".into());
        db.insert_message(&with_image).unwrap();

        let rows = db.get_latest_messages(20).unwrap();
        assert_eq!(rows[0].image_data.as_deref(), Some(&[0x89, b'P', b'N', b'G'][..]));
        assert_eq!(rows[0].image_type.as_deref(), Some("png"));
    }
}
