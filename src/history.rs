//! Chat history persistence for the history-bearing room
//!
//! Exactly one room is configured to keep history. Sessions append each chat
//! line after broadcasting it and replay the most recent lines to new
//! arrivals. Storage is advisory: callers log failures and keep going, so a
//! broken or slow database never affects live delivery.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::params;

use crate::error::Result;
use crate::server::RoomId;

/// One persisted chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Display name of the author
    pub author: String,
    /// The chat line, whitespace-trimmed
    pub text: String,
    /// Database timestamp, as stored
    pub timestamp: String,
}

/// Persistent store for chat lines, keyed by room.
pub trait HistoryStore: Send + Sync {
    /// Append one chat line. Callers treat failures as advisory.
    fn append(&self, room_id: RoomId, author: &str, text: &str) -> Result<()>;

    /// The most recent `limit` entries for a room, most recent first.
    fn recent(&self, room_id: RoomId, limit: usize) -> Result<Vec<HistoryEntry>>;
}

/// SQLite-backed [`HistoryStore`].
pub struct SqliteHistory {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteHistory {
    /// Open (and initialize if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(rusqlite::Connection::open(path)?)
    }

    /// Open a fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                message TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        // A poisoned lock means a previous statement panicked; the connection
        // itself is still usable for the next statement.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl HistoryStore for SqliteHistory {
    fn append(&self, room_id: RoomId, author: &str, text: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO messages (room_id, username, message) VALUES (?1, ?2, ?3)",
            params![room_id, author, text],
        )?;
        Ok(())
    }

    fn recent(&self, room_id: RoomId, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock();
        // `id` breaks ties between rows inserted within the same clock second.
        let mut stmt = conn.prepare(
            "SELECT username, message, timestamp
             FROM messages
             WHERE room_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![room_id, limit as i64], |row| {
            Ok(HistoryEntry {
                author: row.get(0)?,
                text: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_on_empty_store() {
        let store = SqliteHistory::open_in_memory().expect("open");
        let entries = store.recent(1, 10).expect("recent");
        assert!(entries.is_empty());
    }

    #[test]
    fn test_round_trip_keeps_last_ten_in_order() {
        let store = SqliteHistory::open_in_memory().expect("open");
        for i in 1..=15 {
            store
                .append(1, "alice", &format!("message {}", i))
                .expect("append");
        }

        let entries = store.recent(1, 10).expect("recent");
        assert_eq!(entries.len(), 10);

        // Most recent first: 15 down to 6.
        for (offset, entry) in entries.iter().enumerate() {
            assert_eq!(entry.author, "alice");
            assert_eq!(entry.text, format!("message {}", 15 - offset));
        }

        // Re-reversed for display: oldest of the kept window first.
        let display: Vec<&HistoryEntry> = entries.iter().rev().collect();
        assert_eq!(display[0].text, "message 6");
        assert_eq!(display[9].text, "message 15");
    }

    #[test]
    fn test_rooms_are_isolated() {
        let store = SqliteHistory::open_in_memory().expect("open");
        store.append(1, "alice", "in room one").expect("append");
        store.append(2, "bob", "in room two").expect("append");

        let room_one = store.recent(1, 10).expect("recent");
        assert_eq!(room_one.len(), 1);
        assert_eq!(room_one[0].text, "in room one");

        let room_two = store.recent(2, 10).expect("recent");
        assert_eq!(room_two.len(), 1);
        assert_eq!(room_two[0].author, "bob");
    }
}
