//! Multi-room TCP chat server
//!
//! This library provides a line-oriented chat server: clients connect over
//! TCP, pick one of a fixed set of rooms, and exchange plain-text lines that
//! are broadcast to every other occupant of the room. One room persists its
//! chat lines to SQLite and replays the most recent ones to new arrivals.

pub mod error;
pub mod history;
pub mod server;
pub mod transport;

pub use error::{ChatError, Result};
pub use history::{HistoryEntry, HistoryStore, SqliteHistory};
pub use server::{ChatServer, Room, RoomRegistry};
pub use transport::Connection;

/// Chat server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Server listen address
    pub bind_addr: std::net::SocketAddr,
    /// Shared password for the password-gated room
    pub room_password: String,
    /// Path to the history database
    pub history_db: String,
    /// How many history lines are replayed on joining the history-bearing room
    pub history_replay: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:2000".parse().unwrap(),
            room_password: "1234".to_string(),
            history_db: "./chat.db".to_string(),
            history_replay: 10,
        }
    }
}
