//! Chat server core: rooms, registry, sessions, and the accept loop
//!
//! One session task runs per accepted connection; sessions share nothing but
//! the immutable room registry and the history store. Each room synchronizes
//! its own membership independently, so no session ever holds more than one
//! room's lock at a time.

pub mod registry;
pub mod room;
pub mod session;

pub use registry::RoomRegistry;
pub use room::{Member, MemberId, Room, RoomAccess, RoomId};
pub use session::{run_session, Session};

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;
use crate::history::HistoryStore;
use crate::transport::{Connection, TcpConnection};
use crate::ServerConfig;

/// TCP chat server: accepts connections and runs one session per client.
pub struct ChatServer {
    config: Arc<ServerConfig>,
    registry: Arc<RoomRegistry>,
    history: Arc<dyn HistoryStore>,
}

impl ChatServer {
    /// Create a new chat server
    pub fn new(
        config: ServerConfig,
        registry: Arc<RoomRegistry>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            history,
        }
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("Chat server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from an existing listener, spawning one session
    /// task per client. An accept error is logged and the loop continues.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            };
            info!("New connection from {}", addr);

            let conn: Arc<dyn Connection> = Arc::new(TcpConnection::new(stream, addr));
            let registry = Arc::clone(&self.registry);
            let history = Arc::clone(&self.history);
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                session::run_session(conn, registry, history, config).await;
            });
        }
    }
}
