//! Line-oriented transport for client connections
//!
//! The server core needs only a handful of operations from a connection:
//! read one line, write one line, close. `TcpConnection` implements them over
//! a split TCP stream so that broadcast tasks can write to a client while its
//! own session is blocked reading.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{ChatError, Result};

/// Bidirectional line transport owned by one session.
///
/// Implementations must support one task writing while the owning session is
/// blocked on a read, and `close` must be safe to call more than once.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Process-unique key for this connection, stable for its lifetime.
    fn identity(&self) -> &str;

    /// Read the next line, stripped of its terminator. `None` means EOF.
    async fn read_line(&self) -> Result<Option<String>>;

    /// Write one line, appending the terminator.
    async fn write_line(&self, line: &str) -> Result<()>;

    /// Shut the connection down. Subsequent writes fail and reads return EOF.
    async fn close(&self);
}

/// TCP-backed [`Connection`] keyed by the peer address.
pub struct TcpConnection {
    identity: String,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: AtomicBool,
}

impl TcpConnection {
    /// Wrap an accepted stream. The peer address becomes the identity.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            identity: peer.to_string(),
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(Some(write_half)),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn read_line(&self) -> Result<Option<String>> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(half) => {
                half.write_all(line.as_bytes()).await?;
                half.write_all(b"\n").await?;
                half.flush().await?;
                Ok(())
            }
            None => Err(ChatError::connection("connection is closed")),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut writer = self.writer.lock().await;
        if let Some(mut half) = writer.take() {
            let _ = half.shutdown().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory connection shared by room and session tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{ChatError, Result};

    use super::Connection;

    /// In-memory [`Connection`] that replays a scripted input and records
    /// every written line. Reads return EOF once the script is exhausted.
    pub(crate) struct ScriptedConnection {
        identity: String,
        input: Mutex<VecDeque<String>>,
        written: Mutex<Vec<String>>,
        fail_writes: AtomicBool,
        closed: AtomicBool,
    }

    impl ScriptedConnection {
        pub(crate) fn new(identity: &str, script: &[&str]) -> Self {
            Self {
                identity: identity.to_string(),
                input: Mutex::new(script.iter().map(|s| s.to_string()).collect()),
                written: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }
        }

        /// A connection whose writes always fail, for eviction tests.
        pub(crate) fn failing(identity: &str) -> Self {
            let conn = Self::new(identity, &[]);
            conn.fail_writes.store(true, Ordering::Release);
            conn
        }

        pub(crate) fn written(&self) -> Vec<String> {
            self.written.lock().expect("written lock").clone()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Acquire)
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        fn identity(&self) -> &str {
            &self.identity
        }

        async fn read_line(&self) -> Result<Option<String>> {
            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            Ok(self.input.lock().expect("input lock").pop_front())
        }

        async fn write_line(&self, line: &str) -> Result<()> {
            if self.closed.load(Ordering::Acquire) || self.fail_writes.load(Ordering::Acquire) {
                return Err(ChatError::connection("scripted write failure"));
            }
            self.written
                .lock()
                .expect("written lock")
                .push(line.to_string());
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }
}
