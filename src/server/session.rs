//! Per-connection session state machine
//!
//! Each accepted connection runs one session task: pick a display name, pick
//! a room (with a password challenge for the gated one), then relay chat
//! lines until the client exits the room, quits, or disconnects. Leaving the
//! active room always broadcasts the departure notice and removes the member,
//! no matter how the in-room loop ended.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::Result;
use crate::history::HistoryStore;
use crate::transport::Connection;
use crate::ServerConfig;

use super::registry::RoomRegistry;
use super::room::{Member, Room, RoomAccess};

/// Leave the current room and return to the menu
const CMD_EXIT: &str = "/exit";
/// Disconnect from the server entirely
const CMD_QUIT: &str = "/quit";

/// Session lifecycle states
enum SessionState {
    /// Waiting for the client to pick a display name
    NamingSelf,
    /// Showing the room menu and reading a choice
    SelectingRoom,
    /// A gated room was chosen; waiting for the shared password
    PasswordChallenge(Arc<Room>),
    /// Member of a room, relaying chat lines
    Active(Arc<Room>),
    /// Done; the transport is closed on the way out
    Terminated,
}

/// How the in-room loop ended
enum RoomOutcome {
    /// `/exit`: back to the room menu
    Exit,
    /// `/quit`: farewell sent, drop the connection
    Quit,
    /// EOF or a transport error on the client's own connection
    Disconnect,
}

/// One client's pass through the chat server.
pub struct Session {
    conn: Arc<dyn Connection>,
    registry: Arc<RoomRegistry>,
    history: Arc<dyn HistoryStore>,
    config: Arc<ServerConfig>,
    /// Display name, chosen once before any room selection
    name: String,
}

/// Run one session to completion. Spawned once per accepted connection.
pub async fn run_session(
    conn: Arc<dyn Connection>,
    registry: Arc<RoomRegistry>,
    history: Arc<dyn HistoryStore>,
    config: Arc<ServerConfig>,
) {
    let mut session = Session::new(conn, registry, history, config);
    if let Err(e) = session.run().await {
        debug!("Session {} ended: {}", session.identity(), e);
    }
}

impl Session {
    /// Create a session for a freshly accepted connection
    pub fn new(
        conn: Arc<dyn Connection>,
        registry: Arc<RoomRegistry>,
        history: Arc<dyn HistoryStore>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            conn,
            registry,
            history,
            config,
            name: String::new(),
        }
    }

    /// The connection identity this session is keyed by
    pub fn identity(&self) -> &str {
        self.conn.identity()
    }

    /// Drive the state machine until it terminates, then close the
    /// transport. Transport errors on the session's own connection end the
    /// session; they never affect other sessions or rooms.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.drive().await;
        self.conn.close().await;
        result
    }

    async fn drive(&mut self) -> Result<()> {
        let mut state = SessionState::NamingSelf;
        loop {
            state = match state {
                SessionState::NamingSelf => self.name_self().await?,
                SessionState::SelectingRoom => self.select_room().await?,
                SessionState::PasswordChallenge(room) => self.password_challenge(room).await?,
                SessionState::Active(room) => self.active(room).await,
                SessionState::Terminated => return Ok(()),
            };
        }
    }

    /// Read the display name. Empty or unreadable input ends the session.
    async fn name_self(&mut self) -> Result<SessionState> {
        self.conn.write_line("Your name:").await?;
        let line = match self.conn.read_line().await? {
            Some(line) => line,
            None => return Ok(SessionState::Terminated),
        };
        let name = line.trim();
        if name.is_empty() {
            self.conn
                .write_line("Name cannot be empty. Disconnecting.")
                .await?;
            return Ok(SessionState::Terminated);
        }
        self.name = name.to_string();
        Ok(SessionState::SelectingRoom)
    }

    /// Show the menu and resolve the choice. Unrecognized tokens re-prompt.
    async fn select_room(&mut self) -> Result<SessionState> {
        self.conn.write_line(&self.registry.menu()).await?;
        let line = match self.conn.read_line().await? {
            Some(line) => line,
            None => return Ok(SessionState::Terminated),
        };
        let choice = line.trim();

        if choice == "q" || choice == "quit" {
            self.conn.write_line("Goodbye!").await?;
            return Ok(SessionState::Terminated);
        }

        let room = match self.registry.by_choice(choice) {
            Some(room) => Arc::clone(room),
            None => {
                self.conn
                    .write_line(&self.registry.invalid_choice_hint())
                    .await?;
                return Ok(SessionState::SelectingRoom);
            }
        };

        match room.access {
            RoomAccess::PasswordGated => Ok(SessionState::PasswordChallenge(room)),
            RoomAccess::Open | RoomAccess::Private => self.join_room(room).await,
        }
    }

    /// One password attempt. A mismatch goes back to the menu, not to
    /// disconnection.
    async fn password_challenge(&mut self, room: Arc<Room>) -> Result<SessionState> {
        self.conn.write_line("Password for locked room:").await?;
        let line = match self.conn.read_line().await? {
            Some(line) => line,
            None => return Ok(SessionState::Terminated),
        };
        if line != self.config.room_password {
            self.conn.write_line("Wrong password. Try again.").await?;
            return Ok(SessionState::SelectingRoom);
        }
        self.conn.write_line("Access granted.").await?;
        self.join_room(room).await
    }

    /// Join the chosen room and announce the arrival. A duplicate join (the
    /// same connection re-entering its current room) is reported and sends
    /// the client back to the menu.
    async fn join_room(&mut self, room: Arc<Room>) -> Result<SessionState> {
        let member = Member {
            id: self.conn.identity().to_string(),
            name: self.name.clone(),
            conn: Arc::clone(&self.conn),
        };
        if !room.join(member).await {
            self.conn
                .write_line("You are already in this room!")
                .await?;
            return Ok(SessionState::SelectingRoom);
        }
        room.broadcast_system(&format!("{} has joined the room", self.name))
            .await;
        Ok(SessionState::Active(room))
    }

    /// Run the in-room loop, then always leave: departure notice to the
    /// others, removal from the member set. Every exit path of the loop
    /// (command, EOF, transport error) funnels through this cleanup.
    async fn active(&mut self, room: Arc<Room>) -> SessionState {
        let outcome = self.room_loop(&room).await;

        room.broadcast_system_except(
            self.conn.identity(),
            &format!("{} has left the room", self.name),
        )
        .await;
        room.leave(self.conn.identity()).await;
        info!("User {} left room {}", self.name, room.name);

        match outcome {
            RoomOutcome::Exit => SessionState::SelectingRoom,
            RoomOutcome::Quit | RoomOutcome::Disconnect => SessionState::Terminated,
        }
    }

    /// Relay chat lines until the client exits, quits, or disconnects.
    async fn room_loop(&mut self, room: &Arc<Room>) -> RoomOutcome {
        if let Err(e) = self.enter_room(room).await {
            debug!("Could not greet {}: {}", self.conn.identity(), e);
            return RoomOutcome::Disconnect;
        }

        loop {
            let line = match self.conn.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return RoomOutcome::Disconnect,
                Err(e) => {
                    debug!("Read error from {}: {}", self.conn.identity(), e);
                    return RoomOutcome::Disconnect;
                }
            };
            let cmd = line.trim();

            if cmd == CMD_QUIT {
                let _ = self.conn.write_line("Disconnecting from chat...").await;
                return RoomOutcome::Quit;
            }
            if cmd == CMD_EXIT {
                let _ = self.conn.write_line("\nLeaving room...").await;
                return RoomOutcome::Exit;
            }
            if cmd.is_empty() {
                continue;
            }

            room.broadcast_user_message(&self.name, &line).await;

            if room.keeps_history {
                if let Err(e) = self.history.append(room.id, &self.name, cmd) {
                    error!("Failed to save message to history: {}", e);
                }
            }
        }
    }

    /// Welcome banner, command help, and the history replay for the
    /// history-bearing room.
    async fn enter_room(&self, room: &Arc<Room>) -> Result<()> {
        self.conn
            .write_line(&format!("\nWelcome to {}, {}!", room.name, self.name))
            .await?;
        self.conn
            .write_line("Type /exit to leave room, /quit to disconnect.")
            .await?;
        if room.keeps_history {
            self.replay_history(room).await?;
        }
        Ok(())
    }

    /// Show the most recent persisted lines, oldest first. History is
    /// advisory: a storage failure is logged and the session moves on.
    async fn replay_history(&self, room: &Arc<Room>) -> Result<()> {
        let entries = match self.history.recent(room.id, self.config.history_replay) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to load history for room {}: {}", room.id, e);
                return Ok(());
            }
        };
        if entries.is_empty() {
            return Ok(());
        }

        self.conn
            .write_line(&format!("\nLast {} messages:", self.config.history_replay))
            .await?;
        for entry in entries.iter().rev() {
            self.conn
                .write_line(&format!(
                    "  [{}] {}: {}",
                    entry.timestamp, entry.author, entry.text
                ))
                .await?;
        }
        self.conn.write_line("").await?;
        Ok(())
    }
}
