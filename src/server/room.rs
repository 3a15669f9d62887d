//! Room membership and broadcast fan-out
//!
//! A room owns its member set and nothing else. The membership lock is held
//! only long enough to copy, insert, or remove entries; delivery always runs
//! against a snapshot, outside the lock, with one task per recipient.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::transport::Connection;

/// Numeric room identifier.
pub type RoomId = u32;

/// Process-unique identity of one connection, used to key membership.
pub type MemberId = String;

/// Access policy for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAccess {
    /// Anyone may join
    Open,
    /// Joining requires the shared room password
    PasswordGated,
    /// Open access; private in name only
    Private,
}

/// A member of a room.
///
/// Created when a join succeeds and dropped when the member leaves or its
/// connection fails. The display name is fixed for the connection's lifetime.
#[derive(Clone)]
pub struct Member {
    /// Connection identity
    pub id: MemberId,
    /// Display name
    pub name: String,
    /// Outbound write handle
    pub conn: Arc<dyn Connection>,
}

/// A chat room: a named, independently synchronized broadcast domain.
///
/// Rooms are created once at startup and never destroyed; membership is the
/// only mutable part. A given identity appears at most once in the set.
pub struct Room {
    /// Room ID
    pub id: RoomId,
    /// Human-readable room name
    pub name: String,
    /// Access policy
    pub access: RoomAccess,
    /// Whether chat lines in this room are persisted and replayed
    pub keeps_history: bool,
    /// Members indexed by connection identity
    members: RwLock<HashMap<MemberId, Member>>,
}

impl Room {
    /// Create a new room
    pub fn new(id: RoomId, name: &str, access: RoomAccess) -> Self {
        Self {
            id,
            name: name.to_string(),
            access,
            keeps_history: false,
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Mark this room as the one whose chat lines are persisted
    pub fn with_history(mut self) -> Self {
        self.keeps_history = true;
        self
    }

    /// Add a member to the room.
    ///
    /// Returns `false` without mutating if a member with the same identity is
    /// already present.
    pub async fn join(&self, member: Member) -> bool {
        let mut members = self.members.write().await;
        if members.contains_key(&member.id) {
            return false;
        }
        members.insert(member.id.clone(), member);
        true
    }

    /// Remove the member with that identity.
    ///
    /// A no-op if the identity is not present, so leaving twice (or leaving
    /// after eviction by a failed broadcast) is safe.
    pub async fn leave(&self, id: &str) -> Option<Member> {
        let mut members = self.members.write().await;
        members.remove(id)
    }

    /// Check if an identity is currently a member
    pub async fn is_member(&self, id: &str) -> bool {
        let members = self.members.read().await;
        members.contains_key(id)
    }

    /// Get member count
    pub async fn member_count(&self) -> usize {
        let members = self.members.read().await;
        members.len()
    }

    /// Point-in-time copy of the member set
    async fn snapshot(&self) -> Vec<Member> {
        let members = self.members.read().await;
        members.values().cloned().collect()
    }

    /// Deliver `"> {sender_name}: {text}"` to every member whose display name
    /// differs from `sender_name`.
    ///
    /// Exclusion is keyed by display name, not identity: a sender never sees
    /// its own echo, and neither does a member who picked the same name.
    pub async fn broadcast_user_message(
        self: &Arc<Self>,
        sender_name: &str,
        text: &str,
    ) -> usize {
        let line = format!("> {}: {}", sender_name, text.trim());
        let recipients: Vec<Member> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|m| m.name != sender_name)
            .collect();
        self.deliver(recipients, line).await
    }

    /// Deliver `"*** {text} ***"` to every current member.
    pub async fn broadcast_system(self: &Arc<Self>, text: &str) -> usize {
        let line = format!("*** {} ***", text.trim());
        let recipients = self.snapshot().await;
        self.deliver(recipients, line).await
    }

    /// Deliver `"*** {text} ***"` to every member except the one with the
    /// given identity (used to suppress self-notification on leave).
    pub async fn broadcast_system_except(
        self: &Arc<Self>,
        exclude_id: &str,
        text: &str,
    ) -> usize {
        let line = format!("*** {} ***", text.trim());
        let recipients: Vec<Member> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|m| m.id != exclude_id)
            .collect();
        self.deliver(recipients, line).await
    }

    /// Attempt delivery to each recipient concurrently and wait for every
    /// attempt to finish. A failed write evicts that member and closes its
    /// transport; delivery to the others proceeds regardless.
    ///
    /// Returns the number of failed deliveries.
    async fn deliver(self: &Arc<Self>, recipients: Vec<Member>, line: String) -> usize {
        let mut attempts = Vec::with_capacity(recipients.len());
        for member in recipients {
            let room = Arc::clone(self);
            let line = line.clone();
            attempts.push(tokio::spawn(async move {
                match member.conn.write_line(&line).await {
                    Ok(()) => false,
                    Err(e) => {
                        warn!("Send error to {}: {}", member.id, e);
                        room.leave(&member.id).await;
                        member.conn.close().await;
                        true
                    }
                }
            }));
        }

        let mut failed = 0;
        for attempt in attempts {
            if matches!(attempt.await, Ok(true)) {
                failed += 1;
            }
        }
        if failed > 0 {
            info!("Evicted {} unreachable member(s) from {}", failed, self.name);
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedConnection;

    fn member(id: &str, name: &str) -> (Member, Arc<ScriptedConnection>) {
        let conn = Arc::new(ScriptedConnection::new(id, &[]));
        let member = Member {
            id: id.to_string(),
            name: name.to_string(),
            conn: Arc::clone(&conn) as Arc<dyn Connection>,
        };
        (member, conn)
    }

    fn failing_member(id: &str, name: &str) -> (Member, Arc<ScriptedConnection>) {
        let conn = Arc::new(ScriptedConnection::failing(id));
        let member = Member {
            id: id.to_string(),
            name: name.to_string(),
            conn: Arc::clone(&conn) as Arc<dyn Connection>,
        };
        (member, conn)
    }

    #[tokio::test]
    async fn test_distinct_joins_all_succeed() {
        let room = Room::new(1, "Test room", RoomAccess::Open);
        for i in 0..5 {
            let (m, _) = member(&format!("peer-{}", i), &format!("user{}", i));
            assert!(room.join(m).await);
        }
        assert_eq!(room.member_count().await, 5);
    }

    #[tokio::test]
    async fn test_duplicate_join_is_rejected() {
        let room = Room::new(1, "Test room", RoomAccess::Open);
        let (first, _) = member("peer-1", "alice");
        let (second, _) = member("peer-1", "alice");

        assert!(room.join(first).await);
        assert!(!room.join(second).await);
        assert_eq!(room.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_leave_absent_identity_is_noop() {
        let room = Room::new(1, "Test room", RoomAccess::Open);
        assert!(room.leave("nobody").await.is_none());

        let (m, _) = member("peer-1", "alice");
        room.join(m).await;
        assert!(room.leave("peer-1").await.is_some());
        assert!(room.leave("peer-1").await.is_none());
        assert_eq!(room.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_user_message_excludes_by_display_name() {
        let room = Arc::new(Room::new(1, "Test room", RoomAccess::Open));
        let (alice, alice_conn) = member("peer-1", "alice");
        let (bob, bob_conn) = member("peer-2", "bob");
        let (alice_twin, twin_conn) = member("peer-3", "alice");
        room.join(alice).await;
        room.join(bob).await;
        room.join(alice_twin).await;

        let failed = room.broadcast_user_message("alice", "  hi all  ").await;
        assert_eq!(failed, 0);

        assert_eq!(bob_conn.written(), vec!["> alice: hi all".to_string()]);
        assert!(alice_conn.written().is_empty());
        assert!(twin_conn.written().is_empty());
    }

    #[tokio::test]
    async fn test_system_message_reaches_everyone() {
        let room = Arc::new(Room::new(1, "Test room", RoomAccess::Open));
        let (alice, alice_conn) = member("peer-1", "alice");
        let (bob, bob_conn) = member("peer-2", "bob");
        room.join(alice).await;
        room.join(bob).await;

        room.broadcast_system("alice has joined the room").await;

        let expected = "*** alice has joined the room ***".to_string();
        assert_eq!(alice_conn.written(), vec![expected.clone()]);
        assert_eq!(bob_conn.written(), vec![expected]);
    }

    #[tokio::test]
    async fn test_system_except_skips_one_identity() {
        let room = Arc::new(Room::new(1, "Test room", RoomAccess::Open));
        let (alice, alice_conn) = member("peer-1", "alice");
        let (bob, bob_conn) = member("peer-2", "bob");
        room.join(alice).await;
        room.join(bob).await;

        room.broadcast_system_except("peer-1", "alice has left the room")
            .await;

        assert!(alice_conn.written().is_empty());
        assert_eq!(
            bob_conn.written(),
            vec!["*** alice has left the room ***".to_string()]
        );
    }

    #[tokio::test]
    async fn test_write_failure_evicts_only_that_member() {
        let room = Arc::new(Room::new(1, "Test room", RoomAccess::Open));
        let (alice, _) = member("peer-1", "alice");
        let (bob, bob_conn) = member("peer-2", "bob");
        let (carol, carol_conn) = failing_member("peer-3", "carol");
        room.join(alice).await;
        room.join(bob).await;
        room.join(carol).await;

        let failed = room.broadcast_user_message("alice", "hello").await;

        assert_eq!(failed, 1);
        assert!(!room.is_member("peer-3").await);
        assert!(carol_conn.is_closed());
        assert_eq!(room.member_count().await, 2);
        assert_eq!(bob_conn.written(), vec!["> alice: hello".to_string()]);
    }

    #[tokio::test]
    async fn test_evicted_member_may_leave_again_safely() {
        let room = Arc::new(Room::new(1, "Test room", RoomAccess::Open));
        let (carol, _) = failing_member("peer-3", "carol");
        room.join(carol).await;

        room.broadcast_system("notice").await;
        assert!(!room.is_member("peer-3").await);

        // The session's own finalizer runs after the eviction.
        assert!(room.leave("peer-3").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_joins_and_leaves_keep_membership_consistent() {
        let room = Arc::new(Room::new(1, "Test room", RoomAccess::Open));

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let room = Arc::clone(&room);
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    let id = format!("peer-{}-{}", worker, i);
                    let conn: Arc<dyn Connection> = Arc::new(ScriptedConnection::new(&id, &[]));
                    let m = Member {
                        id: id.clone(),
                        name: format!("user{}", worker),
                        conn,
                    };
                    assert!(room.join(m).await);
                    // Even-numbered members leave again immediately.
                    if i % 2 == 0 {
                        room.leave(&id).await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.expect("worker");
        }

        // Each worker joined 50 and removed 25.
        assert_eq!(room.member_count().await, 8 * 25);
        for worker in 0..8 {
            for i in 0..50 {
                let id = format!("peer-{}-{}", worker, i);
                assert_eq!(room.is_member(&id).await, i % 2 == 1);
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_joins_admit_exactly_one() {
        let room = Arc::new(Room::new(1, "Test room", RoomAccess::Open));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let room = Arc::clone(&room);
            tasks.push(tokio::spawn(async move {
                let conn: Arc<dyn Connection> = Arc::new(ScriptedConnection::new("peer-1", &[]));
                let m = Member {
                    id: "peer-1".to_string(),
                    name: "alice".to_string(),
                    conn,
                };
                room.join(m).await
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.expect("worker") {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(room.member_count().await, 1);
    }
}
