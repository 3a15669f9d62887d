//! Fixed room registry shared by all sessions
//!
//! The registry is built once before the listener accepts connections and is
//! immutable afterwards, so sessions look rooms up concurrently without any
//! locking. Only each room's own membership is synchronized.

use std::collections::HashMap;
use std::sync::Arc;

use super::room::{Room, RoomAccess, RoomId};

/// Immutable mapping from room identifier to room, plus the menu order.
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Arc<Room>>,
    menu_order: Vec<RoomId>,
}

impl RoomRegistry {
    /// Build a registry from a fixed room list, preserving its order for the
    /// menu.
    pub fn new(rooms: Vec<Room>) -> Self {
        let menu_order: Vec<RoomId> = rooms.iter().map(|room| room.id).collect();
        let rooms = rooms
            .into_iter()
            .map(|room| (room.id, Arc::new(room)))
            .collect();
        Self { rooms, menu_order }
    }

    /// The default room set: one open history-bearing room, one
    /// password-gated room, and one private room.
    pub fn builtin() -> Self {
        Self::new(vec![
            Room::new(1, "Common-open room", RoomAccess::Open).with_history(),
            Room::new(2, "Common-lock room", RoomAccess::PasswordGated),
            Room::new(3, "Private room", RoomAccess::Private),
        ])
    }

    /// Get a room by ID
    pub fn get(&self, id: RoomId) -> Option<&Arc<Room>> {
        self.rooms.get(&id)
    }

    /// Resolve a menu choice token to a room
    pub fn by_choice(&self, token: &str) -> Option<&Arc<Room>> {
        token.parse::<RoomId>().ok().and_then(|id| self.get(id))
    }

    /// Rooms in menu order
    pub fn rooms(&self) -> impl Iterator<Item = &Arc<Room>> {
        self.menu_order.iter().filter_map(|id| self.rooms.get(id))
    }

    /// The room selection menu, one choice per line
    pub fn menu(&self) -> String {
        let mut menu = String::from("\nChoose room:");
        for room in self.rooms() {
            menu.push_str(&format!("\n[{}] {}", room.id, room.name));
        }
        menu.push_str("\n[q] Quit chat");
        menu
    }

    /// The re-prompt line shown for an unrecognized menu token
    pub fn invalid_choice_hint(&self) -> String {
        let ids: Vec<String> = self.menu_order.iter().map(|id| id.to_string()).collect();
        format!("Invalid choice. Use {}, or 'q'.", ids.join(", "))
    }

    /// Number of rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether the registry holds no rooms
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
