use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{CoordinatorError, Result};
use crate::room::{RoomRegistry, RoomStatus};

/// Ephemeral membership record, alive only while the connection is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub connection_id: String,
    pub display_name: String,
    pub room_code: String,
    pub joined_at: u64,
}

/// Port for the membership store shared across coordinator instances.
///
/// The shipped backend is in-process; a networked key/value store slots in
/// behind this trait without the tracker changing.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Records the entry and returns the stored one. A connection that is
    /// already a member of the room keeps its original entry (idempotent
    /// join, keyed by connection id).
    async fn insert(&self, entry: PresenceEntry) -> Result<PresenceEntry>;

    /// Removes one membership. `None` if it was already absent.
    async fn remove(&self, room_code: &str, connection_id: &str) -> Result<Option<PresenceEntry>>;

    /// Removes the connection from every room it is a member of.
    async fn remove_connection(&self, connection_id: &str) -> Result<Vec<PresenceEntry>>;

    /// All members of a room, ordered by joined_at ascending.
    async fn list(&self, room_code: &str) -> Result<Vec<PresenceEntry>>;

    /// Drops every membership for the room, returning the evicted entries.
    async fn clear_room(&self, room_code: &str) -> Result<Vec<PresenceEntry>>;
}

/// In-process store: room code -> connection id -> entry.
pub struct MemoryPresenceStore {
    rooms: RwLock<HashMap<String, HashMap<String, PresenceEntry>>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn insert(&self, entry: PresenceEntry) -> Result<PresenceEntry> {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(entry.room_code.clone()).or_default();
        if let Some(existing) = members.get(&entry.connection_id) {
            return Ok(existing.clone());
        }
        members.insert(entry.connection_id.clone(), entry.clone());
        Ok(entry)
    }

    async fn remove(&self, room_code: &str, connection_id: &str) -> Result<Option<PresenceEntry>> {
        let mut rooms = self.rooms.write().await;
        let removed = rooms
            .get_mut(room_code)
            .and_then(|members| members.remove(connection_id));
        if let Some(members) = rooms.get(room_code) {
            if members.is_empty() {
                rooms.remove(room_code);
            }
        }
        Ok(removed)
    }

    async fn remove_connection(&self, connection_id: &str) -> Result<Vec<PresenceEntry>> {
        let mut rooms = self.rooms.write().await;
        let mut removed = Vec::new();
        for members in rooms.values_mut() {
            if let Some(entry) = members.remove(connection_id) {
                removed.push(entry);
            }
        }
        rooms.retain(|_, members| !members.is_empty());
        Ok(removed)
    }

    async fn list(&self, room_code: &str) -> Result<Vec<PresenceEntry>> {
        let rooms = self.rooms.read().await;
        let mut members: Vec<PresenceEntry> = rooms
            .get(room_code)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.connection_id.cmp(&b.connection_id))
        });
        Ok(members)
    }

    async fn clear_room(&self, room_code: &str) -> Result<Vec<PresenceEntry>> {
        let mut rooms = self.rooms.write().await;
        Ok(rooms
            .remove(room_code)
            .map(|members| members.into_values().collect())
            .unwrap_or_default())
    }
}

/// Per-room set of connected participants, gated by room liveness.
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    registry: Arc<RoomRegistry>,
    store_timeout: Duration,
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        registry: Arc<RoomRegistry>,
        store_timeout_ms: u64,
    ) -> Self {
        Self {
            store,
            registry,
            store_timeout: Duration::from_millis(store_timeout_ms),
        }
    }

    /// Bounds store latency; a slow or unreachable store surfaces as
    /// `Unavailable` instead of blocking the connection task.
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoordinatorError::unavailable(
                "presence store timed out",
            )),
        }
    }

    /// Joins the room if it is open. Calling twice for the same connection
    /// does not duplicate the entry.
    pub async fn join(
        &self,
        room_code: &str,
        connection_id: &str,
        display_name: &str,
    ) -> Result<PresenceEntry> {
        match self.registry.check_room(room_code).await {
            RoomStatus::NotFound => {
                return Err(CoordinatorError::RoomNotFound(room_code.to_string()))
            }
            RoomStatus::Ended => return Err(CoordinatorError::RoomEnded(room_code.to_string())),
            RoomStatus::Open => {}
        }

        let entry = PresenceEntry {
            connection_id: connection_id.to_string(),
            display_name: display_name.to_string(),
            room_code: room_code.to_string(),
            joined_at: crate::now_millis(),
        };

        // The store is authoritative: a duplicate join keeps the original
        // entry, so the ack and `list_members` never disagree.
        let stored = self.bounded(self.store.insert(entry.clone())).await?;
        if stored == entry {
            tracing::info!(
                room_code = %room_code,
                connection_id = %connection_id,
                display_name = %display_name,
                "Participant joined room"
            );
        } else {
            tracing::debug!(
                room_code = %room_code,
                connection_id = %connection_id,
                "Duplicate join ignored"
            );
        }
        Ok(stored)
    }

    /// No-op if the entry is already gone.
    pub async fn leave(&self, room_code: &str, connection_id: &str) -> Result<Option<PresenceEntry>> {
        let removed = self.bounded(self.store.remove(room_code, connection_id)).await?;
        if removed.is_some() {
            tracing::info!(
                room_code = %room_code,
                connection_id = %connection_id,
                "Participant left room"
            );
        }
        Ok(removed)
    }

    pub async fn list_members(&self, room_code: &str) -> Result<Vec<PresenceEntry>> {
        self.bounded(self.store.list(room_code)).await
    }

    /// Transport-triggered cleanup. Scans every room for the connection id
    /// rather than assuming single membership.
    pub async fn on_disconnect(&self, connection_id: &str) -> Result<Vec<PresenceEntry>> {
        let removed = self.bounded(self.store.remove_connection(connection_id)).await?;
        for entry in &removed {
            tracing::info!(
                room_code = %entry.room_code,
                connection_id = %connection_id,
                "Removed disconnected participant"
            );
        }
        Ok(removed)
    }

    /// Drops all membership for a closing room.
    pub async fn clear_room(&self, room_code: &str) -> Result<Vec<PresenceEntry>> {
        self.bounded(self.store.clear_room(room_code)).await
    }
}
