use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use crate::api::protocol::ServerEvent;
use crate::error::Result;

/// Fan-out of room-scoped events to every connection joined to the room.
///
/// Delivery is at-least-once over each connection's outbound channel; a
/// subscriber whose receiver is gone is pruned, never panicked on. Once a
/// room is evicted its entry is removed, so stale publishes deliver to
/// nobody.
pub struct RoomChannels {
    rooms: RwLock<HashMap<String, HashMap<String, mpsc::UnboundedSender<Message>>>>,
}

impl RoomChannels {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(
        &self,
        room_code: &str,
        connection_id: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_code.to_string())
            .or_default()
            .insert(connection_id.to_string(), sender);
    }

    pub async fn unsubscribe(&self, room_code: &str, connection_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room_code) {
            members.remove(connection_id);
            if members.is_empty() {
                rooms.remove(room_code);
            }
        }
    }

    /// Drops the connection's subscription in every room.
    pub async fn unsubscribe_connection(&self, connection_id: &str) {
        let mut rooms = self.rooms.write().await;
        for members in rooms.values_mut() {
            members.remove(connection_id);
        }
        rooms.retain(|_, members| !members.is_empty());
    }

    /// Delivers the event to every current member. Returns how many
    /// connections it reached.
    pub async fn publish(&self, room_code: &str, event: &ServerEvent) -> Result<usize> {
        self.publish_filtered(room_code, event, None).await
    }

    /// Like `publish`, but skips one connection. Used for membership
    /// announcements, which the triggering connection learns about from its
    /// own ack instead.
    pub async fn publish_except(
        &self,
        room_code: &str,
        except_connection_id: &str,
        event: &ServerEvent,
    ) -> Result<usize> {
        self.publish_filtered(room_code, event, Some(except_connection_id))
            .await
    }

    async fn publish_filtered(
        &self,
        room_code: &str,
        event: &ServerEvent,
        except: Option<&str>,
    ) -> Result<usize> {
        let text = serde_json::to_string(event)?;

        let mut rooms = self.rooms.write().await;
        let members = match rooms.get_mut(room_code) {
            Some(members) => members,
            None => return Ok(0),
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (connection_id, sender) in members.iter() {
            if except == Some(connection_id.as_str()) {
                continue;
            }
            if sender.send(Message::text(text.clone())).is_ok() {
                delivered += 1;
            } else {
                dead.push(connection_id.clone());
            }
        }
        for connection_id in dead {
            tracing::debug!(
                room_code = %room_code,
                connection_id = %connection_id,
                "Pruning dead subscriber"
            );
            members.remove(&connection_id);
        }

        Ok(delivered)
    }

    /// Delivers a terminal event to all members, then forgets the room.
    /// Nothing is delivered for this room code afterwards.
    pub async fn evict_room(&self, room_code: &str, final_event: &ServerEvent) -> Result<usize> {
        let text = serde_json::to_string(final_event)?;

        let mut rooms = self.rooms.write().await;
        let members = match rooms.remove(room_code) {
            Some(members) => members,
            None => return Ok(0),
        };

        let mut delivered = 0;
        for sender in members.values() {
            if sender.send(Message::text(text.clone())).is_ok() {
                delivered += 1;
            }
        }
        tracing::info!(
            room_code = %room_code,
            delivered = delivered,
            "Room evicted from broadcast channel"
        );
        Ok(delivered)
    }

    pub async fn member_count(&self, room_code: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_code).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for RoomChannels {
    fn default() -> Self {
        Self::new()
    }
}
