use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{CoordinatorError, Result};
use crate::now_millis;

/// Alphabet for room codes: uppercase base36, as produced by the join links
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LEN: usize = 6;

/// Bounded generate-check-retry before reporting the registry as unavailable
const MAX_CODE_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Waiting,
    Active,
    Ended,
}

/// Outcome of a liveness check, distinguishing "never existed" from "over"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    NotFound,
    Ended,
    Open,
}

#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub code: String,
    pub owner_id: String,
    pub state: RoomState,
    pub created_at: u64,
    pub ended_at: Option<u64>,
}

/// Authoritative set of open room codes and their lifecycle state.
///
/// Ended rooms are retained so their codes keep answering `Ended` instead of
/// `NotFound`; code uniqueness is only enforced against non-ended rooms, so a
/// finished room's code may be handed out again later.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }

    /// Uppercases and validates a client-supplied room code.
    pub fn normalize_code(raw: &str) -> Result<String> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() != CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CoordinatorError::InvalidCode(raw.to_string()));
        }
        Ok(code)
    }

    /// Create a new room owned by `owner_id`, in `Waiting` state.
    ///
    /// Code generation retries on collision under the write lock, so two
    /// concurrent creations can never claim the same code.
    pub async fn create_room(&self, owner_id: &str) -> Result<Room> {
        let mut rooms = self.rooms.write().await;

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = Self::generate_code();
            let taken = rooms
                .get(&code)
                .map(|room| room.state != RoomState::Ended)
                .unwrap_or(false);
            if taken {
                continue;
            }

            let room = Room {
                code: code.clone(),
                owner_id: owner_id.to_string(),
                state: RoomState::Waiting,
                created_at: now_millis(),
                ended_at: None,
            };
            rooms.insert(code.clone(), room.clone());
            tracing::info!(room_code = %code, owner_id = %owner_id, "Room created");
            return Ok(room);
        }

        Err(CoordinatorError::unavailable(
            "could not allocate a unique room code",
        ))
    }

    /// Liveness check used by participants before requesting a token.
    pub async fn check_room(&self, code: &str) -> RoomStatus {
        let rooms = self.rooms.read().await;
        match rooms.get(code) {
            None => RoomStatus::NotFound,
            Some(room) if room.state == RoomState::Ended => RoomStatus::Ended,
            Some(_) => RoomStatus::Open,
        }
    }

    pub async fn get(&self, code: &str) -> Option<Room> {
        let rooms = self.rooms.read().await;
        rooms.get(code).cloned()
    }

    /// Errors unless `requester_id` owns the room.
    pub async fn require_owner(&self, code: &str, requester_id: &str) -> Result<Room> {
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(code)
            .ok_or_else(|| CoordinatorError::RoomNotFound(code.to_string()))?;
        if room.owner_id != requester_id {
            return Err(CoordinatorError::Forbidden(format!(
                "{requester_id} is not the owner of room {code}"
            )));
        }
        Ok(room.clone())
    }

    /// Waiting -> Active transition when the host starts the quiz.
    ///
    /// Exactly one of two racing starts wins; the loser observes the room
    /// already `Active` and gets `StaleState`.
    pub async fn begin_quiz(&self, code: &str, requester_id: &str) -> Result<Room> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| CoordinatorError::RoomNotFound(code.to_string()))?;

        if room.owner_id != requester_id {
            return Err(CoordinatorError::Forbidden(format!(
                "{requester_id} is not the owner of room {code}"
            )));
        }
        match room.state {
            RoomState::Ended => return Err(CoordinatorError::RoomEnded(code.to_string())),
            RoomState::Active => {
                return Err(CoordinatorError::stale(format!(
                    "quiz for room {code} already started"
                )))
            }
            RoomState::Waiting => {}
        }

        room.state = RoomState::Active;
        tracing::info!(room_code = %code, "Room transitioned to Active");
        Ok(room.clone())
    }

    /// Owner-only closure. Closing an already-ended room is treated as
    /// success so host retries are harmless.
    pub async fn close_room(&self, code: &str, requester_id: &str) -> Result<Room> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| CoordinatorError::RoomNotFound(code.to_string()))?;

        if room.owner_id != requester_id {
            return Err(CoordinatorError::Forbidden(format!(
                "{requester_id} is not the owner of room {code}"
            )));
        }

        if room.state != RoomState::Ended {
            room.state = RoomState::Ended;
            room.ended_at = Some(now_millis());
            tracing::info!(room_code = %code, "Room closed");
        }
        Ok(room.clone())
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
