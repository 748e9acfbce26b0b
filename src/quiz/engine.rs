use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::{CoordinatorError, Result};

use super::session::{QuizQuestion, QuizSession};

/// Owns every live quiz session, one per room.
///
/// Sessions hand out as `Arc<Mutex<_>>` so callers can hold the room's
/// single sequence point across a mutate-then-broadcast pair; all
/// progression for a room funnels through that mutex.
pub struct QuizEngine {
    sessions: RwLock<HashMap<String, Arc<Mutex<QuizSession>>>>,
}

impl QuizEngine {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the session for a room. A room owns exactly one session at a
    /// time; a second creation loses the race.
    pub async fn create_session(
        &self,
        room_code: &str,
        questions: Vec<QuizQuestion>,
    ) -> Result<Arc<Mutex<QuizSession>>> {
        let session = QuizSession::new(room_code, questions)?;

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(room_code) {
            return Err(CoordinatorError::stale(format!(
                "room {room_code} already has a quiz session"
            )));
        }
        let session = Arc::new(Mutex::new(session));
        sessions.insert(room_code.to_string(), session.clone());
        Ok(session)
    }

    pub async fn session(&self, room_code: &str) -> Result<Arc<Mutex<QuizSession>>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(room_code)
            .cloned()
            .ok_or_else(|| CoordinatorError::RoomNotFound(room_code.to_string()))
    }

    pub async fn get(&self, room_code: &str) -> Option<Arc<Mutex<QuizSession>>> {
        let sessions = self.sessions.read().await;
        sessions.get(room_code).cloned()
    }

    /// Drops the session when its room closes.
    pub async fn remove(&self, room_code: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(room_code).is_some() {
            tracing::debug!(room_code = %room_code, "Quiz session removed");
        }
    }
}

impl Default for QuizEngine {
    fn default() -> Self {
        Self::new()
    }
}
