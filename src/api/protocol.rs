use serde::{Deserialize, Serialize};

use crate::presence::PresenceEntry;
use crate::quiz::{PublicQuestion, QuizQuestion, ScoreEntry};

/// Client -> server messages on the room-scoped WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Present a room token and join its room's presence.
    JoinRoom { token: String },

    LeaveRoom { room_code: String },

    /// Host binds its credential to this connection for control messages.
    OpenRoom { room_code: String, token: String },

    CloseRoom { room_code: String },

    StartQuiz {
        room_code: String,
        questions: Vec<QuizQuestion>,
    },

    Advance {
        room_code: String,
        /// Optional compare-and-advance: only move if still on this index.
        #[serde(default)]
        from_index: Option<usize>,
    },

    SubmitAnswer {
        room_code: String,
        question_id: String,
        selected_option_index: usize,
    },
}

/// Server -> client messages: acks for the requesting connection and
/// room-wide broadcast events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    JoinAck {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        members: Option<Vec<PresenceEntry>>,
    },

    OpenAck {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    SubmitAck {
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    NewParticipant {
        display_name: String,
        joined_at: u64,
    },

    ParticipantLeft {
        connection_id: String,
        display_name: String,
    },

    QuestionOpened {
        index: usize,
        question: PublicQuestion,
        deadline_ms: u64,
    },

    QuizFinished {
        leaderboard: Vec<ScoreEntry>,
    },

    RoomClosed {
        room_code: String,
    },

    Error {
        reason: String,
    },
}

/// Body of `POST /api/room/join`.
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub room_code: String,
    pub display_name: String,
}

/// Response of `POST /api/room/join`: the opaque credential the client
/// attaches to its real-time connection.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinResponse {
    pub room_code: String,
    pub token: String,
}

/// Response of `POST /api/room/create`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room_code: String,
}
