use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use warp::ws::Message;

use crate::api::protocol::ServerEvent;
use crate::broadcast::RoomChannels;
use crate::config::Config;
use crate::error::{CoordinatorError, Result};
use crate::now_millis;
use crate::presence::{MemoryPresenceStore, PresenceEntry, PresenceStore, PresenceTracker};
use crate::quiz::{AdvanceOutcome, AnswerRecord, OpenedQuestion, QuizEngine, QuizQuestion, QuizSession, QuizState, ScoreEntry};
use crate::room::{Room, RoomRegistry, RoomStatus};
use crate::token::{HostIdentity, TokenService};

/// Everything a successful `join-room` hands back: the new presence entry,
/// the current member list, and whatever progression state the connection
/// missed by joining late.
#[derive(Debug)]
pub struct JoinOutcome {
    pub entry: PresenceEntry,
    pub members: Vec<PresenceEntry>,
    pub current_question: Option<OpenedQuestion>,
    pub finished_leaderboard: Option<Vec<ScoreEntry>>,
}

/// The shared coordinator service reached by every connection handler.
///
/// Reads go through the component locks concurrently; every mutating quiz
/// operation for a room locks that room's session across the mutation and
/// its broadcast, which is what keeps progression events in one order for
/// all members.
pub struct Coordinator {
    pub registry: Arc<RoomRegistry>,
    pub tracker: PresenceTracker,
    pub tokens: TokenService,
    pub engine: QuizEngine,
    pub channels: RoomChannels,
}

impl Coordinator {
    pub fn new(config: &Config) -> Arc<Self> {
        Self::with_store(config, Arc::new(MemoryPresenceStore::new()))
    }

    pub fn with_store(config: &Config, store: Arc<dyn PresenceStore>) -> Arc<Self> {
        let registry = Arc::new(RoomRegistry::new());
        Arc::new(Self {
            tracker: PresenceTracker::new(store, registry.clone(), config.store.timeout_ms),
            tokens: TokenService::new(&config.token.secret, config.token.ttl_secs),
            engine: QuizEngine::new(),
            channels: RoomChannels::new(),
            registry,
        })
    }

    // --- Room lifecycle -------------------------------------------------

    /// Host-authenticated room creation.
    pub async fn create_room(&self, auth_header: Option<&str>) -> Result<Room> {
        let host = self.tokens.verify_host_token(auth_header)?;
        self.registry.create_room(&host.id).await
    }

    pub async fn check_room(&self, raw_code: &str) -> Result<RoomStatus> {
        let code = RoomRegistry::normalize_code(raw_code)?;
        Ok(self.registry.check_room(&code).await)
    }

    /// Issues a signed room token for an open room.
    pub async fn issue_join_token(&self, raw_code: &str, display_name: &str) -> Result<(String, String)> {
        let code = RoomRegistry::normalize_code(raw_code)?;
        match self.registry.check_room(&code).await {
            RoomStatus::NotFound => return Err(CoordinatorError::RoomNotFound(code)),
            RoomStatus::Ended => return Err(CoordinatorError::RoomEnded(code)),
            RoomStatus::Open => {}
        }
        let token = self.tokens.issue_room_token(&code, display_name)?;
        Ok((code, token))
    }

    /// Closes the room, evicts every member, and drops all per-room state.
    ///
    /// Registry first so new joins already fail, then the terminal
    /// broadcast, then presence and quiz cleanup.
    pub async fn close_room(&self, room_code: &str, requester_id: &str) -> Result<Room> {
        let room = self.registry.close_room(room_code, requester_id).await?;

        self.channels
            .evict_room(
                room_code,
                &ServerEvent::RoomClosed {
                    room_code: room_code.to_string(),
                },
            )
            .await?;
        if let Err(e) = self.tracker.clear_room(room_code).await {
            tracing::warn!(room_code = %room_code, error = %e, "Presence cleanup failed on close");
        }
        self.engine.remove(room_code).await;
        Ok(room)
    }

    // --- Presence -------------------------------------------------------

    /// Token-validated join of the real-time room.
    ///
    /// The token binds identity only; liveness is re-checked against the
    /// registry, so an expired token for a still-open room is fine and a
    /// fresh token for an ended room is not.
    pub async fn join_room(
        &self,
        connection_id: &str,
        token: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<JoinOutcome> {
        let verified = self.tokens.verify_room_token(token)?;
        if verified.expired {
            tracing::debug!(
                room_code = %verified.session.room_code,
                "Expired token presented, re-checking room liveness"
            );
        }
        let session = verified.session;

        let entry = self
            .tracker
            .join(&session.room_code, connection_id, &session.display_name)
            .await?;

        self.channels
            .subscribe(&session.room_code, connection_id, sender)
            .await;

        // Enroll for scoring and capture any progression state the
        // connection needs to catch up on.
        let mut current_question = None;
        let mut finished_leaderboard = None;
        if let Some(quiz) = self.engine.get(&session.room_code).await {
            let mut quiz = quiz.lock().await;
            quiz.enroll(&session.display_name, entry.joined_at);
            match quiz.state() {
                QuizState::Active => current_question = quiz.opened_question(),
                QuizState::Finished => finished_leaderboard = Some(quiz.leaderboard()),
                QuizState::Waiting => {}
            }
        }

        // Everyone already present learns about the newcomer; the newcomer
        // itself gets the member list in its ack.
        self.channels
            .publish_except(
                &session.room_code,
                connection_id,
                &ServerEvent::NewParticipant {
                    display_name: entry.display_name.clone(),
                    joined_at: entry.joined_at,
                },
            )
            .await?;

        let members = self.tracker.list_members(&session.room_code).await?;
        Ok(JoinOutcome {
            entry,
            members,
            current_question,
            finished_leaderboard,
        })
    }

    pub async fn leave_room(&self, room_code: &str, connection_id: &str) -> Result<()> {
        let removed = self.tracker.leave(room_code, connection_id).await?;
        self.channels.unsubscribe(room_code, connection_id).await;
        if let Some(entry) = removed {
            self.channels
                .publish(
                    room_code,
                    &ServerEvent::ParticipantLeft {
                        connection_id: entry.connection_id,
                        display_name: entry.display_name,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Transport-triggered cleanup; best-effort and never raised, there is
    /// no caller waiting on it.
    pub async fn handle_disconnect(&self, connection_id: &str) {
        let removed = match self.tracker.on_disconnect(connection_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Disconnect cleanup failed"
                );
                Vec::new()
            }
        };

        self.channels.unsubscribe_connection(connection_id).await;

        for entry in removed {
            let event = ServerEvent::ParticipantLeft {
                connection_id: entry.connection_id.clone(),
                display_name: entry.display_name.clone(),
            };
            if let Err(e) = self.channels.publish(&entry.room_code, &event).await {
                tracing::warn!(
                    room_code = %entry.room_code,
                    error = %e,
                    "Failed to broadcast departure"
                );
            }
        }
    }

    /// Verifies the host credential and its ownership of the room, so the
    /// connection can carry control messages.
    pub async fn authorize_host(&self, room_code: &str, token: &str) -> Result<(HostIdentity, Room)> {
        let header = format!("Bearer {token}");
        let host = self.tokens.verify_host_token(Some(&header))?;
        let room = self.registry.require_owner(room_code, &host.id).await?;
        Ok((host, room))
    }

    // --- Quiz progression -----------------------------------------------

    /// Owner-only quiz start: transitions the room to Active, opens the
    /// first question, broadcasts it, and arms the deadline timer.
    pub async fn start_quiz(
        self: &Arc<Self>,
        room_code: &str,
        requester_id: &str,
        questions: Vec<QuizQuestion>,
    ) -> Result<OpenedQuestion> {
        self.registry.require_owner(room_code, requester_id).await?;

        // Session creation is the serialization point for racing starts;
        // the loser sees the session already registered.
        let session = self.engine.create_session(room_code, questions).await?;
        if let Err(e) = self.registry.begin_quiz(room_code, requester_id).await {
            self.engine.remove(room_code).await;
            return Err(e);
        }

        let opened = {
            let mut quiz = session.lock().await;
            let opened = quiz.start(now_millis())?;
            self.channels
                .publish(
                    room_code,
                    &ServerEvent::QuestionOpened {
                        index: opened.index,
                        question: opened.question.clone(),
                        deadline_ms: opened.deadline_ms,
                    },
                )
                .await?;
            opened
        };

        self.schedule_deadline(room_code, &session, &opened);
        Ok(opened)
    }

    /// Owner-only advance (host skip). A pending deadline timer for the
    /// previous question becomes a no-op via the generation bump.
    pub async fn advance(
        self: &Arc<Self>,
        room_code: &str,
        requester_id: &str,
        from_index: Option<usize>,
    ) -> Result<AdvanceOutcome> {
        self.registry.require_owner(room_code, requester_id).await?;
        let session = self.engine.session(room_code).await?;

        let outcome = {
            let mut quiz = session.lock().await;
            let outcome = quiz.advance(now_millis(), from_index)?;
            self.publish_outcome(room_code, &outcome).await?;
            outcome
        };

        if let AdvanceOutcome::Opened(ref opened) = outcome {
            self.schedule_deadline(room_code, &session, opened);
        }
        Ok(outcome)
    }

    /// Records an answer against the current question under the server
    /// clock; duplicates and late arrivals are rejected, not overwritten.
    pub async fn submit_answer(
        &self,
        room_code: &str,
        participant_id: &str,
        question_id: &str,
        selected_option_index: usize,
    ) -> Result<AnswerRecord> {
        let session = self.engine.session(room_code).await?;
        let mut quiz = session.lock().await;
        quiz.submit_answer(participant_id, question_id, selected_option_index, now_millis())
    }

    /// Current leaderboard, recomputed from answer records.
    pub async fn leaderboard(&self, room_code: &str) -> Result<Vec<ScoreEntry>> {
        let session = self.engine.session(room_code).await?;
        let quiz = session.lock().await;
        Ok(quiz.leaderboard())
    }

    async fn publish_outcome(&self, room_code: &str, outcome: &AdvanceOutcome) -> Result<()> {
        let event = match outcome {
            AdvanceOutcome::Opened(opened) => ServerEvent::QuestionOpened {
                index: opened.index,
                question: opened.question.clone(),
                deadline_ms: opened.deadline_ms,
            },
            AdvanceOutcome::Finished(leaderboard) => ServerEvent::QuizFinished {
                leaderboard: leaderboard.clone(),
            },
        };
        self.channels.publish(room_code, &event).await?;
        Ok(())
    }

    /// Arms the per-question deadline. The task advances only if no other
    /// transition happened first; a host skip invalidates it by bumping the
    /// session generation, and the captured session handle keeps a timer
    /// from an earlier quiz under a reused room code from touching its
    /// successor.
    fn schedule_deadline(
        self: &Arc<Self>,
        room_code: &str,
        session: &Arc<Mutex<QuizSession>>,
        opened: &OpenedQuestion,
    ) {
        let coordinator = Arc::clone(self);
        let room_code = room_code.to_string();
        let session = Arc::clone(session);
        let generation = opened.generation;
        let wait = Duration::from_millis(opened.deadline_ms.saturating_sub(now_millis()));

        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            coordinator
                .advance_from_timer(&room_code, session, generation)
                .await;
        });
    }

    async fn advance_from_timer(
        self: Arc<Self>,
        room_code: &str,
        session: Arc<Mutex<QuizSession>>,
        generation: u64,
    ) {
        match self.engine.get(room_code).await {
            // Room closed while the timer was pending
            None => return,
            Some(current) => {
                if !Arc::ptr_eq(&current, &session) {
                    tracing::debug!(
                        room_code = %room_code,
                        "Deadline timer belongs to a superseded session, nothing to do"
                    );
                    return;
                }
            }
        }

        let outcome = {
            let mut quiz = session.lock().await;
            match quiz.advance_if_generation(generation, now_millis()) {
                Ok(Some(outcome)) => {
                    if let Err(e) = self.publish_outcome(room_code, &outcome).await {
                        tracing::warn!(
                            room_code = %room_code,
                            error = %e,
                            "Failed to broadcast deadline advance"
                        );
                    }
                    Some(outcome)
                }
                Ok(None) => {
                    tracing::debug!(
                        room_code = %room_code,
                        generation = generation,
                        "Deadline timer outraced, nothing to do"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(room_code = %room_code, error = %e, "Deadline advance failed");
                    None
                }
            }
        };

        if let Some(AdvanceOutcome::Opened(ref opened)) = outcome {
            tracing::info!(
                room_code = %room_code,
                question_index = opened.index,
                "Question deadline reached, advanced"
            );
            self.schedule_deadline(room_code, &session, opened);
        }
    }
}
