use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};

/// Longest per-question countdown accepted from a host
pub const MAX_TIME_LIMIT_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuizState {
    Waiting,
    Active,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_option_index: usize,
    pub time_limit_seconds: u64,
}

impl QuizQuestion {
    pub fn validate(&self) -> Result<()> {
        if self.options.len() < 2 {
            return Err(CoordinatorError::InvalidQuestions(format!(
                "question {} needs at least two options",
                self.id
            )));
        }
        if self.correct_option_index >= self.options.len() {
            return Err(CoordinatorError::InvalidQuestions(format!(
                "question {} correct index out of range",
                self.id
            )));
        }
        if self.time_limit_seconds == 0 || self.time_limit_seconds > MAX_TIME_LIMIT_SECS {
            return Err(CoordinatorError::InvalidQuestions(format!(
                "question {} time limit must be between 1 and {MAX_TIME_LIMIT_SECS} seconds",
                self.id
            )));
        }
        Ok(())
    }
}

/// The shape of a question as broadcast to participants: no correct index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub time_limit_seconds: u64,
}

impl From<&QuizQuestion> for PublicQuestion {
    fn from(q: &QuizQuestion) -> Self {
        Self {
            id: q.id.clone(),
            prompt: q.prompt.clone(),
            options: q.options.clone(),
            time_limit_seconds: q.time_limit_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerRecord {
    pub participant_id: String,
    pub question_id: String,
    pub selected_option_index: usize,
    pub submitted_at: u64,
    pub is_correct: bool,
}

/// Derived, never independently mutated; recomputed from answer records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub participant_id: String,
    pub correct_count: usize,
    pub total_answered: usize,
}

/// A question freshly opened for answering.
#[derive(Debug, Clone, Serialize)]
pub struct OpenedQuestion {
    pub index: usize,
    pub question: PublicQuestion,
    pub deadline_ms: u64,
    /// Transition counter; the deadline task uses it to detect having been
    /// outraced by a manual advance.
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub enum AdvanceOutcome {
    Opened(OpenedQuestion),
    Finished(Vec<ScoreEntry>),
}

/// Per-room quiz state machine: Waiting -> Active -> Finished, index only
/// ever increasing, deadline set and cleared atomically with each
/// transition. All methods take the server clock as `now_ms`; client clocks
/// are advisory only.
#[derive(Debug)]
pub struct QuizSession {
    pub room_code: String,
    questions: Vec<QuizQuestion>,
    state: QuizState,
    current_index: usize,
    deadline_ms: Option<u64>,
    generation: u64,
    /// Keyed by (participant, question id); first valid submission wins.
    answers: HashMap<(String, String), AnswerRecord>,
    /// Participant -> earliest joined_at, kept across disconnects so
    /// recorded answers keep counting toward the final leaderboard.
    participants: HashMap<String, u64>,
}

impl QuizSession {
    pub fn new(room_code: &str, questions: Vec<QuizQuestion>) -> Result<Self> {
        if questions.is_empty() {
            return Err(CoordinatorError::InvalidQuestions(
                "question set must not be empty".to_string(),
            ));
        }
        for question in &questions {
            question.validate()?;
        }

        Ok(Self {
            room_code: room_code.to_string(),
            questions,
            state: QuizState::Waiting,
            current_index: 0,
            deadline_ms: None,
            generation: 0,
            answers: HashMap::new(),
            participants: HashMap::new(),
        })
    }

    pub fn state(&self) -> QuizState {
        self.state
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Registers a participant for scoring. The earliest join timestamp
    /// wins, so reconnects do not reshuffle leaderboard tie-breaks.
    pub fn enroll(&mut self, participant_id: &str, joined_at: u64) {
        self.participants
            .entry(participant_id.to_string())
            .and_modify(|t| *t = (*t).min(joined_at))
            .or_insert(joined_at);
    }

    fn open_current(&mut self, now_ms: u64) -> OpenedQuestion {
        let question = &self.questions[self.current_index];
        let deadline_ms = now_ms.saturating_add(question.time_limit_seconds.saturating_mul(1000));
        self.deadline_ms = Some(deadline_ms);
        self.generation += 1;

        OpenedQuestion {
            index: self.current_index,
            question: PublicQuestion::from(question),
            deadline_ms,
            generation: self.generation,
        }
    }

    /// Opens the first question. Only valid from `Waiting`.
    pub fn start(&mut self, now_ms: u64) -> Result<OpenedQuestion> {
        if self.state != QuizState::Waiting {
            return Err(CoordinatorError::stale(format!(
                "quiz for room {} already started",
                self.room_code
            )));
        }
        self.state = QuizState::Active;
        self.current_index = 0;
        let opened = self.open_current(now_ms);
        tracing::info!(
            room_code = %self.room_code,
            question_id = %opened.question.id,
            deadline_ms = opened.deadline_ms,
            "Quiz started"
        );
        Ok(opened)
    }

    /// Records an answer against the current question.
    ///
    /// First submission before the deadline wins; later ones are rejected as
    /// duplicates without overwriting. `now_ms` at or past the deadline is
    /// rejected regardless of what the client's countdown showed.
    pub fn submit_answer(
        &mut self,
        participant_id: &str,
        question_id: &str,
        selected_option_index: usize,
        now_ms: u64,
    ) -> Result<AnswerRecord> {
        if self.state != QuizState::Active {
            return Err(CoordinatorError::QuizNotActive(self.room_code.clone()));
        }

        let question = &self.questions[self.current_index];
        if question.id != question_id {
            return Err(CoordinatorError::NotCurrentQuestion {
                got: question_id.to_string(),
                current: question.id.clone(),
            });
        }
        let correct_option_index = question.correct_option_index;

        let deadline = self.deadline_ms.unwrap_or(0);
        if now_ms >= deadline {
            return Err(CoordinatorError::DeadlinePassed);
        }

        let key = (participant_id.to_string(), question_id.to_string());
        if self.answers.contains_key(&key) {
            return Err(CoordinatorError::DuplicateAnswer);
        }

        // Late enrollment: an answer implies presence even if the join
        // event never reached the engine.
        self.enroll(participant_id, now_ms);

        let record = AnswerRecord {
            participant_id: participant_id.to_string(),
            question_id: question_id.to_string(),
            selected_option_index,
            submitted_at: now_ms,
            is_correct: selected_option_index == correct_option_index,
        };
        self.answers.insert(key, record.clone());

        tracing::debug!(
            room_code = %self.room_code,
            participant_id = %participant_id,
            question_id = %question_id,
            is_correct = record.is_correct,
            "Answer recorded"
        );
        Ok(record)
    }

    /// Moves to the next question, or to `Finished` from the last one.
    ///
    /// `expected_index` enables compare-and-advance: a caller that saw index
    /// N only advances if the session is still on N, otherwise it lost the
    /// race and gets `StaleState`.
    pub fn advance(
        &mut self,
        now_ms: u64,
        expected_index: Option<usize>,
    ) -> Result<AdvanceOutcome> {
        if self.state != QuizState::Active {
            return Err(CoordinatorError::stale(format!(
                "quiz for room {} is not active",
                self.room_code
            )));
        }
        if let Some(expected) = expected_index {
            if expected != self.current_index {
                return Err(CoordinatorError::stale(format!(
                    "expected question {expected}, current is {}",
                    self.current_index
                )));
            }
        }

        if self.current_index + 1 >= self.questions.len() {
            self.state = QuizState::Finished;
            self.deadline_ms = None;
            self.generation += 1;
            let leaderboard = self.leaderboard();
            tracing::info!(room_code = %self.room_code, "Quiz finished");
            return Ok(AdvanceOutcome::Finished(leaderboard));
        }

        self.current_index += 1;
        let opened = self.open_current(now_ms);
        tracing::info!(
            room_code = %self.room_code,
            question_index = opened.index,
            question_id = %opened.question.id,
            "Question opened"
        );
        Ok(AdvanceOutcome::Opened(opened))
    }

    /// Timer-path advance: a no-op if any transition happened since the
    /// timer was scheduled, so whichever of host-skip and deadline fires
    /// first wins and the other does nothing.
    pub fn advance_if_generation(
        &mut self,
        generation: u64,
        now_ms: u64,
    ) -> Result<Option<AdvanceOutcome>> {
        if self.state != QuizState::Active || self.generation != generation {
            return Ok(None);
        }
        self.advance(now_ms, None).map(Some)
    }

    /// The currently open question, for members connecting mid-quiz.
    pub fn opened_question(&self) -> Option<OpenedQuestion> {
        if self.state != QuizState::Active {
            return None;
        }
        let deadline_ms = self.deadline_ms?;
        Some(OpenedQuestion {
            index: self.current_index,
            question: PublicQuestion::from(&self.questions[self.current_index]),
            deadline_ms,
            generation: self.generation,
        })
    }

    /// Recomputes every participant's score by folding answer records.
    ///
    /// Ordering is deterministic: correct count descending, then earliest
    /// joined_at, then participant id.
    pub fn leaderboard(&self) -> Vec<ScoreEntry> {
        let mut entries: Vec<ScoreEntry> = self
            .participants
            .keys()
            .map(|participant_id| {
                let mut correct_count = 0;
                let mut total_answered = 0;
                for record in self.answers.values() {
                    if &record.participant_id == participant_id {
                        total_answered += 1;
                        if record.is_correct {
                            correct_count += 1;
                        }
                    }
                }
                ScoreEntry {
                    participant_id: participant_id.clone(),
                    correct_count,
                    total_answered,
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            b.correct_count
                .cmp(&a.correct_count)
                .then_with(|| {
                    let a_joined = self.participants.get(&a.participant_id).copied();
                    let b_joined = self.participants.get(&b.participant_id).copied();
                    a_joined.cmp(&b_joined)
                })
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, correct: usize, limit: u64) -> QuizQuestion {
        QuizQuestion {
            id: id.to_string(),
            prompt: format!("Prompt {id}"),
            options: vec!["A".to_string(), "B".to_string()],
            correct_option_index: correct,
            time_limit_seconds: limit,
        }
    }

    fn two_question_session() -> QuizSession {
        QuizSession::new("ABC123", vec![question("q1", 1, 10), question("q2", 0, 10)]).unwrap()
    }

    #[test]
    fn test_empty_question_set_rejected() {
        let err = QuizSession::new("ABC123", vec![]).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidQuestions(_)));
    }

    #[test]
    fn test_question_validation() {
        let mut q = question("q1", 0, 10);
        q.options = vec!["only one".to_string()];
        assert!(q.validate().is_err());

        let mut q = question("q1", 0, 10);
        q.correct_option_index = 5;
        assert!(q.validate().is_err());

        assert!(question("q1", 1, 10).validate().is_ok());
    }

    #[test]
    fn test_time_limit_bounds() {
        assert!(question("q1", 0, 0).validate().is_err());
        assert!(question("q1", 0, MAX_TIME_LIMIT_SECS + 1).validate().is_err());
        assert!(question("q1", 0, MAX_TIME_LIMIT_SECS).validate().is_ok());

        // An absurd host-supplied limit is rejected up front instead of
        // wrapping the deadline arithmetic after the room went Active
        let err = QuizSession::new("ABC123", vec![question("q1", 0, u64::MAX)]).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidQuestions(_)));
    }

    #[test]
    fn test_start_only_from_waiting() {
        let mut session = two_question_session();
        let opened = session.start(1_000).unwrap();
        assert_eq!(opened.index, 0);
        assert_eq!(opened.deadline_ms, 11_000);
        assert_eq!(session.state(), QuizState::Active);

        let err = session.start(2_000).unwrap_err();
        assert!(matches!(err, CoordinatorError::StaleState(_)));
    }

    #[test]
    fn test_public_question_hides_answer() {
        let mut session = two_question_session();
        let opened = session.start(0).unwrap();
        let json = serde_json::to_value(&opened.question).unwrap();
        assert!(json.get("correct_option_index").is_none());
    }

    #[test]
    fn test_first_submission_wins() {
        let mut session = two_question_session();
        session.start(0).unwrap();

        let record = session.submit_answer("P1", "q1", 1, 2_000).unwrap();
        assert!(record.is_correct);

        let err = session.submit_answer("P1", "q1", 0, 3_000).unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateAnswer));

        // The stored record still reflects the first submission
        let board = session.leaderboard();
        assert_eq!(board[0].correct_count, 1);
        assert_eq!(board[0].total_answered, 1);
    }

    #[test]
    fn test_submission_enrolls_unseen_participant() {
        let mut session = two_question_session();
        session.start(0).unwrap();

        // No prior enroll; the accepted answer implies presence
        let record = session.submit_answer("Ghost", "q1", 1, 2_000).unwrap();
        assert!(record.is_correct);

        let board = session.leaderboard();
        assert_eq!(board[0].participant_id, "Ghost");
        assert_eq!(board[0].correct_count, 1);
    }

    #[test]
    fn test_deadline_is_authoritative() {
        let mut session = two_question_session();
        session.start(0).unwrap();

        // At the deadline exactly: rejected
        let err = session.submit_answer("P1", "q1", 1, 10_000).unwrap_err();
        assert!(matches!(err, CoordinatorError::DeadlinePassed));

        // One millisecond before: accepted
        session.submit_answer("P1", "q1", 1, 9_999).unwrap();
    }

    #[test]
    fn test_answer_for_wrong_question_rejected() {
        let mut session = two_question_session();
        session.start(0).unwrap();

        let err = session.submit_answer("P1", "q2", 0, 1_000).unwrap_err();
        assert!(matches!(err, CoordinatorError::NotCurrentQuestion { .. }));
    }

    #[test]
    fn test_submit_before_start_rejected() {
        let mut session = two_question_session();
        let err = session.submit_answer("P1", "q1", 0, 1_000).unwrap_err();
        assert!(matches!(err, CoordinatorError::QuizNotActive(_)));
    }

    #[test]
    fn test_advance_to_next_and_finish() {
        let mut session = two_question_session();
        session.start(0).unwrap();

        let outcome = session.advance(5_000, None).unwrap();
        match outcome {
            AdvanceOutcome::Opened(opened) => {
                assert_eq!(opened.index, 1);
                assert_eq!(opened.question.id, "q2");
                assert_eq!(opened.deadline_ms, 15_000);
            }
            other => panic!("expected next question, got {other:?}"),
        }

        let outcome = session.advance(16_000, None).unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Finished(_)));
        assert_eq!(session.state(), QuizState::Finished);

        let err = session.advance(17_000, None).unwrap_err();
        assert!(matches!(err, CoordinatorError::StaleState(_)));
    }

    #[test]
    fn test_compare_and_advance() {
        let mut session = two_question_session();
        session.start(0).unwrap();

        let err = session.advance(5_000, Some(1)).unwrap_err();
        assert!(matches!(err, CoordinatorError::StaleState(_)));
        assert_eq!(session.current_index(), 0);

        session.advance(5_000, Some(0)).unwrap();
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn test_timer_advance_is_noop_after_manual_advance() {
        let mut session = two_question_session();
        let opened = session.start(0).unwrap();

        // Host skips ahead before the timer fires
        session.advance(5_000, None).unwrap();

        // Stale timer fires with the old generation: nothing happens
        let outcome = session
            .advance_if_generation(opened.generation, 10_000)
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn test_timer_advance_with_current_generation_wins() {
        let mut session = two_question_session();
        let opened = session.start(0).unwrap();

        let outcome = session
            .advance_if_generation(opened.generation, 10_000)
            .unwrap();
        assert!(matches!(outcome, Some(AdvanceOutcome::Opened(_))));
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn test_scenario_two_participants_two_questions() {
        // Room ABC123, Q1 correct=1, Q2 correct=0, 10s each.
        let mut session = two_question_session();
        session.enroll("P1", 0);
        session.enroll("P2", 1_000);

        session.start(0).unwrap();
        assert!(session.submit_answer("P1", "q1", 1, 2_000).unwrap().is_correct);
        assert!(!session.submit_answer("P2", "q1", 0, 3_000).unwrap().is_correct);

        session.advance(5_000, None).unwrap();
        assert!(session.submit_answer("P1", "q2", 0, 6_000).unwrap().is_correct);
        // P2 never answers Q2

        let outcome = session.advance(16_000, None).unwrap();
        let board = match outcome {
            AdvanceOutcome::Finished(board) => board,
            other => panic!("expected finish, got {other:?}"),
        };

        assert_eq!(board.len(), 2);
        assert_eq!(board[0].participant_id, "P1");
        assert_eq!(board[0].correct_count, 2);
        assert_eq!(board[0].total_answered, 2);
        assert_eq!(board[1].participant_id, "P2");
        assert_eq!(board[1].correct_count, 0);
        assert_eq!(board[1].total_answered, 1);

        // Recomputation is stable
        assert_eq!(session.leaderboard(), board);
    }

    #[test]
    fn test_leaderboard_tie_broken_by_joined_at() {
        let mut session = two_question_session();
        session.enroll("Later", 5_000);
        session.enroll("Earlier", 1_000);

        let board = session.leaderboard();
        assert_eq!(board[0].participant_id, "Earlier");
        assert_eq!(board[1].participant_id, "Later");
    }

    #[test]
    fn test_enroll_keeps_earliest_join() {
        let mut session = two_question_session();
        session.enroll("P1", 5_000);
        session.enroll("P1", 1_000);
        session.enroll("P2", 2_000);

        let board = session.leaderboard();
        assert_eq!(board[0].participant_id, "P1");
    }
}
