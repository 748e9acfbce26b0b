mod engine;
mod session;

pub use engine::QuizEngine;
pub use session::{
    AdvanceOutcome, AnswerRecord, OpenedQuestion, PublicQuestion, QuizQuestion, QuizSession,
    QuizState, ScoreEntry,
};
