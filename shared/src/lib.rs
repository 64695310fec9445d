//! # Shared Quiz Library
//!
//! Data model and wire protocol shared by the quiz game server and any
//! client that speaks its WebSocket protocol.
//!
//! ## Core Components
//!
//! ### Quiz Model
//! [`Quiz`] and [`Question`] describe the content a host plays through:
//! prompt, ordered answer choices, the correct choice(s), a per-question
//! time limit and an optional image. [`Quiz::sanitize`] enforces the
//! ingestion bounds so the session runtime can assume well-formed input.
//!
//! ### Wire Protocol
//! [`ClientMessage`] and [`ServerMessage`] define the complete set of JSON
//! text frames exchanged over the duplex channel. Every frame carries a
//! `type` discriminator; field names are camelCase on the wire.
//!
//! ### Protocol Limits
//! Hard bounds on participants, quiz size, answer choices and frame size
//! that both the ingestion path and the session runtime enforce.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Maximum number of participants in a single game.
pub const MAX_PLAYERS: usize = 100;

/// Maximum number of questions in a quiz.
pub const MAX_QUESTIONS: usize = 50;

/// Minimum number of answer choices per question.
pub const MIN_CHOICES: usize = 2;

/// Maximum number of answer choices per question.
pub const MAX_CHOICES: usize = 12;

/// Largest inbound frame the server will decode, in bytes.
pub const MAX_FRAME_BYTES: usize = 4096;

/// Bounds and default for the per-question time limit, in seconds.
pub const MIN_QUESTION_SECS: u64 = 5;
pub const MAX_QUESTION_SECS: u64 = 120;
pub const DEFAULT_QUESTION_SECS: u64 = 20;

/// Maximum display name length after trimming and sanitizing.
pub const MAX_NAME_CHARS: usize = 20;

/// Whether a question accepts one choice or a set of choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    #[default]
    Single,
    Multiple,
}

/// The correct answer of a question: one index for single-choice
/// questions, a set of indices for multi-choice questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Correct {
    One(usize),
    Many(Vec<usize>),
}

impl Correct {
    /// The correct indices as a deduplicated set.
    pub fn indices(&self) -> BTreeSet<usize> {
        match self {
            Correct::One(i) => BTreeSet::from([*i]),
            Correct::Many(v) => v.iter().copied().collect(),
        }
    }
}

/// A player's selection for the current question. Mirrors [`Correct`]:
/// a bare index or an index array, depending on the question kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    One(usize),
    Many(Vec<usize>),
}

impl Selection {
    /// The selected indices as a deduplicated set.
    pub fn indices(&self) -> BTreeSet<usize> {
        match self {
            Selection::One(i) => BTreeSet::from([*i]),
            Selection::Many(v) => v.iter().copied().collect(),
        }
    }
}

/// A single quiz question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Prompt text shown to everyone.
    pub question: String,
    /// Ordered answer choices, `MIN_CHOICES..=MAX_CHOICES` of them.
    pub answers: Vec<String>,
    /// The official correct answer(s).
    pub correct: Correct,
    /// Time limit in seconds. Clamped into
    /// `MIN_QUESTION_SECS..=MAX_QUESTION_SECS` at ingestion.
    #[serde(default = "default_time")]
    pub time: u64,
    #[serde(default)]
    pub question_type: QuestionKind,
    /// Optional image reference displayed with the prompt.
    #[serde(default)]
    pub image: Option<String>,
}

fn default_time() -> u64 {
    DEFAULT_QUESTION_SECS
}

/// An ordered, non-empty sequence of questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub questions: Vec<Question>,
}

/// Rejection reasons for a quiz definition at ingestion time.
#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("quiz has no questions")]
    Empty,
    #[error("quiz has more than {MAX_QUESTIONS} questions")]
    TooManyQuestions,
    #[error("question {0} must have {MIN_CHOICES} to {MAX_CHOICES} choices")]
    ChoiceCount(usize),
    #[error("question {0} marks a choice that does not exist as correct")]
    CorrectOutOfRange(usize),
    #[error("question {0} mixes its kind and the shape of its correct answer")]
    KindMismatch(usize),
}

impl Quiz {
    /// Validates the quiz bounds and clamps each question's time limit.
    ///
    /// The session runtime assumes its quiz went through this, so every
    /// ingestion path must call it.
    pub fn sanitize(mut self) -> Result<Quiz, QuizError> {
        if self.questions.is_empty() {
            return Err(QuizError::Empty);
        }
        if self.questions.len() > MAX_QUESTIONS {
            return Err(QuizError::TooManyQuestions);
        }

        for (i, q) in self.questions.iter_mut().enumerate() {
            if q.answers.len() < MIN_CHOICES || q.answers.len() > MAX_CHOICES {
                return Err(QuizError::ChoiceCount(i));
            }
            match (q.question_type, &q.correct) {
                (QuestionKind::Single, Correct::One(_)) => {}
                (QuestionKind::Multiple, Correct::Many(v)) if !v.is_empty() => {}
                _ => return Err(QuizError::KindMismatch(i)),
            }
            if q.correct.indices().iter().any(|&c| c >= q.answers.len()) {
                return Err(QuizError::CorrectOutOfRange(i));
            }
            q.time = q.time.clamp(MIN_QUESTION_SECS, MAX_QUESTION_SECS);
        }
        Ok(self)
    }
}

/// One row of the ranked leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub name: String,
    pub score: u32,
}

/// Frames recognized from clients. Every frame carries the 6-digit game
/// pin; join frames must be the first message on a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    HostJoin {
        pin: String,
    },
    PlayerJoin {
        pin: String,
        name: String,
    },
    StartGame {
        pin: String,
    },
    NextQuestion {
        pin: String,
    },
    EndGame {
        pin: String,
    },
    Answer {
        pin: String,
        answer: Selection,
        /// Marks a multi-choice submission as final. Single-choice
        /// answers are final on receipt regardless of this flag.
        #[serde(default, rename = "final")]
        is_final: bool,
    },
}

impl ClientMessage {
    /// The game pin carried by every client frame.
    pub fn pin(&self) -> &str {
        match self {
            ClientMessage::HostJoin { pin }
            | ClientMessage::PlayerJoin { pin, .. }
            | ClientMessage::StartGame { pin }
            | ClientMessage::NextQuestion { pin }
            | ClientMessage::EndGame { pin }
            | ClientMessage::Answer { pin, .. } => pin,
        }
    }
}

/// Frames emitted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Generic user-visible error.
    Error { message: String },
    /// Ack to a successful `host_join`.
    HostJoined { pin: String },
    /// Ack to a successful `player_join`.
    #[serde(rename_all = "camelCase")]
    Joined { player_id: String, name: String },
    /// To the host: a player entered the lobby. `count` is the number of
    /// currently connected players.
    PlayerJoined { name: String, count: usize },
    /// To the host: a player's connection closed.
    PlayerLeft { count: usize },
    /// To all players: the host's connection closed.
    HostLeft,
    /// A new question is live. The host variant carries `correct`;
    /// players never see it before the reveal.
    #[serde(rename_all = "camelCase")]
    Question {
        index: usize,
        total: usize,
        question: String,
        answers: Vec<String>,
        time: u64,
        question_type: QuestionKind,
        image: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        correct: Option<Correct>,
    },
    /// Private ack to the submitting player.
    AnswerReceived { correct: bool, points: u32 },
    /// To the host: submission progress for the current question.
    AnswerCount { count: usize, total: usize },
    /// The reveal. The host variant additionally carries per-choice
    /// submission counts, sized to the question's choice list.
    #[serde(rename_all = "camelCase")]
    QuestionResult {
        correct: Correct,
        leaderboard: Vec<LeaderboardEntry>,
        question_type: QuestionKind,
        is_last: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        answer_counts: Option<Vec<usize>>,
    },
    /// Final standings; the session is over.
    GameOver { leaderboard: Vec<LeaderboardEntry> },
}
