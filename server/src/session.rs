//! Per-game session runtime.
//!
//! Each session runs as one tokio task that consumes [`SessionCommand`]s
//! from a single queue. Inbound client messages, timer firings, connection
//! closures and directory probes all enter through that queue, so every
//! handler observes and mutates session state serialized, while separate
//! sessions proceed in parallel.
//!
//! Timers are small spawned tasks that sleep and then push a command back
//! into the queue. Every state transition cancels the pending timers and
//! every timer-driven handler re-checks the phase and question index it
//! was armed for, which makes the reveal idempotent when a timer and a
//! client message race.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use shared::{
    Correct, LeaderboardEntry, Quiz, QuestionKind, Selection, ServerMessage, MAX_NAME_CHARS,
    MAX_PLAYERS,
};

use crate::directory::SessionDirectory;
use crate::scoring;

/// Delay between the last live participant answering and the reveal.
const REVEAL_DELAY: Duration = Duration::from_secs(1);

/// Delay before a revealed question auto-advances.
const ADVANCE_DELAY: Duration = Duration::from_secs(5);

/// How long a finished game stays resolvable before it is reaped.
pub const REAP_DELAY: Duration = Duration::from_secs(600);

/// Write handle of one client connection. Frames pushed here are pumped
/// into the WebSocket by the connection's writer task; pushing to a dead
/// connection fails silently, which is exactly the fan-out contract.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub id: u64,
    pub tx: mpsc::UnboundedSender<Message>,
}

impl ConnHandle {
    pub fn send(&self, msg: &ServerMessage) {
        if let Ok(payload) = serde_json::to_string(msg) {
            let _ = self.tx.send(Message::Text(payload));
        }
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Everything that can happen to a session.
#[derive(Debug)]
pub enum SessionCommand {
    HostJoin { conn: ConnHandle },
    PlayerJoin { conn: ConnHandle, name: String },
    StartGame { conn_id: u64 },
    NextQuestion { conn_id: u64 },
    EndGame { conn_id: u64 },
    Answer { conn_id: u64, selection: Selection, is_final: bool },
    ConnectionClosed { conn_id: u64 },
    /// The question deadline elapsed.
    QuestionDeadline { index: usize },
    /// The short grace period after everyone answered elapsed.
    RevealDue { index: usize },
    /// The post-reveal pause elapsed.
    AdvanceDue { index: usize },
    /// Directory probe; replies whether the session is still in lobby.
    Probe { reply: oneshot::Sender<bool> },
    Shutdown,
}

/// Cheap cloneable address of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub code: String,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Queues a command; a reaped session drops it on the floor.
    pub fn send(&self, cmd: SessionCommand) {
        let _ = self.cmd_tx.send(cmd);
    }
}

/// Rejection reasons surfaced to clients as `error` frames.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("Game not found")]
    NotFound,
    #[error("Game has already started")]
    AlreadyStarted,
    #[error("Game is full")]
    Full,
    #[error("That name is already taken")]
    DuplicateName,
    #[error("Enter a valid name")]
    InvalidName,
    #[error("Game already has a host")]
    HostTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Lobby,
    Question,
    QuestionResult,
    Final,
}

struct Participant {
    id: String,
    name: String,
    score: u32,
    /// `None` is the tombstone of a closed connection. The entry and its
    /// score stay on the leaderboard.
    conn: Option<ConnHandle>,
}

struct PendingAnswer {
    selection: Selection,
    submitted: bool,
    correct: bool,
    points: u32,
}

struct Session {
    code: String,
    quiz: Quiz,
    host: Option<ConnHandle>,
    participants: Vec<Participant>,
    /// Keyed by participant id; replaced wholesale on every question.
    answers: HashMap<String, PendingAnswer>,
    phase: Phase,
    /// `None` in lobby, otherwise the index of the current question.
    current: Option<usize>,
    question_started: Option<Instant>,
    question_timer: Option<JoinHandle<()>>,
    auto_timer: Option<JoinHandle<()>>,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

/// Spawns the session task and returns its handle.
pub fn spawn(code: String, quiz: Quiz, directory: Arc<SessionDirectory>) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let session = Session::new(code.clone(), quiz, cmd_tx.clone());
    tokio::spawn(run(session, cmd_rx, directory));
    SessionHandle { code, cmd_tx }
}

async fn run(
    mut session: Session,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    directory: Arc<SessionDirectory>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        if matches!(cmd, SessionCommand::Shutdown) {
            break;
        }
        session.handle(cmd, &directory);
    }
    session.cancel_timers();
    debug!("session {}: task ended", session.code);
}

impl Session {
    fn new(code: String, quiz: Quiz, cmd_tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self {
            code,
            quiz,
            host: None,
            participants: Vec::new(),
            answers: HashMap::new(),
            phase: Phase::Lobby,
            current: None,
            question_started: None,
            question_timer: None,
            auto_timer: None,
            cmd_tx,
        }
    }

    fn handle(&mut self, cmd: SessionCommand, directory: &Arc<SessionDirectory>) {
        match cmd {
            SessionCommand::HostJoin { conn } => self.host_join(conn),
            SessionCommand::PlayerJoin { conn, name } => self.player_join(conn, name),
            SessionCommand::StartGame { conn_id } => self.start_game(conn_id),
            SessionCommand::NextQuestion { conn_id } => self.host_next_question(conn_id, directory),
            SessionCommand::EndGame { conn_id } => self.end_game(conn_id, directory),
            SessionCommand::Answer { conn_id, selection, is_final } => {
                self.answer(conn_id, selection, is_final)
            }
            SessionCommand::ConnectionClosed { conn_id } => self.connection_closed(conn_id),
            SessionCommand::QuestionDeadline { index } | SessionCommand::RevealDue { index } => {
                self.reveal(index)
            }
            SessionCommand::AdvanceDue { index } => self.advance(index, directory),
            SessionCommand::Probe { reply } => {
                let _ = reply.send(self.phase == Phase::Lobby);
            }
            SessionCommand::Shutdown => {}
        }
    }

    // ---- joins ----------------------------------------------------------

    fn host_join(&mut self, conn: ConnHandle) {
        // A connection that already has a role keeps it.
        if self.host.as_ref().map_or(false, |h| h.id == conn.id)
            || self.participant_by_conn(conn.id).is_some()
        {
            return;
        }
        if self.host.as_ref().map_or(false, ConnHandle::is_open) {
            conn.send(&ServerMessage::Error {
                message: JoinError::HostTaken.to_string(),
            });
            return;
        }
        info!("session {}: host joined", self.code);
        conn.send(&ServerMessage::HostJoined {
            pin: self.code.clone(),
        });
        self.host = Some(conn);
    }

    fn player_join(&mut self, conn: ConnHandle, name: String) {
        // A connection that already has a role keeps it.
        if self.participant_by_conn(conn.id).is_some() || self.is_host(conn.id) {
            return;
        }
        if let Err(err) = self.try_player_join(&conn, name) {
            conn.send(&ServerMessage::Error {
                message: err.to_string(),
            });
        }
    }

    fn try_player_join(&mut self, conn: &ConnHandle, name: String) -> Result<(), JoinError> {
        if self.phase != Phase::Lobby {
            return Err(JoinError::AlreadyStarted);
        }
        if self.participants.len() >= MAX_PLAYERS {
            return Err(JoinError::Full);
        }
        let name = sanitize_name(&name).ok_or(JoinError::InvalidName)?;
        let lowered = name.to_lowercase();
        if self.participants.iter().any(|p| p.name.to_lowercase() == lowered) {
            return Err(JoinError::DuplicateName);
        }

        let id = Uuid::new_v4().to_string();
        conn.send(&ServerMessage::Joined {
            player_id: id.clone(),
            name: name.clone(),
        });
        self.participants.push(Participant {
            id,
            name: name.clone(),
            score: 0,
            conn: Some(conn.clone()),
        });
        info!("session {}: player {:?} joined", self.code, name);
        self.send_host(&ServerMessage::PlayerJoined {
            name,
            count: self.live_count(),
        });
        Ok(())
    }

    // ---- host progression -----------------------------------------------

    fn start_game(&mut self, conn_id: u64) {
        if !self.is_host(conn_id) || self.phase != Phase::Lobby {
            return;
        }
        if self.participants.is_empty() {
            self.send_host(&ServerMessage::Error {
                message: "Cannot start the game without players".into(),
            });
            return;
        }
        info!("session {}: game started", self.code);
        self.begin_question(0);
    }

    fn host_next_question(&mut self, conn_id: u64, directory: &Arc<SessionDirectory>) {
        if !self.is_host(conn_id) || self.phase != Phase::QuestionResult {
            return;
        }
        if let Some(index) = self.current {
            self.advance(index, directory);
        }
    }

    fn end_game(&mut self, conn_id: u64, directory: &Arc<SessionDirectory>) {
        if !self.is_host(conn_id) || self.phase == Phase::Final {
            return;
        }
        self.finish(directory);
    }

    // ---- state transitions ----------------------------------------------

    fn begin_question(&mut self, index: usize) {
        self.cancel_timers();
        self.answers.clear();
        self.phase = Phase::Question;
        self.current = Some(index);
        self.question_started = Some(Instant::now());

        let question = &self.quiz.questions[index];
        let time = question.time;
        let player_msg = self.question_message(index, None);
        let host_msg = self.question_message(index, Some(question.correct.clone()));
        self.broadcast_players(&player_msg);
        self.send_host(&host_msg);

        self.question_timer = Some(self.arm(
            Duration::from_secs(time),
            SessionCommand::QuestionDeadline { index },
        ));
        debug!("session {}: question {index} live for {time}s", self.code);
    }

    /// The `question -> q_result` transition. A no-op unless the session
    /// is still on question `index`, so a late deadline firing after the
    /// fast-path reveal (or after a host `end_game`) does nothing.
    fn reveal(&mut self, index: usize) {
        if self.phase != Phase::Question || self.current != Some(index) {
            return;
        }
        self.cancel_timers();
        self.phase = Phase::QuestionResult;

        let question = &self.quiz.questions[index];
        let is_last = index + 1 == self.quiz.questions.len();
        let leaderboard = self.leaderboard();
        let counts = self.answer_counts(question.answers.len());

        let player_msg = ServerMessage::QuestionResult {
            correct: question.correct.clone(),
            leaderboard: leaderboard.clone(),
            question_type: question.question_type,
            is_last,
            answer_counts: None,
        };
        let host_msg = ServerMessage::QuestionResult {
            correct: question.correct.clone(),
            leaderboard,
            question_type: question.question_type,
            is_last,
            answer_counts: Some(counts),
        };
        self.broadcast_players(&player_msg);
        self.send_host(&host_msg);

        self.auto_timer = Some(self.arm(ADVANCE_DELAY, SessionCommand::AdvanceDue { index }));
        debug!("session {}: question {index} revealed", self.code);
    }

    /// Leaves `q_result` for the next question, or ends the game after
    /// the last one.
    fn advance(&mut self, index: usize, directory: &Arc<SessionDirectory>) {
        if self.phase != Phase::QuestionResult || self.current != Some(index) {
            return;
        }
        if index + 1 < self.quiz.questions.len() {
            self.begin_question(index + 1);
        } else {
            self.finish(directory);
        }
    }

    fn finish(&mut self, directory: &Arc<SessionDirectory>) {
        self.cancel_timers();
        self.phase = Phase::Final;
        self.current = Some(self.quiz.questions.len().saturating_sub(1));

        let msg = ServerMessage::GameOver {
            leaderboard: self.leaderboard(),
        };
        self.broadcast_players(&msg);
        self.send_host(&msg);
        info!("session {}: game over", self.code);

        let code = self.code.clone();
        let directory = Arc::clone(directory);
        tokio::spawn(async move {
            sleep(REAP_DELAY).await;
            directory.reap(&code).await;
        });
    }

    // ---- answers ---------------------------------------------------------

    fn answer(&mut self, conn_id: u64, selection: Selection, is_final: bool) {
        if self.phase != Phase::Question {
            return;
        }
        let Some(index) = self.current else { return };
        let question = self.quiz.questions[index].clone();

        // A payload whose shape does not match the question kind is
        // malformed and dropped.
        match (question.question_type, &selection) {
            (QuestionKind::Single, Selection::One(_)) => {}
            (QuestionKind::Multiple, Selection::Many(_)) => {}
            _ => return,
        }

        let Some(pos) = self.position_by_conn(conn_id) else { return };
        let pid = self.participants[pos].id.clone();
        if self.answers.get(&pid).map_or(false, |a| a.submitted) {
            return;
        }

        // Multi-choice selections stay provisional until marked final.
        if question.question_type == QuestionKind::Multiple && !is_final {
            self.answers.insert(
                pid,
                PendingAnswer {
                    selection,
                    submitted: false,
                    correct: false,
                    points: 0,
                },
            );
            return;
        }

        let elapsed = self
            .question_started
            .map_or(Duration::ZERO, |started| started.elapsed());
        let scored = scoring::score(&question, &selection, elapsed);
        self.answers.insert(
            pid,
            PendingAnswer {
                selection,
                submitted: true,
                correct: scored.correct,
                points: scored.points,
            },
        );
        self.participants[pos].score += scored.points;

        if let Some(conn) = &self.participants[pos].conn {
            conn.send(&ServerMessage::AnswerReceived {
                correct: scored.correct,
                points: scored.points,
            });
        }
        self.send_host(&ServerMessage::AnswerCount {
            count: self.submitted_live_count(),
            total: self.live_count(),
        });
        self.maybe_fast_reveal(index);
    }

    /// Replaces the question deadline with the short reveal timer once
    /// every live participant has submitted.
    fn maybe_fast_reveal(&mut self, index: usize) {
        if self.phase != Phase::Question || self.current != Some(index) {
            return;
        }
        if self.auto_timer.is_some() {
            return;
        }
        let live = self.live_count();
        if live == 0 || self.submitted_live_count() < live {
            return;
        }
        if let Some(timer) = self.question_timer.take() {
            timer.abort();
        }
        self.auto_timer = Some(self.arm(REVEAL_DELAY, SessionCommand::RevealDue { index }));
        debug!("session {}: everyone answered question {index}", self.code);
    }

    // ---- connection lifecycle -------------------------------------------

    fn connection_closed(&mut self, conn_id: u64) {
        if self.host.as_ref().map_or(false, |h| h.id == conn_id) {
            self.host = None;
            info!("session {}: host left", self.code);
            self.broadcast_players(&ServerMessage::HostLeft);
            return;
        }
        let Some(pos) = self.position_by_conn(conn_id) else { return };
        self.participants[pos].conn = None;
        info!(
            "session {}: player {:?} left",
            self.code, self.participants[pos].name
        );
        self.send_host(&ServerMessage::PlayerLeft {
            count: self.live_count(),
        });
        if self.phase == Phase::Question {
            if let Some(index) = self.current {
                self.maybe_fast_reveal(index);
            }
        }
    }

    // ---- helpers ---------------------------------------------------------

    fn is_host(&self, conn_id: u64) -> bool {
        self.host.as_ref().map_or(false, |h| h.id == conn_id)
    }

    fn position_by_conn(&self, conn_id: u64) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| p.conn.as_ref().map_or(false, |c| c.id == conn_id))
    }

    fn participant_by_conn(&self, conn_id: u64) -> Option<&Participant> {
        self.position_by_conn(conn_id).map(|i| &self.participants[i])
    }

    fn live_count(&self) -> usize {
        self.participants.iter().filter(|p| p.conn.is_some()).count()
    }

    fn submitted_live_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.conn.is_some())
            .filter(|p| self.answers.get(&p.id).map_or(false, |a| a.submitted))
            .count()
    }

    fn question_message(&self, index: usize, correct: Option<Correct>) -> ServerMessage {
        let question = &self.quiz.questions[index];
        ServerMessage::Question {
            index,
            total: self.quiz.questions.len(),
            question: question.question.clone(),
            answers: question.answers.clone(),
            time: question.time,
            question_type: question.question_type,
            image: question.image.clone(),
            correct,
        }
    }

    /// Ranked standings, descending by score with join order breaking ties.
    fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut order: Vec<&Participant> = self.participants.iter().collect();
        order.sort_by(|a, b| b.score.cmp(&a.score));
        order
            .into_iter()
            .enumerate()
            .map(|(i, p)| LeaderboardEntry {
                rank: i + 1,
                name: p.name.clone(),
                score: p.score,
            })
            .collect()
    }

    /// Per-choice submission counts for the current question, sized to its
    /// choice list.
    fn answer_counts(&self, choices: usize) -> Vec<usize> {
        let mut counts = vec![0; choices];
        for answer in self.answers.values().filter(|a| a.submitted) {
            for i in answer.selection.indices() {
                if i < choices {
                    counts[i] += 1;
                }
            }
        }
        counts
    }

    fn arm(&self, delay: Duration, cmd: SessionCommand) -> JoinHandle<()> {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = cmd_tx.send(cmd);
        })
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.question_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.auto_timer.take() {
            timer.abort();
        }
    }

    fn broadcast_players(&self, msg: &ServerMessage) {
        let Ok(payload) = serde_json::to_string(msg) else { return };
        for participant in &self.participants {
            if let Some(conn) = &participant.conn {
                let _ = conn.tx.send(Message::Text(payload.clone()));
            }
        }
    }

    fn send_host(&self, msg: &ServerMessage) {
        if let Some(host) = &self.host {
            host.send(msg);
        }
    }
}

/// Trims the raw name, strips angle brackets and truncates to the display
/// limit. Returns `None` when nothing printable is left.
fn sanitize_name(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    let name: String = cleaned.trim().chars().take(MAX_NAME_CHARS).collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
