//! Session directory: maps 6-digit game codes to running sessions.
//!
//! The directory is the sole owner of session handles. Connections carry
//! only game codes, so nothing dangles once a session is reaped; commands
//! sent to a reaped session are simply dropped.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use rand::Rng;
use tokio::sync::{oneshot, RwLock};

use shared::Quiz;

use crate::session::{self, SessionCommand, SessionHandle};

/// Outcome of the lobby probe backing the REST facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Open,
    AlreadyStarted,
    NotFound,
}

pub struct SessionDirectory {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Allocates a fresh code, spawns a session for `quiz` in lobby and
    /// registers it. The quiz is assumed sanitized.
    pub async fn create(self: &Arc<Self>, quiz: Quiz) -> String {
        let mut sessions = self.sessions.write().await;
        let code = loop {
            let candidate = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let handle = session::spawn(code.clone(), quiz, Arc::clone(self));
        sessions.insert(code.clone(), handle);
        info!("created game {code}");
        code
    }

    pub async fn lookup(&self, code: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(code).cloned()
    }

    /// Asks the session whether it is still accepting players.
    pub async fn probe(&self, code: &str) -> Probe {
        let Some(handle) = self.lookup(code).await else {
            return Probe::NotFound;
        };
        let (reply, answer) = oneshot::channel();
        handle.send(SessionCommand::Probe { reply });
        match answer.await {
            Ok(true) => Probe::Open,
            Ok(false) => Probe::AlreadyStarted,
            // The session went away between lookup and reply.
            Err(_) => Probe::NotFound,
        }
    }

    /// Removes the session unconditionally and stops its task.
    pub async fn reap(&self, code: &str) {
        if let Some(handle) = self.sessions.write().await.remove(code) {
            handle.send(SessionCommand::Shutdown);
            info!("reaped game {code}");
        }
    }
}
