//! Quiz library store backed by JSON files on disk.
//!
//! A quiz id maps to `<dir>/<id>.json`. Definitions are sanitized on the
//! way in, so everything handed to the session runtime is well formed.

use std::io;
use std::path::PathBuf;

use log::debug;

use shared::{Quiz, QuizError};

pub struct QuizStore {
    dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("quiz id contains unexpected characters")]
    InvalidId,
    #[error("quiz {0:?} not found")]
    NotFound(String),
    #[error("failed to read quiz: {0}")]
    Io(#[from] io::Error),
    #[error("quiz is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] QuizError),
}

impl QuizStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Loads and sanitizes the quiz stored under `id`.
    pub async fn load(&self, id: &str) -> Result<Quiz, StoreError> {
        // Ids are plain file stems; anything else risks path traversal.
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StoreError::InvalidId);
        }

        let path = self.dir.join(format!("{id}.json"));
        debug!("loading quiz from {}", path.display());
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_owned()))
            }
            Err(err) => return Err(err.into()),
        };
        let quiz: Quiz = serde_json::from_slice(&bytes)?;
        Ok(quiz.sanitize()?)
    }
}
