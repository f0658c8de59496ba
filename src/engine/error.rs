use thiserror::Error;
use ulid::Ulid;

/// The first participant found to be double-booked, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub email: String,
    pub meeting_id: i64,
    /// `None` when the other meeting is an earlier row of the same batch.
    pub doc_id: Option<Ulid>,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} already has meeting {}", self.email, self.meeting_id)?;
        match self.doc_id {
            Some(doc_id) => write!(f, " ({doc_id})"),
            None => write!(f, " (same batch)"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid meeting: {0}")]
    Validation(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("invalid limit {0}: must be a positive integer")]
    InvalidLimit(i64),
    #[error("scheduling conflict: {0}")]
    Conflict(Conflict),
    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    /// True when the caller sent something the engine refuses outright.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::LimitExceeded(_) | EngineError::InvalidLimit(_)
        )
    }
}
