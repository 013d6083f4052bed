//! Failure taxonomy shared by the gateway, the store and the jobs.

use thiserror::Error;

use super::model::GameRef;

/// Outcome classes reported by external sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source confirms the entity does not (or no longer) exist. Never retried.
    #[error("{game} is not available upstream: {reason}")]
    PermanentNotFound { game: GameRef, reason: String },

    /// Network, parse or shape failure. The current batch or page loop stops.
    #[error("{source_name} unavailable: {reason}")]
    Transient {
        source_name: &'static str,
        reason: String,
    },
}

impl SourceError {
    pub fn not_found(game: GameRef, reason: impl Into<String>) -> Self {
        SourceError::PermanentNotFound {
            game,
            reason: reason.into(),
        }
    }

    pub fn transient(source_name: &'static str, reason: impl Into<String>) -> Self {
        SourceError::Transient {
            source_name,
            reason: reason.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, SourceError::PermanentNotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint is not valid json: {0}")]
    Format(#[from] serde_json::Error),
}

/// Errors that end a job run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_and_transient_are_distinct() {
        let gone = SourceError::not_found(GameRef::app(10), "success=false");
        assert!(gone.is_permanent());
        assert_eq!(gone.to_string(), "app 10 is not available upstream: success=false");

        let down = SourceError::transient("steam", "HTTP 503");
        assert!(!down.is_permanent());
        assert_eq!(down.to_string(), "steam unavailable: HTTP 503");
    }
}
