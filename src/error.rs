//! Error types for the relay pipeline.

use std::time::Duration;

use uuid::Uuid;

use crate::submission::{SubmissionState, UserId};

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] PublishError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures of the external channel-publish collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    #[error("Channel rejected the message ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Channel rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Publish timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response from channel: {0}")]
    InvalidResponse(String),
}

/// Errors surfaced synchronously by pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Submission {id} not found")]
    UnknownSubmission { id: Uuid },

    #[error("Submission {id} is {state}, cannot {operation}")]
    InvalidState {
        id: Uuid,
        state: SubmissionState,
        operation: &'static str,
    },

    #[error("Author already has submission {existing} in flight")]
    DuplicateSubmission { existing: Uuid },

    #[error("Submission {id} has no queued slot")]
    QueueNotFound { id: Uuid },

    #[error("User {moderator} is not a moderator")]
    NotModerator { moderator: UserId },

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl PipelineError {
    pub(crate) fn invalid_state(id: Uuid, state: SubmissionState, operation: &'static str) -> Self {
        Self::InvalidState {
            id,
            state,
            operation,
        }
    }
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
