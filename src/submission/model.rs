//! Submission lifecycle model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::votes::{ModerationTally, SignalTally};
use crate::error::PipelineError;

/// Chat-platform user id (authors, moderators, public voters).
pub type UserId = i64;

/// Maximum text length accepted by the public channel.
pub const MAX_TEXT_LENGTH: usize = 4096;

/// Maximum caption length for media posts.
pub const MAX_CAPTION_LENGTH: usize = 1024;

/// Lifecycle state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    /// Waiting for moderator quorum.
    Pending,
    /// Approved and holding a queue slot.
    Approved,
    /// Rejected by moderators or withdrawn by an operator.
    Rejected,
    /// Live in the public channel.
    Published,
    /// Survived the grace period after publish.
    Stable,
    /// Removed from the channel by community signal.
    Retracted,
}

impl SubmissionState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: SubmissionState) -> bool {
        use SubmissionState::*;

        matches!(
            (self, target),
            (Pending, Approved) | (Pending, Rejected) |
            // Operator override before release
            (Approved, Rejected) |
            (Approved, Published) |
            (Published, Stable) | (Published, Retracted)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Stable | Self::Retracted)
    }

    /// Pending or approved-but-unpublished.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Published => "published",
            Self::Stable => "stable",
            Self::Retracted => "retracted",
        }
    }
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubmissionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "published" => Ok(Self::Published),
            "stable" => Ok(Self::Stable),
            "retracted" => Ok(Self::Retracted),
            other => Err(format!("unknown submission state: {other}")),
        }
    }
}

/// Kind of media attached to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Audio,
    Voice,
    Sticker,
    Document,
}

/// Opaque content descriptor relayed to the public channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    Media {
        kind: MediaKind,
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Poll {
        question: String,
        options: Vec<String>,
        #[serde(default)]
        allows_multiple_answers: bool,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Check the descriptor against what the public channel accepts.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self {
            Self::Text { text } => {
                if text.trim().is_empty() {
                    return Err(PipelineError::InvalidContent("empty text".into()));
                }
                if text.chars().count() > MAX_TEXT_LENGTH {
                    return Err(PipelineError::InvalidContent(format!(
                        "text longer than {MAX_TEXT_LENGTH} characters"
                    )));
                }
            }
            Self::Media {
                file_id, caption, ..
            } => {
                if file_id.is_empty() {
                    return Err(PipelineError::InvalidContent("missing file id".into()));
                }
                if caption
                    .as_ref()
                    .is_some_and(|c| c.chars().count() > MAX_CAPTION_LENGTH)
                {
                    return Err(PipelineError::InvalidContent(format!(
                        "caption longer than {MAX_CAPTION_LENGTH} characters"
                    )));
                }
            }
            Self::Poll {
                question, options, ..
            } => {
                if question.trim().is_empty() {
                    return Err(PipelineError::InvalidContent("empty poll question".into()));
                }
                if !(2..=10).contains(&options.len()) {
                    return Err(PipelineError::InvalidContent(format!(
                        "poll needs 2 to 10 options, got {}",
                        options.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Reference to a message in the public channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// A community submission.
///
/// `author_id` stays server-side: it is never serialized into events or
/// handed to the publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: Uuid,
    pub author_id: UserId,
    pub content: Content,
    pub state: SubmissionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub moderation: ModerationTally,
    pub signals: SignalTally,
    pub published_at: Option<DateTime<Utc>>,
    pub channel_ref: Option<ChannelRef>,
    /// Moderator-supplied reason, set when the quorum rejects.
    pub rejection_reason: Option<String>,
}

impl Submission {
    /// Create a new pending submission.
    pub fn new(author_id: UserId, content: Content, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id,
            content,
            state: SubmissionState::Pending,
            created_at: now,
            updated_at: now,
            moderation: ModerationTally::default(),
            signals: SignalTally::default(),
            published_at: None,
            channel_ref: None,
            rejection_reason: None,
        }
    }

    /// Move to `target` if the transition table allows it.
    pub fn transition_to(
        &mut self,
        target: SubmissionState,
        operation: &'static str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(target) {
            return Err(PipelineError::invalid_state(self.id, self.state, operation));
        }

        tracing::info!(
            submission_id = %self.id,
            from = %self.state,
            to = %target,
            "Submission transition"
        );

        self.state = target;
        self.updated_at = now;
        Ok(())
    }

    /// Fail with `InvalidState` unless the submission is in `expected`.
    pub fn require(
        &self,
        expected: SubmissionState,
        operation: &'static str,
    ) -> Result<(), PipelineError> {
        if self.state != expected {
            return Err(PipelineError::invalid_state(self.id, self.state, operation));
        }
        Ok(())
    }
}
