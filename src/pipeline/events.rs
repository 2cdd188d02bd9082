//! Pipeline events, fanned out over a broadcast channel.
//!
//! Events carry submission ids only. Author identity never leaves the
//! store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::signals::RetractReason;
use crate::submission::{ChannelRef, SubmissionState};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A new submission entered moderation.
    Submitted { submission_id: Uuid },
    /// Moderators reached quorum.
    Decided {
        submission_id: Uuid,
        state: SubmissionState,
        /// Submissions still waiting for moderation.
        pending_remaining: usize,
        /// Rejection reason for the author's autoreply.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Published {
        submission_id: Uuid,
        channel_ref: ChannelRef,
        published_at: DateTime<Utc>,
    },
    Retracted {
        submission_id: Uuid,
        reason: RetractReason,
    },
    Stabilized { submission_id: Uuid },
    /// Operator override before release.
    Cancelled { submission_id: Uuid },
    /// Publish retries ran out. The submission stays approved and was
    /// moved to the back of the queue.
    PublishAlert {
        submission_id: Uuid,
        error: String,
        requeued_release_at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn submission_id(&self) -> Uuid {
        match self {
            Self::Submitted { submission_id }
            | Self::Decided { submission_id, .. }
            | Self::Published { submission_id, .. }
            | Self::Retracted { submission_id, .. }
            | Self::Stabilized { submission_id }
            | Self::Cancelled { submission_id }
            | Self::PublishAlert { submission_id, .. } => *submission_id,
        }
    }
}
