//! `SubmissionStore` trait: the single async interface to persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::scheduler::QueueSlot;
use crate::submission::{ModeratorVote, PublicVote, Report, Submission, SubmissionState, UserId};

/// A signal written together with a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalRecord {
    /// Upsert on (submission, moderator).
    ModeratorVote(ModeratorVote),
    /// Upsert on (submission, voter).
    PublicVote(PublicVote),
    /// Insert; duplicates on (submission, reporter) are ignored.
    Report(Report),
}

/// Queue side effect of a transition.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SlotChange {
    #[default]
    None,
    Insert(QueueSlot),
    Remove(Uuid),
}

/// Everything one operation writes. Applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCommit {
    pub submission: Submission,
    pub signal: Option<SignalRecord>,
    pub slot: SlotChange,
}

impl StoreCommit {
    pub fn submission(submission: Submission) -> Self {
        Self {
            submission,
            signal: None,
            slot: SlotChange::None,
        }
    }

    pub fn with_signal(mut self, signal: SignalRecord) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_slot(mut self, slot: SlotChange) -> Self {
        self.slot = slot;
        self
    }
}

/// Durable record of submissions, votes, reports and queue slots.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a brand-new submission.
    async fn insert_submission(&self, submission: &Submission) -> Result<(), DatabaseError>;

    /// Get a submission by id.
    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, DatabaseError>;

    /// The author's pending or approved-unpublished submission, if any.
    async fn unresolved_for_author(
        &self,
        author_id: UserId,
    ) -> Result<Option<Submission>, DatabaseError>;

    /// All submissions in `state`, oldest first.
    async fn list_by_state(
        &self,
        state: SubmissionState,
    ) -> Result<Vec<Submission>, DatabaseError>;

    /// Latest vote per moderator.
    async fn moderator_votes(&self, id: Uuid) -> Result<Vec<ModeratorVote>, DatabaseError>;

    /// Latest vote per public voter.
    async fn public_votes(&self, id: Uuid) -> Result<Vec<PublicVote>, DatabaseError>;

    /// A single voter's current vote.
    async fn public_vote(
        &self,
        id: Uuid,
        voter_id: UserId,
    ) -> Result<Option<PublicVote>, DatabaseError>;

    /// All reports on a submission.
    async fn reports(&self, id: Uuid) -> Result<Vec<Report>, DatabaseError>;

    /// Whether `reporter_id` already reported the submission.
    async fn has_report(&self, id: Uuid, reporter_id: UserId) -> Result<bool, DatabaseError>;

    /// All queue slots in insertion order.
    async fn queue_slots(&self) -> Result<Vec<QueueSlot>, DatabaseError>;

    /// Overwrite an existing slot (retry bookkeeping).
    async fn save_slot(&self, slot: &QueueSlot) -> Result<(), DatabaseError>;

    /// Most recent publish time across all submissions.
    async fn last_published_at(&self) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    /// Write a transition with its signal and slot change, all or nothing.
    async fn commit(&self, commit: &StoreCommit) -> Result<(), DatabaseError>;
}
