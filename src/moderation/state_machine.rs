//! Submission lifecycle: submit, moderate, publish, retract, stabilize.
//!
//! Every mutating method assumes the caller holds the submission's
//! critical section (see `pipeline::locks`). The state machine itself only
//! reads the current record, applies one transition and hands the result
//! to the store as a single commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{ModeratorSet, PipelineConfig};
use crate::error::PipelineError;
use crate::moderation::quorum::{QuorumDecision, QuorumEngine};
use crate::scheduler::{PublishScheduler, QueueSlot};
use crate::signals::{CommunitySignalAggregator, RetractReason, SignalVerdict};
use crate::store::{SignalRecord, SlotChange, StoreCommit, SubmissionStore};
use crate::submission::{
    ChannelRef, Content, ModeratorDecision, ModeratorVote, PublicSignal, PublicVote, Report,
    Submission, SubmissionState, UserId,
};

/// Result of a moderator vote.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub submission: Submission,
    pub decision: QuorumDecision,
    /// Queue reservation created when the vote approved the submission.
    pub slot: Option<QueueSlot>,
}

impl VoteOutcome {
    /// Whether this vote moved the submission out of `Pending`.
    pub fn decided(&self) -> bool {
        self.decision != QuorumDecision::Undecided
    }
}

/// Result of a public vote or report.
#[derive(Debug, Clone)]
pub struct SignalOutcome {
    pub submission: Submission,
    /// Set when this signal retracted the submission.
    pub retracted: Option<RetractReason>,
    /// False for a repeated report, which changes nothing.
    pub recorded: bool,
}

pub struct ModerationStateMachine {
    store: Arc<dyn SubmissionStore>,
    scheduler: Arc<PublishScheduler>,
    quorum: QuorumEngine,
    aggregator: CommunitySignalAggregator,
    moderators: ModeratorSet,
}

impl ModerationStateMachine {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        scheduler: Arc<PublishScheduler>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            quorum: QuorumEngine::new(config.quorum),
            aggregator: CommunitySignalAggregator::new(config.signals),
            moderators: config.moderators.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SubmissionStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<PublishScheduler> {
        &self.scheduler
    }

    pub fn is_moderator(&self, user: UserId) -> bool {
        self.moderators.contains(user)
    }

    pub async fn load(&self, id: Uuid) -> Result<Submission, PipelineError> {
        self.store
            .get_submission(id)
            .await?
            .ok_or(PipelineError::UnknownSubmission { id })
    }

    pub async fn current_state(&self, id: Uuid) -> Result<SubmissionState, PipelineError> {
        Ok(self.load(id).await?.state)
    }

    /// Accept a new submission in `Pending`.
    ///
    /// The caller must serialize submits per author, otherwise two racing
    /// submits could both pass the in-flight check.
    pub async fn submit(
        &self,
        author_id: UserId,
        content: Content,
        now: DateTime<Utc>,
    ) -> Result<Submission, PipelineError> {
        content.validate()?;

        if let Some(existing) = self.store.unresolved_for_author(author_id).await? {
            debug!(existing = %existing.id, "Submission refused, author has one in flight");
            return Err(PipelineError::DuplicateSubmission {
                existing: existing.id,
            });
        }

        let submission = Submission::new(author_id, content, now);
        self.store.insert_submission(&submission).await?;

        info!(submission_id = %submission.id, "Submission received");
        Ok(submission)
    }

    /// Record (or replace) a moderator's vote and re-run the quorum.
    ///
    /// `reason` is kept only on rejections. When the quorum rejects, the
    /// most recent reason among the rejecting votes goes on the submission.
    pub async fn cast_moderator_vote(
        &self,
        id: Uuid,
        moderator_id: UserId,
        decision: ModeratorDecision,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, PipelineError> {
        if !self.moderators.contains(moderator_id) {
            debug!(submission_id = %id, "Vote refused, not a moderator");
            return Err(PipelineError::NotModerator {
                moderator: moderator_id,
            });
        }

        let mut submission = self.load(id).await?;
        submission.require(SubmissionState::Pending, "cast moderator vote")?;

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty() && decision == ModeratorDecision::Reject);
        let vote = ModeratorVote {
            submission_id: id,
            moderator_id,
            decision,
            reason,
            cast_at: now,
        };

        // Tally from the latest vote per moderator, this one included.
        let mut votes = self.store.moderator_votes(id).await?;
        votes.retain(|v| v.moderator_id != moderator_id);
        votes.push(vote.clone());
        let (tally, outcome) = self.quorum.evaluate_votes(&votes);

        submission.moderation = tally;
        submission.updated_at = now;
        debug!(
            submission_id = %id,
            approvals = tally.approvals,
            rejections = tally.rejections,
            "Moderator vote recorded"
        );

        let slot = match outcome {
            QuorumDecision::Undecided => {
                let commit = StoreCommit::submission(submission.clone())
                    .with_signal(SignalRecord::ModeratorVote(vote));
                self.store.commit(&commit).await?;
                None
            }
            QuorumDecision::Reject => {
                submission.transition_to(SubmissionState::Rejected, "reject", now)?;
                // Ties go to this vote, which was pushed last.
                submission.rejection_reason = votes
                    .iter()
                    .filter(|v| v.decision == ModeratorDecision::Reject && v.reason.is_some())
                    .max_by_key(|v| v.cast_at)
                    .and_then(|v| v.reason.clone());
                let commit = StoreCommit::submission(submission.clone())
                    .with_signal(SignalRecord::ModeratorVote(vote));
                self.store.commit(&commit).await?;
                None
            }
            QuorumDecision::Approve => {
                submission.transition_to(SubmissionState::Approved, "approve", now)?;
                let base = StoreCommit::submission(submission.clone())
                    .with_signal(SignalRecord::ModeratorVote(vote));
                let store = self.store.clone();
                let slot = self
                    .scheduler
                    .enqueue(id, now, move |slot| async move {
                        store
                            .commit(&base.with_slot(SlotChange::Insert(slot)))
                            .await
                            .map_err(PipelineError::from)
                    })
                    .await?;
                Some(slot)
            }
        };

        Ok(VoteOutcome {
            submission,
            decision: outcome,
            slot,
        })
    }

    /// Approved → Published. Fails with `InvalidState` from any other
    /// state, which is what stops a second publish of the same submission.
    pub async fn mark_published(
        &self,
        id: Uuid,
        channel_ref: ChannelRef,
        now: DateTime<Utc>,
    ) -> Result<Submission, PipelineError> {
        let mut submission = self.load(id).await?;
        submission.transition_to(SubmissionState::Published, "mark published", now)?;
        submission.published_at = Some(now);
        submission.channel_ref = Some(channel_ref);

        let commit = StoreCommit::submission(submission.clone()).with_slot(SlotChange::Remove(id));
        let store = self.store.clone();
        self.scheduler
            .complete(id, now, move || async move {
                store.commit(&commit).await.map_err(PipelineError::from)
            })
            .await?;

        Ok(submission)
    }

    /// Operator override: drop the queue slot and reject, in one commit.
    pub async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> Result<Submission, PipelineError> {
        let mut submission = self.load(id).await?;
        submission.require(SubmissionState::Approved, "cancel")?;
        if !self.scheduler.contains(id).await {
            return Err(PipelineError::QueueNotFound { id });
        }

        submission.transition_to(SubmissionState::Rejected, "cancel", now)?;
        let commit = StoreCommit::submission(submission.clone()).with_slot(SlotChange::Remove(id));
        let store = self.store.clone();
        self.scheduler
            .cancel(id, move |_| async move {
                store.commit(&commit).await.map_err(PipelineError::from)
            })
            .await?;

        Ok(submission)
    }

    /// Apply a community vote or report.
    ///
    /// Only `Published` submissions can be retracted. Signals on `Stable`
    /// or `Retracted` submissions are stored for audit and change nothing
    /// else.
    pub async fn cast_public_signal(
        &self,
        id: Uuid,
        voter_id: UserId,
        signal: PublicSignal,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome, PipelineError> {
        let mut submission = self.load(id).await?;
        if !matches!(
            submission.state,
            SubmissionState::Published | SubmissionState::Stable | SubmissionState::Retracted
        ) {
            debug!(submission_id = %id, state = %submission.state, "Public signal refused");
            return Err(PipelineError::invalid_state(
                id,
                submission.state,
                "cast public signal",
            ));
        }

        let (previous, record) = match signal {
            PublicSignal::Vote(kind) => {
                let previous = self.store.public_vote(id, voter_id).await?.map(|v| v.kind);
                let vote = PublicVote {
                    submission_id: id,
                    voter_id,
                    kind,
                    cast_at: now,
                };
                (previous, SignalRecord::PublicVote(vote))
            }
            PublicSignal::Report => {
                if self.store.has_report(id, voter_id).await? {
                    debug!(submission_id = %id, "Repeated report ignored");
                    return Ok(SignalOutcome {
                        submission,
                        retracted: None,
                        recorded: false,
                    });
                }
                let report = Report {
                    submission_id: id,
                    reporter_id: voter_id,
                    reported_at: now,
                };
                (None, SignalRecord::Report(report))
            }
        };

        let update = self
            .aggregator
            .apply(submission.state, submission.signals, previous, signal);
        submission.signals = update.tally;
        submission.updated_at = now;

        let retracted = match update.verdict {
            SignalVerdict::Retract(reason) => {
                submission.transition_to(SubmissionState::Retracted, "retract", now)?;
                info!(submission_id = %id, ?reason, "Submission retracted by community");
                Some(reason)
            }
            SignalVerdict::Continue => None,
        };

        let commit = StoreCommit::submission(submission.clone()).with_signal(record);
        self.store.commit(&commit).await?;

        Ok(SignalOutcome {
            submission,
            retracted,
            recorded: true,
        })
    }

    /// Published → Stable once the grace period is over.
    pub async fn stabilize(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Submission, PipelineError> {
        let mut submission = self.load(id).await?;
        submission.transition_to(SubmissionState::Stable, "stabilize", now)?;
        self.store
            .commit(&StoreCommit::submission(submission.clone()))
            .await?;
        Ok(submission)
    }

    /// Drop the slot of a submission that can no longer be published.
    pub async fn discard_slot(&self, id: Uuid) -> Result<(), PipelineError> {
        let submission = self.load(id).await?;
        let store = self.store.clone();
        let commit = StoreCommit::submission(submission).with_slot(SlotChange::Remove(id));
        self.scheduler
            .discard(id, move |_| async move {
                store.commit(&commit).await.map_err(PipelineError::from)
            })
            .await?;
        debug!(submission_id = %id, "Stale queue slot discarded");
        Ok(())
    }
}
