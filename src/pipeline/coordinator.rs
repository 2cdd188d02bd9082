//! Pipeline coordinator: the service facade over moderation, scheduling
//! and publishing.
//!
//! Every state-mutating operation on a submission runs inside that
//! submission's critical section, so concurrent votes, signals, cancels and
//! publish marking are applied one at a time in arrival order. The external
//! publish call itself runs outside any lock and is bounded by a timeout.
//!
//! Lock order is always: submission section, then queue, then store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::ChannelPublisher;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PublishError};
use crate::moderation::{ModerationStateMachine, SignalOutcome, VoteOutcome};
use crate::pipeline::events::PipelineEvent;
use crate::pipeline::locks::KeyedLocks;
use crate::scheduler::{Delivery, FailurePlan, PublishScheduler};
use crate::store::SubmissionStore;
use crate::submission::{
    Content, ModeratorDecision, PublicSignal, Submission, SubmissionState, UserId,
};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// What one scheduler tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing was due.
    Idle,
    Published(Submission),
    /// The publish failed and the head will be retried.
    Retry {
        submission_id: Uuid,
        attempt: u32,
        release_at: DateTime<Utc>,
    },
    /// Retries ran out; the submission went to the back of the queue.
    Requeued {
        submission_id: Uuid,
        release_at: DateTime<Utc>,
    },
    /// The head no longer belonged to an approved submission.
    Discarded { submission_id: Uuid },
}

pub struct PipelineCoordinator {
    machine: ModerationStateMachine,
    publisher: Arc<dyn ChannelPublisher>,
    config: PipelineConfig,
    submission_locks: KeyedLocks<Uuid>,
    author_locks: KeyedLocks<UserId>,
    tx: broadcast::Sender<PipelineEvent>,
}

impl PipelineCoordinator {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn SubmissionStore>,
        publisher: Arc<dyn ChannelPublisher>,
    ) -> Arc<Self> {
        let scheduler = Arc::new(PublishScheduler::new(config.scheduler.clone()));
        let machine = ModerationStateMachine::new(store, scheduler, &config);
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            machine,
            publisher,
            config,
            submission_locks: KeyedLocks::new(),
            author_locks: KeyedLocks::new(),
            tx,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<PublishScheduler> {
        self.machine.scheduler()
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Rebuild the publish queue from persisted slots. Call once at startup.
    pub async fn restore(&self) -> Result<usize, PipelineError> {
        let store = self.machine.store();
        let slots = store.queue_slots().await?;
        let last_release = store.last_published_at().await?;
        let count = slots.len();
        self.scheduler().restore(slots, last_release).await;
        Ok(count)
    }

    // ── Transport-facing operations ────────────────────────────────

    pub async fn submit(
        &self,
        author_id: UserId,
        content: Content,
    ) -> Result<Submission, PipelineError> {
        self.submit_at(author_id, content, Utc::now()).await
    }

    pub async fn submit_at(
        &self,
        author_id: UserId,
        content: Content,
        now: DateTime<Utc>,
    ) -> Result<Submission, PipelineError> {
        let _guard = self.author_locks.lock(author_id).await;
        let submission = self.machine.submit(author_id, content, now).await?;
        self.emit(PipelineEvent::Submitted {
            submission_id: submission.id,
        });
        Ok(submission)
    }

    pub async fn cast_moderator_vote(
        &self,
        id: Uuid,
        moderator_id: UserId,
        decision: ModeratorDecision,
    ) -> Result<VoteOutcome, PipelineError> {
        self.cast_moderator_vote_at(id, moderator_id, decision, Utc::now())
            .await
    }

    pub async fn cast_moderator_vote_at(
        &self,
        id: Uuid,
        moderator_id: UserId,
        decision: ModeratorDecision,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, PipelineError> {
        self.vote_at(id, moderator_id, decision, None, now).await
    }

    /// Reject vote with a reason for the author.
    pub async fn reject(
        &self,
        id: Uuid,
        moderator_id: UserId,
        reason: Option<String>,
    ) -> Result<VoteOutcome, PipelineError> {
        self.reject_at(id, moderator_id, reason, Utc::now()).await
    }

    pub async fn reject_at(
        &self,
        id: Uuid,
        moderator_id: UserId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, PipelineError> {
        self.vote_at(id, moderator_id, ModeratorDecision::Reject, reason, now)
            .await
    }

    async fn vote_at(
        &self,
        id: Uuid,
        moderator_id: UserId,
        decision: ModeratorDecision,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, PipelineError> {
        let outcome = {
            let _guard = self.submission_locks.lock(id).await;
            self.machine
                .cast_moderator_vote(id, moderator_id, decision, reason, now)
                .await?
        };

        if outcome.decided() {
            let pending_remaining = self.pending_count().await?;
            info!(
                submission_id = %id,
                state = %outcome.submission.state,
                pending_remaining,
                "Moderation decided"
            );
            self.emit(PipelineEvent::Decided {
                submission_id: id,
                state: outcome.submission.state,
                pending_remaining,
                reason: outcome.submission.rejection_reason.clone(),
            });
        }
        Ok(outcome)
    }

    pub async fn cast_public_signal(
        &self,
        id: Uuid,
        voter_id: UserId,
        signal: PublicSignal,
    ) -> Result<SignalOutcome, PipelineError> {
        self.cast_public_signal_at(id, voter_id, signal, Utc::now())
            .await
    }

    pub async fn cast_public_signal_at(
        &self,
        id: Uuid,
        voter_id: UserId,
        signal: PublicSignal,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome, PipelineError> {
        let outcome = {
            let _guard = self.submission_locks.lock(id).await;
            self.machine
                .cast_public_signal(id, voter_id, signal, now)
                .await?
        };

        if let Some(reason) = outcome.retracted {
            self.emit(PipelineEvent::Retracted {
                submission_id: id,
                reason,
            });
            if let Some(channel_ref) = outcome.submission.channel_ref
                && let Err(e) = self.publisher.withdraw(&channel_ref).await
            {
                warn!(submission_id = %id, error = %e, "Failed to withdraw retracted post");
            }
        }
        Ok(outcome)
    }

    /// Operator override: reject an approved submission before release.
    pub async fn cancel(&self, id: Uuid) -> Result<Submission, PipelineError> {
        self.cancel_at(id, Utc::now()).await
    }

    pub async fn cancel_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Submission, PipelineError> {
        let submission = {
            let _guard = self.submission_locks.lock(id).await;
            self.machine.cancel(id, now).await?
        };
        self.emit(PipelineEvent::Cancelled { submission_id: id });
        Ok(submission)
    }

    pub async fn current_state(&self, id: Uuid) -> Result<SubmissionState, PipelineError> {
        self.machine.current_state(id).await
    }

    pub async fn get_submission(&self, id: Uuid) -> Result<Submission, PipelineError> {
        self.machine.load(id).await
    }

    /// Number of submissions waiting for moderation.
    pub async fn pending_count(&self) -> Result<usize, PipelineError> {
        Ok(self
            .machine
            .store()
            .list_by_state(SubmissionState::Pending)
            .await?
            .len())
    }

    // ── Scheduler driver ───────────────────────────────────────────

    pub async fn tick(&self) -> Result<TickOutcome, PipelineError> {
        self.tick_at(Utc::now()).await
    }

    /// Release the head slot if it is due at `now`.
    ///
    /// A post that went out but could not be recorded is kept on the claim,
    /// and the next tick only retries the record.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome, PipelineError> {
        let Some(slot) = self.scheduler().claim_due(now).await else {
            return Ok(TickOutcome::Idle);
        };
        let id = slot.submission_id;

        if let Some(delivery) = self.scheduler().delivered(id).await {
            debug!(submission_id = %id, "Recording earlier channel post");
            return self.record_publish(delivery).await;
        }

        let submission = match self.machine.load(id).await {
            Ok(submission) => submission,
            Err(e) => {
                self.scheduler().unclaim(id).await;
                return Err(e);
            }
        };

        if submission.state != SubmissionState::Approved {
            warn!(
                submission_id = %id,
                state = %submission.state,
                "Queued submission not approved, dropping slot"
            );
            let _guard = self.submission_locks.lock(id).await;
            if let Err(e) = self.machine.discard_slot(id).await {
                self.scheduler().unclaim(id).await;
                return Err(e);
            }
            return Ok(TickOutcome::Discarded { submission_id: id });
        }

        debug!(submission_id = %id, attempt = slot.attempts + 1, "Publishing");
        let timeout = self.config.scheduler.publish_timeout;
        let publish = self.publisher.publish(&submission.content);
        let result = match tokio::time::timeout(timeout, publish).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout { after: timeout }),
        };

        match result {
            Ok(channel_ref) => {
                let delivery = Delivery {
                    submission_id: id,
                    channel_ref,
                    delivered_at: now,
                };
                self.scheduler().record_delivery(delivery).await;
                self.record_publish(delivery).await
            }
            Err(err) => self.publish_failed(id, now, err).await,
        }
    }

    /// Mark a delivered post as published. On failure the delivery stays
    /// on the slot for the next tick.
    async fn record_publish(&self, delivery: Delivery) -> Result<TickOutcome, PipelineError> {
        let id = delivery.submission_id;
        let _guard = self.submission_locks.lock(id).await;
        match self
            .machine
            .mark_published(id, delivery.channel_ref, delivery.delivered_at)
            .await
        {
            Ok(published) => {
                self.emit(PipelineEvent::Published {
                    submission_id: id,
                    channel_ref: delivery.channel_ref,
                    published_at: delivery.delivered_at,
                });
                Ok(TickOutcome::Published(published))
            }
            Err(e) => {
                error!(
                    submission_id = %id,
                    message_id = delivery.channel_ref.message_id,
                    error = %e,
                    "Posted to channel but failed to record it, will retry the record"
                );
                self.scheduler().unclaim(id).await;
                Err(e)
            }
        }
    }

    async fn publish_failed(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        err: PublishError,
    ) -> Result<TickOutcome, PipelineError> {
        let store = self.machine.store().clone();
        let plan = self
            .scheduler()
            .record_failure(id, now, move |slot| async move {
                store.save_slot(&slot).await.map_err(PipelineError::from)
            })
            .await?;

        match plan {
            Some(FailurePlan::Retry(slot)) => {
                warn!(
                    submission_id = %id,
                    attempt = slot.attempts,
                    retry_at = %slot.release_at,
                    error = %err,
                    "Publish failed, retrying"
                );
                Ok(TickOutcome::Retry {
                    submission_id: id,
                    attempt: slot.attempts,
                    release_at: slot.release_at,
                })
            }
            Some(FailurePlan::Requeue(slot)) => {
                error!(
                    submission_id = %id,
                    retries = self.config.scheduler.max_retries,
                    release_at = %slot.release_at,
                    error = %err,
                    "Publish retries exhausted, submission moved to back of queue"
                );
                self.emit(PipelineEvent::PublishAlert {
                    submission_id: id,
                    error: err.to_string(),
                    requeued_release_at: slot.release_at,
                });
                Ok(TickOutcome::Requeued {
                    submission_id: id,
                    release_at: slot.release_at,
                })
            }
            None => Ok(TickOutcome::Idle),
        }
    }

    /// Move every published submission past its grace period to `Stable`.
    pub async fn stabilize_due(&self) -> Result<usize, PipelineError> {
        self.stabilize_due_at(Utc::now()).await
    }

    pub async fn stabilize_due_at(&self, now: DateTime<Utc>) -> Result<usize, PipelineError> {
        let grace = chrono::Duration::from_std(self.config.stable_after)
            .unwrap_or(chrono::Duration::MAX);
        let published = self
            .machine
            .store()
            .list_by_state(SubmissionState::Published)
            .await?;

        let mut stabilized = 0;
        for submission in published {
            let due = submission
                .published_at
                .and_then(|at| at.checked_add_signed(grace))
                .is_some_and(|due_at| due_at <= now);
            if !due {
                continue;
            }

            let _guard = self.submission_locks.lock(submission.id).await;
            match self.machine.stabilize(submission.id, now).await {
                Ok(_) => {
                    stabilized += 1;
                    self.emit(PipelineEvent::Stabilized {
                        submission_id: submission.id,
                    });
                }
                // Retracted while we were waiting for the section.
                Err(PipelineError::InvalidState { .. }) => {
                    debug!(submission_id = %submission.id, "Skipping stabilize, state changed");
                }
                Err(e) => return Err(e),
            }
        }

        if stabilized > 0 {
            info!(count = stabilized, "Submissions stabilized");
        }
        Ok(stabilized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QuorumConfig, SchedulerConfig};
    use crate::store::InMemoryStore;
    use crate::submission::ChannelRef;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    struct CountingPublisher {
        next: AtomicI64,
    }

    #[async_trait]
    impl ChannelPublisher for CountingPublisher {
        async fn publish(&self, _content: &Content) -> Result<ChannelRef, PublishError> {
            Ok(ChannelRef {
                chat_id: -100,
                message_id: self.next.fetch_add(1, Ordering::SeqCst),
            })
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn coordinator() -> Arc<PipelineCoordinator> {
        let config = PipelineConfig {
            quorum: QuorumConfig {
                approve_threshold: 1,
                reject_threshold: 1,
            },
            scheduler: SchedulerConfig {
                interval: Duration::from_secs(60),
                retry_jitter: Duration::ZERO,
                ..SchedulerConfig::default()
            },
            stable_after: Duration::from_secs(3600),
            ..PipelineConfig::default()
        };
        PipelineCoordinator::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(CountingPublisher {
                next: AtomicI64::new(1),
            }),
        )
    }

    #[tokio::test]
    async fn decided_event_reports_pending_remaining() {
        let c = coordinator();
        let mut rx = c.subscribe();
        let a = c.submit_at(1, Content::text("a"), t(0)).await.unwrap();
        c.submit_at(2, Content::text("b"), t(0)).await.unwrap();

        c.cast_moderator_vote_at(a.id, 10, ModeratorDecision::Reject, t(1))
            .await
            .unwrap();

        let mut decided = None;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::Decided {
                pending_remaining, ..
            } = event
            {
                decided = Some(pending_remaining);
            }
        }
        assert_eq!(decided, Some(1));
    }

    #[tokio::test]
    async fn rejection_reason_reaches_decided_event() {
        let c = coordinator();
        let mut rx = c.subscribe();
        let sub = c.submit_at(1, Content::text("a"), t(0)).await.unwrap();
        let out = c
            .reject_at(sub.id, 10, Some("posted last week".into()), t(1))
            .await
            .unwrap();
        assert_eq!(out.submission.state, SubmissionState::Rejected);

        let mut reason = None;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::Decided { reason: r, .. } = event {
                reason = r;
            }
        }
        assert_eq!(reason.as_deref(), Some("posted last week"));
        assert_eq!(
            c.get_submission(sub.id).await.unwrap().rejection_reason.as_deref(),
            Some("posted last week")
        );
    }

    #[tokio::test]
    async fn tick_idle_before_release() {
        let c = coordinator();
        let sub = c.submit_at(1, Content::text("a"), t(0)).await.unwrap();
        c.cast_moderator_vote_at(sub.id, 10, ModeratorDecision::Approve, t(0))
            .await
            .unwrap();
        assert_eq!(c.tick_at(t(59)).await.unwrap(), TickOutcome::Idle);
        assert!(matches!(
            c.tick_at(t(60)).await.unwrap(),
            TickOutcome::Published(_)
        ));
        assert_eq!(
            c.current_state(sub.id).await.unwrap(),
            SubmissionState::Published
        );
    }

    #[tokio::test]
    async fn stability_sweep_respects_grace_period() {
        let c = coordinator();
        let sub = c.submit_at(1, Content::text("a"), t(0)).await.unwrap();
        c.cast_moderator_vote_at(sub.id, 10, ModeratorDecision::Approve, t(0))
            .await
            .unwrap();
        c.tick_at(t(60)).await.unwrap();

        assert_eq!(c.stabilize_due_at(t(60 + 3599)).await.unwrap(), 0);
        assert_eq!(c.stabilize_due_at(t(60 + 3600)).await.unwrap(), 1);
        assert_eq!(
            c.current_state(sub.id).await.unwrap(),
            SubmissionState::Stable
        );
    }

    #[tokio::test]
    async fn restore_rebuilds_queue() {
        let store: Arc<dyn SubmissionStore> = Arc::new(InMemoryStore::new());
        let publisher = Arc::new(CountingPublisher {
            next: AtomicI64::new(1),
        });
        let config = coordinator().config().clone();
        let c = PipelineCoordinator::new(config, store.clone(), publisher.clone());
        let sub = c.submit_at(1, Content::text("a"), t(0)).await.unwrap();
        c.cast_moderator_vote_at(sub.id, 10, ModeratorDecision::Approve, t(0))
            .await
            .unwrap();

        let restarted = PipelineCoordinator::new(c.config().clone(), store, publisher);
        assert_eq!(restarted.restore().await.unwrap(), 1);
        assert!(restarted.scheduler().contains(sub.id).await);
        assert!(matches!(
            restarted.tick_at(t(60)).await.unwrap(),
            TickOutcome::Published(_)
        ));
    }
}
