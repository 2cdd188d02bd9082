//! Publish scheduler: the shared queue behind a lock.
//!
//! Every mutation takes a `commit` callback that persists the change while
//! the queue lock is held; memory is only updated once the commit succeeds,
//! so the in-memory queue never runs ahead of the store.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::queue::{Delivery, FailurePlan, PublishQueue, QueueSlot};
use crate::config::SchedulerConfig;
use crate::error::PipelineError;

/// Rate-limited FIFO of approved submissions.
pub struct PublishScheduler {
    config: SchedulerConfig,
    queue: Mutex<PublishQueue>,
}

impl PublishScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(PublishQueue::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Replace the queue with persisted state.
    pub async fn restore(&self, slots: Vec<QueueSlot>, last_release: Option<DateTime<Utc>>) {
        let restored = PublishQueue::restore(slots, last_release);
        info!(slots = restored.len(), "Publish queue restored");
        *self.queue.lock().await = restored;
    }

    /// Append `id` at the tail. `commit` receives the planned slot.
    pub async fn enqueue<F, Fut>(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        commit: F,
    ) -> Result<QueueSlot, PipelineError>
    where
        F: FnOnce(QueueSlot) -> Fut,
        Fut: Future<Output = Result<(), PipelineError>>,
    {
        let mut queue = self.queue.lock().await;
        let slot = queue.plan(id, now, &self.config);
        commit(slot.clone()).await?;
        queue.push(slot.clone());

        info!(
            submission_id = %id,
            release_at = %slot.release_at,
            queued = queue.len(),
            "Submission queued for publish"
        );
        Ok(slot)
    }

    /// Remove a queued-but-unreleased slot.
    pub async fn cancel<F, Fut>(&self, id: Uuid, commit: F) -> Result<QueueSlot, PipelineError>
    where
        F: FnOnce(QueueSlot) -> Fut,
        Fut: Future<Output = Result<(), PipelineError>>,
    {
        let mut queue = self.queue.lock().await;
        if queue.in_flight() == Some(id) || queue.delivered(id).is_some() {
            debug!(submission_id = %id, "Cancel refused, publish in flight");
            return Err(PipelineError::QueueNotFound { id });
        }
        let slot = queue
            .get(id)
            .cloned()
            .ok_or(PipelineError::QueueNotFound { id })?;
        commit(slot).await?;
        let removed = queue.cancel(id)?;

        info!(submission_id = %id, "Queue slot cancelled");
        Ok(removed)
    }

    /// Claim the head slot if it is due at `now`.
    pub async fn claim_due(&self, now: DateTime<Utc>) -> Option<QueueSlot> {
        self.queue.lock().await.claim_due(now, &self.config)
    }

    /// Release a claim without changing the slot.
    pub async fn unclaim(&self, id: Uuid) {
        self.queue.lock().await.unclaim(id);
    }

    /// Drop the claimed slot of a submission that can no longer be
    /// published. Claim and slot go together under one lock.
    pub async fn discard<F, Fut>(&self, id: Uuid, commit: F) -> Result<QueueSlot, PipelineError>
    where
        F: FnOnce(QueueSlot) -> Fut,
        Fut: Future<Output = Result<(), PipelineError>>,
    {
        let mut queue = self.queue.lock().await;
        let slot = queue
            .get(id)
            .cloned()
            .ok_or(PipelineError::QueueNotFound { id })?;
        let committed = commit(slot).await;
        queue.unclaim(id);
        committed?;
        queue.cancel(id)
    }

    /// Unrecorded channel post for `id`, if a previous tick left one.
    pub async fn delivered(&self, id: Uuid) -> Option<Delivery> {
        self.queue.lock().await.delivered(id)
    }

    /// Hold on to a channel post until the publish is recorded.
    pub async fn record_delivery(&self, delivery: Delivery) {
        self.queue.lock().await.record_delivery(delivery);
    }

    /// Drop a released slot after `commit` persisted the publish.
    pub async fn complete<F, Fut>(
        &self,
        id: Uuid,
        released_at: DateTime<Utc>,
        commit: F,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PipelineError>>,
    {
        let mut queue = self.queue.lock().await;
        commit().await?;
        queue.complete(id, released_at);
        Ok(())
    }

    /// Reschedule the head after a failed publish. `persist` stores the
    /// updated slot.
    pub async fn record_failure<F, Fut>(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        persist: F,
    ) -> Result<Option<FailurePlan>, PipelineError>
    where
        F: FnOnce(QueueSlot) -> Fut,
        Fut: Future<Output = Result<(), PipelineError>>,
    {
        let mut queue = self.queue.lock().await;
        let Some(plan) = queue.plan_failure(id, now, self.jitter(), &self.config) else {
            queue.unclaim(id);
            return Ok(None);
        };
        if let Err(e) = persist(plan.slot().clone()).await {
            queue.unclaim(id);
            return Err(e);
        }
        queue.apply_failure(plan.clone());
        Ok(Some(plan))
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.retry_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.queue.lock().await.contains(id)
    }

    /// Copy of the queued slots in release order.
    pub async fn snapshot(&self) -> Vec<QueueSlot> {
        self.queue.lock().await.slots().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn scheduler() -> PublishScheduler {
        PublishScheduler::new(SchedulerConfig {
            interval: Duration::from_secs(60),
            retry_jitter: Duration::ZERO,
            ..SchedulerConfig::default()
        })
    }

    #[tokio::test]
    async fn failed_commit_leaves_queue_untouched() {
        let s = scheduler();
        let id = Uuid::new_v4();
        let result = s
            .enqueue(id, t(0), |_| async {
                Err(PipelineError::Database(crate::error::DatabaseError::Query(
                    "boom".into(),
                )))
            })
            .await;
        assert!(result.is_err());
        assert!(s.is_empty().await);
    }

    #[tokio::test]
    async fn enqueue_then_cancel() {
        let s = scheduler();
        let id = Uuid::new_v4();
        s.enqueue(id, t(0), |_| async { Ok(()) }).await.unwrap();
        assert!(s.contains(id).await);

        s.cancel(id, |_| async { Ok(()) }).await.unwrap();
        assert!(!s.contains(id).await);
        assert!(matches!(
            s.cancel(id, |_| async { Ok(()) }).await,
            Err(PipelineError::QueueNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_claims_yield_one_winner() {
        let s = std::sync::Arc::new(scheduler());
        s.enqueue(Uuid::new_v4(), t(0), |_| async { Ok(()) })
            .await
            .unwrap();

        let claims = futures::future::join_all((0..8).map(|_| {
            let s = s.clone();
            async move { s.claim_due(t(60)).await }
        }))
        .await;
        assert_eq!(claims.iter().filter(|c| c.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn discard_drops_claimed_slot() {
        let s = scheduler();
        let id = Uuid::new_v4();
        s.enqueue(id, t(0), |_| async { Ok(()) }).await.unwrap();
        s.claim_due(t(60)).await.unwrap();

        s.discard(id, |_| async { Ok(()) }).await.unwrap();
        assert!(s.is_empty().await);
        assert!(s.claim_due(t(120)).await.is_none());
    }

    #[tokio::test]
    async fn failed_discard_keeps_slot_claimable() {
        let s = scheduler();
        let id = Uuid::new_v4();
        s.enqueue(id, t(0), |_| async { Ok(()) }).await.unwrap();
        s.claim_due(t(60)).await.unwrap();

        let result = s
            .discard(id, |_| async {
                Err(PipelineError::Database(crate::error::DatabaseError::Query(
                    "boom".into(),
                )))
            })
            .await;
        assert!(result.is_err());
        assert!(s.contains(id).await);
        assert!(s.claim_due(t(60)).await.is_some());
    }

    #[tokio::test]
    async fn failed_persist_releases_claim() {
        let s = scheduler();
        let id = Uuid::new_v4();
        s.enqueue(id, t(0), |_| async { Ok(()) }).await.unwrap();
        s.claim_due(t(60)).await.unwrap();

        let result = s
            .record_failure(id, t(60), |_| async {
                Err(PipelineError::Database(crate::error::DatabaseError::Query(
                    "boom".into(),
                )))
            })
            .await;
        assert!(result.is_err());
        assert!(s.claim_due(t(60)).await.is_some());
    }
}
