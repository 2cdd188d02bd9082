//! FIFO publish queue with release-time planning.
//!
//! Pure bookkeeping: no I/O, no clocks. Callers pass `now` in and persist
//! the slots this type hands back.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::PipelineError;
use crate::submission::ChannelRef;

/// A publish reservation for one approved submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSlot {
    pub submission_id: Uuid,
    /// Insertion order; restore sorts on this.
    pub seq: u64,
    pub enqueued_at: DateTime<Utc>,
    pub release_at: DateTime<Utc>,
    /// Failed publish attempts since the slot last reached the head.
    pub attempts: u32,
}

/// A channel post that went out but is not recorded as published yet.
///
/// While one is held, the next claim of that slot must only record it and
/// never post again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub submission_id: Uuid,
    pub channel_ref: ChannelRef,
    pub delivered_at: DateTime<Utc>,
}

/// What to do with the head slot after a failed publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePlan {
    /// Keep it at the head, try again at `slot.release_at`.
    Retry(QueueSlot),
    /// Retries exhausted: move it to the tail for manual intervention.
    Requeue(QueueSlot),
}

impl FailurePlan {
    pub fn slot(&self) -> &QueueSlot {
        match self {
            Self::Retry(slot) | Self::Requeue(slot) => slot,
        }
    }
}

/// Ordered slots plus the pacing state needed to plan new ones.
#[derive(Debug, Default)]
pub struct PublishQueue {
    slots: VecDeque<QueueSlot>,
    in_flight: Option<Uuid>,
    delivered: Option<Delivery>,
    last_release: Option<DateTime<Utc>>,
    next_seq: u64,
}

impl PublishQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted slots.
    pub fn restore(mut slots: Vec<QueueSlot>, last_release: Option<DateTime<Utc>>) -> Self {
        slots.sort_by_key(|s| s.seq);
        let next_seq = slots.last().map(|s| s.seq + 1).unwrap_or(0);
        Self {
            slots: slots.into(),
            in_flight: None,
            delivered: None,
            last_release,
            next_seq,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.slots.iter().any(|s| s.submission_id == id)
    }

    pub fn get(&self, id: Uuid) -> Option<&QueueSlot> {
        self.slots.iter().find(|s| s.submission_id == id)
    }

    pub fn head(&self) -> Option<&QueueSlot> {
        self.slots.front()
    }

    pub fn slots(&self) -> impl Iterator<Item = &QueueSlot> {
        self.slots.iter()
    }

    pub fn in_flight(&self) -> Option<Uuid> {
        self.in_flight
    }

    pub fn last_release(&self) -> Option<DateTime<Utc>> {
        self.last_release
    }

    /// The unrecorded channel post for `id`, if there is one.
    pub fn delivered(&self, id: Uuid) -> Option<Delivery> {
        self.delivered.filter(|d| d.submission_id == id)
    }

    /// Remember a channel post for the claimed slot until `complete` runs.
    pub fn record_delivery(&mut self, delivery: Delivery) {
        if self.in_flight == Some(delivery.submission_id) {
            self.delivered = Some(delivery);
        }
    }

    /// Release time for a slot appended now: one interval after the tail,
    /// or after `now` when the queue is empty, pushed into the daily window.
    fn next_release(&self, now: DateTime<Utc>, config: &SchedulerConfig) -> DateTime<Utc> {
        let interval = to_chrono(config.interval);
        let base = match self.slots.back() {
            Some(tail) => add(tail.release_at, interval).max(now),
            None => add(now, interval),
        };
        match config.daily_window {
            Some(window) => window.align(base),
            None => base,
        }
    }

    /// Plan a tail slot for `id` without inserting it.
    pub fn plan(&self, id: Uuid, now: DateTime<Utc>, config: &SchedulerConfig) -> QueueSlot {
        QueueSlot {
            submission_id: id,
            seq: self.next_seq,
            enqueued_at: now,
            release_at: self.next_release(now, config),
            attempts: 0,
        }
    }

    /// Append a planned slot. A submission holds at most one slot.
    pub fn push(&mut self, slot: QueueSlot) {
        if self.contains(slot.submission_id) {
            tracing::warn!(
                submission_id = %slot.submission_id,
                "Slot already queued, ignoring push"
            );
            return;
        }
        self.next_seq = self.next_seq.max(slot.seq + 1);
        self.slots.push_back(slot);
    }

    /// Remove a slot that has not been released yet.
    pub fn cancel(&mut self, id: Uuid) -> Result<QueueSlot, PipelineError> {
        if self.in_flight == Some(id) || self.delivered(id).is_some() {
            return Err(PipelineError::QueueNotFound { id });
        }
        let pos = self
            .slots
            .iter()
            .position(|s| s.submission_id == id)
            .ok_or(PipelineError::QueueNotFound { id })?;
        self.slots
            .remove(pos)
            .ok_or(PipelineError::QueueNotFound { id })
    }

    /// Claim the head if it is due. Only one claim may be outstanding.
    pub fn claim_due(&mut self, now: DateTime<Utc>, config: &SchedulerConfig) -> Option<QueueSlot> {
        if self.in_flight.is_some() {
            return None;
        }
        let head = self.slots.front()?;
        // Already posted: only the record is missing, so no gate applies.
        if self.delivered(head.submission_id).is_some() {
            self.in_flight = Some(head.submission_id);
            return Some(head.clone());
        }
        if head.release_at > now {
            return None;
        }
        if let Some(last) = self.last_release
            && add(last, to_chrono(config.interval)) > now
        {
            return None;
        }
        if let Some(window) = config.daily_window
            && !window.contains(now)
        {
            return None;
        }
        self.in_flight = Some(head.submission_id);
        Some(head.clone())
    }

    /// Drop the claim without touching the slot.
    pub fn unclaim(&mut self, id: Uuid) {
        if self.in_flight == Some(id) {
            self.in_flight = None;
        }
    }

    /// Remove a released slot and start the spacing clock.
    pub fn complete(&mut self, id: Uuid, released_at: DateTime<Utc>) -> Option<QueueSlot> {
        self.unclaim(id);
        if self.delivered(id).is_some() {
            self.delivered = None;
        }
        let pos = self.slots.iter().position(|s| s.submission_id == id)?;
        self.last_release = Some(
            self.last_release
                .map_or(released_at, |last| last.max(released_at)),
        );
        self.slots.remove(pos)
    }

    /// Decide how to handle a failed publish of `id`.
    pub fn plan_failure(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        jitter: Duration,
        config: &SchedulerConfig,
    ) -> Option<FailurePlan> {
        let slot = self.get(id)?;
        let attempts = slot.attempts + 1;
        if attempts <= config.max_retries {
            let delay = backoff(attempts, config) + jitter;
            return Some(FailurePlan::Retry(QueueSlot {
                attempts,
                release_at: add(now, to_chrono(delay)),
                ..slot.clone()
            }));
        }

        let mut requeued = self.plan(id, now, config);
        requeued.enqueued_at = slot.enqueued_at;
        if self.slots.len() == 1 {
            // It is its own tail: space it from now.
            let base = add(now, to_chrono(config.interval));
            requeued.release_at = match config.daily_window {
                Some(window) => window.align(base),
                None => base,
            };
        }
        Some(FailurePlan::Requeue(requeued))
    }

    /// Apply a persisted failure plan.
    pub fn apply_failure(&mut self, plan: FailurePlan) {
        let id = plan.slot().submission_id;
        self.unclaim(id);
        let Some(pos) = self.slots.iter().position(|s| s.submission_id == id) else {
            return;
        };
        match plan {
            FailurePlan::Retry(slot) => self.slots[pos] = slot,
            FailurePlan::Requeue(slot) => {
                self.slots.remove(pos);
                self.next_seq = self.next_seq.max(slot.seq + 1);
                self.slots.push_back(slot);
            }
        }
    }
}

/// Exponential backoff for the given attempt number (1-based), capped.
pub fn backoff(attempt: u32, config: &SchedulerConfig) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    config
        .retry_base
        .checked_mul(factor)
        .unwrap_or(config.retry_max)
        .min(config.retry_max)
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// `at + delta`, pinned to the far future on overflow.
fn add(at: DateTime<Utc>, delta: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
