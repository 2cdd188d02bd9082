//! In-memory `SubmissionStore` for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::scheduler::QueueSlot;
use crate::store::traits::{SignalRecord, SlotChange, StoreCommit, SubmissionStore};
use crate::submission::{ModeratorVote, PublicVote, Report, Submission, SubmissionState, UserId};

#[derive(Default)]
struct Inner {
    submissions: HashMap<Uuid, Submission>,
    moderator_votes: HashMap<(Uuid, UserId), ModeratorVote>,
    public_votes: HashMap<(Uuid, UserId), PublicVote>,
    reports: HashMap<(Uuid, UserId), Report>,
    slots: HashMap<Uuid, QueueSlot>,
}

/// Everything behind one lock, so a commit is trivially atomic.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for InMemoryStore {
    async fn insert_submission(&self, submission: &Submission) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        if inner.submissions.contains_key(&submission.id) {
            return Err(DatabaseError::Constraint(format!(
                "submission {} already exists",
                submission.id
            )));
        }
        inner
            .submissions
            .insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, DatabaseError> {
        Ok(self.inner.read().await.submissions.get(&id).cloned())
    }

    async fn unresolved_for_author(
        &self,
        author_id: UserId,
    ) -> Result<Option<Submission>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .submissions
            .values()
            .filter(|s| s.author_id == author_id && s.state.is_unresolved())
            .min_by_key(|s| s.created_at)
            .cloned())
    }

    async fn list_by_state(
        &self,
        state: SubmissionState,
    ) -> Result<Vec<Submission>, DatabaseError> {
        let inner = self.inner.read().await;
        let mut found: Vec<Submission> = inner
            .submissions
            .values()
            .filter(|s| s.state == state)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }

    async fn moderator_votes(&self, id: Uuid) -> Result<Vec<ModeratorVote>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .moderator_votes
            .values()
            .filter(|v| v.submission_id == id)
            .cloned()
            .collect())
    }

    async fn public_votes(&self, id: Uuid) -> Result<Vec<PublicVote>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .public_votes
            .values()
            .filter(|v| v.submission_id == id)
            .cloned()
            .collect())
    }

    async fn public_vote(
        &self,
        id: Uuid,
        voter_id: UserId,
    ) -> Result<Option<PublicVote>, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .public_votes
            .get(&(id, voter_id))
            .cloned())
    }

    async fn reports(&self, id: Uuid) -> Result<Vec<Report>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .reports
            .values()
            .filter(|r| r.submission_id == id)
            .cloned()
            .collect())
    }

    async fn has_report(&self, id: Uuid, reporter_id: UserId) -> Result<bool, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .reports
            .contains_key(&(id, reporter_id)))
    }

    async fn queue_slots(&self) -> Result<Vec<QueueSlot>, DatabaseError> {
        let inner = self.inner.read().await;
        let mut slots: Vec<QueueSlot> = inner.slots.values().cloned().collect();
        slots.sort_by_key(|s| s.seq);
        Ok(slots)
    }

    async fn save_slot(&self, slot: &QueueSlot) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        match inner.slots.get_mut(&slot.submission_id) {
            Some(existing) => {
                *existing = slot.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound {
                entity: "queue_slot".into(),
                id: slot.submission_id.to_string(),
            }),
        }
    }

    async fn last_published_at(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .submissions
            .values()
            .filter_map(|s| s.published_at)
            .max())
    }

    async fn commit(&self, commit: &StoreCommit) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        let id = commit.submission.id;

        // Validate before mutating anything.
        if !inner.submissions.contains_key(&id) {
            return Err(DatabaseError::NotFound {
                entity: "submission".into(),
                id: id.to_string(),
            });
        }
        if let SlotChange::Insert(slot) = &commit.slot
            && inner.slots.contains_key(&slot.submission_id)
        {
            return Err(DatabaseError::Constraint(format!(
                "submission {} already holds a queue slot",
                slot.submission_id
            )));
        }

        inner.submissions.insert(id, commit.submission.clone());

        match &commit.signal {
            Some(SignalRecord::ModeratorVote(vote)) => {
                inner
                    .moderator_votes
                    .insert((vote.submission_id, vote.moderator_id), vote.clone());
            }
            Some(SignalRecord::PublicVote(vote)) => {
                inner
                    .public_votes
                    .insert((vote.submission_id, vote.voter_id), vote.clone());
            }
            Some(SignalRecord::Report(report)) => {
                inner
                    .reports
                    .entry((report.submission_id, report.reporter_id))
                    .or_insert_with(|| report.clone());
            }
            None => {}
        }

        match &commit.slot {
            SlotChange::Insert(slot) => {
                inner.slots.insert(slot.submission_id, slot.clone());
            }
            SlotChange::Remove(slot_id) => {
                inner.slots.remove(slot_id);
            }
            SlotChange::None => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::{Content, ModeratorDecision};

    #[tokio::test]
    async fn commit_writes_all_parts() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut sub = Submission::new(7, Content::text("hi"), now);
        store.insert_submission(&sub).await.unwrap();

        sub.state = SubmissionState::Approved;
        let vote = ModeratorVote {
            submission_id: sub.id,
            moderator_id: 1,
            decision: ModeratorDecision::Approve,
            reason: None,
            cast_at: now,
        };
        let slot = QueueSlot {
            submission_id: sub.id,
            seq: 0,
            enqueued_at: now,
            release_at: now,
            attempts: 0,
        };
        store
            .commit(
                &StoreCommit::submission(sub.clone())
                    .with_signal(SignalRecord::ModeratorVote(vote))
                    .with_slot(SlotChange::Insert(slot)),
            )
            .await
            .unwrap();

        assert_eq!(
            store.get_submission(sub.id).await.unwrap().unwrap().state,
            SubmissionState::Approved
        );
        assert_eq!(store.moderator_votes(sub.id).await.unwrap().len(), 1);
        assert_eq!(store.queue_slots().await.unwrap().len(), 1);
        assert!(store.unresolved_for_author(7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn commit_rejects_second_slot() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let sub = Submission::new(7, Content::text("hi"), now);
        store.insert_submission(&sub).await.unwrap();
        let slot = QueueSlot {
            submission_id: sub.id,
            seq: 0,
            enqueued_at: now,
            release_at: now,
            attempts: 0,
        };
        let commit = StoreCommit::submission(sub.clone()).with_slot(SlotChange::Insert(slot));
        store.commit(&commit).await.unwrap();
        assert!(store.commit(&commit).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_report_is_ignored() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let sub = Submission::new(7, Content::text("hi"), now);
        store.insert_submission(&sub).await.unwrap();
        let report = Report {
            submission_id: sub.id,
            reporter_id: 3,
            reported_at: now,
        };
        for _ in 0..2 {
            store
                .commit(
                    &StoreCommit::submission(sub.clone())
                        .with_signal(SignalRecord::Report(report.clone())),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.reports(sub.id).await.unwrap().len(), 1);
        assert!(store.has_report(sub.id, 3).await.unwrap());
    }
}
