//! libSQL backend: async `SubmissionStore` implementation.
//!
//! Supports local file and in-memory databases. The connection sits behind
//! an async mutex so a commit's transaction never interleaves with another
//! caller's statements.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::scheduler::QueueSlot;
use crate::store::migrations;
use crate::store::traits::{SignalRecord, SlotChange, StoreCommit, SubmissionStore};
use crate::submission::{
    ChannelRef, ModerationTally, ModeratorVote, PublicVote, Report, SignalTally, Submission,
    SubmissionState, UserId,
};

const SUBMISSION_COLUMNS: &str = "id, author_id, content, state, created_at, updated_at, \
     approvals, rejections, upvotes, downvotes, reports, published_at, \
     channel_chat_id, channel_message_id, rejection_reason";

const SLOT_COLUMNS: &str = "submission_id, seq, enqueued_at, release_at, attempts";

/// libSQL database backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }

    async fn query_submissions(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        context: &str,
    ) -> Result<Vec<Submission>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?;

        let mut found = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?
        {
            found.push(row_to_submission(&row)?);
        }
        Ok(found)
    }

    async fn apply_commit(conn: &Connection, commit: &StoreCommit) -> Result<(), DatabaseError> {
        let sub = &commit.submission;
        let (chat_id, message_id) = match sub.channel_ref {
            Some(r) => (Some(r.chat_id), Some(r.message_id)),
            None => (None, None),
        };

        let updated = conn
            .execute(
                "UPDATE submissions SET state = ?1, updated_at = ?2, approvals = ?3, \
                 rejections = ?4, upvotes = ?5, downvotes = ?6, reports = ?7, \
                 published_at = ?8, channel_chat_id = ?9, channel_message_id = ?10, \
                 rejection_reason = ?11 WHERE id = ?12",
                params![
                    sub.state.as_str(),
                    sub.updated_at.to_rfc3339(),
                    i64::from(sub.moderation.approvals),
                    i64::from(sub.moderation.rejections),
                    i64::from(sub.signals.upvotes),
                    i64::from(sub.signals.downvotes),
                    i64::from(sub.signals.reports),
                    sub.published_at.map(|d| d.to_rfc3339()),
                    chat_id,
                    message_id,
                    sub.rejection_reason.clone(),
                    sub.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("commit submission: {e}")))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "submission".into(),
                id: sub.id.to_string(),
            });
        }

        match &commit.signal {
            Some(SignalRecord::ModeratorVote(vote)) => {
                conn.execute(
                    "INSERT INTO moderator_votes \
                     (submission_id, moderator_id, decision, reason, cast_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(submission_id, moderator_id) \
                     DO UPDATE SET decision = excluded.decision, reason = excluded.reason, \
                     cast_at = excluded.cast_at",
                    params![
                        vote.submission_id.to_string(),
                        vote.moderator_id,
                        vote.decision.as_str(),
                        vote.reason.clone(),
                        vote.cast_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("commit moderator vote: {e}")))?;
            }
            Some(SignalRecord::PublicVote(vote)) => {
                conn.execute(
                    "INSERT INTO public_votes (submission_id, voter_id, kind, cast_at) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(submission_id, voter_id) \
                     DO UPDATE SET kind = excluded.kind, cast_at = excluded.cast_at",
                    params![
                        vote.submission_id.to_string(),
                        vote.voter_id,
                        vote.kind.as_str(),
                        vote.cast_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("commit public vote: {e}")))?;
            }
            Some(SignalRecord::Report(report)) => {
                conn.execute(
                    "INSERT OR IGNORE INTO reports (submission_id, reporter_id, reported_at) \
                     VALUES (?1, ?2, ?3)",
                    params![
                        report.submission_id.to_string(),
                        report.reporter_id,
                        report.reported_at.to_rfc3339(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("commit report: {e}")))?;
            }
            None => {}
        }

        match &commit.slot {
            SlotChange::Insert(slot) => {
                conn.execute(
                    &format!(
                        "INSERT INTO queue_slots ({SLOT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
                    ),
                    params![
                        slot.submission_id.to_string(),
                        slot.seq as i64,
                        slot.enqueued_at.to_rfc3339(),
                        slot.release_at.to_rfc3339(),
                        i64::from(slot.attempts),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Constraint(format!("commit slot insert: {e}")))?;
            }
            SlotChange::Remove(id) => {
                conn.execute(
                    "DELETE FROM queue_slots WHERE submission_id = ?1",
                    params![id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("commit slot remove: {e}")))?;
            }
            SlotChange::None => {}
        }

        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid '{s}': {e}")))
}

fn count(row: &libsql::Row, idx: i32) -> u32 {
    row.get::<i64>(idx).unwrap_or(0).max(0) as u32
}

/// Column order matches SUBMISSION_COLUMNS.
fn row_to_submission(row: &libsql::Row) -> Result<Submission, DatabaseError> {
    let get_str = |idx: i32| {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("submission column {idx}: {e}")))
    };

    let content = serde_json::from_str(&get_str(2)?)
        .map_err(|e| DatabaseError::Serialization(format!("submission content: {e}")))?;
    let state = get_str(3)?
        .parse::<SubmissionState>()
        .map_err(DatabaseError::Serialization)?;

    let channel_ref = match (row.get::<i64>(12).ok(), row.get::<i64>(13).ok()) {
        (Some(chat_id), Some(message_id)) => Some(ChannelRef {
            chat_id,
            message_id,
        }),
        _ => None,
    };

    Ok(Submission {
        id: parse_uuid(&get_str(0)?)?,
        author_id: row
            .get::<i64>(1)
            .map_err(|e| DatabaseError::Query(format!("submission author: {e}")))?,
        content,
        state,
        created_at: parse_datetime(&get_str(4)?),
        updated_at: parse_datetime(&get_str(5)?),
        moderation: ModerationTally {
            approvals: count(row, 6),
            rejections: count(row, 7),
        },
        signals: SignalTally {
            upvotes: count(row, 8),
            downvotes: count(row, 9),
            reports: count(row, 10),
        },
        published_at: row.get::<String>(11).ok().map(|s| parse_datetime(&s)),
        channel_ref,
        rejection_reason: row.get::<String>(14).ok(),
    })
}

/// Columns: voter_id, kind, cast_at.
fn row_to_public_vote(row: &libsql::Row, id: Uuid) -> Result<PublicVote, DatabaseError> {
    let kind: String = row.get(1).unwrap_or_default();
    Ok(PublicVote {
        submission_id: id,
        voter_id: row.get::<i64>(0).unwrap_or_default(),
        kind: kind.parse().map_err(DatabaseError::Serialization)?,
        cast_at: parse_datetime(&row.get::<String>(2).unwrap_or_default()),
    })
}

/// Column order matches SLOT_COLUMNS.
fn row_to_slot(row: &libsql::Row) -> Result<QueueSlot, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("slot id: {e}")))?;
    Ok(QueueSlot {
        submission_id: parse_uuid(&id)?,
        seq: row.get::<i64>(1).unwrap_or(0).max(0) as u64,
        enqueued_at: parse_datetime(&row.get::<String>(2).unwrap_or_default()),
        release_at: parse_datetime(&row.get::<String>(3).unwrap_or_default()),
        attempts: count(row, 4),
    })
}

#[async_trait]
impl SubmissionStore for LibSqlStore {
    async fn insert_submission(&self, submission: &Submission) -> Result<(), DatabaseError> {
        let content = serde_json::to_string(&submission.content)
            .map_err(|e| DatabaseError::Serialization(format!("submission content: {e}")))?;
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO submissions ({SUBMISSION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                submission.id.to_string(),
                submission.author_id,
                content,
                submission.state.as_str(),
                submission.created_at.to_rfc3339(),
                submission.updated_at.to_rfc3339(),
                i64::from(submission.moderation.approvals),
                i64::from(submission.moderation.rejections),
                i64::from(submission.signals.upvotes),
                i64::from(submission.signals.downvotes),
                i64::from(submission.signals.reports),
                submission.published_at.map(|d| d.to_rfc3339()),
                submission.channel_ref.map(|r| r.chat_id),
                submission.channel_ref.map(|r| r.message_id),
                submission.rejection_reason.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Constraint(format!("insert_submission: {e}")))?;
        Ok(())
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, DatabaseError> {
        let mut found = self
            .query_submissions(
                &format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?1"),
                params![id.to_string()],
                "get_submission",
            )
            .await?;
        Ok(found.pop())
    }

    async fn unresolved_for_author(
        &self,
        author_id: UserId,
    ) -> Result<Option<Submission>, DatabaseError> {
        let mut found = self
            .query_submissions(
                &format!(
                    "SELECT {SUBMISSION_COLUMNS} FROM submissions \
                     WHERE author_id = ?1 AND state IN ('pending', 'approved') \
                     ORDER BY created_at ASC LIMIT 1"
                ),
                params![author_id],
                "unresolved_for_author",
            )
            .await?;
        Ok(found.pop())
    }

    async fn list_by_state(
        &self,
        state: SubmissionState,
    ) -> Result<Vec<Submission>, DatabaseError> {
        self.query_submissions(
            &format!(
                "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE state = ?1 \
                 ORDER BY created_at ASC"
            ),
            params![state.as_str()],
            "list_by_state",
        )
        .await
    }

    async fn moderator_votes(&self, id: Uuid) -> Result<Vec<ModeratorVote>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT moderator_id, decision, cast_at, reason FROM moderator_votes \
                 WHERE submission_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("moderator_votes: {e}")))?;

        let mut votes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("moderator_votes: {e}")))?
        {
            let decision: String = row.get(1).unwrap_or_default();
            votes.push(ModeratorVote {
                submission_id: id,
                moderator_id: row.get::<i64>(0).unwrap_or_default(),
                decision: decision.parse().map_err(DatabaseError::Serialization)?,
                reason: row.get::<String>(3).ok(),
                cast_at: parse_datetime(&row.get::<String>(2).unwrap_or_default()),
            });
        }
        Ok(votes)
    }

    async fn public_votes(&self, id: Uuid) -> Result<Vec<PublicVote>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT voter_id, kind, cast_at FROM public_votes WHERE submission_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("public_votes: {e}")))?;

        let mut votes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("public_votes: {e}")))?
        {
            votes.push(row_to_public_vote(&row, id)?);
        }
        Ok(votes)
    }

    async fn public_vote(
        &self,
        id: Uuid,
        voter_id: UserId,
    ) -> Result<Option<PublicVote>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT voter_id, kind, cast_at FROM public_votes \
                 WHERE submission_id = ?1 AND voter_id = ?2",
                params![id.to_string(), voter_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("public_vote: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_public_vote(&row, id)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("public_vote: {e}"))),
        }
    }

    async fn reports(&self, id: Uuid) -> Result<Vec<Report>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT reporter_id, reported_at FROM reports WHERE submission_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reports: {e}")))?;

        let mut reports = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("reports: {e}")))?
        {
            reports.push(Report {
                submission_id: id,
                reporter_id: row.get::<i64>(0).unwrap_or_default(),
                reported_at: parse_datetime(&row.get::<String>(1).unwrap_or_default()),
            });
        }
        Ok(reports)
    }

    async fn has_report(&self, id: Uuid, reporter_id: UserId) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM reports WHERE submission_id = ?1 AND reporter_id = ?2",
                params![id.to_string(), reporter_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_report: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) > 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("has_report: {e}"))),
        }
    }

    async fn queue_slots(&self) -> Result<Vec<QueueSlot>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                &format!("SELECT {SLOT_COLUMNS} FROM queue_slots ORDER BY seq ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("queue_slots: {e}")))?;

        let mut slots = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("queue_slots: {e}")))?
        {
            slots.push(row_to_slot(&row)?);
        }
        Ok(slots)
    }

    async fn save_slot(&self, slot: &QueueSlot) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE queue_slots SET seq = ?1, release_at = ?2, attempts = ?3 \
                 WHERE submission_id = ?4",
                params![
                    slot.seq as i64,
                    slot.release_at.to_rfc3339(),
                    i64::from(slot.attempts),
                    slot.submission_id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_slot: {e}")))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "queue_slot".into(),
                id: slot.submission_id.to_string(),
            });
        }
        Ok(())
    }

    async fn last_published_at(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT MAX(published_at) FROM submissions", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("last_published_at: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok().map(|s| parse_datetime(&s))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("last_published_at: {e}"))),
        }
    }

    async fn commit(&self, commit: &StoreCommit) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("begin transaction: {e}")))?;

        match Self::apply_commit(&tx, commit).await {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("commit transaction: {e}"))),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::{Content, ModeratorDecision, PublicVoteKind};

    async fn store_with(state: SubmissionState) -> (LibSqlStore, Submission) {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut sub = Submission::new(42, Content::text("hello channel"), Utc::now());
        sub.state = state;
        store.insert_submission(&sub).await.unwrap();
        (store, sub)
    }

    fn slot_for(sub: &Submission, seq: u64) -> QueueSlot {
        QueueSlot {
            submission_id: sub.id,
            seq,
            enqueued_at: sub.created_at,
            release_at: sub.created_at,
            attempts: 0,
        }
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let (store, sub) = store_with(SubmissionState::Pending).await;
        let loaded = store.get_submission(sub.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, sub.id);
        assert_eq!(loaded.author_id, 42);
        assert_eq!(loaded.content, sub.content);
        assert_eq!(loaded.state, SubmissionState::Pending);
        assert!(loaded.channel_ref.is_none());
        assert!(store.get_submission(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unresolved_lookup_ignores_resolved() {
        let (store, mut sub) = store_with(SubmissionState::Pending).await;
        assert!(store.unresolved_for_author(42).await.unwrap().is_some());

        sub.state = SubmissionState::Rejected;
        store.commit(&StoreCommit::submission(sub)).await.unwrap();
        assert!(store.unresolved_for_author(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn moderator_vote_upserts() {
        let (store, sub) = store_with(SubmissionState::Pending).await;
        for decision in [ModeratorDecision::Approve, ModeratorDecision::Reject] {
            let vote = ModeratorVote {
                submission_id: sub.id,
                moderator_id: 9,
                decision,
                reason: (decision == ModeratorDecision::Reject).then(|| "off topic".to_string()),
                cast_at: Utc::now(),
            };
            let commit = StoreCommit::submission(sub.clone())
                .with_signal(SignalRecord::ModeratorVote(vote));
            store.commit(&commit).await.unwrap();
        }
        let votes = store.moderator_votes(sub.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].decision, ModeratorDecision::Reject);
        assert_eq!(votes[0].reason.as_deref(), Some("off topic"));
    }

    #[tokio::test]
    async fn rejection_reason_persists() {
        let (store, mut sub) = store_with(SubmissionState::Pending).await;
        sub.state = SubmissionState::Rejected;
        sub.rejection_reason = Some("already posted".into());
        store.commit(&StoreCommit::submission(sub.clone())).await.unwrap();

        let loaded = store.get_submission(sub.id).await.unwrap().unwrap();
        assert_eq!(loaded.rejection_reason.as_deref(), Some("already posted"));
    }

    #[tokio::test]
    async fn public_vote_and_report() {
        let (store, sub) = store_with(SubmissionState::Published).await;
        let vote = PublicVote {
            submission_id: sub.id,
            voter_id: 5,
            kind: PublicVoteKind::Down,
            cast_at: Utc::now(),
        };
        let commit =
            StoreCommit::submission(sub.clone()).with_signal(SignalRecord::PublicVote(vote));
        store.commit(&commit).await.unwrap();
        assert_eq!(
            store.public_vote(sub.id, 5).await.unwrap().unwrap().kind,
            PublicVoteKind::Down
        );
        assert!(store.public_vote(sub.id, 6).await.unwrap().is_none());

        let report = Report {
            submission_id: sub.id,
            reporter_id: 5,
            reported_at: Utc::now(),
        };
        for _ in 0..2 {
            let commit = StoreCommit::submission(sub.clone())
                .with_signal(SignalRecord::Report(report.clone()));
            store.commit(&commit).await.unwrap();
        }
        assert_eq!(store.reports(sub.id).await.unwrap().len(), 1);
        assert!(store.has_report(sub.id, 5).await.unwrap());
        assert!(!store.has_report(sub.id, 6).await.unwrap());
    }

    #[tokio::test]
    async fn failed_commit_rolls_back() {
        let (store, mut sub) = store_with(SubmissionState::Pending).await;
        let slot = slot_for(&sub, 1);
        sub.state = SubmissionState::Approved;
        let commit =
            StoreCommit::submission(sub.clone()).with_slot(SlotChange::Insert(slot.clone()));
        store.commit(&commit).await.unwrap();

        // Second insert of the same slot violates the primary key.
        let mut rejected = sub.clone();
        rejected.state = SubmissionState::Rejected;
        let result = store
            .commit(&StoreCommit::submission(rejected).with_slot(SlotChange::Insert(slot)))
            .await;
        assert!(result.is_err());

        let loaded = store.get_submission(sub.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, SubmissionState::Approved);
        assert_eq!(store.queue_slots().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publish_commit_removes_slot() {
        let (store, mut sub) = store_with(SubmissionState::Approved).await;
        let commit =
            StoreCommit::submission(sub.clone()).with_slot(SlotChange::Insert(slot_for(&sub, 3)));
        store.commit(&commit).await.unwrap();

        let now = Utc::now();
        sub.state = SubmissionState::Published;
        sub.published_at = Some(now);
        sub.channel_ref = Some(ChannelRef {
            chat_id: -100,
            message_id: 77,
        });
        store
            .commit(&StoreCommit::submission(sub.clone()).with_slot(SlotChange::Remove(sub.id)))
            .await
            .unwrap();

        assert!(store.queue_slots().await.unwrap().is_empty());
        let loaded = store.get_submission(sub.id).await.unwrap().unwrap();
        assert_eq!(loaded.channel_ref.unwrap().message_id, 77);
        assert!(store.last_published_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn save_slot_updates_retry_state() {
        let (store, sub) = store_with(SubmissionState::Approved).await;
        let mut slot = slot_for(&sub, 0);
        let commit =
            StoreCommit::submission(sub.clone()).with_slot(SlotChange::Insert(slot.clone()));
        store.commit(&commit).await.unwrap();

        slot.attempts = 2;
        store.save_slot(&slot).await.unwrap();
        assert_eq!(store.queue_slots().await.unwrap()[0].attempts, 2);

        slot.submission_id = Uuid::new_v4();
        assert!(store.save_slot(&slot).await.is_err());
    }
}
