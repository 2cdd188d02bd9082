//! Restart behaviour over a file-backed libSQL store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use spotted_relay::channels::ChannelPublisher;
use spotted_relay::config::{PipelineConfig, QuorumConfig, SchedulerConfig};
use spotted_relay::error::PublishError;
use spotted_relay::pipeline::{PipelineCoordinator, TickOutcome};
use spotted_relay::store::{LibSqlStore, SubmissionStore};
use spotted_relay::submission::{ChannelRef, Content, ModeratorDecision, SubmissionState};

struct EchoPublisher;

#[async_trait]
impl ChannelPublisher for EchoPublisher {
    async fn publish(&self, _content: &Content) -> Result<ChannelRef, PublishError> {
        Ok(ChannelRef {
            chat_id: -1,
            message_id: 1,
        })
    }
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 2, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn config() -> PipelineConfig {
    PipelineConfig {
        quorum: QuorumConfig {
            approve_threshold: 1,
            reject_threshold: 1,
        },
        scheduler: SchedulerConfig {
            interval: Duration::from_secs(60),
            retry_jitter: Duration::ZERO,
            ..SchedulerConfig::default()
        },
        ..PipelineConfig::default()
    }
}

async fn open(path: &std::path::Path) -> Arc<PipelineCoordinator> {
    let store: Arc<dyn SubmissionStore> = Arc::new(LibSqlStore::new_local(path).await.unwrap());
    let coordinator = PipelineCoordinator::new(config(), store, Arc::new(EchoPublisher));
    coordinator.restore().await.unwrap();
    coordinator
}

#[tokio::test]
async fn queue_and_states_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("spotted.db");

    let (first, second, pending) = {
        let c = open(&path).await;
        let first = c.submit_at(1, Content::text("first"), t(0)).await.unwrap();
        let second = c.submit_at(2, Content::text("second"), t(5)).await.unwrap();
        let pending = c.submit_at(3, Content::text("waiting"), t(8)).await.unwrap();
        for id in [first.id, second.id] {
            c.cast_moderator_vote_at(id, 9, ModeratorDecision::Approve, t(10))
                .await
                .unwrap();
        }
        assert!(matches!(
            c.tick_at(t(70)).await.unwrap(),
            TickOutcome::Published(_)
        ));
        (first.id, second.id, pending.id)
    };

    let c = open(&path).await;
    assert_eq!(
        c.current_state(first).await.unwrap(),
        SubmissionState::Published
    );
    assert_eq!(
        c.current_state(second).await.unwrap(),
        SubmissionState::Approved
    );
    assert_eq!(
        c.current_state(pending).await.unwrap(),
        SubmissionState::Pending
    );
    assert_eq!(c.pending_count().await.unwrap(), 1);

    let slots = c.scheduler().snapshot().await;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].submission_id, second);
    assert_eq!(slots[0].release_at, t(130));

    // Spacing is measured from the last publish before the restart.
    assert_eq!(c.tick_at(t(129)).await.unwrap(), TickOutcome::Idle);
    assert!(matches!(
        c.tick_at(t(130)).await.unwrap(),
        TickOutcome::Published(s) if s.id == second
    ));
}

#[tokio::test]
async fn author_lock_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spotted.db");

    {
        let c = open(&path).await;
        c.submit_at(77, Content::text("hello"), t(0)).await.unwrap();
    }

    let c = open(&path).await;
    assert!(c.submit_at(77, Content::text("again"), t(1)).await.is_err());
}
