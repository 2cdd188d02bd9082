use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::{broadcast, watch};

use spotted_relay::channels::TelegramPublisher;
use spotted_relay::config::{ModeratorSet, PipelineConfig};
use spotted_relay::error::ConfigError;
use spotted_relay::pipeline::{self, PipelineCoordinator, PipelineEvent};
use spotted_relay::store::{LibSqlStore, SubmissionStore};

/// How often published submissions are checked for stability.
const STABILITY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. Keep the guard alive so buffered lines flush.
    let _log_guard = init_tracing();

    let config = PipelineConfig::from_env()?;

    let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
        .map_err(|_| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;
    let channel_id: i64 = std::env::var("SPOTTED_CHANNEL_ID")
        .map_err(|_| ConfigError::MissingEnvVar("SPOTTED_CHANNEL_ID".into()))?
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            key: "SPOTTED_CHANNEL_ID".into(),
            message: format!("{e}"),
        })?;

    eprintln!("📣 Spotted Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Quorum: {} to approve, {} to reject",
        config.quorum.approve_threshold, config.quorum.reject_threshold
    );
    eprintln!(
        "   Moderators: {}",
        match &config.moderators {
            ModeratorSet::Anyone => "everyone".to_string(),
            ModeratorSet::Only(ids) => format!("{} listed", ids.len()),
        }
    );
    eprintln!(
        "   Publish interval: {}s{}",
        config.scheduler.interval.as_secs(),
        config
            .scheduler
            .daily_window
            .map(|w| format!(" (window {w} UTC)"))
            .unwrap_or_default()
    );

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn SubmissionStore> = Arc::new(LibSqlStore::new_local(&config.db_path).await?);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Pipeline ─────────────────────────────────────────────────────────
    let publisher = Arc::new(TelegramPublisher::new(
        SecretString::from(bot_token),
        channel_id,
    ));
    let tick_interval = config.scheduler.tick_interval;
    let coordinator = PipelineCoordinator::new(config, store, publisher);

    let restored = coordinator.restore().await?;
    let pending = coordinator.pending_count().await?;
    eprintln!("   Restored {restored} queued, {pending} awaiting moderation\n");

    let _events_handle = spawn_event_log(coordinator.subscribe());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = pipeline::spawn_publish_ticker(
        Arc::clone(&coordinator),
        tick_interval,
        shutdown_rx.clone(),
    );
    let sweep = pipeline::spawn_stability_sweep(
        Arc::clone(&coordinator),
        STABILITY_SWEEP_INTERVAL,
        shutdown_rx,
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, waiting for in-flight work");
    let _ = shutdown_tx.send(true);

    // An in-flight publish finishes before the ticker exits.
    let _ = ticker.await;
    let _ = sweep.await;

    tracing::info!("Spotted relay stopped");
    Ok(())
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::env::var("SPOTTED_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "spotted-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

/// Relay pipeline events to the log.
fn spawn_event_log(
    mut rx: broadcast::Receiver<PipelineEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::PublishAlert {
                    submission_id,
                    error,
                    requeued_release_at,
                }) => {
                    tracing::error!(
                        %submission_id,
                        %error,
                        %requeued_release_at,
                        "Publish alert: manual intervention needed"
                    );
                }
                Ok(event) => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    tracing::info!(event = %payload, "Pipeline event");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
