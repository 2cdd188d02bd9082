//! Background drivers for the coordinator.
//!
//! Both tasks stop issuing work once `shutdown` flips, but never abort a
//! tick that already started, so an in-flight publish finishes or fails
//! on its own terms.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::pipeline::coordinator::{PipelineCoordinator, TickOutcome};

/// Drive the publish scheduler every `interval`.
pub fn spawn_publish_ticker(
    coordinator: Arc<PipelineCoordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match coordinator.tick().await {
                Ok(TickOutcome::Idle) => {}
                Ok(outcome) => tracing::debug!(?outcome, "Publish tick"),
                Err(e) => error!(error = %e, "Publish tick failed"),
            }
        }
        info!("Publish ticker stopped");
    })
}

/// Periodically promote published submissions past their grace period.
pub fn spawn_stability_sweep(
    coordinator: Arc<PipelineCoordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = coordinator.stabilize_due().await {
                error!(error = %e, "Stability sweep failed");
            }
        }
        info!("Stability sweep stopped");
    })
}
