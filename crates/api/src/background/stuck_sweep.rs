//! Periodic global stuck-variant sweep.
//!
//! Callbacks can be lost. Variants left `generating` past their model's
//! threshold are failed here so the UI never shows a spinner forever.

use std::sync::Arc;
use std::time::Duration;

use storyframe_pipeline::StuckJobRecovery;
use tokio_util::sync::CancellationToken;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(recovery: Arc<StuckJobRecovery>, every: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = every.as_secs(),
        default_threshold_minutes = recovery.thresholds().default_minutes,
        "Stuck sweep job started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stuck sweep job stopping");
                break;
            }
            _ = interval.tick() => {
                match recovery.sweep_stuck(None, None).await {
                    Ok(0) => tracing::debug!("Stuck sweep: nothing to reset"),
                    Ok(reset) => tracing::info!(reset, "Stuck sweep: variants marked failed"),
                    Err(e) => tracing::error!(error = %e, "Stuck sweep failed"),
                }
            }
        }
    }
}
