//! Background expiry and repair loop.
//!
//! Runs [`ReconciliationCoordinator::sweep`] on a fixed interval next to the HTTP
//! server. Every instance may run one; the per-intent compare-and-swap keeps
//! concurrent sweeps from applying the same transition twice.

use crate::services::coordinator::ReconciliationCoordinator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

pub async fn run_sweeper(coordinator: Arc<ReconciliationCoordinator>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Payment sweeper started");

    loop {
        match coordinator.sweep(Utc::now()).await {
            Ok(report) => debug!(?report, "Sweep pass complete"),
            Err(e) => error!("Sweep pass failed: {}", e),
        }

        sleep(interval).await;
    }
}
