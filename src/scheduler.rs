//! Periodic score recomputation inside the server process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::service::FeedService;

/// Spawn the recompute loop. Returns `None` when `interval_secs` is 0.
///
/// The first run happens one full interval after startup. A run that
/// overlaps the next tick delays it rather than bunching runs together.
pub fn spawn_recompute_task(
    service: Arc<FeedService>,
    interval_secs: u64,
) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        info!("background recompute disabled");
        return None;
    }

    let period = Duration::from_secs(interval_secs);
    info!(interval_secs, "background recompute scheduled");

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = service.run_recompute(Utc::now()).await;
            if !report.success {
                warn!(
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "scheduled recompute failed"
                );
            }
        }
    }))
}
