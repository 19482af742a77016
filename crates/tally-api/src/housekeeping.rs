//! Scheduled retention housekeeping.
//!
//! Runs on its own timer, independent of the request path; a failed pass is
//! logged and retried on the next tick.

use std::sync::Arc;

use tally_core::SyncService;
use tokio::time::MissedTickBehavior;

use crate::config::AppConfig;

pub fn spawn(sync: SyncService, config: Arc<AppConfig>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.housekeeping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match sync
                .purge_expired(config.op_retention, config.change_retention)
                .await
            {
                Ok(report) if report.ops_removed > 0 || report.changes_removed > 0 => {
                    tracing::info!(
                        ops_removed = report.ops_removed,
                        changes_removed = report.changes_removed,
                        "Housekeeping pass purged expired sync records"
                    );
                }
                Ok(_) => {
                    tracing::debug!("Housekeeping pass found nothing past retention");
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Housekeeping pass failed");
                }
            }
        }
    })
}
