use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use udagram_db::Database;

/// Background task that prunes expired refresh tokens.
///
/// Expired rows are already rejected by `/refresh`; this only keeps the
/// table from growing without bound.
pub async fn run_sweeper_loop(db: Arc<Database>, interval_secs: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match sweep_expired(&db, Utc::now().timestamp()) {
            Ok(count) => {
                if count > 0 {
                    info!("Sweeper: removed {} expired refresh tokens", count);
                }
            }
            Err(e) => {
                warn!("Sweeper error: {}", e);
            }
        }
    }
}

fn sweep_expired(db: &Database, now: i64) -> anyhow::Result<usize> {
    db.delete_expired_refresh_tokens(now)
}
