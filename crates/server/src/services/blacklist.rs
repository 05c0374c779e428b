// Expired token purge

use std::time::Duration;

use chrono::Utc;
use codejudge_store::{Database, Filter};
use tokio::task::JoinHandle;

/// Removes blacklist entries whose token has expired on its own.
pub async fn purge_expired(db: &Database) -> codejudge_store::Result<u64> {
    let removed = db
        .token_blacklist()
        .delete_many(Filter::field("expires_at").lt(Utc::now()))
        .await?;
    Ok(removed.count)
}

pub fn spawn_purge(db: Database, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match purge_expired(&db).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "purged expired tokens"),
                Err(err) => tracing::warn!(error = %err, "failed to purge expired tokens"),
            }
        }
    })
}
