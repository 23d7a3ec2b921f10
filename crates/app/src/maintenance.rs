use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kick_calories_storage::Database;
use metrics::counter;
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::session::SessionStore;

const PROCESSED_EVENT_TTL_HOURS: i64 = 24;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Background worker that expires webhook deduplication records and idle
/// sessions.
#[derive(Clone)]
pub struct MaintenanceWorker {
    database: Database,
    sessions: SessionStore,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    interval: Duration,
}

impl MaintenanceWorker {
    pub fn new(database: Database, sessions: SessionStore) -> Self {
        Self {
            database,
            sessions,
            clock: Arc::new(Utc::now),
            interval: DEFAULT_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(stage = "storage", error = %err, "maintenance run failed");
            }
        }
    }

    /// Executes one sweep and returns the number of deleted processed-event rows.
    pub async fn run_once(&self) -> Result<u64, MaintenanceError> {
        let now = (self.clock)();
        let threshold = now - ChronoDuration::hours(PROCESSED_EVENT_TTL_HOURS);

        let deleted = match self.database.processed_events().delete_older_than(threshold).await {
            Ok(deleted) => deleted,
            Err(err) if is_sqlite_busy(&err) => {
                warn!(stage = "storage", error = %err, "processed_events sweep hit busy timeout");
                0
            }
            Err(source) => return Err(MaintenanceError::TtlDelete { source }),
        };
        counter!("db_ttl_deleted_total").increment(deleted);
        info!(
            stage = "storage",
            table = "processed_events",
            deleted,
            threshold = %threshold.to_rfc3339(),
            "processed_events TTL sweep completed"
        );

        let purged = self.sessions.purge_expired(now).await;
        debug!(stage = "storage", purged, "expired sessions purged");

        Ok(deleted)
    }
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("failed to delete expired rows from processed_events")]
    TtlDelete {
        #[source]
        source: SqlxError,
    },
}

fn is_sqlite_busy(err: &SqlxError) -> bool {
    match err {
        SqlxError::Database(db_err) => matches!(db_err.code().as_deref(), Some("5") | Some("6")),
        _ => false,
    }
}
