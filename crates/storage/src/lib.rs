use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

/// Identifier of the single counter row.
pub const CALORIES_ROW_ID: i64 = 1;

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`, creating and seeding the
    /// counter row when absent.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a SQLite transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns a handle for reading and mutating the counter.
    pub fn counters(&self) -> CounterRepository {
        CounterRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the webhook deduplication table.
    pub fn processed_events(&self) -> ProcessedEventRepository {
        ProcessedEventRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the single-row `calories` counter.
#[derive(Clone)]
pub struct CounterRepository {
    pool: SqlitePool,
}

impl CounterRepository {
    /// Reads the current value, treating a missing row as zero.
    pub async fn current(&self) -> Result<i64, CounterError> {
        let row = sqlx::query("SELECT value FROM calories WHERE id = ?")
            .bind(CALORIES_ROW_ID)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(0);
        };

        parse_counter(row.get("value"))
    }

    /// Adds `delta` to the counter in a single statement and returns the new value.
    ///
    /// A missing row is recreated with `delta` as its value. A stored value
    /// that is not a canonical integer is left untouched and reported as
    /// [`CounterError::Corrupt`].
    pub async fn increment(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        delta: i64,
    ) -> Result<i64, CounterError> {
        let row = sqlx::query(
            "INSERT INTO calories (id, value) VALUES (?, CAST(? AS TEXT)) \
             ON CONFLICT(id) DO UPDATE \
             SET value = CAST(CAST(calories.value AS INTEGER) + ? AS TEXT) \
             WHERE CAST(CAST(calories.value AS INTEGER) AS TEXT) = calories.value \
             RETURNING value",
        )
        .bind(CALORIES_ROW_ID)
        .bind(delta)
        .bind(delta)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(row) = row {
            return parse_counter(row.get("value"));
        }

        // The conflict update was skipped by its guard.
        let stored: Option<(String,)> = sqlx::query_as("SELECT value FROM calories WHERE id = ?")
            .bind(CALORIES_ROW_ID)
            .fetch_optional(&mut **tx)
            .await?;
        Err(CounterError::Corrupt(
            stored.map(|(value,)| value).unwrap_or_default(),
        ))
    }
}

/// Accepts only the canonical decimal form written by [`CounterRepository::increment`].
fn parse_counter(raw: String) -> Result<i64, CounterError> {
    match raw.parse::<i64>() {
        Ok(value) if value.to_string() == raw => Ok(value),
        _ => Err(CounterError::Corrupt(raw)),
    }
}

/// Errors that can occur when reading or mutating the counter.
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter value {0:?} is not an integer")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository tracking webhook message ids that were already applied.
#[derive(Clone)]
pub struct ProcessedEventRepository {
    pool: SqlitePool,
}

impl ProcessedEventRepository {
    /// Records a message id inside the caller's transaction.
    pub async fn record(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        message_id: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<ProcessedOutcome, sqlx::Error> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO processed_events (message_id, processed_at) VALUES (?, ?)",
        )
        .bind(message_id)
        .bind(to_rfc3339(processed_at))
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            Ok(ProcessedOutcome::Duplicate)
        } else {
            Ok(ProcessedOutcome::Recorded)
        }
    }

    /// Deletes records processed before `threshold`, returning the number removed.
    pub async fn delete_older_than(&self, threshold: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < ?")
            .bind(to_rfc3339(threshold))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Result of attempting to record a processed message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedOutcome {
    Recorded,
    Duplicate,
}

impl ProcessedOutcome {
    pub fn is_duplicate(self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    async fn increment(db: &Database, delta: i64) -> i64 {
        let mut tx = db.begin().await.expect("begin");
        let total = db
            .counters()
            .increment(&mut tx, delta)
            .await
            .expect("increment");
        tx.commit().await.expect("commit");
        total
    }

    #[tokio::test]
    async fn migrations_seed_counter_row() {
        let db = setup_db().await;
        assert_eq!(db.counters().current().await.expect("current"), 0);

        let raw: (String,) = sqlx::query_as("SELECT value FROM calories WHERE id = 1")
            .fetch_one(db.pool())
            .await
            .expect("row");
        assert_eq!(raw.0, "0");
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = setup_db().await;
        increment(&db, 5).await;
        db.run_migrations().await.expect("second run");
        assert_eq!(db.counters().current().await.expect("current"), 5);
    }

    #[tokio::test]
    async fn increment_adds_delta_and_stores_text() {
        let db = setup_db().await;
        assert_eq!(increment(&db, 250).await, 250);
        assert_eq!(increment(&db, 100).await, 350);

        let row: (String, String) =
            sqlx::query_as("SELECT value, typeof(value) FROM calories WHERE id = 1")
                .fetch_one(db.pool())
                .await
                .expect("row");
        assert_eq!(row, ("350".to_string(), "text".to_string()));
    }

    #[tokio::test]
    async fn increment_recreates_missing_row() {
        let db = setup_db().await;
        sqlx::query("DELETE FROM calories")
            .execute(db.pool())
            .await
            .expect("delete");
        assert_eq!(db.counters().current().await.expect("current"), 0);
        assert_eq!(increment(&db, 40).await, 40);
    }

    #[tokio::test]
    async fn rolled_back_increment_is_discarded() {
        let db = setup_db().await;
        let mut tx = db.begin().await.expect("begin");
        db.counters()
            .increment(&mut tx, 99)
            .await
            .expect("increment");
        tx.rollback().await.expect("rollback");
        assert_eq!(db.counters().current().await.expect("current"), 0);
    }

    #[tokio::test]
    async fn current_reports_corrupt_values() {
        let db = setup_db().await;
        sqlx::query("UPDATE calories SET value = 'lots' WHERE id = 1")
            .execute(db.pool())
            .await
            .expect("update");
        let err = db.counters().current().await.unwrap_err();
        assert!(matches!(err, CounterError::Corrupt(value) if value == "lots"));
    }

    async fn set_raw_value(db: &Database, value: &str) {
        sqlx::query("UPDATE calories SET value = ? WHERE id = 1")
            .bind(value)
            .execute(db.pool())
            .await
            .expect("update");
    }

    async fn raw_value(db: &Database) -> String {
        let row: (String,) = sqlx::query_as("SELECT value FROM calories WHERE id = 1")
            .fetch_one(db.pool())
            .await
            .expect("row");
        row.0
    }

    #[tokio::test]
    async fn increment_refuses_to_overwrite_corrupt_values() {
        let db = setup_db().await;
        for corrupt in ["lots", "12abc", " 5", "007", "99999999999999999999"] {
            set_raw_value(&db, corrupt).await;

            let mut tx = db.begin().await.expect("begin");
            let err = db.counters().increment(&mut tx, 10).await.unwrap_err();
            tx.rollback().await.expect("rollback");

            assert!(
                matches!(&err, CounterError::Corrupt(value) if value == corrupt),
                "unexpected result for {corrupt:?}: {err}"
            );
            assert_eq!(raw_value(&db).await, corrupt);
            assert!(db.counters().current().await.is_err());
        }
    }

    #[tokio::test]
    async fn negative_values_remain_valid() {
        let db = setup_db().await;
        set_raw_value(&db, "-5").await;
        assert_eq!(db.counters().current().await.expect("current"), -5);
        assert_eq!(increment(&db, 10).await, 5);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("calories.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");

        let mut handles = Vec::new();
        for _ in 0..25 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                let mut tx = db.begin().await.expect("begin");
                db.counters()
                    .increment(&mut tx, 10)
                    .await
                    .expect("increment");
                tx.commit().await.expect("commit");
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(db.counters().current().await.expect("current"), 250);
    }

    #[tokio::test]
    async fn record_detects_duplicates() {
        let db = setup_db().await;
        let repo = db.processed_events();
        let now = Utc::now();

        let mut tx = db.begin().await.expect("begin");
        let first = repo.record(&mut tx, "msg-1", now).await.expect("record");
        let second = repo.record(&mut tx, "msg-1", now).await.expect("record");
        tx.commit().await.expect("commit");

        assert_eq!(first, ProcessedOutcome::Recorded);
        assert!(second.is_duplicate());
    }

    #[tokio::test]
    async fn delete_older_than_keeps_recent_records() {
        let db = setup_db().await;
        let repo = db.processed_events();
        let now = Utc::now();

        let mut tx = db.begin().await.expect("begin");
        repo.record(&mut tx, "old", now - ChronoDuration::hours(48))
            .await
            .expect("record");
        repo.record(&mut tx, "new", now).await.expect("record");
        tx.commit().await.expect("commit");

        let deleted = repo
            .delete_older_than(now - ChronoDuration::hours(24))
            .await
            .expect("delete");
        assert_eq!(deleted, 1);

        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processed_events")
            .fetch_one(db.pool())
            .await
            .expect("count");
        assert_eq!(remaining.0, 1);
    }
}
