use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use stayql_core::config::DatasetConfig;
use stayql_core::domain::execution::{ExecutionResult, Row as ResultRow};
use stayql_core::ports::{AccessMode, ExecutionError, ExecutionProvider};
use tracing::debug;

use crate::connection::{connect_read_only, DbPool};

/// Runs validated SELECT statements against the SQLite dataset.
pub struct SqliteExecutionProvider {
    pool: DbPool,
    access_mode: AccessMode,
}

impl SqliteExecutionProvider {
    pub async fn connect(config: &DatasetConfig) -> Result<Self, ExecutionError> {
        let pool = connect_read_only(&config.url, config.max_connections, config.timeout_secs)
            .await
            .map_err(unavailable)?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, probing whether its connections are really read-only.
    pub async fn from_pool(pool: DbPool) -> Result<Self, ExecutionError> {
        let query_only: i64 = sqlx::query_scalar("PRAGMA query_only")
            .fetch_one(&pool)
            .await
            .map_err(unavailable)?;
        let access_mode = if query_only == 1 { AccessMode::ReadOnly } else { AccessMode::ReadWrite };
        Ok(Self { pool, access_mode })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ExecutionProvider for SqliteExecutionProvider {
    async fn execute_readonly(
        &self,
        sql: &str,
        row_limit: u32,
    ) -> Result<ExecutionResult, ExecutionError> {
        let statement = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        let limit = u64::from(row_limit.max(1));
        // One extra row tells us whether the limit cut anything off.
        let wrapped = format!("SELECT * FROM ({statement}) LIMIT {}", limit + 1);
        debug!(event_name = "dataset.query", sql = %wrapped, "executing dataset query");

        let mut rows = sqlx::query(&wrapped).fetch_all(&self.pool).await.map_err(classify)?;
        let truncated = rows.len() as u64 > limit;
        rows.truncate(limit as usize);

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|column| column.name().to_owned()).collect(),
            None => self
                .pool
                .describe(&wrapped)
                .await
                .map(|described| {
                    described.columns().iter().map(|column| column.name().to_owned()).collect()
                })
                .unwrap_or_default(),
        };

        let decoded = rows.iter().map(decode_row).collect::<Vec<_>>();
        Ok(ExecutionResult::new(columns, decoded, truncated))
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
}

fn decode_row(row: &SqliteRow) -> ResultRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| (column.name().to_owned(), decode_value(row, index)))
        .collect()
}

fn decode_value(row: &SqliteRow, index: usize) -> Value {
    let storage_class = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_owned(),
        Err(_) => return Value::Null,
    };

    match storage_class.as_str() {
        "INTEGER" => row
            .try_get_unchecked::<i64, _>(index)
            .map(|value| Value::Number(value.into()))
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get_unchecked::<f64, _>(index)
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn classify(error: sqlx::Error) -> ExecutionError {
    match error {
        sqlx::Error::Database(database) => {
            ExecutionError::Query { message: database.message().to_owned() }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::WorkerCrashed => unavailable(error),
        other => ExecutionError::Query { message: other.to_string() },
    }
}

fn unavailable(error: sqlx::Error) -> ExecutionError {
    ExecutionError::Unavailable { message: error.to_string() }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stayql_core::config::AppConfig;
    use stayql_core::ports::{AccessMode, ExecutionError, ExecutionProvider};

    use super::SqliteExecutionProvider;
    use crate::fixtures::DemoDataset;
    use crate::{connect_with_settings, migrations::run_pending};

    async fn seeded_provider() -> (tempfile::TempDir, SqliteExecutionProvider) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("dataset.db").display());

        let pool = connect_with_settings(&url, 1, 5).await.expect("writable pool");
        run_pending(&pool).await.expect("migrate");
        DemoDataset::load(&pool).await.expect("seed");
        pool.close().await;

        let mut config = AppConfig::default().dataset;
        config.url = url;
        let provider = SqliteExecutionProvider::connect(&config).await.expect("provider");
        (dir, provider)
    }

    #[tokio::test]
    async fn aggregate_query_decodes_real_values() {
        let (_dir, provider) = seeded_provider().await;
        assert_eq!(provider.access_mode(), AccessMode::ReadOnly);

        let result = provider
            .execute_readonly(
                "SELECT AVG(guest_count) AS avg_guests, COUNT(*) AS total FROM reservations WHERE strftime('%Y', created_at) = '2025' AND CAST(strftime('%m', created_at) AS INTEGER) IN (1, 2, 3);",
                500,
            )
            .await
            .expect("query runs");

        assert_eq!(result.columns, vec!["avg_guests".to_owned(), "total".to_owned()]);
        assert_eq!(result.row_count, 1);
        assert!(!result.truncated);
        assert_eq!(result.rows[0]["avg_guests"], json!(2.5));
        assert_eq!(result.rows[0]["total"], json!(12));
    }

    #[tokio::test]
    async fn row_limit_truncates_and_flags() {
        let (_dir, provider) = seeded_provider().await;

        let result = provider
            .execute_readonly("SELECT review_id, cleaniness_rating FROM reviews ORDER BY review_id", 5)
            .await
            .expect("query runs");

        assert_eq!(result.row_count, 5);
        assert!(result.truncated);
        assert_eq!(result.rows[0]["review_id"], json!("900001"));
    }

    #[tokio::test]
    async fn empty_result_keeps_column_names() {
        let (_dir, provider) = seeded_provider().await;

        let result = provider
            .execute_readonly("SELECT listing_id FROM reservations WHERE created_at < '1990-01-01'", 10)
            .await
            .expect("query runs");

        assert!(result.is_empty());
        assert_eq!(result.columns, vec!["listing_id".to_owned()]);
    }

    #[tokio::test]
    async fn unknown_column_is_a_recoverable_query_error() {
        let (_dir, provider) = seeded_provider().await;

        let error = provider
            .execute_readonly("SELECT cleanliness_rating FROM reviews", 10)
            .await
            .expect_err("unknown column");

        assert!(matches!(&error, ExecutionError::Query { message } if message.contains("no such column")));
        assert!(error.is_recoverable());
    }

    #[tokio::test]
    async fn writable_pool_reports_read_write_mode() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        let provider = SqliteExecutionProvider::from_pool(pool).await.expect("provider");

        assert_eq!(provider.access_mode(), AccessMode::ReadWrite);
    }
}
