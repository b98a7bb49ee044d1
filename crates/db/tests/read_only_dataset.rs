use stayql_core::config::AppConfig;
use stayql_core::ports::{ExecutionError, ExecutionProvider};
use stayql_db::migrations::run_pending;
use stayql_db::{connect_with_settings, DemoDataset, SqliteExecutionProvider};

async fn seeded_dataset() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("stayql.db").display());

    let pool = connect_with_settings(&url, 1, 5).await.expect("writable pool");
    run_pending(&pool).await.expect("migrate");
    DemoDataset::load(&pool).await.expect("seed");
    pool.close().await;

    (dir, url)
}

async fn provider_for(url: &str) -> SqliteExecutionProvider {
    let mut config = AppConfig::default().dataset;
    config.url = url.to_owned();
    SqliteExecutionProvider::connect(&config).await.expect("provider")
}

#[tokio::test]
async fn writes_fail_even_when_smuggled_inside_a_select() {
    let (_dir, url) = seeded_dataset().await;
    let provider = provider_for(&url).await;

    let error = provider
        .execute_readonly("SELECT 1; DELETE FROM reservations", 10)
        .await
        .expect_err("stacked delete must not run");
    assert!(matches!(error, ExecutionError::Query { .. }));

    let count = provider
        .execute_readonly("SELECT COUNT(*) AS total FROM reservations", 10)
        .await
        .expect("count");
    assert_eq!(count.rows[0]["total"], serde_json::json!(96));
}

#[tokio::test]
async fn common_table_expressions_run_through_the_row_cap_wrapper() {
    let (_dir, url) = seeded_dataset().await;
    let provider = provider_for(&url).await;

    let result = provider
        .execute_readonly(
            "WITH monthly AS (SELECT strftime('%m', created_at) AS month, COUNT(*) AS bookings FROM reservations WHERE strftime('%Y', created_at) = '2025' GROUP BY month) SELECT month, bookings FROM monthly ORDER BY month",
            500,
        )
        .await
        .expect("cte runs");

    assert_eq!(result.row_count, 12);
    assert_eq!(result.rows[0]["month"], serde_json::json!("01"));
    assert_eq!(result.rows[0]["bookings"], serde_json::json!(4));
}

#[tokio::test]
async fn missing_dataset_is_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AppConfig::default().dataset;
    config.url = format!("sqlite://{}", dir.path().join("absent.db").display());
    config.timeout_secs = 1;

    let error = SqliteExecutionProvider::connect(&config).await.err().expect("connect fails");
    assert!(matches!(error, ExecutionError::Unavailable { .. }));
}
