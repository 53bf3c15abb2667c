//! Schema migrations.

use super::StoreError;

/// Applies the embedded migrations to the pool's database.
#[cfg(feature = "database")]
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<(), StoreError> {
    use tracing::info;

    info!("Running SQLite migrations");
    sqlx::migrate!("src/db/migrations").run(pool).await?;
    info!("Migrations completed successfully");
    Ok(())
}

#[cfg(all(test, feature = "database"))]
mod tests {
    use super::*;
    use crate::db::create_pool;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '_sqlx%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec!["alert_index", "incident_events", "remediation_index"]
        );
    }
}
