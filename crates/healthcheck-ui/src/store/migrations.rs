use super::StoreError;
use chrono::Utc;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i64 = 1;

/// Run schema migrations
pub(super) async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = current_version(conn).await?;
    if current_version >= SCHEMA_VERSION {
        tracing::debug!(version = current_version, "Status store schema is up to date");
        return Ok(());
    }

    tracing::info!(
        from = current_version,
        to = SCHEMA_VERSION,
        "Running status store migrations"
    );

    if current_version < 1 {
        migration_v1(conn).await?;
        record_migration(conn, 1, "Initial schema").await?;
    }

    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT MAX(version) FROM schema_migrations", ())
        .await?;

    match rows.next().await? {
        Some(row) => Ok(row.get::<Option<i64>>(0)?.unwrap_or(0)),
        None => Ok(0),
    }
}

async fn record_migration(conn: &Connection, version: i64, description: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?1, ?2, ?3)",
        libsql::params![version, Utc::now().timestamp(), description.to_string()],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Configurations, execution records with entries and history, notification log
async fn migration_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS configurations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            uri TEXT NOT NULL,
            discovery_service TEXT
        );

        CREATE TABLE IF NOT EXISTS executions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            status INTEGER NOT NULL,
            last_executed INTEGER NOT NULL,
            on_state_from INTEGER NOT NULL,
            uri TEXT NOT NULL,
            discovery_service TEXT
        );

        CREATE TABLE IF NOT EXISTS execution_entries (
            execution_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            status INTEGER NOT NULL,
            description TEXT,
            duration_micros INTEGER NOT NULL,
            tags TEXT NOT NULL,
            PRIMARY KEY (execution_id, name)
        );

        CREATE TABLE IF NOT EXISTS execution_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            execution_id INTEGER NOT NULL,
            on_time INTEGER NOT NULL,
            status INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_execution_history_execution
            ON execution_history (execution_id, id);

        CREATE TABLE IF NOT EXISTS failure_notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            health_check_name TEXT NOT NULL COLLATE NOCASE,
            last_notified INTEGER NOT NULL,
            is_up_and_running INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_failure_notifications_name
            ON failure_notifications (health_check_name, last_notified);",
    )
    .await?;

    Ok(())
}
