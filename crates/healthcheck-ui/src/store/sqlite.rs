use super::migrations::run_migrations;
use super::{StatusStore, StoreError, SyncSummary};
use crate::types::{
    EndpointConfiguration, ExecutionEntry, ExecutionRecord, FailureNotification, HistoryEntry, NewEndpoint,
};
use crate::uri::{EndpointSecrets, redact};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthcheck::HealthStatus;
use libsql::{Builder, Connection, Database, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// SQLite status store backed by `libsql`.
///
/// A single connection is shared behind a mutex; every multi-statement write
/// runs inside one transaction. Credentials only live in `secrets`, so a
/// reopened database knows none until endpoints are synced or upserted again.
pub struct SqliteStore {
    _db: Database,
    conn: Mutex<Connection>,
    secrets: Arc<EndpointSecrets>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Builder::new_local(path.as_ref()).build().await?;
        let conn = db.connect()?;
        run_migrations(&conn).await?;

        Ok(Self {
            _db: db,
            conn: Mutex::new(conn),
            secrets: Arc::new(EndpointSecrets::new()),
        })
    }
}

fn status_from(ordinal: i64) -> Result<HealthStatus, StoreError> {
    HealthStatus::from_ordinal(ordinal)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown status ordinal {ordinal}")))
}

fn time_to_db(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

fn time_from_db(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {micros}")))
}

fn duration_to_db(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

fn duration_from_db(micros: i64) -> Duration {
    Duration::from_micros(u64::try_from(micros).unwrap_or(0))
}

async fn query_configurations(conn: &Connection) -> Result<Vec<EndpointConfiguration>, StoreError> {
    let mut rows = conn
        .query(
            "SELECT id, name, uri, discovery_service FROM configurations ORDER BY id",
            (),
        )
        .await?;

    let mut configs = Vec::new();
    while let Some(row) = rows.next().await? {
        configs.push(EndpointConfiguration {
            id: row.get(0)?,
            name: row.get(1)?,
            uri: row.get(2)?,
            discovery_service: row.get::<Option<String>>(3)?,
        });
    }
    Ok(configs)
}

async fn query_configuration(conn: &Connection, name: &str) -> Result<Option<EndpointConfiguration>, StoreError> {
    let mut rows = conn
        .query(
            "SELECT id, name, uri, discovery_service FROM configurations WHERE name = ?1",
            params![name.to_string()],
        )
        .await?;

    match rows.next().await? {
        Some(row) => Ok(Some(EndpointConfiguration {
            id: row.get(0)?,
            name: row.get(1)?,
            uri: row.get(2)?,
            discovery_service: row.get::<Option<String>>(3)?,
        })),
        None => Ok(None),
    }
}

async fn execution_id(conn: &Connection, name: &str) -> Result<Option<i64>, StoreError> {
    let mut rows = conn
        .query(
            "SELECT id FROM executions WHERE name = ?1",
            params![name.to_string()],
        )
        .await?;

    match rows.next().await? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

async fn delete_execution(conn: &Connection, name: &str) -> Result<(), StoreError> {
    let Some(id) = execution_id(conn, name).await? else {
        return Ok(());
    };

    conn.execute("DELETE FROM execution_entries WHERE execution_id = ?1", params![id])
        .await?;
    conn.execute("DELETE FROM execution_history WHERE execution_id = ?1", params![id])
        .await?;
    conn.execute("DELETE FROM executions WHERE id = ?1", params![id])
        .await?;
    Ok(())
}

async fn load_execution(conn: &Connection, name: &str) -> Result<Option<ExecutionRecord>, StoreError> {
    let mut rows = conn
        .query(
            "SELECT id, name, status, last_executed, on_state_from, uri, discovery_service
             FROM executions WHERE name = ?1",
            params![name.to_string()],
        )
        .await?;

    let Some(row) = rows.next().await? else {
        return Ok(None);
    };

    let id: i64 = row.get(0)?;
    let mut record = ExecutionRecord {
        name: row.get(1)?,
        status: status_from(row.get(2)?)?,
        last_executed: time_from_db(row.get(3)?)?,
        on_state_from: time_from_db(row.get(4)?)?,
        uri: row.get(5)?,
        discovery_service: row.get::<Option<String>>(6)?,
        entries: Vec::new(),
        history: Vec::new(),
    };
    drop(rows);

    let mut rows = conn
        .query(
            "SELECT name, status, description, duration_micros, tags
             FROM execution_entries WHERE execution_id = ?1 ORDER BY position",
            params![id],
        )
        .await?;
    while let Some(row) = rows.next().await? {
        let tags: String = row.get(4)?;
        record.entries.push(ExecutionEntry {
            name: row.get(0)?,
            status: status_from(row.get(1)?)?,
            description: row.get::<Option<String>>(2)?,
            duration: duration_from_db(row.get(3)?),
            tags: serde_json::from_str(&tags)?,
        });
    }
    drop(rows);

    let mut rows = conn
        .query(
            "SELECT on_time, status, name, description
             FROM execution_history WHERE execution_id = ?1 ORDER BY id",
            params![id],
        )
        .await?;
    while let Some(row) = rows.next().await? {
        record.history.push(HistoryEntry {
            on: time_from_db(row.get(0)?)?,
            status: status_from(row.get(1)?)?,
            name: row.get(2)?,
            description: row.get::<Option<String>>(3)?,
        });
    }

    Ok(Some(record))
}

#[async_trait]
impl StatusStore for SqliteStore {
    async fn list_configurations(&self) -> Result<Vec<EndpointConfiguration>, StoreError> {
        let conn = self.conn.lock().await;
        query_configurations(&conn).await
    }

    async fn sync_configurations(&self, configured: &[NewEndpoint]) -> Result<SyncSummary, StoreError> {
        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;
        let mut summary = SyncSummary::default();
        let mut forgotten = Vec::new();

        let existing = query_configurations(&tx).await?;
        let wanted: HashSet<String> = configured.iter().map(|e| e.name.to_ascii_lowercase()).collect();

        for stale in existing
            .iter()
            .filter(|c| c.is_static() && !wanted.contains(&c.name.to_ascii_lowercase()))
        {
            info!(name = %stale.name, "Removing endpoint no longer configured");
            delete_execution(&tx, &stale.name).await?;
            tx.execute("DELETE FROM configurations WHERE id = ?1", params![stale.id])
                .await?;
            forgotten.push(stale.name.as_str());
            summary.removed += 1;
        }

        for endpoint in configured {
            let redacted = redact(&endpoint.uri);
            match existing.iter().find(|c| c.name.eq_ignore_ascii_case(&endpoint.name)) {
                Some(current) if current.uri != redacted => {
                    debug!(name = %current.name, "Updating endpoint uri");
                    tx.execute(
                        "UPDATE configurations SET uri = ?1 WHERE id = ?2",
                        params![redacted, current.id],
                    )
                    .await?;
                    summary.updated += 1;
                }
                Some(_) => {}
                None => {
                    info!(name = %endpoint.name, "Adding endpoint");
                    tx.execute(
                        "INSERT INTO configurations (name, uri, discovery_service) VALUES (?1, ?2, NULL)",
                        params![endpoint.name.clone(), redacted],
                    )
                    .await?;
                    summary.added += 1;
                }
            }
        }

        tx.commit().await?;

        for name in forgotten {
            self.secrets.forget(name);
        }
        for endpoint in configured {
            self.secrets.register(&endpoint.name, &endpoint.uri);
        }
        Ok(summary)
    }

    async fn upsert_configuration(&self, endpoint: NewEndpoint) -> Result<EndpointConfiguration, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO configurations (name, uri, discovery_service) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET uri = excluded.uri, discovery_service = excluded.discovery_service",
            params![
                endpoint.name.clone(),
                redact(&endpoint.uri),
                endpoint.discovery_service.clone()
            ],
        )
        .await?;
        self.secrets.register(&endpoint.name, &endpoint.uri);

        query_configuration(&conn, &endpoint.name)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("configuration '{}' missing after upsert", endpoint.name)))
    }

    async fn remove_configuration(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;

        let Some(config) = query_configuration(&tx, name).await? else {
            return Ok(false);
        };
        delete_execution(&tx, &config.name).await?;
        tx.execute("DELETE FROM configurations WHERE id = ?1", params![config.id])
            .await?;

        tx.commit().await?;
        self.secrets.forget(name);
        Ok(true)
    }

    async fn get_execution(&self, name: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        let conn = self.conn.lock().await;
        load_execution(&conn, name).await
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;

        tx.execute(
            "INSERT INTO executions (name, status, last_executed, on_state_from, uri, discovery_service)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                status = excluded.status,
                last_executed = excluded.last_executed,
                on_state_from = excluded.on_state_from,
                uri = excluded.uri,
                discovery_service = excluded.discovery_service",
            params![
                record.name.clone(),
                record.status.ordinal(),
                time_to_db(record.last_executed),
                time_to_db(record.on_state_from),
                redact(&record.uri),
                record.discovery_service.clone()
            ],
        )
        .await?;

        let id = execution_id(&tx, &record.name)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("execution '{}' missing after upsert", record.name)))?;

        tx.execute("DELETE FROM execution_entries WHERE execution_id = ?1", params![id])
            .await?;
        for (position, entry) in record.entries.iter().enumerate() {
            tx.execute(
                "INSERT INTO execution_entries (execution_id, position, name, status, description, duration_micros, tags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    position as i64,
                    entry.name.clone(),
                    entry.status.ordinal(),
                    entry.description.clone(),
                    duration_to_db(entry.duration),
                    serde_json::to_string(&entry.tags)?
                ],
            )
            .await?;
        }

        // History is append-only: only rows beyond what is stored are new.
        let mut rows = tx
            .query(
                "SELECT COUNT(*) FROM execution_history WHERE execution_id = ?1",
                params![id],
            )
            .await?;
        let stored = match rows.next().await? {
            Some(row) => usize::try_from(row.get::<i64>(0)?).unwrap_or(0),
            None => 0,
        };
        drop(rows);

        for history in record.history.iter().skip(stored) {
            tx.execute(
                "INSERT INTO execution_history (execution_id, on_time, status, name, description)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    time_to_db(history.on),
                    history.status.ordinal(),
                    history.name.clone(),
                    history.description.clone()
                ],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_executions(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let conn = self.conn.lock().await;

        let mut rows = conn.query("SELECT name FROM executions ORDER BY name", ()).await?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            names.push(row.get::<String>(0)?);
        }
        drop(rows);

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            if let Some(record) = load_execution(&conn, &name).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn last_notification(&self, name: &str) -> Result<Option<FailureNotification>, StoreError> {
        Ok(self.recent_notifications(name, 1).await?.into_iter().next())
    }

    async fn recent_notifications(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<FailureNotification>, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT health_check_name, last_notified, is_up_and_running
                 FROM failure_notifications WHERE health_check_name = ?1
                 ORDER BY last_notified DESC, id DESC LIMIT ?2",
                params![name.to_string(), i64::try_from(limit).unwrap_or(i64::MAX)],
            )
            .await?;

        let mut notifications = Vec::new();
        while let Some(row) = rows.next().await? {
            notifications.push(FailureNotification {
                health_check_name: row.get(0)?,
                last_notified: time_from_db(row.get(1)?)?,
                is_up_and_running: row.get::<i64>(2)? != 0,
            });
        }
        Ok(notifications)
    }

    async fn record_notification(&self, notification: &FailureNotification) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO failure_notifications (health_check_name, last_notified, is_up_and_running)
             VALUES (?1, ?2, ?3)",
            params![
                notification.health_check_name.clone(),
                time_to_db(notification.last_notified),
                i64::from(notification.is_up_and_running)
            ],
        )
        .await?;
        Ok(())
    }

    fn secrets(&self) -> Arc<EndpointSecrets> {
        self.secrets.clone()
    }
}
