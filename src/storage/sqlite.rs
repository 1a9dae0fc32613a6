//! SQLite store
//!
//! ## Features
//!
//! - **Embedded**: no separate database server required
//! - **WAL mode**: readers (reports, API) do not block the recorder
//! - **Migrations**: schema versioned with `sqlx::migrate!`
//!
//! Timestamps are stored as unix milliseconds. Thresholds and alert events keep
//! their enum fields as the same strings the configuration file uses.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{MonitoringStore, StoreHealth, StoredReport};
use super::error::{StorageError, StorageResult};
use crate::model::{
    AlertEvent, AlertThreshold, Client, ClientSystem, HealthSample, MetricsSample, MetricsWindow,
    Sample, ThresholdScope,
};

/// SQLite-backed [`MonitoringStore`]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();

        info!("opening SQLite store at: {db_path}");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("SQLite store ready");

        Ok(Self { pool, db_path })
    }

    fn to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| StorageError::Serialization(format!("timestamp {millis} out of range")))
    }

    fn parse<T: std::str::FromStr>(column: &str, value: &str) -> StorageResult<T>
    where
        T::Err: std::fmt::Display,
    {
        value
            .parse()
            .map_err(|e| StorageError::Serialization(format!("{column} '{value}': {e}")))
    }

    fn health_from_row(row: &SqliteRow) -> StorageResult<HealthSample> {
        let status: String = row.try_get("status")?;
        Ok(HealthSample {
            client_id: row.try_get("client_id")?,
            system_name: row.try_get("system_name")?,
            timestamp: Self::from_millis(row.try_get("timestamp")?)?,
            status: Self::parse("status", &status)?,
            latency_ms: row.try_get("latency_ms")?,
            error: row.try_get("error")?,
        })
    }

    fn metrics_from_row(row: &SqliteRow) -> StorageResult<MetricsSample> {
        Ok(MetricsSample {
            client_id: row.try_get("client_id")?,
            system_name: row.try_get("system_name")?,
            window: MetricsWindow::new(
                Self::from_millis(row.try_get("window_start")?)?,
                Self::from_millis(row.try_get("window_end")?)?,
            ),
            total_automations: row.try_get::<i64, _>("total_automations")?.max(0) as u64,
            successful_automations: row.try_get::<i64, _>("successful_automations")?.max(0) as u64,
            failed_automations: row.try_get::<i64, _>("failed_automations")?.max(0) as u64,
            processing_time_sum: row.try_get("processing_time_sum")?,
            cost_savings: row.try_get("cost_savings")?,
        })
    }

    fn threshold_from_row(row: &SqliteRow) -> StorageResult<AlertThreshold> {
        let scope: String = row.try_get("scope")?;
        let metric: String = row.try_get("metric")?;
        let comparison: String = row.try_get("comparison")?;
        let channel: String = row.try_get("channel")?;

        Ok(AlertThreshold {
            id: row.try_get::<i64, _>("id")? as u64,
            scope: ThresholdScope::parse(&scope)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            metric: Self::parse("metric", &metric)?,
            comparison: Self::parse("comparison", &comparison)?,
            value: row.try_get("value")?,
            channel: Self::parse("channel", &channel)?,
            suppression_window: Duration::from_secs(
                row.try_get::<i64, _>("suppression_secs")?.max(0) as u64,
            ),
            active: row.try_get("active")?,
        })
    }
}

#[async_trait]
impl MonitoringStore for SqliteStore {
    async fn append_health_sample(&self, sample: &HealthSample) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO health_samples (client_id, system_name, timestamp, status, latency_ms, error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sample.client_id)
        .bind(&sample.system_name)
        .bind(Self::to_millis(&sample.timestamp))
        .bind(sample.status.as_str())
        .bind(sample.latency_ms)
        .bind(&sample.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_metrics_sample(&self, sample: &MetricsSample) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics_samples (
                client_id, system_name, window_start, window_end,
                total_automations, successful_automations, failed_automations,
                processing_time_sum, cost_savings
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (client_id, system_name, window_start) DO UPDATE SET
                window_end = excluded.window_end,
                total_automations = excluded.total_automations,
                successful_automations = excluded.successful_automations,
                failed_automations = excluded.failed_automations,
                processing_time_sum = excluded.processing_time_sum,
                cost_savings = excluded.cost_savings
            "#,
        )
        .bind(&sample.client_id)
        .bind(&sample.system_name)
        .bind(Self::to_millis(&sample.window.start))
        .bind(Self::to_millis(&sample.window.end))
        .bind(sample.total_automations as i64)
        .bind(sample.successful_automations as i64)
        .bind(sample.failed_automations as i64)
        .bind(sample.processing_time_sum)
        .bind(sample.cost_savings)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_samples_in_range(
        &self,
        client_id: &str,
        range: MetricsWindow,
    ) -> StorageResult<Vec<Sample>> {
        let start = Self::to_millis(&range.start);
        let end = Self::to_millis(&range.end);

        let health_rows = sqlx::query(
            r#"
            SELECT client_id, system_name, timestamp, status, latency_ms, error
            FROM health_samples
            WHERE client_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(client_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let metrics_rows = sqlx::query(
            r#"
            SELECT client_id, system_name, window_start, window_end, total_automations,
                   successful_automations, failed_automations, processing_time_sum, cost_savings
            FROM metrics_samples
            WHERE client_id = ? AND window_start >= ? AND window_start < ?
            ORDER BY window_start ASC
            "#,
        )
        .bind(client_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut samples = Vec::with_capacity(health_rows.len() + metrics_rows.len());
        for row in &health_rows {
            let sample = Self::health_from_row(row)?;
            samples.push((sample.timestamp, Sample::Health(sample)));
        }
        for row in &metrics_rows {
            let sample = Self::metrics_from_row(row)?;
            samples.push((sample.window.start, Sample::Metrics(sample)));
        }
        samples.sort_by_key(|(ts, _)| *ts);

        debug!("query returned {} samples", samples.len());
        Ok(samples.into_iter().map(|(_, s)| s).collect())
    }

    async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        let rows = sqlx::query(
            "SELECT client_id, name, industry, contact_email, active FROM clients ORDER BY client_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Client {
                    client_id: row.try_get("client_id")?,
                    name: row.try_get("name")?,
                    industry: row.try_get("industry")?,
                    contact_email: row.try_get("contact_email")?,
                    active: row.try_get("active")?,
                })
            })
            .collect()
    }

    async fn list_systems(&self, client_id: &str) -> StorageResult<Vec<ClientSystem>> {
        let rows = sqlx::query(
            r#"
            SELECT client_id, system_name, endpoint, interval_secs, timeout_secs, retries
            FROM client_systems
            WHERE client_id = ?
            ORDER BY system_name
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ClientSystem {
                    client_id: row.try_get("client_id")?,
                    system_name: row.try_get("system_name")?,
                    endpoint: row.try_get("endpoint")?,
                    interval: Duration::from_secs(row.try_get::<i64, _>("interval_secs")?.max(1) as u64),
                    timeout: Duration::from_secs(row.try_get::<i64, _>("timeout_secs")?.max(1) as u64),
                    retries: row.try_get::<i64, _>("retries")?.max(0) as u32,
                })
            })
            .collect()
    }

    async fn list_thresholds(&self) -> StorageResult<Vec<AlertThreshold>> {
        let rows = sqlx::query(
            r#"
            SELECT id, scope, metric, comparison, value, channel, suppression_secs, active
            FROM thresholds
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::threshold_from_row).collect()
    }

    async fn record_alert_event(&self, event: &AlertEvent) -> StorageResult<()> {
        let threshold = serde_json::to_string(&event.threshold)?;

        sqlx::query(
            r#"
            INSERT INTO alert_events (client_id, threshold_id, metric, observed, timestamp, threshold)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.client_id)
        .bind(event.threshold.id as i64)
        .bind(event.threshold.metric.as_str())
        .bind(event.observed)
        .bind(Self::to_millis(&event.timestamp))
        .bind(threshold)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_alert_events(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<AlertEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT client_id, observed, timestamp, threshold
            FROM alert_events
            WHERE client_id = ? AND timestamp >= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(client_id)
        .bind(Self::to_millis(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let threshold: String = row.try_get("threshold")?;
                Ok(AlertEvent {
                    threshold: serde_json::from_str(&threshold)?,
                    client_id: row.try_get("client_id")?,
                    observed: row.try_get("observed")?,
                    timestamp: Self::from_millis(row.try_get("timestamp")?)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, client, systems), fields(client = %client.client_id))]
    async fn save_client(&self, client: &Client, systems: &[ClientSystem]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO clients (client_id, name, industry, contact_email, active, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (client_id) DO UPDATE SET
                name = excluded.name,
                industry = excluded.industry,
                contact_email = excluded.contact_email,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&client.client_id)
        .bind(&client.name)
        .bind(&client.industry)
        .bind(&client.contact_email)
        .bind(client.active)
        .bind(Self::to_millis(&Utc::now()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM client_systems WHERE client_id = ?")
            .bind(&client.client_id)
            .execute(&mut *tx)
            .await?;

        for system in systems {
            sqlx::query(
                r#"
                INSERT INTO client_systems (client_id, system_name, endpoint, interval_secs, timeout_secs, retries)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&system.client_id)
            .bind(&system.system_name)
            .bind(&system.endpoint)
            .bind(system.interval.as_secs() as i64)
            .bind(system.timeout.as_secs() as i64)
            .bind(system.retries as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("saved client with {} systems", systems.len());
        Ok(())
    }

    async fn remove_client(&self, client_id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM clients WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("client {client_id}")));
        }
        Ok(())
    }

    async fn save_threshold(&self, threshold: &AlertThreshold) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO thresholds (id, scope, metric, comparison, value, channel, suppression_secs, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                scope = excluded.scope,
                metric = excluded.metric,
                comparison = excluded.comparison,
                value = excluded.value,
                channel = excluded.channel,
                suppression_secs = excluded.suppression_secs,
                active = excluded.active
            "#,
        )
        .bind(threshold.id as i64)
        .bind(threshold.scope.to_string())
        .bind(threshold.metric.as_str())
        .bind(threshold.comparison.as_str())
        .bind(threshold.value)
        .bind(threshold.channel.as_str())
        .bind(threshold.suppression_window.as_secs() as i64)
        .bind(threshold.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_report(&self, report: &StoredReport) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO reports (client_id, report_type, generated_at, document) VALUES (?, ?, ?, ?)",
        )
        .bind(&report.client_id)
        .bind(&report.report_type)
        .bind(Self::to_millis(&report.generated_at))
        .bind(serde_json::to_string(&report.document)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before = Self::to_millis(&before);
        let mut tx = self.pool.begin().await?;

        let mut deleted = 0;
        for sql in [
            "DELETE FROM health_samples WHERE timestamp < ?",
            "DELETE FROM metrics_samples WHERE window_start < ?",
            "DELETE FROM alert_events WHERE timestamp < ?",
        ] {
            deleted += sqlx::query(sql)
                .bind(before)
                .execute(&mut *tx)
                .await?
                .rows_affected() as usize;
        }

        tx.commit().await?;
        info!("deleted {deleted} rows past retention");
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<StoreHealth> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(StoreHealth {
                healthy: true,
                message: "SQLite store operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {e}");
                Ok(StoreHealth {
                    healthy: false,
                    message: format!("health check failed: {e}"),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
