//! `PostgreSQL` implementation of the `EventStore` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use herald_core::clock::{Clock, SystemClock};
use herald_core::error::EventError;
use herald_core::event::{DomainEvent, ProcessingStatus, StoredEvent};
use herald_core::status::{Health, StatusCounts};
use herald_core::store::{
    AppendAck, EventFilter, EventStore, HandlerOutcomeRecord, HandlerRecordStatus,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::schema::CREATE_EVENT_TABLES;

macro_rules! select_events {
    ($tail:literal) => {
        concat!(
            "SELECT position, event_id, aggregate_id, event_type, event_data, schema_version, ",
            "caused_by, processing_status, occurred_at, recorded_at FROM domain_events ",
            $tail
        )
    };
}

/// PostgreSQL-backed event store.
///
/// Timestamps are truncated to microseconds before they are written so that
/// what a caller holds compares equal to what the table returns.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PgEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgEventStore")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl PgEventStore {
    /// Creates a new `PgEventStore` stamping `recorded_at` from the system clock.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Creates a new `PgEventStore` with an explicit clock.
    #[must_use]
    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the event tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Persistence` if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), EventError> {
        sqlx::raw_sql(CREATE_EVENT_TABLES)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn fetch_events(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<DomainEvent>, EventError> {
        let rows = query.fetch_all(&self.pool).await.map_err(persistence)?;
        rows.iter()
            .map(|row| stored_from_row(row).map(DomainEvent::from).map_err(persistence))
            .collect()
    }

    async fn ensure_exists(&self, event_id: Uuid) -> Result<(), EventError> {
        let found = sqlx::query("SELECT 1 FROM domain_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        found.map(|_| ()).ok_or(EventError::EventNotFound(event_id))
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip_all, fields(event_id = %event.event_id(), event_type = %event.event_type()))]
    async fn append(&self, event: DomainEvent) -> Result<AppendAck, EventError> {
        event.validate()?;
        let occurred_at = event.occurred_at().trunc_subsecs(6);
        let recorded_at = self.clock.now().trunc_subsecs(6).max(occurred_at);

        let inserted = sqlx::query(
            r"
            INSERT INTO domain_events
                (event_id, aggregate_id, event_type, event_data, schema_version,
                 caused_by, processing_status, occurred_at, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)
            ON CONFLICT (event_id) DO NOTHING
            RETURNING position, recorded_at
            ",
        )
        .bind(event.event_id())
        .bind(event.aggregate_id())
        .bind(event.event_type())
        .bind(serde_json::Value::Object(event.event_data().clone()))
        .bind(event.schema_version())
        .bind(event.caused_by())
        .bind(occurred_at)
        .bind(recorded_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;

        let (row, duplicate) = match inserted {
            Some(row) => (row, false),
            None => {
                debug!("duplicate append ignored");
                let row = sqlx::query(
                    "SELECT position, recorded_at FROM domain_events WHERE event_id = $1",
                )
                .bind(event.event_id())
                .fetch_one(&self.pool)
                .await
                .map_err(persistence)?;
                (row, true)
            }
        };

        Ok(AppendAck {
            event_id: event.event_id(),
            position: row.try_get("position").map_err(persistence)?,
            recorded_at: row.try_get("recorded_at").map_err(persistence)?,
            duplicate,
        })
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<DomainEvent>, EventError> {
        let row = sqlx::query(select_events!("WHERE event_id = $1"))
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.map(|r| stored_from_row(&r).map(DomainEvent::from).map_err(persistence))
            .transpose()
    }

    async fn get_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, EventError> {
        self.fetch_events(
            sqlx::query(select_events!("WHERE aggregate_id = $1 ORDER BY position ASC"))
                .bind(aggregate_id),
        )
        .await
    }

    async fn get_by_type(
        &self,
        event_type: &str,
        limit: usize,
    ) -> Result<Vec<DomainEvent>, EventError> {
        self.fetch_events(
            sqlx::query(select_events!(
                "WHERE event_type = $1 ORDER BY position ASC LIMIT $2"
            ))
            .bind(event_type)
            .bind(sql_limit(limit)),
        )
        .await
    }

    async fn get_unprocessed(&self, limit: usize) -> Result<Vec<DomainEvent>, EventError> {
        self.fetch_events(
            sqlx::query(select_events!(
                "WHERE processing_status <> 'dispatched' ORDER BY position ASC LIMIT $1"
            ))
            .bind(sql_limit(limit)),
        )
        .await
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<DomainEvent>, EventError> {
        self.fetch_events(
            sqlx::query(select_events!(
                r"
                WHERE ($1::text IS NULL OR event_type = $1)
                  AND ($2::text IS NULL OR aggregate_id = $2)
                  AND ($3::timestamptz IS NULL OR recorded_at >= $3)
                  AND ($4::timestamptz IS NULL OR recorded_at < $4)
                  AND ($5::bigint IS NULL OR position > $5)
                ORDER BY position ASC
                LIMIT $6
                "
            ))
            .bind(filter.event_type.as_deref())
            .bind(filter.aggregate_id.as_deref())
            .bind(filter.since)
            .bind(filter.until)
            .bind(filter.after_position)
            .bind(sql_limit(filter.limit)),
        )
        .await
    }

    async fn mark_processed(&self, event_id: Uuid, handler_id: &str) -> Result<(), EventError> {
        self.ensure_exists(event_id).await?;
        let now = self.clock.now().trunc_subsecs(6);
        sqlx::query(
            r"
            INSERT INTO event_handler_outcomes
                (event_id, handler_id, status, reason, processed_at, updated_at)
            VALUES ($1, $2, 'processed', NULL, $3, $3)
            ON CONFLICT (event_id, handler_id) DO UPDATE
               SET status = EXCLUDED.status,
                   reason = NULL,
                   processed_at = EXCLUDED.processed_at,
                   updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(event_id)
        .bind(handler_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        handler_id: &str,
        reason: &str,
    ) -> Result<(), EventError> {
        let now = self.clock.now().trunc_subsecs(6);
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let updated = sqlx::query(
            "UPDATE domain_events SET processing_status = 'failed' WHERE event_id = $1",
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;
        if updated.rows_affected() == 0 {
            return Err(EventError::EventNotFound(event_id));
        }

        sqlx::query(
            r"
            INSERT INTO event_handler_outcomes
                (event_id, handler_id, status, reason, processed_at, updated_at)
            VALUES ($1, $2, 'failed', $3, NULL, $4)
            ON CONFLICT (event_id, handler_id) DO UPDATE
               SET status = EXCLUDED.status,
                   reason = EXCLUDED.reason,
                   updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(event_id)
        .bind(handler_id)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;

        tx.commit().await.map_err(persistence)
    }

    async fn set_status(&self, event_id: Uuid, status: ProcessingStatus) -> Result<(), EventError> {
        let updated =
            sqlx::query("UPDATE domain_events SET processing_status = $2 WHERE event_id = $1")
                .bind(event_id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(persistence)?;
        if updated.rows_affected() == 0 {
            return Err(EventError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn handler_outcomes(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<HandlerOutcomeRecord>, EventError> {
        let rows = sqlx::query(
            r"
            SELECT event_id, handler_id, status, reason, processed_at, updated_at
            FROM event_handler_outcomes
            WHERE event_id = $1
            ORDER BY handler_id ASC
            ",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        rows.iter()
            .map(|row| outcome_from_row(row).map_err(persistence))
            .collect()
    }

    async fn status_counts(&self) -> Result<StatusCounts, EventError> {
        let rows = sqlx::query(
            "SELECT processing_status, COUNT(*) AS n FROM domain_events GROUP BY processing_status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("processing_status").map_err(persistence)?;
            let n: i64 = row.try_get("n").map_err(persistence)?;
            let n = u64::try_from(n).unwrap_or_default();
            match status.parse::<ProcessingStatus>()? {
                ProcessingStatus::Pending => counts.pending += n,
                ProcessingStatus::Dispatched => counts.dispatched += n,
                ProcessingStatus::Failed => counts.failed += n,
            }
        }
        Ok(counts)
    }

    async fn health_check(&self) -> Health {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Health::Healthy,
            Err(e) => Health::Unhealthy(e.to_string()),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn persistence(e: sqlx::Error) -> EventError {
    EventError::Persistence(e.to_string())
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn decode_error(e: EventError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn stored_from_row(row: &PgRow) -> Result<StoredEvent, sqlx::Error> {
    let event_data = match row.try_get::<serde_json::Value, _>("event_data")? {
        serde_json::Value::Object(map) => map,
        other => {
            return Err(decode_error(EventError::Validation(format!(
                "event_data is not an object: {other}"
            ))));
        }
    };
    let status: String = row.try_get("processing_status")?;
    Ok(StoredEvent {
        position: row.try_get("position")?,
        event_id: row.try_get("event_id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        event_data,
        schema_version: row.try_get("schema_version")?,
        caused_by: row.try_get("caused_by")?,
        processing_status: status.parse().map_err(decode_error)?,
        occurred_at: row.try_get("occurred_at")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn outcome_from_row(row: &PgRow) -> Result<HandlerOutcomeRecord, sqlx::Error> {
    let status = match row.try_get::<String, _>("status")?.as_str() {
        "processed" => HandlerRecordStatus::Processed,
        "failed" => HandlerRecordStatus::Failed,
        other => {
            return Err(decode_error(EventError::Validation(format!(
                "unknown handler outcome status: {other}"
            ))));
        }
    };
    Ok(HandlerOutcomeRecord {
        event_id: row.try_get("event_id")?,
        handler_id: row.try_get("handler_id")?,
        status,
        reason: row.try_get("reason")?,
        processed_at: row.try_get::<Option<DateTime<Utc>>, _>("processed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
