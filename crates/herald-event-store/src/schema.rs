//! Event store database schema.

/// SQL to create the events and handler outcome tables.
///
/// Kept identical to `migrations/0001_create_domain_events.sql`.
pub const CREATE_EVENT_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS domain_events (
    position          BIGSERIAL PRIMARY KEY,
    event_id          UUID NOT NULL UNIQUE,
    aggregate_id      TEXT NOT NULL DEFAULT '',
    event_type        VARCHAR(255) NOT NULL,
    event_data        JSONB NOT NULL,
    schema_version    INTEGER NOT NULL DEFAULT 1,
    caused_by         UUID,
    processing_status VARCHAR(16) NOT NULL DEFAULT 'pending',
    occurred_at       TIMESTAMPTZ NOT NULL,
    recorded_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_domain_events_aggregate_id
    ON domain_events (aggregate_id, position);

CREATE INDEX IF NOT EXISTS idx_domain_events_event_type
    ON domain_events (event_type, position);

CREATE INDEX IF NOT EXISTS idx_domain_events_recorded_at
    ON domain_events (recorded_at);

CREATE INDEX IF NOT EXISTS idx_domain_events_unprocessed
    ON domain_events (position)
    WHERE processing_status <> 'dispatched';

CREATE TABLE IF NOT EXISTS event_handler_outcomes (
    event_id     UUID NOT NULL REFERENCES domain_events (event_id),
    handler_id   TEXT NOT NULL,
    status       VARCHAR(16) NOT NULL,
    reason       TEXT,
    processed_at TIMESTAMPTZ,
    updated_at   TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (event_id, handler_id)
);
";
