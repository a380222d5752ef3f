//! Datastore schema
//!
//! Applied idempotently by [`super::PgDatastore::ensure_schema`]. The
//! unique constraint on `(user_id, source_platform, external_id)` is what
//! makes the reconciler's upsert safe under concurrent syncs; the check
//! constraint is the storage side of the `end > start` invariant.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS calendars (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    active      BOOLEAN NOT NULL DEFAULT TRUE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_calendars_user_active
    ON calendars (user_id, active);

CREATE TABLE IF NOT EXISTS calendar_events (
    id               TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    calendar_id      TEXT NOT NULL REFERENCES calendars (id),
    title            TEXT NOT NULL,
    description      TEXT NOT NULL DEFAULT '',
    start_time       TIMESTAMPTZ NOT NULL,
    end_time         TIMESTAMPTZ NOT NULL,
    all_day          BOOLEAN NOT NULL DEFAULT FALSE,
    external_id      TEXT NOT NULL,
    source_platform  TEXT NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT calendar_events_time_valid CHECK (end_time > start_time),
    CONSTRAINT calendar_events_natural_key UNIQUE (user_id, source_platform, external_id)
);

CREATE INDEX IF NOT EXISTS idx_calendar_events_user_calendar
    ON calendar_events (user_id, calendar_id, start_time);

CREATE TABLE IF NOT EXISTS calendar_sync_configs (
    user_id               TEXT NOT NULL,
    platform              TEXT NOT NULL,
    secret                JSONB NOT NULL,
    enabled               BOOLEAN NOT NULL DEFAULT TRUE,
    consecutive_failures  INTEGER NOT NULL DEFAULT 0,
    last_synced_at        TIMESTAMPTZ,
    created_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (user_id, platform)
);

CREATE TABLE IF NOT EXISTS active_syncs (
    user_id      TEXT PRIMARY KEY,
    calendar_id  TEXT NOT NULL REFERENCES calendars (id),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;
