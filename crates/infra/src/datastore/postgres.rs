//! Postgres-backed implementation of the datastore ports.
//!
//! Targets a hosted Postgres (Supabase-style) instance. Reconciliation
//! relies on one multi-row `INSERT ... ON CONFLICT ... DO UPDATE`, so
//! concurrent syncs for the same `(user, platform)` can never duplicate a
//! natural key. `RETURNING (xmax = 0)` distinguishes inserts from updates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use notionflow_domain::{
    Calendar, CredentialSecret, DatabaseConfig, EventRow, NotionFlowError, Result, SourcePlatform,
    SyncCredential, UpsertStats,
};
use notionflow_core::{CalendarStore, CredentialStore, EventRepository};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, error, instrument};

use super::schema::SCHEMA;
use crate::errors::InfraError;

const EVENT_COLUMNS: usize = 10;

/// Postgres implementation of the event, credential and calendar ports
pub struct PgDatastore {
    client: Arc<tokio_postgres::Client>,
}

impl PgDatastore {
    /// Connect to Postgres, spawning the connection driver task.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        if config.tls {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| NotionFlowError::Config(format!("TLS setup failed: {e}")))?;
            let connector = postgres_native_tls::MakeTlsConnector::new(connector);
            let (client, connection) = tokio_postgres::connect(&config.url, connector)
                .await
                .map_err(InfraError::from)?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    error!(error = %err, "postgres connection task ended with error");
                }
            });
            Ok(Self { client: Arc::new(client) })
        } else {
            let (client, connection) = tokio_postgres::connect(&config.url, tokio_postgres::NoTls)
                .await
                .map_err(InfraError::from)?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    error!(error = %err, "postgres connection task ended with error");
                }
            });
            Ok(Self { client: Arc::new(client) })
        }
    }

    /// Apply the schema idempotently.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.client.batch_execute(SCHEMA).await.map_err(InfraError::from)?;
        Ok(())
    }

    /// Create or replace a calendar row.
    pub async fn upsert_calendar(&self, calendar: &Calendar) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO calendars (id, user_id, name, active)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (id) DO UPDATE SET
                     name = EXCLUDED.name,
                     active = EXCLUDED.active",
                &[&calendar.id, &calendar.user_id, &calendar.name, &calendar.active],
            )
            .await
            .map_err(InfraError::from)?;
        Ok(())
    }

    /// Create or replace a stored credential.
    pub async fn upsert_credential(&self, credential: &SyncCredential) -> Result<()> {
        let secret = serde_json::to_value(&credential.secret)
            .map_err(|e| NotionFlowError::Internal(format!("secret serialization failed: {e}")))?;
        self.client
            .execute(
                "INSERT INTO calendar_sync_configs
                     (user_id, platform, secret, enabled, consecutive_failures, last_synced_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (user_id, platform) DO UPDATE SET
                     secret = EXCLUDED.secret,
                     enabled = EXCLUDED.enabled,
                     consecutive_failures = EXCLUDED.consecutive_failures,
                     last_synced_at = EXCLUDED.last_synced_at,
                     updated_at = NOW()",
                &[
                    &credential.user_id,
                    &credential.platform.as_str(),
                    &secret,
                    &credential.enabled,
                    &(credential.consecutive_failures as i32),
                    &credential.last_synced_at,
                ],
            )
            .await
            .map_err(InfraError::from)?;
        Ok(())
    }

    /// Point the user's syncs at a calendar.
    pub async fn set_sync_target(&self, user_id: &str, calendar_id: &str) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO active_syncs (user_id, calendar_id)
                 VALUES ($1, $2)
                 ON CONFLICT (user_id) DO UPDATE SET
                     calendar_id = EXCLUDED.calendar_id,
                     updated_at = NOW()",
                &[&user_id, &calendar_id],
            )
            .await
            .map_err(InfraError::from)?;
        Ok(())
    }

    /// Stored events for a user, ordered by start time. Used by the
    /// dashboard read path and the repository tests.
    pub async fn events_for_user(&self, user_id: &str) -> Result<Vec<EventRow>> {
        let rows = self
            .client
            .query(
                "SELECT id, user_id, calendar_id, title, description, start_time, end_time,
                        all_day, external_id, source_platform, created_at, updated_at
                 FROM calendar_events
                 WHERE user_id = $1
                 ORDER BY start_time ASC",
                &[&user_id],
            )
            .await
            .map_err(InfraError::from)?;

        rows.iter().map(event_row_from_pg).collect()
    }
}

fn event_row_from_pg(row: &Row) -> Result<EventRow> {
    let platform: String = row.get("source_platform");
    Ok(EventRow {
        id: row.get("id"),
        user_id: row.get("user_id"),
        calendar_id: row.get("calendar_id"),
        title: row.get("title"),
        description: row.get("description"),
        start: row.get("start_time"),
        end: row.get("end_time"),
        all_day: row.get("all_day"),
        external_id: row.get("external_id"),
        source_platform: platform.parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn calendar_from_pg(row: &Row) -> Calendar {
    Calendar {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        active: row.get("active"),
    }
}

#[async_trait]
impl EventRepository for PgDatastore {
    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn upsert_batch(&self, rows: &[EventRow]) -> Result<UpsertStats> {
        if rows.is_empty() {
            return Ok(UpsertStats::default());
        }

        // A page can repeat a natural key (e.g. a provider echoing an item
        // across pages); ON CONFLICT DO UPDATE rejects a second hit on the
        // same row within one statement, so keep the last occurrence only.
        let mut deduped: HashMap<(&str, &str, SourcePlatform), &EventRow> = HashMap::new();
        for row in rows {
            deduped.insert(
                (row.user_id.as_str(), row.external_id.as_str(), row.source_platform),
                row,
            );
        }
        let rows: Vec<&EventRow> = deduped.into_values().collect();

        let platforms: Vec<&'static str> =
            rows.iter().map(|row| row.source_platform.as_str()).collect();

        let mut sql = String::from(
            "INSERT INTO calendar_events \
             (id, user_id, calendar_id, title, description, start_time, end_time, \
              all_day, external_id, source_platform) VALUES ",
        );
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(rows.len() * EVENT_COLUMNS);

        for (index, row) in rows.iter().enumerate() {
            if index > 0 {
                sql.push_str(", ");
            }
            let base = index * EVENT_COLUMNS;
            sql.push('(');
            for column in 0..EVENT_COLUMNS {
                if column > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&format!("${}", base + column + 1));
            }
            sql.push(')');

            params.push(&row.id);
            params.push(&row.user_id);
            params.push(&row.calendar_id);
            params.push(&row.title);
            params.push(&row.description);
            params.push(&row.start);
            params.push(&row.end);
            params.push(&row.all_day);
            params.push(&row.external_id);
            params.push(&platforms[index]);
        }

        sql.push_str(
            " ON CONFLICT (user_id, source_platform, external_id) DO UPDATE SET \
               title = EXCLUDED.title, \
               description = EXCLUDED.description, \
               start_time = EXCLUDED.start_time, \
               end_time = EXCLUDED.end_time, \
               all_day = EXCLUDED.all_day, \
               updated_at = NOW() \
             RETURNING (xmax = 0) AS inserted",
        );

        let result = self.client.query(sql.as_str(), &params).await.map_err(InfraError::from)?;
        let inserted = result.iter().filter(|row| row.get::<_, bool>("inserted")).count();
        let stats = UpsertStats { inserted, updated: result.len() - inserted };

        debug!(inserted = stats.inserted, updated = stats.updated, "upserted event batch");
        Ok(stats)
    }
}

#[async_trait]
impl CredentialStore for PgDatastore {
    #[instrument(skip(self))]
    async fn get(
        &self,
        user_id: &str,
        platform: SourcePlatform,
    ) -> Result<Option<SyncCredential>> {
        let row = self
            .client
            .query_opt(
                "SELECT secret, enabled, consecutive_failures, last_synced_at
                 FROM calendar_sync_configs
                 WHERE user_id = $1 AND platform = $2",
                &[&user_id, &platform.as_str()],
            )
            .await
            .map_err(InfraError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let secret: serde_json::Value = row.get("secret");
        let secret: CredentialSecret = serde_json::from_value(secret).map_err(|e| {
            NotionFlowError::Database(format!("stored credential secret is malformed: {e}"))
        })?;
        let failures: i32 = row.get("consecutive_failures");

        Ok(Some(SyncCredential {
            user_id: user_id.to_string(),
            platform,
            secret,
            enabled: row.get("enabled"),
            consecutive_failures: failures.max(0) as u32,
            last_synced_at: row.get("last_synced_at"),
        }))
    }

    #[instrument(skip(self))]
    async fn record_success(&self, user_id: &str, platform: SourcePlatform) -> Result<()> {
        self.client
            .execute(
                "UPDATE calendar_sync_configs
                 SET consecutive_failures = 0, last_synced_at = NOW(), updated_at = NOW()
                 WHERE user_id = $1 AND platform = $2",
                &[&user_id, &platform.as_str()],
            )
            .await
            .map_err(InfraError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_failure(&self, user_id: &str, platform: SourcePlatform) -> Result<u32> {
        let row = self
            .client
            .query_opt(
                "UPDATE calendar_sync_configs
                 SET consecutive_failures = consecutive_failures + 1, updated_at = NOW()
                 WHERE user_id = $1 AND platform = $2
                 RETURNING consecutive_failures",
                &[&user_id, &platform.as_str()],
            )
            .await
            .map_err(InfraError::from)?;

        match row {
            Some(row) => {
                let failures: i32 = row.get("consecutive_failures");
                Ok(failures.max(0) as u32)
            }
            None => Err(NotionFlowError::NotFound(format!(
                "no credential stored for user {user_id} on {platform}"
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn set_enabled(
        &self,
        user_id: &str,
        platform: SourcePlatform,
        enabled: bool,
    ) -> Result<()> {
        self.client
            .execute(
                "UPDATE calendar_sync_configs
                 SET enabled = $3, updated_at = NOW()
                 WHERE user_id = $1 AND platform = $2",
                &[&user_id, &platform.as_str(), &enabled],
            )
            .await
            .map_err(InfraError::from)?;
        Ok(())
    }
}

#[async_trait]
impl CalendarStore for PgDatastore {
    #[instrument(skip(self))]
    async fn get(&self, user_id: &str, calendar_id: &str) -> Result<Option<Calendar>> {
        let row = self
            .client
            .query_opt(
                "SELECT id, user_id, name, active
                 FROM calendars
                 WHERE user_id = $1 AND id = $2",
                &[&user_id, &calendar_id],
            )
            .await
            .map_err(InfraError::from)?;
        Ok(row.as_ref().map(calendar_from_pg))
    }

    #[instrument(skip(self))]
    async fn first_active(&self, user_id: &str) -> Result<Option<Calendar>> {
        let row = self
            .client
            .query_opt(
                "SELECT id, user_id, name, active
                 FROM calendars
                 WHERE user_id = $1 AND active
                 ORDER BY created_at ASC
                 LIMIT 1",
                &[&user_id],
            )
            .await
            .map_err(InfraError::from)?;
        Ok(row.as_ref().map(calendar_from_pg))
    }

    #[instrument(skip(self))]
    async fn sync_target(&self, user_id: &str) -> Result<Option<String>> {
        let row = self
            .client
            .query_opt(
                "SELECT calendar_id FROM active_syncs WHERE user_id = $1",
                &[&user_id],
            )
            .await
            .map_err(InfraError::from)?;
        Ok(row.map(|row| row.get("calendar_id")))
    }
}
