//! Conversions from external infrastructure errors into domain errors.

use notionflow_domain::NotionFlowError;
use reqwest::Error as HttpError;
use reqwest::StatusCode;
use tokio_postgres::Error as PgError;

/// Error newtype that keeps conversions on the infrastructure side and can
/// be converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub NotionFlowError);

impl From<InfraError> for NotionFlowError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<NotionFlowError> for InfraError {
    fn from(value: NotionFlowError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit within this module.
trait IntoNotionFlowError {
    fn into_notionflow(self) -> NotionFlowError;
}

/* -------------------------------------------------------------------------- */
/* tokio_postgres::Error → NotionFlowError */
/* -------------------------------------------------------------------------- */

impl IntoNotionFlowError for PgError {
    fn into_notionflow(self) -> NotionFlowError {
        if let Some(db_error) = self.as_db_error() {
            use tokio_postgres::error::SqlState;
            let code = db_error.code();
            return if *code == SqlState::UNIQUE_VIOLATION {
                NotionFlowError::Database("unique constraint violation".into())
            } else if *code == SqlState::FOREIGN_KEY_VIOLATION {
                NotionFlowError::Database("foreign key constraint violation".into())
            } else if *code == SqlState::CHECK_VIOLATION {
                NotionFlowError::Database(format!(
                    "check constraint violation: {}",
                    db_error.message()
                ))
            } else {
                NotionFlowError::Database(format!(
                    "postgres error {}: {}",
                    code.code(),
                    db_error.message()
                ))
            };
        }

        if self.is_closed() {
            return NotionFlowError::Database("database connection closed".into());
        }

        NotionFlowError::Database(self.to_string())
    }
}

impl From<PgError> for InfraError {
    fn from(value: PgError) -> Self {
        InfraError(value.into_notionflow())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → NotionFlowError */
/* -------------------------------------------------------------------------- */

impl IntoNotionFlowError for HttpError {
    fn into_notionflow(self) -> NotionFlowError {
        if self.is_timeout() {
            return NotionFlowError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return NotionFlowError::Network("HTTP connection failure".into());
        }

        if let Some(status) = self.status() {
            return http_status_error(status, "HTTP request failed");
        }

        NotionFlowError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_notionflow())
    }
}

/// Map a non-success HTTP status into the domain error taxonomy.
///
/// Used by the platform clients when classifying responses they read the
/// body of (so `error_for_status` would lose the payload).
pub fn http_status_error(status: StatusCode, context: &str) -> NotionFlowError {
    let code = status.as_u16();
    let message = format!(
        "{context}: HTTP {code} {}",
        status.canonical_reason().unwrap_or("unknown status")
    );

    match code {
        401 | 403 => NotionFlowError::Auth(message),
        404 => NotionFlowError::NotFound(message),
        429 => NotionFlowError::Network(message),
        400..=499 => NotionFlowError::InvalidInput(message),
        _ => NotionFlowError::Network(message),
    }
}
