//! Stored sync credentials
//!
//! One credential per `(user, platform)`. The secret is an opaque blob as
//! far as the datastore is concerned; the platform clients know which
//! variant they need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SourcePlatform;

/// The secret material stored for a platform connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialSecret {
    /// Plain bearer token (Notion integration token)
    ApiToken { token: String },
    /// OAuth2 token pair (Google, Outlook)
    #[serde(rename = "oauth")]
    OAuth {
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Username + app-specific password (CalDAV HTTP Basic)
    BasicAuth { username: String, password: String },
}

/// A stored platform connection for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCredential {
    pub user_id: String,
    pub platform: SourcePlatform,
    pub secret: CredentialSecret,
    /// Disabled credentials are skipped by the orchestrator; the failure
    /// policy flips this off after repeated consecutive failures.
    pub enabled: bool,
    pub consecutive_failures: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncCredential {
    pub fn new(
        user_id: impl Into<String>,
        platform: SourcePlatform,
        secret: CredentialSecret,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            platform,
            secret,
            enabled: true,
            consecutive_failures: 0,
            last_synced_at: None,
        }
    }

    /// Bearer token for platforms authenticated with a single token.
    ///
    /// For OAuth credentials this is the access token; refresh is the
    /// owning client's concern.
    pub fn bearer_token(&self) -> Option<&str> {
        match &self.secret {
            CredentialSecret::ApiToken { token } => Some(token),
            CredentialSecret::OAuth { access_token, .. } => Some(access_token),
            CredentialSecret::BasicAuth { .. } => None,
        }
    }

    /// `(username, password)` pair for HTTP Basic platforms
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match &self.secret {
            CredentialSecret::BasicAuth { username, password } => {
                Some((username.as_str(), password.as_str()))
            }
            _ => None,
        }
    }
}
