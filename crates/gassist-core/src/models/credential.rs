//! Persisted OAuth credentials

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ScopeSet;

/// Access tokens this close to expiry are treated as already expired
pub const EXPIRY_SKEW_SECS: i64 = 300;

/// OAuth credential for one scope set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Access token for API calls
    pub access_token: String,

    /// Refresh token for obtaining new access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// When the access token stops being accepted
    pub expiry: DateTime<Utc>,

    /// Scope set this credential was granted for
    pub scopes: ScopeSet,
}

impl CredentialRecord {
    /// Check if the access token is expired or will expire soon
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit clock
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expiry < now + Duration::seconds(EXPIRY_SKEW_SECS)
    }

    /// Whether a silent refresh can be attempted
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }
}
