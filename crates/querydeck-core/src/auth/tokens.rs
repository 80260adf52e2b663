use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Token block as the endpoint returns it: lifetime relative to receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEnvelope {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

/// Credential pair with an absolute expiry.
///
/// Once `expires_at` has passed the pair is stale and must not be used to
/// authorize a request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// Convert a relative envelope into an absolute pair at receipt time.
    pub fn from_envelope(envelope: TokenEnvelope, received_at: DateTime<Utc>) -> Self {
        Self {
            access_token: envelope.access_token,
            refresh_token: envelope.refresh_token,
            expires_at: received_at + Duration::seconds(envelope.expires_in.max(0)),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get seconds remaining until expiry (for display)
    pub fn seconds_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_seconds().max(0)
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
