use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Bearer token for the remote store, tied to a user id.
/// Obtained by whatever sign-in flow the host application uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthToken {
    pub uid: String,
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Unix timestamp; `None` means the token does not expire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl AuthToken {
    pub fn new(uid: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_at: None,
        }
    }

    pub fn expiring_in(mut self, seconds: i64) -> Self {
        self.expires_at = Some(Utc::now().timestamp() + seconds);
        self
    }

    /// Check if the token has expired.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => at < Utc::now().timestamp(),
            None => false,
        }
    }

    /// Seconds until expiry, if the token expires at all
    pub fn expires_in(&self) -> Option<i64> {
        self.expires_at.map(|at| at - Utc::now().timestamp())
    }

    /// Returns the Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}
