use thiserror::Error;

/// Main error type for telesync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authentication required. Please run 'telesync auth login' first.")]
    NotAuthenticated,

    #[error("Remote store error {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid date format: {0}. Expected YYYY-MM-DD")]
    InvalidDateFormat(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Create an authentication error from a message
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a configuration error from a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a database error from a message
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a provider error from a message
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create an invalid response error from a message
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create an invalid parameter error from a message
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Failure kinds a sync cycle can end in.
///
/// Everything that goes wrong inside a cycle is folded into one of these;
/// none of them escape the cycle as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Permission for the provider was not granted. Not retried until settings change.
    PermissionDenied,
    /// No hardware or provider for this feature.
    Unavailable,
    /// Transient push failure, retried on the next trigger.
    NetworkError,
    /// Credentials rejected; the user has to sign in again.
    AuthError,
    /// The platform refused to start foreground work right now.
    CapabilityDenied,
}

impl FailureKind {
    /// Whether the failure should be shown to the user
    pub fn is_user_visible(self) -> bool {
        matches!(self, FailureKind::AuthError)
    }

    /// Whether the scheduler should run another cycle at the next opportunity
    pub fn is_deferred(self) -> bool {
        matches!(self, FailureKind::NetworkError | FailureKind::CapabilityDenied)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::PermissionDenied => write!(f, "permission denied"),
            FailureKind::Unavailable => write!(f, "unavailable"),
            FailureKind::NetworkError => write!(f, "network error"),
            FailureKind::AuthError => write!(f, "authentication error"),
            FailureKind::CapabilityDenied => write!(f, "capability denied"),
        }
    }
}

/// Render an error for the terminal, adding a hint where one helps
pub fn format_user_error(err: &SyncError) -> String {
    match err {
        SyncError::Http(e) if e.is_connect() || e.is_timeout() => {
            format!("{} (check your network connection and the configured remote_url)", err)
        }
        SyncError::Database(_) => {
            format!("{} (the local store may be locked by a running 'telesync run')", err)
        }
        _ => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::Authentication("token rejected".to_string());
        assert_eq!(err.to_string(), "Authentication error: token rejected");
    }

    #[test]
    fn test_not_authenticated_error() {
        let err = SyncError::NotAuthenticated;
        assert!(err.to_string().contains("telesync auth login"));
    }

    #[test]
    fn test_invalid_date_format_error() {
        let err = SyncError::InvalidDateFormat("not-a-date".to_string());
        assert!(err.to_string().contains("not-a-date"));
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(SyncError::auth("x"), SyncError::Authentication(_)));
        assert!(matches!(SyncError::config("x"), SyncError::Config(_)));
        assert!(matches!(SyncError::database("x"), SyncError::Database(_)));
        assert!(matches!(SyncError::provider("x"), SyncError::Provider(_)));
        assert!(matches!(SyncError::invalid_response("x"), SyncError::InvalidResponse(_)));
        assert!(matches!(SyncError::invalid_param("x"), SyncError::InvalidParameter(_)));
    }

    #[test]
    fn test_failure_kind_visibility() {
        assert!(FailureKind::AuthError.is_user_visible());
        assert!(!FailureKind::NetworkError.is_user_visible());
        assert!(!FailureKind::CapabilityDenied.is_user_visible());
        assert!(FailureKind::NetworkError.is_deferred());
        assert!(FailureKind::CapabilityDenied.is_deferred());
        assert!(!FailureKind::PermissionDenied.is_deferred());
    }

    #[test]
    fn test_format_user_error_database_hint() {
        let msg = format_user_error(&SyncError::database("locked"));
        assert!(msg.contains("telesync run"));
    }
}
