//! Errors surfaced to lookup callers.

/// Why a lookup did not produce a result.
///
/// Cloneable so one outcome can be delivered to every waiter on a key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("Query id or bearer token not captured yet")]
    NotReady,

    #[error("No session token; log in first")]
    LoginRequired,

    #[error("Upstream rate limit reached")]
    RateLimited,

    #[error("Upstream fetch failed: {0}")]
    Upstream(String),

    #[error("Pending lookup cleared")]
    Cleared,

    #[error("Coordinator shut down")]
    Shutdown,
}

impl LookupError {
    /// Stable error code for machine consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotReady => "NOT_READY",
            Self::LoginRequired => "LOGIN_REQUIRED",
            Self::RateLimited => "RATE_LIMIT",
            Self::Upstream(_) => "FETCH_FAILED",
            Self::Cleared => "CLEARED",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

/// Result type for lookups.
pub type LookupOutcome = Result<crate::models::LookupResult, LookupError>;
