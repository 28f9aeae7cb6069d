//! Error taxonomy for sync runs
//!
//! Run-level failures abort a sync and surface to the caller as [`SyncError`].
//! Item-level failures (one commit lookup, one compare call) are downgraded to
//! a [`SkipReason`] and absorbed by the orchestrator.

use thiserror::Error;

/// Failures that abort a whole sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No session token and no persisted token record for the user.
    #[error("GitHub connection has expired. Sign out and sign in again.")]
    Unauthenticated,

    /// A provider call the run cannot proceed without failed.
    #[error("GitHub API unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Ledger, streak or token persistence failed.
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Caller supplied an invalid argument (bad date range and the like).
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// HTTP status used when this error is returned from the trigger surface.
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::Unauthenticated => 401,
            SyncError::Validation(_) => 400,
            SyncError::UpstreamUnavailable(_) | SyncError::Storage(_) | SyncError::Config(_) => {
                500
            }
        }
    }

    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Unauthenticated => "UNAUTHENTICATED",
            SyncError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            SyncError::Storage(_) => "SERVER_ERROR",
            SyncError::Validation(_) => "VALIDATION",
            SyncError::Config(_) => "SERVER_ERROR",
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

/// Why a single candidate commit did not make it into the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    /// Another branch of the run already claimed this sha.
    #[error("already claimed by another event")]
    AlreadyClaimed,

    /// The commit lookup failed.
    #[error("commit lookup failed: {0}")]
    Upstream(String),

    /// The commit was authored on a different logical day.
    #[error("authored on {0}, not today")]
    NotToday(chrono::NaiveDate),

    /// The provider returned a commit without an author timestamp.
    #[error("commit has no author date")]
    MissingAuthorDate,
}

/// Failures from a single provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SyncError::Unauthenticated.status_code(), 401);
        assert_eq!(SyncError::Storage("disk".into()).status_code(), 500);
        assert_eq!(
            SyncError::UpstreamUnavailable("events".into()).status_code(),
            500
        );
        assert_eq!(SyncError::Validation("from > to".into()).status_code(), 400);
    }

    #[test]
    fn test_rusqlite_errors_become_storage_failures() {
        let err: SyncError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, SyncError::Storage(_)));
        assert_eq!(err.code(), "SERVER_ERROR");
    }

    #[test]
    fn test_skip_reason_messages() {
        let day = chrono::NaiveDate::from_ymd_opt(2026, 2, 9).unwrap();
        assert_eq!(
            SkipReason::NotToday(day).to_string(),
            "authored on 2026-02-09, not today"
        );
    }
}
