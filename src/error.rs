// ⚠️ Errors - failure taxonomy for the tracker lookup core

use thiserror::Error;

/// Result type for trackerid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can reject an operation.
///
/// Lookup misses are not errors: the lookup engine answers with `None`.
/// Unparsable rows are not errors either: the coercer skips them.
#[derive(Error, Debug)]
pub enum Error {
    /// Import payload could not be used (bad JSON, no `trackers` field)
    #[error("Malformed import: {0}")]
    MalformedImport(String),

    /// Network refresh of a park pack did not produce a usable pack
    #[error("Refresh failed for park '{park_id}': {reason}")]
    Refresh { park_id: String, reason: String },

    /// Fetch of a remote or local resource failed
    #[error("Fetch failed for {location}: {reason}")]
    Fetch { location: String, reason: String },

    /// Durable store operation error (wraps rusqlite::Error)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Durable store unavailable for any other reason
    #[error("Store error: {0}")]
    Store(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown park: {0}")]
    UnknownPark(String),

    #[error("No active park (load a park first)")]
    NoActivePark,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedImport(reason.into())
    }

    /// True for failures of the network refresh path, which background
    /// refreshes keep away from the user.
    pub fn is_refresh_failure(&self) -> bool {
        matches!(self, Error::Refresh { .. } | Error::Fetch { .. })
    }
}
