//! Error types for the sync and download paths.
//!
//! Errors that are fanned out to several observers (every caller attached to
//! one download, every subscriber to sync events) are `Clone`, so causes are
//! carried as rendered messages rather than boxed sources.

use std::path::PathBuf;
use std::time::Duration;

/// Failure reported by a [`ContentGateway`](crate::source::ContentGateway).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Transport failure or non-success server status.
    #[error("network error: {0}")]
    Network(String),

    /// The platform rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The call did not finish within the caller-supplied bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not tell us which bound fired.
            FetchError::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            FetchError::MalformedResponse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Merge-time contract violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("no course metadata for course {course_id}")]
    MissingCourseMetadata { course_id: String },
}

/// Outcome of a failed refresh, as surfaced to the caller and in events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// Failure of a file download or of a preview surface built on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    #[error("download of {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("download timed out after {0:?}")]
    Timeout(Duration),

    /// The task already used every attempt it is allowed.
    #[error("gave up after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    /// The preview surface kept crashing past its reload ceiling.
    #[error("preview crashed {reloads} times, not reloading again")]
    PreviewCrashed { reloads: u32 },
}

impl DownloadError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        DownloadError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Persistence failure for the annotation store or the cache index.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decode {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_error_is_transparent_over_fetch_error() {
        let err: SyncError = FetchError::Auth("token expired".into()).into();
        assert_eq!(err.to_string(), "authentication failed: token expired");
    }

    #[test]
    fn missing_metadata_names_the_course() {
        let err = MergeError::MissingCourseMetadata {
            course_id: "C9".into(),
        };
        assert!(err.to_string().contains("C9"));
    }
}
