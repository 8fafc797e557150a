use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChifError {
    #[error("Failed to read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid manifest {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Part {name:?} not found: {path}")]
    PartNotFound {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Submission rejected with status {status}")]
    Submission { status: StatusCode, body: String },

    #[error("{operation} failed with status {status}")]
    Api {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("Job {uuid} failed")]
    JobFailed { uuid: String },

    #[error("Job {uuid} still running after {attempts} status checks ({elapsed:?})")]
    JobTimeout {
        uuid: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Cannot name artifact: {0}")]
    ArtifactNaming(String),

    #[error("Failed to write artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response from {operation}: {reason}")]
    UnexpectedResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ChifError {
    /// Upstream response body for HTTP-level failures.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::Submission { body, .. } | Self::Api { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Upstream status code for HTTP-level failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Submission { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::Network(e) => e.status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChifError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_body_only_for_http_failures() {
        let err = ChifError::Submission {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            body: r#"{"detail":"bad manifest"}"#.into(),
        };
        assert_eq!(err.response_body(), Some(r#"{"detail":"bad manifest"}"#));
        assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));

        let err = ChifError::JobFailed {
            uuid: "abc".into(),
        };
        assert!(err.response_body().is_none());
        assert!(err.status().is_none());
    }

    #[test]
    fn test_display_names_the_job() {
        let err = ChifError::JobTimeout {
            uuid: "1234".into(),
            attempts: 3,
            elapsed: Duration::from_millis(1500),
        };
        let message = err.to_string();
        assert!(message.contains("1234"));
        assert!(message.contains("3 status checks"));
    }
}
