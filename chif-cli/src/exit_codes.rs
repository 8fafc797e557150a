//! Exit codes following sysexits.h conventions.
//!
//! These codes let scripts tell a rejected manifest from an unreachable
//! service or a job that is still running.

use chif_core::ChifError;

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all), including jobs the service marked as failed.
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error. clap exits with this code on bad arguments.
#[allow(dead_code)]
pub const USAGE_ERROR: i32 = 2;

/// Data format error (malformed or invalid manifest).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file (manifest, part or container).
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Service unavailable (connection failure or 5xx).
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const NETWORK_ERROR: i32 = 69;

/// I/O error (cannot write output file).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Job did not finish within the configured limits.
/// Maps to EX_TEMPFAIL from sysexits.h.
pub const TIMED_OUT: i32 = 75;

/// The service answered with something unusable (4xx, unexpected body).
/// Maps to EX_PROTOCOL from sysexits.h.
pub const PROTOCOL_ERROR: i32 = 76;

/// Missing or invalid configuration (org, token, URL).
/// Maps to EX_CONFIG from sysexits.h.
pub const CONFIG_ERROR: i32 = 78;

/// Interrupted by Ctrl-C.
pub const CANCELLED: i32 = 130;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Classify by the first library error in the chain
        let code = match err.chain().find_map(|e| e.downcast_ref::<ChifError>()) {
            Some(chif) => classify(chif),
            None if err.chain().any(|e| e.is::<std::io::Error>()) => IO_ERROR,
            None => GENERAL_ERROR,
        };

        Self {
            code,
            message: Some(message),
        }
    }
}

pub fn classify(err: &ChifError) -> i32 {
    match err {
        ChifError::ManifestRead { .. } | ChifError::PartNotFound { .. } => INPUT_ERROR,
        ChifError::ManifestParse { .. } | ChifError::InvalidManifest { .. } => DATA_ERROR,
        ChifError::Submission { status, .. } | ChifError::Api { status, .. } => {
            if status.is_server_error() {
                NETWORK_ERROR
            } else {
                PROTOCOL_ERROR
            }
        }
        ChifError::JobFailed { .. } => GENERAL_ERROR,
        ChifError::JobTimeout { .. } => TIMED_OUT,
        ChifError::Cancelled => CANCELLED,
        ChifError::ArtifactNaming(_) | ChifError::UnexpectedResponse { .. } => PROTOCOL_ERROR,
        ChifError::ArtifactWrite { .. } => IO_ERROR,
        ChifError::Network(_) => NETWORK_ERROR,
        ChifError::Config(_) => CONFIG_ERROR,
    }
}
