//! CHIF Core - client library for the CHIF encode/decode service
//!
//! This crate submits encode and decode jobs to a remote CHIF service, waits
//! for them to finish and writes the resulting artifacts to disk.
//!
//! # Features
//!
//! - Streamed multipart uploads built from a JSON manifest
//! - Provenance (`host`, `user`, `ip`) recorded in the encode manifest
//! - Cancellable status polling with optional attempt and time limits
//! - Artifact retrieval from response payloads or signed URLs
//! - Scoped file handles released exactly once on every exit path
//!
//! # Example
//!
//! ```no_run
//! use chif_core::{ChifClient, ClientConfig, EncodeRequest, Pipeline, DEFAULT_BASE_URL};
//!
//! # async fn example() -> chif_core::Result<()> {
//! let client = ChifClient::new(ClientConfig::new(DEFAULT_BASE_URL, "my-org", "my-token"))?;
//! let pipeline = Pipeline::new(client);
//!
//! let mut request = EncodeRequest::new("manifest.json");
//! request.chif = Some("movie.chif".into());
//!
//! let outcome = pipeline.encode(&request).await?;
//! println!("encoded {}", outcome.uuid);
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod client;
pub mod error;
pub mod manifest;
pub mod multipart;
pub mod pipeline;
pub mod poller;
pub mod provenance;
pub mod scope;

// Re-export main types for convenience
pub use artifact::{Artifact, ArtifactRetriever, ArtifactSource};
pub use client::{ChifClient, ClientConfig, EventQuery, DEFAULT_BASE_URL};
pub use error::{ChifError, Result};
pub use manifest::{Manifest, ManifestPart};
pub use multipart::{chif_name, FsOpener, MultipartBuilder, MultipartPayload, PartOpener};
pub use pipeline::{EncodeOutcome, EncodeRequest, Pipeline};
pub use poller::{
    JobStatus, PollInterval, PollOptions, QueueStatus, StatusPoller, StatusSource,
    DEFAULT_POLL_INTERVAL,
};
pub use provenance::{Provenance, DEFAULT_IP_ECHO_URL};
pub use scope::{ResourceScope, ScopedHandle};
