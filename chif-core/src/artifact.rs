//! Streaming job output to local files.
//!
//! An artifact arrives in one of two shapes: the response itself is the
//! payload (decode), or the response only points at the payload through a
//! signed URL (download). Both are drained through the same routine, which
//! owns the destination handle through a [`ResourceScope`] and removes the
//! file again if the transfer does not complete.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex_lite::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::check_status;
use crate::error::{ChifError, Result};
use crate::scope::{ResourceScope, ScopedHandle};

/// Where an artifact's bytes come from.
#[derive(Debug)]
pub enum ArtifactSource {
    /// The response body is the artifact; its name comes from the
    /// `content-disposition` header and it is written into `dir`.
    Payload { response: Response, dir: PathBuf },
    /// The artifact lives at a signed URL and is written to `path`.
    Pointer { url: Url, path: PathBuf },
}

/// A file written by the retriever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Writes artifacts to disk.
#[derive(Debug, Clone)]
pub struct ArtifactRetriever {
    http: Client,
}

impl ArtifactRetriever {
    /// `http` must not carry service credentials; signed URLs are fetched
    /// as-is.
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub async fn retrieve(&self, source: ArtifactSource) -> Result<Artifact> {
        let (response, path) = match source {
            ArtifactSource::Payload { response, dir } => {
                let name = filename_from_headers(response.headers())?;
                (response, dir.join(name))
            }
            ArtifactSource::Pointer { url, path } => {
                debug!(host = ?url.host_str(), "Fetching signed URL");
                let response = self.http.get(url).send().await?;
                (check_status("download", response).await?, path)
            }
        };

        info!(path = %path.display(), "Downloading");
        write_response(response, &path).await
    }
}

/// File name announced by a `content-disposition` header.
///
/// Only the final path component is kept, so a hostile header cannot write
/// outside the destination directory.
pub fn filename_from_headers(headers: &HeaderMap) -> Result<String> {
    let value = headers
        .get(CONTENT_DISPOSITION)
        .ok_or_else(|| ChifError::ArtifactNaming("response has no content-disposition".into()))?
        .to_str()
        .map_err(|_| ChifError::ArtifactNaming("content-disposition is not ASCII".into()))?;
    filename_from_disposition(value)
}

pub fn filename_from_disposition(value: &str) -> Result<String> {
    static FILENAME: OnceLock<Regex> = OnceLock::new();
    let pattern = FILENAME.get_or_init(|| {
        Regex::new(r#"filename="(.*?)""#).expect("content-disposition pattern is valid")
    });

    let malformed = || ChifError::ArtifactNaming(format!("no filename in {value:?}"));
    let raw = pattern
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(malformed)?;

    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(malformed)
}

async fn write_response(response: Response, path: &Path) -> Result<Artifact> {
    let expected = response.content_length();

    let mut scope = ResourceScope::new("artifact");
    let handle = ScopedHandle::create(path)
        .await
        .map_err(|source| ChifError::ArtifactWrite {
            path: path.to_path_buf(),
            source,
        })?;
    let complete = Arc::new(AtomicBool::new(false));
    remove_unless_complete(&mut scope, path, complete.clone());
    handle.register(&mut scope);

    let result = drain(response, handle, expected).await;
    complete.store(result.is_ok(), Ordering::SeqCst);
    scope.close();

    match result {
        Ok(bytes) => {
            info!(path = %path.display(), bytes, "Artifact written");
            Ok(Artifact {
                path: path.to_path_buf(),
                bytes,
            })
        }
        Err(source) => {
            warn!(path = %path.display(), error = %source, "Transfer failed");
            Err(ChifError::ArtifactWrite {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Delete `path` when the scope releases unless `complete` is set by then.
///
/// Registered before the file handle, so the descriptor is closed first. The
/// scope also releases when the transfer future is dropped mid-stream.
fn remove_unless_complete(scope: &mut ResourceScope, path: &Path, complete: Arc<AtomicBool>) {
    let path = path.to_path_buf();
    scope.defer(format!("partial {}", path.display()), move || {
        if complete.load(Ordering::SeqCst) {
            return;
        }
        warn!(path = %path.display(), "Removing partial file");
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Could not remove partial file");
        }
    });
}

async fn drain(mut response: Response, mut out: ScopedHandle, expected: Option<u64>) -> io::Result<u64> {
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(io::Error::other)? {
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;

    if let Some(expected) = expected {
        if written != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("received {written} of {expected} bytes"),
            ));
        }
    }
    Ok(written)
}
