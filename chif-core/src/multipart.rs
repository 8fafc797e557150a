//! Multipart payloads for encode and decode submissions.
//!
//! Every file attached to a payload is opened through a [`PartOpener`] and
//! owned by a [`ResourceScope`] that travels with the payload. The scope is
//! closed by the submitter once the request has been sent; if building fails
//! part-way, the handles opened so far are released before the error is
//! returned.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::{ChifError, Result};
use crate::manifest::Manifest;
use crate::provenance::Provenance;
use crate::scope::{ResourceScope, ScopedHandle};

const OCTET_STREAM: &str = "application/octet-stream";

/// Opens the files attached to a multipart payload.
#[async_trait]
pub trait PartOpener: Send + Sync {
    async fn open(&self, path: &Path) -> io::Result<ScopedHandle>;
}

/// Opens parts from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsOpener;

#[async_trait]
impl PartOpener for FsOpener {
    async fn open(&self, path: &Path) -> io::Result<ScopedHandle> {
        ScopedHandle::open_read(path).await
    }
}

/// A multipart body ready to send, plus the handles it streams from.
pub struct MultipartPayload {
    form: Form,
    fields: Vec<String>,
    handles: ResourceScope,
}

impl MultipartPayload {
    /// Value for the `Content-Type` request header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.form.boundary())
    }

    pub fn boundary(&self) -> &str {
        self.form.boundary()
    }

    /// Field names in the order they appear in the body.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of file handles the payload keeps open.
    pub fn open_handles(&self) -> usize {
        self.handles.pending()
    }

    /// Split into the form to send and the scope owning its files.
    pub fn into_parts(self) -> (Form, ResourceScope) {
        (self.form, self.handles)
    }
}

impl std::fmt::Debug for MultipartPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartPayload")
            .field("boundary", &self.form.boundary())
            .field("fields", &self.fields)
            .field("handles", &self.handles)
            .finish()
    }
}

/// Builds encode and decode payloads.
pub struct MultipartBuilder<'a> {
    opener: &'a dyn PartOpener,
    provenance: Option<Provenance>,
}

impl<'a> MultipartBuilder<'a> {
    pub fn new(opener: &'a dyn PartOpener) -> Self {
        Self {
            opener,
            provenance: None,
        }
    }

    /// Provenance to record in `metadata.createdBy` of encode manifests.
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Payload for `encoder/`: optional `chifName`, the manifest, then one
    /// streamed field per manifest part.
    pub async fn encode(
        &self,
        manifest: &Manifest,
        chif: Option<&Path>,
    ) -> Result<MultipartPayload> {
        if manifest.parts().is_empty() {
            return Err(ChifError::InvalidManifest {
                path: manifest.path().to_path_buf(),
                reason: "`files.parts` is empty".into(),
            });
        }

        let mut manifest = manifest.clone();
        if let Some(provenance) = &self.provenance {
            manifest.set_created_by(provenance);
        }

        let mut handles = ResourceScope::new("encode-parts");
        let mut fields = Vec::new();
        let mut form = Form::new();

        if let Some(chif) = chif {
            form = form.text("chifName", chif_name(chif));
            fields.push("chifName".to_string());
        }

        form = form.part("manifest", manifest_part(&manifest)?);
        fields.push("manifest".to_string());

        for part in manifest.parts() {
            let path = part.resolve(manifest.dir());
            let handle =
                self.opener
                    .open(&path)
                    .await
                    .map_err(|source| ChifError::PartNotFound {
                        name: part.name.clone(),
                        path: path.clone(),
                        source,
                    })?;
            handle.register(&mut handles);
            debug!(part = %part.name, path = %path.display(), bytes = ?handle.len(), "Attached part");

            form = form.part(part.filename.clone(), file_part(&handle, &part.filename)?);
            fields.push(part.filename.clone());
        }

        info!(
            manifest = %manifest.path().display(),
            parts = manifest.parts().len(),
            "Built encode payload"
        );
        Ok(MultipartPayload {
            form,
            fields,
            handles,
        })
    }

    /// Payload for `decoder/`: the container file followed by the manifest.
    pub async fn decode(&self, manifest: &Manifest, chif: &Path) -> Result<MultipartPayload> {
        let mut handles = ResourceScope::new("decode-parts");

        let handle = self
            .opener
            .open(chif)
            .await
            .map_err(|source| ChifError::PartNotFound {
                name: "chif".into(),
                path: chif.to_path_buf(),
                source,
            })?;
        handle.register(&mut handles);

        let upload_name = file_name(chif);
        let form = Form::new()
            .part("chif", file_part(&handle, &upload_name)?)
            .part("manifest", manifest_part(manifest)?);

        info!(chif = %chif.display(), bytes = ?handle.len(), "Built decode payload");
        Ok(MultipartPayload {
            form,
            fields: vec!["chif".into(), "manifest".into()],
            handles,
        })
    }
}

fn manifest_part(manifest: &Manifest) -> Result<Part> {
    Ok(Part::text(manifest.to_json())
        .file_name(manifest.file_name())
        .mime_str("application/json")?)
}

fn file_part(handle: &ScopedHandle, upload_name: &str) -> Result<Part> {
    let body = Body::wrap_stream(ReaderStream::new(handle.clone()));
    let part = match handle.len() {
        Some(len) => Part::stream_with_length(body, len),
        None => Part::stream(body),
    };
    Ok(part.file_name(upload_name.to_string()).mime_str(OCTET_STREAM)?)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Name the service should give the encoded container: the base name of
/// `chif` without a `.chif` extension.
pub fn chif_name(chif: &Path) -> String {
    let name = file_name(chif);
    let cut = name.len().saturating_sub(".chif".len());
    match name.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(".chif") => name[..cut].to_string(),
        _ => name,
    }
}
