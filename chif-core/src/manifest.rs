//! CHIF manifest loading and validation.
//!
//! A manifest is a JSON document of the form
//!
//! ```json
//! {
//!   "metadata": { "title": "..." },
//!   "files": { "parts": { "cover": { "filename": "cover.png" } } }
//! }
//! ```
//!
//! The document is kept as an ordered JSON map so that keys this client does
//! not know about are sent back to the service untouched.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ChifError, Result};
use crate::provenance::Provenance;

/// One named input file of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPart {
    /// Logical part name (the key under `files.parts`).
    pub name: String,
    /// File name relative to the manifest's directory.
    pub filename: String,
}

impl ManifestPart {
    /// Resolve the part's file against the manifest directory.
    pub fn resolve(&self, dir: &Path) -> PathBuf {
        dir.join(&self.filename)
    }
}

/// A parsed manifest together with the directory it was loaded from.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    dir: PathBuf,
    document: Map<String, Value>,
    parts: Vec<ManifestPart>,
}

impl Manifest {
    /// Read and validate the manifest at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ChifError::ManifestRead {
                path: path.to_path_buf(),
                source,
            })?;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let dir = tokio::fs::canonicalize(parent)
            .await
            .map_err(|source| ChifError::ManifestRead {
                path: path.to_path_buf(),
                source,
            })?;

        let manifest = Self::parse(path, dir, &bytes)?;
        debug!(
            path = %path.display(),
            parts = manifest.parts.len(),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    /// Parse manifest bytes; `dir` is used to resolve part files.
    pub fn parse(path: impl Into<PathBuf>, dir: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self> {
        let path = path.into();
        let value: Value =
            serde_json::from_slice(bytes).map_err(|source| ChifError::ManifestParse {
                path: path.clone(),
                source,
            })?;

        let invalid = |reason: String| ChifError::InvalidManifest {
            path: path.clone(),
            reason,
        };

        let Value::Object(document) = value else {
            return Err(invalid("top level must be an object".into()));
        };

        match document.get("metadata") {
            None | Some(Value::Object(_)) => {}
            Some(_) => return Err(invalid("`metadata` must be an object".into())),
        }

        let raw_parts = document
            .get("files")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("missing `files` object".into()))?
            .get("parts")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("missing `files.parts` object".into()))?;

        let mut parts = Vec::with_capacity(raw_parts.len());
        for (name, part) in raw_parts {
            let filename = part
                .as_object()
                .ok_or_else(|| invalid(format!("part {name:?} must be an object")))?
                .get("filename")
                .and_then(Value::as_str)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| invalid(format!("part {name:?} has no `filename`")))?;
            parts.push(ManifestPart {
                name: name.clone(),
                filename: filename.to_string(),
            });
        }

        Ok(Self {
            path,
            dir: dir.into(),
            document,
            parts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that part filenames are relative to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parts in document order.
    pub fn parts(&self) -> &[ManifestPart] {
        &self.parts
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.document.get("metadata").and_then(Value::as_object)
    }

    /// Upload name for the manifest field.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "manifest.json".to_string())
    }

    /// Record who submitted the manifest under `metadata.createdBy`.
    pub fn set_created_by(&mut self, provenance: &Provenance) {
        let metadata = self
            .document
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert("createdBy".to_string(), provenance.to_value());
        }
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.document.clone()).to_string()
    }
}
