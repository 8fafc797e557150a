//! End-to-end operations: encode, decode, download and the publish/delete
//! cascades.
//!
//! Every suspension point races against the pipeline's cancellation token.
//! When it fires, the running future is dropped, which closes any scope it
//! holds and aborts the HTTP exchange in flight.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::artifact::{Artifact, ArtifactRetriever, ArtifactSource};
use crate::client::ChifClient;
use crate::error::{ChifError, Result};
use crate::manifest::Manifest;
use crate::multipart::{FsOpener, MultipartBuilder, PartOpener};
use crate::poller::{JobStatus, PollOptions, StatusPoller};
use crate::provenance::{Provenance, DEFAULT_IP_ECHO_URL};

/// Options for [`Pipeline::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeRequest {
    pub manifest: PathBuf,
    /// Target container path; defaults to `{uuid}.chif` when downloading.
    pub chif: Option<PathBuf>,
    pub download: bool,
    pub publish: bool,
}

impl EncodeRequest {
    pub fn new(manifest: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            chif: None,
            download: true,
            publish: false,
        }
    }
}

/// What an encode produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOutcome {
    pub uuid: String,
    pub artifact: Option<Artifact>,
    /// Published container URL, when publishing was requested.
    pub published: Option<Url>,
}

/// Runs CHIF operations against one organization.
pub struct Pipeline {
    client: ChifClient,
    retriever: ArtifactRetriever,
    opener: Box<dyn PartOpener>,
    poll: PollOptions,
    cancel: CancellationToken,
    ip_echo_url: Option<Url>,
}

impl Pipeline {
    pub fn new(client: ChifClient) -> Self {
        let retriever = ArtifactRetriever::new(client.http().clone());
        Self {
            client,
            retriever,
            opener: Box::new(FsOpener),
            poll: PollOptions::default(),
            cancel: CancellationToken::new(),
            ip_echo_url: Url::parse(DEFAULT_IP_ECHO_URL).ok(),
        }
    }

    pub fn with_poll_options(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// IP echo service for provenance; `None` skips the lookup.
    pub fn with_ip_echo_url(mut self, url: Option<Url>) -> Self {
        self.ip_echo_url = url;
        self
    }

    pub fn with_opener(mut self, opener: Box<dyn PartOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn client(&self) -> &ChifClient {
        &self.client
    }

    /// Submit an encode job, wait for it, then optionally download and
    /// publish the container.
    pub async fn encode(&self, request: &EncodeRequest) -> Result<EncodeOutcome> {
        match &request.chif {
            Some(chif) => info!(
                "Encoding {} from {}",
                chif.display(),
                request.manifest.display()
            ),
            None => info!("Encoding from {}", request.manifest.display()),
        }

        let manifest = self.cancellable(Manifest::load(&request.manifest)).await?;
        let provenance = self
            .cancellable(async {
                Ok(Provenance::collect(self.client.http(), self.ip_echo_url.as_ref()).await)
            })
            .await?;

        let payload = self
            .cancellable(
                MultipartBuilder::new(self.opener.as_ref())
                    .with_provenance(provenance)
                    .encode(&manifest, request.chif.as_deref()),
            )
            .await?;
        let uuid = self.cancellable(self.client.submit_encode(payload)).await?;
        info!("CHIF UUID: {uuid}");

        self.wait(&uuid).await?;

        let artifact = if request.download {
            let chif = request
                .chif
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("{uuid}.chif")));
            Some(self.download(&uuid, &chif).await?)
        } else {
            None
        };

        let published = if request.publish {
            Some(self.publish(&uuid).await?)
        } else {
            None
        };

        Ok(EncodeOutcome {
            uuid,
            artifact,
            published,
        })
    }

    /// Decode `chif` with `manifest`; the archive is written into `out_dir`
    /// under the name the service gives it.
    pub async fn decode(&self, chif: &Path, manifest: &Path, out_dir: &Path) -> Result<Artifact> {
        info!("Decoding {} with {}", chif.display(), manifest.display());

        let manifest = self.cancellable(Manifest::load(manifest)).await?;
        let payload = self
            .cancellable(MultipartBuilder::new(self.opener.as_ref()).decode(&manifest, chif))
            .await?;
        let response = self.cancellable(self.client.submit_decode(payload)).await?;

        self.cancellable(self.retriever.retrieve(ArtifactSource::Payload {
            response,
            dir: out_dir.to_path_buf(),
        }))
        .await
    }

    /// Download a completed container to `chif`.
    pub async fn download(&self, uuid: &str, chif: &Path) -> Result<Artifact> {
        info!("Downloading {}", chif.display());
        let url = self.cancellable(self.client.download_url(uuid)).await?;
        self.cancellable(self.retriever.retrieve(ArtifactSource::Pointer {
            url,
            path: chif.to_path_buf(),
        }))
        .await
    }

    /// Block until `uuid` completes.
    pub async fn wait(&self, uuid: &str) -> Result<JobStatus> {
        StatusPoller::new(&self.client, self.poll, self.cancel.clone())
            .wait(uuid)
            .await
    }

    pub async fn status(&self, uuid: &str) -> Result<JobStatus> {
        info!("Getting {uuid} status");
        self.cancellable(self.client.status(uuid)).await
    }

    pub async fn publish(&self, uuid: &str) -> Result<Url> {
        info!("Publishing {uuid}");
        self.cancellable(self.client.publish(uuid)).await
    }

    /// Delete the private copy, then unpublish it from the CDN if asked.
    pub async fn delete(&self, uuid: &str, also_unpublish: bool) -> Result<Value> {
        info!("Deleting {uuid}");
        let deleted = self.cancellable(self.client.delete(uuid)).await?;
        if also_unpublish {
            info!("Unpublishing {uuid}");
            self.cancellable(self.client.unpublish(uuid)).await?;
        }
        Ok(deleted)
    }

    /// Unpublish from the CDN, then delete the private copy if asked.
    pub async fn unpublish(&self, uuid: &str, also_delete: bool) -> Result<Value> {
        info!("Unpublishing {uuid}");
        let unpublished = self.cancellable(self.client.unpublish(uuid)).await?;
        if also_delete {
            info!("Deleting {uuid}");
            self.cancellable(self.client.delete(uuid)).await?;
        }
        Ok(unpublished)
    }

    async fn cancellable<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChifError::Cancelled),
            result = fut => result,
        }
    }
}
