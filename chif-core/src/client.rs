//! Authenticated HTTP client for the CHIF manager API.
//!
//! Every endpoint lives under `{base_url}/api/` and is scoped by an
//! organization identifier. Requests carry `Authorization: Bearer {token}`;
//! the signed download URLs handed out by the service are fetched without it
//! (see [`crate::artifact`]).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::HeaderValue;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{ChifError, Result};
use crate::multipart::MultipartPayload;
use crate::poller::{JobStatus, StatusSource};

/// Production API host.
pub const DEFAULT_BASE_URL: &str = "https://extchifmanagerv5.azurewebsites.net";

/// Default TCP connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`ChifClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service root; `/api/` is appended.
    pub base_url: String,
    /// Organization identifier used in every path.
    pub org_id: String,
    /// Bearer token.
    pub token: String,
    /// Whole-request timeout. `None` lets large uploads and downloads run
    /// as long as they need.
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        base_url: impl Into<String>,
        org_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            org_id: org_id.into(),
            token: token.into(),
            request_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Filters for the file event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub order: String,
    pub limit: u32,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            order: "DESC".to_string(),
            limit: 100,
        }
    }
}

impl EventQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(4);
        if let Some(start) = self.start {
            params.push(("start", start.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        if let Some(end) = self.end {
            params.push(("end", end.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        params.push(("order", self.order.clone()));
        params.push(("limit", self.limit.to_string()));
        params
    }
}

#[derive(Debug, Deserialize)]
struct UrlResponse {
    url: String,
}

/// Client for the CHIF manager API.
#[derive(Debug, Clone)]
pub struct ChifClient {
    http: Client,
    api_base: Url,
    org_id: String,
    token: String,
}

impl ChifClient {
    #[instrument(level = "debug", skip_all, fields(base_url = %config.base_url, org_id = %config.org_id))]
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.org_id.trim().is_empty() {
            return Err(ChifError::Config("organization ID is required".into()));
        }
        if config.token.trim().is_empty() {
            return Err(ChifError::Config("API token is required".into()));
        }
        HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| ChifError::Config("API token contains invalid characters".into()))?;

        let api_base = api_base(&config.base_url)?;

        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| {
            warn!(error = %e, "Failed to create HTTP client");
            ChifError::Config(format!("Failed to create HTTP client: {e}"))
        })?;

        debug!(api_base = %api_base, "CHIF client created");
        Ok(Self {
            http,
            api_base,
            org_id: config.org_id,
            token: config.token,
        })
    }

    /// The underlying HTTP client, without credentials attached.
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// URL of `{api_base}/{endpoint}/org_id/{org}/{rest...}`.
    pub fn endpoint(&self, endpoint: &str, rest: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| ChifError::Config(format!("invalid base URL {}", self.api_base)))?
            .pop_if_empty()
            .push(endpoint)
            .push("org_id")
            .push(&self.org_id)
            .extend(rest);
        Ok(url)
    }

    fn authed(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    /// POST an encode payload; returns the new job's UUID.
    pub async fn submit_encode(&self, payload: MultipartPayload) -> Result<String> {
        let response = self.submit("encoder", payload).await?;
        let body: Value = response.json().await.map_err(|e| ChifError::UnexpectedResponse {
            operation: "encode",
            reason: e.to_string(),
        })?;
        let uuid = match body.get("task_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(ChifError::UnexpectedResponse {
                    operation: "encode",
                    reason: format!("no task_id in {body}"),
                })
            }
        };
        info!(%uuid, "Encode task submitted");
        Ok(uuid)
    }

    /// POST a decode payload; the response body is the decoded archive.
    pub async fn submit_decode(&self, payload: MultipartPayload) -> Result<Response> {
        self.submit("decoder", payload).await
    }

    #[instrument(level = "info", skip(self, payload), fields(fields = ?payload.fields()))]
    async fn submit(&self, endpoint: &'static str, payload: MultipartPayload) -> Result<Response> {
        let url = self.endpoint(endpoint, &[])?;
        let (form, handles) = payload.into_parts();

        info!("Submitting {endpoint} task");
        let sent = self.authed(Method::POST, url).multipart(form).send().await;
        handles.close();

        let response = sent?;
        let status = response.status();
        debug!(%status, "Received submission response");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Submission rejected");
            return Err(ChifError::Submission { status, body });
        }
        Ok(response)
    }

    /// Current status of a job.
    pub async fn status(&self, uuid: &str) -> Result<JobStatus> {
        let url = self.endpoint("check_files", &["task_ids", uuid])?;
        let body = self.send_json("status", self.authed(Method::GET, url)).await?;
        JobStatus::from_response(body)
    }

    /// Short-lived signed URL for a completed container.
    pub async fn download_url(&self, uuid: &str) -> Result<Url> {
        let entry = format!("{uuid}.chif");
        let url = self.endpoint("download_file", &["file_entry_id", &entry])?;
        self.send_url("download", self.authed(Method::GET, url)).await
    }

    pub async fn file_events(&self, uuid: &str, query: &EventQuery) -> Result<Value> {
        let url = self.endpoint("file_events", &["uuid", uuid])?;
        let request = self.authed(Method::GET, url).query(&query.params());
        self.send_json("events", request).await
    }

    pub async fn block(&self, uuid: &str, code: i64, reason: &str) -> Result<Value> {
        let url = self.endpoint("block_file", &["uuid", uuid])?;
        let request = self
            .authed(Method::POST, url)
            .json(&serde_json::json!({ "code": code, "reason": reason }));
        self.send_json("block", request).await
    }

    pub async fn unblock(&self, uuid: &str) -> Result<Value> {
        let url = self.endpoint("unblock_file", &["uuid", uuid])?;
        self.send_json("unblock", self.authed(Method::DELETE, url))
            .await
    }

    pub async fn block_status(&self, uuid: &str) -> Result<Value> {
        let url = self.endpoint("exception_file", &["uuid", uuid])?;
        self.send_json("get block", self.authed(Method::GET, url))
            .await
    }

    pub async fn delete(&self, uuid: &str) -> Result<Value> {
        let url = self.endpoint("delete_file", &["file_entry_id", uuid])?;
        self.send_json("delete", self.authed(Method::DELETE, url))
            .await
    }

    /// Publish to the CDN; returns the published container URL.
    pub async fn publish(&self, uuid: &str) -> Result<Url> {
        let url = self.endpoint("publish_file", &["file_entry_id", uuid])?;
        self.send_url("publish", self.authed(Method::POST, url))
            .await
    }

    pub async fn unpublish(&self, uuid: &str) -> Result<Value> {
        let url = self.endpoint("unpublish_file", &["file_entry_id", uuid])?;
        self.send_json("unpublish", self.authed(Method::DELETE, url))
            .await
    }

    /// All file entries of the organization.
    pub async fn file_entries(&self) -> Result<Value> {
        let url = self.endpoint("get_file_entry", &[])?;
        self.send_json("get files", self.authed(Method::GET, url))
            .await
    }

    async fn send_json(&self, operation: &'static str, request: RequestBuilder) -> Result<Value> {
        let response = check_status(operation, request.send().await?).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn send_url(&self, operation: &'static str, request: RequestBuilder) -> Result<Url> {
        let response = check_status(operation, request.send().await?).await?;
        let body: UrlResponse =
            response
                .json()
                .await
                .map_err(|e| ChifError::UnexpectedResponse {
                    operation,
                    reason: e.to_string(),
                })?;
        Url::parse(&body.url).map_err(|e| ChifError::UnexpectedResponse {
            operation,
            reason: format!("invalid url {:?}: {e}", body.url),
        })
    }
}

#[async_trait]
impl StatusSource for ChifClient {
    async fn job_status(&self, uuid: &str) -> Result<JobStatus> {
        self.status(uuid).await
    }
}

/// Turn a non-2xx response into [`ChifError::Api`] carrying the body.
pub(crate) async fn check_status(operation: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(operation, %status, "Request failed");
    Err(ChifError::Api {
        operation,
        status,
        body,
    })
}

fn api_base(base_url: &str) -> Result<Url> {
    let mut base = Url::parse(base_url)
        .map_err(|e| ChifError::Config(format!("invalid API URL {base_url:?}: {e}")))?;
    if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
        return Err(ChifError::Config(format!(
            "API URL must be http(s): {base_url:?}"
        )));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("api/")
        .map_err(|e| ChifError::Config(format!("invalid API URL {base_url:?}: {e}")))
}
