//! In-process stand-in for the CHIF manager service.
//!
//! "Encoding" packs the uploaded parts into a JSON container and "decoding"
//! unpacks them again, which is enough to check that bytes survive the
//! round trip. Every request the client makes is recorded in [`FakeState`].

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use chif_core::{ChifClient, ClientConfig, PollInterval, PollOptions, Pipeline};

pub const ORG: &str = "test-org";
pub const TOKEN: &str = "test-token";
pub const ECHO_IP: &str = "203.0.113.7";

/// One multipart upload as the service saw it.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// `(field name, upload file name)` in body order.
    pub fields: Vec<(String, Option<String>)>,
    pub chif_name: Option<String>,
    pub manifest: Option<Value>,
    pub files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug)]
pub struct FakeState {
    base_url: String,
    statuses: Mutex<Vec<String>>,
    pub status_queries: AtomicUsize,
    pub containers: Mutex<HashMap<String, Vec<u8>>>,
    pub encodes: Mutex<Vec<Upload>>,
    pub decodes: Mutex<Vec<Upload>>,
    /// Whether each signed-URL fetch carried an `Authorization` header.
    pub blob_auth: Mutex<Vec<bool>>,
    pub reject_encode: AtomicBool,
    pub omit_disposition: AtomicBool,
    pub ip_failures: AtomicUsize,
    pub ip_requests: AtomicUsize,
    /// `"{endpoint} {id}"` for every management call.
    pub calls: Mutex<Vec<String>>,
    pub event_queries: Mutex<Vec<HashMap<String, String>>>,
    pub blocks: Mutex<Vec<Value>>,
}

impl FakeState {
    fn new(base_url: String) -> Self {
        Self {
            base_url,
            statuses: Mutex::new(vec![
                "pending".into(),
                "processing".into(),
                "completed".into(),
            ]),
            status_queries: AtomicUsize::new(0),
            containers: Mutex::new(HashMap::new()),
            encodes: Mutex::new(Vec::new()),
            decodes: Mutex::new(Vec::new()),
            blob_auth: Mutex::new(Vec::new()),
            reject_encode: AtomicBool::new(false),
            omit_disposition: AtomicBool::new(false),
            ip_failures: AtomicUsize::new(0),
            ip_requests: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            event_queries: Mutex::new(Vec::new()),
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Statuses reported by successive polls; the last one repeats.
    pub fn script_statuses(&self, statuses: &[&str]) {
        *self.statuses.lock().unwrap() = statuses.iter().map(|s| s.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_encode(&self) -> Upload {
        self.encodes.lock().unwrap().last().cloned().expect("no encode received")
    }

    fn next_status(&self) -> String {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.remove(0)
        } else {
            statuses.first().cloned().unwrap_or_else(|| "completed".into())
        }
    }

    fn record(&self, endpoint: &str, id: &str) {
        self.calls.lock().unwrap().push(format!("{endpoint} {id}"));
    }
}

type Shared = Arc<FakeState>;

/// A running fake service; shut down on drop.
pub struct FakeChif {
    pub state: Shared,
    pub base_url: String,
    server: JoinHandle<()>,
}

impl FakeChif {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(FakeState::new(base_url.clone()));

        let app = router(state.clone());
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base_url,
            server,
        }
    }

    pub fn client(&self) -> ChifClient {
        ChifClient::new(ClientConfig::new(&self.base_url, ORG, TOKEN)).unwrap()
    }

    pub fn ip_echo_url(&self) -> Url {
        Url::parse(&format!("{}/ip", self.base_url)).unwrap()
    }

    /// Pipeline with fast polling and the fake IP echo endpoint.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.client())
            .with_poll_options(PollOptions {
                interval: PollInterval::Fixed(Duration::from_millis(10)),
                max_attempts: Some(50),
                max_wait: None,
            })
            .with_ip_echo_url(Some(self.ip_echo_url()))
    }
}

impl Drop for FakeChif {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/encoder/org_id/{org}", post(encode))
        .route("/api/decoder/org_id/{org}", post(decode))
        .route("/api/check_files/org_id/{org}/task_ids/{uuid}", get(check_files))
        .route(
            "/api/download_file/org_id/{org}/file_entry_id/{entry}",
            get(download_file),
        )
        .route("/api/file_events/org_id/{org}/uuid/{uuid}", get(file_events))
        .route("/api/block_file/org_id/{org}/uuid/{uuid}", post(block_file))
        .route("/api/unblock_file/org_id/{org}/uuid/{uuid}", delete(unblock_file))
        .route("/api/exception_file/org_id/{org}/uuid/{uuid}", get(exception_file))
        .route(
            "/api/delete_file/org_id/{org}/file_entry_id/{uuid}",
            delete(delete_file),
        )
        .route(
            "/api/publish_file/org_id/{org}/file_entry_id/{uuid}",
            post(publish_file),
        )
        .route(
            "/api/unpublish_file/org_id/{org}/file_entry_id/{uuid}",
            delete(unpublish_file),
        )
        .route("/api/get_file_entry/org_id/{org}", get(get_file_entry))
        .route("/blob/{uuid}", get(blob))
        .route("/ip", get(ip))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

fn authorize(headers: &HeaderMap, org: &str) -> Result<(), Response> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if bearer != Some(format!("Bearer {TOKEN}").as_str()) {
        return Err((StatusCode::UNAUTHORIZED, Json(json!({ "detail": "bad token" }))).into_response());
    }
    if org != ORG {
        return Err((StatusCode::NOT_FOUND, Json(json!({ "detail": "unknown org" }))).into_response());
    }
    Ok(())
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, Response> {
    let bad = |e: axum::extract::multipart::MultipartError| {
        (StatusCode::BAD_REQUEST, e.to_string()).into_response()
    };

    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(bad)?.to_vec();
        upload.fields.push((name.clone(), file_name));

        match name.as_str() {
            "chifName" => upload.chif_name = Some(String::from_utf8_lossy(&data).into_owned()),
            "manifest" => {
                let manifest = serde_json::from_slice(&data)
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?;
                upload.manifest = Some(manifest);
            }
            _ => {
                upload.files.insert(name, data);
            }
        }
    }
    Ok(upload)
}

async fn encode(
    State(state): State<Shared>,
    Path(org): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(rejected) => return rejected,
    };
    state.encodes.lock().unwrap().push(upload.clone());

    if state.reject_encode.load(Ordering::SeqCst) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": "manifest rejected: missing title" })),
        )
            .into_response();
    }

    let parts: serde_json::Map<String, Value> = upload
        .files
        .iter()
        .map(|(name, data)| (name.clone(), Value::String(STANDARD.encode(data))))
        .collect();
    let container = json!({
        "chifName": upload.chif_name,
        "manifest": upload.manifest,
        "parts": parts,
    });

    let uuid = uuid::Uuid::new_v4().to_string();
    state
        .containers
        .lock()
        .unwrap()
        .insert(uuid.clone(), container.to_string().into_bytes());

    Json(json!({ "task_id": uuid })).into_response()
}

async fn decode(
    State(state): State<Shared>,
    Path(org): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(rejected) => return rejected,
    };
    state.decodes.lock().unwrap().push(upload.clone());

    let Some(container) = upload
        .files
        .get("chif")
        .and_then(|bytes| serde_json::from_slice::<Value>(bytes).ok())
    else {
        return (StatusCode::BAD_REQUEST, "not a container").into_response();
    };

    let name = container["chifName"].as_str().unwrap_or("decoded").to_string();
    let archive = json!({ "parts": container["parts"] }).to_string();

    if state.omit_disposition.load(Ordering::SeqCst) {
        return (StatusCode::OK, archive).into_response();
    }
    (
        StatusCode::OK,
        [(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}.zip\""),
        )],
        archive,
    )
        .into_response()
}

async fn check_files(
    State(state): State<Shared>,
    Path((org, uuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    let status = state.next_status();
    Json(json!([{ "uuid": uuid, "queue_status": status }])).into_response()
}

async fn download_file(
    State(state): State<Shared>,
    Path((org, entry)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    let uuid = entry.trim_end_matches(".chif");
    if !state.containers.lock().unwrap().contains_key(uuid) {
        return (StatusCode::NOT_FOUND, Json(json!({ "detail": "no such file" }))).into_response();
    }
    let url = format!("{}/blob/{uuid}?sig=signed", state.base_url);
    Json(json!({ "url": url })).into_response()
}

async fn blob(
    State(state): State<Shared>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
) -> Response {
    state
        .blob_auth
        .lock()
        .unwrap()
        .push(headers.contains_key(header::AUTHORIZATION));
    match state.containers.lock().unwrap().get(&uuid) {
        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn ip(State(state): State<Shared>) -> Response {
    state.ip_requests.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .ip_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ECHO_IP.into_response()
}

async fn file_events(
    State(state): State<Shared>,
    Path((org, uuid)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    state.event_queries.lock().unwrap().push(query);
    state.record("file_events", &uuid);
    Json(json!([{ "uuid": uuid, "event": "VIEW" }])).into_response()
}

async fn block_file(
    State(state): State<Shared>,
    Path((org, uuid)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    state.blocks.lock().unwrap().push(body);
    state.record("block_file", &uuid);
    Json(json!({ "blocked": uuid })).into_response()
}

async fn unblock_file(
    State(state): State<Shared>,
    Path((org, uuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    state.record("unblock_file", &uuid);
    StatusCode::NO_CONTENT.into_response()
}

async fn exception_file(
    State(state): State<Shared>,
    Path((org, uuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    state.record("exception_file", &uuid);
    let block = state.blocks.lock().unwrap().last().cloned();
    match block {
        Some(block) => Json(json!({ "uuid": uuid, "block": block })).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "detail": "not blocked" }))).into_response(),
    }
}

async fn delete_file(
    State(state): State<Shared>,
    Path((org, uuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    state.record("delete_file", &uuid);
    state.containers.lock().unwrap().remove(&uuid);
    Json(json!({ "deleted": uuid })).into_response()
}

async fn publish_file(
    State(state): State<Shared>,
    Path((org, uuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    state.record("publish_file", &uuid);
    let url = format!("{}/cdn/{org}/{uuid}.chif", state.base_url);
    Json(json!({ "url": url })).into_response()
}

async fn unpublish_file(
    State(state): State<Shared>,
    Path((org, uuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    state.record("unpublish_file", &uuid);
    Json(json!({ "unpublished": uuid })).into_response()
}

async fn get_file_entry(
    State(state): State<Shared>,
    Path(org): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&headers, &org) {
        return denied;
    }
    let entries: Vec<Value> = state
        .containers
        .lock()
        .unwrap()
        .keys()
        .map(|uuid| json!({ "file_entry_id": format!("{uuid}.chif") }))
        .collect();
    Json(Value::Array(entries)).into_response()
}

/// Decoded archive produced by the fake decoder: field name to bytes.
pub fn unpack_archive(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let archive: Value = serde_json::from_slice(bytes).unwrap();
    archive["parts"]
        .as_object()
        .unwrap()
        .iter()
        .map(|(name, data)| (name.clone(), STANDARD.decode(data.as_str().unwrap()).unwrap()))
        .collect()
}
