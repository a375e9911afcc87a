//! HTTP implementation of [`Backend`].
//!
//! Connection settings (base URL, API key, workspace) live behind a
//! [`SettingsHandle`]. The client reads the current value at the start of
//! every request, so an update takes effect on the next call without
//! rebuilding the client.
//!
//! Non-2xx responses become errors of the form
//! `"{METHOD} {path} failed with {status}: {detail}"`, where `detail` is the
//! service's `detail` field when the body carries one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};

use docchat_core::backend::{Backend, ChunkQuery, UploadProgress};
use docchat_core::models::{
    AskRequest, AskResponse, ChunkPage, DocumentPage, DocumentRow, DocumentStatusResponse,
    FeedbackAck, FeedbackRequest, ListFilters, ReindexRequest, ReindexResponse, UploadFile,
    UploadResponse,
};

use crate::config::{Config, ServerConfig};

/// Upload bodies are streamed in pieces of this size so progress can be reported.
const UPLOAD_PIECE: usize = 64 * 1024;

/// Where and how to reach the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub workspace: Option<String>,
}

impl ConnectionSettings {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: None,
            api_key_header: "X-OpenAI-Key".to_string(),
            workspace: None,
        }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        Self {
            base_url: server.base_url.clone(),
            api_key: server.api_key.clone().filter(|k| !k.trim().is_empty()),
            api_key_header: server.api_key_header.clone(),
            workspace: server.workspace.clone().filter(|w| !w.trim().is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Shared, updatable connection settings.
#[derive(Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<ConnectionSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: ConnectionSettings) -> Self {
        let (tx, _rx) = watch::channel(settings);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> ConnectionSettings {
        self.tx.borrow().clone()
    }

    /// Replace the settings; requests started afterwards use the new value.
    pub fn set(&self, settings: ConnectionSettings) {
        self.tx.send_replace(settings);
    }

    /// Modify the settings in place.
    pub fn update(&self, f: impl FnOnce(&mut ConnectionSettings)) {
        self.tx.send_modify(f);
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionSettings> {
        self.tx.subscribe()
    }
}

/// [`Backend`] over HTTP + JSON.
pub struct HttpBackend {
    client: reqwest::Client,
    settings: watch::Receiver<ConnectionSettings>,
}

impl HttpBackend {
    pub fn new(settings: &SettingsHandle, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            settings: settings.subscribe(),
        })
    }

    /// Build a request with the current settings applied.
    ///
    /// `with_key` controls whether the API key header is attached; only the
    /// endpoints that call the model need it.
    fn request(&self, method: Method, path: &str, with_key: bool) -> RequestBuilder {
        let settings = self.settings.borrow().clone();
        let mut req = self.client.request(method, settings.url(path));
        if with_key {
            if let Some(key) = &settings.api_key {
                req = req.header(settings.api_key_header.as_str(), key.as_str());
            }
        }
        if let Some(workspace) = &settings.workspace {
            req = req.header("X-Workspace", workspace.as_str());
        }
        req
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        req: RequestBuilder,
    ) -> Result<T> {
        debug!(%method, path, "request");
        let resp = req
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, path))?;
        let resp = check_status(&method, path, resp).await?;
        resp.json::<T>()
            .await
            .with_context(|| format!("{} {} returned an unreadable body", method, path))
    }
}

/// Build the HTTP backend and its settings handle from configuration.
pub fn connect(config: &Config) -> Result<(Arc<HttpBackend>, SettingsHandle)> {
    let settings = SettingsHandle::new(ConnectionSettings::from_config(&config.server));
    let backend = HttpBackend::new(&settings, config.server.timeout())?;
    Ok((Arc::new(backend), settings))
}

/// Turn a non-2xx response into an error carrying the service's `detail`.
async fn check_status(method: &Method, path: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = error_detail(&body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_default();
    warn!(%method, path, status = status.as_u16(), detail = %detail, "request failed");
    bail!("{} {} failed with {}: {}", method, path, status.as_u16(), detail)
}

/// The `detail` field of an error body, or the body itself when it is short plain text.
fn error_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match value.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => Some(body.to_string()),
        },
        Err(_) => Some(body.chars().take(200).collect()),
    }
}

/// `/api/documents/{id}` followed by `suffix`, with `id` encoded as a single
/// path segment.
pub fn document_path(id: &str, suffix: &str) -> Result<String> {
    if matches!(id, "" | "." | "..") {
        bail!("Invalid document id: '{}'", id);
    }
    Ok(format!("/api/documents/{}{}", urlencoding::encode(id), suffix))
}

/// Query string for the document listing. `q` and `status` are omitted when empty.
pub fn listing_query(filters: &ListFilters) -> Vec<(&'static str, String)> {
    let mut params = Vec::with_capacity(4);
    if !filters.query_text.is_empty() {
        params.push(("q", filters.query_text.clone()));
    }
    if let Some(status) = &filters.status {
        params.push(("status", status.to_string()));
    }
    params.push(("limit", filters.limit.to_string()));
    params.push(("offset", filters.offset.to_string()));
    params
}

/// Query string for a chunk page. `include_text` is only sent when set.
pub fn chunk_query(query: ChunkQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("limit", query.limit.to_string()),
        ("offset", query.offset.to_string()),
    ];
    if query.include_text {
        params.push(("include_text", "true".to_string()));
    }
    params
}

/// A streamed body that reports the running fraction of `total` bytes sent.
fn progress_body(
    bytes: Vec<u8>,
    sent: Arc<AtomicU64>,
    total: u64,
    progress: Option<UploadProgress>,
) -> reqwest::Body {
    let data = Bytes::from(bytes);
    let pieces: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_PIECE)
        .map(|start| data.slice(start..(start + UPLOAD_PIECE).min(data.len())))
        .collect();
    let stream = futures::stream::iter(pieces.into_iter().map(move |piece| {
        let done = sent.fetch_add(piece.len() as u64, Ordering::Relaxed) + piece.len() as u64;
        if let Some(report) = &progress {
            report((done as f64 / total.max(1) as f64).min(1.0));
        }
        Ok::<Bytes, std::io::Error>(piece)
    }));
    reqwest::Body::wrap_stream(stream)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn ask(&self, request: &AskRequest) -> Result<AskResponse> {
        let req = self.request(Method::POST, "/api/ask", true).json(request);
        self.send(Method::POST, "/api/ask", req).await
    }

    async fn upload(
        &self,
        files: Vec<UploadFile>,
        progress: Option<UploadProgress>,
    ) -> Result<UploadResponse> {
        if files.is_empty() {
            bail!("No files provided.");
        }
        let total: u64 = files.iter().map(|f| f.bytes.len() as u64).sum();
        let sent = Arc::new(AtomicU64::new(0));

        let mut form = multipart::Form::new();
        for file in files {
            let len = file.bytes.len() as u64;
            let body = progress_body(file.bytes, sent.clone(), total, progress.clone());
            let part = multipart::Part::stream_with_length(body, len)
                .file_name(file.name.clone())
                .mime_str(&file.mime)
                .with_context(|| format!("Invalid content type for {}", file.name))?;
            form = form.part("files", part);
        }

        let req = self.request(Method::POST, "/api/upload", true).multipart(form);
        let resp: UploadResponse = self.send(Method::POST, "/api/upload", req).await?;
        if let Some(report) = &progress {
            report(1.0);
        }
        Ok(resp)
    }

    async fn list_documents(&self, filters: &ListFilters) -> Result<DocumentPage> {
        let req = self
            .request(Method::GET, "/api/documents", false)
            .query(&listing_query(filters));
        self.send(Method::GET, "/api/documents", req).await
    }

    async fn get_document(&self, id: &str) -> Result<DocumentRow> {
        let path = document_path(id, "")?;
        let req = self.request(Method::GET, &path, false);
        self.send(Method::GET, &path, req).await
    }

    async fn list_chunks(&self, id: &str, query: ChunkQuery) -> Result<ChunkPage> {
        let path = document_path(id, "/chunks")?;
        let req = self
            .request(Method::GET, &path, false)
            .query(&chunk_query(query));
        self.send(Method::GET, &path, req).await
    }

    async fn reindex(&self, request: &ReindexRequest) -> Result<ReindexResponse> {
        let req = self.request(Method::POST, "/api/reindex", true).json(request);
        self.send(Method::POST, "/api/reindex", req).await
    }

    async fn reindex_one(
        &self,
        id: &str,
        clear_first: bool,
        force: bool,
    ) -> Result<DocumentStatusResponse> {
        let path = document_path(id, "/reindex")?;
        let req = self
            .request(Method::POST, &path, true)
            .query(&[("clear_first", clear_first), ("force", force)])
            .json(&serde_json::json!({}));
        self.send(Method::POST, &path, req).await
    }

    async fn delete_document(
        &self,
        id: &str,
        clear_vectors: bool,
    ) -> Result<DocumentStatusResponse> {
        let path = document_path(id, "")?;
        let req = self
            .request(Method::DELETE, &path, false)
            .query(&[("clear_vectors", clear_vectors)]);
        self.send(Method::DELETE, &path, req).await
    }

    async fn send_feedback(&self, request: &FeedbackRequest) -> Result<FeedbackAck> {
        let req = self.request(Method::POST, "/api/feedback", false).json(request);
        self.send(Method::POST, "/api/feedback", req).await
    }
}
