//! Remote service abstraction for docchat.
//!
//! The [`Backend`] trait defines every operation the stores need from the
//! answering service, enabling pluggable transports (HTTP in the `docchat`
//! crate, in-memory for tests and offline demos).
//!
//! Implementations hold no conversation or listing state of their own and
//! must be `Send + Sync` to be shared between stores.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    AskRequest, AskResponse, ChunkPage, DocumentPage, DocumentRow, DocumentStatusResponse,
    FeedbackAck, FeedbackRequest, ListFilters, ReindexRequest, ReindexResponse, UploadFile,
    UploadResponse,
};

/// Callback receiving the uploaded fraction in `[0.0, 1.0]`.
pub type UploadProgress = Arc<dyn Fn(f64) + Send + Sync>;

/// Query parameters of `GET /api/documents/{id}/chunks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkQuery {
    pub limit: u32,
    pub offset: u32,
    pub include_text: bool,
}

impl Default for ChunkQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            include_text: false,
        }
    }
}

/// Abstract client for the answering service.
///
/// # Operations
///
/// | Method | Endpoint |
/// |--------|----------|
/// | [`ask`](Backend::ask) | `POST /api/ask` |
/// | [`upload`](Backend::upload) | `POST /api/upload` |
/// | [`list_documents`](Backend::list_documents) | `GET /api/documents` |
/// | [`get_document`](Backend::get_document) | `GET /api/documents/{id}` |
/// | [`list_chunks`](Backend::list_chunks) | `GET /api/documents/{id}/chunks` |
/// | [`reindex`](Backend::reindex) | `POST /api/reindex` |
/// | [`reindex_one`](Backend::reindex_one) | `POST /api/documents/{id}/reindex` |
/// | [`delete_document`](Backend::delete_document) | `DELETE /api/documents/{id}` |
/// | [`send_feedback`](Backend::send_feedback) | `POST /api/feedback` |
#[async_trait]
pub trait Backend: Send + Sync {
    /// Ask a question. The answer arrives whole.
    async fn ask(&self, request: &AskRequest) -> Result<AskResponse>;

    /// Upload files as one multipart request, reporting progress as it goes.
    async fn upload(
        &self,
        files: Vec<UploadFile>,
        progress: Option<UploadProgress>,
    ) -> Result<UploadResponse>;

    /// List one page of documents matching the filters.
    async fn list_documents(&self, filters: &ListFilters) -> Result<DocumentPage>;

    async fn get_document(&self, id: &str) -> Result<DocumentRow>;

    /// List one page of a document's chunks, ordered by `idx`.
    async fn list_chunks(&self, id: &str, query: ChunkQuery) -> Result<ChunkPage>;

    /// Reindex either every pending document or an explicit id list.
    async fn reindex(&self, request: &ReindexRequest) -> Result<ReindexResponse>;

    async fn reindex_one(
        &self,
        id: &str,
        clear_first: bool,
        force: bool,
    ) -> Result<DocumentStatusResponse>;

    /// Delete a document, optionally removing its vectors too.
    async fn delete_document(&self, id: &str, clear_vectors: bool)
        -> Result<DocumentStatusResponse>;

    async fn send_feedback(&self, request: &FeedbackRequest) -> Result<FeedbackAck>;
}
