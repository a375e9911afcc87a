//! In-memory [`Backend`] implementation for tests and offline demos.
//!
//! Documents and chunks live in `Vec`/`HashMap` behind `std::sync::RwLock`.
//! Answers are scripted: queue them with [`InMemoryBackend::push_answer`] or
//! [`InMemoryBackend::push_ask_error`]; when the queue is empty the query is
//! echoed back. Individual operations can be made to fail, and an ask, a
//! listing, or a mutation can be held open with
//! [`InMemoryBackend::hold_next_ask`], [`InMemoryBackend::hold_next_listing`]
//! and [`InMemoryBackend::hold_next_mutation`] to exercise races.
//! Every call is recorded and can be inspected with [`InMemoryBackend::calls`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::channel::oneshot;

use crate::models::{
    AskRequest, AskResponse, Chunk, ChunkPage, DocumentPage, DocumentRow, DocumentStatus,
    DocumentStatusResponse, FeedbackAck, FeedbackRequest, ListFilters, ReindexRequest,
    ReindexResponse, UploadFile, UploadResponse, UploadResult,
};

use super::{Backend, ChunkQuery, UploadProgress};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Ask(AskRequest),
    Upload(Vec<String>),
    List(ListFilters),
    Get(String),
    Chunks(String, ChunkQuery),
    Reindex(ReindexRequest),
    ReindexOne { id: String, clear_first: bool, force: bool },
    Delete { id: String, clear_vectors: bool },
    Feedback(FeedbackRequest),
}

/// Releases a call held by one of the `hold_next_*` methods.
///
/// Dropping the gate releases it as well.
pub struct Gate(oneshot::Sender<()>);

impl Gate {
    pub fn release(self) {
        let _ = self.0.send(());
    }
}

/// In-memory backend for tests and offline demos.
pub struct InMemoryBackend {
    docs: RwLock<Vec<DocumentRow>>,
    chunks: RwLock<HashMap<String, Vec<Chunk>>>,
    answers: Mutex<VecDeque<Result<AskResponse, String>>>,
    held_asks: Mutex<VecDeque<oneshot::Receiver<()>>>,
    held_listings: Mutex<VecDeque<oneshot::Receiver<()>>>,
    held_mutations: Mutex<VecDeque<oneshot::Receiver<()>>>,
    failing: RwLock<HashSet<String>>,
    fail_listing: RwLock<bool>,
    fail_reindex: RwLock<bool>,
    calls: Mutex<Vec<Call>>,
    next_doc: Mutex<u64>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            chunks: RwLock::new(HashMap::new()),
            answers: Mutex::new(VecDeque::new()),
            held_asks: Mutex::new(VecDeque::new()),
            held_listings: Mutex::new(VecDeque::new()),
            held_mutations: Mutex::new(VecDeque::new()),
            failing: RwLock::new(HashSet::new()),
            fail_listing: RwLock::new(false),
            fail_reindex: RwLock::new(false),
            calls: Mutex::new(Vec::new()),
            next_doc: Mutex::new(0),
        }
    }

    /// Seed a document. Newest documents are listed first.
    pub fn add_document(&self, filename: &str, status: DocumentStatus) -> String {
        let id = {
            let mut next = self.next_doc.lock().unwrap();
            *next += 1;
            format!("doc-{}", *next)
        };
        let now = Utc::now();
        self.docs.write().unwrap().insert(
            0,
            DocumentRow {
                id: id.clone(),
                filename: filename.to_string(),
                status,
                chunk_count: Some(0),
                byte_size: 0,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn set_chunks(&self, doc_id: &str, chunks: Vec<Chunk>) {
        if let Some(row) = self.docs.write().unwrap().iter_mut().find(|r| r.id == doc_id) {
            row.chunk_count = Some(chunks.len() as u64);
        }
        self.chunks.write().unwrap().insert(doc_id.to_string(), chunks);
    }

    pub fn push_answer(&self, response: AskResponse) {
        self.answers.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_ask_error(&self, message: &str) {
        self.answers.lock().unwrap().push_back(Err(message.to_string()));
    }

    /// Make the next ask wait until the returned gate is released.
    pub fn hold_next_ask(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.held_asks.lock().unwrap().push_back(rx);
        Gate(tx)
    }

    /// Make the next listing wait until the returned gate is released.
    ///
    /// The listing reads its documents after the gate opens.
    pub fn hold_next_listing(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.held_listings.lock().unwrap().push_back(rx);
        Gate(tx)
    }

    /// Make the next reindex or delete call wait until the returned gate is released.
    pub fn hold_next_mutation(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.held_mutations.lock().unwrap().push_back(rx);
        Gate(tx)
    }

    /// Make every mutation and lookup of this document id fail.
    pub fn fail_document(&self, id: &str) {
        self.failing.write().unwrap().insert(id.to_string());
    }

    pub fn set_fail_listing(&self, fail: bool) {
        *self.fail_listing.write().unwrap() = fail;
    }

    pub fn set_fail_reindex(&self, fail: bool) {
        *self.fail_reindex.write().unwrap() = fail;
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.docs.read().unwrap().iter().map(|r| r.id.clone()).collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of listing calls made so far.
    pub fn list_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::List(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn wait_if_held(queue: &Mutex<VecDeque<oneshot::Receiver<()>>>) {
        let held = queue.lock().unwrap().pop_front();
        if let Some(rx) = held {
            let _ = rx.await;
        }
    }

    fn check_document(&self, id: &str) -> Result<()> {
        if self.failing.read().unwrap().contains(id) {
            bail!("simulated failure for document {}", id);
        }
        if !self.docs.read().unwrap().iter().any(|r| r.id == id) {
            bail!("Document not found");
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn ask(&self, request: &AskRequest) -> Result<AskResponse> {
        self.record(Call::Ask(request.clone()));
        Self::wait_if_held(&self.held_asks).await;
        let scripted = self.answers.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(AskResponse {
                answer: Some(format!("You asked: {}", request.query)),
                ..Default::default()
            }),
        }
    }

    async fn upload(
        &self,
        files: Vec<UploadFile>,
        progress: Option<UploadProgress>,
    ) -> Result<UploadResponse> {
        self.record(Call::Upload(files.iter().map(|f| f.name.clone()).collect()));
        if files.is_empty() {
            bail!("No files provided.");
        }
        let mut results = Vec::with_capacity(files.len());
        for file in &files {
            let id = self.add_document(&file.name, DocumentStatus::Uploaded);
            if let Some(row) = self.docs.write().unwrap().iter_mut().find(|r| r.id == id) {
                row.byte_size = file.bytes.len() as u64;
            }
            results.push(UploadResult {
                id: Some(id),
                filename: file.name.clone(),
                status: Some("uploaded".to_string()),
                chunks: Some(0),
                vectors: Some(0),
                ..Default::default()
            });
        }
        if let Some(report) = progress {
            report(1.0);
        }
        Ok(UploadResponse {
            documents: results,
            total_chunks: 0,
            vectorized: false,
            workspace: None,
        })
    }

    async fn list_documents(&self, filters: &ListFilters) -> Result<DocumentPage> {
        self.record(Call::List(filters.clone()));
        Self::wait_if_held(&self.held_listings).await;
        if *self.fail_listing.read().unwrap() {
            bail!("simulated listing failure");
        }
        let needle = filters.query_text.to_lowercase();
        let docs = self.docs.read().unwrap();
        let matching: Vec<&DocumentRow> = docs
            .iter()
            .filter(|r| needle.is_empty() || r.filename.to_lowercase().contains(&needle))
            .filter(|r| filters.status.as_ref().map_or(true, |s| &r.status == s))
            .collect();
        Ok(DocumentPage {
            total: matching.len() as u64,
            documents: matching
                .into_iter()
                .skip(filters.offset as usize)
                .take(filters.limit as usize)
                .cloned()
                .collect(),
        })
    }

    async fn get_document(&self, id: &str) -> Result<DocumentRow> {
        self.record(Call::Get(id.to_string()));
        self.check_document(id)?;
        self.docs
            .read()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("Document not found"))
    }

    async fn list_chunks(&self, id: &str, query: ChunkQuery) -> Result<ChunkPage> {
        self.record(Call::Chunks(id.to_string(), query));
        self.check_document(id)?;
        let all = self.chunks.read().unwrap();
        let chunks = all.get(id).cloned().unwrap_or_default();
        Ok(ChunkPage {
            total: chunks.len() as u64,
            chunks: chunks
                .into_iter()
                .skip(query.offset as usize)
                .take(query.limit as usize)
                .map(|mut c| {
                    if !query.include_text {
                        c.text = None;
                    }
                    c
                })
                .collect(),
        })
    }

    async fn reindex(&self, request: &ReindexRequest) -> Result<ReindexResponse> {
        self.record(Call::Reindex(request.clone()));
        Self::wait_if_held(&self.held_mutations).await;
        if *self.fail_reindex.read().unwrap() {
            bail!("simulated reindex failure");
        }
        if request.document_ids.is_empty() && !request.all_pending {
            bail!("Provide 'document_ids' or set 'all_pending': true");
        }
        let failing = self.failing.read().unwrap().clone();
        let mut docs = self.docs.write().unwrap();
        let mut updated = 0;
        for row in docs.iter_mut() {
            let targeted = if request.document_ids.is_empty() {
                row.status.is_pending()
            } else {
                request.document_ids.contains(&row.id)
            };
            if targeted && !failing.contains(&row.id) {
                row.status = DocumentStatus::Processed;
                row.updated_at = Utc::now();
                updated += 1;
            }
        }
        Ok(ReindexResponse { updated })
    }

    async fn reindex_one(
        &self,
        id: &str,
        clear_first: bool,
        force: bool,
    ) -> Result<DocumentStatusResponse> {
        self.record(Call::ReindexOne {
            id: id.to_string(),
            clear_first,
            force,
        });
        Self::wait_if_held(&self.held_mutations).await;
        if *self.fail_reindex.read().unwrap() {
            bail!("simulated reindex failure");
        }
        self.check_document(id)?;
        let mut docs = self.docs.write().unwrap();
        let row = docs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("Document not found"))?;
        row.status = DocumentStatus::Processed;
        row.updated_at = Utc::now();
        Ok(DocumentStatusResponse {
            id: Some(row.id.clone()),
            status: Some(row.status.to_string()),
            chunks: row.chunk_count,
        })
    }

    async fn delete_document(
        &self,
        id: &str,
        clear_vectors: bool,
    ) -> Result<DocumentStatusResponse> {
        self.record(Call::Delete {
            id: id.to_string(),
            clear_vectors,
        });
        Self::wait_if_held(&self.held_mutations).await;
        self.check_document(id)?;
        self.docs.write().unwrap().retain(|r| r.id != id);
        self.chunks.write().unwrap().remove(id);
        Ok(DocumentStatusResponse {
            id: Some(id.to_string()),
            status: Some("deleted".to_string()),
            chunks: None,
        })
    }

    async fn send_feedback(&self, request: &FeedbackRequest) -> Result<FeedbackAck> {
        self.record(Call::Feedback(request.clone()));
        if request.query_id.is_empty() {
            bail!("Query not found");
        }
        Ok(FeedbackAck {
            ok: true,
            updated: 0,
            feedback_id: Some(format!("fb-{}", request.query_id)),
        })
    }
}
