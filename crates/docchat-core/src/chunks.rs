//! Chunk browser for a single document.
//!
//! Loads the document row for a header and pages through its chunks with
//! the same offset/limit contract as the document listing. A failed header
//! lookup is not fatal: the browser keeps working and titles itself by id.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::backend::{Backend, ChunkQuery};
use crate::models::{Chunk, DocumentRow};
use crate::notice::Notice;
use crate::pagination::Pagination;

/// Chunks shown per page unless configured otherwise.
pub const DEFAULT_CHUNK_PAGE_SIZE: u32 = 20;

struct BrowserState {
    document: Option<DocumentRow>,
    chunks: Vec<Chunk>,
    total: u64,
    offset: u32,
    issued: u64,
}

#[derive(Clone)]
pub struct ChunkBrowser {
    backend: Arc<dyn Backend>,
    doc_id: String,
    limit: u32,
    include_text: bool,
    state: Arc<Mutex<BrowserState>>,
}

impl ChunkBrowser {
    pub fn new(backend: Arc<dyn Backend>, doc_id: &str, limit: u32) -> Self {
        Self {
            backend,
            doc_id: doc_id.to_string(),
            limit: limit.max(1),
            include_text: false,
            state: Arc::new(Mutex::new(BrowserState {
                document: None,
                chunks: Vec::new(),
                total: 0,
                offset: 0,
                issued: 0,
            })),
        }
    }

    /// Request full chunk text instead of previews.
    pub fn with_text(mut self, include_text: bool) -> Self {
        self.include_text = include_text;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn document(&self) -> Option<DocumentRow> {
        self.lock().document.clone()
    }

    /// Filename when the header loaded, otherwise the document id.
    pub fn title(&self) -> String {
        self.lock()
            .document
            .as_ref()
            .map(|d| d.filename.clone())
            .unwrap_or_else(|| self.doc_id.clone())
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.lock().chunks.clone()
    }

    pub fn pagination(&self) -> Pagination {
        let state = self.lock();
        Pagination {
            limit: self.limit,
            offset: state.offset,
            total: state.total,
        }
    }

    /// Load the document header and the first page of chunks.
    pub async fn open(&self) -> Option<Notice> {
        match self.backend.get_document(&self.doc_id).await {
            Ok(row) => self.lock().document = Some(row),
            Err(err) => {
                debug!(document = %self.doc_id, error = %err, "document header unavailable");
                self.lock().document = None;
            }
        }
        self.lock().offset = 0;
        self.load().await
    }

    pub async fn next_page(&self) -> Option<Notice> {
        let offset = self.pagination().next_offset();
        self.move_to(offset).await
    }

    pub async fn prev_page(&self) -> Option<Notice> {
        let offset = self.pagination().prev_offset();
        self.move_to(offset).await
    }

    /// Jump to a 1-based page, clamped into the known range.
    pub async fn go_to_page(&self, page: u64) -> Option<Notice> {
        let offset = self.pagination().offset_for_page(page);
        self.move_to(offset).await
    }

    async fn move_to(&self, offset: u32) -> Option<Notice> {
        {
            let mut state = self.lock();
            if state.offset == offset {
                return None;
            }
            state.offset = offset;
        }
        self.load().await
    }

    /// Reload the current page of chunks.
    pub async fn load(&self) -> Option<Notice> {
        let (seq, offset) = {
            let mut state = self.lock();
            state.issued += 1;
            (state.issued, state.offset)
        };
        let query = ChunkQuery {
            limit: self.limit,
            offset,
            include_text: self.include_text,
        };

        let result = self.backend.list_chunks(&self.doc_id, query).await;

        let mut state = self.lock();
        if seq != state.issued {
            debug!(seq, "discarded stale chunk page");
            return None;
        }
        match result {
            Ok(page) => {
                state.chunks = page.chunks;
                state.total = page.total;
                None
            }
            Err(err) => {
                warn!(document = %self.doc_id, error = %err, "chunk listing failed");
                Some(Notice::error(format!("Failed to load chunks: {:#}", err)))
            }
        }
    }
}
