//! Document listing store: one filtered page of the corpus plus a selection.
//!
//! Rows are a page-sized cache of server state. Every applied refresh
//! replaces `rows` and `total` wholesale, clears the selection, and bumps the
//! snapshot version that batch operations validate against.
//!
//! Refreshes are fenced by a sequence number: only the most recently issued
//! one may apply its result. Changing a filter also invalidates any refresh
//! still in flight, since its rows belong to the old filters.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::models::{DocumentRow, DocumentStatus, ListFilters};
use crate::notice::Notice;
use crate::pagination::Pagination;

struct ListingState {
    filters: ListFilters,
    rows: Vec<DocumentRow>,
    total: u64,
    selection: HashSet<String>,
    version: u64,
    issued: u64,
}

impl ListingState {
    fn pagination(&self) -> Pagination {
        Pagination {
            limit: self.filters.limit,
            offset: self.filters.offset,
            total: self.total,
        }
    }

    /// Set the offset, invalidating in-flight refreshes when it changes.
    fn move_to(&mut self, offset: u32) -> bool {
        if self.filters.offset == offset {
            return false;
        }
        self.filters.offset = offset;
        self.issued += 1;
        true
    }

    fn filters_changed(&mut self) {
        self.filters.offset = 0;
        self.issued += 1;
    }
}

/// Point-in-time copy of the listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingSnapshot {
    pub filters: ListFilters,
    pub rows: Vec<DocumentRow>,
    pub total: u64,
    /// Selected ids, in row order.
    pub selected: Vec<String>,
    pub version: u64,
}

impl ListingSnapshot {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            limit: self.filters.limit,
            offset: self.filters.offset,
            total: self.total,
        }
    }
}

/// Shared handle to a document listing.
#[derive(Clone)]
pub struct DocumentListing {
    backend: Arc<dyn Backend>,
    state: Arc<Mutex<ListingState>>,
}

impl DocumentListing {
    pub fn new(backend: Arc<dyn Backend>, page_size: u32) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(ListingState {
                filters: ListFilters {
                    limit: page_size.max(1),
                    ..Default::default()
                },
                rows: Vec::new(),
                total: 0,
                selection: HashSet::new(),
                version: 0,
                issued: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ListingSnapshot {
        let state = self.lock();
        ListingSnapshot {
            filters: state.filters.clone(),
            rows: state.rows.clone(),
            total: state.total,
            selected: selected_in_order(&state),
            version: state.version,
        }
    }

    pub fn filters(&self) -> ListFilters {
        self.lock().filters.clone()
    }

    pub fn rows(&self) -> Vec<DocumentRow> {
        self.lock().rows.clone()
    }

    pub fn total(&self) -> u64 {
        self.lock().total
    }

    /// Incremented every time a refresh is applied.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn pagination(&self) -> Pagination {
        self.lock().pagination()
    }

    // ============ Filters and paging ============

    pub fn set_query_text(&self, query_text: &str) {
        let mut state = self.lock();
        state.filters.query_text = query_text.trim().to_string();
        state.filters_changed();
    }

    pub fn set_status(&self, status: Option<DocumentStatus>) {
        let mut state = self.lock();
        state.filters.status = status;
        state.filters_changed();
    }

    pub fn set_limit(&self, limit: u32) {
        let mut state = self.lock();
        state.filters.limit = limit.max(1);
        state.filters_changed();
    }

    /// Advance one page, clamped to the last page. Returns whether the offset moved.
    pub fn next_page(&self) -> bool {
        let mut state = self.lock();
        let offset = state.pagination().next_offset();
        state.move_to(offset)
    }

    /// Go back one page, clamped to the first page. Returns whether the offset moved.
    pub fn prev_page(&self) -> bool {
        let mut state = self.lock();
        let offset = state.pagination().prev_offset();
        state.move_to(offset)
    }

    /// Jump to a 1-based page number, clamped into range.
    pub fn go_to_page(&self, page: u64) -> bool {
        let mut state = self.lock();
        let offset = state.pagination().offset_for_page(page);
        state.move_to(offset)
    }

    // ============ Refresh ============

    /// Reload the current page.
    ///
    /// Returns an error notice when the listing call fails; rows, total and
    /// selection are then left as they were.
    ///
    /// When the corpus shrank under the current page (after a delete, say),
    /// the offset is pulled back to the last page and that page is loaded
    /// instead, once.
    pub async fn refresh(&self) -> Option<Notice> {
        let (mut seq, mut filters) = {
            let mut state = self.lock();
            state.issued += 1;
            (state.issued, state.filters.clone())
        };
        let mut clamped = false;

        loop {
            let result = self.backend.list_documents(&filters).await;

            let mut state = self.lock();
            if seq != state.issued {
                debug!(seq, latest = state.issued, "discarded stale listing");
                return None;
            }
            let page = match result {
                Ok(page) => page,
                Err(err) => {
                    warn!(error = %err, "listing failed");
                    return Some(Notice::error(format!("Failed to load documents: {:#}", err)));
                }
            };

            let past_end = page.documents.is_empty()
                && filters.offset > 0
                && u64::from(filters.offset) >= page.total;
            if past_end {
                let last = Pagination {
                    limit: filters.limit,
                    offset: filters.offset,
                    total: page.total,
                }
                .offset_for_page(u64::MAX);
                debug!(from = filters.offset, to = last, total = page.total, "offset past end");
                state.filters.offset = last;
                state.issued += 1;
                // Nothing to fetch when the corpus is empty; otherwise reload once.
                if page.total > 0 && !clamped {
                    clamped = true;
                    seq = state.issued;
                    filters = state.filters.clone();
                    continue;
                }
            }

            state.rows = page.documents;
            state.total = page.total;
            state.selection.clear();
            state.version += 1;
            return None;
        }
    }

    // ============ Selection ============

    /// Flip selection of a loaded row. Ids not on the current page are ignored.
    pub fn toggle(&self, id: &str) -> bool {
        let mut state = self.lock();
        if !state.rows.iter().any(|r| r.id == id) {
            return false;
        }
        if !state.selection.remove(id) {
            state.selection.insert(id.to_string());
        }
        true
    }

    /// Select every loaded row, or clear the selection when all are selected.
    pub fn toggle_all(&self) {
        let mut state = self.lock();
        if all_selected(&state) {
            state.selection.clear();
        } else {
            state.selection = state.rows.iter().map(|r| r.id.clone()).collect();
        }
    }

    pub fn clear_selection(&self) {
        self.lock().selection.clear();
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.lock().selection.contains(id)
    }

    /// True when there is at least one row and every row is selected.
    pub fn all_selected(&self) -> bool {
        all_selected(&self.lock())
    }

    pub fn selected_ids(&self) -> Vec<String> {
        selected_in_order(&self.lock())
    }

    /// Selected ids together with the version they belong to.
    pub fn selection_at_version(&self) -> (Vec<String>, u64) {
        let state = self.lock();
        (selected_in_order(&state), state.version)
    }

    /// Whether `id` is a row of the current snapshot.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().rows.iter().any(|r| r.id == id)
    }
}

fn all_selected(state: &ListingState) -> bool {
    !state.rows.is_empty() && state.rows.iter().all(|r| state.selection.contains(&r.id))
}

fn selected_in_order(state: &ListingState) -> Vec<String> {
    state
        .rows
        .iter()
        .filter(|r| state.selection.contains(&r.id))
        .map(|r| r.id.clone())
        .collect()
}
