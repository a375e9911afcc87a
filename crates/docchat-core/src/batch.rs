//! Batch operations over documents: reindex and delete.
//!
//! Every operation that reaches the backend settles completely before it
//! reports, then refreshes the listing exactly once with the active filters.
//! Deletes run concurrently, one call per id, and a failing id never stops
//! the others from being attempted or counted.
//!
//! Deleting is split into a plan and an execute step. A [`DeletePlan`]
//! remembers the listing version its ids were taken from, and executing it
//! against a listing that has since been refreshed is refused.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::listing::DocumentListing;
use crate::models::ReindexRequest;
use crate::notice::Notice;

/// Shown when a selection-based operation runs with nothing selected.
pub const EMPTY_SELECTION: &str = "Select at least one document";

/// Shown when a delete plan was made against an older listing.
pub const STALE_PLAN: &str = "The document list changed; review the selection and try again";

/// Aggregate result of a dispatched batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Settled {
    pub ok: usize,
    pub fail: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Requesting { in_flight: usize },
    Settled(Settled),
}

/// What a batch call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub notice: Notice,
    /// `None` when the call was refused before reaching the backend.
    pub settled: Option<Settled>,
}

impl BatchReport {
    fn refused(notice: Notice) -> Self {
        Self {
            notice,
            settled: None,
        }
    }

    pub fn dispatched(&self) -> bool {
        self.settled.is_some()
    }
}

/// Ids chosen for deletion, bound to the listing version they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePlan {
    ids: Vec<String>,
    version: u64,
}

impl DeletePlan {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Default)]
struct EngineState {
    in_flight: usize,
    last: Option<Settled>,
}

/// Decrements the in-flight count when a dispatch ends, even if its future
/// is dropped before settling.
struct InFlight<'a> {
    state: &'a Mutex<EngineState>,
}

impl<'a> InFlight<'a> {
    fn enter(state: &'a Mutex<EngineState>) -> Self {
        lock(state).in_flight += 1;
        Self { state }
    }

    fn settle(self, settled: Settled) {
        lock(self.state).last = Some(settled);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs reindex and delete batches against a [`DocumentListing`].
#[derive(Clone)]
pub struct BatchEngine {
    backend: Arc<dyn Backend>,
    listing: DocumentListing,
    state: Arc<Mutex<EngineState>>,
}

impl BatchEngine {
    pub fn new(backend: Arc<dyn Backend>, listing: DocumentListing) -> Self {
        Self {
            backend,
            listing,
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    pub fn listing(&self) -> &DocumentListing {
        &self.listing
    }

    pub fn state(&self) -> BatchState {
        let state = lock(&self.state);
        match (state.in_flight, state.last) {
            (0, None) => BatchState::Idle,
            (0, Some(settled)) => BatchState::Settled(settled),
            (in_flight, _) => BatchState::Requesting { in_flight },
        }
    }

    /// Clear the last settled outcome, returning to `Idle` when nothing is in flight.
    pub fn acknowledge(&self) {
        lock(&self.state).last = None;
    }

    // ============ Reindex ============

    /// Reindex every document whose status is `uploaded` or `failed`.
    pub async fn reindex_pending(&self) -> BatchReport {
        let guard = InFlight::enter(&self.state);
        let request = ReindexRequest {
            all_pending: true,
            clear_first: true,
            ..Default::default()
        };
        let (settled, notice) = match self.backend.reindex(&request).await {
            Ok(resp) => (
                Settled {
                    ok: resp.updated as usize,
                    fail: 0,
                },
                Notice::success(format!("Reindexed {} document(s)", resp.updated)),
            ),
            Err(err) => {
                warn!(error = %err, "reindex of pending documents failed");
                (Settled { ok: 0, fail: 1 }, Notice::error(format!("Reindex failed: {:#}", err)))
            }
        };
        self.finish("reindex_pending", guard, settled, notice).await
    }

    /// Force-reindex the selected documents.
    pub async fn reindex_selected(&self) -> BatchReport {
        let ids = self.listing.selected_ids();
        if ids.is_empty() {
            return BatchReport::refused(Notice::info(EMPTY_SELECTION));
        }
        let guard = InFlight::enter(&self.state);
        let requested = ids.len();
        let request = ReindexRequest {
            document_ids: ids,
            force: true,
            clear_first: true,
            ..Default::default()
        };
        let (settled, notice) = match self.backend.reindex(&request).await {
            Ok(resp) => {
                let ok = resp.updated as usize;
                (
                    Settled {
                        ok,
                        fail: requested.saturating_sub(ok),
                    },
                    Notice::success(format!("Reindexed {} document(s)", resp.updated)),
                )
            }
            Err(err) => {
                warn!(error = %err, count = requested, "reindex of selection failed");
                (
                    Settled {
                        ok: 0,
                        fail: requested,
                    },
                    Notice::error(format!("Reindex failed: {:#}", err)),
                )
            }
        };
        self.finish("reindex_selected", guard, settled, notice).await
    }

    /// Force-reindex one document, clearing its vectors first.
    pub async fn reindex_one(&self, id: &str) -> BatchReport {
        let guard = InFlight::enter(&self.state);
        let (settled, notice) = match self.backend.reindex_one(id, true, true).await {
            Ok(_) => (Settled { ok: 1, fail: 0 }, Notice::success("Reindexed")),
            Err(err) => {
                warn!(document = id, error = %err, "reindex failed");
                (Settled { ok: 0, fail: 1 }, Notice::error(format!("Reindex failed: {:#}", err)))
            }
        };
        self.finish("reindex_one", guard, settled, notice).await
    }

    // ============ Delete ============

    /// Plan deletion of the current selection.
    pub fn plan_delete_selected(&self) -> Result<DeletePlan, Notice> {
        let (ids, version) = self.listing.selection_at_version();
        if ids.is_empty() {
            return Err(Notice::info(EMPTY_SELECTION));
        }
        Ok(DeletePlan { ids, version })
    }

    /// Plan deletion of a single row of the current listing.
    pub fn plan_delete_one(&self, id: &str) -> Result<DeletePlan, Notice> {
        if !self.listing.contains(id) {
            return Err(Notice::info(STALE_PLAN));
        }
        Ok(DeletePlan {
            ids: vec![id.to_string()],
            version: self.listing.version(),
        })
    }

    /// Delete every id in `plan` concurrently and wait for all of them.
    pub async fn execute_delete(&self, plan: DeletePlan, clear_vectors: bool) -> BatchReport {
        if plan.version != self.listing.version() {
            return BatchReport::refused(Notice::info(STALE_PLAN));
        }
        let guard = InFlight::enter(&self.state);

        let calls = plan
            .ids
            .iter()
            .map(|id| self.backend.delete_document(id, clear_vectors));
        let results = join_all(calls).await;

        let mut settled = Settled::default();
        for (id, result) in plan.ids.iter().zip(results) {
            match result {
                Ok(_) => settled.ok += 1,
                Err(err) => {
                    warn!(document = %id, error = %err, "delete failed");
                    settled.fail += 1;
                }
            }
        }

        let message = format!("Deleted {} • Failed {}", settled.ok, settled.fail);
        let notice = match settled {
            Settled { fail: 0, .. } => Notice::success(message),
            Settled { ok: 0, .. } => Notice::error(message),
            _ => Notice::info(message),
        };
        self.finish("delete", guard, settled, notice).await
    }

    /// Plan and execute deletion of the current selection.
    pub async fn delete_selected(&self, clear_vectors: bool) -> BatchReport {
        match self.plan_delete_selected() {
            Ok(plan) => self.execute_delete(plan, clear_vectors).await,
            Err(notice) => BatchReport::refused(notice),
        }
    }

    async fn finish(
        &self,
        op: &'static str,
        guard: InFlight<'_>,
        settled: Settled,
        notice: Notice,
    ) -> BatchReport {
        info!(op, ok = settled.ok, fail = settled.fail, "batch settled");
        guard.settle(settled);
        if let Some(failed) = self.listing.refresh().await {
            warn!(op, "refresh after batch failed: {}", failed);
        }
        BatchReport {
            notice,
            settled: Some(settled),
        }
    }
}
