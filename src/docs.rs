//! `docchat docs` subcommands: list, show, chunks, reindex, delete.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use docchat_core::backend::Backend;
use docchat_core::batch::{BatchEngine, BatchReport};
use docchat_core::chunks::ChunkBrowser;
use docchat_core::listing::DocumentListing;
use docchat_core::models::DocumentStatus;

use crate::config::Config;
use crate::present::{format_chunks, format_document, format_listing, print_notice};

/// Largest page the service will return.
const MAX_PAGE_SIZE: u32 = 200;

/// Status values accepted by `--status`.
pub const STATUS_FILTERS: &[&str] = &["uploaded", "processed", "failed"];

pub fn parse_status(raw: &str) -> Result<DocumentStatus> {
    let raw = raw.trim().to_ascii_lowercase();
    if !STATUS_FILTERS.contains(&raw.as_str()) {
        bail!(
            "Unknown status filter: '{}'. Must be one of: {}.",
            raw,
            STATUS_FILTERS.join(", ")
        );
    }
    Ok(DocumentStatus::parse(&raw))
}

pub async fn run_list(
    config: &Config,
    backend: Arc<dyn Backend>,
    query: Option<&str>,
    status: Option<&str>,
    page: u64,
) -> Result<()> {
    let listing = DocumentListing::new(backend, config.documents.page_size);
    if let Some(q) = query {
        listing.set_query_text(q);
    }
    if let Some(status) = status {
        listing.set_status(Some(parse_status(status)?));
    }
    if let Some(notice) = listing.refresh().await {
        bail!("{}", notice);
    }
    if page > 1 && listing.go_to_page(page) {
        if let Some(notice) = listing.refresh().await {
            bail!("{}", notice);
        }
    }
    print!("{}", format_listing(&listing.snapshot()));
    Ok(())
}

pub async fn run_show(backend: Arc<dyn Backend>, id: &str) -> Result<()> {
    let row = backend
        .get_document(id)
        .await
        .with_context(|| format!("document not found: {}", id))?;
    print!("{}", format_document(&row));
    Ok(())
}

pub async fn run_chunks(
    config: &Config,
    backend: Arc<dyn Backend>,
    id: &str,
    page: u64,
    include_text: bool,
) -> Result<()> {
    let browser =
        ChunkBrowser::new(backend, id, config.documents.chunk_page_size).with_text(include_text);
    if let Some(notice) = browser.open().await {
        bail!("{}", notice);
    }
    if page > 1 {
        if let Some(notice) = browser.go_to_page(page).await {
            bail!("{}", notice);
        }
    }
    print!("{}", format_chunks(&browser));
    Ok(())
}

/// Load the newest [`MAX_PAGE_SIZE`] documents and select `ids` among them.
///
/// Ids not on that page are reported and skipped.
async fn select_ids(
    config: &Config,
    backend: Arc<dyn Backend>,
    ids: &[String],
) -> Result<BatchEngine> {
    let listing = DocumentListing::new(backend.clone(), config.documents.page_size);
    listing.set_limit(MAX_PAGE_SIZE);
    if let Some(notice) = listing.refresh().await {
        bail!("{}", notice);
    }
    for id in ids {
        if !listing.toggle(id) {
            eprintln!("skipping unknown document: {}", id);
        }
    }
    Ok(BatchEngine::new(backend, listing))
}

fn finish(report: BatchReport) -> Result<()> {
    print_notice(&report.notice);
    if report.notice.is_error() {
        bail!("{}", report.notice);
    }
    Ok(())
}

pub async fn run_reindex(
    config: &Config,
    backend: Arc<dyn Backend>,
    pending: bool,
    ids: &[String],
) -> Result<()> {
    if pending {
        let listing = DocumentListing::new(backend.clone(), config.documents.page_size);
        let engine = BatchEngine::new(backend, listing);
        return finish(engine.reindex_pending().await);
    }
    if ids.is_empty() {
        bail!("Pass --pending or at least one document id");
    }
    if let [id] = ids {
        let listing = DocumentListing::new(backend.clone(), config.documents.page_size);
        let engine = BatchEngine::new(backend, listing);
        return finish(engine.reindex_one(id).await);
    }
    let engine = select_ids(config, backend, ids).await?;
    finish(engine.reindex_selected().await)
}

pub async fn run_delete(
    config: &Config,
    backend: Arc<dyn Backend>,
    ids: &[String],
    keep_vectors: bool,
) -> Result<()> {
    if ids.is_empty() {
        bail!("Pass at least one document id");
    }
    let engine = select_ids(config, backend, ids).await?;
    let plan = match engine.plan_delete_selected() {
        Ok(plan) => plan,
        Err(notice) => bail!("{}", notice),
    };
    finish(engine.execute_delete(plan, !keep_vectors).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_core::backend::memory::{Call, InMemoryBackend};

    #[test]
    fn status_filter_accepts_known_values() {
        assert_eq!(parse_status("Failed").unwrap(), DocumentStatus::Failed);
        assert!(parse_status("deleted").is_err());
    }

    #[tokio::test]
    async fn delete_skips_unknown_ids_and_reports_failures() {
        let backend = Arc::new(InMemoryBackend::new());
        let a = backend.add_document("a.pdf", DocumentStatus::Processed);
        let b = backend.add_document("b.pdf", DocumentStatus::Processed);
        backend.fail_document(&b);

        let ids = vec![a.clone(), b.clone(), "missing".to_string()];
        let result = run_delete(&Config::minimal(), backend.clone(), &ids, true).await;
        assert!(result.is_ok());
        assert_eq!(backend.document_ids(), vec![b]);
        assert!(backend.calls().contains(&Call::Delete {
            id: a,
            clear_vectors: false
        }));
    }

    #[tokio::test]
    async fn reindex_without_targets_is_an_error() {
        let backend = Arc::new(InMemoryBackend::new());
        assert!(run_reindex(&Config::minimal(), backend, false, &[]).await.is_err());
    }
}
