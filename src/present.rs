//! Terminal rendering of turns, badges, listings, and notices.
//!
//! Formatting functions return strings so they can be tested; the `print_*`
//! helpers write them out. Answers and tables go to stdout, notices to stderr.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use docchat_core::badges::{badges, Badge};
use docchat_core::chunks::ChunkBrowser;
use docchat_core::conversation::TurnObserver;
use docchat_core::listing::ListingSnapshot;
use docchat_core::models::{
    DocumentRow, Role, Turn, TurnId, TurnMeta, TurnState, UploadResponse,
};
use docchat_core::notice::{Notice, NoticeLevel};

// ============ Notices ============

pub fn format_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => format!("{}", notice),
        NoticeLevel::Success => format!("✓ {}", notice),
        NoticeLevel::Error => format!("error: {}", notice),
    }
}

pub fn print_notice(notice: &Notice) {
    eprintln!("{}", format_notice(notice));
}

// ============ Answers ============

/// Badge line plus detail lines for an answer's metadata.
pub fn format_meta(meta: &TurnMeta) -> String {
    let all = badges(meta);
    let mut out = String::new();
    let labels: Vec<String> = all.iter().map(|b| format!("[{}]", b.label())).collect();
    out.push_str(&labels.join(" "));
    out.push('\n');

    for badge in &all {
        match badge {
            Badge::Origin { domains, .. } if !domains.is_empty() => {
                out.push_str(&format!("  web: {}\n", domains.join(", ")));
            }
            Badge::MissingInfo(items) => {
                for item in items {
                    out.push_str(&format!("  missing: {}\n", item));
                }
            }
            Badge::SuggestedEnrichment(items) => {
                for item in items {
                    out.push_str(&format!("  suggest: {}\n", item));
                }
            }
            _ => {}
        }
    }

    for (i, citation) in meta.citations.iter().enumerate() {
        let n = citation.n.unwrap_or(i as u32 + 1);
        let locator = citation.locator();
        let source = citation
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&citation.filename);
        if locator.is_empty() {
            out.push_str(&format!("  [{}] {}\n", n, source));
        } else {
            out.push_str(&format!("  [{}] {} {}\n", n, source, locator));
        }
    }

    if let Some(query_id) = &meta.query_id {
        out.push_str(&format!("  query id: {}\n", query_id));
    }
    out
}

/// Writes assistant turns to stdout as they are revealed.
///
/// Only the characters added since the last write are printed, so a reveal
/// reads as a stream. Badges follow once the turn completes.
pub struct TerminalObserver {
    printed: Mutex<HashMap<TurnId, usize>>,
}

impl TerminalObserver {
    pub fn new() -> Self {
        Self {
            printed: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for TerminalObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnObserver for TerminalObserver {
    fn turn_changed(&self, turn: &Turn) {
        if turn.role != Role::Assistant || turn.state == TurnState::Pending {
            return;
        }
        let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
        let done = printed.entry(turn.id).or_insert(0);
        if *done == usize::MAX {
            return;
        }

        let mut stdout = std::io::stdout().lock();
        if turn.content.len() >= *done && turn.content.is_char_boundary(*done) {
            let _ = stdout.write_all(turn.content[*done..].as_bytes());
        } else {
            let _ = write!(stdout, "\n{}", turn.content);
        }
        *done = turn.content.len();

        if !turn.state.is_active() {
            let _ = writeln!(stdout);
            if let Some(meta) = &turn.meta {
                let _ = write!(stdout, "{}", format_meta(meta));
            }
            *done = usize::MAX;
        }
        let _ = stdout.flush();
    }
}

// ============ Documents ============

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

pub fn format_listing(snapshot: &ListingSnapshot) -> String {
    let mut out = String::new();
    if snapshot.rows.is_empty() {
        out.push_str("No documents.\n");
    } else {
        out.push_str(&format!(
            "{:<38} {:<32} {:<12} {:>7} {:>9}  {}\n",
            "ID", "FILENAME", "STATUS", "CHUNKS", "SIZE", "UPDATED"
        ));
        for row in &snapshot.rows {
            out.push_str(&format!(
                "{:<38} {:<32} {:<12} {:>7} {:>6.2} MB  {}\n",
                row.id,
                truncate(&row.filename, 32),
                row.status.as_str(),
                row.chunk_count.map_or("-".to_string(), |c| c.to_string()),
                row.size_mb(),
                row.updated_at.format("%Y-%m-%d %H:%M")
            ));
        }
    }
    let p = snapshot.pagination();
    out.push_str(&format!(
        "Page {} of {} • {} document(s)\n",
        p.page(),
        p.pages(),
        snapshot.total
    ));
    out
}

pub fn format_document(row: &DocumentRow) -> String {
    let mut out = String::new();
    out.push_str(&format!("id:         {}\n", row.id));
    out.push_str(&format!("filename:   {}\n", row.filename));
    out.push_str(&format!("status:     {}\n", row.status));
    out.push_str(&format!(
        "chunks:     {}\n",
        row.chunk_count.map_or("-".to_string(), |c| c.to_string())
    ));
    out.push_str(&format!("size:       {:.2} MB\n", row.size_mb()));
    out.push_str(&format!("created_at: {}\n", row.created_at.to_rfc3339()));
    out.push_str(&format!("updated_at: {}\n", row.updated_at.to_rfc3339()));
    out
}

pub fn format_chunks(browser: &ChunkBrowser) -> String {
    let mut out = String::new();
    out.push_str(&format!("--- {} ---\n", browser.title()));
    let chunks = browser.chunks();
    if chunks.is_empty() {
        out.push_str("No chunks.\n");
    }
    for chunk in &chunks {
        out.push_str(&chunk.header());
        out.push('\n');
        let body = chunk.body();
        if !body.is_empty() {
            out.push_str(body);
            out.push('\n');
        }
        out.push('\n');
    }
    let p = browser.pagination();
    out.push_str(&format!(
        "Page {} of {} • {} chunk(s)\n",
        p.page(),
        p.pages(),
        p.total
    ));
    out
}

pub fn format_upload(resp: &UploadResponse) -> String {
    let mut out = String::new();
    for doc in &resp.documents {
        let status = doc.status.as_deref().unwrap_or("unknown");
        let mut line = format!("{:<32} {}", truncate(&doc.filename, 32), status);
        if let Some(id) = &doc.id {
            line.push_str(&format!("  id={}", id));
        }
        if let Some(chunks) = doc.chunks {
            line.push_str(&format!("  chunks={}", chunks));
        }
        if let Some(dup) = &doc.duplicate_of {
            line.push_str(&format!("  duplicate_of={}", dup));
        }
        if let Some(err) = &doc.error {
            line.push_str(&format!("  error={}", err));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(&format!(
        "{} file(s) • {} chunk(s) • {}\n",
        resp.documents.len(),
        resp.total_chunks,
        if resp.vectorized { "vectorized" } else { "not vectorized" }
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_core::models::{Citation, Origin, OriginMode, UploadResult};

    #[test]
    fn meta_lists_badges_and_citations() {
        let meta = TurnMeta {
            origin: Origin {
                mode: OriginMode::Enriched,
                web: 1,
                local: 1,
                web_domains: ["example.com".to_string()].into_iter().collect(),
            },
            citations: vec![Citation {
                n: Some(1),
                filename: "terms.pdf".into(),
                page_start: Some(3),
                page_end: Some(4),
                ..Default::default()
            }],
            query_id: Some("q-1".into()),
            ..Default::default()
        };
        let text = format_meta(&meta);
        let first = text.lines().next().unwrap();
        assert_eq!(
            first,
            "[confidence: medium] [Enriched (1)] [Sources (1)] [Rate this answer]"
        );
        assert!(text.contains("  web: example.com\n"));
        assert!(text.contains("  [1] terms.pdf p.3-4\n"));
        assert!(text.contains("  query id: q-1\n"));
    }

    #[test]
    fn notice_prefix_by_level() {
        assert_eq!(format_notice(&Notice::success("Reindexed")), "✓ Reindexed");
        assert_eq!(format_notice(&Notice::error("boom")), "error: boom");
        assert_eq!(format_notice(&Notice::info("hi")), "hi");
    }

    #[test]
    fn upload_summary_lists_each_file() {
        let resp = UploadResponse {
            documents: vec![UploadResult {
                id: Some("d1".into()),
                filename: "a.pdf".into(),
                status: Some("processed".into()),
                chunks: Some(4),
                ..Default::default()
            }],
            total_chunks: 4,
            vectorized: true,
            workspace: None,
        };
        let text = format_upload(&resp);
        assert!(text.contains("a.pdf"));
        assert!(text.contains("id=d1  chunks=4"));
        assert!(text.ends_with("1 file(s) • 4 chunk(s) • vectorized\n"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("short.pdf", 32), "short.pdf");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
