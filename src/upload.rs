//! `docchat upload`: send local files to the service.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use docchat_core::backend::Backend;
use docchat_core::models::UploadFile;

use crate::present::format_upload;
use crate::progress::{upload_callback, ProgressMode, UploadProgressEvent};

/// File extensions the service can extract text from.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["pdf", "txt", "doc", "docx", "md"];

pub fn is_accepted(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ACCEPTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read a file and guess its content type from the extension.
pub fn load_file(path: &Path) -> Result<UploadFile> {
    if !is_accepted(path) {
        bail!(
            "Unsupported file type: {} (accepted: .{})",
            path.display(),
            ACCEPTED_EXTENSIONS.join(" .")
        );
    }
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Ok(UploadFile { name, mime, bytes })
}

pub async fn run_upload(
    backend: Arc<dyn Backend>,
    paths: &[impl AsRef<Path>],
    mode: ProgressMode,
) -> Result<()> {
    if paths.is_empty() {
        bail!("No files provided.");
    }
    let files = paths
        .iter()
        .map(|p| load_file(p.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    let total: u64 = files.iter().map(|f| f.bytes.len() as u64).sum();
    info!(files = files.len(), bytes = total, "uploading");

    let reporter = mode.reporter();
    let callback = upload_callback(reporter.clone(), total);
    let resp = backend.upload(files, Some(callback)).await?;
    reporter.report(UploadProgressEvent::Done {
        files: resp.documents.len(),
    });

    print!("{}", format_upload(&resp));
    Ok(())
}
