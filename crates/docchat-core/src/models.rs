//! Core data models shared by the stores and the backend clients.
//!
//! Wire types (`*Request`, `*Response`, [`DocumentRow`], [`Chunk`]) match the
//! JSON payloads of the answering service. Conversation types ([`Turn`],
//! [`TurnMeta`]) are client-side only.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ============ Conversation ============

/// Identifier assigned to a turn when it is appended.
///
/// Ids are strictly increasing within one conversation, so a higher id
/// always belongs to a newer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Final content is in place.
    Complete,
    /// Placeholder waiting for the remote answer. Content is empty.
    Pending,
    /// Answer received, content is being revealed frame by frame.
    Revealing,
    /// The remote call failed; content holds the error text.
    Failed,
    /// Superseded by a newer submission before the answer arrived.
    Cancelled,
}

impl TurnState {
    /// Whether the turn still expects content writes.
    pub fn is_active(&self) -> bool {
        matches!(self, TurnState::Pending | TurnState::Revealing)
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    pub meta: Option<TurnMeta>,
    pub state: TurnState,
}

impl Turn {
    pub fn user(id: TurnId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            meta: None,
            state: TurnState::Complete,
        }
    }

    pub fn assistant(id: TurnId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            meta: None,
            state: TurnState::Complete,
        }
    }

    pub fn placeholder(id: TurnId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            meta: None,
            state: TurnState::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    /// Parse a service-provided level. Unknown or missing values map to `Medium`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("high") => Confidence::High,
            Some("low") => Confidence::Low,
            _ => Confidence::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginMode {
    #[default]
    Local,
    Enriched,
}

/// Where an answer's evidence came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Origin {
    pub mode: OriginMode,
    pub web: u32,
    pub local: u32,
    pub web_domains: BTreeSet<String>,
}

/// Provenance of a citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationOrigin {
    Local,
    Web,
}

/// A cited passage as returned by the ask endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Citation {
    pub n: Option<u32>,
    pub filename: String,
    pub document_id: Option<String>,
    pub chunk_id: Option<String>,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub origin: Option<CitationOrigin>,
    pub domain: Option<String>,
    pub url: Option<String>,
}

impl Citation {
    /// Human-readable position of the passage inside its source.
    ///
    /// `p.3-4` when both page bounds are known, `#2` when only the citation
    /// number is, empty otherwise.
    pub fn locator(&self) -> String {
        match (self.page_start, self.page_end, self.n) {
            (Some(start), Some(end), _) => format!("p.{}-{}", start, end),
            (_, _, Some(n)) => format!("#{}", n),
            _ => String::new(),
        }
    }
}

/// Summary of an auto-enrichment pass performed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Enrichment {
    pub added_docs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rating {
    Up,
    Down,
}

impl Rating {
    /// Wire value (`1` / `-1`).
    pub fn value(&self) -> i8 {
        match self {
            Rating::Up => 1,
            Rating::Down => -1,
        }
    }
}

/// Structured metadata attached to an answered assistant turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurnMeta {
    pub confidence: Confidence,
    pub citations: Vec<Citation>,
    pub missing_info: Vec<String>,
    pub suggested_enrichment: Vec<String>,
    pub origin: Origin,
    pub enrichment: Option<Enrichment>,
    pub query_id: Option<String>,
    pub feedback: Option<Rating>,
}

impl TurnMeta {
    /// Build metadata from a settled ask response, defaulting absent fields.
    pub fn from_response(resp: &AskResponse) -> Self {
        Self {
            confidence: Confidence::parse(resp.confidence.as_deref()),
            citations: resp.citations.clone(),
            missing_info: resp.missing_info.clone(),
            suggested_enrichment: resp.suggested_enrichment.clone(),
            origin: resp.origin.clone().unwrap_or_default(),
            enrichment: resp.enrichment.clone(),
            query_id: resp.query_id.clone().filter(|id| !id.is_empty()),
            feedback: None,
        }
    }

    /// Distinct citation filenames, in first-seen order.
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.citations
            .iter()
            .map(|c| c.filename.as_str())
            .filter(|f| !f.is_empty() && seen.insert(*f))
            .collect()
    }

    /// Whether the answer can still be rated.
    pub fn accepts_feedback(&self) -> bool {
        self.query_id.is_some() && self.feedback.is_none()
    }
}

// ============ Ask ============

/// One prior turn, as sent in the `history` field of an ask request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    pub query: String,
    pub history: Vec<HistoryEntry>,
    pub auto_enrich: bool,
}

/// Response of `POST /api/ask`. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AskResponse {
    pub answer: Option<String>,
    pub confidence: Option<String>,
    pub enrichment: Option<Enrichment>,
    #[serde(deserialize_with = "null_as_default")]
    pub missing_info: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub suggested_enrichment: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub citations: Vec<Citation>,
    pub origin: Option<Origin>,
    pub query_id: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============ Documents ============

/// Processing status of a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentStatus {
    Uploaded,
    Processed,
    Failed,
    Reindexed,
    Duplicate,
    NoChunks,
    SkippedAlreadyProcessed,
    /// Any status this client does not know about, preserved verbatim.
    Other(String),
}

impl DocumentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "uploaded" => DocumentStatus::Uploaded,
            "processed" => DocumentStatus::Processed,
            "failed" => DocumentStatus::Failed,
            "reindexed" => DocumentStatus::Reindexed,
            "duplicate" => DocumentStatus::Duplicate,
            "no_chunks" => DocumentStatus::NoChunks,
            "skipped_already_processed" => DocumentStatus::SkippedAlreadyProcessed,
            _ => DocumentStatus::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Reindexed => "reindexed",
            DocumentStatus::Duplicate => "duplicate",
            DocumentStatus::NoChunks => "no_chunks",
            DocumentStatus::SkippedAlreadyProcessed => "skipped_already_processed",
            DocumentStatus::Other(s) => s,
        }
    }

    /// Not yet vectorized; picked up by a "reindex pending" request.
    pub fn is_pending(&self) -> bool {
        matches!(self, DocumentStatus::Uploaded | DocumentStatus::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DocumentStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DocumentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DocumentStatus::parse(&raw))
    }
}

/// One row of the document listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRow {
    pub id: String,
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(rename = "chunks", default)]
    pub chunk_count: Option<u64>,
    #[serde(rename = "bytes", default)]
    pub byte_size: u64,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Accepts RFC 3339 timestamps as well as naive ISO 8601 ones, which are
/// taken to be UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

impl DocumentRow {
    pub fn size_mb(&self) -> f64 {
        self.byte_size as f64 / (1024.0 * 1024.0)
    }
}

/// Query parameters of `GET /api/documents`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilters {
    pub query_text: String,
    pub status: Option<DocumentStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ListFilters {
    fn default() -> Self {
        Self {
            query_text: String::new(),
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentPage {
    #[serde(default)]
    pub documents: Vec<DocumentRow>,
    #[serde(default)]
    pub total: u64,
}

// ============ Chunks ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

#[derive(Deserialize)]
struct RawChunk {
    chunk_id: String,
    idx: u32,
    #[serde(default)]
    page_start: Option<u32>,
    #[serde(default)]
    page_end: Option<u32>,
    #[serde(default)]
    token_count: u32,
    #[serde(default)]
    preview: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// A slice of a document as stored by the service.
///
/// Page bounds are only kept when the service reports both of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawChunk")]
pub struct Chunk {
    pub chunk_id: String,
    pub idx: u32,
    pub pages: Option<PageRange>,
    pub token_count: u32,
    pub preview: Option<String>,
    pub text: Option<String>,
}

impl From<RawChunk> for Chunk {
    fn from(raw: RawChunk) -> Self {
        let pages = match (raw.page_start, raw.page_end) {
            (Some(start), Some(end)) => Some(PageRange { start, end }),
            _ => None,
        };
        Self {
            chunk_id: raw.chunk_id,
            idx: raw.idx,
            pages,
            token_count: raw.token_count,
            preview: raw.preview,
            text: raw.text,
        }
    }
}

impl Chunk {
    /// One-line header: `#3 • p.2-2 • 180 tok`.
    pub fn header(&self) -> String {
        match self.pages {
            Some(p) => format!("#{} • p.{}-{} • {} tok", self.idx, p.start, p.end, self.token_count),
            None => format!("#{} • {} tok", self.idx, self.token_count),
        }
    }

    /// Full text when requested, otherwise the service's preview.
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.preview.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkPage {
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub total: u64,
}

// ============ Reindex / delete / feedback ============

/// Body of `POST /api/reindex`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReindexRequest {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub all_pending: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub clear_first: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReindexResponse {
    #[serde(default)]
    pub updated: u64,
}

/// Status payload returned by single-document mutations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentStatusResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub chunks: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackRequest {
    pub query_id: String,
    pub rating: i8,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedbackAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub feedback_id: Option<String>,
}

// ============ Upload ============

/// A file to send to `POST /api/upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Per-file outcome reported by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadResult {
    pub id: Option<String>,
    pub filename: String,
    pub status: Option<String>,
    pub chunks: Option<u64>,
    pub vectors: Option<u64>,
    pub error: Option<String>,
    pub duplicate_of: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadResponse {
    pub documents: Vec<UploadResult>,
    pub total_chunks: u64,
    pub vectorized: bool,
    pub workspace: Option<String>,
}
