//! End-to-end tests of `HttpBackend` and the core stores against a mock
//! service served by axum on an ephemeral port.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use docchat::client::{ConnectionSettings, HttpBackend, SettingsHandle};
use docchat_core::backend::{Backend, ChunkQuery};
use docchat_core::batch::BatchEngine;
use docchat_core::conversation::{ConversationStore, SubmitOutcome};
use docchat_core::listing::DocumentListing;
use docchat_core::models::{
    Confidence, DocumentStatus, OriginMode, Role, TurnState, UploadFile,
};
use docchat_core::reveal::RevealScheduler;

#[derive(Debug, Clone)]
struct Seen {
    method: &'static str,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Value,
}

#[derive(Default)]
struct Mock {
    docs: Vec<Value>,
    failing: HashSet<String>,
    seen: Vec<Seen>,
    uploads: Vec<(String, usize)>,
}

type Shared = Arc<Mutex<Mock>>;

impl Mock {
    fn record(
        &mut self,
        method: &'static str,
        path: String,
        query: Option<String>,
        headers: HeaderMap,
        body: Value,
    ) {
        self.seen.push(Seen {
            method,
            path,
            query,
            headers,
            body,
        });
    }
}

fn doc(id: &str, filename: &str, status: &str) -> Value {
    json!({
        "id": id,
        "filename": filename,
        "status": status,
        "chunks": 3,
        "bytes": 2048,
        "created_at": "2024-05-01T10:00:00",
        "updated_at": "2024-05-01T10:05:00Z"
    })
}

fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "detail": "Document not found" })),
    )
}

async fn ask(
    State(mock): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let query = body["query"].as_str().unwrap_or_default().to_string();
    mock.lock()
        .unwrap()
        .record("POST", "/api/ask".into(), None, headers, body);
    if query.contains("refund") {
        Json(json!({
            "answer": "The refund window is fourteen days from delivery.",
            "confidence": "high",
            "missing_info": [],
            "citations": [{ "n": 1, "filename": "terms.pdf", "page_start": 2, "page_end": 2 }],
            "origin": { "mode": "local", "web": 0, "local": 1, "web_domains": [] },
            "query_id": "q-123"
        }))
    } else {
        Json(json!({ "answer": "" }))
    }
}

async fn list_documents(
    State(mock): State<Shared>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Json<Value> {
    let mut mock = mock.lock().unwrap();
    mock.record("GET", "/api/documents".into(), query, headers, Value::Null);
    let total = mock.docs.len();
    Json(json!({ "documents": mock.docs.clone(), "total": total }))
}

async fn get_document(
    State(mock): State<Shared>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mock = mock.lock().unwrap();
    mock.docs
        .iter()
        .find(|d| d["id"] == id.as_str())
        .cloned()
        .map(Json)
        .ok_or_else(not_found)
}

async fn delete_document(
    State(mock): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut mock = mock.lock().unwrap();
    mock.record("DELETE", format!("/api/documents/{}", id), query, headers, Value::Null);
    if mock.failing.contains(&id) {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "vector store unavailable" })),
        ));
    }
    let before = mock.docs.len();
    mock.docs.retain(|d| d["id"] != id.as_str());
    if mock.docs.len() == before {
        return Err(not_found());
    }
    Ok(Json(json!({ "id": id, "status": "deleted", "cleared_vectors": true })))
}

async fn list_chunks(
    State(mock): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Json<Value> {
    mock.lock().unwrap().record(
        "GET",
        format!("/api/documents/{}/chunks", id),
        query,
        headers,
        Value::Null,
    );
    Json(json!({
        "chunks": [
            { "chunk_id": "c0", "idx": 0, "page_start": 1, "page_end": 1, "token_count": 120, "preview": "Refunds are..." },
            { "chunk_id": "c1", "idx": 1, "page_start": 1, "token_count": 80, "preview": "Shipping..." }
        ],
        "total": 2
    }))
}

async fn reindex(
    State(mock): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut mock = mock.lock().unwrap();
    mock.record("POST", "/api/reindex".into(), None, headers, body.clone());
    let updated = if body["all_pending"] == true {
        mock.docs
            .iter()
            .filter(|d| d["status"] == "uploaded" || d["status"] == "failed")
            .count()
    } else {
        body["document_ids"].as_array().map_or(0, Vec::len)
    };
    Json(json!({ "updated": updated }))
}

async fn reindex_one(
    State(mock): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Json<Value> {
    mock.lock().unwrap().record(
        "POST",
        format!("/api/documents/{}/reindex", id),
        query,
        headers,
        Value::Null,
    );
    Json(json!({ "id": id, "status": "processed", "chunks": 3 }))
}

async fn feedback(
    State(mock): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    mock.lock()
        .unwrap()
        .record("POST", "/api/feedback".into(), None, headers, body);
    Json(json!({ "ok": true, "updated": 0, "feedback_id": "fb-1" }))
}

async fn upload(State(mock): State<Shared>, mut multipart: Multipart) -> Json<Value> {
    let mut received = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        assert_eq!(field.name(), Some("files"));
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap();
        received.push((name, bytes.len()));
    }
    let documents: Vec<Value> = received
        .iter()
        .enumerate()
        .map(|(i, (name, _))| {
            json!({ "id": format!("up-{}", i), "filename": name, "status": "processed", "chunks": 1, "vectors": 1 })
        })
        .collect();
    let count = documents.len();
    mock.lock().unwrap().uploads.extend(received);
    Json(json!({ "documents": documents, "total_chunks": count, "vectorized": true }))
}

async fn start_mock(mock: Shared) -> String {
    let app = Router::new()
        .route("/api/ask", post(ask))
        .route("/api/upload", post(upload))
        .route("/api/documents", get(list_documents))
        .route(
            "/api/documents/{id}",
            get(get_document).delete(delete_document),
        )
        .route("/api/documents/{id}/chunks", get(list_chunks))
        .route("/api/documents/{id}/reindex", post(reindex_one))
        .route("/api/reindex", post(reindex))
        .route("/api/feedback", post(feedback))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn backend_for(base_url: &str) -> (Arc<HttpBackend>, SettingsHandle) {
    let mut settings = ConnectionSettings::new(base_url);
    settings.api_key = Some("sk-test".into());
    settings.workspace = Some("team-a".into());
    let handle = SettingsHandle::new(settings);
    let backend = HttpBackend::new(&handle, std::time::Duration::from_secs(5)).unwrap();
    (Arc::new(backend), handle)
}

fn seen(mock: &Shared) -> Vec<Seen> {
    mock.lock().unwrap().seen.clone()
}

#[tokio::test]
async fn ask_round_trip_attaches_metadata_and_history() {
    let mock: Shared = Arc::default();
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);
    let store = ConversationStore::new(backend, RevealScheduler::immediate())
        .with_greeting("Hi! Upload documents and ask me anything.");

    let outcome = store.submit("What is the refund window?", false).await;
    let SubmitOutcome::Answered { turn } = outcome else {
        panic!("unexpected outcome: {:?}", outcome);
    };

    let answer = store.turn(turn).unwrap();
    assert_eq!(answer.content, "The refund window is fourteen days from delivery.");
    assert_eq!(answer.state, TurnState::Complete);
    let meta = answer.meta.unwrap();
    assert_eq!(meta.confidence, Confidence::High);
    assert_eq!(meta.origin.mode, OriginMode::Local);
    assert!(meta.origin.web_domains.is_empty());
    assert_eq!(meta.query_id.as_deref(), Some("q-123"));
    assert_eq!(meta.citations[0].locator(), "p.2-2");

    let requests = seen(&mock);
    let ask = requests.iter().find(|s| s.path == "/api/ask").unwrap();
    assert_eq!(ask.headers["x-openai-key"], "sk-test");
    assert_eq!(ask.headers["x-workspace"], "team-a");
    assert_eq!(ask.body["auto_enrich"], false);
    let history = ask.body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["role"], "assistant");
    assert_eq!(history[1]["role"], "user");
    assert_eq!(history[1]["content"], "What is the refund window?");
}

#[tokio::test]
async fn empty_answer_reveals_placeholder_text() {
    let mock: Shared = Arc::default();
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);
    let store = ConversationStore::new(backend, RevealScheduler::immediate());

    store.submit("anything else?", true).await;
    let turns = store.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[1].content, "No answer.");
    assert_eq!(seen(&mock)[0].body["auto_enrich"], true);
}

#[tokio::test]
async fn unreachable_service_fails_inline() {
    let (backend, _) = backend_for("http://127.0.0.1:9");
    let store = ConversationStore::new(backend, RevealScheduler::immediate());

    let outcome = store.submit("hello", false).await;
    assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
    let turns = store.turns();
    assert!(turns[1].content.starts_with("⚠️ "));
    assert_eq!(turns[1].state, TurnState::Failed);
    assert!(turns[1].meta.is_none());
}

#[tokio::test]
async fn listing_omits_empty_filters_and_parses_rows() {
    let mock: Shared = Arc::default();
    mock.lock().unwrap().docs = vec![doc("d1", "terms.pdf", "processed")];
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);

    let listing = DocumentListing::new(backend, 50);
    assert!(listing.refresh().await.is_none());
    let rows = listing.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, DocumentStatus::Processed);
    assert_eq!(rows[0].chunk_count, Some(3));
    assert_eq!(rows[0].byte_size, 2048);

    listing.set_query_text("terms");
    listing.set_status(Some(DocumentStatus::Failed));
    listing.refresh().await;

    let queries: Vec<String> = seen(&mock)
        .into_iter()
        .filter(|s| s.path == "/api/documents")
        .map(|s| s.query.unwrap_or_default())
        .collect();
    assert_eq!(queries[0], "limit=50&offset=0");
    assert_eq!(queries[1], "q=terms&status=failed&limit=50&offset=0");
}

#[tokio::test]
async fn delete_batch_counts_failures_and_refreshes_once() {
    let mock: Shared = Arc::default();
    {
        let mut m = mock.lock().unwrap();
        m.docs = vec![
            doc("d1", "a.pdf", "processed"),
            doc("d2", "b.pdf", "processed"),
            doc("d3", "c.pdf", "failed"),
        ];
        m.failing.insert("d2".into());
    }
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);

    let listing = DocumentListing::new(backend.clone(), 50);
    listing.refresh().await;
    listing.toggle_all();
    let engine = BatchEngine::new(backend, listing);

    let report = engine.delete_selected(true).await;
    assert_eq!(report.notice.message, "Deleted 2 • Failed 1");

    let requests = seen(&mock);
    let deletes: Vec<&Seen> = requests.iter().filter(|s| s.method == "DELETE").collect();
    assert_eq!(deletes.len(), 3);
    assert!(deletes
        .iter()
        .all(|s| s.query.as_deref() == Some("clear_vectors=true")));
    let last_delete = requests.iter().rposition(|s| s.method == "DELETE").unwrap();
    let lists_after = requests[last_delete..]
        .iter()
        .filter(|s| s.path == "/api/documents")
        .count();
    assert_eq!(lists_after, 1);
    assert_eq!(engine.listing().rows().len(), 1);
}

#[tokio::test]
async fn error_responses_carry_method_path_status_and_detail() {
    let mock: Shared = Arc::default();
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);

    let err = backend.get_document("nope").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "GET /api/documents/nope failed with 404: Document not found"
    );
}

#[tokio::test]
async fn document_ids_cannot_escape_their_path_segment() {
    let mock: Shared = Arc::default();
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);

    let err = backend.delete_document("../reindex", true).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "DELETE /api/documents/..%2Freindex failed with 404: Document not found"
    );
    assert!(backend.reindex_one("..", true, true).await.is_err());

    let requests = seen(&mock);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "DELETE");
    assert_eq!(requests[0].path, "/api/documents/../reindex");
}

#[tokio::test]
async fn reindex_requests_match_the_service_contract() {
    let mock: Shared = Arc::default();
    {
        let mut m = mock.lock().unwrap();
        m.docs = vec![
            doc("d1", "a.pdf", "uploaded"),
            doc("d2", "b.pdf", "processed"),
        ];
    }
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);
    let listing = DocumentListing::new(backend.clone(), 50);
    listing.refresh().await;
    let engine = BatchEngine::new(backend, listing);

    let report = engine.reindex_pending().await;
    assert_eq!(report.notice.message, "Reindexed 1 document(s)");

    engine.listing().toggle("d2");
    let report = engine.reindex_selected().await;
    assert_eq!(report.notice.message, "Reindexed 1 document(s)");

    let report = engine.reindex_one("d1").await;
    assert_eq!(report.notice.message, "Reindexed");

    let requests = seen(&mock);
    let bodies: Vec<&Value> = requests
        .iter()
        .filter(|s| s.path == "/api/reindex")
        .map(|s| &s.body)
        .collect();
    assert_eq!(bodies[0], &json!({ "all_pending": true, "clear_first": true }));
    assert_eq!(
        bodies[1],
        &json!({ "document_ids": ["d2"], "force": true, "clear_first": true })
    );
    let one = requests
        .iter()
        .find(|s| s.path == "/api/documents/d1/reindex")
        .unwrap();
    assert_eq!(one.query.as_deref(), Some("clear_first=true&force=true"));
    assert_eq!(one.headers["x-openai-key"], "sk-test");
}

#[tokio::test]
async fn chunk_query_and_parsing() {
    let mock: Shared = Arc::default();
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);

    let page = backend
        .list_chunks("d1", ChunkQuery { limit: 20, offset: 0, include_text: false })
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.chunks[0].header(), "#0 • p.1-1 • 120 tok");
    assert!(page.chunks[1].pages.is_none());

    backend
        .list_chunks("d1", ChunkQuery { limit: 20, offset: 20, include_text: true })
        .await
        .unwrap();
    let queries: Vec<Option<String>> = seen(&mock).into_iter().map(|s| s.query).collect();
    assert_eq!(queries[0].as_deref(), Some("limit=20&offset=0"));
    assert_eq!(queries[1].as_deref(), Some("limit=20&offset=20&include_text=true"));
}

#[tokio::test]
async fn settings_update_applies_to_next_request() {
    let mock: Shared = Arc::default();
    let base = start_mock(mock.clone()).await;
    let (backend, settings) = backend_for("http://127.0.0.1:9");

    assert!(backend.list_documents(&Default::default()).await.is_err());
    settings.update(|s| {
        s.base_url = base.clone();
        s.workspace = Some("team-b".into());
    });
    backend.list_documents(&Default::default()).await.unwrap();
    assert_eq!(seen(&mock)[0].headers["x-workspace"], "team-b");
    assert_eq!(settings.current().base_url, base);
}

#[tokio::test]
async fn upload_streams_files_and_reports_progress() {
    let mock: Shared = Arc::default();
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);

    let fractions = Arc::new(Mutex::new(Vec::<f64>::new()));
    let sink = fractions.clone();
    let files = vec![
        UploadFile {
            name: "big.pdf".into(),
            mime: "application/pdf".into(),
            bytes: vec![7u8; 200 * 1024],
        },
        UploadFile {
            name: "notes.md".into(),
            mime: "text/markdown".into(),
            bytes: b"# notes".to_vec(),
        },
    ];
    let resp = backend
        .upload(files, Some(Arc::new(move |f| sink.lock().unwrap().push(f))))
        .await
        .unwrap();

    assert_eq!(resp.documents.len(), 2);
    assert!(resp.vectorized);
    let uploads: HashMap<String, usize> = mock.lock().unwrap().uploads.iter().cloned().collect();
    assert_eq!(uploads["big.pdf"], 200 * 1024);
    assert_eq!(uploads["notes.md"], 7);

    let fractions = fractions.lock().unwrap();
    assert!(fractions.len() > 2);
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*fractions.last().unwrap(), 1.0);
}

#[tokio::test]
async fn feedback_posts_rating_without_api_key() {
    let mock: Shared = Arc::default();
    let base = start_mock(mock.clone()).await;
    let (backend, _) = backend_for(&base);
    let store = ConversationStore::new(backend, RevealScheduler::immediate());

    let SubmitOutcome::Answered { turn } = store.submit("refund window?", false).await else {
        panic!("expected an answer");
    };
    let notice = store
        .send_feedback(turn, docchat_core::models::Rating::Down, "cite page 3")
        .await;
    assert_eq!(notice.message, "Got it, we'll improve this.");

    let requests = seen(&mock);
    let fb = requests.iter().find(|s| s.path == "/api/feedback").unwrap();
    assert_eq!(
        fb.body,
        json!({ "query_id": "q-123", "rating": -1, "comment": "cite page 3" })
    );
    assert!(!fb.headers.contains_key("x-openai-key"));
}
