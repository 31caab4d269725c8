//! JSON HTTP boundary for ingestion and question answering.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Ingest a document (`text` or `content_base64`) |
//! | `GET` | `/documents` | List ingested documents |
//! | `DELETE` | `/documents/{id}` | Delete a document and its chunks |
//! | `POST` | `/query` | Answer a question with source attribution |
//! | `GET` | `/health` | Health check with index counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "empty_question", "message": "question must not be empty" } }
//! ```
//!
//! Input problems are 400, unknown documents 404, collaborator timeouts 408,
//! unreachable embedding or generation services 503, and everything else
//! (including an index built by another embedding model) 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use context_qa_core::ingest::IngestReport;
use context_qa_core::models::DocumentKind;
use context_qa_core::qa::{Answer, QueryRequest};
use context_qa_core::store::{DocumentSummary, IndexStore};
use context_qa_core::{Error, ExtractError};

use crate::app::{App, IndexLoad};
use crate::config::Config;
use crate::ingest::ingest_bytes;

/// Start the server on `server.bind` and run until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = Arc::new(App::open(config, IndexLoad::Restore).await?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Context QA server listening on http://{}", bind_addr);
    axum::serve(listener, router(app)).await?;

    Ok(())
}

pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents", post(handle_ingest).get(handle_list))
        .route("/documents/{*id}", axum::routing::delete(handle_delete))
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(app)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            Error::EmptyQuestion => (StatusCode::BAD_REQUEST, "empty_question"),
            Error::EmptyDocument(_) => (StatusCode::BAD_REQUEST, "empty_document"),
            Error::EmptyInput => (StatusCode::BAD_REQUEST, "empty_input"),
            Error::UnknownTemplate(_) => (StatusCode::BAD_REQUEST, "unknown_template"),
            Error::Configuration(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Extraction {
                source: ExtractError::UnsupportedKind(_),
                ..
            } => (StatusCode::BAD_REQUEST, "unsupported_kind"),
            Error::Extraction { .. } => (StatusCode::BAD_REQUEST, "extraction_failed"),
            Error::CollaboratorTimeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            Error::EmbeddingUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "embedding_unavailable")
            }
            Error::GenerationUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "generation_unavailable")
            }
            Error::DimensionMismatch { .. } | Error::ModelMismatch { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "index_mismatch")
            }
            Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }
        AppError::new(status, code, message)
    }
}

// ============ POST /documents ============

#[derive(Debug, Deserialize)]
struct IngestBody {
    id: String,
    #[serde(default)]
    kind: Option<DocumentKind>,
    /// Already-extracted plain text.
    #[serde(default)]
    text: Option<String>,
    /// Raw file bytes, base64-encoded; extracted according to `kind`.
    #[serde(default)]
    content_base64: Option<String>,
    #[serde(default)]
    force: bool,
}

async fn handle_ingest(
    State(app): State<Arc<App>>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestReport>, AppError> {
    if body.id.trim().is_empty() {
        return Err(bad_request("id must not be empty"));
    }

    let inferred = body
        .id
        .rsplit_once('.')
        .and_then(|(_, ext)| DocumentKind::from_extension(ext));

    let report = match (body.text, body.content_base64) {
        (Some(text), None) => {
            let kind = body.kind.or(inferred).unwrap_or(DocumentKind::Txt);
            app.ingestor
                .ingest_text(&body.id, kind, &text, body.force)
                .await?
        }
        (None, Some(encoded)) => {
            let kind = body.kind.or(inferred).ok_or_else(|| {
                AppError::from(Error::Extraction {
                    document_id: body.id.clone(),
                    source: ExtractError::UnsupportedKind(body.id.clone()),
                })
            })?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;
            ingest_bytes(&app.ingestor, &body.id, kind, bytes, body.force).await?
        }
        _ => return Err(bad_request("exactly one of text or content_base64 is required")),
    };

    Ok(Json(report))
}

// ============ GET /documents ============

async fn handle_list(State(app): State<Arc<App>>) -> Result<Json<Vec<DocumentSummary>>, AppError> {
    Ok(Json(app.store.list_documents().await?))
}

// ============ DELETE /documents/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    id: String,
    deleted: bool,
}

async fn handle_delete(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !app.ingestor.delete(&id).await? {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("document not found: {}", id),
        ));
    }
    Ok(Json(DeleteResponse { id, deleted: true }))
}

// ============ POST /query ============

async fn handle_query(
    State(app): State<Arc<App>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Answer>, AppError> {
    Ok(Json(app.pipeline.answer(&request).await?))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    documents: usize,
    chunks: usize,
    model: String,
}

async fn handle_health(State(app): State<Arc<App>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        documents: app.index.document_count(),
        chunks: app.index.len(),
        model: app.embedder.model_id().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use serde_json::{json, Value};

    struct TestServer {
        url: String,
        client: reqwest::Client,
        _dir: tempfile::TempDir,
    }

    impl TestServer {
        async fn start() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = parse_config(&format!(
                r#"
[db]
path = "{}"

[chunking]
size = 120
overlap = 10

[generation]
provider = "disabled"

[templates.general]
body = "Context:\n{{context}}\n\nQuestion: {{question}}\nAnswer: "
"#,
                dir.path().join("cqa.sqlite").display()
            ))
            .unwrap();
            let app = Arc::new(App::open(&config, IndexLoad::Restore).await.unwrap());

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, router(app)).await.unwrap();
            });

            Self {
                url: format!("http://{}", addr),
                client: reqwest::Client::new(),
                _dir: dir,
            }
        }

        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let resp = self
                .client
                .post(format!("{}{}", self.url, path))
                .json(&body)
                .send()
                .await
                .unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }

        async fn get(&self, path: &str) -> Value {
            self.client
                .get(format!("{}{}", self.url, path))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_ingest_list_delete() {
        let server = TestServer::start().await;

        let (status, report) = server
            .post(
                "/documents",
                json!({ "id": "cvs/alice.md", "text": "Alice has shipped Rust services for six years." }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(report["chunks"], 1);
        assert_eq!(report["replaced"], false);

        let listed = server.get("/documents").await;
        assert_eq!(listed[0]["id"], "cvs/alice.md");
        assert_eq!(listed[0]["kind"], "markdown");

        let health = server.get("/health").await;
        assert_eq!(health["documents"], 1);
        assert_eq!(health["model"], "hash-256");

        let resp = server
            .client
            .delete(format!("{}/documents/cvs/alice.md", server.url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let resp = server
            .client
            .delete(format!("{}/documents/cvs/alice.md", server.url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_ingest_base64_and_validation() {
        let server = TestServer::start().await;

        let encoded = base64::engine::general_purpose::STANDARD.encode("Plain text resume.");
        let (status, _) = server
            .post(
                "/documents",
                json!({ "id": "bob.txt", "content_base64": encoded }),
            )
            .await;
        assert_eq!(status, 200);

        let (status, body) = server
            .post(
                "/documents",
                json!({ "id": "sheet.xlsx", "content_base64": encoded }),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "unsupported_kind");

        let (status, body) = server
            .post("/documents", json!({ "id": "empty.txt", "text": "   " }))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "empty_document");

        let (status, _) = server.post("/documents", json!({ "id": "none.txt" })).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_query_error_mapping() {
        let server = TestServer::start().await;

        let (status, body) = server.post("/query", json!({ "question": "  " })).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "empty_question");

        let (status, body) = server
            .post("/query", json!({ "question": "Who?", "template": "nope" }))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "unknown_template");

        // Nothing ingested: answered without the generator.
        let (status, body) = server.post("/query", json!({ "question": "Who knows Rust?" })).await;
        assert_eq!(status, 200);
        assert_eq!(body["generated"], false);
        assert!(body["answer"].as_str().unwrap().contains("Who knows Rust?"));

        // With context the disabled generator is reported as unavailable.
        server
            .post(
                "/documents",
                json!({ "id": "alice.txt", "text": "Alice knows Rust and SQLite." }),
            )
            .await;
        let (status, body) = server.post("/query", json!({ "question": "Who knows Rust?" })).await;
        assert_eq!(status, 503);
        assert_eq!(body["error"]["code"], "generation_unavailable");
    }
}
