//! HTTP question-answering API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner (name + version) |
//! | `GET`  | `/health` | Health check |
//! | `GET`  | `/api/v1/health` | Health check (versioned prefix) |
//! | `POST` | `/api/v1/qa` | Answer a question with cited sources |
//! | `GET`  | `/api/v1/system/info` | Store, embedding, and model overview |
//! | `GET`  | `/api/v1/loading/status` | Startup loader state |
//! | `POST` | `/api/v1/loading/initialize` | Kick off (re)initialization |
//!
//! The index is prepared by a background task at startup; `/api/v1/qa`
//! returns `503` until the loader reports ready.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `embeddings_disabled`
//! (400), `service_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based chat
//! front ends can call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::loader::{DataLoader, LoadStatus};
use crate::rag;

/// Upper bound on per-request `top_k`, protecting the context window.
const MAX_TOP_K: usize = 50;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    loader: DataLoader,
}

/// Start the HTTP server and the background index initialization.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());
    let pool = db::connect(&config).await?;
    let loader = DataLoader::new();

    // Index preparation must not block startup; /health answers while the
    // dataset loads.
    {
        let config = config.clone();
        let pool = pool.clone();
        let loader = loader.clone();
        tokio::spawn(async move {
            if let Err(e) = loader.initialize(&config, &pool, None).await {
                tracing::warn!("background initialization failed: {}", e);
            }
        });
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        config,
        pool,
        loader,
    };

    let app = Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/qa", post(handle_qa))
        .route("/api/v1/system/info", get(handle_system_info))
        .route("/api/v1/loading/status", get(handle_loading_status))
        .route("/api/v1/loading/initialize", post(handle_loading_initialize))
        .layer(cors)
        .with_state(state);

    tracing::info!("QA server listening on http://{}", bind_addr);
    println!("QA server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn service_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "service_unavailable".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map pipeline errors to the closest HTTP status. Configuration problems
/// (embeddings disabled) are client-fixable and should not read as crashes.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();

    if msg.contains("embeddings") || msg.contains("disabled") {
        let mut e = bad_request(msg);
        e.code = "embeddings_disabled".to_string();
        e
    } else {
        internal(msg)
    }
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct RootResponse {
    message: String,
    version: String,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "KorQuAD RAG API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/v1/qa ============

#[derive(Deserialize)]
struct QaRequest {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_qa(
    State(state): State<AppState>,
    Json(request): Json<QaRequest>,
) -> Result<Json<rag::QaOutcome>, AppError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let top_k = request.top_k.unwrap_or(state.config.retrieval.top_k);
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(bad_request(format!("top_k must be in 1..={}", MAX_TOP_K)));
    }

    if !state.loader.is_ready() {
        let status = state.loader.snapshot();
        return Err(service_unavailable(format!(
            "데이터 로딩 중입니다. 잠시 후 다시 시도해주세요. ({} {:.0}%)",
            status.loading_status,
            status.loading_progress * 100.0
        )));
    }

    let outcome = rag::answer_question(&state.config, &state.pool, &request.question, top_k)
        .await
        .map_err(classify_error)?;

    Ok(Json(outcome))
}

// ============ GET /api/v1/system/info ============

async fn handle_system_info(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let info = rag::system_info(&state.config, &state.pool)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(info))
}

// ============ GET /api/v1/loading/status ============

async fn handle_loading_status(State(state): State<AppState>) -> Json<LoadStatus> {
    Json(state.loader.snapshot())
}

// ============ POST /api/v1/loading/initialize ============

#[derive(Deserialize, Default)]
struct InitializeRequest {
    #[serde(default)]
    data_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct InitializeResponse {
    message: String,
    status: LoadStatus,
}

async fn handle_loading_initialize(
    State(state): State<AppState>,
    body: Option<Json<InitializeRequest>>,
) -> Json<InitializeResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    if state.loader.is_loading() {
        return Json(InitializeResponse {
            message: "이미 로딩 중입니다.".to_string(),
            status: state.loader.snapshot(),
        });
    }
    if state.loader.is_ready() {
        return Json(InitializeResponse {
            message: "이미 초기화 완료되었습니다.".to_string(),
            status: state.loader.snapshot(),
        });
    }

    let config = state.config.clone();
    let pool = state.pool.clone();
    let loader = state.loader.clone();
    tokio::spawn(async move {
        if let Err(e) = loader.initialize(&config, &pool, request.data_path).await {
            tracing::warn!("manual initialization failed: {}", e);
        }
    });

    Json(InitializeResponse {
        message: "데이터 초기화를 시작했습니다.".to_string(),
        status: state.loader.snapshot(),
    })
}
