//! HTTP query API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/pages?searchTerm=<q>&maxReturn=<n>` | Ranked pages for a query |
//! | `GET`  | `/img/<docId>.png` | Page images under `<library>/img`; a page's `imgPath` resolves against the server root |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "searchTerm is required" } }
//! ```
//!
//! `bad_request` (400) carries a descriptive message. Every other failure
//! is `internal` (500) with a generic message; the cause is only logged,
//! and no partial page list is ever returned.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends
//! on other origins can query the API and load images.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::config::Config;
use crate::library::{Library, IMAGE_DIR};
use crate::search::{MemoSlot, Searcher};
use crate::sqlite_store::SqliteStore;
use crate::sync::SyncContext;
use crate::{db, migrate};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    searcher: Arc<Searcher>,
    default_max_return: usize,
    max_return_limit: usize,
}

impl AppState {
    pub fn new(searcher: Arc<Searcher>, default_max_return: usize, max_return_limit: usize) -> Self {
        Self {
            searcher,
            default_max_return,
            max_return_limit,
        }
    }
}

/// Builds the routes; `library` supplies the image directory.
pub fn router(state: AppState, library: &Library) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/pages", get(handle_pages))
        .route("/health", get(handle_health))
        .nest_service(&format!("/{}", IMAGE_DIR), ServeDir::new(library.image_dir()))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server, plus the background sync loop unless `no_sync`.
///
/// Runs until the process is terminated; returns an error if binding fails.
pub async fn run_server(config: &Config, no_sync: bool) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let library = Library::new(&config.library.root);
    library.ensure_layout()?;

    let ctx = SyncContext::from_config(config, store.clone());
    let mut searcher = Searcher::new(
        store,
        Arc::clone(&ctx.pipeline.tools().tokenizer),
        ctx.pipeline.schedulers().tokenize.clone(),
        config.ranking.strategy,
    )
    .with_correlation_expansion(config.ranking.expand_correlated);

    // Without a sync loop nothing resets a shared memo, and another process
    // may be writing the index, so each request reads fresh postings.
    if !no_sync {
        let memo = Arc::new(MemoSlot::new());
        searcher = searcher.with_memo(memo.clone());
        let ctx = ctx.with_memo(memo);
        let interval = config.sync.poll_interval();
        tokio::spawn(async move { ctx.run_loop(interval).await });
    }

    let state = AppState::new(
        Arc::new(searcher),
        config.server.default_max_return,
        config.server.max_return_limit,
    );
    let app = router(state, &library);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "query API listening");
    println!("Listening on http://{}", config.server.bind);
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

/// Error type that converts into an Axum HTTP response.
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

/// Logs `err` and hides it behind a generic 500.
fn internal(err: anyhow::Error) -> AppError {
    error!(error = format!("{:#}", err), "query failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "internal server error".to_string(),
    }
}

// ============ GET /health ============

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

// ============ GET /pages ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageItem {
    ori_file_path: String,
    page_idx: i64,
    img_path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PagesResponse {
    page_list: Vec<PageItem>,
}

/// Parse `maxReturn`: a positive integer, clamped to `limit`.
fn parse_max_return(raw: Option<&String>, default: usize, limit: usize) -> Result<usize, AppError> {
    let Some(raw) = raw else {
        return Ok(default.min(limit));
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n.min(limit)),
        _ => Err(bad_request(format!(
            "maxReturn must be a positive integer, got '{}'",
            raw
        ))),
    }
}

/// Handler for `GET /pages`.
///
/// Query parameters are read as raw strings so malformed values produce
/// this API's 400 body rather than the extractor's rejection.
async fn handle_pages(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<PagesResponse>, AppError> {
    let query = params
        .get("searchTerm")
        .ok_or_else(|| bad_request("searchTerm is required"))?;
    let max_return = parse_max_return(
        params.get("maxReturn"),
        state.default_max_return,
        state.max_return_limit,
    )?;

    let pages = state
        .searcher
        .search(query, max_return)
        .await
        .map_err(internal)?;

    Ok(Json(PagesResponse {
        page_list: pages
            .into_iter()
            .map(|p| PageItem {
                ori_file_path: p.ori_file_path,
                page_idx: p.page_idx,
                img_path: p.img_path,
            })
            .collect(),
    }))
}
