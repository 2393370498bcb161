// Gacha Exchange - Web Server
// Thin REST layer over the engine. Auth and listing live elsewhere.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use gacha_exchange::{logging, CancelToken, Config, Engine, EngineError, ExchangeParams};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ApiError>,
}

#[derive(Serialize)]
struct ApiError {
    kind: &'static str,
    message: String,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn status_for(err: &EngineError) -> StatusCode {
    if err.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    match err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::OwnershipMismatch { .. } => StatusCode::FORBIDDEN,
        EngineError::SerializationFailure(_) => StatusCode::CONFLICT,
        EngineError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: EngineError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(kind = err.kind(), error = %err, "request failed");
    }
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiError {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }),
    )
        .into_response()
}

fn not_found(what: &str, id: i64) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiError {
                kind: "not_found",
                message: format!("{} {} not found", what, id),
            }),
        }),
    )
        .into_response()
}

/// Cancels the engine call if the client goes away and the handler is dropped
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Run a blocking engine call off the async runtime
async fn run_blocking<T, F>(state: &AppState, op: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce(&Engine, &CancelToken) -> Result<T, EngineError> + Send + 'static,
{
    let engine = state.engine.clone();
    let guard = CancelOnDrop(CancelToken::new());
    let cancel = guard.0.clone();

    let joined = tokio::task::spawn_blocking(move || op(engine.as_ref(), &cancel)).await;
    drop(guard);

    joined.map_err(|e| EngineError::Storage(format!("worker task failed: {}", e)))?
}

// ============================================================================
// API Handlers
// ============================================================================

#[derive(Deserialize)]
struct CreateGachaRequest {
    account_id: i64,
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// POST /api/gacha - Draw one item for an account
async fn create_gacha(
    State(state): State<AppState>,
    Json(req): Json<CreateGachaRequest>,
) -> Response {
    match run_blocking(&state, move |engine, cancel| {
        engine.draw_with_cancel(req.account_id, cancel)
    })
    .await
    {
        Ok(allocation) => ApiResponse::ok(allocation.gallery),
        Err(e) => error_response(e),
    }
}

/// POST /api/exchange - Swap two items between accounts
async fn create_exchange(
    State(state): State<AppState>,
    Json(req): Json<ExchangeParams>,
) -> Response {
    let outcome = run_blocking(&state, move |engine, cancel| {
        engine.exchange_with_cancel(&req, cancel)
    })
    .await;
    match outcome {
        Ok(result) => ApiResponse::ok(result),
        Err(e) => error_response(e),
    }
}

/// GET /api/gallery/:id
async fn get_gallery(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match run_blocking(&state, move |engine, _| engine.get_gallery(id)).await {
        Ok(Some(gallery)) => ApiResponse::ok(gallery),
        Ok(None) => not_found("gallery", id),
        Err(e) => error_response(e),
    }
}

/// GET /api/gacha/:id
async fn get_gacha(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match run_blocking(&state, move |engine, _| engine.get_gacha(id)).await {
        Ok(Some(gacha)) => ApiResponse::ok(gacha),
        Ok(None) => not_found("gacha", id),
        Err(e) => error_response(e),
    }
}

/// GET /api/exchange/:id
async fn get_exchange(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match run_blocking(&state, move |engine, _| engine.get_exchange(id)).await {
        Ok(Some(exchange)) => ApiResponse::ok(exchange),
        Ok(None) => not_found("exchange", id),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    logging::init(&config.log_level)?;

    let engine = Engine::from_config(&config)?;
    tracing::info!(db = %config.db_path, "database opened");

    let state = AppState {
        engine: Arc::new(engine),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/gacha", post(create_gacha))
        .route("/gacha/:id", get(get_gacha))
        .route("/exchange", post(create_exchange))
        .route("/exchange/:id", get(get_exchange))
        .route("/gallery/:id", get(get_gallery))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!(addr = %config.http_addr, "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
