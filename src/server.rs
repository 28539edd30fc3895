//! HTTP server: REST tool API plus the MCP Streamable HTTP endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call any registered tool by name |
//! | `*`    | `/mcp` | MCP Streamable HTTP (JSON-RPC) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Status codes come from [`ToolError::classify`]: `bad_request`,
//! `embeddings_disabled` and `generation_disabled` (400), `permission_denied`
//! (403), `not_found` (404), `timeout` (408), `upstream_error` (502) and
//! `tool_error` (500).
//!
//! # MCP client configuration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "toolbox": { "url": "http://127.0.0.1:7341/mcp" }
//!   }
//! }
//! ```

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ToolError;
use crate::mcp::McpBridge;
use crate::tools::{ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

/// Bind `[server].bind` and serve the built-in tools until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    run_server_with_registry(config, ToolRegistry::with_builtins()).await
}

/// Like [`run_server`], with a caller-assembled registry (for binaries that
/// register their own [`Tool`](crate::tools::Tool)s).
pub async fn run_server_with_registry(config: &Config, registry: ToolRegistry) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = build_router(Arc::new(config.clone()), Arc::new(registry));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Assemble the router with every route and layer.
pub fn build_router(config: Arc<Config>, tools: Arc<ToolRegistry>) -> Router {
    let bridge = McpBridge::new(config.clone(), tools.clone());
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let state = AppState {
        tools,
        ctx: ToolContext::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .with_state(state)
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let (status, code) = ToolError::classify(&err);
        if status.is_server_error() {
            warn!(code, error = %err, "tool call failed");
        }
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
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

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

// ============ POST /tools/{name} ============

/// Dispatch through [`ToolRegistry::call`]. A body that is not valid JSON
/// is a `400 bad_request`.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(params) = body.map_err(|e| AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: e.body_text(),
    })?;

    let result = state.tools.call(&name, params, &state.ctx).await?;
    Ok(Json(serde_json::json!({ "result": result })))
}
