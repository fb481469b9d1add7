use crate::config::HttpServerConfig;
use crate::context::ContextAssembler;
use crate::error::{KycError, Result};
use crate::mcp::server::McpServer;
use crate::mcp::types::*;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// HTTP MCP Server wrapper
pub struct HttpMcpServer {
    state: AppState,
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    server: Arc<McpServer>,
    api_key: String,
    allowed_origins: Vec<String>,
    authless: bool,
}

impl HttpMcpServer {
    /// Create a new HTTP MCP server; the API key is read from
    /// `config.api_key_env` unless `authless` is set.
    pub fn new(assembler: ContextAssembler, config: &HttpServerConfig) -> Result<Self> {
        let api_key = if config.authless {
            log::warn!("HTTP MCP server running without authentication");
            String::new()
        } else {
            std::env::var(&config.api_key_env).map_err(|_| {
                KycError::Config(format!(
                    "Environment variable {} not set. Set it in your .env file or as an environment variable, or enable authless mode.",
                    config.api_key_env
                ))
            })?
        };

        Ok(Self {
            state: AppState {
                server: Arc::new(McpServer::new(assembler)),
                api_key,
                allowed_origins: config.allowed_origins.clone(),
                authless: config.authless,
            },
        })
    }

    /// Run the HTTP server on localhost
    pub async fn run(&self, port: u16) -> Result<()> {
        let app = self.create_router();

        let addr = format!("127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            KycError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to bind to {}: {}. Set http_server.port in config.toml to use another port.",
                    addr, e
                ),
            ))
        })?;

        log::info!("Starting HTTP MCP server on http://{}", addr);
        log::info!("MCP endpoint: http://{}/mcp", addr);

        axum::serve(listener, app).await.map_err(|e| {
            KycError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP server error: {}", e),
            ))
        })?;

        Ok(())
    }

    /// Create the axum router
    fn create_router(&self) -> Router {
        // CORS mirrors the origin checks done in handle_post.
        let cors = if self.state.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = self
                .state
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/mcp", post(handle_post))
            .route("/.well-known/mcp.json", get(handle_discovery))
            .route("/health", get(handle_health))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(self.state.clone())
    }
}

/// Handle POST requests (one JSON-RPC message per request, response in the body)
async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    if !state.authless {
        if let Err(response) = validate_auth(&headers, &state.api_key) {
            return response;
        }
        if let Err(response) = validate_origin(&headers, &state.allowed_origins) {
            return response;
        }
    }

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let response = JsonRpcResponse::error(
                serde_json::Value::Null,
                error_codes::PARSE_ERROR,
                format!("Parse error: {}", e),
                None,
            );
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    // Each HTTP request is independent; initialization is not tracked.
    let mut initialized = false;
    match state.server.process_mcp_request(request, &mut initialized).await {
        Ok(Some(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            log::error!("Error processing MCP request: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Internal server error",
                    "details": e.to_string()
                })),
            )
                .into_response()
        }
    }
}

/// Server metadata for client discovery
async fn handle_discovery(State(state): State<AppState>) -> Response {
    let mut discovery = serde_json::json!({
        "name": "kycgraph",
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": "2024-11-05",
        "capabilities": { "tools": {} },
        "transport": { "type": "http", "endpoint": "/mcp" }
    });
    discovery["authentication"] = if state.authless {
        serde_json::json!({ "type": "none" })
    } else {
        serde_json::json!({ "type": "bearer" })
    };

    (StatusCode::OK, Json(discovery)).into_response()
}

/// Handle health check endpoint
async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "kycgraph",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

fn unauthorized(error: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": error,
            "message": "Use 'Authorization: Bearer <api-key>' header"
        })),
    )
        .into_response()
}

/// Validate Authorization header
fn validate_auth(headers: &HeaderMap, expected_key: &str) -> std::result::Result<(), Response> {
    let auth_header = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| unauthorized("Missing Authorization header"))?;

    let provided_key = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("Invalid Authorization header format"))?;

    if expected_key.is_empty() || provided_key != expected_key {
        return Err(unauthorized("Invalid API key"));
    }

    Ok(())
}

/// Validate Origin header (prevents DNS rebinding attacks)
fn validate_origin(headers: &HeaderMap, allowed_origins: &[String]) -> std::result::Result<(), Response> {
    if allowed_origins.is_empty() {
        return Ok(());
    }

    // Requests without an Origin are not from a browser.
    let origin = match headers.get("origin").and_then(|h| h.to_str().ok()) {
        Some(o) => o,
        None => return Ok(()),
    };

    if allowed_origins.iter().any(|allowed| origin == allowed) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "Origin not allowed",
                "message": format!("Origin '{}' is not in the allowed origins list", origin)
            })),
        )
            .into_response())
    }
}
