use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{extract::Request, middleware, Json, Router};
use devmate_config::ServerConfig;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

use crate::api::chat;
use crate::api::request_context::{attach_request_context, RequestContext, REQUEST_ID_HEADER};
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id.as_str())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id
        )
    });

    let cors = cors_layer(&state.config.server);

    Router::new()
        .route("/chat", post(chat::chat))
        .route("/health", get(health))
        .layer(trace_layer)
        .layer(middleware::from_fn(attach_request_context))
        .layer(cors)
        .with_state(state)
}

/// Answers preflights for the configured origins. Actual requests from
/// other origins are refused by the chat handler itself.
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparseable allowed origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(REQUEST_ID_HEADER)])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
