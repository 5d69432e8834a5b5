use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Extension, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use devmate_core::relay;
use devmate_core::{ChatRequest, ChatResponse};
use devmate_provider::{CompletionOutput, CompletionRequest, DeltaStream};
use futures::StreamExt;
use tracing::{debug, info};

use crate::api::request_context::RequestContext;
use crate::error::ApiError;
use crate::state::AppState;

/// `POST /chat`
pub async fn chat(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|o| state.config.server.is_origin_allowed(o))
            .unwrap_or(false);
        if !allowed {
            tracing::warn!(origin = ?origin, "Rejected request from disallowed origin");
            return Err(ApiError::cors_rejected());
        }
    }

    let request = ChatRequest::from_json(&body).map_err(|e| {
        debug!(request_id = %ctx.request_id, error = %e, "Invalid chat request");
        ApiError::from(e)
    })?;

    let completion = CompletionRequest {
        model: request.model().to_string(),
        messages: request.messages(),
        max_tokens: Some(state.config.provider.effective_max_tokens()),
        stream: request.stream(),
    };

    let output = dispatch(&state, &completion)
        .await
        .map_err(|e| upstream_failure(&ctx, e))?;

    match output {
        CompletionOutput::Complete(reply) => {
            let latency_ms = ctx.started.elapsed().as_millis() as u64;
            info!(model = %reply.model, latency_ms, "Chat completed");
            Ok(Json(ChatResponse {
                content: reply.content,
                model: reply.model,
                usage: reply.usage,
                latency_ms,
            })
            .into_response())
        }
        CompletionOutput::Stream(deltas) => {
            debug!(model = %completion.model, "Relaying chat stream");
            Ok(event_stream(deltas))
        }
    }
}

/// Opens the upstream call. For streams this returns once the upstream has
/// answered, so failures up to that point still map to JSON errors.
async fn dispatch(
    state: &AppState,
    completion: &CompletionRequest,
) -> anyhow::Result<CompletionOutput> {
    let client = state.clients.create_client().await?;
    client.create(completion).await
}

fn upstream_failure(ctx: &RequestContext, err: anyhow::Error) -> ApiError {
    let api_err = ApiError::from_upstream(&err);
    tracing::error!(
        request_id = %ctx.request_id,
        kind = api_err.kind.as_str(),
        error = %format!("{err:#}"),
        "Chat request failed"
    );
    api_err
}

fn event_stream(deltas: DeltaStream) -> Response {
    let body = relay::encode_stream(deltas).map(Ok::<_, Infallible>);
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
