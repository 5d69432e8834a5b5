use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 64;

/// Per-request data shared by the trace span, the handlers and the response.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    /// When the request entered the server; chat latency is measured from here.
    pub started: Instant,
}

impl RequestContext {
    /// Reuses the caller's `x-request-id` when it is a plain token, otherwise
    /// mints a `req_<uuid>` id.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|id| is_usable_id(id))
            .map(str::to_string)
            .unwrap_or_else(|| format!("req_{}", Uuid::new_v4().simple()));
        Self {
            request_id,
            started: Instant::now(),
        }
    }
}

fn is_usable_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
}

pub async fn attach_request_context(mut req: Request, next: Next) -> Response {
    let ctx = RequestContext::from_headers(req.headers());
    let echoed = ctx.request_id.parse();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Ok(value) = echoed {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_id(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, id.parse().unwrap());
        headers
    }

    #[test]
    fn caller_id_is_kept() {
        let ctx = RequestContext::from_headers(&with_id("  trace-42:a.b_c "));
        assert_eq!(ctx.request_id, "trace-42:a.b_c");
    }

    #[test]
    fn missing_id_is_generated() {
        let ctx = RequestContext::from_headers(&HeaderMap::new());
        assert!(ctx.request_id.starts_with("req_"));
        assert_eq!(ctx.request_id.len(), 4 + 32);
    }

    #[test]
    fn unusable_ids_are_replaced() {
        for bad in ["has space", "semi;colon", &"x".repeat(65)] {
            let ctx = RequestContext::from_headers(&with_id(bad));
            assert!(ctx.request_id.starts_with("req_"), "{bad} was kept");
        }
    }
}
