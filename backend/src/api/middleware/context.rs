//! Request context middleware: request id propagation and caller identity.
//!
//! Authentication happens upstream. A gateway that has authenticated the
//! caller forwards the user id in `X-Actor-Id`; when present and well formed
//! it becomes an [`Actor`] extension that handlers record as `createdBy`.

use axum::{extract::Request, http::header::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
pub const ACTOR_HEADER: &str = "X-Actor-Id";

/// Authenticated caller, as asserted by the upstream gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
}

fn header_str<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let request_id = header_str(&request, REQUEST_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let actor = header_str(&request, ACTOR_HEADER).and_then(|raw| match Uuid::parse_str(raw) {
        Ok(user_id) => Some(Actor { user_id }),
        Err(_) => {
            tracing::debug!(value = raw, "Ignoring malformed actor header");
            None
        }
    });
    if let Some(actor) = actor {
        request.extensions_mut().insert(actor);
    }

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri().path(),
        actor = ?actor.map(|a| a.user_id),
    );

    async move {
        let mut response = next.run(request).await;
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        tracing::info!(status = response.status().as_u16(), "Request completed");
        response
    }
    .instrument(span)
    .await
}
