//! Read-only deployments refuse every mutating request.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;
use crate::Error;

pub const READ_ONLY_HEADER: &str = "x-read-only";

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

pub async fn read_only_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.server.read_only {
        return next.run(req).await;
    }

    let mut response = if is_safe(req.method()) {
        next.run(req).await
    } else {
        tracing::info!(
            method = %req.method(),
            path = %req.uri().path(),
            "Refused write in read-only mode"
        );
        Error::ReadOnly.into_response()
    };
    response
        .headers_mut()
        .insert(READ_ONLY_HEADER, HeaderValue::from_static("true"));
    response
}
