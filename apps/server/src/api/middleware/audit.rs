//! Request audit filter
//!
//! Queues a [`RequestEvent`] for every request the audit rules admit.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::models::RequestEvent;
use crate::request_context::{BrandContext, CurrentUser};
use crate::state::AppState;

fn header_str<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn request_event(state: &AppState, req: &Request) -> Option<RequestEvent> {
    let brand = req.extensions().get::<BrandContext>();
    let brand_name = brand.and_then(|b| b.name.as_deref());
    let path = brand
        .map(|b| b.original_path.clone())
        .unwrap_or_else(|| req.uri().path().to_string());

    if !state.audit.admits(&path, brand_name) {
        return None;
    }

    let policy = state.audit.remote_addr_policy();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let configured = policy
        .header
        .as_deref()
        .and_then(|name| header_str(req, name));
    let remote_ip = policy.resolve(
        header_str(req, "x-forwarded-for"),
        configured,
        remote_addr.as_deref(),
    );

    Some(RequestEvent {
        url: path,
        method: req.method().to_string(),
        query_string: req.uri().query().unwrap_or_default().to_string(),
        user_id: req
            .extensions()
            .get::<CurrentUser>()
            .and_then(|u| u.subject.user_id),
        remote_ip,
        brand: brand_name.map(str::to_string),
        timestamp: Utc::now(),
    })
}

pub async fn audit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(event) = request_event(&state, &req) {
        state.audit.submit(event);
    }
    next.run(req).await
}
