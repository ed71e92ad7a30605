//! Session resolution
//!
//! Attaches a [`CurrentUser`] to every request. An expired session is
//! removed and its cookie cleared; browser navigations are sent to the
//! login page while API calls continue anonymously.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::request_context::{BrandContext, CurrentUser};
use crate::services::sessions::cookie_value;
use crate::services::SessionLookup;
use crate::state::AppState;

fn is_html_navigation(req: &Request) -> bool {
    if req.method() != Method::GET || req.uri().path().contains("/api/") {
        return false;
    }
    req.headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

fn login_location(prefix: &str, login_path: &str, next: &str) -> String {
    format!("{prefix}{login_path}?next={}", urlencoding::encode(next))
}

pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let key = cookie_value(req.headers(), state.sessions.cookie_name()).map(str::to_string);

    let lookup = match state.sessions.lookup(key.as_deref()).await {
        Ok(lookup) => lookup,
        Err(e) => {
            tracing::warn!(error = %e, "Session lookup failed; continuing anonymously");
            SessionLookup::Anonymous
        }
    };

    let expired = matches!(lookup, SessionLookup::Expired(_));
    let current = match lookup {
        SessionLookup::Active(user) => CurrentUser::signed_in(user),
        SessionLookup::Anonymous | SessionLookup::Expired(_) => CurrentUser::anonymous(),
    };
    if let Some(id) = current.subject.user_id {
        tracing::Span::current().record("user_id", id);
    }

    let clear = HeaderValue::from_str(&state.sessions.clear_cookie()).ok();

    if expired && is_html_navigation(&req) {
        let (prefix, next_path) = req
            .extensions()
            .get::<BrandContext>()
            .map(|ctx| (ctx.prefix.clone(), ctx.original_path.clone()))
            .unwrap_or_else(|| (String::new(), req.uri().path().to_string()));
        let location = login_location(&prefix, &state.config.session.login_path, &next_path);
        let mut response = (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
        if let Some(clear) = clear {
            response.headers_mut().append(header::SET_COOKIE, clear);
        }
        return response;
    }

    req.extensions_mut().insert(current);
    let mut response = next.run(req).await;
    if expired {
        if let Some(clear) = clear {
            response.headers_mut().append(header::SET_COOKIE, clear);
        }
    }
    response
}
