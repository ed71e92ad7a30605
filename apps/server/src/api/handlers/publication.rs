//! Publication workflow endpoints.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::api::extractors::{ActiveBrand, Caller};
use crate::models::PublicationView;
use crate::services::publication::parse_action;
use crate::services::TransitionResult;
use crate::state::AppState;
use crate::{Error, Result};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TransitionBody {
    #[serde(default)]
    pub comment: Option<String>,
}

fn parse_body(body: &Bytes) -> Result<TransitionBody> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TransitionBody::default());
    }
    serde_json::from_slice(body).map_err(|e| Error::Validation(format!("invalid body: {e}")))
}

/// Apply a publication transition to one phenotype version.
///
/// Actions: `request` (alias `request_publish`), `review`, `approve`
/// (alias `publish`), `reject` (alias `decline`), `cancel`, `withdraw`.
#[utoipa::path(
    post,
    path = "/api/v1/phenotypes/{id}/version/{version_id}/publication/{action}/",
    tag = "publication",
    params(
        ("id" = String, Path,),
        ("version_id" = i64, Path,),
        ("action" = String, Path,),
    ),
    request_body(content = TransitionBody, description = "Optional comment; the body may be empty"),
    responses(
        (status = 200, body = TransitionResult),
        (status = 403, description = "Caller may not apply this transition"),
        (status = 409, description = "Transition not allowed from the current state"),
    )
)]
pub async fn transition(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    Path((id, version_id, action)): Path<(String, i64, String)>,
    body: Bytes,
) -> Result<Json<TransitionResult>> {
    let transition = parse_action(&action)
        .ok_or_else(|| Error::NotFound(format!("publication action {action}")))?;
    let TransitionBody { comment } = parse_body(&body)?;

    let result = state
        .publication
        .transition(
            &id,
            version_id,
            transition,
            &caller.subject,
            brand.brand_id(),
            comment,
        )
        .await?;
    Ok(Json(result))
}

#[utoipa::path(
    get,
    path = "/api/v1/phenotypes/{id}/version/{version_id}/publication/",
    tag = "publication",
    params(
        ("id" = String, Path,),
        ("version_id" = i64, Path,),
    ),
    responses((status = 200, body = [PublicationView]))
)]
pub async fn publication_history(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ActiveBrand(brand): ActiveBrand,
    Path((id, version_id)): Path<(String, i64)>,
) -> Result<Json<Vec<PublicationView>>> {
    let records = state
        .publication
        .history(&id, version_id, &caller.subject, brand.brand_id())
        .await?;
    Ok(Json(records))
}

/// Open publication requests the caller may moderate.
#[utoipa::path(
    get,
    path = "/api/v1/moderation/",
    tag = "publication",
    responses(
        (status = 200, body = [PublicationView]),
        (status = 401, description = "Sign-in required"),
        (status = 403, description = "Caller is neither moderator nor Brand admin"),
    )
)]
pub async fn moderation_queue(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<PublicationView>>> {
    Ok(Json(state.publication.queue(&caller.subject).await?))
}
