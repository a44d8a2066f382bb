//! Caller identity extraction

use crate::error::ApiError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use dcs_types::Actor;

/// Header carrying the authenticated caller id, set by the fronting proxy.
pub const ACTOR_HEADER: &str = "x-dcs-actor";

/// `human` (default) or `system`.
pub const ACTOR_KIND_HEADER: &str = "x-dcs-actor-kind";

/// The actor on whose behalf a request runs.
#[derive(Debug, Clone)]
pub struct Caller(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingActor)?;
        if Actor::is_reserved(id) {
            tracing::warn!(actor = id, "request claimed a reserved actor id");
            return Err(ApiError::ReservedActor(id.to_string()));
        }

        let kind = parts
            .headers
            .get(ACTOR_KIND_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("human");

        match kind {
            "human" => Ok(Caller(Actor::human(id))),
            "system" => Ok(Caller(Actor::system(id))),
            other => Err(ApiError::BadRequest(format!("unknown actor kind {other}"))),
        }
    }
}
