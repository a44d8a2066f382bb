//! Revocation signal handlers
//!
//! Signals go through the revocation reactor, so they are applied one at a
//! time and in arrival order. Each handler waits for its own outcome.

use crate::api::{caller::Caller, state::AppState};
use crate::error::ApiResult;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use dcs_revocation::{PropagationReport, RevocationSignal};
use dcs_types::{ActorId, CredentialId, Role};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CredentialRevocationRequest {
    pub credential_id: CredentialId,
    pub reason: String,
    /// Effective time; now when absent
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RoleRevocationRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentRevocationRequest {
    pub actor: ActorId,
    pub role: Role,
}

pub async fn revoke_credential(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<CredentialRevocationRequest>,
) -> ApiResult<Json<PropagationReport>> {
    let signal = RevocationSignal::Credential {
        id: req.credential_id,
        reason: req.reason,
        at: req.revoked_at,
    };
    Ok(Json(state.revocations.submit_and_wait(actor, signal).await?))
}

pub async fn revoke_role(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<RoleRevocationRequest>,
) -> ApiResult<Json<PropagationReport>> {
    let signal = RevocationSignal::Role { role: req.role };
    Ok(Json(state.revocations.submit_and_wait(actor, signal).await?))
}

pub async fn revoke_assignment(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<AssignmentRevocationRequest>,
) -> ApiResult<Json<PropagationReport>> {
    let signal = RevocationSignal::Assignment {
        actor: req.actor,
        role: req.role,
    };
    Ok(Json(state.revocations.submit_and_wait(actor, signal).await?))
}
