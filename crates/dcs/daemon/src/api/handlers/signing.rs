//! Signing session and signature handlers

use super::ReasonRequest;
use crate::api::{caller::Caller, state::AppState};
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use dcs_signature::ValidationReport;
use dcs_types::{Contract, ContractId, SignerEntry, SignerId};
use dcs_workflow::{SignatureOutcome, SigningRequest, SigningStarted};
use serde::{Deserialize, Serialize};

/// A signature produced by the signer over the signing message
#[derive(Debug, Default, Deserialize)]
pub struct ApplySignatureRequest {
    /// Hex ed25519 signature; the engine's wallet signs when absent
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SigningMessageResponse {
    pub signer_id: SignerId,
    pub message: String,
}

/// Open a signing session on an approved contract
pub async fn initiate_signing(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<SigningRequest>,
) -> ApiResult<(StatusCode, Json<SigningStarted>)> {
    let started = state.engine.initiate_signing(&actor, &ContractId::new(id), req).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

/// Fetch and verify the signer's identity and PoA credentials
pub async fn request_credentials(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path((id, signer)): Path<(String, String)>,
) -> ApiResult<Json<SignerEntry>> {
    let entry = state
        .engine
        .request_credentials(&actor, &ContractId::new(id), &SignerId::new(signer))
        .await?;
    Ok(Json(entry))
}

/// The exact message the signer must sign
pub async fn signing_message(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path((id, signer)): Path<(String, String)>,
) -> ApiResult<Json<SigningMessageResponse>> {
    let signer_id = SignerId::new(signer);
    let message = state
        .engine
        .signing_message(&actor, &ContractId::new(id), &signer_id)
        .await?;
    Ok(Json(SigningMessageResponse { signer_id, message }))
}

pub async fn apply_signature(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path((id, signer)): Path<(String, String)>,
    req: Option<Json<ApplySignatureRequest>>,
) -> ApiResult<Json<SignatureOutcome>> {
    let presented = req.and_then(|Json(r)| r.signature);
    let outcome = state
        .engine
        .apply_signature(&actor, &ContractId::new(id), &SignerId::new(signer), presented)
        .await?;
    Ok(Json(outcome))
}

pub async fn validate_signature(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path((id, signer)): Path<(String, String)>,
) -> ApiResult<Json<ValidationReport>> {
    let report = state
        .engine
        .validate_signature(&actor, &ContractId::new(id), &SignerId::new(signer))
        .await?;
    Ok(Json(report))
}

pub async fn revoke_signature(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path((id, signer)): Path<(String, String)>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<Json<Contract>> {
    let contract = state
        .engine
        .revoke_signature(&actor, &ContractId::new(id), &SignerId::new(signer), &req.reason)
        .await?;
    Ok(Json(contract))
}

/// Retry the archive handoff of a completed session
pub async fn finalize_signing(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.finalize_signing(&actor, &ContractId::new(id)).await?))
}
