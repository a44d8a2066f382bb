//! Credential publication

use crate::api::{caller::Caller, state::AppState};
use crate::error::ApiResult;
use axum::{extract::State, http::StatusCode, Json};
use dcs_credentials::Credential;
use dcs_types::{Action, EntityRef};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PublishedCredential {
    pub id: dcs_types::CredentialId,
    pub fingerprint: String,
}

/// Make a credential available for binding. Nothing is verified here; the
/// chain, validity, revocation status and scope are checked when a signer
/// binds it.
pub async fn publish_credential(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(credential): Json<Credential>,
) -> ApiResult<(StatusCode, Json<PublishedCredential>)> {
    let entity = EntityRef::Credential(credential.id.clone());
    state.gate.authorize(&actor, Action::CredentialsRequest, &entity).await?;

    let fingerprint = credential
        .fingerprint()
        .map_err(|e| crate::error::ApiError::BadRequest(e.to_string()))?;
    let id = credential.id.clone();
    state.credentials.publish(credential)?;
    tracing::info!(actor = %actor, credential = %id, "credential published");
    Ok((StatusCode::CREATED, Json(PublishedCredential { id, fingerprint })))
}
