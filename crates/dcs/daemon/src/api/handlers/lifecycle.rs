//! Deployment, execution, renewal and termination handlers

use super::{ReasonRequest, RoleRequest};
use crate::api::{caller::Caller, state::AppState};
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use dcs_types::{Clock, Contract, ContractId, CorrelationId};
use dcs_workflow::{NewEvidence, RenewalRequest, TerminationRequest};
use serde::Deserialize;

/// Target-system acknowledgement callback body
#[derive(Debug, Default, Deserialize)]
pub struct AcknowledgeRequest {
    /// When the target system acknowledged; receipt time when absent
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

pub async fn deploy_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.deploy(&actor, &ContractId::new(id)).await?))
}

pub async fn acknowledge_deployment(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path((id, correlation)): Path<(String, String)>,
    req: Option<Json<AcknowledgeRequest>>,
) -> ApiResult<Json<Contract>> {
    let at = req
        .and_then(|Json(r)| r.acknowledged_at)
        .unwrap_or_else(|| state.clock.now());
    let contract = state
        .engine
        .acknowledge_deployment(&actor, &ContractId::new(id), &CorrelationId::new(correlation), at)
        .await?;
    Ok(Json(contract))
}

pub async fn report_deployment_failure(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path((id, correlation)): Path<(String, String)>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<Json<Contract>> {
    let contract = state
        .engine
        .report_deployment_failure(&actor, &ContractId::new(id), &CorrelationId::new(correlation), &req.reason)
        .await?;
    Ok(Json(contract))
}

pub async fn confirm_execution(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.confirm_execution(&actor, &ContractId::new(id)).await?))
}

pub async fn request_renewal(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    req: Option<Json<RenewalRequest>>,
) -> ApiResult<Json<Contract>> {
    let request = req.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.engine.request_renewal(&actor, &ContractId::new(id), request).await?))
}

pub async fn request_termination(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<TerminationRequest>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.request_termination(&actor, &ContractId::new(id), req).await?))
}

/// Approve the pending renewal or termination in a role
pub async fn approve_pending(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<RoleRequest>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.approve_pending(&actor, &ContractId::new(id), &req.role).await?))
}

pub async fn reject_pending(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.reject_pending(&actor, &ContractId::new(id), &req.reason).await?))
}

pub async fn store_evidence(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<NewEvidence>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.store_evidence(&actor, &ContractId::new(id), req).await?))
}
