//! Contract authoring and review handlers

use super::{Page, ReasonRequest, RoleRequest};
use crate::api::{caller::Caller, state::AppState};
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use dcs_storage::{AuditEntry, ContractQuery};
use dcs_types::{Contract, ContractId, ContractState, FlagKind, TemplateId};
use dcs_workflow::{ComplianceReport, ContractEdit, ContractReview, NewContract};
use serde::Deserialize;

/// Contract search parameters
#[derive(Debug, Default, Deserialize)]
pub struct ContractSearch {
    pub state: Option<ContractState>,
    pub template: Option<String>,
    pub party: Option<String>,
    pub flag: Option<FlagKind>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// A comment on the current version
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub body: String,
}

/// Create a contract from an approved template
pub async fn create_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<NewContract>,
) -> ApiResult<(StatusCode, Json<Contract>)> {
    let contract = state.engine.create(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(contract)))
}

pub async fn search_contracts(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Query(search): Query<ContractSearch>,
) -> ApiResult<Json<Vec<Contract>>> {
    let page = Page {
        limit: search.limit,
        offset: search.offset,
    };
    let query = ContractQuery {
        state: search.state,
        template: search.template.map(TemplateId::new),
        party: search.party,
        flag: search.flag,
    };
    Ok(Json(state.engine.search(&actor, &query, page.window()).await?))
}

pub async fn get_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.retrieve(&actor, &ContractId::new(id)).await?))
}

/// Latest version with its diff against the previous one
pub async fn review_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<ContractReview>> {
    Ok(Json(state.engine.review(&actor, &ContractId::new(id)).await?))
}

/// Audit trail of one contract
pub async fn contract_history(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    Ok(Json(state.engine.history(&actor, &ContractId::new(id)).await?))
}

/// Propose a new version based on `base_version`
pub async fn negotiate_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(edit): Json<ContractEdit>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.negotiate(&actor, &ContractId::new(id), edit).await?))
}

/// Comment on the current version while negotiation is open
pub async fn respond_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.respond(&actor, &ContractId::new(id), &req.body).await?))
}

pub async fn submit_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.submit_for_approval(&actor, &ContractId::new(id)).await?))
}

pub async fn approve_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<RoleRequest>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.approve(&actor, &ContractId::new(id), &req.role).await?))
}

pub async fn reject_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<Json<Contract>> {
    Ok(Json(state.engine.reject(&actor, &ContractId::new(id), &req.reason).await?))
}

/// Re-validate every signature and the document integrity
pub async fn check_compliance(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<ComplianceReport>> {
    Ok(Json(state.engine.compliance_check(&actor, &ContractId::new(id)).await?))
}
