//! Compliance incident and event feed handlers

use crate::api::{caller::Caller, state::AppState};
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use dcs_types::ContractId;
use dcs_workflow::{ComplianceIncident, IncidentFilter, MonitorPage};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ReportIncidentRequest {
    pub contract_id: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveIncidentRequest {
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct IncidentSearch {
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub open: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MonitorParams {
    #[serde(default)]
    pub after: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn report_incident(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<ReportIncidentRequest>,
) -> ApiResult<Json<ComplianceIncident>> {
    let id = ContractId::new(req.contract_id);
    Ok(Json(state.engine.report_incident(&actor, &id, &req.description).await?))
}

pub async fn list_incidents(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Query(search): Query<IncidentSearch>,
) -> ApiResult<Json<Vec<ComplianceIncident>>> {
    let filter = IncidentFilter {
        contract: search.contract.map(ContractId::new),
        open_only: search.open.unwrap_or(false),
    };
    Ok(Json(state.engine.incidents(&actor, filter).await?))
}

pub async fn resolve_incident(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(incident): Path<u64>,
    Json(req): Json<ResolveIncidentRequest>,
) -> ApiResult<Json<ComplianceIncident>> {
    Ok(Json(state.engine.resolve_incident(&actor, incident, &req.notes).await?))
}

/// Ledger entries after a position; poll again with the returned `next`
pub async fn monitor(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Query(params): Query<MonitorParams>,
) -> ApiResult<Json<MonitorPage>> {
    let after = params.after.unwrap_or(0);
    Ok(Json(state.engine.monitor(&actor, after, params.limit).await?))
}
