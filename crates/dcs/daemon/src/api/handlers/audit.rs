//! Audit ledger handlers

use crate::api::{caller::Caller, state::AppState};
use crate::error::ApiResult;
use axum::{extract::State, Json};
use dcs_ledger::{AuditEntry, AuditFilter, AuditReport, ChainReport, ExportFormat};
use dcs_types::ContentHash;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub filter: AuditFilter,
    #[serde(default = "default_format")]
    pub format: ExportFormat,
}

fn default_format() -> ExportFormat {
    ExportFormat::Json
}

/// Exported audit body with its integrity anchors
#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub format: ExportFormat,
    pub entry_count: usize,
    pub body_hash: ContentHash,
    pub export_sequence: u64,
    pub body: String,
}

/// Entries matching the filter, in sequence order
pub async fn query_audit(
    State(state): State<AppState>,
    Caller(actor): Caller,
    filter: Option<Json<AuditFilter>>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let filter = filter.map(|Json(f)| f).unwrap_or_default();
    Ok(Json(state.engine.audit_query(&actor, filter).await?))
}

/// Counts by action and decision
pub async fn audit_report(
    State(state): State<AppState>,
    Caller(actor): Caller,
    filter: Option<Json<AuditFilter>>,
) -> ApiResult<Json<AuditReport>> {
    let filter = filter.map(|Json(f)| f).unwrap_or_default();
    Ok(Json(state.engine.audit_report(&actor, filter).await?))
}

/// Export a filtered view; the export itself is recorded
pub async fn export_audit(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<ExportRequest>,
) -> ApiResult<Json<ExportResponse>> {
    let exported = state.engine.audit_export(&actor, req.filter, req.format).await?;
    Ok(Json(ExportResponse {
        format: exported.format,
        entry_count: exported.entry_count,
        body_hash: exported.body_hash,
        export_sequence: exported.export_sequence,
        body: exported.body,
    }))
}

/// Walk the hash chain from the first entry
pub async fn verify_audit_chain(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> ApiResult<Json<ChainReport>> {
    Ok(Json(state.engine.verify_audit_chain(&actor).await?))
}
