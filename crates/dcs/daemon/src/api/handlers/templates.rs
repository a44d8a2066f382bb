//! Template repository handlers

use super::{Page, ReasonRequest};
use crate::api::{caller::Caller, state::AppState};
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use dcs_storage::TemplateQuery;
use dcs_templates::NewTemplate;
use dcs_types::{Template, TemplateId, TemplateStatus};
use serde::Deserialize;
use serde_json::Value;

/// Template search parameters
#[derive(Debug, Default, Deserialize)]
pub struct TemplateSearch {
    pub name_contains: Option<String>,
    pub status: Option<TemplateStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub body: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveTemplateRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

/// Create a template in `Draft`
pub async fn create_template(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(req): Json<NewTemplate>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    let template = state.templates.create(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// Search the latest version of each template
pub async fn search_templates(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Query(search): Query<TemplateSearch>,
) -> ApiResult<Json<Vec<Template>>> {
    let page = Page {
        limit: search.limit,
        offset: search.offset,
    };
    let query = TemplateQuery {
        name_contains: search.name_contains,
        status: search.status,
    };
    Ok(Json(state.templates.search(&actor, &query, page.window()).await?))
}

pub async fn latest_template(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.templates.latest(&actor, &TemplateId::new(id)).await?))
}

pub async fn template_version(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path((id, version)): Path<(String, u32)>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.templates.get(&actor, &TemplateId::new(id), version).await?))
}

pub async fn template_history(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Template>>> {
    Ok(Json(state.templates.history(&actor, &TemplateId::new(id)).await?))
}

/// Edit a draft, or derive a new draft version from an approved one
pub async fn update_template(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateTemplateRequest>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.templates.update(&actor, &TemplateId::new(id), req.body).await?))
}

pub async fn submit_template(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.templates.submit_for_review(&actor, &TemplateId::new(id)).await?))
}

pub async fn approve_template(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    req: Option<Json<ApproveTemplateRequest>>,
) -> ApiResult<Json<Template>> {
    let notes = req.and_then(|Json(r)| r.notes);
    Ok(Json(state.templates.approve(&actor, &TemplateId::new(id), notes).await?))
}

pub async fn reject_template(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.templates.reject(&actor, &TemplateId::new(id), &req.reason).await?))
}

pub async fn deprecate_template(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.templates.deprecate(&actor, &TemplateId::new(id)).await?))
}
