//! Configuration route handlers.
//!
//! Handlers are thin: the domain service validates input and enforces every
//! rule; failures map to HTTP statuses through [`ApiError`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use domain::models::{
    Configuration, CreateConfigurationRequest, HistoryAction, HistoryFilter, HistoryQuery,
    RollbackRequest, UpdateConfigurationRequest,
};
use domain::services::{ConfigurationService, ResolutionContext};
use domain::value_objects::ConfigurationKey;
use serde::{Deserialize, Serialize};
use shared::pagination::PageRequest;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::Actor;
use crate::middleware::record_configuration_change;

/// Optional reason for approve/deactivate.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonParams {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub key: String,
    pub company_id: Option<String>,
    pub branch_id: Option<String>,
    pub user_id: Option<String>,
    /// Deep-merge every level instead of returning the winning row.
    #[serde(default)]
    pub merge: bool,
}

#[derive(Debug, Deserialize)]
pub struct EffectiveParams {
    pub key: String,
    pub scope: String,
    pub scope_id: Option<String>,
    /// Defaults to now.
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompanyParams {
    pub company_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Window used by the history stats endpoint when no range is given.
const DEFAULT_STATS_WINDOW_DAYS: i64 = 30;

/// Resolved value for a key.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfigurationResponse {
    pub config_key: String,
    pub value: serde_json::Value,
    pub merged: bool,
    /// The winning row; absent for merged results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Configuration>,
}

/// Create a configuration.
///
/// POST /api/v1/configurations
pub async fn create_configuration(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateConfigurationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let change = actor.change(None);
    let row = state.service.create(request, &change).await?;
    record_configuration_change(HistoryAction::Created);

    info!(
        configuration_id = %row.id,
        config_key = %row.config_key,
        scope = %row.scope,
        user_id = %actor.user_id,
        "Configuration created"
    );
    Ok((StatusCode::CREATED, Json(row)))
}

/// Fetch one configuration row.
///
/// GET /api/v1/configurations/:id
pub async fn get_configuration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Configuration>, ApiError> {
    Ok(Json(state.service.get(id).await?))
}

/// Update a configuration. A new value yields a new version.
///
/// PUT /api/v1/configurations/:id
pub async fn update_configuration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(request): Json<UpdateConfigurationRequest>,
) -> Result<Json<Configuration>, ApiError> {
    let change = actor.change(None);
    let row = state.service.update(id, request, &change).await?;
    record_configuration_change(HistoryAction::Updated);

    info!(
        configuration_id = %row.id,
        previous_id = %id,
        version = row.version,
        user_id = %actor.user_id,
        "Configuration updated"
    );
    Ok(Json(row))
}

/// POST /api/v1/configurations/:id/approve
pub async fn approve_configuration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Query(params): Query<ReasonParams>,
) -> Result<Json<Configuration>, ApiError> {
    let row = state.service.approve(id, &actor.change(params.reason)).await?;
    record_configuration_change(HistoryAction::Approved);

    info!(configuration_id = %id, approved_by = %actor.user_id, "Configuration approved");
    Ok(Json(row))
}

/// POST /api/v1/configurations/:id/deactivate
pub async fn deactivate_configuration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Query(params): Query<ReasonParams>,
) -> Result<Json<Configuration>, ApiError> {
    let row = state.service.deactivate(id, &actor.change(params.reason)).await?;
    record_configuration_change(HistoryAction::Deactivated);

    info!(configuration_id = %id, user_id = %actor.user_id, "Configuration deactivated");
    Ok(Json(row))
}

/// Paginated history of one configuration row, newest first.
///
/// GET /api/v1/configurations/:id/history
pub async fn get_configuration_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = &state.config.engine;
    let page = PageRequest::bounded(
        params.page,
        params.per_page,
        engine.history_page_size,
        engine.max_history_page_size,
    );
    let history = state
        .service
        .history(&HistoryQuery::new(HistoryFilter::Configuration(id), page))
        .await?;
    Ok(Json(history))
}

/// Roll a chain back to an earlier version's value.
///
/// POST /api/v1/configurations/rollback
pub async fn rollback_configuration(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<RollbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = request.target_version;
    let row = state.service.rollback(request, &actor.change(None)).await?;
    record_configuration_change(HistoryAction::Rollback);

    info!(
        configuration_id = %row.id,
        config_key = %row.config_key,
        target_version = target,
        version = row.version,
        user_id = %actor.user_id,
        "Configuration rolled back"
    );
    Ok((StatusCode::CREATED, Json(row)))
}

/// Effective value of a key for a company/branch/user context.
///
/// GET /api/v1/configurations/resolve?key=..&company_id=..&branch_id=..&user_id=..&merge=..
pub async fn resolve_configuration(
    State(state): State<AppState>,
    Query(params): Query<ResolveParams>,
) -> Result<Json<ResolvedConfigurationResponse>, ApiError> {
    let key = ConfigurationKey::parse(&params.key)?;
    let ctx = ResolutionContext::new(params.company_id, params.branch_id, params.user_id);
    let resolution = state.service.resolution();

    let response = if params.merge {
        let value = resolution.resolve_with_merge(&key, &ctx).await?;
        ResolvedConfigurationResponse {
            config_key: key.into_inner(),
            value: value.into_json(),
            merged: true,
            source: None,
        }
    } else {
        let row = resolution.resolve(&key, &ctx).await?;
        ResolvedConfigurationResponse {
            config_key: key.into_inner(),
            value: row.config_value.to_json(),
            merged: false,
            source: Some(row),
        }
    };
    Ok(Json(response))
}

/// The active row of one chain if it is inside its validity window.
///
/// GET /api/v1/configurations/effective?key=..&scope=..&scope_id=..&at=..
pub async fn get_effective_configuration(
    State(state): State<AppState>,
    Query(params): Query<EffectiveParams>,
) -> Result<Json<Configuration>, ApiError> {
    let chain = ConfigurationService::parse_chain(&params.key, &params.scope, params.scope_id)?;
    let at = params.at.unwrap_or_else(Utc::now);
    let row = state.service.resolution().resolve_effective_at(&chain, at).await?;
    Ok(Json(row))
}

/// Aggregate counts, optionally restricted to one company.
///
/// GET /api/v1/configurations/metrics?company_id=..
pub async fn get_configuration_metrics(
    State(state): State<AppState>,
    Query(params): Query<CompanyParams>,
) -> Result<impl IntoResponse, ApiError> {
    let metrics = state.service.metrics(params.company_id.as_deref()).await?;
    Ok(Json(metrics))
}

/// GET /api/v1/configurations/pending-approval?company_id=..
pub async fn list_pending_approvals(
    State(state): State<AppState>,
    Query(params): Query<CompanyParams>,
) -> Result<Json<Vec<Configuration>>, ApiError> {
    let rows = state
        .service
        .pending_approvals(params.company_id.as_deref())
        .await?;
    Ok(Json(rows))
}

/// GET /api/v1/configurations/expiring?company_id=..
pub async fn list_expiring(
    State(state): State<AppState>,
    Query(params): Query<CompanyParams>,
) -> Result<Json<Vec<Configuration>>, ApiError> {
    let rows = state.service.expiring_soon(params.company_id.as_deref()).await?;
    Ok(Json(rows))
}

/// Change statistics; defaults to the last 30 days.
///
/// GET /api/v1/configurations/history/stats?from=..&to=..
pub async fn get_history_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params
        .from
        .unwrap_or_else(|| to - Duration::days(DEFAULT_STATS_WINDOW_DAYS));
    let stats = state.service.history_stats(from, to).await?;
    Ok(Json(stats))
}
