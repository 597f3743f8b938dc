//! REST control surface for campaigns. Handlers stay thin; every decision
//! lives in `CampaignService` so the worker pool and the API share one
//! transition path.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use recondor_core::campaign::{
    CampaignFilter, CampaignStatusView, CreateDnsCampaign, CreateGenerationCampaign,
    CreateHttpKeywordCampaign,
};
use recondor_model::{
    Campaign, CampaignId, CampaignStatus, CampaignType, DnsValidationResult, GeneratedDomain,
    HttpKeywordResult,
};
use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::infra::AppState;

const DEFAULT_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: Option<String>,
    #[serde(default)]
    pub offset: i64,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetPageQuery {
    /// Return rows strictly after this source offset index.
    pub after: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainPageQuery {
    /// Return rows strictly after this domain name.
    pub after: Option<String>,
    pub limit: Option<i64>,
}

pub async fn create_generation(
    State(state): State<AppState>,
    Json(req): Json<CreateGenerationCampaign>,
) -> AppResult<(StatusCode, Json<Campaign>)> {
    let campaign = state.service().create_generation(req).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

pub async fn create_dns(
    State(state): State<AppState>,
    Json(req): Json<CreateDnsCampaign>,
) -> AppResult<(StatusCode, Json<Campaign>)> {
    let campaign = state.service().create_dns(req).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

pub async fn create_http_keyword(
    State(state): State<AppState>,
    Json(req): Json<CreateHttpKeywordCampaign>,
) -> AppResult<(StatusCode, Json<Campaign>)> {
    let campaign = state.service().create_http_keyword(req).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<ListCampaignsQuery>,
) -> AppResult<Json<Vec<Campaign>>> {
    let status = query
        .status
        .as_deref()
        .map(CampaignStatus::parse)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let campaign_type = query
        .campaign_type
        .as_deref()
        .map(CampaignType::parse)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    let filter = CampaignFilter {
        status,
        campaign_type,
        offset: query.offset.max(0),
        limit: query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
    };
    Ok(Json(state.service().list(&filter).await?))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> AppResult<Json<Campaign>> {
    Ok(Json(state.service().require(id).await?))
}

pub async fn campaign_status(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> AppResult<Json<CampaignStatusView>> {
    Ok(Json(state.service().status_view(id).await?))
}

pub async fn start_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> AppResult<Json<Campaign>> {
    Ok(Json(state.service().start(id).await?))
}

pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> AppResult<Json<Campaign>> {
    Ok(Json(state.service().pause(id).await?))
}

pub async fn resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> AppResult<Json<Campaign>> {
    Ok(Json(state.service().resume(id).await?))
}

pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> AppResult<Json<Campaign>> {
    Ok(Json(state.service().cancel(id).await?))
}

pub async fn archive_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> AppResult<Json<Campaign>> {
    Ok(Json(state.service().archive(id).await?))
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> AppResult<StatusCode> {
    state.service().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_generated_domains(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
    Query(page): Query<OffsetPageQuery>,
) -> AppResult<Json<Vec<GeneratedDomain>>> {
    state.service().require(id).await?;
    let rows = state
        .results()
        .list_generated(id, page.after, page.limit.unwrap_or(DEFAULT_PAGE_LIMIT))
        .await?;
    Ok(Json(rows))
}

pub async fn list_dns_results(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
    Query(page): Query<DomainPageQuery>,
) -> AppResult<Json<Vec<DnsValidationResult>>> {
    state.service().require(id).await?;
    let rows = state
        .results()
        .list_dns_results(
            id,
            page.after.as_deref(),
            page.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
        .await?;
    Ok(Json(rows))
}

pub async fn list_http_results(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
    Query(page): Query<DomainPageQuery>,
) -> AppResult<Json<Vec<HttpKeywordResult>>> {
    state.service().require(id).await?;
    let rows = state
        .results()
        .list_http_results(
            id,
            page.after.as_deref(),
            page.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
        .await?;
    Ok(Json(rows))
}
