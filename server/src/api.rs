//! HTTP query surface over the pipeline: parameter parsing, response shaping
//! and status mapping only. Business logic stays in the pipeline crate.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use pipeline::DegradeService;
use pipeline::cache::CacheStatus;
use pipeline::errors::CacheError;
use pipeline::stats::{StatsFilter, StatsReport};
use pipeline::types::Snapshot;

pub fn router(service: Arc<DegradeService>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/api/stats", get(stats))
        .route("/api/refresh", post(refresh))
        .route("/api/cache/status", get(cache_status))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    owner: Option<String>,
}

#[derive(Serialize)]
struct FilterEcho {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    owner: Option<String>,
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: StatsReport,
    /// True when the snapshot is served past its TTL because a refresh
    /// failed; render with a staleness indicator.
    stale: bool,
    fetched_at: DateTime<Utc>,
    source_errors: BTreeMap<String, String>,
    filters: FilterEcho,
}

#[derive(Serialize)]
struct RefreshResponse {
    degrade_count: usize,
    resolved_count: usize,
    fetched_at: DateTime<Utc>,
    stale: bool,
    source_errors: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

async fn healthcheck() -> &'static str {
    "ok"
}

async fn stats(
    State(service): State<Arc<DegradeService>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<StatsResponse>, ApiError> {
    let filter = StatsFilter {
        from: params.start_date,
        until: params.end_date,
        owner: params.owner.clone(),
    };
    let outcome = service.query(&filter).await?;

    Ok(Json(StatsResponse {
        stats: outcome.stats,
        stale: outcome.view.is_stale(),
        fetched_at: outcome.view.snapshot.fetched_at,
        source_errors: stringify_errors(&outcome.view.snapshot),
        filters: FilterEcho {
            start_date: params.start_date,
            end_date: params.end_date,
            owner: params.owner,
        },
    }))
}

async fn refresh(
    State(service): State<Arc<DegradeService>>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let view = service.refresh().await?;

    Ok(Json(RefreshResponse {
        degrade_count: view.snapshot.degrade_records.len(),
        resolved_count: view.snapshot.resolved_records.len(),
        fetched_at: view.snapshot.fetched_at,
        stale: view.is_stale(),
        source_errors: stringify_errors(&view.snapshot),
    }))
}

async fn cache_status(State(service): State<Arc<DegradeService>>) -> Json<CacheStatus> {
    Json(service.cache_status())
}

fn stringify_errors(snapshot: &Snapshot) -> BTreeMap<String, String> {
    snapshot
        .source_errors
        .iter()
        .map(|(key, err)| (key.to_string(), err.to_string()))
        .collect()
}

/// Wrapper so pipeline errors can cross the axum boundary with a status code.
struct ApiError(CacheError);

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CacheError::NoData(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::RefreshGate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(error = %self.0, "request failed");

        let body = Json(ApiErrorResponse {
            error_message: self.0.to_string(),
        });

        (status, body).into_response()
    }
}
