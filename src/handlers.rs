use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

use crate::{
    app::{AppState, UrlQuery},
    error::ApiError,
    extractor::VideoMetadata,
};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

// Unlike `/download`, no URL pattern check and no message-based error mapping.
pub async fn video_info(
    State(state): State<AppState>,
    query: Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Json<VideoMetadata>, ApiError> {
    let url = UrlQuery::require(query)?;

    let metadata = state.extractor.fetch_metadata(&url).await.map_err(|error| {
        warn!("Info fetch error: {error}");
        ApiError::internal("Failed to fetch video info")
    })?;

    Ok(Json(metadata))
}
