use std::{path::PathBuf, sync::Arc};

use axum::{
    Router,
    extract::{Query, Request, rejection::QueryRejection},
    http::{
        HeaderName, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH},
    },
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tokio::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{Instrument, Level};
use uuid::Uuid;

use crate::{
    download::{DURATION_HEADER, TITLE_HEADER, UPLOADER_HEADER, download_audio},
    error::ApiError,
    extractor::MediaExtractor,
    handlers::{health, video_info},
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<dyn MediaExtractor>,
    pub download_dir: PathBuf,
    pub delete_delay: Duration,
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    url: Option<String>,
}

impl UrlQuery {
    /// Extracts a non-empty `url` parameter. Malformed query strings, such as
    /// a repeated `url` key, are reported the same way as a missing one.
    pub fn require(query: Result<Query<Self>, QueryRejection>) -> Result<String, ApiError> {
        let Query(query) = query.map_err(|rejection| {
            tracing::debug!("Rejected query string: {rejection}");
            ApiError::bad_request("URL parameter is required")
        })?;

        query
            .url
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::bad_request("URL parameter is required"))
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/download", get(download_audio))
        .route("/info", get(video_info))
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(request_id))
        .layer(trace_layer)
        .layer(build_cors_layer())
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([
            CONTENT_DISPOSITION,
            CONTENT_LENGTH,
            HeaderName::from_static(TITLE_HEADER),
            HeaderName::from_static(DURATION_HEADER),
            HeaderName::from_static(UPLOADER_HEADER),
        ])
}

async fn request_id(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
