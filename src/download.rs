use std::{
    path::{Path, PathBuf},
    pin::Pin,
    sync::{
        LazyLock,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use axum::{
    body::{Body, Bytes},
    extract::{Query, State, rejection::QueryRejection},
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::Stream;
use regex::Regex;
use tokio::{fs::File, time::Duration};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::{
    app::{AppState, UrlQuery},
    error::ApiError,
    extractor::{AUDIO_FORMAT, ExtractorError},
};

pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";
pub const TITLE_HEADER: &str = "x-video-title";
pub const DURATION_HEADER: &str = "x-video-duration";
pub const UPLOADER_HEADER: &str = "x-video-uploader";

const MAX_TITLE_CHARS: usize = 100;

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.)?(youtube\.com|youtu\.be|music\.youtube\.com)/.+")
        .expect("static regex is valid")
});

static LAST_TIMESTAMP_MS: AtomicU64 = AtomicU64::new(0);

pub async fn download_audio(
    State(state): State<AppState>,
    query: Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let url = UrlQuery::require(query)?;

    if !is_supported_url(&url) {
        return Err(ApiError::bad_request("Invalid YouTube URL"));
    }

    info!("Fetching video info for {url}");
    let metadata = state
        .extractor
        .fetch_metadata(&url)
        .await
        .map_err(classify_extraction_error)?;

    let title = metadata.title_or_default().to_string();
    let filename = audio_filename(&title, next_timestamp_ms());
    let output_path = state.download_dir.join(&filename);

    info!("Downloading: {title}");
    state
        .extractor
        .fetch_and_convert(&url, &output_path)
        .await
        .map_err(classify_extraction_error)?;

    let file_size = match tokio::fs::metadata(&output_path).await {
        Ok(file_metadata) if file_metadata.is_file() => file_metadata.len(),
        Ok(_) | Err(_) => {
            warn!("Extractor finished but {:?} was not produced", output_path);
            return Err(ApiError::internal("File download failed"));
        }
    };

    info!("Download completed, streaming {filename}");

    let removal = DeferredRemoval::new(output_path.clone(), state.delete_delay);
    let file = File::open(&output_path).await.map_err(|error| {
        error!("Could not open {:?} for streaming: {error}", output_path);
        ApiError::internal("Error streaming file").with_details(error.to_string())
    })?;

    let headers = build_headers(
        &filename,
        file_size,
        &title,
        metadata.duration_or_default(),
        metadata.uploader_or_default(),
    )?;
    let body = Body::from_stream(AudioStream::new(file, filename, removal));

    Ok((headers, body).into_response())
}

pub fn is_supported_url(url: &str) -> bool {
    YOUTUBE_URL.is_match(url)
}

pub fn classify_extraction_error(error: ExtractorError) -> ApiError {
    let message = error.to_string();
    warn!("Download error: {message}");

    let api_error = if message.contains("Video unavailable") {
        ApiError::bad_request("Video is unavailable or private")
    } else if message.contains("not found") {
        ApiError::not_found("Video not found")
    } else {
        ApiError::internal("Failed to download audio")
    };

    api_error.with_details(message)
}

/// `<timestamp>_<title>.mp3`, where the title keeps only ASCII letters,
/// digits, `-` and whitespace, whitespace runs become `_`, and the result is
/// cut to 100 characters.
pub fn audio_filename(title: &str, timestamp_ms: u64) -> String {
    let kept: String = title
        .chars()
        .filter(|character| {
            character.is_ascii_alphanumeric() || *character == '-' || character.is_whitespace()
        })
        .collect();

    let mut safe_title = String::with_capacity(kept.len());
    let mut in_whitespace = false;
    for character in kept.chars() {
        if character.is_whitespace() {
            if !in_whitespace {
                safe_title.push('_');
            }
            in_whitespace = true;
        } else {
            safe_title.push(character);
            in_whitespace = false;
        }
    }

    let safe_title: String = safe_title.chars().take(MAX_TITLE_CHARS).collect();
    let safe_title = if safe_title.is_empty() {
        "audio".to_string()
    } else {
        safe_title
    };

    format!("{timestamp_ms}_{safe_title}.{AUDIO_FORMAT}")
}

// Bumped past the previous value so two calls never collide.
pub fn next_timestamp_ms() -> u64 {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let mut last = LAST_TIMESTAMP_MS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_TIMESTAMP_MS.compare_exchange_weak(
            last,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

fn build_headers(
    filename: &str,
    file_size: u64,
    title: &str,
    duration: u64,
    uploader: &str,
) -> Result<HeaderMap, ApiError> {
    let header_value = |value: String| {
        HeaderValue::from_str(&value)
            .map_err(|_| ApiError::internal("Could not build response headers"))
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(AUDIO_CONTENT_TYPE));
    headers.insert(CONTENT_LENGTH, header_value(file_size.to_string())?);
    headers.insert(
        CONTENT_DISPOSITION,
        header_value(format!(
            "attachment; filename=\"{}\"",
            urlencoding::encode(filename)
        ))?,
    );
    headers.insert(
        HeaderName::from_static(TITLE_HEADER),
        header_value(urlencoding::encode(title).into_owned())?,
    );
    headers.insert(
        HeaderName::from_static(DURATION_HEADER),
        header_value(duration.to_string())?,
    );
    headers.insert(
        HeaderName::from_static(UPLOADER_HEADER),
        header_value(urlencoding::encode(uploader).into_owned())?,
    );

    Ok(headers)
}

struct DeferredRemoval {
    path: PathBuf,
    delay: Duration,
}

impl DeferredRemoval {
    fn new(path: PathBuf, delay: Duration) -> Self {
        Self { path, delay }
    }
}

impl Drop for DeferredRemoval {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        let delay = self.delay;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available to delete {:?}", path);
            return;
        };

        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            remove_streamed_file(&path).await;
        });
    }
}

async fn remove_streamed_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Cleaned up: {:?}", path),
        // The janitor may have reached it first.
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!("Could not delete streamed file {:?}: {error}", path),
    }
}

struct AudioStream {
    inner: ReaderStream<File>,
    filename: String,
    finished: bool,
    _removal: DeferredRemoval,
}

impl AudioStream {
    fn new(file: File, filename: String, removal: DeferredRemoval) -> Self {
        Self {
            inner: ReaderStream::new(file),
            filename,
            finished: false,
            _removal: removal,
        }
    }
}

impl Stream for AudioStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        match &poll {
            Poll::Ready(None) if !self.finished => {
                self.finished = true;
                info!("Finished streaming {}", self.filename);
            }
            Poll::Ready(Some(Err(error))) if !self.finished => {
                self.finished = true;
                error!("Stream error for {}: {error}", self.filename);
            }
            _ => {}
        }
        poll
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Client disconnected before {} was fully sent", self.filename);
        }
    }
}
