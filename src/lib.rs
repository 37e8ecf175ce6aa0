//! HTTP service that turns a YouTube URL into a streamed MP3, using `yt-dlp`
//! for extraction and conversion.

pub mod app;
pub mod config;
pub mod download;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod janitor;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

pub use app::{AppState, build_router};
pub use config::Config;
pub use error::ApiError;
pub use extractor::{ExtractorError, MediaExtractor, VideoMetadata, YtDlp};

pub async fn run(config: Config) -> Result<(), ApiError> {
    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create download directory {:?}: {error}",
                config.download_dir
            ))
        })?;

    let state = AppState {
        extractor: Arc::new(YtDlp::new(
            config.yt_dlp_bin.clone(),
            config.extractor_timeout,
        )),
        download_dir: config.download_dir.clone(),
        delete_delay: config.delete_delay,
    };

    let janitor = janitor::spawn(
        config.download_dir.clone(),
        config.cleanup_interval,
        config.max_file_age,
    );

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("Could not bind {addr}: {error}")))?;

    info!("YouTube audio download API running on http://{addr}");
    info!(
        "Download endpoint: http://localhost:{}/download?url=YOUR_YOUTUBE_URL",
        config.port
    );

    let result = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")));

    janitor.abort();
    info!("Server stopped");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!("Could not listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!("Could not listen for SIGTERM: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
