use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode, header::CONTENT_DISPOSITION},
};
use tower::ServiceExt;

use yt_audio_api::{AppState, ExtractorError, MediaExtractor, VideoMetadata, build_router};

const AUDIO_BYTES: &[u8] = b"ID3\x04\x00fake mp3 frames";

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    ConvertWithoutFile,
    FailMetadata(&'static str),
    FailConvert(&'static str),
}

struct MockExtractor {
    behaviour: Behaviour,
    outputs: Mutex<Vec<PathBuf>>,
}

impl MockExtractor {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            outputs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl MediaExtractor for MockExtractor {
    async fn fetch_metadata(&self, _url: &str) -> Result<VideoMetadata, ExtractorError> {
        match self.behaviour {
            Behaviour::FailMetadata(message) => Err(ExtractorError::Failed(message.to_string())),
            _ => Ok(VideoMetadata {
                title: Some("Test Song".to_string()),
                duration: Some(120),
                uploader: Some("Tester".to_string()),
                thumbnail: Some("https://i.ytimg.com/vi/abc/hq.jpg".to_string()),
                description: None,
            }),
        }
    }

    async fn fetch_and_convert(&self, _url: &str, output: &Path) -> Result<(), ExtractorError> {
        self.outputs.lock().unwrap().push(output.to_path_buf());
        match self.behaviour {
            Behaviour::Succeed => {
                tokio::fs::write(output, AUDIO_BYTES).await.unwrap();
                Ok(())
            }
            Behaviour::FailConvert(message) => Err(ExtractorError::Failed(message.to_string())),
            _ => Ok(()),
        }
    }
}

fn create_test_app(extractor: Arc<MockExtractor>, dir: &Path) -> Router {
    build_router(AppState {
        extractor,
        download_dir: dir.to_path_buf(),
        delete_delay: Duration::from_millis(50),
    })
}

async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn download_uri(url: &str) -> String {
    format!("/download?url={}", urlencoding::encode(url))
}

#[tokio::test]
async fn given_running_server_when_health_check_then_returns_ok_with_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(Arc::new(MockExtractor::new(Behaviour::Succeed)), dir.path());

    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    let timestamp = body["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
}

#[tokio::test]
async fn given_missing_url_when_download_or_info_then_returns_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(MockExtractor::new(Behaviour::Succeed));

    for uri in ["/download", "/download?url=", "/info", "/info?url="] {
        let response = get(create_test_app(extractor.clone(), dir.path()), uri).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body = json_body(response).await;
        assert_eq!(body["error"], "URL parameter is required");
    }
}

#[tokio::test]
async fn given_non_youtube_url_when_download_then_returns_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(MockExtractor::new(Behaviour::Succeed));
    let app = create_test_app(extractor.clone(), dir.path());

    let response = get(app, "/download?url=ftp://example.com").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], br#"{"error":"Invalid YouTube URL"}"#);
    assert!(extractor.outputs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn given_non_youtube_url_when_info_then_metadata_is_still_returned() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(Arc::new(MockExtractor::new(Behaviour::Succeed)), dir.path());

    let uri = format!(
        "/info?url={}",
        urlencoding::encode("https://example.com/video")
    );
    let response = get(app, &uri).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["title"], "Test Song");
    assert_eq!(body["duration"], 120);
    assert_eq!(body["uploader"], "Tester");
    assert_eq!(body["thumbnail"], "https://i.ytimg.com/vi/abc/hq.jpg");
    assert!(body["description"].is_null());
}

#[tokio::test]
async fn given_extractor_failure_when_info_then_returns_generic_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(
        Arc::new(MockExtractor::new(Behaviour::FailMetadata(
            "ERROR: Video unavailable",
        ))),
        dir.path(),
    );

    let response = get(app, "/info?url=https://youtu.be/abc").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(
        body,
        serde_json::json!({ "error": "Failed to fetch video info" })
    );
}

#[tokio::test]
async fn given_valid_url_when_download_then_streams_audio_and_deletes_file() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(MockExtractor::new(Behaviour::Succeed));
    let app = create_test_app(extractor.clone(), dir.path());

    let response = get(app, &download_uri("https://www.youtube.com/watch?v=abc")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "audio/mpeg");
    assert_eq!(headers["content-length"], AUDIO_BYTES.len().to_string());
    assert_eq!(headers["x-video-duration"], "120");
    assert_eq!(headers["x-video-title"], "Test%20Song");
    assert_eq!(headers["x-video-uploader"], "Tester");
    let disposition = headers[CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\""));
    assert!(disposition.ends_with("_Test_Song.mp3\""));

    let output = extractor.outputs.lock().unwrap()[0].clone();
    assert!(output.starts_with(dir.path()));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], AUDIO_BYTES);

    for _ in 0..100 {
        if !output.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!output.exists(), "streamed file should be removed");
}

#[tokio::test]
async fn given_abandoned_response_when_body_is_dropped_then_file_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(MockExtractor::new(Behaviour::Succeed));
    let app = create_test_app(extractor.clone(), dir.path());

    let response = get(app, &download_uri("https://youtu.be/abc")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let output = extractor.outputs.lock().unwrap()[0].clone();
    drop(response);

    for _ in 0..100 {
        if !output.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!output.exists());
}

#[tokio::test]
async fn given_concurrent_downloads_of_same_url_then_filenames_differ() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(MockExtractor::new(Behaviour::Succeed));
    let uri = download_uri("https://music.youtube.com/watch?v=abc");

    let (first, second) = tokio::join!(
        get(create_test_app(extractor.clone(), dir.path()), &uri),
        get(create_test_app(extractor.clone(), dir.path()), &uri),
    );

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_ne!(
        first.headers()[CONTENT_DISPOSITION],
        second.headers()[CONTENT_DISPOSITION]
    );

    let outputs = extractor.outputs.lock().unwrap().clone();
    assert_eq!(outputs.len(), 2);
    assert_ne!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn given_converter_produces_no_file_when_download_then_returns_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(
        Arc::new(MockExtractor::new(Behaviour::ConvertWithoutFile)),
        dir.path(),
    );

    let response = get(app, &download_uri("https://youtube.com/watch?v=abc")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "File download failed");
}

#[tokio::test]
async fn given_extractor_errors_when_download_then_maps_message_to_status() {
    let cases = [
        (
            "ERROR: [youtube] abc: Video unavailable",
            StatusCode::BAD_REQUEST,
            "Video is unavailable or private",
        ),
        (
            "ERROR: [youtube] abc: playlist not found",
            StatusCode::NOT_FOUND,
            "Video not found",
        ),
        (
            "ERROR: Unable to download webpage",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to download audio",
        ),
    ];

    for (message, status, error) in cases {
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(
            Arc::new(MockExtractor::new(Behaviour::FailMetadata(message))),
            dir.path(),
        );

        let response = get(app, &download_uri("https://youtu.be/abc")).await;

        assert_eq!(response.status(), status, "{message}");
        let body = json_body(response).await;
        assert_eq!(body["error"], error);
        assert_eq!(body["details"], message);
    }
}

#[tokio::test]
async fn given_incoming_request_id_then_it_is_echoed() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(Arc::new(MockExtractor::new(Behaviour::Succeed)), dir.path());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn given_conversion_failure_when_download_then_maps_message_with_details() {
    let cases = [
        (
            "ERROR: [youtube] abc: Video unavailable",
            StatusCode::BAD_REQUEST,
            "Video is unavailable or private",
        ),
        (
            "ERROR: Postprocessing: ffprobe and ffmpeg not found",
            StatusCode::NOT_FOUND,
            "Video not found",
        ),
        (
            "ERROR: Postprocessing: audio conversion failed",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to download audio",
        ),
    ];

    for (message, status, error) in cases {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(MockExtractor::new(Behaviour::FailConvert(message)));
        let app = create_test_app(extractor.clone(), dir.path());

        let response = get(app, &download_uri("https://youtu.be/abc")).await;

        assert_eq!(response.status(), status, "{message}");
        let body = json_body(response).await;
        assert_eq!(body["error"], error);
        assert_eq!(body["details"], message);
        assert_eq!(extractor.outputs.lock().unwrap().len(), 1);
    }
}

#[tokio::test]
async fn given_repeated_url_key_then_returns_json_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(MockExtractor::new(Behaviour::Succeed));

    for path in ["/download", "/info"] {
        let uri = format!("{path}?url=https://youtu.be/a&url=https://youtu.be/b");
        let response = get(create_test_app(extractor.clone(), dir.path()), &uri).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body = json_body(response).await;
        assert_eq!(body["error"], "URL parameter is required");
    }
    assert!(extractor.outputs.lock().unwrap().is_empty());
}
