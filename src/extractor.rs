use std::{io::ErrorKind, path::Path, process::Output};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::{
    process::Command,
    time::{Duration, timeout},
};
use tracing::debug;

pub const AUDIO_FORMAT: &str = "mp3";

const FALLBACK_TITLE: &str = "audio";
const FALLBACK_UPLOADER: &str = "Unknown";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub duration: Option<u64>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl VideoMetadata {
    pub fn title_or_default(&self) -> &str {
        self.title
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(FALLBACK_TITLE)
    }

    pub fn duration_or_default(&self) -> u64 {
        self.duration.unwrap_or_default()
    }

    pub fn uploader_or_default(&self) -> &str {
        self.uploader
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(FALLBACK_UPLOADER)
    }
}

// yt-dlp reports durations as floats for some extractors.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|seconds| seconds.is_finite())
        .map(|seconds| seconds.max(0.0).round() as u64))
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("{0} is not installed or could not be started: {1}")]
    Spawn(String, String),
    #[error("{0}")]
    Failed(String),
    #[error("could not parse extractor output: {0}")]
    InvalidOutput(String),
    #[error("extractor did not finish within {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ExtractorError>;

    /// A successful return does not guarantee the file exists.
    async fn fetch_and_convert(&self, url: &str, output: &Path) -> Result<(), ExtractorError>;
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    timeout: Option<Duration>,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, ExtractorError> {
        debug!("Running {} {:?}", self.binary, args);

        let command_future = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(limit) => timeout(limit, command_future)
                .await
                .map_err(|_| ExtractorError::TimedOut(limit))?,
            None => command_future.await,
        }
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ExtractorError::Spawn(self.binary.clone(), "no such executable".to_string())
            } else {
                ExtractorError::Spawn(self.binary.clone(), error.to_string())
            }
        })?;

        if !output.status.success() {
            return Err(ExtractorError::Failed(run_error_message(
                &output.stderr,
                output.status.code(),
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaExtractor for YtDlp {
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ExtractorError> {
        let output = self.run(metadata_args(url)).await?;
        parse_metadata(&output.stdout)
    }

    async fn fetch_and_convert(&self, url: &str, output: &Path) -> Result<(), ExtractorError> {
        self.run(convert_args(url, output)).await.map(|_| ())
    }
}

fn common_flags() -> Vec<String> {
    vec![
        "--no-check-certificates".to_string(),
        "--no-warnings".to_string(),
        "--prefer-free-formats".to_string(),
    ]
}

// `--` keeps a caller-supplied URL such as `--exec=...` from being read as an option.
fn metadata_args(url: &str) -> Vec<String> {
    let mut args = common_flags();
    args.extend([
        "--dump-single-json".to_string(),
        "--skip-download".to_string(),
        "--".to_string(),
        url.to_string(),
    ]);
    args
}

fn convert_args(url: &str, output: &Path) -> Vec<String> {
    let mut args = common_flags();
    args.extend([
        "--extract-audio".to_string(),
        "--audio-format".to_string(),
        AUDIO_FORMAT.to_string(),
        "--audio-quality".to_string(),
        "0".to_string(),
        "--add-metadata".to_string(),
        "--output".to_string(),
        output_template(output),
        "--".to_string(),
        url.to_string(),
    ]);
    args
}

// yt-dlp treats `--output` as a template; a literal `%` must be doubled.
fn output_template(output: &Path) -> String {
    output.to_string_lossy().replace('%', "%%")
}

pub fn parse_metadata(stdout: &[u8]) -> Result<VideoMetadata, ExtractorError> {
    serde_json::from_slice(stdout).map_err(|error| ExtractorError::InvalidOutput(error.to_string()))
}

fn run_error_message(stderr: &[u8], code: Option<i32>) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
        .unwrap_or_else(|| match code {
            Some(code) => format!("extractor exited with status {code}"),
            None => "extractor was terminated by a signal".to_string(),
        })
}
