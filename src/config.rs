use std::{path::PathBuf, time::Duration};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 30 * 60;
const DEFAULT_MAX_FILE_AGE_SECONDS: u64 = 60 * 60;
const DEFAULT_DELETE_DELAY_SECONDS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub download_dir: PathBuf,
    pub yt_dlp_bin: String,
    pub extractor_timeout: Option<Duration>,
    pub cleanup_interval: Duration,
    pub max_file_age: Duration,
    pub delete_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            yt_dlp_bin: DEFAULT_YT_DLP_BIN.to_string(),
            extractor_timeout: None,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECONDS),
            max_file_age: Duration::from_secs(DEFAULT_MAX_FILE_AGE_SECONDS),
            delete_delay: Duration::from_secs(DEFAULT_DELETE_DELAY_SECONDS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: read_string_env("HOST").unwrap_or(defaults.host),
            port: read_u16_env("PORT").unwrap_or(defaults.port),
            download_dir: read_string_env("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            yt_dlp_bin: read_string_env("YT_DLP_BIN").unwrap_or(defaults.yt_dlp_bin),
            extractor_timeout: read_u64_env("YT_DLP_TIMEOUT_SECONDS")
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs),
            cleanup_interval: read_u64_env("CLEANUP_INTERVAL_SECONDS")
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            max_file_age: read_u64_env("MAX_FILE_AGE_SECONDS")
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_file_age),
            delete_delay: read_u64_env("DELETE_DELAY_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.delete_delay),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u16_env(name: &str) -> Option<u16> {
    read_string_env(name).and_then(|value| value.parse::<u16>().ok())
}

fn read_u64_env(name: &str) -> Option<u64> {
    read_string_env(name).and_then(|value| value.parse::<u64>().ok())
}
