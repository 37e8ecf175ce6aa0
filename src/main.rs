use yt_audio_api::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "yt_audio_api=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = yt_audio_api::run(Config::from_env()).await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}
