use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use class_scribe::audio::AudioDecoder;
use class_scribe::config::FrameFormat;
use class_scribe::engines::{OpenAiChat, OpenAiTranscription};
use class_scribe::session::SessionRegistry;
use class_scribe::transport::{LocalTransport, NullDirectory};
use class_scribe::{
    create_router, AppState, Config, KnowledgeStore, RawPcmDecoder, SessionManager,
    SymphoniaFrameDecoder,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "class-scribe")]
#[command(about = "Voice session capture, transcription and knowledge service")]
struct Cli {
    /// Config file stem, e.g. config/class-scribe for config/class-scribe.toml
    #[arg(long, default_value = "config/class-scribe")]
    config: String,

    /// Listen address override, e.g. 0.0.0.0:8080
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Database: {}", cfg.storage.db_path);

    let store = Arc::new(
        KnowledgeStore::new(PathBuf::from(&cfg.storage.db_path))
            .context("Failed to open knowledge store")?,
    );

    let transcriber = Arc::new(
        OpenAiTranscription::from_config(&cfg.transcription)
            .context("Failed to configure transcription engine")?,
    );
    let chat =
        Arc::new(OpenAiChat::from_config(&cfg.summary).context("Failed to configure chat engine")?);

    let decoder: Arc<dyn AudioDecoder> = match cfg.audio.frame_format {
        FrameFormat::Pcm => Arc::new(RawPcmDecoder::new()),
        FrameFormat::Container => Arc::new(SymphoniaFrameDecoder::new()),
    };

    let manager = Arc::new(SessionManager::new(
        &cfg,
        Arc::new(SessionRegistry::new()),
        Arc::clone(&store),
        Arc::new(LocalTransport::new()),
        Arc::new(NullDirectory),
        decoder,
        transcriber,
        chat,
    ));

    let state = AppState::new(manager, store, cfg.service.name.clone());
    let app = create_router(state);

    let addr = cli
        .listen
        .unwrap_or_else(|| format!("{}:{}", cfg.service.http.bind, cfg.service.http.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .context("HTTP server failed")?;

    Ok(())
}
