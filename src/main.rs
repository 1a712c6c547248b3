use std::sync::Arc;

use sketchbook::config::{Config, StorageBackend};
use sketchbook::server::{build_router, start_server};
use sketchbook::service::GenerationService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Load .env next to the binary first, then fall back to the CWD search.
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .filter(|path| path.exists());
    match beside_exe {
        Some(path) => {
            dotenvy::from_path(&path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing::info!("sketchbook starting");

    let config = Config::load()?;
    tracing::debug!(?config, "effective configuration");

    let service = Arc::new(GenerationService::from_config(&config)?);
    tracing::info!(pipelines = ?service.pipelines(), "generation service ready");

    let media_dir = (config.storage.backend == StorageBackend::Fs && config.server.serve_media)
        .then(|| config.storage.root.clone());
    let router = build_router(service, media_dir);
    start_server(router, config.server.bind_addr).await?;

    tokio::signal::ctrl_c().await?;

    tracing::info!("sketchbook shutting down");
    Ok(())
}
