mod app;

use anyhow::Context;
use app::MoodManager;
use moodconfig::get_config;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,moodstream=debug";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = get_config();
    info!("🌙 MoodManager starting (config in {})", config.config_dir());

    let mut manager = MoodManager::from_config(&config)
        .await
        .context("Failed to assemble the mood stream")?;
    manager.start().context("Failed to load the initial segments")?;

    info!("✅ MoodManager is running");
    info!("Press Ctrl+C to stop...");
    manager.run_until_ctrl_c().await;

    manager.shutdown().await;
    info!("👋 MoodManager stopped");
    Ok(())
}
