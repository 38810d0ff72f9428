use anyhow::Context;
use clap::Parser;
use kiln_build::{DockerBuilder, RegistryAuth};
use kilnd::{AppState, Config, LogLevel};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let log_level =
        Arc::new(LogLevel::init(&config.log_level).context("Failed to configure logging")?);
    tracing::info!("Starting server");

    let auth = config
        .docker_config
        .as_deref()
        .map(RegistryAuth::with_config_dir)
        .unwrap_or_default();
    tracing::debug!("Registry credentials from {}", auth.config_path().display());

    let builder = DockerBuilder::connect(auth).context("Failed to set up Docker client")?;
    let state = Arc::new(AppState::new(
        Arc::new(builder),
        config.root_dir.clone(),
        log_level,
    ));

    kilnd::serve(config.listen, state).await
}
