use anyhow::Result;
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = ag2_core::config::Config::load()?;
    cli::Cli::parse().apply(&mut config);
    let _log_guard = ag2_core::logging::init(config.debug);

    let bind = format!("{}:{}", config.host, config.port);
    let state = ag2_core::AppState::bootstrap(config).await?;
    let app = ag2_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
