//! Slothboard realtime daemon entry point

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use slothboard_common::Config;
use slothboard_rt::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "slothboard-rt", about = "Slothboard realtime daemon")]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "SLOTHBOARD_BIND_ADDR")]
    bind_addr: Option<String>,

    /// Sqlite database file path
    #[arg(long, env = "SLOTHBOARD_DB_PATH")]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "SLOTHBOARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slothboard_rt=info,slothboard_common=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = Config::resolve(args.bind_addr, args.db_path, args.config.as_deref())
        .context("failed to resolve configuration")?;

    let pool = slothboard_rt::db::connect(&config.db_path)
        .await
        .context("failed to open database")?;

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(pool, config);

    slothboard_rt::reaper::spawn(
        state.pool.clone(),
        state.sessions.clone(),
        state.config.idle_session_max_age_hours,
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("Slothboard realtime daemon listening on {bind_addr}");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
