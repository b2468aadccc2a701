use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use geoprompt_server::{build_router, state::AppState};

/// Geoprompt backend server.
#[derive(Debug, Parser)]
#[command(name = "geoprompt-server")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Bind address.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Repository root holding `scenarios/` and `data/`.
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("geoprompt=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let state = Arc::new(AppState::new(&args.root)?);
    info!(
        scenarios = state.registry.list().count(),
        default = state.registry.default_scenario_id(),
        "scenario registry loaded"
    );

    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!("geoprompt server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
