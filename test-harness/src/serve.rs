// Runs the in-memory policy service for manual console sessions.
use anyhow::{Context, Result};
use clap::Parser;
use lectern_test_harness::PolicyService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lectern-policy-service")]
#[command(about = "Serve a seeded in-memory policy-administration service")]
struct Args {
    /// Listen address (host:port)
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let service = Arc::new(PolicyService::seeded().await?);
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    info!(addr = %args.listen, "policy service listening (users: ana, bruno)");
    axum::serve(listener, service.router().into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serve policy service")
}
