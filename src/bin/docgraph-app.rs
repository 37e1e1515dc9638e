use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use docgraph::app::service::DocumentService;
use docgraph::config::Config;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Overrides DOCGRAPH_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Overrides DOCGRAPH_MAX_CONCURRENCY.
    #[arg(long)]
    max_concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    docgraph::logging::init("info,tower_http=debug")?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting docgraph-app");

    let mut config = Config::from_env().context("load config")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(max_concurrency) = args.max_concurrency {
        config.max_concurrency = max_concurrency.max(1);
    }

    let service = Arc::new(DocumentService::from_config(&config).await?);
    let sweeper = service.spawn_reconciler(config.sweep_interval);
    let app = docgraph::http::router(Arc::clone(&service));

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
