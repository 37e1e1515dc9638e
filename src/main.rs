use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use docgraph::app::service::DocumentService;
use docgraph::cli::{Cli, Command};
use docgraph::commands;
use docgraph::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    docgraph::logging::init("info").context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let mut config = Config::from_env().context("load config")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    let service = DocumentService::from_config(&config).await?;

    match cli.command {
        Command::Ingest(args) => commands::ingest(&service, args).await.context("ingest")?,
        Command::List => commands::list(&service).await.context("list")?,
        Command::Show(args) => commands::show(&service, args).await.context("show")?,
        Command::Status(args) => commands::status(&service, args).await.context("status")?,
        Command::Enhance(args) => commands::enhance(&service, args).await.context("enhance")?,
        Command::Delete(args) => commands::delete(&service, args).await.context("delete")?,
        Command::Sweep => commands::sweep(&service).await.context("sweep")?,
    }

    Ok(())
}
