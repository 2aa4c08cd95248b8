use anyhow::Result;
use clap::{Parser, Subcommand};
use forecast_refresh::{AppConfig, ForecastPipeline, PipelineSupervisor, RefreshScheduler, status};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forecast-refresh", version, about = "Keeps per-market trend forecasts up to date")]
struct Cli {
    /// JSON config file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh every tracked market in the background until ctrl-c (default)
    Run,
    /// Refresh a single market once and exit
    Once {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        period: String,
    },
    /// Show which forecasts are available
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Once { symbol, period } => once(config, &symbol, &period).await,
        Command::Status => status::run(&config).await,
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let pipeline = Arc::new(ForecastPipeline::from_config(&config).await?);
    let targets = config.targets();
    info!(
        targets = targets.len(),
        data_dir = %pipeline.store().base_dir.display(),
        "starting forecast refresh"
    );

    let mut supervisor = PipelineSupervisor::new(pipeline, &config.schedule);
    supervisor.start(&targets);

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    supervisor.shutdown().await;
    Ok(())
}

async fn once(config: AppConfig, symbol: &str, period: &str) -> Result<()> {
    let target = config.target(symbol, period)?.one_shot();
    let pipeline = Arc::new(ForecastPipeline::from_config(&config).await?);
    let path = pipeline.store().artifact_path(&target.symbol, &target.period);

    RefreshScheduler::new(target, pipeline, config.schedule.backoff())
        .run()
        .await?;

    println!("Forecast written to {}", path.display());
    Ok(())
}
