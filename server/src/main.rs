mod api;
mod config;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;

use config::{Config, ConfigError, MetricsConfig};
use pipeline::DegradeService;
use pipeline::service::BuildError;

#[derive(Parser)]
#[command(about = "Degrade statistics service")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum ServerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("service setup failed: {0}")]
    Build(#[from] BuildError),

    #[error("metrics recorder setup failed: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), ServerError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_file(&cli.config)?;
    if let Some(metrics) = &config.metrics {
        install_metrics_recorder(metrics)?;
    }

    let service = Arc::new(DegradeService::from_config(&config.pipeline)?);
    let app = api::router(service);

    let addr = format!("{}:{}", config.listener.host, config.listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn install_metrics_recorder(config: &MetricsConfig) -> Result<(), ServerError> {
    let recorder = metrics_exporter_statsd::StatsdBuilder::from(
        &config.statsd_host,
        config.statsd_port,
    )
    .build(Some(config.prefix.as_str()))
    .map_err(|err| ServerError::Metrics(err.to_string()))?;

    metrics::set_global_recorder(recorder)
        .map_err(|err| ServerError::Metrics(err.to_string()))?;

    Ok(())
}
