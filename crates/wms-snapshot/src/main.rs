use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wms_snapshot_core::bigquery::{token_source_from_lookup, BigQueryClient};
use wms_snapshot_core::config::PipelineConfig;
use wms_snapshot_core::enricher::EnrichmentContext;
use wms_snapshot_core::pipeline;
use wms_snapshot_core::upload::TableId;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Joins the WMS stock and position extracts and appends them to the history table",
    long_about = "Input paths come from PATH_WH and PATH_POS_ATT (a .env file is honoured). \
                  The destination defaults to data_espol.stock_wms_historico."
)]
struct Cli {
    /// Build and log the snapshot without uploading it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    let now = Utc::now();

    if cli.dry_run {
        let context = EnrichmentContext::at(now);
        let snapshot = pipeline::build_snapshot(&config, &context)?;
        info!(
            summary = %serde_json::to_string(&snapshot.summary)?,
            destination = %config.destination,
            "dry run; skipping upload"
        );
        return Ok(());
    }

    let tokens = token_source_from_lookup(|key| std::env::var(key).ok());
    let client = BigQueryClient::new(tokens);

    let summary = pipeline::run(&config, &client, now).await?;
    info!(summary = %serde_json::to_string(&summary)?, "run complete");

    println!("{}", confirmation(&config.destination));
    Ok(())
}

/// The one line printed after a successful upload.
fn confirmation(destination: &TableId) -> String {
    format!(
        "Datos subidos exitosamente a {}.{}",
        destination.dataset, destination.table
    )
}
