//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "binary"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Binary entrypoint for the GridWatch daemon."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use gridwatch_common::config::{AcquisitionConfig, AppConfig};
use gridwatch_common::logging::{init_tracing, LogFormat};
use gridwatch_core::PmuDataService;
use gridwatch_historian::{HistorianClient, RawSample, SampleSource};
use gridwatch_topology::Topology;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "GridWatch acquisition daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Override the topology document path")]
    topology: Option<PathBuf>,

    #[arg(long, help = "Override the polling interval in seconds")]
    interval_secs: Option<u64>,

    #[arg(long, value_enum, help = "Override the stdout log format")]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Json,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Json => LogFormat::StructuredJson,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the acquisition service")]
    Run,
    #[command(about = "Print the loaded measurement point table and exit")]
    Points,
}

/// Stand-in source used when the topology document carries no usable
/// historian address; the service then degrades to "no data" instead of
/// refusing to come up.
struct OfflineSource;

#[async_trait]
impl SampleSource for OfflineSource {
    async fn fetch_current(&self, _point_ids: &[u32]) -> Vec<RawSample> {
        Vec::new()
    }
}

fn build_source(topology: &Topology, config: &AcquisitionConfig) -> Arc<dyn SampleSource> {
    match HistorianClient::new(&topology.historian.webservice_address) {
        Ok(client) => {
            let client = client.with_tuning(config);
            let client = match &topology.historian.credentials {
                Some(credentials) => {
                    client.with_basic_auth(&credentials.username, &credentials.password)
                }
                None => client,
            };
            Arc::new(client)
        }
        Err(err) => {
            warn!(error = %err, "historian unreachable by configuration, running offline");
            Arc::new(OfflineSource)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/gridwatch.toml"));
    candidates.push(PathBuf::from("configs/gridwatch.dev.toml"));

    let mut config = match AppConfig::load_with_source(&candidates) {
        Ok(loaded) => loaded.config,
        Err(err) => {
            eprintln!("no usable configuration ({err}); continuing with defaults");
            AppConfig::default()
        }
    };
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    if let Some(secs) = cli.interval_secs {
        config.acquisition.poll_interval = std::time::Duration::from_secs(secs.max(1));
    }
    if let Some(path) = cli.topology {
        config.acquisition.topology_path = path;
    }

    init_tracing("gridwatchd", &config.logging)?;

    let topology = Arc::new(Topology::load_or_empty(&config.acquisition.topology_path));
    let source = build_source(&topology, &config.acquisition);
    let service = PmuDataService::new(topology, source, &config.acquisition);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Points => {
            println!("{}", serde_json::to_string_pretty(service.points())?);
            return Ok(());
        }
        Commands::Run => {}
    }

    let _log_subscription = service.subscribe(|snapshot| {
        info!(
            sequence = snapshot.sequence,
            measurements = snapshot.measurements.len(),
            taken_at = %snapshot.taken_at,
            "snapshot received"
        );
    });
    service.start();

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    service.dispose();
    Ok(())
}
