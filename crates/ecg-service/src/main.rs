//! ECG stream processor: device lines in, `raw` and `filtered` topics out

use anyhow::Context;
use clap::Parser;
use ecg_core::SystemClock;
use ecg_service::{
    connector_for, Connector, Endpoint, Pipeline, Publisher, PublisherServer, ServiceConfig,
    SimulatedConnector,
};
use ecg_simulation::{MainsConfig, SimulatorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ecg-processor", version, about = "Real-time ECG stream processor")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device endpoint: tcp://host:port or a device path
    #[arg(long)]
    endpoint: Option<String>,

    /// Address subscribers connect to
    #[arg(long)]
    listen: Option<String>,

    /// Device sampling rate in Hz
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Local mains frequency in Hz
    #[arg(long)]
    mains: Option<f64>,

    /// Read from a built-in simulated device instead of the endpoint
    #[arg(long)]
    simulate: bool,
}

impl Args {
    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::load(path)?,
            None => ServiceConfig::default(),
        };

        if let Some(endpoint) = &self.endpoint {
            config.ingest.endpoint = endpoint.clone();
        }
        if let Some(listen) = &self.listen {
            config.publisher.listen_address = listen.clone();
        }
        if let Some(sample_rate) = self.sample_rate {
            config.processing.sample_rate = sample_rate;
        }
        if let Some(mains) = self.mains {
            config.processing.filter.mains_hz = mains;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn connector(args: &Args, config: &ServiceConfig) -> anyhow::Result<Box<dyn Connector>> {
    if args.simulate {
        let simulator = SimulatorConfig {
            sample_rate: config.processing.sample_rate,
            mains: Some(MainsConfig {
                frequency_hz: config.processing.filter.mains_hz,
                amplitude: 0.02,
            }),
            ..SimulatorConfig::default()
        };
        return Ok(Box::new(SimulatedConnector::new(simulator)));
    }

    let endpoint: Endpoint = config.ingest.endpoint.parse()?;
    Ok(connector_for(&endpoint))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.service_config()?;
    let connector = connector(&args, &config)?;

    let publisher = Publisher::new(config.publisher.channel_capacity);
    let server = PublisherServer::bind(
        &config.publisher.listen_address,
        publisher.clone(),
        config.publisher.write_timeout(),
    )
    .await?;
    let server_task = tokio::spawn(server.run());

    let pipeline = Pipeline::new(&config, connector, Arc::new(SystemClock::new()), publisher)?;
    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            cancel.cancel();
        }
    });

    let report = pipeline.run().await.context("pipeline terminated")?;
    server_task.await?;

    info!(
        samples = report.samples_processed,
        sessions = report.sessions,
        publish_failures = report.publish_failures,
        "Shutdown complete"
    );
    Ok(())
}
