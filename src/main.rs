//! arouterd, the affinity router configuration daemon.

mod app;
mod config;
mod configure;
#[cfg(test)]
mod configure_test;
mod discovery;
#[cfg(test)]
mod discovery_test;
mod error;
#[cfg(test)]
mod fixtures;
mod grouping;
#[cfg(test)]
mod grouping_test;
mod grpc;
mod k8s;
mod reconcile;
mod router;
mod state;
mod vcore;

use std::io::Write;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
use tokio::sync::broadcast;
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

/// Command line options of the daemon.
#[derive(Parser)]
#[command(name = "arouterd")]
struct Cli {
    /// Print version information and exit.
    #[arg(long)]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };
    if cli.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    let recorder = get_metrics_recorder(&cfg);
    metrics::set_recorder(recorder).context("error setting prometheus metrics recorder")?;

    tracing::info!(
        namespace = %cfg.pod_namespace,
        router = %cfg.afrouter_api_address,
        num_rw_pods = %cfg.num_rw_pods,
        num_ro_pods = %cfg.num_ro_pods,
        kafka_topic = %cfg.kafka_topic,
        "starting affinity router configuration daemon",
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    let app_res = App::new(cfg, shutdown_tx.clone()).await?.spawn().await;
    if let Err(err) = app_res.context("error joining application handle").and_then(|res| res) {
        tracing::error!(error = ?err);
        let _res = shutdown_tx.send(());
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}

/// Get a handle to the metrics recorder, initializing it as needed.
fn get_metrics_recorder(config: &Config) -> &'static PrometheusRecorder {
    static RECORDER: OnceLock<PrometheusRecorder> = OnceLock::new();
    RECORDER.get_or_init(|| {
        PrometheusBuilder::new()
            .add_global_label("namespace", config.pod_namespace.clone())
            .build()
    })
}
