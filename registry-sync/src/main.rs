// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use clap::Parser;
use prometheus::Registry;
use registry_sync::config::SyncNodeConfig;
use registry_sync::filfox_client::FilfoxClient;
use registry_sync::lotus_client::LotusClient;
use registry_sync::metrics::{start_prometheus_server, SyncMetrics};
use registry_sync::node::SyncNode;
use registry_sync::store::FileRegistry;
use registry_sync_config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version)]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
    /// Run a single pass and exit
    #[clap(long)]
    pub once: bool,
    /// Overrides `interval-secs` from the config file
    #[clap(long)]
    pub interval_secs: Option<u64>,
    /// Overrides the lotus token from the config file
    #[clap(long, env = "LOTUS_TOKEN", hide_env_values = true)]
    pub lotus_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = SyncNodeConfig::load(&args.config_path)?;
    if let Some(token) = args.lotus_token {
        config.lotus.token = Some(token);
    }
    if let Some(interval_secs) = args.interval_secs {
        config.interval_secs = interval_secs;
    }
    config.validate()?;

    let registry = Registry::new();
    let metrics = Arc::new(SyncMetrics::new(&registry));
    if let Some(address) = config.metrics_address {
        start_prometheus_server(address, registry.clone());
        info!("Metrics server started at {}", address);
    }

    let timeout = config.fetch.request_timeout();
    let lotus = LotusClient::new(&config.lotus.rpc_url, config.lotus.token.clone(), timeout)?
        .with_metrics(metrics.clone());
    let filfox = FilfoxClient::new(&config.filfox_url, timeout)?;
    let store = FileRegistry::new(&config.registry_path);
    info!(
        "Syncing {} into registry at {}",
        lotus.rpc_url(),
        store.root().display()
    );

    let node = SyncNode::new(Arc::new(lotus), Arc::new(filfox), Arc::new(store), &config)
        .with_metrics(metrics);

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            cancel_on_signal.cancel();
        }
    });

    if args.once {
        let report = node.run_pass(&cancel).await.context("sync pass failed")?;
        if report.has_changes() {
            println!("{}", report.changelog());
        }
        return Ok(());
    }

    node.run(config.interval(), cancel)
        .await
        .context("sync loop stopped")
}
