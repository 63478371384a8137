// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_syncer::FetchConfig;
use crate::filfox_client::DEFAULT_FILFOX_URL;
use crate::types::{EventFamily, PartitionBy};
use anyhow::anyhow;
use registry_sync_config::Config;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOTUS_URL: &str = "https://api.node.glif.io/rpc/v1";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LotusConfig {
    // JSON-RPC endpoint of a lotus-compatible node
    #[serde(default = "default_lotus_url")]
    pub rpc_url: String,
    // Bearer token attached to every request. Usually passed via LOTUS_TOKEN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for LotusConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_lotus_url(),
            token: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncNodeConfig {
    #[serde(default)]
    pub lotus: LotusConfig,
    // Message explorer API used to decode verifier-balance messages
    #[serde(default = "default_filfox_url")]
    pub filfox_url: String,
    // Local checkout of the allocator registry
    pub registry_path: PathBuf,
    #[serde(default = "default_event_family")]
    pub event_family: EventFamily,
    // Grouping of allocation records; verifier-balance records always group by verifier
    #[serde(default)]
    pub partition_by: PartitionBy,
    // Resume height when the registry holds no records yet
    #[serde(default)]
    pub start_height: u64,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default = "default_check_allocators")]
    pub check_allocators: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_address: Option<SocketAddr>,
}

impl Config for SyncNodeConfig {}

impl SyncNodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.lotus.rpc_url.starts_with("http://") && !self.lotus.rpc_url.starts_with("https://")
        {
            return Err(anyhow!(
                "lotus rpc-url must be an http(s) URL, got {}",
                self.lotus.rpc_url
            ));
        }
        if self.fetch.max_window == 0 {
            return Err(anyhow!("fetch max-window must be at least 1"));
        }
        if self.fetch.max_results == 0 {
            return Err(anyhow!("fetch max-results must be at least 1"));
        }
        if self.fetch.request_timeout_secs == 0 {
            return Err(anyhow!("fetch request-timeout-secs must be at least 1"));
        }
        if self.interval_secs == 0 {
            return Err(anyhow!("interval-secs must be at least 1"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_lotus_url() -> String {
    DEFAULT_LOTUS_URL.to_string()
}

fn default_filfox_url() -> String {
    DEFAULT_FILFOX_URL.to_string()
}

fn default_event_family() -> EventFamily {
    EventFamily::VerifierBalance
}

fn default_check_allocators() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    3600
}
