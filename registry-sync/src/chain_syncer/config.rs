// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fetch limits for actor event queries

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Filecoin produces one tipset every 30 seconds.
pub const EPOCHS_PER_DAY: u64 = 2880;

/// Configuration for the fetcher's event query behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetchConfig {
    /// Initial number of heights covered by a single query
    #[serde(default = "default_max_window")]
    pub max_window: u64,

    /// A query returning this many events is treated as truncated
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// How far below the chain head a fetch may start. Nodes reject
    /// look-backs beyond a fixed horizon ("bad tipset height").
    #[serde(default = "default_max_lookback")]
    pub max_lookback: u64,

    /// Timeout applied to every remote call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Emitter address of the actor whose events are accepted
    #[serde(default = "default_emitter")]
    pub emitter: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_window: default_max_window(),
            max_results: default_max_results(),
            max_lookback: default_max_lookback(),
            request_timeout_secs: default_request_timeout_secs(),
            emitter: default_emitter(),
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_max_window() -> u64 {
    EPOCHS_PER_DAY / 12
}

fn default_max_results() -> usize {
    10_000
}

fn default_max_lookback() -> u64 {
    EPOCHS_PER_DAY / 3
}

fn default_request_timeout_secs() -> u64 {
    30
}

// verified registry actor
fn default_emitter() -> String {
    "f06".to_string()
}
