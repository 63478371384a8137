// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Message decode lookup. Verifier-balance events do not carry the client
//! address or the granted allowance; both come from the decoded parameters
//! of the message that emitted the event.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_FILFOX_URL: &str = "https://filfox.info/api/v1";

/// Parameters of the call that produced an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedMessage {
    pub method: Option<String>,
    /// `decodedParams.Address`, empty when the explorer could not decode it
    pub address: String,
    /// `decodedParams.Allowance`, empty when the explorer could not decode it
    pub allowance: String,
}

#[async_trait]
pub trait MessageLookup: Send + Sync {
    async fn decoded_message(&self, msg_cid: &str) -> SyncResult<DecodedMessage>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subcall {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    decoded_params: Option<BTreeMap<String, serde_json::Value>>,
}

impl From<Subcall> for DecodedMessage {
    fn from(call: Subcall) -> Self {
        let params = call.decoded_params.unwrap_or_default();
        let text = |key: &str| match params.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        DecodedMessage {
            method: call.method,
            address: text("Address"),
            allowance: text("Allowance"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FilfoxClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl FilfoxClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn subcalls_url(&self, msg_cid: &str) -> String {
        format!("{}/message/{}/subcalls", self.base_url, msg_cid)
    }
}

#[async_trait]
impl MessageLookup for FilfoxClient {
    async fn decoded_message(&self, msg_cid: &str) -> SyncResult<DecodedMessage> {
        let url = self.subcalls_url(msg_cid);
        tracing::debug!("[Filfox] >>> GET {}", url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("failed to fetch decoded message: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Transport(format!(
                "failed to fetch decoded message {}: HTTP {}",
                msg_cid, status
            )));
        }

        let subcalls: Vec<Subcall> = response.json().await.map_err(|e| {
            SyncError::InvalidResponse(format!("decoded message {}: {}", msg_cid, e))
        })?;
        subcalls
            .into_iter()
            .next()
            .map(DecodedMessage::from)
            .ok_or_else(|| {
                SyncError::InvalidResponse(format!("no subcalls recorded for message {}", msg_cid))
            })
    }
}
