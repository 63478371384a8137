// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

// Async JSON-RPC client for a lotus-compatible Filecoin node.
// Only the three calls the sync core needs are exposed; transport failures
// are surfaced as-is, retry policy belongs to the caller.

use crate::encoding::{encode_cbor_base64, EventValue, CBOR_CODEC};
use crate::error::{SyncError, SyncResult};
use crate::events::{CidLink, RawActorEvent, TYPE_KEY};
use crate::metrics::SyncMetrics;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tap::TapFallible;

/// Chain node operations used by the fetcher and the multisig resolver.
#[async_trait]
pub trait ChainRpcClient: Send + Sync {
    /// Height of the current chain head.
    async fn chain_head(&self) -> SyncResult<u64>;

    /// Raw built-in actor events in an inclusive height range.
    /// Fails with `ResponseTooLarge` when the node refuses the response size.
    async fn actor_events_raw(&self, filter: &ActorEventFilter) -> SyncResult<Vec<RawActorEvent>>;

    /// Raw state of the actor at `address`.
    async fn read_state(&self, address: &str) -> SyncResult<ActorState>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterValue {
    #[serde(rename = "Codec")]
    pub codec: u64,
    #[serde(rename = "Value")]
    pub value: String,
}

/// Parameter of `Filecoin.GetActorEventsRaw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorEventFilter {
    pub from_height: u64,
    pub to_height: u64,
    pub fields: BTreeMap<String, Vec<FilterValue>>,
}

impl ActorEventFilter {
    /// Filter on `$type`. The node matches CBOR-encoded values, so each type
    /// name is encoded the same way actors emit it. Codec 0x51 also restricts
    /// the result to built-in actor events (FEVM events are raw).
    pub fn for_event_types(
        from_height: u64,
        to_height: u64,
        event_types: &[String],
    ) -> SyncResult<Self> {
        if to_height < from_height {
            return Err(SyncError::Config(format!(
                "to_height {} is below from_height {}",
                to_height, from_height
            )));
        }
        if event_types.is_empty() {
            return Err(SyncError::Config(
                "event type filter must not be empty".to_string(),
            ));
        }
        let values = event_types
            .iter()
            .map(|t| {
                Ok(FilterValue {
                    codec: CBOR_CODEC,
                    value: encode_cbor_base64(&EventValue::Text(t.clone()))?,
                })
            })
            .collect::<SyncResult<Vec<_>>>()?;
        let mut fields = BTreeMap::new();
        fields.insert(TYPE_KEY.to_string(), values);
        Ok(Self {
            from_height,
            to_height,
            fields,
        })
    }
}

/// Result of `Filecoin.StateReadState`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActorState {
    #[serde(rename = "Balance", default)]
    pub balance: String,
    #[serde(rename = "Code")]
    pub code: Option<CidLink>,
    #[serde(rename = "State")]
    pub state: Value,
}

impl ActorState {
    /// Interprets the inner state as a concrete actor state type.
    pub fn parse<T: DeserializeOwned>(&self) -> SyncResult<T> {
        serde_json::from_value(self.state.clone())
            .map_err(|e| SyncError::InvalidResponse(format!("unexpected actor state: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TipSetHeader {
    height: u64,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Node errors that mean "narrow the query", e.g. lotus' "Response is too big".
pub fn is_response_too_large(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("too big") || msg.contains("too large")
}

#[derive(Clone, Debug)]
pub struct LotusClient {
    http_client: reqwest::Client,
    rpc_url: String,
    token: Option<String>,
    request_id: Arc<AtomicU64>,
    metrics: Option<Arc<SyncMetrics>>,
}

impl LotusClient {
    pub fn new(
        rpc_url: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
    ) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            http_client,
            rpc_url: rpc_url.into(),
            token: token.filter(|t| !t.is_empty()),
            request_id: Arc::new(AtomicU64::new(1)),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> SyncResult<T> {
        let started = Instant::now();
        let result = self.call_inner(method, params).await;
        if let Some(m) = &self.metrics {
            m.rpc_queries.with_label_values(&[method]).inc();
            m.rpc_queries_latency
                .with_label_values(&[method])
                .observe(started.elapsed().as_secs_f64());
            if let Err(e) = &result {
                m.rpc_errors
                    .with_label_values(&[method, e.error_type()])
                    .inc();
            }
        }
        result
    }

    async fn call_inner<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> SyncResult<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::SeqCst),
        };

        let mut builder = self.http_client.post(&self.rpc_url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::debug!("[Lotus] <<< HTTP error {} \n{}", status, error_text);
            if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE || is_response_too_large(&error_text)
            {
                return Err(SyncError::ResponseTooLarge(format!("{}: {}", method, status)));
            }
            return Err(SyncError::Transport(format!(
                "{} HTTP error: {} - {}",
                method, status, error_text
            )));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Transport(format!("{} response unreadable: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            if is_response_too_large(&error.message) {
                return Err(SyncError::ResponseTooLarge(error.message));
            }
            return Err(SyncError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        // `null` is a valid result, e.g. an empty event list
        let result = rpc_response.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| SyncError::InvalidResponse(format!("{}: {}", method, e)))
    }
}

#[async_trait]
impl ChainRpcClient for LotusClient {
    async fn chain_head(&self) -> SyncResult<u64> {
        let head: TipSetHeader = self.call("Filecoin.ChainHead", vec![]).await?;
        Ok(head.height)
    }

    async fn actor_events_raw(&self, filter: &ActorEventFilter) -> SyncResult<Vec<RawActorEvent>> {
        let events: Option<Vec<RawActorEvent>> = self
            .call("Filecoin.GetActorEventsRaw", vec![json!(filter)])
            .await
            .tap_err(|e| {
                tracing::debug!(
                    "[Lotus] GetActorEventsRaw failed for {}..={}: {}",
                    filter.from_height,
                    filter.to_height,
                    e
                )
            })?;
        Ok(events.unwrap_or_default())
    }

    async fn read_state(&self, address: &str) -> SyncResult<ActorState> {
        self.call(
            "Filecoin.StateReadState",
            vec![json!(address), Value::Null],
        )
        .await
    }
}
