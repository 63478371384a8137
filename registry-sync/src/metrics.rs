// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{extract::State, Router};
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::net::SocketAddr;

const RPC_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0, 7.5, 10., 15., 20., 30., 45., 60.,
];

pub const METRICS_PATH: &str = "/metrics";

#[derive(Clone, Debug)]
pub struct SyncMetrics {
    // Node RPC
    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_queries_latency: HistogramVec,
    pub(crate) rpc_errors: IntCounterVec,

    // Fetcher
    pub(crate) fetch_windows: IntCounter,
    pub(crate) fetch_window_shrinks: IntCounter,
    pub(crate) fetch_window_size: IntGauge,
    pub(crate) events_received: IntCounter,
    pub(crate) events_skipped: IntCounterVec,
    pub(crate) records_fetched: IntCounter,

    // Reconciliation and persistence
    pub(crate) records_merged: IntCounter,
    pub(crate) partitions_written: IntCounter,
    pub(crate) last_synced_height: IntGauge,

    // Allocator signer checks
    pub(crate) signer_drift_detected: IntCounter,
    pub(crate) allocator_check_failures: IntCounter,

    // Passes
    pub(crate) passes_completed: IntCounter,
    pub(crate) pass_errors: IntCounterVec,
    pub(crate) last_successful_pass_timestamp: IntGauge,
}

impl SyncMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            rpc_queries: register_int_counter_vec_with_registry!(
                "registry_sync_rpc_queries",
                "Total number of chain node RPC queries, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "registry_sync_rpc_queries_latency",
                "Latency of chain node RPC queries, by method",
                &["method"],
                RPC_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rpc_errors: register_int_counter_vec_with_registry!(
                "registry_sync_rpc_errors",
                "Total number of failed chain node RPC queries, by method and error type",
                &["method", "error_type"],
                registry,
            )
            .unwrap(),
            fetch_windows: register_int_counter_with_registry!(
                "registry_sync_fetch_windows",
                "Total number of accepted event query windows",
                registry,
            )
            .unwrap(),
            fetch_window_shrinks: register_int_counter_with_registry!(
                "registry_sync_fetch_window_shrinks",
                "Total number of times an event query window was halved",
                registry,
            )
            .unwrap(),
            fetch_window_size: register_int_gauge_with_registry!(
                "registry_sync_fetch_window_size",
                "Event query window size after the latest shrink",
                registry,
            )
            .unwrap(),
            events_received: register_int_counter_with_registry!(
                "registry_sync_events_received",
                "Total number of raw actor events received in accepted windows",
                registry,
            )
            .unwrap(),
            events_skipped: register_int_counter_vec_with_registry!(
                "registry_sync_events_skipped",
                "Total number of actor events not turned into records, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            records_fetched: register_int_counter_with_registry!(
                "registry_sync_records_fetched",
                "Total number of records produced by the fetcher",
                registry,
            )
            .unwrap(),
            records_merged: register_int_counter_with_registry!(
                "registry_sync_records_merged",
                "Total number of new records appended to partitions",
                registry,
            )
            .unwrap(),
            partitions_written: register_int_counter_with_registry!(
                "registry_sync_partitions_written",
                "Total number of partition files written",
                registry,
            )
            .unwrap(),
            last_synced_height: register_int_gauge_with_registry!(
                "registry_sync_last_synced_height",
                "Upper height of the latest persisted fetch",
                registry,
            )
            .unwrap(),
            signer_drift_detected: register_int_counter_with_registry!(
                "registry_sync_signer_drift_detected",
                "Total number of allocators whose multisig signers changed on chain",
                registry,
            )
            .unwrap(),
            allocator_check_failures: register_int_counter_with_registry!(
                "registry_sync_allocator_check_failures",
                "Total number of allocators whose multisig could not be resolved",
                registry,
            )
            .unwrap(),
            passes_completed: register_int_counter_with_registry!(
                "registry_sync_passes_completed",
                "Total number of completed synchronization passes",
                registry,
            )
            .unwrap(),
            pass_errors: register_int_counter_vec_with_registry!(
                "registry_sync_pass_errors",
                "Total number of failed synchronization passes, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            last_successful_pass_timestamp: register_int_gauge_with_registry!(
                "registry_sync_last_successful_pass_timestamp",
                "Unix timestamp of the latest completed pass",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            buffer,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub(crate) fn make_router(registry: Registry) -> Router {
    Router::new()
        .route(METRICS_PATH, get(metrics_handler))
        .with_state(registry)
}

/// Serves `registry` in the prometheus text format on `address`.
pub fn start_prometheus_server(
    address: SocketAddr,
    registry: Registry,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("[Metrics] Failed to bind {}: {}", address, e);
                return;
            }
        };
        tracing::info!("[Metrics] Serving prometheus metrics on {}", address);
        if let Err(e) = axum::serve(listener, make_router(registry).into_make_service()).await {
            tracing::error!("[Metrics] Server stopped: {}", e);
        }
    })
}
