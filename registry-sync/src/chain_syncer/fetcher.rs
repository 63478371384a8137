// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Range-splitting retrieval of actor events.
//!
//! The node caps both the number of events and the response size of a
//! single query, and silently truncates at the former. The fetcher walks the
//! requested height range window by window, halving the window whenever a
//! query comes back full or is refused, and maps every accepted event to an
//! [`AllocationRecord`].

use super::config::FetchConfig;
use super::window::FetchWindow;
use crate::error::{SyncError, SyncResult};
use crate::events::{decode_event, ActorEvent, RawActorEvent};
use crate::filfox_client::MessageLookup;
use crate::lotus_client::{ActorEventFilter, ChainRpcClient};
use crate::metrics::SyncMetrics;
use crate::types::{AllocationEntry, AllocationRecord, VerifierBalanceEntry};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tap::TapFallible;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub from_height: u64,
    /// Defaults to the confirmed chain head
    pub to_height: Option<u64>,
    pub event_types: Vec<String>,
    /// Heights below the head that are not fetched yet
    pub confirmations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Records in ascending height order
    pub records: Vec<AllocationRecord>,
    /// Effective range after confirmation and look-back clamping
    pub from_height: u64,
    pub to_height: u64,
    /// Window size in effect when the fetch finished
    pub window_size: u64,
    pub windows_queried: u64,
    pub shrinks: u64,
    pub events_received: u64,
    pub events_skipped: u64,
}

pub struct EventFetcher<C, L> {
    client: Arc<C>,
    lookup: Arc<L>,
    config: FetchConfig,
    metrics: Option<Arc<SyncMetrics>>,
}

impl<C, L> EventFetcher<C, L>
where
    C: ChainRpcClient,
    L: MessageLookup,
{
    pub fn new(client: Arc<C>, lookup: Arc<L>, config: FetchConfig) -> Self {
        Self {
            client,
            lookup,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetches and maps every matching event in the request's range.
    ///
    /// Nothing is returned from a fetch that fails or is cancelled part way;
    /// the caller re-runs the same range.
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> SyncResult<FetchOutcome> {
        if request.event_types.is_empty() {
            return Err(SyncError::Config(
                "at least one event type is required".to_string(),
            ));
        }

        let head = cancellable(cancel, self.client.chain_head()).await?;
        let mut upper = head.saturating_sub(request.confirmations);
        if let Some(to_height) = request.to_height {
            upper = upper.min(to_height);
        }
        if upper < request.from_height {
            info!(
                "[Fetcher] Nothing to sync: from height {} is above confirmed height {}",
                request.from_height, upper
            );
            return Ok(FetchOutcome {
                from_height: request.from_height,
                to_height: upper,
                window_size: self.config.max_window,
                ..Default::default()
            });
        }

        let floor = upper.saturating_sub(self.config.max_lookback);
        let lower = if request.from_height < floor {
            warn!(
                "[Fetcher] From height {} is beyond the {} epoch look-back limit, starting at {}",
                request.from_height, self.config.max_lookback, floor
            );
            floor
        } else {
            request.from_height
        };

        debug!(
            "[Fetcher] Syncing {:?} events from height {} to height {}",
            request.event_types, lower, upper
        );

        let mut window = FetchWindow::new(lower, upper, self.config.max_window);
        let mut outcome = FetchOutcome {
            from_height: lower,
            to_height: upper,
            ..Default::default()
        };
        // inclusive ranges overlap at their boundary height
        let mut covered_through: Option<u64> = None;

        while !window.is_done() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let (from, to) = window.range();
            let filter = ActorEventFilter::for_event_types(from, to, &request.event_types)?;
            debug!(
                "[Fetcher] Fetching actor events from height {} to {} with window {}",
                from, to, window.window_size
            );

            let raw_events =
                match cancellable(cancel, self.client.actor_events_raw(&filter)).await {
                    Ok(events) if events.len() >= self.config.max_results => {
                        debug!(
                            "[Fetcher] {} events in {}..={} reached the result cap",
                            events.len(),
                            from,
                            to
                        );
                        window = self.shrink(window, &mut outcome)?;
                        continue;
                    }
                    Err(SyncError::ResponseTooLarge(msg)) => {
                        debug!("[Fetcher] Response too large for {}..={}: {}", from, to, msg);
                        window = self.shrink(window, &mut outcome)?;
                        continue;
                    }
                    Err(e) => return Err(e),
                    Ok(events) => events,
                };

            debug!(
                "[Fetcher] Fetched {} actor events from height {} to {}",
                raw_events.len(),
                from,
                to
            );
            let received = raw_events.len() as u64;
            outcome.windows_queried += 1;
            outcome.events_received += received;

            let accepted: Vec<RawActorEvent> = raw_events
                .into_iter()
                .filter(|e| covered_through.map_or(true, |c| e.height > c))
                .filter(|e| self.is_accepted(e, &mut outcome))
                .collect();

            let mapped = cancellable(cancel, async {
                Ok(join_all(accepted.iter().map(|raw| self.map_event(raw))).await)
            })
            .await?;

            for (raw, result) in accepted.iter().zip(mapped) {
                match result {
                    Ok(Some(record)) => outcome.records.push(record),
                    Ok(None) => {}
                    Err(e) if e.is_decode_error() => {
                        warn!(
                            "[Fetcher] Skipping event at height {} in message {}: {}",
                            raw.height, raw.msg_cid.cid, e
                        );
                        self.count_skipped(e.error_type(), &mut outcome);
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some(m) = &self.metrics {
                m.fetch_windows.inc();
                m.events_received.inc_by(received);
            }
            covered_through = Some(to);
            window = window.advance();
        }

        outcome.records.sort_by_key(AllocationRecord::height);
        outcome.window_size = window.window_size;
        if let Some(m) = &self.metrics {
            m.records_fetched.inc_by(outcome.records.len() as u64);
        }
        info!(
            "[Fetcher] Fetched {} records from heights {}..={} ({} windows, {} shrinks, {} skipped)",
            outcome.records.len(),
            outcome.from_height,
            outcome.to_height,
            outcome.windows_queried,
            outcome.shrinks,
            outcome.events_skipped
        );
        Ok(outcome)
    }

    fn shrink(&self, window: FetchWindow, outcome: &mut FetchOutcome) -> SyncResult<FetchWindow> {
        let shrunk = window
            .shrink()
            .tap_err(|e| tracing::error!("[Fetcher] {}", e))?;
        outcome.shrinks += 1;
        if let Some(m) = &self.metrics {
            m.fetch_window_shrinks.inc();
            m.fetch_window_size.set(shrunk.window_size as i64);
        }
        debug!(
            "[Fetcher] Filter window too large, reducing to {}",
            shrunk.window_size
        );
        Ok(shrunk)
    }

    fn is_accepted(&self, event: &RawActorEvent, outcome: &mut FetchOutcome) -> bool {
        if event.reverted {
            debug!(
                "[Fetcher] Dropping reverted event at height {} in message {}",
                event.height, event.msg_cid.cid
            );
            self.count_skipped("reverted", outcome);
            return false;
        }
        if event.emitter != self.config.emitter {
            debug!(
                "[Fetcher] Dropping event from unexpected emitter {} at height {}",
                event.emitter, event.height
            );
            self.count_skipped("unexpected_emitter", outcome);
            return false;
        }
        true
    }

    fn count_skipped(&self, reason: &str, outcome: &mut FetchOutcome) {
        outcome.events_skipped += 1;
        if let Some(m) = &self.metrics {
            m.events_skipped.with_label_values(&[reason]).inc();
        }
    }

    async fn map_event(&self, raw: &RawActorEvent) -> SyncResult<Option<AllocationRecord>> {
        let decoded = decode_event(raw)?;
        let record = match decoded.typed()? {
            ActorEvent::Allocation(a) => AllocationRecord::Allocation(AllocationEntry {
                id: a.id,
                client_id: a.client,
                provider_id: a.provider,
                piece_cid: a.piece_cid,
                piece_size: a.piece_size,
                term_min: a.term_min,
                term_max: a.term_max,
                expiration: a.expiration,
                height: decoded.height,
            }),
            ActorEvent::VerifierBalance { verifier, .. } => {
                let message = self.lookup.decoded_message(&decoded.msg_cid).await?;
                AllocationRecord::VerifierBalance(VerifierBalanceEntry {
                    verifier_id: verifier,
                    client_address: message.address,
                    client_allowance: message.allowance,
                    msg_cid: decoded.msg_cid,
                    height: decoded.height,
                })
            }
            other => {
                debug!(
                    "[Fetcher] No record mapping for {} event at height {}",
                    other.event_type(),
                    decoded.height
                );
                return Ok(None);
            }
        };
        Ok(Some(record))
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = SyncResult<T>>,
) -> SyncResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = fut => result,
    }
}
