// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Synchronizes DataCap built-in actor events from a Filecoin node into a
//! flat-file allocator registry, and keeps allocator multisig signers in
//! step with the chain.

pub mod allocators;
pub mod chain_syncer;
pub mod config;
pub mod encoding;
pub mod error;
pub mod events;
pub mod filfox_client;
pub mod lotus_client;
pub mod metrics;
pub mod multisig;
pub mod node;
pub mod reconcile;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use error::{SyncError, SyncResult};
