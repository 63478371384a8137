// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Chain Syncer Module
//!
//! Pulls built-in actor events out of a chain node over an inclusive height
//! range and turns them into [`AllocationRecord`](crate::types::AllocationRecord)s.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      EventFetcher                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//! │  │ FetchWindow  │──▶│ EventDecoder │──▶│ record map   │  │
//! │  │ - halve/keep │   │ - CBOR       │   │ - msg lookup │  │
//! │  └──────────────┘   └──────────────┘   └──────────────┘  │
//! │  Output: FetchOutcome (records ascending by height)      │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod fetcher;
pub mod window;

pub use config::{FetchConfig, EPOCHS_PER_DAY};
pub use fetcher::{EventFetcher, FetchOutcome, FetchRequest};
pub use window::FetchWindow;
