// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Adaptive query window over an inclusive height range.
//!
//! The window is a value: each transition consumes it and returns the next
//! state, so a fetch that fails mid-way leaves nothing behind.

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// First height of the next query
    pub cursor: u64,
    /// Heights added to `cursor` to form the query's upper bound
    pub window_size: u64,
    /// Last height to fetch
    pub upper: u64,
}

impl FetchWindow {
    pub fn new(lower: u64, upper: u64, window_size: u64) -> Self {
        Self {
            cursor: lower,
            window_size: window_size.max(1),
            upper,
        }
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.upper
    }

    /// Inclusive range of the next query.
    pub fn range(&self) -> (u64, u64) {
        (
            self.cursor,
            self.cursor.saturating_add(self.window_size).min(self.upper),
        )
    }

    /// Moves past an accepted query. The window size is kept.
    pub fn advance(self) -> Self {
        Self {
            cursor: self.cursor.saturating_add(self.window_size),
            ..self
        }
    }

    /// Halves the window (rounding up) after an overflowing query. The cursor
    /// stays put. A window of one height cannot shrink further.
    pub fn shrink(self) -> SyncResult<Self> {
        if self.window_size <= 1 {
            let (from, to) = self.range();
            return Err(SyncError::WindowExhausted { from, to });
        }
        Ok(Self {
            window_size: self.window_size.div_ceil(2),
            ..self
        })
    }
}
