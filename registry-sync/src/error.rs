// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the sync core.
///
/// Decode-time errors (`MalformedEvent`, `DuplicateField`) are scoped to a
/// single event; the fetcher skips the event and keeps its window.
/// `ResponseTooLarge` is absorbed by window halving. Everything else reaches
/// the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("duplicate field {0} in event")]
    DuplicateField(String),

    #[error("response too large: {0}")]
    ResponseTooLarge(String),

    #[error("filter window exhausted at heights {from}..={to}: event density exceeds what a single block window can return")]
    WindowExhausted { from: u64, to: u64 },

    #[error("failed to resolve signer {signer}: {reason}")]
    SignerResolutionFailed { signer: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    /// Short, stable label for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            SyncError::MalformedEvent(_) => "malformed_event",
            SyncError::DuplicateField(_) => "duplicate_field",
            SyncError::ResponseTooLarge(_) => "response_too_large",
            SyncError::WindowExhausted { .. } => "window_exhausted",
            SyncError::SignerResolutionFailed { .. } => "signer_resolution_failed",
            SyncError::Transport(_) => "transport",
            SyncError::Rpc { .. } => "rpc",
            SyncError::InvalidResponse(_) => "invalid_response",
            SyncError::Store(_) => "store",
            SyncError::Config(_) => "config",
            SyncError::Cancelled => "cancelled",
        }
    }

    /// Whether re-running the same pass later may succeed without operator action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Rpc { .. }
                | SyncError::ResponseTooLarge(_)
                | SyncError::InvalidResponse(_)
                | SyncError::Store(_)
                | SyncError::Cancelled
        )
    }

    /// Whether the error is scoped to a single event.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            SyncError::MalformedEvent(_) | SyncError::DuplicateField(_)
        )
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
