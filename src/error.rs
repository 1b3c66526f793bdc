//! Engine error taxonomy.
//!
//! Tenant-resolution and authorization failures abort a request outright;
//! category-level failures inside multi-category aggregation are soft —
//! they are logged at the call site and the category contributes zero
//! records (see `store` and `protocol`).

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the storage routing and sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The tenant reference is not registered.
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// The tenant storage connection did not report ready in time.
    #[error("storage connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// The requested corpus exceeds the per-call record cap. Carries the
    /// true total so the client can switch to a chunked strategy.
    #[error("payload too large: {total} records exceeds cap of {cap}")]
    PayloadTooLarge { total: i64, cap: i64 },

    /// The client-supplied cursor (offset/limit/since) is invalid.
    #[error("bad cursor: {0}")]
    BadCursor(String),

    /// Admin credential missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// The embedded snapshot engine failed its startup probe.
    #[error("snapshot engine unavailable")]
    EngineUnavailable,

    /// Snapshot rebuild failed; the previous live file remains servable.
    #[error("snapshot build failed: {0}")]
    BuildFailure(String),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used across the engine modules.
pub type SyncResult<T> = Result<T, SyncError>;
