//! # FleetSync
//!
//! A multi-tenant vehicle-record storage routing and data-synchronization
//! engine. Each tenant gets an isolated SQLite namespace; heterogeneous
//! vehicle categories are normalized into one canonical record shape; a
//! compact read-optimized snapshot file is rebuilt per tenant for offline
//! clients; and five stateless sync access patterns are served over HTTP.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │   Ingest     │──▶│ Record Store  │──▶│   Snapshot    │
//! │  (external)  │   │  per tenant   │   │    Builder    │
//! └──────────────┘   └──────┬────────┘   └──────┬────────┘
//!                           │                   │
//!                   ┌───────┴────────┐   ┌──────┴────────┐
//!                   │ Sync Protocol  │   │ snapshot file │
//!                   │ dump/chunk/Δ   │   │  + meta.json  │
//!                   └───────┬────────┘   └──────┬────────┘
//!                           ▼                   ▼
//!                     ┌──────────┐       ┌──────────┐
//!                     │   CLI    │       │   HTTP   │
//!                     └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Categories, normalized records, snapshot metadata |
//! | [`error`] | Engine error taxonomy |
//! | [`registry`] | Tenant → namespace resolution and handle cache |
//! | [`migrate`] | Registry and per-tenant schema creation |
//! | [`store`] | Normalized per-category record access |
//! | [`ingest`] | Validated record upserts |
//! | [`snapshot`] | Snapshot rebuild with atomic replace |
//! | [`protocol`] | The five sync access patterns |
//! | [`search`] | Partial-plate and substring lookup |
//! | [`server`] | HTTP sync API |
//! | [`stats`] | Per-tenant operational summary |

pub mod config;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod search;
pub mod server;
pub mod snapshot;
pub mod stats;
pub mod store;
