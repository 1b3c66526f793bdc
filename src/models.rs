//! Core data models used throughout FleetSync.
//!
//! These types represent the vehicle categories, the canonical normalized
//! record shape, and the snapshot metadata that flow through the storage
//! and synchronization layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the three fixed vehicle classes, each backed by its own table
/// in the tenant namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    TwoWheeler,
    FourWheeler,
    Commercial,
}

impl Category {
    /// All categories in the fixed iteration order.
    ///
    /// The order is load-bearing: chunked dumps compute cross-category
    /// offsets by walking categories in exactly this sequence.
    pub const ALL: [Category; 3] = [
        Category::TwoWheeler,
        Category::FourWheeler,
        Category::Commercial,
    ];

    /// Name of the backing table inside a tenant namespace.
    pub fn table(self) -> &'static str {
        match self {
            Category::TwoWheeler => "two_wheeler",
            Category::FourWheeler => "four_wheeler",
            Category::Commercial => "commercial",
        }
    }

    /// Parse a category selector as it appears in requests and the CLI.
    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "two_wheeler" => Some(Category::TwoWheeler),
            "four_wheeler" => Some(Category::FourWheeler),
            "commercial" => Some(Category::Commercial),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// The canonical record shape derived from heterogeneous source documents.
///
/// Every field carries a safe default (empty string / zero) so downstream
/// consumers never branch on absence. A record qualifies for dump and
/// snapshot output only if [`has_identifier`](Self::has_identifier) holds;
/// ID-batch fetch and incremental sync return records regardless.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub registration_number: String,
    #[serde(default)]
    pub reg_last4: String,
    #[serde(default)]
    pub chassis_number: String,
    #[serde(default)]
    pub agreement_number: String,
    #[serde(default)]
    pub bank_name: String,
    #[serde(default)]
    pub vehicle_make: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub engine_number: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub status: String,
    /// Commercial vehicles only; empty for other categories.
    #[serde(default)]
    pub permit_number: String,
    /// Commercial vehicles only; empty for other categories.
    #[serde(default)]
    pub load_capacity: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub uploaded_at: i64,
}

impl NormalizedRecord {
    /// Presence invariant: at least one of registration or chassis number
    /// must be non-empty for the record to appear in dumps and snapshots.
    pub fn has_identifier(&self) -> bool {
        !self.registration_number.trim().is_empty() || !self.chassis_number.trim().is_empty()
    }

    /// Last four characters of the registration number, used by the
    /// partial-plate search fast path.
    pub fn registration_last4(&self) -> String {
        let reg = self.registration_number.trim();
        let chars: Vec<char> = reg.chars().collect();
        if chars.len() <= 4 {
            reg.to_string()
        } else {
            chars[chars.len() - 4..].iter().collect()
        }
    }
}

/// Metadata describing the current live snapshot file for a tenant.
///
/// Persisted as a sidecar `meta.json` next to the snapshot file and
/// replaced wholesale on each successful rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub tenant_ref: String,
    /// Hex-encoded SHA-256 of the snapshot file contents.
    pub checksum: String,
    pub size_bytes: u64,
    /// Monotonic version: epoch milliseconds at build completion.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}
