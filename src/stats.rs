//! Per-tenant statistics and health overview.
//!
//! Quick summary of what a tenant holds: per-category record counts,
//! how many records satisfy the dump/snapshot presence invariant, and
//! the current snapshot metadata. Used by `fleetsync stats` to confirm
//! that ingests and rebuilds are doing what was expected.

use anyhow::Result;

use crate::models::Category;
use crate::registry::TenantRegistry;
use crate::snapshot::SnapshotBuilder;
use crate::store;

/// Run the stats command: query the tenant namespace and print a summary.
pub async fn run_stats(
    registry: &TenantRegistry,
    builder: Option<&SnapshotBuilder>,
    tenant_ref: &str,
) -> Result<()> {
    let handle = registry.resolve(tenant_ref).await?;

    println!("tenant: {} (namespace: {})", tenant_ref, handle.namespace);
    println!("{:<16} {:>10} {:>12}", "CATEGORY", "RECORDS", "IDENTIFIED");

    let mut total = 0i64;
    let mut total_present = 0i64;
    for category in Category::ALL {
        let count = store::count_or_zero(&handle.pool, category, false).await;
        let present = store::count_or_zero(&handle.pool, category, true).await;
        total += count;
        total_present += present;
        println!("{:<16} {:>10} {:>12}", category.table(), count, present);
    }
    println!("{:<16} {:>10} {:>12}", "total", total, total_present);

    match builder {
        Some(builder) => match builder.read_meta(&handle)? {
            Some(meta) => {
                println!();
                println!("snapshot:");
                println!("  version:    {}", meta.version);
                println!("  size_bytes: {}", meta.size_bytes);
                println!("  checksum:   {}", meta.checksum);
                println!("  updated_at: {}", meta.updated_at.to_rfc3339());
            }
            None => println!("\nsnapshot: none built yet"),
        },
        None => println!("\nsnapshot: engine unavailable"),
    }

    Ok(())
}
