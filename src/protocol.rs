//! Sync protocol layer: the five stateless access patterns offline
//! clients use to obtain and refresh a local replica.
//!
//! 1. Bounded full dump (presence-filtered, capped).
//! 2. Chunked dump with cross-category offset bookkeeping.
//! 3. Timestamp-based incremental sync (at-least-once; clients dedup).
//! 4. ID-batch fetch within one category.
//! 5. Snapshot-file transfer (served by `server` from the live file; the
//!    metadata half lives in `snapshot::SnapshotBuilder::read_meta`).
//!
//! Every request recomputes its result from scratch; the cursor is held
//! entirely by the client. All list outputs order ascending by id within
//! a category, categories in the fixed `Category::ALL` order, which keeps
//! pages disjoint under a no-concurrent-write assumption.

use chrono::DateTime;
use serde::Serialize;
use tracing::warn;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{Category, NormalizedRecord};
use crate::registry::TenantHandle;
use crate::store;

/// Bounded full dump output.
#[derive(Debug, Serialize)]
pub struct DumpResult {
    pub total_records: i64,
    pub records: Vec<NormalizedRecord>,
}

/// One page of a chunked dump.
#[derive(Debug, Serialize)]
pub struct ChunkResult {
    pub records: Vec<NormalizedRecord>,
    pub offset: i64,
    pub limit: i64,
    pub total_records: i64,
    pub has_more: bool,
    pub next_offset: i64,
}

/// Incremental sync output.
#[derive(Debug, Serialize)]
pub struct IncrementalResult {
    pub since: String,
    pub count: usize,
    pub records: Vec<NormalizedRecord>,
}

/// Return the entire presence-filtered corpus, or fail with the true
/// count when it exceeds the configured cap so the client can switch to
/// a chunked strategy.
pub async fn full_dump(handle: &TenantHandle, sync: &SyncConfig) -> SyncResult<DumpResult> {
    let counts = presence_counts(handle).await;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();

    if total > sync.max_dump_records {
        return Err(SyncError::PayloadTooLarge {
            total,
            cap: sync.max_dump_records,
        });
    }

    let mut records = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
    for (category, count) in counts {
        let mut skip = 0i64;
        while skip < count {
            let batch =
                store::page_or_empty(&handle.pool, category, skip, sync.batch_size, true).await;
            if batch.is_empty() {
                break;
            }
            skip += batch.len() as i64;
            records.extend(batch);

            // Ad hoc throttle between large reads, not real backpressure.
            if skip < count && sync.batch_pause_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(sync.batch_pause_ms)).await;
            }
        }
    }

    Ok(DumpResult {
        total_records: total,
        records,
    })
}

/// Return one `(offset, limit)` page of the presence-filtered corpus,
/// walking categories in the fixed order.
pub async fn chunked_dump(
    handle: &TenantHandle,
    sync: &SyncConfig,
    offset: i64,
    limit: i64,
) -> SyncResult<ChunkResult> {
    if offset < 0 {
        return Err(SyncError::BadCursor(format!("negative offset: {offset}")));
    }
    if limit <= 0 {
        return Err(SyncError::BadCursor(format!("non-positive limit: {limit}")));
    }
    if limit > sync.max_chunk_limit {
        return Err(SyncError::BadCursor(format!(
            "limit {limit} exceeds maximum of {}",
            sync.max_chunk_limit
        )));
    }

    let counts = presence_counts(handle).await;
    let plan = plan_chunk(&counts, offset, limit);

    let mut records = Vec::new();
    for slice in &plan.slices {
        let batch =
            store::page_or_empty(&handle.pool, slice.category, slice.skip, slice.take, true).await;
        records.extend(batch);
    }

    let next_offset = offset + records.len() as i64;
    Ok(ChunkResult {
        has_more: next_offset < plan.total,
        next_offset,
        total_records: plan.total,
        records,
        offset,
        limit,
    })
}

/// Return every record touched at or after `since` (RFC 3339), across
/// all categories. The presence invariant is deliberately not applied
/// here; clients deduplicate on id. Bounded per call by the full-dump
/// cap and repeatable with an unchanged `since` for catch-up.
pub async fn incremental(
    handle: &TenantHandle,
    sync: &SyncConfig,
    since: &str,
) -> SyncResult<IncrementalResult> {
    let since_ts = DateTime::parse_from_rfc3339(since)
        .map_err(|e| SyncError::BadCursor(format!("unparseable since timestamp: {e}")))?
        .timestamp();

    let mut total = 0i64;
    for category in Category::ALL {
        total += match store::count_changed_since(&handle.pool, category, since_ts).await {
            Ok(n) => n,
            Err(err) => {
                warn!(category = %category, error = %err, "incremental count failed, treating as empty");
                0
            }
        };
    }

    if total > sync.max_dump_records {
        return Err(SyncError::PayloadTooLarge {
            total,
            cap: sync.max_dump_records,
        });
    }

    let mut records = Vec::new();
    for category in Category::ALL {
        match store::changed_since(&handle.pool, category, since_ts).await {
            Ok(batch) => records.extend(batch),
            Err(err) => {
                warn!(category = %category, error = %err, "incremental fetch failed, skipping category");
            }
        }
    }

    Ok(IncrementalResult {
        since: since.to_string(),
        count: records.len(),
        records,
    })
}

/// Fetch exactly the records matching an explicit id list within one
/// category. The presence invariant is not enforced here.
pub async fn batch_fetch(
    handle: &TenantHandle,
    category: Category,
    ids: &[String],
) -> SyncResult<Vec<NormalizedRecord>> {
    Ok(store::by_ids(&handle.pool, category, ids).await?)
}

async fn presence_counts(handle: &TenantHandle) -> Vec<(Category, i64)> {
    let mut counts = Vec::with_capacity(Category::ALL.len());
    for category in Category::ALL {
        counts.push((
            category,
            store::count_or_zero(&handle.pool, category, true).await,
        ));
    }
    counts
}

/// Per-category slice of a chunked dump page.
#[derive(Debug, PartialEq, Eq)]
struct CategorySlice {
    category: Category,
    skip: i64,
    take: i64,
}

#[derive(Debug)]
struct ChunkPlan {
    slices: Vec<CategorySlice>,
    total: i64,
}

/// Walk categories in their fixed order, maintaining a running
/// remainder: an offset larger than a category's count is subtracted and
/// carried into the next category; otherwise the page takes what it can
/// from this category and carries the remaining limit onward.
fn plan_chunk(counts: &[(Category, i64)], offset: i64, limit: i64) -> ChunkPlan {
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let mut slices = Vec::new();

    let mut remaining_offset = offset;
    let mut remaining_limit = limit;

    for &(category, count) in counts {
        if remaining_limit == 0 {
            break;
        }
        if remaining_offset >= count {
            remaining_offset -= count;
            continue;
        }

        let take = remaining_limit.min(count - remaining_offset);
        slices.push(CategorySlice {
            category,
            skip: remaining_offset,
            take,
        });
        remaining_limit -= take;
        remaining_offset = 0;
    }

    ChunkPlan { slices, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(two: i64, four: i64, com: i64) -> Vec<(Category, i64)> {
        vec![
            (Category::TwoWheeler, two),
            (Category::FourWheeler, four),
            (Category::Commercial, com),
        ]
    }

    #[test]
    fn first_page_stays_in_first_category() {
        // Tenant with 3 two-wheeler + 2 four-wheeler records.
        let plan = plan_chunk(&counts(3, 2, 0), 0, 3);
        assert_eq!(plan.total, 5);
        assert_eq!(
            plan.slices,
            vec![CategorySlice {
                category: Category::TwoWheeler,
                skip: 0,
                take: 3
            }]
        );
    }

    #[test]
    fn offset_carries_into_next_category() {
        let plan = plan_chunk(&counts(3, 2, 0), 3, 3);
        assert_eq!(
            plan.slices,
            vec![CategorySlice {
                category: Category::FourWheeler,
                skip: 0,
                take: 2
            }]
        );
    }

    #[test]
    fn page_spans_category_boundary() {
        let plan = plan_chunk(&counts(3, 2, 4), 2, 4);
        assert_eq!(
            plan.slices,
            vec![
                CategorySlice {
                    category: Category::TwoWheeler,
                    skip: 2,
                    take: 1
                },
                CategorySlice {
                    category: Category::FourWheeler,
                    skip: 0,
                    take: 2
                },
                CategorySlice {
                    category: Category::Commercial,
                    skip: 0,
                    take: 1
                },
            ]
        );
    }

    #[test]
    fn offset_past_end_yields_empty_plan() {
        let plan = plan_chunk(&counts(3, 2, 0), 10, 5);
        assert!(plan.slices.is_empty());
        assert_eq!(plan.total, 5);
    }

    #[test]
    fn empty_middle_category_is_skipped() {
        let plan = plan_chunk(&counts(2, 0, 3), 1, 3);
        assert_eq!(
            plan.slices,
            vec![
                CategorySlice {
                    category: Category::TwoWheeler,
                    skip: 1,
                    take: 1
                },
                CategorySlice {
                    category: Category::Commercial,
                    skip: 0,
                    take: 2
                },
            ]
        );
    }

    #[test]
    fn pages_cover_total_without_overlap() {
        let counts = counts(7, 5, 11);
        let total: i64 = 23;
        let limit = 4;

        let mut covered: Vec<(Category, i64)> = Vec::new();
        let mut offset = 0;
        while offset < total {
            let plan = plan_chunk(&counts, offset, limit);
            let mut page_len = 0;
            for slice in &plan.slices {
                for i in 0..slice.take {
                    covered.push((slice.category, slice.skip + i));
                }
                page_len += slice.take;
            }
            assert!(page_len <= limit);
            offset += page_len;
        }

        assert_eq!(covered.len(), total as usize);
        let mut dedup = covered.clone();
        dedup.sort_by_key(|(c, i)| (c.table(), *i));
        dedup.dedup();
        assert_eq!(dedup.len(), covered.len(), "pages must be disjoint");
    }
}
