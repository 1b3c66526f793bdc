//! End-to-end tests over a temporary data directory: tenant resolution,
//! ingest, the five sync access patterns, snapshot rebuilds, and search.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use fleet_sync::config::{Config, RegistryConfig, ServerConfig, StorageConfig, SyncConfig};
use fleet_sync::error::SyncError;
use fleet_sync::ingest::ingest_records;
use fleet_sync::models::{Category, NormalizedRecord};
use fleet_sync::protocol;
use fleet_sync::registry::TenantRegistry;
use fleet_sync::search::{search, SearchKind};
use fleet_sync::snapshot::SnapshotBuilder;

fn test_config(tmp: &TempDir) -> Config {
    Config {
        storage: StorageConfig {
            data_dir: tmp.path().join("data"),
        },
        registry: RegistryConfig::default(),
        sync: SyncConfig {
            max_dump_records: 100,
            max_chunk_limit: 50,
            batch_size: 4,
            batch_pause_ms: 0,
            search_limit: 50,
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            admin_token: None,
            production: false,
        },
    }
}

async fn setup(tmp: &TempDir) -> (Config, TenantRegistry) {
    let config = test_config(tmp);
    let registry = TenantRegistry::open(&config).await.unwrap();
    registry.add_tenant("acme", "Acme Motors").await.unwrap();
    (config, registry)
}

fn rec(id: &str, reg: &str, chassis: &str) -> NormalizedRecord {
    NormalizedRecord {
        id: id.to_string(),
        registration_number: reg.to_string(),
        chassis_number: chassis.to_string(),
        customer_name: format!("Customer {id}"),
        bank_name: "Test Bank".to_string(),
        ..NormalizedRecord::default()
    }
}

#[tokio::test]
async fn resolve_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let (_config, registry) = setup(&tmp).await;

    let first = registry.resolve("acme").await.unwrap();
    let second = registry.resolve("acme").await.unwrap();

    assert_eq!(first.namespace, "acme_motors");
    assert_eq!(first.namespace, second.namespace);
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn unknown_tenant_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let (_config, registry) = setup(&tmp).await;

    let err = registry.resolve("nobody").await.unwrap_err();
    assert!(matches!(err, SyncError::TenantNotFound(_)));
}

#[tokio::test]
async fn evicted_tenant_resolves_to_same_namespace() {
    let tmp = TempDir::new().unwrap();
    let (_config, registry) = setup(&tmp).await;

    let first = registry.resolve("acme").await.unwrap();
    registry.evict("acme").await;
    let second = registry.resolve("acme").await.unwrap();

    assert_eq!(first.namespace, second.namespace);
    assert!(!std::sync::Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn concurrent_first_resolutions_share_one_handle() {
    let tmp = TempDir::new().unwrap();
    let (_config, registry) = setup(&tmp).await;

    let (a, b) = tokio::join!(registry.resolve("acme"), registry.resolve("acme"));
    let a = a.unwrap();
    let b = b.unwrap();

    // Whichever resolution loses the race hands back the cached handle
    // and closes its own pool; both callers end up on the same one.
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert!(!a.pool.is_closed());
    let n = fleet_sync::store::count(&a.pool, Category::TwoWheeler, false).await.unwrap();
    assert_eq!(n, 0);
    let n = fleet_sync::store::count(&b.pool, Category::TwoWheeler, false).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn chunk_walk_crosses_categories() {
    let tmp = TempDir::new().unwrap();
    let (config, registry) = setup(&tmp).await;
    let handle = registry.resolve("acme").await.unwrap();

    let two: Vec<NormalizedRecord> = (1..=3).map(|i| rec(&format!("t{i}"), &format!("MH12AA000{i}"), "")).collect();
    let four: Vec<NormalizedRecord> = (1..=2).map(|i| rec(&format!("f{i}"), &format!("MH12BB000{i}"), "")).collect();
    ingest_records(&handle.pool, Category::TwoWheeler, &two).await.unwrap();
    ingest_records(&handle.pool, Category::FourWheeler, &four).await.unwrap();

    let page1 = protocol::chunked_dump(&handle, &config.sync, 0, 3).await.unwrap();
    assert_eq!(page1.records.len(), 3);
    assert!(page1.records.iter().all(|r| r.category == "two_wheeler"));
    assert!(page1.has_more);
    assert_eq!(page1.next_offset, 3);
    assert_eq!(page1.total_records, 5);

    let page2 = protocol::chunked_dump(&handle, &config.sync, 3, 3).await.unwrap();
    assert_eq!(page2.records.len(), 2);
    assert!(page2.records.iter().all(|r| r.category == "four_wheeler"));
    assert!(!page2.has_more);
    assert_eq!(page2.next_offset, 5);
}

#[tokio::test]
async fn chunk_pages_union_equals_full_dump() {
    let tmp = TempDir::new().unwrap();
    let (config, registry) = setup(&tmp).await;
    let handle = registry.resolve("acme").await.unwrap();

    let two: Vec<NormalizedRecord> = (1..=5).map(|i| rec(&format!("t{i}"), &format!("MH01AA{i:04}"), "")).collect();
    let four: Vec<NormalizedRecord> = (1..=3).map(|i| rec(&format!("f{i}"), "", &format!("CHASSIS{i:05}"))).collect();
    let com: Vec<NormalizedRecord> = (1..=4).map(|i| rec(&format!("c{i}"), &format!("MH02CC{i:04}"), "")).collect();
    // Lacks both identifiers; must never appear in dump output.
    let ghost = vec![rec("ghost", "", "")];

    ingest_records(&handle.pool, Category::TwoWheeler, &two).await.unwrap();
    ingest_records(&handle.pool, Category::FourWheeler, &four).await.unwrap();
    ingest_records(&handle.pool, Category::Commercial, &com).await.unwrap();
    ingest_records(&handle.pool, Category::Commercial, &ghost).await.unwrap();

    let dump = protocol::full_dump(&handle, &config.sync).await.unwrap();
    assert_eq!(dump.total_records, 12);
    assert!(dump.records.iter().all(|r| r.id != "ghost"));

    let mut paged_ids = Vec::new();
    let mut offset = 0;
    loop {
        let page = protocol::chunked_dump(&handle, &config.sync, offset, 2).await.unwrap();
        paged_ids.extend(page.records.iter().map(|r| r.id.clone()));
        if !page.has_more {
            break;
        }
        offset = page.next_offset;
    }

    let mut dump_ids: Vec<String> = dump.records.iter().map(|r| r.id.clone()).collect();
    let mut union = paged_ids.clone();
    dump_ids.sort();
    union.sort();
    assert_eq!(union, dump_ids);

    let unique: std::collections::HashSet<&String> = paged_ids.iter().collect();
    assert_eq!(unique.len(), paged_ids.len(), "pages must be disjoint");
}

#[tokio::test]
async fn full_dump_over_cap_reports_true_total() {
    let tmp = TempDir::new().unwrap();
    let (mut config, registry) = setup(&tmp).await;
    config.sync.max_dump_records = 3;
    let handle = registry.resolve("acme").await.unwrap();

    let records: Vec<NormalizedRecord> = (1..=5).map(|i| rec(&format!("r{i}"), &format!("KA01AB{i:04}"), "")).collect();
    ingest_records(&handle.pool, Category::TwoWheeler, &records).await.unwrap();

    let err = protocol::full_dump(&handle, &config.sync).await.unwrap_err();
    match err {
        SyncError::PayloadTooLarge { total, cap } => {
            assert_eq!(total, 5);
            assert_eq!(cap, 3);
        }
        other => panic!("expected PayloadTooLarge, got: {other}"),
    }
}

#[tokio::test]
async fn incremental_over_cap_reports_true_total() {
    let tmp = TempDir::new().unwrap();
    let (mut config, registry) = setup(&tmp).await;
    config.sync.max_dump_records = 3;
    let handle = registry.resolve("acme").await.unwrap();

    // Five touched records, ghost included: the delta cap counts every
    // changed record, not just identified ones.
    let records: Vec<NormalizedRecord> = (1..=4).map(|i| rec(&format!("r{i}"), &format!("KA01AB{i:04}"), "")).collect();
    ingest_records(&handle.pool, Category::TwoWheeler, &records).await.unwrap();
    ingest_records(&handle.pool, Category::FourWheeler, &[rec("ghost", "", "")]).await.unwrap();

    let err = protocol::incremental(&handle, &config.sync, "1970-01-01T00:00:00Z").await.unwrap_err();
    match err {
        SyncError::PayloadTooLarge { total, cap } => {
            assert_eq!(total, 5);
            assert_eq!(cap, 3);
        }
        other => panic!("expected PayloadTooLarge, got: {other}"),
    }

    // Under a sufficient cap the same window succeeds.
    config.sync.max_dump_records = 5;
    let delta = protocol::incremental(&handle, &config.sync, "1970-01-01T00:00:00Z").await.unwrap();
    assert_eq!(delta.count, 5);
}

#[tokio::test]
async fn bad_cursors_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let (config, registry) = setup(&tmp).await;
    let handle = registry.resolve("acme").await.unwrap();

    for (offset, limit) in [(-1, 5), (0, 0), (0, config.sync.max_chunk_limit + 1)] {
        let err = protocol::chunked_dump(&handle, &config.sync, offset, limit).await.unwrap_err();
        assert!(matches!(err, SyncError::BadCursor(_)), "offset={offset} limit={limit}");
    }

    let err = protocol::incremental(&handle, &config.sync, "not-a-timestamp").await.unwrap_err();
    assert!(matches!(err, SyncError::BadCursor(_)));
}

#[tokio::test]
async fn incremental_ignores_presence_invariant_and_is_monotonic() {
    let tmp = TempDir::new().unwrap();
    let (config, registry) = setup(&tmp).await;
    let handle = registry.resolve("acme").await.unwrap();

    let records = vec![rec("a1", "MH12AB1234", ""), rec("ghost", "", "")];
    ingest_records(&handle.pool, Category::TwoWheeler, &records).await.unwrap();

    // Epoch since returns everything ever touched, ghost included.
    let delta = protocol::incremental(&handle, &config.sync, "1970-01-01T00:00:00Z").await.unwrap();
    assert_eq!(delta.count, 2);
    assert!(delta.records.iter().any(|r| r.id == "ghost"));

    // A since before the upload still includes both records.
    let before = (Utc::now() - chrono::Duration::seconds(60)).to_rfc3339();
    let delta = protocol::incremental(&handle, &config.sync, &before).await.unwrap();
    assert_eq!(delta.count, 2);

    // A since after the last touch excludes them.
    let after = (Utc::now() + chrono::Duration::seconds(60)).to_rfc3339();
    let delta = protocol::incremental(&handle, &config.sync, &after).await.unwrap();
    assert_eq!(delta.count, 0);
}

#[tokio::test]
async fn batch_fetch_returns_unidentified_records() {
    let tmp = TempDir::new().unwrap();
    let (config, registry) = setup(&tmp).await;
    let handle = registry.resolve("acme").await.unwrap();

    let records = vec![rec("a1", "MH12AB1234", ""), rec("ghost", "", "")];
    ingest_records(&handle.pool, Category::FourWheeler, &records).await.unwrap();

    let fetched = protocol::batch_fetch(
        &handle,
        Category::FourWheeler,
        &["ghost".to_string(), "missing".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].id, "ghost");

    // But the ghost never shows up in a dump.
    let dump = protocol::full_dump(&handle, &config.sync).await.unwrap();
    assert!(dump.records.iter().all(|r| r.id != "ghost"));
}

#[tokio::test]
async fn snapshot_build_filters_and_replaces_atomically() {
    let tmp = TempDir::new().unwrap();
    let (config, registry) = setup(&tmp).await;
    let handle = registry.resolve("acme").await.unwrap();

    let two: Vec<NormalizedRecord> = (1..=6).map(|i| rec(&format!("t{i}"), &format!("MH12AA{i:04}"), "")).collect();
    let ghosts = vec![rec("g1", "", ""), rec("g2", " ", "")];
    ingest_records(&handle.pool, Category::TwoWheeler, &two).await.unwrap();
    ingest_records(&handle.pool, Category::Commercial, &ghosts).await.unwrap();

    let builder = SnapshotBuilder::new(&config).unwrap();
    let meta = builder.build(&handle).await.unwrap();

    let live = builder.snapshot_path(&handle);
    assert!(live.exists());
    assert!(!live.with_extension("sqlite.tmp").exists());
    // The sidecar is staged and renamed too; no temp sidecar survives.
    let tenant_dir = live.parent().unwrap();
    assert!(tenant_dir.join("meta.json").exists());
    assert!(!tenant_dir.join("meta.json.tmp").exists());

    // Sidecar agrees with the file on disk.
    assert_eq!(meta.size_bytes, std::fs::metadata(&live).unwrap().len());
    let mut hasher = Sha256::new();
    std::io::copy(&mut std::fs::File::open(&live).unwrap(), &mut hasher).unwrap();
    assert_eq!(meta.checksum, format!("{:x}", hasher.finalize()));

    // Row count equals the number of records passing the presence
    // invariant.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite:{}", live.display()))
        .await
        .unwrap();
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 6);
    let hits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles WHERE reg_last4 = '0003'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(hits, 1);
    pool.close().await;

    // A second build replaces the file wholesale with a newer version.
    let more = vec![rec("t7", "MH12AA0007", "")];
    ingest_records(&handle.pool, Category::TwoWheeler, &more).await.unwrap();
    let meta2 = builder.build(&handle).await.unwrap();
    assert!(meta2.version >= meta.version);
    assert_ne!(meta2.checksum, meta.checksum);

    let reread = builder.read_meta(&handle).unwrap().unwrap();
    assert_eq!(reread.checksum, meta2.checksum);
}

#[tokio::test]
async fn search_finds_partial_plate_and_escapes_patterns() {
    let tmp = TempDir::new().unwrap();
    let (config, registry) = setup(&tmp).await;
    let handle = registry.resolve("acme").await.unwrap();

    let records = vec![
        rec("a1", "MH12AB1234", ""),
        rec("a2", "MH14ZZ9999", ""),
        rec("a3", "", "MBLHA10EY9HJ52431"),
    ];
    ingest_records(&handle.pool, Category::TwoWheeler, &records).await.unwrap();
    // Same plate suffix in another category; both must be found.
    let com = vec![rec("c1", "KA05MN1234", "")];
    ingest_records(&handle.pool, Category::Commercial, &com).await.unwrap();

    let hits = search(&handle, &config.sync, "1234", SearchKind::Reg).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|r| r.id.as_str()).collect();
    assert!(ids.contains(&"a1"));
    assert!(ids.contains(&"c1"));
    assert_eq!(hits.len(), 2);

    let hits = search(&handle, &config.sync, "HA10EY", SearchKind::Chassis).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "a3");

    // LIKE metacharacters are matched literally, not as wildcards.
    let hits = search(&handle, &config.sync, "%", SearchKind::Any).await.unwrap();
    assert!(hits.is_empty());

    let err = search(&handle, &config.sync, "   ", SearchKind::Any).await.unwrap_err();
    assert!(matches!(err, SyncError::BadCursor(_)));
}

#[tokio::test]
async fn search_results_are_sorted_and_capped() {
    let tmp = TempDir::new().unwrap();
    let (mut config, registry) = setup(&tmp).await;
    config.sync.search_limit = 3;
    let handle = registry.resolve("acme").await.unwrap();

    let records: Vec<NormalizedRecord> = (1..=5)
        .map(|i| rec(&format!("r{i}"), &format!("MH{}AB7777", 20 - i), ""))
        .collect();
    ingest_records(&handle.pool, Category::TwoWheeler, &records).await.unwrap();

    let hits = search(&handle, &config.sync, "7777", SearchKind::Reg).await.unwrap();
    assert_eq!(hits.len(), 3);
    let plates: Vec<String> = hits.iter().map(|r| r.registration_number.to_lowercase()).collect();
    let mut sorted = plates.clone();
    sorted.sort();
    assert_eq!(plates, sorted);
}

#[tokio::test]
async fn upsert_updates_existing_records() {
    let tmp = TempDir::new().unwrap();
    let (config, registry) = setup(&tmp).await;
    let handle = registry.resolve("acme").await.unwrap();

    let original = vec![rec("a1", "MH12AB1234", "")];
    ingest_records(&handle.pool, Category::TwoWheeler, &original).await.unwrap();

    let mut updated = rec("a1", "MH12AB1234", "");
    updated.status = "repossessed".to_string();
    ingest_records(&handle.pool, Category::TwoWheeler, &[updated]).await.unwrap();

    let dump = protocol::full_dump(&handle, &config.sync).await.unwrap();
    assert_eq!(dump.total_records, 1);
    assert_eq!(dump.records[0].status, "repossessed");
}
