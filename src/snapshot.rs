//! Snapshot builder.
//!
//! Rebuilds a tenant's portable read-optimized snapshot: a single SQLite
//! file holding the normalized, presence-filtered corpus with the
//! secondary indexes the mobile partial-plate lookup depends on. Builds
//! write to a temporary path and atomically rename over the live file, so
//! concurrent readers always observe either the fully previous or fully
//! new snapshot, never a torn one. A per-tenant lock makes builds
//! at-most-one-in-flight.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::models::{Category, SnapshotMeta};
use crate::registry::{TenantHandle, TenantRegistry};
use crate::store;

/// Live snapshot file name inside a tenant directory.
pub const SNAPSHOT_FILE: &str = "snapshot.sqlite";
/// Transient build target, only present while a rebuild is running.
const SNAPSHOT_TMP_FILE: &str = "snapshot.sqlite.tmp";
/// Sidecar metadata file describing the live snapshot.
pub const META_FILE: &str = "meta.json";
/// Transient sidecar build target, renamed over [`META_FILE`].
const META_TMP_FILE: &str = "meta.json.tmp";

/// Builds and replaces per-tenant snapshot files.
pub struct SnapshotBuilder {
    data_dir: PathBuf,
    batch_size: i64,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SnapshotBuilder {
    /// Construct the builder, probing that the data directory is
    /// writable. A failed probe means the embedded-file engine is
    /// unavailable; the caller runs without a builder and admin rebuilds
    /// report [`SyncError::EngineUnavailable`].
    pub fn new(config: &Config) -> SyncResult<Self> {
        let data_dir = config.storage.data_dir.clone();
        std::fs::create_dir_all(&data_dir)?;

        let probe = data_dir.join(".snapshot-probe");
        std::fs::write(&probe, b"ok")?;
        std::fs::remove_file(&probe)?;

        Ok(Self {
            data_dir,
            batch_size: config.sync.batch_size,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the live snapshot file for a tenant.
    pub fn snapshot_path(&self, handle: &TenantHandle) -> PathBuf {
        self.data_dir.join(&handle.namespace).join(SNAPSHOT_FILE)
    }

    /// Read the sidecar metadata for a tenant's live snapshot, if one has
    /// ever been built.
    pub fn read_meta(&self, handle: &TenantHandle) -> SyncResult<Option<SnapshotMeta>> {
        let path = self.data_dir.join(&handle.namespace).join(META_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let meta = serde_json::from_str(&content)
            .map_err(|e| SyncError::BuildFailure(format!("corrupt snapshot metadata: {e}")))?;
        Ok(Some(meta))
    }

    /// Rebuild the snapshot for a tenant, waiting if a build is already
    /// in flight.
    ///
    /// On success the live file and sidecar metadata are replaced
    /// wholesale. On failure the temporary artifact is deleted and the
    /// previous live file remains fully servable.
    pub async fn build(&self, handle: &TenantHandle) -> SyncResult<SnapshotMeta> {
        let lock = self.lock_for(&handle.namespace);
        let _guard = lock.lock().await;
        self.build_locked(handle).await
    }

    /// Fire-and-forget rebuild used after a successful ingest. If a build
    /// for this tenant is already in flight the trigger is skipped;
    /// failures are logged and never surfaced to the ingest caller.
    pub fn trigger(self: Arc<Self>, registry: Arc<TenantRegistry>, tenant_ref: String) {
        let builder = self;
        tokio::spawn(async move {
            let handle = match registry.resolve(&tenant_ref).await {
                Ok(handle) => handle,
                Err(err) => {
                    error!(tenant = %tenant_ref, error = %err, "snapshot trigger: resolve failed");
                    return;
                }
            };

            let lock = builder.lock_for(&handle.namespace);
            let guard = match lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    warn!(tenant = %tenant_ref, "snapshot build already in flight, skipping trigger");
                    return;
                }
            };

            match builder.build_locked(&handle).await {
                Ok(meta) => {
                    info!(tenant = %tenant_ref, version = meta.version, size_bytes = meta.size_bytes,
                          "background snapshot build complete");
                }
                Err(err) => {
                    error!(tenant = %tenant_ref, error = %err, "background snapshot build failed");
                }
            }
            drop(guard);
        });
    }

    fn lock_for(&self, namespace: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn build_locked(&self, handle: &TenantHandle) -> SyncResult<SnapshotMeta> {
        let tenant_dir = self.data_dir.join(&handle.namespace);
        std::fs::create_dir_all(&tenant_dir)?;

        let tmp_path = tenant_dir.join(SNAPSHOT_TMP_FILE);
        let live_path = tenant_dir.join(SNAPSHOT_FILE);

        // Stale temp files from a crashed build are discarded up front.
        if tmp_path.exists() {
            std::fs::remove_file(&tmp_path)?;
        }
        let stale_meta_tmp = tenant_dir.join(META_TMP_FILE);
        if stale_meta_tmp.exists() {
            std::fs::remove_file(&stale_meta_tmp)?;
        }

        if let Err(err) = self.populate(handle, &tmp_path).await {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(SyncError::BuildFailure(err.to_string()));
        }

        // Checksum and size come from the finished temp file, and the
        // sidecar is staged before the live file moves, so a failure
        // anywhere in here leaves the previous snapshot and its sidecar
        // untouched.
        let result = self.describe_and_stage(handle, &tenant_dir, &tmp_path);
        let (meta, meta_tmp_path) = match result {
            Ok(staged) => staged,
            Err(err) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(err);
            }
        };

        // Atomic replace: rename, not copy-then-delete, so there is no
        // window where no valid snapshot exists. The sidecar rename
        // follows immediately; both are atomic, so readers see either
        // the old pair or the new file with its matching sidecar.
        std::fs::rename(&tmp_path, &live_path)?;
        std::fs::rename(&meta_tmp_path, tenant_dir.join(META_FILE))?;

        Ok(meta)
    }

    fn describe_and_stage(
        &self,
        handle: &TenantHandle,
        tenant_dir: &Path,
        tmp_path: &Path,
    ) -> SyncResult<(SnapshotMeta, PathBuf)> {
        let checksum = file_checksum(tmp_path)?;
        let size_bytes = std::fs::metadata(tmp_path)?.len();
        let now = Utc::now();

        let meta = SnapshotMeta {
            tenant_ref: handle.tenant_ref.clone(),
            checksum,
            size_bytes,
            version: now.timestamp_millis(),
            updated_at: now,
        };

        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| SyncError::BuildFailure(e.to_string()))?;
        let meta_tmp_path = tenant_dir.join(META_TMP_FILE);
        std::fs::write(&meta_tmp_path, meta_json)?;

        Ok((meta, meta_tmp_path))
    }

    /// Stream the tenant corpus into the temp file: all categories in the
    /// fixed order, batched reads, presence-filtered upserts by id.
    async fn populate(&self, handle: &TenantHandle, tmp_path: &Path) -> SyncResult<()> {
        let pool = open_snapshot_pool(tmp_path).await?;

        let result = self.populate_into(handle, &pool).await;
        if result.is_ok() {
            // Storage-level compaction before the file goes live.
            sqlx::query("VACUUM").execute(&pool).await?;
        }
        pool.close().await;
        result
    }

    async fn populate_into(&self, handle: &TenantHandle, pool: &SqlitePool) -> SyncResult<()> {
        create_snapshot_schema(pool).await?;

        let mut written: u64 = 0;
        for category in Category::ALL {
            // A failing category is logged inside the soft store calls
            // and contributes nothing; the build carries on.
            let total = store::count_or_zero(&handle.pool, category, false).await;

            let mut skip = 0i64;
            while skip < total {
                let batch = store::page_or_empty(
                    &handle.pool,
                    category,
                    skip,
                    self.batch_size,
                    false,
                )
                .await;
                if batch.is_empty() {
                    break;
                }
                skip += batch.len() as i64;

                let mut tx = pool.begin().await?;
                for record in &batch {
                    if !record.has_identifier() {
                        continue;
                    }
                    sqlx::query(
                        r#"
                        INSERT INTO vehicles (id, category, registration_number, reg_last4,
                            chassis_number, chassis_lower, agreement_number, bank_name,
                            vehicle_make, customer_name, address, engine_number, branch,
                            status, permit_number, load_capacity, updated_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(id) DO UPDATE SET
                            category = excluded.category,
                            registration_number = excluded.registration_number,
                            reg_last4 = excluded.reg_last4,
                            chassis_number = excluded.chassis_number,
                            chassis_lower = excluded.chassis_lower,
                            agreement_number = excluded.agreement_number,
                            bank_name = excluded.bank_name,
                            vehicle_make = excluded.vehicle_make,
                            customer_name = excluded.customer_name,
                            address = excluded.address,
                            engine_number = excluded.engine_number,
                            branch = excluded.branch,
                            status = excluded.status,
                            permit_number = excluded.permit_number,
                            load_capacity = excluded.load_capacity,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(&record.id)
                    .bind(&record.category)
                    .bind(&record.registration_number)
                    .bind(record.registration_last4())
                    .bind(&record.chassis_number)
                    .bind(record.chassis_number.to_lowercase())
                    .bind(&record.agreement_number)
                    .bind(&record.bank_name)
                    .bind(&record.vehicle_make)
                    .bind(&record.customer_name)
                    .bind(&record.address)
                    .bind(&record.engine_number)
                    .bind(&record.branch)
                    .bind(&record.status)
                    .bind(&record.permit_number)
                    .bind(&record.load_capacity)
                    .bind(record.updated_at)
                    .execute(&mut *tx)
                    .await?;
                    written += 1;
                }
                tx.commit().await?;
            }
        }

        info!(tenant = %handle.tenant_ref, rows = written, "snapshot populated");
        Ok(())
    }
}

/// Flat, read-optimized schema. The five secondary indexes back the
/// dominant mobile query pattern: partial plate lookup.
async fn create_snapshot_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicles (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            registration_number TEXT NOT NULL,
            reg_last4 TEXT NOT NULL,
            chassis_number TEXT NOT NULL,
            chassis_lower TEXT NOT NULL,
            agreement_number TEXT NOT NULL,
            bank_name TEXT NOT NULL DEFAULT '',
            vehicle_make TEXT NOT NULL DEFAULT '',
            customer_name TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            engine_number TEXT NOT NULL DEFAULT '',
            branch TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT '',
            permit_number TEXT NOT NULL DEFAULT '',
            load_capacity TEXT NOT NULL DEFAULT '',
            updated_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    for column in [
        "reg_last4",
        "chassis_lower",
        "registration_number",
        "chassis_number",
        "agreement_number",
    ] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_vehicles_{column} ON vehicles({column})"
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn open_snapshot_pool(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Rollback journal rather than WAL: the build target must stay a
    // single file so the rename-over-live swap is atomic.
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Delete);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

fn file_checksum(path: &Path) -> Result<String, std::io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
