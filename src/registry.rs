//! Tenant registry and connection router.
//!
//! Maps a tenant reference to an isolated storage namespace and hands out
//! a shared [`TenantHandle`] carrying the namespace's connection pool.
//! Handles are created lazily on first resolution, cached for the process
//! lifetime, and shared by every request for that tenant. The registry is
//! an explicitly constructed, dependency-injected service — there is no
//! process-global state.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::migrate;

/// Shared, read-mostly handle to one tenant's storage namespace.
#[derive(Debug)]
pub struct TenantHandle {
    pub tenant_ref: String,
    pub namespace: String,
    pub pool: SqlitePool,
    pub created_at: DateTime<Utc>,
}

impl TenantHandle {
    /// Directory holding this tenant's record database and snapshot files.
    pub fn dir(&self, data_dir: &std::path::Path) -> PathBuf {
        data_dir.join(&self.namespace)
    }
}

/// A registered tenant as listed in the master registry database.
#[derive(Debug, Clone)]
pub struct TenantEntry {
    pub tenant_ref: String,
    pub display_name: String,
    pub created_at: i64,
}

/// Tenant registry / connection router.
pub struct TenantRegistry {
    data_dir: PathBuf,
    connect_timeout: Duration,
    master: SqlitePool,
    handles: RwLock<HashMap<String, Arc<TenantHandle>>>,
}

impl TenantRegistry {
    /// Open the master registry database under the configured data dir
    /// and run its migrations.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let data_dir = config.storage.data_dir.clone();
        std::fs::create_dir_all(&data_dir)?;

        let master = open_pool(&data_dir.join("registry.sqlite")).await?;
        migrate::migrate_registry(&master).await?;

        Ok(Self {
            data_dir,
            connect_timeout: Duration::from_secs(config.registry.connect_timeout_secs),
            master,
            handles: RwLock::new(HashMap::new()),
        })
    }

    /// Root data directory (registry database plus tenant namespaces).
    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    /// Register a tenant in the master database. Idempotent on
    /// `tenant_ref`; re-registering updates the display name.
    pub async fn add_tenant(&self, tenant_ref: &str, display_name: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_ref, display_name, created_at) VALUES (?, ?, ?)
            ON CONFLICT(tenant_ref) DO UPDATE SET display_name = excluded.display_name
            "#,
        )
        .bind(tenant_ref)
        .bind(display_name)
        .bind(Utc::now().timestamp())
        .execute(&self.master)
        .await?;

        Ok(())
    }

    /// List registered tenants, ordered by reference.
    pub async fn list_tenants(&self) -> anyhow::Result<Vec<TenantEntry>> {
        use sqlx::Row;

        let rows = sqlx::query(
            "SELECT tenant_ref, display_name, created_at FROM tenants ORDER BY tenant_ref",
        )
        .fetch_all(&self.master)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TenantEntry {
                tenant_ref: row.get("tenant_ref"),
                display_name: row.get("display_name"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Resolve a tenant reference to its namespace handle.
    ///
    /// The first resolution looks up the tenant, derives its namespace,
    /// opens the per-tenant pool (bounded by the configured connect
    /// timeout) and runs tenant migrations. Subsequent resolutions return
    /// the cached handle without touching storage. Repeated calls always
    /// bind to the same namespace.
    pub async fn resolve(&self, tenant_ref: &str) -> SyncResult<Arc<TenantHandle>> {
        if let Some(handle) = self.handles.read().await.get(tenant_ref) {
            return Ok(handle.clone());
        }

        let display_name: Option<String> =
            sqlx::query_scalar("SELECT display_name FROM tenants WHERE tenant_ref = ?")
                .bind(tenant_ref)
                .fetch_optional(&self.master)
                .await?;

        let display_name =
            display_name.ok_or_else(|| SyncError::TenantNotFound(tenant_ref.to_string()))?;
        let namespace = derive_namespace(&display_name);

        let tenant_dir = self.data_dir.join(&namespace);
        std::fs::create_dir_all(&tenant_dir)?;

        let db_path = tenant_dir.join("records.sqlite");
        let pool = tokio::time::timeout(self.connect_timeout, open_pool(&db_path))
            .await
            .map_err(|_| SyncError::ConnectionTimeout(self.connect_timeout))??;

        migrate::migrate_tenant(&pool).await?;

        let handle = Arc::new(TenantHandle {
            tenant_ref: tenant_ref.to_string(),
            namespace,
            pool,
            created_at: Utc::now(),
        });

        // A concurrent resolver may have won the race; keep its handle so
        // every caller shares one pool, and close the one opened here.
        let existing = {
            let mut handles = self.handles.write().await;
            match handles.entry(tenant_ref.to_string()) {
                Entry::Occupied(entry) => Some(entry.get().clone()),
                Entry::Vacant(entry) => {
                    entry.insert(handle.clone());
                    None
                }
            }
        };

        if let Some(winner) = existing {
            handle.pool.close().await;
            return Ok(winner);
        }

        Ok(handle)
    }

    /// Drop a cached handle and close its pool.
    ///
    /// Not called by the serving paths today; exists so the cache has a
    /// defined eviction lifecycle instead of growing forever.
    pub async fn evict(&self, tenant_ref: &str) {
        let removed = self.handles.write().await.remove(tenant_ref);
        if let Some(handle) = removed {
            handle.pool.close().await;
        }
    }
}

async fn open_pool(db_path: &std::path::Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Derive a storage namespace from a tenant display name: lower-cased,
/// every non-alphanumeric byte replaced with `_`.
///
/// Not collision-free: names differing only in punctuation ("Acme Inc."
/// and "Acme-Inc?") map to the same namespace.
pub fn derive_namespace(display_name: &str) -> String {
    display_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_lowercases_and_replaces_punctuation() {
        assert_eq!(derive_namespace("Acme Motors"), "acme_motors");
        assert_eq!(derive_namespace("Acme-Motors!"), "acme_motors_");
        assert_eq!(derive_namespace("ACME"), "acme");
    }

    #[test]
    fn namespace_collisions_are_possible() {
        // Documented limitation: punctuation-only differences collide.
        assert_eq!(derive_namespace("Acme Inc."), derive_namespace("Acme-Inc?"));
    }

    #[test]
    fn namespace_is_deterministic() {
        let a = derive_namespace("Shree Finance & Leasing");
        let b = derive_namespace("Shree Finance & Leasing");
        assert_eq!(a, b);
    }
}
