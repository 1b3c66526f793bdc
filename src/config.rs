use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory holding the registry database and one subdirectory
    /// per tenant namespace.
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Upper bound on the first-resolution storage connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Hard cap on records returned by a full dump or a single
    /// incremental sync call.
    #[serde(default = "default_max_dump_records")]
    pub max_dump_records: i64,
    /// Largest limit a client may request for a chunked dump.
    #[serde(default = "default_max_chunk_limit")]
    pub max_chunk_limit: i64,
    /// Page size used when streaming large reads (dumps, snapshot build).
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Pause between streamed batches; an ad hoc throttle, not true
    /// flow-controlled backpressure.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// Result cap for interactive search.
    #[serde(default = "default_search_limit")]
    pub search_limit: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_dump_records: default_max_dump_records(),
            max_chunk_limit: default_max_chunk_limit(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            search_limit: default_search_limit(),
        }
    }
}

fn default_max_dump_records() -> i64 {
    100_000
}
fn default_max_chunk_limit() -> i64 {
    100_000
}
fn default_batch_size() -> i64 {
    10_000
}
fn default_batch_pause_ms() -> u64 {
    25
}
fn default_search_limit() -> i64 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Token required by the privileged rebuild endpoint. When unset,
    /// admin endpoints reject every request.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// When true, internal error text is withheld from responses.
    #[serde(default)]
    pub production: bool,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.sync.max_dump_records < 1 {
        anyhow::bail!("sync.max_dump_records must be >= 1");
    }
    if config.sync.max_chunk_limit < 1 {
        anyhow::bail!("sync.max_chunk_limit must be >= 1");
    }
    if config.sync.batch_size < 1 {
        anyhow::bail!("sync.batch_size must be >= 1");
    }
    if config.sync.search_limit < 1 {
        anyhow::bail!("sync.search_limit must be >= 1");
    }
    if config.registry.connect_timeout_secs == 0 {
        anyhow::bail!("registry.connect_timeout_secs must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            data_dir = "/tmp/fleet"

            [server]
            bind = "127.0.0.1:7400"
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.max_dump_records, 100_000);
        assert_eq!(config.sync.batch_size, 10_000);
        assert_eq!(config.registry.connect_timeout_secs, 8);
        assert!(config.server.admin_token.is_none());
        assert!(!config.server.production);
    }
}
