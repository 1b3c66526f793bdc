//! # FleetSync CLI (`fleetsync`)
//!
//! Operational interface for the sync engine: tenant registration,
//! record ingest, search, snapshot rebuilds, stats, and starting the
//! HTTP sync server.
//!
//! ## Usage
//!
//! ```bash
//! fleetsync --config ./config/fleetsync.toml <command>
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the registry database
//! fleetsync init
//!
//! # Register a tenant and ingest a validated batch
//! fleetsync tenant add acme "Acme Motors"
//! fleetsync ingest acme two_wheeler ./batch.json
//!
//! # Partial plate lookup
//! fleetsync search acme 1234 --kind reg
//!
//! # Rebuild the offline snapshot and inspect the tenant
//! fleetsync snapshot build acme
//! fleetsync stats acme
//!
//! # Start the HTTP sync API
//! fleetsync serve
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fleet_sync::models::Category;
use fleet_sync::registry::TenantRegistry;
use fleet_sync::search::SearchKind;
use fleet_sync::snapshot::SnapshotBuilder;
use fleet_sync::{config, ingest, models, registry, search, server, stats};

/// FleetSync — multi-tenant vehicle record storage routing and offline
/// sync engine.
#[derive(Parser)]
#[command(
    name = "fleetsync",
    about = "Multi-tenant vehicle record storage routing and offline sync engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fleetsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the registry database. Idempotent.
    Init,

    /// Manage registered tenants.
    Tenant {
        #[command(subcommand)]
        action: TenantAction,
    },

    /// Ingest a batch of validated records from a JSON file.
    ///
    /// The file holds an array of normalized record objects. After a
    /// successful batch, a background snapshot rebuild is triggered.
    Ingest {
        /// Tenant reference.
        tenant: String,
        /// Category: two_wheeler, four_wheeler, or commercial.
        category: String,
        /// Path to the JSON batch file.
        file: PathBuf,
    },

    /// Search a tenant's records.
    Search {
        /// Tenant reference.
        tenant: String,
        /// The query string. Exactly four digits with --kind reg takes
        /// the indexed partial-plate fast path.
        query: String,
        /// Field family: reg, chassis, agreement, or any.
        #[arg(long, default_value = "any")]
        kind: String,
    },

    /// Manage per-tenant snapshot files.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Show per-tenant record counts and snapshot status.
    Stats {
        /// Tenant reference.
        tenant: String,
    },

    /// Start the HTTP sync API server.
    Serve,
}

/// Tenant management subcommands.
#[derive(Subcommand)]
enum TenantAction {
    /// Register a tenant (or update its display name).
    Add {
        /// Stable tenant reference used in API paths.
        tenant_ref: String,
        /// Display name; the storage namespace is derived from it.
        display_name: String,
    },
    /// List registered tenants.
    List,
}

/// Snapshot subcommands.
#[derive(Subcommand)]
enum SnapshotAction {
    /// Rebuild the snapshot file for a tenant and print its metadata.
    Build {
        /// Tenant reference.
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            TenantRegistry::open(&cfg).await?;
            println!("Registry initialized successfully.");
        }
        Commands::Tenant { action } => {
            let registry = TenantRegistry::open(&cfg).await?;
            match action {
                TenantAction::Add {
                    tenant_ref,
                    display_name,
                } => {
                    registry.add_tenant(&tenant_ref, &display_name).await?;
                    println!(
                        "Registered tenant '{}' (namespace: {})",
                        tenant_ref,
                        registry::derive_namespace(&display_name)
                    );
                }
                TenantAction::List => {
                    let tenants = registry.list_tenants().await?;
                    if tenants.is_empty() {
                        println!("No tenants registered.");
                    } else {
                        println!("{:<20} {:<32} NAMESPACE", "TENANT", "DISPLAY NAME");
                        for t in tenants {
                            println!(
                                "{:<20} {:<32} {}",
                                t.tenant_ref,
                                t.display_name,
                                registry::derive_namespace(&t.display_name)
                            );
                        }
                    }
                }
            }
        }
        Commands::Ingest {
            tenant,
            category,
            file,
        } => {
            let category = Category::parse(&category)
                .ok_or_else(|| anyhow::anyhow!("unknown category: {category}"))?;
            let content = std::fs::read_to_string(&file)?;
            let records: Vec<models::NormalizedRecord> = serde_json::from_str(&content)?;

            let registry = TenantRegistry::open(&cfg).await?;
            let handle = registry.resolve(&tenant).await?;
            let summary = ingest::ingest_records(&handle.pool, category, &records).await?;

            println!("ingest {} {}", tenant, category);
            println!("  received: {}", summary.received);
            println!("  upserted: {}", summary.upserted);

            // Synchronous rebuild here: the CLI has no background task
            // to hand off to before the process exits.
            let builder = SnapshotBuilder::new(&cfg)?;
            let meta = builder.build(&handle).await?;
            println!("  snapshot version: {}", meta.version);
            println!("ok");
        }
        Commands::Search {
            tenant,
            query,
            kind,
        } => {
            let kind = SearchKind::parse(&kind)
                .ok_or_else(|| anyhow::anyhow!("unknown search kind: {kind}"))?;

            let registry = TenantRegistry::open(&cfg).await?;
            let handle = registry.resolve(&tenant).await?;
            let results = search::search(&handle, &cfg.sync, &query, kind).await?;

            if results.is_empty() {
                println!("No results.");
            } else {
                for (i, r) in results.iter().enumerate() {
                    println!(
                        "{}. [{}] reg: {}  chassis: {}  agreement: {}",
                        i + 1,
                        r.category,
                        display_or_dash(&r.registration_number),
                        display_or_dash(&r.chassis_number),
                        display_or_dash(&r.agreement_number),
                    );
                    println!("    customer: {}  bank: {}", r.customer_name, r.bank_name);
                    println!("    id: {}", r.id);
                }
            }
        }
        Commands::Snapshot { action } => match action {
            SnapshotAction::Build { tenant } => {
                let registry = TenantRegistry::open(&cfg).await?;
                let handle = registry.resolve(&tenant).await?;
                let builder = SnapshotBuilder::new(&cfg)?;
                let meta = builder.build(&handle).await?;

                println!("snapshot {}", tenant);
                println!("  version:    {}", meta.version);
                println!("  size_bytes: {}", meta.size_bytes);
                println!("  checksum:   {}", meta.checksum);
                println!("ok");
            }
        },
        Commands::Stats { tenant } => {
            let registry = TenantRegistry::open(&cfg).await?;
            let builder = SnapshotBuilder::new(&cfg).ok();
            stats::run_stats(&registry, builder.as_ref(), &tenant).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn display_or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}
