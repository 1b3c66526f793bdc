//! Schema creation for the registry database and per-tenant namespaces.
//!
//! All statements are idempotent (`CREATE ... IF NOT EXISTS`), so running
//! them against an existing database is safe.

use sqlx::SqlitePool;

use crate::models::Category;

/// Create the master registry schema (tenant directory).
pub async fn migrate_registry(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            tenant_ref TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the three category tables and their indexes inside a tenant
/// namespace.
///
/// The commercial table carries two extra source columns
/// (`permit_number`, `load_capacity`); its translator folds them into
/// the normalized shape, and the other translators default them.
pub async fn migrate_tenant(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for category in Category::ALL {
        let table = category.table();
        let extra_columns = if category == Category::Commercial {
            "permit_number TEXT NOT NULL DEFAULT '',\n                load_capacity TEXT NOT NULL DEFAULT '',"
        } else {
            ""
        };

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                registration_number TEXT NOT NULL DEFAULT '',
                reg_last4 TEXT NOT NULL DEFAULT '',
                chassis_number TEXT NOT NULL DEFAULT '',
                agreement_number TEXT NOT NULL DEFAULT '',
                bank_name TEXT NOT NULL DEFAULT '',
                vehicle_make TEXT NOT NULL DEFAULT '',
                customer_name TEXT NOT NULL DEFAULT '',
                address TEXT NOT NULL DEFAULT '',
                engine_number TEXT NOT NULL DEFAULT '',
                branch TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                {extra_columns}
                created_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0,
                uploaded_at INTEGER NOT NULL DEFAULT 0
            )
            "#,
        ))
        .execute(pool)
        .await?;

        for column in [
            "reg_last4",
            "registration_number",
            "chassis_number",
            "agreement_number",
            "updated_at",
        ] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})"
            ))
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}
