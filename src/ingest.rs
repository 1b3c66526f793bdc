//! Record ingest.
//!
//! The external pipeline delivers finalized, schema-validated records
//! tagged with tenant and category; this module upserts them into the
//! category table, stamping upload time and maintaining the `reg_last4`
//! search column. Callers trigger the background snapshot rebuild after a
//! successful batch (see `snapshot::SnapshotBuilder::trigger`).

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{Category, NormalizedRecord};

/// Counters reported after an ingest batch.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct IngestSummary {
    pub received: u64,
    pub upserted: u64,
}

/// Upsert a batch of records into one category table.
///
/// Records without an id are assigned a fresh UUID. Identifier fields are
/// trimmed so the presence invariant and search behave consistently.
pub async fn ingest_records(
    pool: &SqlitePool,
    category: Category,
    records: &[NormalizedRecord],
) -> Result<IngestSummary, sqlx::Error> {
    let now = Utc::now().timestamp();
    let mut summary = IngestSummary {
        received: records.len() as u64,
        ..IngestSummary::default()
    };

    let mut tx = pool.begin().await?;

    for record in records {
        let mut rec = record.clone();
        if rec.id.trim().is_empty() {
            rec.id = Uuid::new_v4().to_string();
        }
        rec.registration_number = rec.registration_number.trim().to_string();
        rec.chassis_number = rec.chassis_number.trim().to_string();
        rec.agreement_number = rec.agreement_number.trim().to_string();
        rec.reg_last4 = rec.registration_last4();
        if rec.created_at == 0 {
            rec.created_at = now;
        }
        rec.updated_at = now;
        rec.uploaded_at = now;

        upsert(&mut tx, category, &rec).await?;
        summary.upserted += 1;
    }

    tx.commit().await?;
    Ok(summary)
}

async fn upsert(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    category: Category,
    rec: &NormalizedRecord,
) -> Result<(), sqlx::Error> {
    let table = category.table();

    if category == Category::Commercial {
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (id, registration_number, reg_last4, chassis_number,
                agreement_number, bank_name, vehicle_make, customer_name, address,
                engine_number, branch, status, permit_number, load_capacity,
                created_at, updated_at, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                registration_number = excluded.registration_number,
                reg_last4 = excluded.reg_last4,
                chassis_number = excluded.chassis_number,
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
                updated_at = excluded.updated_at,
                uploaded_at = excluded.uploaded_at
            "#,
        ))
        .bind(&rec.id)
        .bind(&rec.registration_number)
        .bind(&rec.reg_last4)
        .bind(&rec.chassis_number)
        .bind(&rec.agreement_number)
        .bind(&rec.bank_name)
        .bind(&rec.vehicle_make)
        .bind(&rec.customer_name)
        .bind(&rec.address)
        .bind(&rec.engine_number)
        .bind(&rec.branch)
        .bind(&rec.status)
        .bind(&rec.permit_number)
        .bind(&rec.load_capacity)
        .bind(rec.created_at)
        .bind(rec.updated_at)
        .bind(rec.uploaded_at)
        .execute(&mut **tx)
        .await?;
    } else {
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (id, registration_number, reg_last4, chassis_number,
                agreement_number, bank_name, vehicle_make, customer_name, address,
                engine_number, branch, status, created_at, updated_at, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                registration_number = excluded.registration_number,
                reg_last4 = excluded.reg_last4,
                chassis_number = excluded.chassis_number,
                agreement_number = excluded.agreement_number,
                bank_name = excluded.bank_name,
                vehicle_make = excluded.vehicle_make,
                customer_name = excluded.customer_name,
                address = excluded.address,
                engine_number = excluded.engine_number,
                branch = excluded.branch,
                status = excluded.status,
                updated_at = excluded.updated_at,
                uploaded_at = excluded.uploaded_at
            "#,
        ))
        .bind(&rec.id)
        .bind(&rec.registration_number)
        .bind(&rec.reg_last4)
        .bind(&rec.chassis_number)
        .bind(&rec.agreement_number)
        .bind(&rec.bank_name)
        .bind(&rec.vehicle_make)
        .bind(&rec.customer_name)
        .bind(&rec.address)
        .bind(&rec.engine_number)
        .bind(&rec.branch)
        .bind(&rec.status)
        .bind(rec.created_at)
        .bind(rec.updated_at)
        .bind(rec.uploaded_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}
