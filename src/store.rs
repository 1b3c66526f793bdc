//! Per-tenant record access and normalization.
//!
//! All reads go through this module so that every consumer sees the same
//! canonical [`NormalizedRecord`] shape regardless of which category table
//! a row came from. One translation function exists per source category;
//! each fills every canonical field with a safe default so downstream code
//! never branches on absence.
//!
//! Multi-category aggregation callers use the `*_or_*` soft variants:
//! a failing category (e.g. a missing backing table) is logged and
//! contributes zero records instead of aborting the whole operation.

use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::models::{Category, NormalizedRecord};

/// Canonical columns present in every category table.
const CORE_COLUMNS: &str = "id, registration_number, reg_last4, chassis_number, \
     agreement_number, bank_name, vehicle_make, customer_name, address, \
     engine_number, branch, status, created_at, updated_at, uploaded_at";

/// SQL predicate for the registration/chassis presence invariant.
const PRESENCE_CLAUSE: &str = "(registration_number <> '' OR chassis_number <> '')";

fn select_columns(category: Category) -> String {
    if category == Category::Commercial {
        format!("{CORE_COLUMNS}, permit_number, load_capacity")
    } else {
        CORE_COLUMNS.to_string()
    }
}

fn normalize(category: Category, row: &sqlx::sqlite::SqliteRow) -> NormalizedRecord {
    match category {
        Category::TwoWheeler => normalize_two_wheeler(row),
        Category::FourWheeler => normalize_four_wheeler(row),
        Category::Commercial => normalize_commercial(row),
    }
}

fn normalize_core(category: Category, row: &sqlx::sqlite::SqliteRow) -> NormalizedRecord {
    NormalizedRecord {
        id: row.get("id"),
        category: category.table().to_string(),
        registration_number: row.get("registration_number"),
        reg_last4: row.get("reg_last4"),
        chassis_number: row.get("chassis_number"),
        agreement_number: row.get("agreement_number"),
        bank_name: row.get("bank_name"),
        vehicle_make: row.get("vehicle_make"),
        customer_name: row.get("customer_name"),
        address: row.get("address"),
        engine_number: row.get("engine_number"),
        branch: row.get("branch"),
        status: row.get("status"),
        permit_number: String::new(),
        load_capacity: String::new(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        uploaded_at: row.get("uploaded_at"),
    }
}

fn normalize_two_wheeler(row: &sqlx::sqlite::SqliteRow) -> NormalizedRecord {
    normalize_core(Category::TwoWheeler, row)
}

fn normalize_four_wheeler(row: &sqlx::sqlite::SqliteRow) -> NormalizedRecord {
    normalize_core(Category::FourWheeler, row)
}

fn normalize_commercial(row: &sqlx::sqlite::SqliteRow) -> NormalizedRecord {
    let mut record = normalize_core(Category::Commercial, row);
    record.permit_number = row.get("permit_number");
    record.load_capacity = row.get("load_capacity");
    record
}

/// Count records in one category, optionally restricted to records
/// satisfying the presence invariant.
pub async fn count(
    pool: &SqlitePool,
    category: Category,
    presence_only: bool,
) -> Result<i64, sqlx::Error> {
    let table = category.table();
    let sql = if presence_only {
        format!("SELECT COUNT(*) FROM {table} WHERE {PRESENCE_CLAUSE}")
    } else {
        format!("SELECT COUNT(*) FROM {table}")
    };
    sqlx::query_scalar(&sql).fetch_one(pool).await
}

/// Soft variant of [`count`]: a failing category counts as zero.
pub async fn count_or_zero(pool: &SqlitePool, category: Category, presence_only: bool) -> i64 {
    match count(pool, category, presence_only).await {
        Ok(n) => n,
        Err(err) => {
            warn!(category = %category, error = %err, "category count failed, treating as empty");
            0
        }
    }
}

/// Fetch one page of a category, ordered ascending by id for stable
/// pagination.
pub async fn page(
    pool: &SqlitePool,
    category: Category,
    skip: i64,
    take: i64,
    presence_only: bool,
) -> Result<Vec<NormalizedRecord>, sqlx::Error> {
    if take <= 0 {
        return Ok(Vec::new());
    }

    let table = category.table();
    let columns = select_columns(category);
    let filter = if presence_only {
        format!("WHERE {PRESENCE_CLAUSE}")
    } else {
        String::new()
    };

    let rows = sqlx::query(&format!(
        "SELECT {columns} FROM {table} {filter} ORDER BY id ASC LIMIT ? OFFSET ?"
    ))
    .bind(take)
    .bind(skip)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| normalize(category, row)).collect())
}

/// Soft variant of [`page`]: a failing category yields no records.
pub async fn page_or_empty(
    pool: &SqlitePool,
    category: Category,
    skip: i64,
    take: i64,
    presence_only: bool,
) -> Vec<NormalizedRecord> {
    match page(pool, category, skip, take, presence_only).await {
        Ok(records) => records,
        Err(err) => {
            warn!(category = %category, error = %err, "category page failed, skipping category");
            Vec::new()
        }
    }
}

/// Fetch the records matching an explicit id list within one category.
/// The presence invariant is not applied here.
pub async fn by_ids(
    pool: &SqlitePool,
    category: Category,
    ids: &[String],
) -> Result<Vec<NormalizedRecord>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let table = category.table();
    let columns = select_columns(category);
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql =
        format!("SELECT {columns} FROM {table} WHERE id IN ({placeholders}) ORDER BY id ASC");

    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }

    let rows = query.fetch_all(pool).await?;
    Ok(rows.iter().map(|row| normalize(category, row)).collect())
}

/// Fetch records where one column equals a value exactly. Used by the
/// partial-plate fast path against the indexed `reg_last4` column.
pub async fn by_column_equals(
    pool: &SqlitePool,
    category: Category,
    column: &str,
    value: &str,
    limit: i64,
) -> Result<Vec<NormalizedRecord>, sqlx::Error> {
    let table = category.table();
    let columns = select_columns(category);

    let rows = sqlx::query(&format!(
        "SELECT {columns} FROM {table} WHERE {column} = ? ORDER BY id ASC LIMIT ?"
    ))
    .bind(value)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| normalize(category, row)).collect())
}

/// Fetch records where any of the given columns matches an
/// already-escaped LIKE pattern.
pub async fn by_columns_like(
    pool: &SqlitePool,
    category: Category,
    match_columns: &[&str],
    pattern: &str,
    limit: i64,
) -> Result<Vec<NormalizedRecord>, sqlx::Error> {
    let table = category.table();
    let columns = select_columns(category);
    let predicate = match_columns
        .iter()
        .map(|c| format!("{c} LIKE ? ESCAPE '\\'"))
        .collect::<Vec<_>>()
        .join(" OR ");
    let sql = format!("SELECT {columns} FROM {table} WHERE {predicate} ORDER BY id ASC LIMIT ?");

    let mut query = sqlx::query(&sql);
    for _ in match_columns {
        query = query.bind(pattern);
    }
    query = query.bind(limit);

    let rows = query.fetch_all(pool).await?;
    Ok(rows.iter().map(|row| normalize(category, row)).collect())
}

/// Count records in one category touched (created, updated, or uploaded)
/// at or after `since`.
pub async fn count_changed_since(
    pool: &SqlitePool,
    category: Category,
    since: i64,
) -> Result<i64, sqlx::Error> {
    let table = category.table();
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {table} WHERE created_at >= ? OR updated_at >= ? OR uploaded_at >= ?"
    ))
    .bind(since)
    .bind(since)
    .bind(since)
    .fetch_one(pool)
    .await
}

/// Fetch every record in one category touched at or after `since`.
/// The presence invariant is not applied here.
pub async fn changed_since(
    pool: &SqlitePool,
    category: Category,
    since: i64,
) -> Result<Vec<NormalizedRecord>, sqlx::Error> {
    let table = category.table();
    let columns = select_columns(category);

    let rows = sqlx::query(&format!(
        "SELECT {columns} FROM {table} \
         WHERE created_at >= ? OR updated_at >= ? OR uploaded_at >= ? \
         ORDER BY id ASC"
    ))
    .bind(since)
    .bind(since)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| normalize(category, row)).collect())
}
