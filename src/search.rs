//! Ad hoc record lookup over the live store.
//!
//! Two paths: a fast path for the dominant mobile pattern (4-digit
//! partial plate, matched suffix-anchored against the indexed
//! `reg_last4` column) and a general path (escaped substring match
//! against registration / chassis / agreement numbers). Both union
//! across categories, de-duplicate by id, and stop querying further
//! categories once the result cap is reached.

use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::warn;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{Category, NormalizedRecord};
use crate::registry::TenantHandle;
use crate::store;

/// Which field family a search query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Reg,
    Chassis,
    Agreement,
    Any,
}

impl SearchKind {
    pub fn parse(s: &str) -> Option<SearchKind> {
        match s {
            "reg" => Some(SearchKind::Reg),
            "chassis" => Some(SearchKind::Chassis),
            "agreement" => Some(SearchKind::Agreement),
            "any" => Some(SearchKind::Any),
            _ => None,
        }
    }
}

/// Search the live record store.
///
/// Results are sorted case-insensitively by registration number,
/// falling back to chassis number, and capped at `sync.search_limit`.
pub async fn search(
    handle: &TenantHandle,
    sync: &SyncConfig,
    query: &str,
    kind: SearchKind,
) -> SyncResult<Vec<NormalizedRecord>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(SyncError::BadCursor("empty search query".to_string()));
    }

    let cap = sync.search_limit;
    let mut seen: HashSet<String> = HashSet::new();
    let mut results: Vec<NormalizedRecord> = Vec::new();

    for category in Category::ALL {
        if results.len() as i64 >= cap {
            break;
        }
        let remaining = cap - results.len() as i64;

        let batch = if kind == SearchKind::Reg && is_last4_query(query) {
            fetch_by_last4(&handle.pool, category, query, remaining).await
        } else {
            fetch_by_pattern(&handle.pool, category, query, kind, remaining).await
        };

        let batch = match batch {
            Ok(batch) => batch,
            Err(err) => {
                warn!(category = %category, error = %err, "search failed for category, skipping");
                Vec::new()
            }
        };

        for record in batch {
            if seen.insert(record.id.clone()) {
                results.push(record);
            }
        }
    }

    results.sort_by(compare_by_plate);
    results.truncate(usize::try_from(cap).unwrap_or(usize::MAX));
    Ok(results)
}

/// Fast path: exact match on the indexed last-4 column.
async fn fetch_by_last4(
    pool: &SqlitePool,
    category: Category,
    last4: &str,
    limit: i64,
) -> Result<Vec<NormalizedRecord>, sqlx::Error> {
    store::by_column_equals(pool, category, "reg_last4", last4, limit).await
}

/// General path: escaped substring match against the columns the kind
/// selects.
async fn fetch_by_pattern(
    pool: &SqlitePool,
    category: Category,
    query: &str,
    kind: SearchKind,
    limit: i64,
) -> Result<Vec<NormalizedRecord>, sqlx::Error> {
    let pattern = format!("%{}%", escape_like(query));
    let columns: &[&str] = match kind {
        SearchKind::Reg => &["registration_number"],
        SearchKind::Chassis => &["chassis_number"],
        SearchKind::Agreement => &["agreement_number"],
        SearchKind::Any => &["registration_number", "chassis_number", "agreement_number"],
    };
    store::by_columns_like(pool, category, columns, &pattern, limit).await
}

/// A query of exactly four ASCII digits takes the indexed fast path.
fn is_last4_query(query: &str) -> bool {
    query.len() == 4 && query.bytes().all(|b| b.is_ascii_digit())
}

/// Escape LIKE metacharacters so user input is matched literally
/// (queries use `ESCAPE '\'`).
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if c == '\\' || c == '%' || c == '_' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Case-insensitive ordering by registration number, falling back to
/// chassis number for records without a plate.
fn compare_by_plate(a: &NormalizedRecord, b: &NormalizedRecord) -> Ordering {
    plate_key(a).cmp(&plate_key(b)).then_with(|| a.id.cmp(&b.id))
}

fn plate_key(record: &NormalizedRecord) -> String {
    let key = if record.registration_number.is_empty() {
        &record.chassis_number
    } else {
        &record.registration_number
    };
    key.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_wire_names_only() {
        assert_eq!(SearchKind::parse("reg"), Some(SearchKind::Reg));
        assert_eq!(SearchKind::parse("chassis"), Some(SearchKind::Chassis));
        assert_eq!(SearchKind::parse("agreement"), Some(SearchKind::Agreement));
        assert_eq!(SearchKind::parse("any"), Some(SearchKind::Any));
        assert_eq!(SearchKind::parse("Reg"), None);
        assert_eq!(SearchKind::parse(""), None);
    }

    #[test]
    fn last4_detection() {
        assert!(is_last4_query("1234"));
        assert!(!is_last4_query("123"));
        assert!(!is_last4_query("12345"));
        assert!(!is_last4_query("12a4"));
        assert!(!is_last4_query(""));
    }

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("MH12"), "MH12");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }

    fn rec(id: &str, reg: &str, chassis: &str) -> NormalizedRecord {
        NormalizedRecord {
            id: id.to_string(),
            registration_number: reg.to_string(),
            chassis_number: chassis.to_string(),
            ..NormalizedRecord::default()
        }
    }

    #[test]
    fn ordering_by_registration_case_insensitive() {
        let mut records = vec![
            rec("1", "mh14zz0001", ""),
            rec("2", "MH12AB1234", ""),
            rec("3", "", "AACHASSIS"),
        ];
        records.sort_by(compare_by_plate);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        // Chassis fallback sorts alongside registrations, not after them.
        assert_eq!(ids, vec!["3", "2", "1"]);
    }
}
