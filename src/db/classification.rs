//! Storage for the transaction-label mapping table and the review queue.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::str::FromStr;
use tracing::warn;

use super::models::{ReviewItem, TransactionKind};

/// Map a raw label to a kind. Resolving a label also clears it from the
/// review queue.
pub fn set_type_mapping(conn: &Connection, label: &str, kind: TransactionKind) -> Result<()> {
    let label = label.trim();
    conn.execute(
        "INSERT INTO transaction_type_map (label, kind) VALUES (?1, ?2)
         ON CONFLICT(label) DO UPDATE SET kind = excluded.kind",
        params![label, kind.as_str()],
    )?;
    conn.execute("DELETE FROM review_queue WHERE label = ?1", [label])?;
    Ok(())
}

pub fn remove_type_mapping(conn: &Connection, label: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM transaction_type_map WHERE label = ?1",
        [label.trim()],
    )?;
    Ok(deleted > 0)
}

/// All stored label overrides, ordered by label
pub fn list_type_mappings(conn: &Connection) -> Result<Vec<(String, TransactionKind)>> {
    let mut stmt = conn.prepare("SELECT label, kind FROM transaction_type_map ORDER BY label")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut mappings = Vec::with_capacity(rows.len());
    for (label, kind) in rows {
        match TransactionKind::from_str(&kind) {
            Ok(kind) => mappings.push((label, kind)),
            Err(_) => warn!("Ignoring mapping {} -> {}: unknown kind", label, kind),
        }
    }
    Ok(mappings)
}

/// Count one more sighting of an unclassified label.
pub fn record_unknown_label(conn: &Connection, label: &str, seen_on: NaiveDate) -> Result<()> {
    conn.execute(
        "INSERT INTO review_queue (label, occurrences, first_seen, last_seen)
         VALUES (?1, 1, ?2, ?2)
         ON CONFLICT(label) DO UPDATE SET
             occurrences = occurrences + 1,
             first_seen = MIN(first_seen, excluded.first_seen),
             last_seen = MAX(last_seen, excluded.last_seen)",
        params![label.trim(), seen_on],
    )?;
    Ok(())
}

pub fn list_review_queue(conn: &Connection) -> Result<Vec<ReviewItem>> {
    let mut stmt = conn.prepare(
        "SELECT label, occurrences, first_seen, last_seen
         FROM review_queue ORDER BY occurrences DESC, label",
    )?;
    let items = stmt
        .query_map([], |row| {
            Ok(ReviewItem {
                label: row.get(0)?,
                occurrences: row.get(1)?,
                first_seen: row.get(2)?,
                last_seen: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_unknown_labels_accumulate_until_mapped() {
        let conn = memory_db();
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        record_unknown_label(&conn, "份额转换", d1).unwrap();
        record_unknown_label(&conn, "份额转换", d2).unwrap();

        let queue = list_review_queue(&conn).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].occurrences, 2);
        assert_eq!(queue[0].first_seen, d2);
        assert_eq!(queue[0].last_seen, d1);

        set_type_mapping(&conn, "份额转换", TransactionKind::ForcedIncrease).unwrap();
        assert!(list_review_queue(&conn).unwrap().is_empty());
        assert_eq!(
            list_type_mappings(&conn).unwrap(),
            vec![("份额转换".to_string(), TransactionKind::ForcedIncrease)]
        );
    }
}
