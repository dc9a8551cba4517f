// 💦 Usage Store - Rolling 65-day window of per-unit daily gallons
//
// Keyed by (unit, date) with last-write-wins upserts, so re-ingesting the
// same export is a no-op. Reads serve three consumers: the range query for
// review, the per-unit gallon sums the billing engine consumes, and the
// dense matrix the viewer renders.

use crate::db::{parse_stored_date, DATE_FMT};
use crate::properties::Property;
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Samples older than this many days are purged after every ingestion run
pub const RETENTION_DAYS: i64 = 65;

/// One stored reading joined with its unit (and tenant, if occupied)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRow {
    pub unit_number: String,
    pub property: Property,
    pub address: String,
    pub tenant_name: Option<String>,
    pub date: NaiveDate,
    pub gallons: f64,
}

/// Dense unit x date grid for display; missing cells are 0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMatrix {
    /// Newest first
    pub dates: Vec<NaiveDate>,
    /// "Property-unit" labels, sorted
    pub units: Vec<String>,
    /// cells[date_idx][unit_idx]
    pub cells: Vec<Vec<f64>>,
}

// ============================================================================
// WRITES
// ============================================================================

/// Replace any existing reading for this (unit, date) pair
pub fn upsert_usage(conn: &Connection, unit_id: i64, date: NaiveDate, gallons: f64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO water_usage (unit_id, date, gallons) VALUES (?1, ?2, ?3)",
        params![unit_id, date.format(DATE_FMT).to_string(), gallons],
    )?;
    Ok(())
}

/// Delete samples strictly older than the retention window.
/// A sample dated exactly `today - retention_days` survives.
pub fn purge_usage(conn: &Connection, retention_days: i64, today: NaiveDate) -> Result<usize> {
    let cutoff = today - Duration::days(retention_days);
    let deleted = conn.execute(
        "DELETE FROM water_usage WHERE date < ?1",
        params![cutoff.format(DATE_FMT).to_string()],
    )?;
    Ok(deleted)
}

// ============================================================================
// READS
// ============================================================================

/// Stored readings in an inclusive range, ordered property then unit then date
pub fn query_usage(conn: &Connection, start: NaiveDate, end: NaiveDate) -> Result<Vec<UsageRow>> {
    let mut stmt = conn.prepare(
        "SELECT u.unit_number, u.property, u.address, t.name, wu.date, wu.gallons
         FROM water_usage wu
         JOIN units u ON u.id = wu.unit_id
         LEFT JOIN tenants t ON u.id = t.unit_id
         WHERE wu.date BETWEEN ?1 AND ?2
         ORDER BY u.property, u.unit_number, wu.date",
    )?;

    let rows = stmt
        .query_map(
            params![
                start.format(DATE_FMT).to_string(),
                end.format(DATE_FMT).to_string()
            ],
            |row| {
                let property_name: String = row.get(1)?;
                let date_str: String = row.get(4)?;
                Ok(UsageRow {
                    unit_number: row.get(0)?,
                    property: Property::from_name(&property_name)
                        .ok_or(rusqlite::Error::InvalidQuery)?,
                    address: row.get(2)?,
                    tenant_name: row.get(3)?,
                    date: parse_stored_date(&date_str)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?,
                    gallons: row.get(5)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Total gallons per unit over an inclusive range, for the billing engine
pub fn sum_gallons_by_unit(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<HashMap<String, f64>> {
    let mut stmt = conn.prepare(
        "SELECT u.unit_number, SUM(wu.gallons)
         FROM water_usage wu
         JOIN units u ON u.id = wu.unit_id
         WHERE wu.date BETWEEN ?1 AND ?2
         GROUP BY u.unit_number",
    )?;

    let mut totals = HashMap::new();
    let rows = stmt.query_map(
        params![
            start.format(DATE_FMT).to_string(),
            end.format(DATE_FMT).to_string()
        ],
        |row| {
            let unit: String = row.get(0)?;
            let gallons: f64 = row.get(1)?;
            Ok((unit, gallons))
        },
    )?;
    for row in rows {
        let (unit, gallons) = row?;
        totals.insert(unit, gallons);
    }

    Ok(totals)
}

/// Dense matrix of the most recent `window_days` days. Pure read: every
/// stored date in the window becomes a row, every unit that appears becomes
/// a column, and gaps render as 0.
pub fn viewer_snapshot(
    conn: &Connection,
    window_days: i64,
    today: NaiveDate,
) -> Result<UsageMatrix> {
    let start = today - Duration::days(window_days);
    let rows = query_usage(conn, start, today)?;

    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut units: Vec<String> = Vec::new();
    for row in &rows {
        if !dates.contains(&row.date) {
            dates.push(row.date);
        }
        let label = format!("{}-{}", row.property, row.unit_number);
        if !units.contains(&label) {
            units.push(label);
        }
    }
    dates.sort_by(|a, b| b.cmp(a));
    units.sort();

    let mut cells = vec![vec![0.0; units.len()]; dates.len()];
    for row in &rows {
        let label = format!("{}-{}", row.property, row.unit_number);
        let di = dates.iter().position(|d| *d == row.date).unwrap_or(0);
        let ui = units.iter().position(|u| *u == label).unwrap_or(0);
        cells[di][ui] = row.gallons;
    }

    Ok(UsageMatrix { dates, units, cells })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{find_unit_id, setup_database};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn usage_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM water_usage", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_upsert_is_last_write_wins() {
        let conn = test_conn();
        let unit_id = find_unit_id(&conn, "484").unwrap().unwrap();

        upsert_usage(&conn, unit_id, d(2025, 6, 1), 100.0).unwrap();
        upsert_usage(&conn, unit_id, d(2025, 6, 1), 250.0).unwrap();

        assert_eq!(usage_count(&conn), 1, "same (unit, date) never duplicates");
        let rows = query_usage(&conn, d(2025, 6, 1), d(2025, 6, 1)).unwrap();
        assert_eq!(rows[0].gallons, 250.0, "later write wins");
    }

    #[test]
    fn test_reingest_identical_window_is_idempotent() {
        let conn = test_conn();
        let unit_id = find_unit_id(&conn, "532A").unwrap().unwrap();

        let batch = [(d(2025, 6, 1), 10.0), (d(2025, 6, 2), 20.0), (d(2025, 6, 3), 30.0)];
        for _ in 0..2 {
            for (date, gallons) in batch {
                upsert_usage(&conn, unit_id, date, gallons).unwrap();
            }
        }

        assert_eq!(usage_count(&conn), 3);
        let totals = sum_gallons_by_unit(&conn, d(2025, 6, 1), d(2025, 6, 3)).unwrap();
        assert_eq!(totals.get("532A"), Some(&60.0));
    }

    #[test]
    fn test_query_range_is_inclusive_and_ordered() {
        let conn = test_conn();
        let champion = find_unit_id(&conn, "484").unwrap().unwrap();
        let barnett = find_unit_id(&conn, "483").unwrap().unwrap();

        upsert_usage(&conn, champion, d(2025, 6, 1), 5.0).unwrap();
        upsert_usage(&conn, champion, d(2025, 6, 3), 7.0).unwrap();
        upsert_usage(&conn, barnett, d(2025, 6, 2), 6.0).unwrap();
        upsert_usage(&conn, champion, d(2025, 5, 31), 99.0).unwrap();

        let rows = query_usage(&conn, d(2025, 6, 1), d(2025, 6, 3)).unwrap();
        assert_eq!(rows.len(), 3, "row outside the range excluded");

        // Property order: "Barnett" sorts before "Champion"
        assert_eq!(rows[0].unit_number, "483");
        assert_eq!(rows[1].unit_number, "484");
        assert_eq!(rows[1].date, d(2025, 6, 1));
        assert_eq!(rows[2].date, d(2025, 6, 3));
    }

    #[test]
    fn test_purge_keeps_boundary_day() {
        let conn = test_conn();
        let unit_id = find_unit_id(&conn, "486").unwrap().unwrap();
        let today = d(2025, 8, 7);

        let boundary = today - Duration::days(RETENTION_DAYS);
        upsert_usage(&conn, unit_id, boundary - Duration::days(1), 1.0).unwrap();
        upsert_usage(&conn, unit_id, boundary, 2.0).unwrap();
        upsert_usage(&conn, unit_id, today - Duration::days(1), 3.0).unwrap();

        let deleted = purge_usage(&conn, RETENTION_DAYS, today).unwrap();
        assert_eq!(deleted, 1, "only the sample older than the window goes");

        let rows = query_usage(&conn, boundary - Duration::days(2), today).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.date == boundary), "boundary day retained");
    }

    #[test]
    fn test_viewer_snapshot_is_dense() {
        let conn = test_conn();
        let champion = find_unit_id(&conn, "484").unwrap().unwrap();
        let cushing = find_unit_id(&conn, "CushingB").unwrap().unwrap();
        let today = d(2025, 6, 10);

        upsert_usage(&conn, champion, d(2025, 6, 8), 11.0).unwrap();
        upsert_usage(&conn, cushing, d(2025, 6, 9), 22.0).unwrap();

        let matrix = viewer_snapshot(&conn, RETENTION_DAYS, today).unwrap();
        assert_eq!(matrix.dates, vec![d(2025, 6, 9), d(2025, 6, 8)], "newest first");
        assert_eq!(
            matrix.units,
            vec!["Champion-484".to_string(), "Cushing-CushingB".to_string()]
        );
        // Gaps are zero-filled
        assert_eq!(matrix.cells[0], vec![0.0, 22.0]);
        assert_eq!(matrix.cells[1], vec![11.0, 0.0]);
    }
}
