// 🗄️ Database - SQLite schema, seed data, roster and rate queries
//
// Single-file SQLite store in WAL mode. Units are immutable reference data
// seeded on first run; tenants hang off units with replace-on-write
// semantics; usage_costs holds the six charge categories.

use crate::billing::{RateEntry, RateKind};
use crate::properties::Property;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Stored date format for usage samples and payments (sorts correctly as TEXT)
pub const DATE_FMT: &str = "%Y-%m-%d";

// ============================================================================
// ROW TYPES
// ============================================================================

/// One roster row: a unit joined with its tenant (if occupied)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: i64,
    pub unit_number: String,
    pub property: Property,
    pub address: String,
    pub tenant_id: Option<i64>,
    pub tenant_name: Option<String>,
    pub current_balance: Option<f64>,
}

/// Append-only payment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub tenant_id: i64,
    pub amount: f64,
    pub date: String,
}

/// One ingestion run, persisted for the operator's audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchLog {
    pub run_id: String,
    pub start_date: String,
    pub end_date: String,
    pub status: String,
    pub message: String,
}

// ============================================================================
// SCHEMA + SEEDS
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS units (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unit_number TEXT UNIQUE NOT NULL,
            property TEXT NOT NULL,
            address TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tenants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unit_id INTEGER,
            name TEXT NOT NULL,
            current_balance REAL DEFAULT 0,
            FOREIGN KEY (unit_id) REFERENCES units (id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS usage_costs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT UNIQUE NOT NULL,
            rate REAL NOT NULL,
            type TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER,
            amount REAL NOT NULL,
            date TEXT NOT NULL,
            FOREIGN KEY (tenant_id) REFERENCES tenants (id)
        )",
        [],
    )?;

    // Rolling 65-day window of per-unit daily readings
    conn.execute(
        "CREATE TABLE IF NOT EXISTS water_usage (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unit_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            gallons REAL NOT NULL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (unit_id) REFERENCES units (id),
            UNIQUE(unit_id, date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fetch_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL,
            message TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_usage_date ON water_usage(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tenants_unit ON tenants(unit_id)",
        [],
    )?;

    seed_units(conn)?;
    seed_rates(conn)?;

    Ok(())
}

/// The fixed 14-unit roster across the four properties
fn seed_units(conn: &Connection) -> Result<()> {
    let units = [
        ("484", Property::Champion, "484 S Champion Avenue"),
        ("486", Property::Champion, "486 S Champion Avenue"),
        ("483", Property::Barnett, "483 Barnett Road"),
        ("485", Property::Barnett, "485 Barnett Road"),
        ("487", Property::Barnett, "487 Barnett Road"),
        ("489", Property::Barnett, "489 Barnett Road"),
        ("532A", Property::Barnett532, "532 Barnett Road, Unit A"),
        ("532B", Property::Barnett532, "532 Barnett Road, Unit B"),
        ("532C", Property::Barnett532, "532 Barnett Road, Unit C"),
        ("532D", Property::Barnett532, "532 Barnett Road, Unit D"),
        ("CushingA", Property::Cushing, "3631 Cushing Drive, Unit A"),
        ("CushingB", Property::Cushing, "3631 Cushing Drive, Unit B"),
        ("CushingC", Property::Cushing, "3631 Cushing Drive, Unit C"),
        ("CushingD", Property::Cushing, "3631 Cushing Drive, Unit D"),
    ];

    for (unit_number, property, address) in units {
        conn.execute(
            "INSERT OR IGNORE INTO units (unit_number, property, address) VALUES (?1, ?2, ?3)",
            params![unit_number, property.name(), address],
        )?;
    }

    Ok(())
}

/// Default charge categories; rates are editable afterwards
fn seed_rates(conn: &Connection) -> Result<()> {
    let costs = [
        ("Water Rate", 3.52, RateKind::PerCcf),
        ("Sewer Rate", 5.35, RateKind::PerCcf),
        ("Water Base", 0.080084, RateKind::PerDay),
        ("Stormwater", 0.126489, RateKind::PerDay),
        ("Sewer Base", 0.041320, RateKind::PerDay),
        ("Clean River Fund", 0.103567, RateKind::PerDay),
    ];

    for (category, rate, kind) in costs {
        conn.execute(
            "INSERT OR IGNORE INTO usage_costs (category, rate, type) VALUES (?1, ?2, ?3)",
            params![category, rate, kind.as_str()],
        )?;
    }

    Ok(())
}

// ============================================================================
// ROSTER
// ============================================================================

/// All units with their tenant (if any), ordered property then unit
pub fn list_units(conn: &Connection) -> Result<Vec<UnitRecord>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.unit_number, u.property, u.address,
                t.id, t.name, t.current_balance
         FROM units u
         LEFT JOIN tenants t ON u.id = t.unit_id
         ORDER BY u.property, u.unit_number",
    )?;

    let units = stmt
        .query_map([], |row| {
            let property_name: String = row.get(2)?;
            Ok(UnitRecord {
                id: row.get(0)?,
                unit_number: row.get(1)?,
                property: Property::from_name(&property_name)
                    .ok_or(rusqlite::Error::InvalidQuery)?,
                address: row.get(3)?,
                tenant_id: row.get(4)?,
                tenant_name: row.get(5)?,
                current_balance: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(units)
}

pub fn find_unit_id(conn: &Connection, unit_number: &str) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM units WHERE unit_number = ?1")?;
    let mut rows = stmt.query_map(params![unit_number], |row| row.get(0))?;
    Ok(rows.next().transpose()?)
}

/// Assign a tenant to a unit, replacing any prior occupant.
///
/// A unit holds at most one active tenant; writing a new name deletes the
/// old record (and its balance) and starts fresh at 0. An empty name just
/// clears the unit. Returns the new tenant id, or None when cleared.
pub fn assign_tenant(conn: &Connection, unit_id: i64, name: &str) -> Result<Option<i64>> {
    conn.execute("DELETE FROM tenants WHERE unit_id = ?1", params![unit_id])?;

    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    conn.execute(
        "INSERT INTO tenants (unit_id, name) VALUES (?1, ?2)",
        params![unit_id, trimmed],
    )?;
    Ok(Some(conn.last_insert_rowid()))
}

/// Direct balance overwrite (operator correction, not a bill commit)
pub fn set_balance(conn: &Connection, tenant_id: i64, balance: f64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE tenants SET current_balance = ?1 WHERE id = ?2",
        params![balance, tenant_id],
    )?;
    if updated == 0 {
        bail!("no tenant with id {}", tenant_id);
    }
    Ok(())
}

// ============================================================================
// RATES
// ============================================================================

pub fn list_rates(conn: &Connection) -> Result<Vec<RateEntry>> {
    let mut stmt = conn.prepare("SELECT id, category, rate, type FROM usage_costs ORDER BY id")?;

    let rates = stmt
        .query_map([], |row| {
            let kind: String = row.get(3)?;
            Ok(RateEntry {
                id: row.get(0)?,
                category: row.get(1)?,
                rate: row.get(2)?,
                kind: RateKind::from_str(&kind).ok_or(rusqlite::Error::InvalidQuery)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rates)
}

pub fn update_rate(conn: &Connection, rate_id: i64, rate: f64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE usage_costs SET rate = ?1 WHERE id = ?2",
        params![rate, rate_id],
    )?;
    if updated == 0 {
        bail!("no rate category with id {}", rate_id);
    }
    Ok(())
}

// ============================================================================
// PAYMENTS + FETCH LOG
// ============================================================================

pub fn list_payments(conn: &Connection) -> Result<Vec<Payment>> {
    let mut stmt = conn
        .prepare("SELECT id, tenant_id, amount, date FROM payments ORDER BY date DESC, id DESC")?;

    let payments = stmt
        .query_map([], |row| {
            Ok(Payment {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                amount: row.get(2)?,
                date: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(payments)
}

pub fn insert_fetch_log(conn: &Connection, log: &FetchLog) -> Result<()> {
    conn.execute(
        "INSERT INTO fetch_logs (run_id, start_date, end_date, status, message)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            log.run_id,
            log.start_date,
            log.end_date,
            log.status,
            log.message
        ],
    )?;
    Ok(())
}

pub fn parse_stored_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT).with_context(|| format!("bad stored date: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_seeds_roster_and_rates() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let units = list_units(&conn).unwrap();
        assert_eq!(units.len(), 14, "fixed 14-unit roster");
        assert!(units.iter().all(|u| u.tenant_id.is_none()));

        let champions: Vec<_> = units
            .iter()
            .filter(|u| u.property == Property::Champion)
            .map(|u| u.unit_number.as_str())
            .collect();
        assert_eq!(champions, vec!["484", "486"]);

        let rates = list_rates(&conn).unwrap();
        assert_eq!(rates.len(), 6);
        assert_eq!(rates[0].category, "Water Rate");
        assert_eq!(rates[0].rate, 3.52);
        assert_eq!(rates[0].kind, RateKind::PerCcf);

        // Setup is idempotent: a second run adds nothing
        setup_database(&conn).unwrap();
        assert_eq!(list_units(&conn).unwrap().len(), 14);
        assert_eq!(list_rates(&conn).unwrap().len(), 6);
    }

    #[test]
    fn test_assign_tenant_replaces_prior_occupant() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let unit_id = find_unit_id(&conn, "483").unwrap().unwrap();

        let first = assign_tenant(&conn, unit_id, "Alice Smith").unwrap().unwrap();
        set_balance(&conn, first, 55.5).unwrap();

        // Reassigning deletes the old record and resets the balance
        let second = assign_tenant(&conn, unit_id, "Bob Jones").unwrap().unwrap();
        assert_ne!(first, second);

        let units = list_units(&conn).unwrap();
        let unit = units.iter().find(|u| u.unit_number == "483").unwrap();
        assert_eq!(unit.tenant_name.as_deref(), Some("Bob Jones"));
        assert_eq!(unit.current_balance, Some(0.0));

        // Blank name clears the unit
        assert!(assign_tenant(&conn, unit_id, "  ").unwrap().is_none());
        let units = list_units(&conn).unwrap();
        let unit = units.iter().find(|u| u.unit_number == "483").unwrap();
        assert!(unit.tenant_id.is_none());
    }

    #[test]
    fn test_update_rate() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let rates = list_rates(&conn).unwrap();
        let water = rates.iter().find(|r| r.category == "Water Rate").unwrap();

        update_rate(&conn, water.id, 3.75).unwrap();
        let rates = list_rates(&conn).unwrap();
        let water = rates.iter().find(|r| r.category == "Water Rate").unwrap();
        assert_eq!(water.rate, 3.75);

        assert!(update_rate(&conn, 9999, 1.0).is_err(), "unknown id rejected");
    }

    #[test]
    fn test_fetch_log_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_fetch_log(
            &conn,
            &FetchLog {
                run_id: "run-1".to_string(),
                start_date: "2025-05-26".to_string(),
                end_date: "2025-06-24".to_string(),
                status: "ok".to_string(),
                message: "4 files".to_string(),
            },
        )
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM fetch_logs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
