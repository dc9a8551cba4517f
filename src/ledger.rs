// ⚖️ Balance Ledger - Apply reviewed bills and payments to tenant balances
//
// Bills are computed, previewed, and only then committed; this module is
// the commit side. Each commit is a single read-modify-write UPDATE so two
// commits against the same tenant cannot interleave mid-update.

use crate::billing::ComputedBill;
use anyhow::{bail, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

// ============================================================================
// BILL COMMITS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFailure {
    pub unit_number: String,
    pub tenant_name: String,
    pub reason: String,
}

/// Outcome of a batch commit. Best-effort by contract: bills that applied
/// stay applied even when later ones fail, and any failure makes the whole
/// batch report failure. Callers show the itemized list to the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub applied: usize,
    pub failures: Vec<CommitFailure>,
}

impl CommitOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Add one accepted bill's new charges to its tenant's running balance.
///
/// Rejected without touching anything when the bill has no tenant or a
/// non-finite charge amount.
pub fn commit_one(conn: &Connection, bill: &ComputedBill) -> Result<()> {
    let tenant_id = match bill.tenant_id {
        Some(id) => id,
        None => bail!("bill for unit {} has no tenant", bill.unit_number),
    };
    if !bill.new_charges.is_finite() {
        bail!(
            "bill for unit {} has a non-numeric charge amount",
            bill.unit_number
        );
    }

    let updated = conn.execute(
        "UPDATE tenants SET current_balance = current_balance + ?1 WHERE id = ?2",
        params![bill.new_charges, tenant_id],
    )?;
    if updated == 0 {
        bail!(
            "tenant {} for unit {} no longer exists",
            tenant_id,
            bill.unit_number
        );
    }

    Ok(())
}

/// Commit a reviewed batch, continuing past individual failures.
pub fn commit_many(conn: &Connection, bills: &[ComputedBill]) -> CommitOutcome {
    let mut outcome = CommitOutcome {
        applied: 0,
        failures: Vec::new(),
    };

    for bill in bills {
        match commit_one(conn, bill) {
            Ok(()) => outcome.applied += 1,
            Err(e) => outcome.failures.push(CommitFailure {
                unit_number: bill.unit_number.clone(),
                tenant_name: bill.tenant_name.clone(),
                reason: format!("{:#}", e),
            }),
        }
    }

    outcome
}

// ============================================================================
// PAYMENTS
// ============================================================================

/// Record a payment and decrement the tenant's balance.
/// The payments table is append-only; corrections are new entries.
pub fn record_payment(
    conn: &Connection,
    tenant_id: i64,
    amount: f64,
    date: NaiveDate,
) -> Result<i64> {
    if !amount.is_finite() {
        bail!("payment amount must be a number");
    }

    conn.execute(
        "INSERT INTO payments (tenant_id, amount, date) VALUES (?1, ?2, ?3)",
        params![tenant_id, amount, date.format(crate::db::DATE_FMT).to_string()],
    )?;
    let payment_id = conn.last_insert_rowid();

    let updated = conn.execute(
        "UPDATE tenants SET current_balance = current_balance - ?1 WHERE id = ?2",
        params![amount, tenant_id],
    )?;
    if updated == 0 {
        bail!("no tenant with id {}", tenant_id);
    }

    Ok(payment_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{gallons_to_ccf, BillingEngine, BillingPeriod, RateTable};
    use crate::db::{assign_tenant, find_unit_id, list_units, set_balance, setup_database};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn period() -> BillingPeriod {
        BillingPeriod::new(
            NaiveDate::from_ymd_opt(2025, 5, 26).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 24).unwrap(),
        )
        .unwrap()
    }

    fn balance_of(conn: &Connection, unit_number: &str) -> Option<f64> {
        list_units(conn)
            .unwrap()
            .into_iter()
            .find(|u| u.unit_number == unit_number)
            .and_then(|u| u.current_balance)
    }

    /// Occupy a unit and return a computed bill for it
    fn billed_unit(conn: &Connection, unit_number: &str, name: &str) -> ComputedBill {
        let unit_id = find_unit_id(conn, unit_number).unwrap().unwrap();
        let tenant_id = assign_tenant(conn, unit_id, name).unwrap().unwrap();
        set_balance(conn, tenant_id, 10.0).unwrap();

        let engine = BillingEngine::new(RateTable::new(crate::db::list_rates(conn).unwrap()));
        let units = list_units(conn).unwrap();
        let unit = units.iter().find(|u| u.unit_number == unit_number).unwrap();
        engine.compute_bill(unit, gallons_to_ccf(748.0), &period(), 10.0)
    }

    #[test]
    fn test_commit_one_adds_new_charges() {
        let conn = test_conn();
        let bill = billed_unit(&conn, "483", "Alice Smith");

        commit_one(&conn, &bill).unwrap();

        let balance = balance_of(&conn, "483").unwrap();
        assert!((balance - (10.0 + bill.new_charges)).abs() < 1e-9);
    }

    #[test]
    fn test_commit_one_rejects_tenantless_bill() {
        let conn = test_conn();
        let mut bill = billed_unit(&conn, "483", "Alice Smith");
        bill.tenant_id = None;

        assert!(commit_one(&conn, &bill).is_err());
        assert_eq!(balance_of(&conn, "483"), Some(10.0), "balance untouched");
    }

    #[test]
    fn test_commit_many_is_best_effort_and_reports_failure() {
        let conn = test_conn();
        let good_a = billed_unit(&conn, "483", "Alice Smith");
        let mut bad = billed_unit(&conn, "485", "Bob Jones");
        let good_b = billed_unit(&conn, "487", "Cara Lee");
        bad.tenant_id = None;

        let outcome = commit_many(&conn, &[good_a.clone(), bad, good_b.clone()]);

        assert!(!outcome.is_success(), "one bad bill fails the batch status");
        assert_eq!(outcome.applied, 2, "the other bills still applied");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].unit_number, "485");

        // Applied commits are not rolled back
        assert!(balance_of(&conn, "483").unwrap() > 10.0);
        assert!(balance_of(&conn, "487").unwrap() > 10.0);
        assert_eq!(balance_of(&conn, "485"), Some(10.0));
    }

    #[test]
    fn test_double_commit_doubles_balance_delta() {
        // Commits are plain read-modify-writes; committing twice charges twice
        let conn = test_conn();
        let bill = billed_unit(&conn, "489", "Dana Fox");

        commit_one(&conn, &bill).unwrap();
        commit_one(&conn, &bill).unwrap();

        let balance = balance_of(&conn, "489").unwrap();
        assert!((balance - (10.0 + 2.0 * bill.new_charges)).abs() < 1e-9);
    }

    #[test]
    fn test_record_payment_decrements_balance() {
        let conn = test_conn();
        let unit_id = find_unit_id(&conn, "532B").unwrap().unwrap();
        let tenant_id = assign_tenant(&conn, unit_id, "Eve Green").unwrap().unwrap();
        set_balance(&conn, tenant_id, 120.0).unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let payment_id = record_payment(&conn, tenant_id, 45.5, date).unwrap();
        assert!(payment_id > 0);

        assert_eq!(balance_of(&conn, "532B"), Some(74.5));

        let payments = crate::db::list_payments(&conn).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount, 45.5);
        assert_eq!(payments[0].date, "2025-07-01");
    }
}
