// 💧 Billing Engine - Usage + rates + period -> one computed bill per unit
//
// Pure computation: the engine never touches storage. Callers resolve the
// roster, the rate snapshot, the usage map, and the billing period, and the
// engine turns those into ComputedBill values for the operator to review.
// Nothing is persisted here; accepted bills go through the ledger commit.

use crate::db::UnitRecord;
use crate::properties::Property;
use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 1 CCF (hundred cubic feet) = 748 gallons
pub const GALLONS_PER_CCF: f64 = 748.0;

/// Exact conversion; rounding happens only at presentation time
pub fn gallons_to_ccf(gallons: f64) -> f64 {
    gallons / GALLONS_PER_CCF
}

// ============================================================================
// RATE TABLE
// ============================================================================

/// Charge category names as seeded in the usage_costs table
pub const WATER_RATE: &str = "Water Rate";
pub const SEWER_RATE: &str = "Sewer Rate";
pub const WATER_BASE: &str = "Water Base";
pub const STORMWATER: &str = "Stormwater";
pub const SEWER_BASE: &str = "Sewer Base";
pub const RIVER_FUND: &str = "Clean River Fund";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    PerCcf,
    PerDay,
}

impl RateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateKind::PerCcf => "per_ccf",
            RateKind::PerDay => "per_day",
        }
    }

    pub fn from_str(s: &str) -> Option<RateKind> {
        match s {
            "per_ccf" => Some(RateKind::PerCcf),
            "per_day" => Some(RateKind::PerDay),
            _ => None,
        }
    }
}

/// One named charge category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateEntry {
    pub id: i64,
    pub category: String,
    pub rate: f64,
    #[serde(rename = "type")]
    pub kind: RateKind,
}

/// Read-only rate snapshot the engine computes against.
///
/// Lookups never fail: an absent category resolves to 0 so a misconfigured
/// rate table degrades a charge to zero instead of aborting the bill run.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    entries: Vec<RateEntry>,
}

impl RateTable {
    pub fn new(entries: Vec<RateEntry>) -> Self {
        RateTable { entries }
    }

    pub fn rate(&self, category: &str) -> f64 {
        self.entries
            .iter()
            .find(|e| e.category == category)
            .map(|e| e.rate)
            .unwrap_or(0.0)
    }

    pub fn entries(&self) -> &[RateEntry] {
        &self.entries
    }
}

// ============================================================================
// BILLING PERIOD
// ============================================================================

/// Inclusive date range a bill covers.
///
/// Both endpoints count toward billing_days (utility convention): a period
/// of 2025-05-26 to 2025-06-24 is 30 billing days, not 29.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    /// The one structural validation in the engine: an inverted range is a
    /// malformed request and fails before any per-unit work starts.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<BillingPeriod> {
        if end < start {
            bail!("invalid billing period: end {} is before start {}", end, start);
        }
        Ok(BillingPeriod { start, end })
    }

    pub fn billing_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// MM/DD/YYYY display form used on rendered bills
    pub fn display_start(&self) -> String {
        self.start.format("%m/%d/%Y").to_string()
    }

    pub fn display_end(&self) -> String {
        self.end.format("%m/%d/%Y").to_string()
    }
}

// ============================================================================
// COMPUTED BILL
// ============================================================================

/// Engine output for one unit. Ephemeral until the operator commits it.
///
/// Currency fields are raw f64 sums; the renderer formats to two decimals.
/// `water_rate`/`sewer_rate` are the per-CCF rates as charged (those are
/// never doubled), while the four per-day amounts are post-doubling charges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputedBill {
    pub tenant_id: Option<i64>,
    pub tenant_name: String,
    pub unit_number: String,
    pub property: Property,
    pub address: String,
    pub period_start: String,
    pub period_end: String,
    pub ccf_usage: f64,
    pub billing_days: i64,
    pub water_rate: f64,
    pub sewer_rate: f64,
    pub water_usage: f64,
    pub water_base: f64,
    pub stormwater: f64,
    pub sewer_usage: f64,
    pub sewer_base: f64,
    pub river_fund: f64,
    pub new_charges: f64,
    pub previous_balance: f64,
    pub total_amount: f64,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The six charge amounts for one unit, before balance rollover
#[derive(Debug, Clone)]
pub struct ChargeBreakdown {
    pub water_rate: f64,
    pub sewer_rate: f64,
    pub water_usage: f64,
    pub water_base: f64,
    pub stormwater: f64,
    pub sewer_usage: f64,
    pub sewer_base: f64,
    pub river_fund: f64,
    pub new_charges: f64,
}

pub struct BillingEngine {
    rates: RateTable,
}

impl BillingEngine {
    pub fn new(rates: RateTable) -> Self {
        BillingEngine { rates }
    }

    /// The one place charges are calculated. Every billing path (export
    /// files, stored date range, re-pricing a previous preview) resolves
    /// its own (ccf_usage, billing_days) pair and comes through here.
    pub fn price(&self, property: Property, ccf_usage: f64, billing_days: i64) -> ChargeBreakdown {
        let water_rate = self.rates.rate(WATER_RATE);
        let sewer_rate = self.rates.rate(SEWER_RATE);
        let mut water_base_rate = self.rates.rate(WATER_BASE);
        let mut stormwater_rate = self.rates.rate(STORMWATER);
        let mut sewer_base_rate = self.rates.rate(SEWER_BASE);
        let mut river_fund_rate = self.rates.rate(RIVER_FUND);

        // Champion units pay double the flat daily charges. Fixed business
        // rule; the per-CCF rates are never doubled.
        if property == Property::Champion {
            water_base_rate *= 2.0;
            stormwater_rate *= 2.0;
            sewer_base_rate *= 2.0;
            river_fund_rate *= 2.0;
        }

        let water_usage = ccf_usage * water_rate;
        let sewer_usage = ccf_usage * sewer_rate;
        let water_base = water_base_rate * billing_days as f64;
        let stormwater = stormwater_rate * billing_days as f64;
        let sewer_base = sewer_base_rate * billing_days as f64;
        let river_fund = river_fund_rate * billing_days as f64;

        let new_charges =
            water_usage + sewer_usage + water_base + stormwater + sewer_base + river_fund;

        ChargeBreakdown {
            water_rate,
            sewer_rate,
            water_usage,
            water_base,
            stormwater,
            sewer_usage,
            sewer_base,
            river_fund,
            new_charges,
        }
    }

    /// Compute one bill for a roster unit.
    ///
    /// Missing data never fails a unit: no usage, no tenant, and absent
    /// rate categories all degrade to zero-valued fields.
    pub fn compute_bill(
        &self,
        unit: &UnitRecord,
        ccf_usage: f64,
        period: &BillingPeriod,
        previous_balance: f64,
    ) -> ComputedBill {
        let billing_days = period.billing_days();
        let charges = self.price(unit.property, ccf_usage, billing_days);

        ComputedBill {
            tenant_id: unit.tenant_id,
            tenant_name: unit
                .tenant_name
                .clone()
                .unwrap_or_else(|| "No Tenant".to_string()),
            unit_number: unit.unit_number.clone(),
            property: unit.property,
            address: unit.address.clone(),
            period_start: period.display_start(),
            period_end: period.display_end(),
            ccf_usage,
            billing_days,
            water_rate: charges.water_rate,
            sewer_rate: charges.sewer_rate,
            water_usage: charges.water_usage,
            water_base: charges.water_base,
            stormwater: charges.stormwater,
            sewer_usage: charges.sewer_usage,
            sewer_base: charges.sewer_base,
            river_fund: charges.river_fund,
            new_charges: charges.new_charges,
            previous_balance,
            total_amount: previous_balance + charges.new_charges,
        }
    }

    /// Recompute a previously previewed bill against the current rate
    /// snapshot, keeping its identity, period, usage, and balance as-is.
    pub fn reprice(&self, bill: &ComputedBill) -> ComputedBill {
        let charges = self.price(bill.property, bill.ccf_usage, bill.billing_days);

        ComputedBill {
            water_rate: charges.water_rate,
            sewer_rate: charges.sewer_rate,
            water_usage: charges.water_usage,
            water_base: charges.water_base,
            stormwater: charges.stormwater,
            sewer_usage: charges.sewer_usage,
            sewer_base: charges.sewer_base,
            river_fund: charges.river_fund,
            new_charges: charges.new_charges,
            total_amount: bill.previous_balance + charges.new_charges,
            ..bill.clone()
        }
    }

    /// Compute a bill for every roster unit from a per-unit gallons map.
    /// Units missing from the map bill at zero usage.
    pub fn compute_bills(
        &self,
        units: &[UnitRecord],
        gallons_by_unit: &HashMap<String, f64>,
        period: &BillingPeriod,
    ) -> Vec<ComputedBill> {
        units
            .iter()
            .map(|unit| {
                let gallons = gallons_by_unit
                    .get(&unit.unit_number)
                    .copied()
                    .unwrap_or(0.0);
                let previous_balance = unit.current_balance.unwrap_or(0.0);
                self.compute_bill(unit, gallons_to_ccf(gallons), period, previous_balance)
            })
            .collect()
    }
}
