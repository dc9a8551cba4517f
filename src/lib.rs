// Water Billing System - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod properties;
pub mod db;
pub mod parser;
pub mod usage;
pub mod ingest;
pub mod billing;
pub mod ledger;

// Re-export commonly used types
pub use properties::{detect_property, Property, PropertyConfig, PROPERTY_CONFIGS};
pub use db::{
    assign_tenant, find_unit_id, insert_fetch_log, list_payments, list_rates, list_units,
    set_balance, setup_database, update_rate, FetchLog, Payment, UnitRecord,
};
pub use parser::{parse_usage_export, parse_usage_reader, DailySample, UsageExport};
pub use usage::{
    purge_usage, query_usage, sum_gallons_by_unit, upsert_usage, viewer_snapshot, UsageMatrix,
    UsageRow, RETENTION_DAYS,
};
pub use ingest::{
    collect_billing_files, default_billing_period, ingest_directory, BillingInputs, IngestFailure,
    IngestSummary,
};
pub use billing::{
    gallons_to_ccf, BillingEngine, BillingPeriod, ChargeBreakdown, ComputedBill, RateEntry,
    RateKind, RateTable, GALLONS_PER_CCF,
};
pub use ledger::{commit_many, commit_one, record_payment, CommitFailure, CommitOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
