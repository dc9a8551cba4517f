// Only compile the viewer module when the TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};

use water_billing::{
    collect_billing_files, ingest_directory, list_rates, list_units, purge_usage, BillingEngine,
    BillingPeriod, ComputedBill, RateTable, RETENTION_DAYS,
};

const DB_PATH: &str = "bills.db";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init") => run_init(),
        Some("ingest") => {
            let dir = args
                .get(2)
                .context("usage: water-billing ingest <export-dir>")?;
            run_ingest(Path::new(dir))
        }
        Some("bills") => run_bills(&args[2..]),
        Some("purge") => run_purge(),
        Some("viewer") | None => run_viewer(),
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  water-billing init                         Create and seed the database");
    eprintln!("  water-billing ingest <export-dir>          Load meter exports into the usage window");
    eprintln!("  water-billing bills --files <csv>...       Compute bills from export files");
    eprintln!("  water-billing bills --range <start> <end>  Compute bills from stored usage (YYYY-MM-DD)");
    eprintln!("  water-billing purge                        Drop samples older than {} days", RETENTION_DAYS);
    eprintln!("  water-billing viewer                       Browse the usage window (default)");
}

fn open_db() -> Result<Connection> {
    let path = Path::new(DB_PATH);
    if !path.exists() {
        bail!("Database not found. Run: water-billing init");
    }
    Connection::open(path).context("Failed to open database")
}

fn run_init() -> Result<()> {
    println!("💧 Water Billing - Database Setup");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = Connection::open(DB_PATH)?;
    water_billing::setup_database(&conn)?;

    let units = list_units(&conn)?;
    let rates = list_rates(&conn)?;
    println!("✓ Database ready at {}", DB_PATH);
    println!("✓ {} units across 4 properties", units.len());
    println!("✓ {} charge categories", rates.len());

    Ok(())
}

fn run_ingest(dir: &Path) -> Result<()> {
    println!("🚚 Ingesting meter exports from {}", dir.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_db()?;
    let today = Local::now().date_naive();
    let summary = ingest_directory(&conn, dir, today)?;

    println!(
        "✓ Processed {}/{} files",
        summary.files_processed, summary.files_found
    );
    println!("✓ Stored {} samples", summary.samples_stored);
    if summary.samples_skipped > 0 {
        println!("  Skipped {} samples with no roster unit", summary.samples_skipped);
    }
    if let (Some(start), Some(end)) = (summary.realized_start, summary.realized_end) {
        println!("✓ Realized range: {} to {}", start, end);
    }
    println!("✓ Purged {} samples outside the {}-day window", summary.purged, RETENTION_DAYS);

    if summary.is_partial() {
        println!("\n⚠ {} source(s) failed:", summary.failures.len());
        for failure in &summary.failures {
            println!("  {} - {}", failure.source, failure.reason);
        }
    }

    Ok(())
}

fn run_bills(args: &[String]) -> Result<()> {
    let conn = open_db()?;
    let engine = BillingEngine::new(RateTable::new(list_rates(&conn)?));
    let units = list_units(&conn)?;

    let (bills, defaulted) = match args.first().map(|s| s.as_str()) {
        Some("--files") => {
            let paths: Vec<PathBuf> = args[1..].iter().map(PathBuf::from).collect();
            if paths.is_empty() {
                bail!("usage: water-billing bills --files <csv>...");
            }
            let inputs = collect_billing_files(&paths)?;
            let bills = engine.compute_bills(&units, &inputs.gallons_by_unit, &inputs.period);
            (bills, inputs.period_defaulted)
        }
        Some("--range") => {
            let start = parse_date_arg(args.get(1))?;
            let end = parse_date_arg(args.get(2))?;
            let period = BillingPeriod::new(start, end)?;
            let gallons = water_billing::sum_gallons_by_unit(&conn, start, end)?;
            (engine.compute_bills(&units, &gallons, &period), false)
        }
        _ => bail!("usage: water-billing bills --files <csv>... | --range <start> <end>"),
    };

    print_bills(&bills, defaulted);
    Ok(())
}

fn parse_date_arg(arg: Option<&String>) -> Result<NaiveDate> {
    let s = arg.context("expected a date argument (YYYY-MM-DD)")?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("bad date: {}", s))
}

fn print_bills(bills: &[ComputedBill], period_defaulted: bool) {
    if let Some(first) = bills.first() {
        println!(
            "💧 Bills for {} - {} ({} days){}",
            first.period_start,
            first.period_end,
            first.billing_days,
            if period_defaulted { "  ⚠ default period" } else { "" }
        );
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "{:<10} {:<12} {:<20} {:>8} {:>10} {:>10} {:>10}",
        "Unit", "Property", "Tenant", "CCF", "Charges", "Previous", "Total"
    );

    // Presentation is the only place amounts are rounded
    for bill in bills {
        println!(
            "{:<10} {:<12} {:<20} {:>8.2} {:>10.2} {:>10.2} {:>10.2}",
            bill.unit_number,
            bill.property.name(),
            bill.tenant_name,
            bill.ccf_usage,
            bill.new_charges,
            bill.previous_balance,
            bill.total_amount
        );
    }

    let total: f64 = bills.iter().map(|b| b.new_charges).sum();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ {} bills, {:.2} in new charges", bills.len(), total);
}

fn run_purge() -> Result<()> {
    let conn = open_db()?;
    let today = Local::now().date_naive();
    let deleted = purge_usage(&conn, RETENTION_DAYS, today)?;
    println!("✓ Purged {} samples older than {} days", deleted, RETENTION_DAYS);
    Ok(())
}

#[cfg(feature = "tui")]
fn run_viewer() -> Result<()> {
    let conn = open_db()?;
    let today = chrono::Local::now().date_naive();
    let matrix = water_billing::viewer_snapshot(&conn, RETENTION_DAYS, today)?;

    if matrix.dates.is_empty() {
        println!("No usage samples stored yet. Run: water-billing ingest <export-dir>");
        return Ok(());
    }

    println!("📊 Usage window: {} days, {} units", matrix.dates.len(), matrix.units.len());
    println!("Starting viewer... (Press 'q' to quit)\n");

    let mut app = ui::App::new(matrix);
    ui::run_ui(&mut app)?;

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_viewer() -> Result<()> {
    eprintln!("❌ Viewer not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin billing-server --features server");
    std::process::exit(1);
}
