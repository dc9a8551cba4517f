// 🚚 Ingestion Orchestrator - Export files -> rolling usage window
//
// Two entry points with deliberately different failure policies:
//   - ingest_directory: the automated batch path. One bad file is logged
//     and counted, the rest of the properties still land, and the run is
//     summarized for the operator instead of thrown.
//   - collect_billing_files: the on-demand billing path. The operator
//     picked these exact files, so any read or parse error aborts the
//     whole request.

use crate::billing::BillingPeriod;
use crate::db::{find_unit_id, insert_fetch_log, FetchLog, DATE_FMT};
use crate::parser::parse_usage_export;
use crate::properties::detect_property;
use crate::usage::{purge_usage, upsert_usage, RETENTION_DAYS};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Last-resort billing period when no uploaded file carries a usable
/// marker row. Known limitation carried over from the manual process;
/// callers surface `period_defaulted` so the operator sees it happened.
pub fn default_billing_period() -> BillingPeriod {
    BillingPeriod {
        start: NaiveDate::from_ymd_opt(2025, 5, 26).expect("valid default period start"),
        end: NaiveDate::from_ymd_opt(2025, 6, 24).expect("valid default period end"),
    }
}

// ============================================================================
// BATCH INGESTION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFailure {
    pub source: String,
    pub reason: String,
}

/// Outcome of one ingestion run. Partial success is normal: failures are
/// itemized here, never thrown past the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub run_id: String,
    pub files_found: usize,
    pub files_processed: usize,
    pub samples_stored: usize,
    pub samples_skipped: usize,
    /// Min/max sample dates actually stored; may be narrower than the
    /// requested window when sources have gaps
    pub realized_start: Option<NaiveDate>,
    pub realized_end: Option<NaiveDate>,
    pub purged: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestSummary {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn status(&self) -> &'static str {
        if self.failures.is_empty() {
            "ok"
        } else if self.files_processed > 0 {
            "partial"
        } else {
            "failed"
        }
    }
}

/// Ingest every CSV export in a directory into the usage store.
///
/// The target window is [today - 65, today - 1]; today is never ingested
/// because yesterday is the most recent day with complete meter data.
/// Samples outside the window are ignored. After all sources are
/// processed the store is purged to the retention window and the run is
/// recorded in fetch_logs. Re-running the same directory is safe: the
/// store upserts on (unit, date).
pub fn ingest_directory(conn: &Connection, dir: &Path, today: NaiveDate) -> Result<IngestSummary> {
    let window_start = today - Duration::days(RETENTION_DAYS);
    let window_end = today - Duration::days(1);

    let mut csv_files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read export directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .collect();
    csv_files.sort();

    let mut summary = IngestSummary {
        run_id: uuid::Uuid::new_v4().to_string(),
        files_found: csv_files.len(),
        files_processed: 0,
        samples_stored: 0,
        samples_skipped: 0,
        realized_start: None,
        realized_end: None,
        purged: 0,
        failures: Vec::new(),
    };

    for path in &csv_files {
        let source = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv")
            .to_string();

        match ingest_one_file(conn, path, window_start, window_end, &mut summary) {
            Ok(()) => summary.files_processed += 1,
            Err(e) => {
                eprintln!("⚠ Skipping {}: {:#}", source, e);
                summary.failures.push(IngestFailure {
                    source,
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    summary.purged = purge_usage(conn, RETENTION_DAYS, today)?;

    insert_fetch_log(
        conn,
        &FetchLog {
            run_id: summary.run_id.clone(),
            start_date: window_start.format(DATE_FMT).to_string(),
            end_date: window_end.format(DATE_FMT).to_string(),
            status: summary.status().to_string(),
            message: format!(
                "{}/{} files, {} samples stored, {} failures",
                summary.files_processed,
                summary.files_found,
                summary.samples_stored,
                summary.failures.len()
            ),
        },
    )?;

    Ok(summary)
}

fn ingest_one_file(
    conn: &Connection,
    path: &Path,
    window_start: NaiveDate,
    window_end: NaiveDate,
    summary: &mut IngestSummary,
) -> Result<()> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let property = detect_property(filename)
        .with_context(|| format!("filename matches no known property: {}", filename))?;

    let export = parse_usage_export(path, property)?;

    for sample in &export.samples {
        if sample.date < window_start || sample.date > window_end {
            continue;
        }
        match find_unit_id(conn, &sample.unit_number)? {
            Some(unit_id) => {
                upsert_usage(conn, unit_id, sample.date, sample.gallons)?;
                summary.samples_stored += 1;
                summary.realized_start = Some(match summary.realized_start {
                    Some(d) if d <= sample.date => d,
                    _ => sample.date,
                });
                summary.realized_end = Some(match summary.realized_end {
                    Some(d) if d >= sample.date => d,
                    _ => sample.date,
                });
            }
            None => {
                // Mapped code with no roster row; count it, keep going
                summary.samples_skipped += 1;
            }
        }
    }

    Ok(())
}

// ============================================================================
// ON-DEMAND BILLING FILES
// ============================================================================

/// Resolved inputs for a billing run driven by uploaded export files
#[derive(Debug, Clone)]
pub struct BillingInputs {
    /// Merged per-unit gallons from every file's Total marker row
    pub gallons_by_unit: HashMap<String, f64>,
    pub period: BillingPeriod,
    /// True when no file carried a usable marker and the fixed default
    /// period was substituted
    pub period_defaulted: bool,
}

/// Strict variant: parse the operator's chosen files, abort on the first
/// unreadable or unmappable one. The last usable period marker wins when
/// several files carry one.
pub fn collect_billing_files(paths: &[PathBuf]) -> Result<BillingInputs> {
    let mut gallons_by_unit = HashMap::new();
    let mut period = None;

    for path in paths {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let property = detect_property(filename)
            .with_context(|| format!("filename matches no known property: {}", filename))?;

        let export = parse_usage_export(path, property)?;
        gallons_by_unit.extend(export.totals);
        period = export.period.or(period);
    }

    let period_defaulted = period.is_none();
    if period_defaulted {
        eprintln!("⚠ No billing period marker in any file, falling back to the default period");
    }

    Ok(BillingInputs {
        gallons_by_unit,
        period: period.unwrap_or_else(default_billing_period),
        period_defaulted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::usage::query_usage;
    use std::io::Write;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn champion_csv(dates: &[(&str, f64, f64)]) -> String {
        let mut out = String::from("Date (America/New_York),484 (gal),486 (gal)\n");
        for (date, a, b) in dates {
            out.push_str(&format!("{},{},{}\n", date, a, b));
        }
        out.push_str("Total 5/26/2025 - 6/24/2025,1496,748\n");
        out
    }

    #[test]
    fn test_ingest_directory_partial_success() {
        let conn = test_conn();
        let dir = std::env::temp_dir().join(format!("ingest-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let today = d(2025, 6, 25);
        write_file(
            &dir,
            "CHAMPION_export.csv",
            &champion_csv(&[("6/20/2025", 100.0, 200.0), ("6/21/2025", 110.0, 210.0)]),
        );
        write_file(&dir, "mystery_building.csv", "Date,X (gal)\n6/20/2025,5\n");

        let summary = ingest_directory(&conn, &dir, today).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(summary.files_found, 2);
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.samples_stored, 4);
        assert_eq!(summary.failures.len(), 1, "bad file is reported, not thrown");
        assert!(summary.failures[0].source.contains("mystery"));
        assert_eq!(summary.status(), "partial");
        assert_eq!(summary.realized_start, Some(d(2025, 6, 20)));
        assert_eq!(summary.realized_end, Some(d(2025, 6, 21)));

        let rows = query_usage(&conn, d(2025, 6, 20), d(2025, 6, 21)).unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_ingest_window_excludes_today() {
        let conn = test_conn();
        let dir = std::env::temp_dir().join(format!("ingest-window-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        // One sample for "today", one for yesterday, one beyond retention
        let today = d(2025, 6, 25);
        write_file(
            &dir,
            "CHAMPION_export.csv",
            &champion_csv(&[
                ("6/25/2025", 1.0, 1.0),
                ("6/24/2025", 2.0, 2.0),
                ("4/1/2025", 3.0, 3.0),
            ]),
        );

        let summary = ingest_directory(&conn, &dir, today).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(summary.samples_stored, 2, "only yesterday's rows land");
        assert_eq!(summary.realized_start, Some(d(2025, 6, 24)));
        assert_eq!(summary.realized_end, Some(d(2025, 6, 24)));
    }

    #[test]
    fn test_reingest_same_directory_is_idempotent() {
        let conn = test_conn();
        let dir = std::env::temp_dir().join(format!("ingest-idem-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let today = d(2025, 6, 25);
        write_file(
            &dir,
            "CHAMPION_export.csv",
            &champion_csv(&[("6/20/2025", 100.0, 200.0)]),
        );

        let first = ingest_directory(&conn, &dir, today).unwrap();
        let second = ingest_directory(&conn, &dir, today).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(first.samples_stored, 2);
        assert_eq!(second.samples_stored, 2);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM water_usage", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2, "re-run does not duplicate rows");

        let rows = query_usage(&conn, d(2025, 6, 20), d(2025, 6, 20)).unwrap();
        assert!(rows.iter().all(|r| r.gallons == 100.0 || r.gallons == 200.0));
    }

    #[test]
    fn test_collect_billing_files_aborts_on_bad_file() {
        let dir = std::env::temp_dir().join(format!("billing-strict-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let good = write_file(
            &dir,
            "CHAMPION_export.csv",
            &champion_csv(&[("6/20/2025", 100.0, 200.0)]),
        );
        let bad = dir.join("532_BARNETT_export.csv"); // never created

        let result = collect_billing_files(&[good.clone(), bad]);
        assert!(result.is_err(), "missing file aborts the whole request");

        // The good file alone works and carries its marker period
        let inputs = collect_billing_files(&[good]).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert!(!inputs.period_defaulted);
        assert_eq!(inputs.period.billing_days(), 30);
        assert_eq!(inputs.gallons_by_unit.get("484"), Some(&1496.0));
        assert_eq!(inputs.gallons_by_unit.get("486"), Some(&748.0));
    }

    #[test]
    fn test_collect_billing_files_defaults_period_when_no_marker() {
        let dir = std::env::temp_dir().join(format!("billing-default-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let path = write_file(
            &dir,
            "CUSHING_export.csv",
            "Date (America/New_York),A (gal)\n6/20/2025,55\n",
        );

        let inputs = collect_billing_files(&[path]).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert!(inputs.period_defaulted);
        assert_eq!(inputs.period, default_billing_period());
        assert_eq!(inputs.period.billing_days(), 30);
        assert!(
            inputs.gallons_by_unit.is_empty(),
            "no marker row means no billing totals"
        );
    }
}
