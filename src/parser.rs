// 📄 Usage Export Parser - Meter-portal CSV -> gallons per unit + period
//
// One export file covers one property: a date/marker column plus one
// "<code> (gal)" column per unit. The closing "Total M/D/YYYY - M/D/YYYY"
// marker row carries both the billing period and the per-unit totals; the
// dated rows above it are the daily readings the rolling store ingests.

use crate::billing::BillingPeriod;
use crate::properties::Property;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Export date format ("6/3/2025" or "06/03/2025")
const EXPORT_DATE_FMT: &str = "%m/%d/%Y";

/// One dated reading for one unit
#[derive(Debug, Clone, PartialEq)]
pub struct DailySample {
    pub unit_number: String,
    pub date: NaiveDate,
    pub gallons: f64,
}

/// Everything extracted from one property's export
#[derive(Debug, Clone)]
pub struct UsageExport {
    pub property: Property,
    pub source_file: String,
    /// From the Total marker row; None when the marker is missing/malformed
    pub period: Option<BillingPeriod>,
    /// Per-unit gallons from the Total marker row, keyed by roster unit number
    pub totals: HashMap<String, f64>,
    /// Daily readings from the dated rows
    pub samples: Vec<DailySample>,
    /// Gallons columns whose code is outside the property's allowed set
    pub skipped_columns: Vec<String>,
}

/// Parse one export file for a known property
pub fn parse_usage_export(file_path: &Path, property: Property) -> Result<UsageExport> {
    let file = File::open(file_path)
        .with_context(|| format!("Failed to open usage export: {}", file_path.display()))?;
    let source_file = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.csv")
        .to_string();
    parse_usage_reader(file, property, &source_file)
}

/// Parse an export from any reader (exposed for tests and uploads)
pub fn parse_usage_reader<R: Read>(
    reader: R,
    property: Property,
    source_file: &str,
) -> Result<UsageExport> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read CSV header in {}", source_file))?
        .clone();

    let date_col = headers
        .iter()
        .position(|h| h.to_lowercase().starts_with("date"))
        .with_context(|| format!("No date column in {}", source_file))?;

    // Resolve gallons columns up front: (column index, roster unit number).
    // Codes outside the property's allowed set are dropped with a warning,
    // never an error; a stray column must not sink the whole file.
    let config = property.config();
    let mut gal_columns: Vec<(usize, String)> = Vec::new();
    let mut skipped_columns = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if !header.contains("(gal)") {
            continue;
        }
        let raw_code = header.replace("(gal)", "").trim().to_string();
        if raw_code.contains("Property Total") {
            continue;
        }
        match config.map_unit_code(&raw_code) {
            Some(unit_number) => gal_columns.push((idx, unit_number)),
            None => {
                eprintln!(
                    "⚠ {}: column '{}' is not a {} unit, skipping",
                    source_file, raw_code, property
                );
                skipped_columns.push(raw_code);
            }
        }
    }

    let mut period = None;
    let mut totals = HashMap::new();
    let mut samples = Vec::new();

    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| {
            format!("Failed to parse CSV line {} in {}", line_num + 2, source_file)
        })?;

        let date_cell = record.get(date_col).unwrap_or("").trim();

        if date_cell.contains("Property Total") {
            continue;
        }

        if date_cell.contains("Total") {
            // Marker row: billing period + per-unit totals
            period = parse_total_marker(date_cell).or(period);
            for (idx, unit_number) in &gal_columns {
                if let Some(gallons) = parse_gallons_cell(record.get(*idx)) {
                    totals.insert(unit_number.clone(), gallons);
                }
            }
            continue;
        }

        if let Ok(date) = NaiveDate::parse_from_str(date_cell, EXPORT_DATE_FMT) {
            for (idx, unit_number) in &gal_columns {
                if let Some(gallons) = parse_gallons_cell(record.get(*idx)) {
                    samples.push(DailySample {
                        unit_number: unit_number.clone(),
                        date,
                        gallons,
                    });
                }
            }
        }
        // Anything else (blank separators, footers) is ignored
    }

    Ok(UsageExport {
        property,
        source_file: source_file.to_string(),
        period,
        totals,
        samples,
        skipped_columns,
    })
}

/// Parse "Total 5/26/2025 - 6/24/2025" into a billing period.
/// Any deviation leaves the period undetermined for this file.
fn parse_total_marker(cell: &str) -> Option<BillingPeriod> {
    let rest = cell.trim().strip_prefix("Total")?.trim();
    let (start_str, end_str) = rest.split_once('-')?;
    let start = NaiveDate::parse_from_str(start_str.trim(), EXPORT_DATE_FMT).ok()?;
    let end = NaiveDate::parse_from_str(end_str.trim(), EXPORT_DATE_FMT).ok()?;
    BillingPeriod::new(start, end).ok()
}

/// Empty cells and unparseable values are dropped cell-by-cell
fn parse_gallons_cell(cell: Option<&str>) -> Option<f64> {
    let trimmed = cell?.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAMPION_CSV: &str = "\
Date (America/New_York),484 (gal),486 (gal),Property Total (gal)
6/1/2025,120.5,85,205.5
6/2/2025,98,,98
6/3/2025,110.25,90.75,201
Property Total,328.75,175.75,504.5
Total 5/26/2025 - 6/24/2025,1496,748,2244
";

    #[test]
    fn test_parse_champion_export() {
        let export =
            parse_usage_reader(CHAMPION_CSV.as_bytes(), Property::Champion, "CHAMPION.csv")
                .unwrap();

        let period = export.period.expect("marker row present");
        assert_eq!(period.billing_days(), 30);
        assert_eq!(period.display_start(), "05/26/2025");

        assert_eq!(export.totals.get("484"), Some(&1496.0));
        assert_eq!(export.totals.get("486"), Some(&748.0));
        assert_eq!(export.totals.len(), 2, "Property Total column is ignored");

        // 3 dated rows, one empty cell dropped
        assert_eq!(export.samples.len(), 5);
        assert!(export.samples.contains(&DailySample {
            unit_number: "484".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            gallons: 98.0,
        }));
        let june_2 = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert!(
            !export
                .samples
                .iter()
                .any(|s| s.unit_number == "486" && s.date == june_2),
            "empty cell yields no sample"
        );
    }

    #[test]
    fn test_532_barnett_codes_are_rewritten() {
        let csv = "\
Date (America/New_York),A (gal),B (gal),C (gal),D (gal)
6/1/2025,10,20,30,40
Total 5/26/2025 - 6/24/2025,310,620,930,1240
";
        let export =
            parse_usage_reader(csv.as_bytes(), Property::Barnett532, "532_BARNETT.csv").unwrap();

        assert_eq!(export.totals.get("532A"), Some(&310.0));
        assert_eq!(export.totals.get("532D"), Some(&1240.0));
        assert!(export.samples.iter().all(|s| s.unit_number.starts_with("532")));
    }

    #[test]
    fn test_foreign_unit_column_is_dropped_with_warning() {
        let csv = "\
Date (America/New_York),484 (gal),999 (gal)
6/1/2025,50,60
Total 5/26/2025 - 6/24/2025,50,60
";
        let export =
            parse_usage_reader(csv.as_bytes(), Property::Champion, "CHAMPION.csv").unwrap();

        assert_eq!(export.skipped_columns, vec!["999".to_string()]);
        assert_eq!(export.totals.len(), 1);
        assert!(export.totals.contains_key("484"));
    }

    #[test]
    fn test_malformed_marker_leaves_period_undetermined() {
        let csv = "\
Date (America/New_York),484 (gal)
6/1/2025,50
Total sometime in June,50
";
        let export =
            parse_usage_reader(csv.as_bytes(), Property::Champion, "CHAMPION.csv").unwrap();

        assert!(export.period.is_none());
        // The marker row's gallons still count as totals
        assert_eq!(export.totals.get("484"), Some(&50.0));
    }

    #[test]
    fn test_unparseable_cell_drops_cell_not_row() {
        let csv = "\
Date (America/New_York),484 (gal),486 (gal)
6/1/2025,not-a-number,75
";
        let export =
            parse_usage_reader(csv.as_bytes(), Property::Champion, "CHAMPION.csv").unwrap();

        assert_eq!(export.samples.len(), 1);
        assert_eq!(export.samples[0].unit_number, "486");
        assert_eq!(export.samples[0].gallons, 75.0);
    }

    #[test]
    fn test_total_marker_variants() {
        assert!(parse_total_marker("Total 5/26/2025 - 6/24/2025").is_some());
        assert!(parse_total_marker("Total 05/26/2025-06/24/2025").is_some());
        assert!(parse_total_marker("Total").is_none());
        assert!(parse_total_marker("Total 5/26/2025").is_none());
        // Inverted range is as undetermined as no range
        assert!(parse_total_marker("Total 6/24/2025 - 5/26/2025").is_none());
    }

    #[test]
    fn test_missing_date_column_is_an_error() {
        let csv = "Unit,Gallons\n484,50\n";
        let result = parse_usage_reader(csv.as_bytes(), Property::Champion, "CHAMPION.csv");
        assert!(result.is_err());
    }
}
