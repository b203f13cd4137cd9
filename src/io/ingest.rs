//! Measurement file ingest.
//!
//! Efficiency files carry four columns per row
//! (`energy`, `energy_err`, `eff`, `eff_err`), normalization files two
//! (`value`, `error`). Two layouts are accepted:
//!
//! - whitespace separated, lines starting with `#` are comments
//! - CSV, optionally with a header row naming the columns
//!
//! Bad rows are skipped and reported, never silently dropped. A missing
//! normalization file means "no normalization data for this source".

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{info, warn};

use crate::domain::{EfficiencyPoint, MeasurementSet, NormalizationPoint};
use crate::error::AppError;

const EFFICIENCY_COLUMNS: [&str; 4] = ["energy", "energy_err", "eff", "eff_err"];
const NORMALIZATION_COLUMNS: [&str; 2] = ["value", "error"];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// What happened while reading one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub path: PathBuf,
    pub rows_read: usize,
    pub rows_used: usize,
    pub row_errors: Vec<RowError>,
}

/// Ingest output: the measurement set plus per-file reports.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub set: MeasurementSet,
    pub efficiency_files: Vec<FileReport>,
    /// `None` where the normalization file was missing or not given.
    pub normalization_files: Vec<Option<FileReport>>,
}

/// Parsed rows of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable<T> {
    pub rows: Vec<T>,
    pub rows_read: usize,
    pub row_errors: Vec<RowError>,
}

/// Load every source. Normalization file `i` belongs to efficiency file `i`.
pub fn load_measurements(efficiency: &[PathBuf], normalization: &[PathBuf]) -> Result<IngestedData, AppError> {
    if efficiency.is_empty() {
        return Err(AppError::new(2, "At least one efficiency file (-e) is required."));
    }
    if normalization.len() > efficiency.len() {
        return Err(AppError::new(
            2,
            format!(
                "Too many normalization files: {} given for {} efficiency files.",
                normalization.len(),
                efficiency.len()
            ),
        ));
    }
    if normalization.len() < efficiency.len() {
        warn!(
            "{} efficiency files but only {} normalization files; remaining sources have no normalization data",
            efficiency.len(),
            normalization.len()
        );
    }

    let mut eff_lists = Vec::with_capacity(efficiency.len());
    let mut efficiency_files = Vec::with_capacity(efficiency.len());
    for path in efficiency {
        let text = fs::read_to_string(path)
            .map_err(|e| AppError::new(2, format!("Failed to open efficiency file '{}': {e}", path.display())))?;
        let table = parse_efficiency(&text)?;
        if table.rows.is_empty() {
            return Err(AppError::new(
                3,
                format!("No valid rows in efficiency file '{}'.", path.display()),
            ));
        }
        info!("opened efficiency file {} ({} rows)", path.display(), table.rows.len());
        efficiency_files.push(report(path, &table));
        eff_lists.push(table.rows);
    }

    let mut norm_lists = Vec::with_capacity(normalization.len());
    let mut normalization_files = Vec::with_capacity(efficiency.len());
    for (i, path) in normalization.iter().enumerate() {
        match read_optional(path)? {
            Some(text) => {
                let table = parse_normalization(&text)?;
                info!("opened normalization file {} ({} rows)", path.display(), table.rows.len());
                normalization_files.push(Some(report(path, &table)));
                norm_lists.push(table.rows);
            }
            None => {
                warn!(
                    "could not open {}; assuming no normalization data for source #{i}",
                    path.display()
                );
                normalization_files.push(None);
                norm_lists.push(Vec::new());
            }
        }
    }
    normalization_files.resize(efficiency.len(), None);

    let set = MeasurementSet::from_columns(eff_lists, norm_lists)?;
    Ok(IngestedData {
        set,
        efficiency_files,
        normalization_files,
    })
}

pub fn parse_efficiency(text: &str) -> Result<ParsedTable<EfficiencyPoint>, AppError> {
    let table = parse_table(text, &EFFICIENCY_COLUMNS)?;
    Ok(map_rows(table, |v| EfficiencyPoint::new(v[0], v[1], v[2], v[3])))
}

pub fn parse_normalization(text: &str) -> Result<ParsedTable<NormalizationPoint>, AppError> {
    let table = parse_table(text, &NORMALIZATION_COLUMNS)?;
    Ok(map_rows(table, |v| NormalizationPoint::new(v[0], v[1])))
}

fn read_optional(path: &Path) -> Result<Option<String>, AppError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::new(
            2,
            format!("Failed to read normalization file '{}': {e}", path.display()),
        )),
    }
}

fn report<T>(path: &Path, table: &ParsedTable<T>) -> FileReport {
    for err in &table.row_errors {
        warn!("{}:{}: {}", path.display(), err.line, err.message);
    }
    FileReport {
        path: path.to_path_buf(),
        rows_read: table.rows_read,
        rows_used: table.rows.len(),
        row_errors: table.row_errors.clone(),
    }
}

fn map_rows<T>(table: ParsedTable<Vec<f64>>, f: impl Fn(&[f64]) -> T) -> ParsedTable<T> {
    ParsedTable {
        rows: table.rows.iter().map(|v| f(v)).collect(),
        rows_read: table.rows_read,
        row_errors: table.row_errors,
    }
}

/// Parse a numeric table with the given column names, in either layout.
fn parse_table(text: &str, columns: &[&str]) -> Result<ParsedTable<Vec<f64>>, AppError> {
    let first = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'));
    match first {
        Some(line) if line.contains(',') => parse_csv(text, columns),
        _ => Ok(parse_whitespace(text, columns)),
    }
}

fn parse_whitespace(text: &str, columns: &[&str]) -> ParsedTable<Vec<f64>> {
    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        rows_read += 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        match parse_fields(&fields, columns) {
            Ok(v) => rows.push(v),
            Err(message) => row_errors.push(RowError { line: idx + 1, message }),
        }
    }

    ParsedTable {
        rows,
        rows_read,
        row_errors,
    }
}

fn parse_csv(text: &str, columns: &[&str]) -> Result<ParsedTable<Vec<f64>>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut order: Option<Vec<usize>> = None;

    for (idx, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                rows_read += 1;
                row_errors.push(RowError {
                    line: idx + 1,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        let line = record.position().map_or(idx + 1, |p| p.line() as usize);

        // A first record that does not start with a number is a header row.
        if order.is_none() && is_header(&record) {
            order = Some(column_order(&record, columns)?);
            continue;
        }
        let order = order.get_or_insert_with(|| (0..columns.len()).collect());

        rows_read += 1;
        let fields: Vec<&str> = order.iter().map(|&i| record.get(i).unwrap_or("")).collect();
        match parse_fields(&fields, columns) {
            Ok(v) => rows.push(v),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    Ok(ParsedTable {
        rows,
        rows_read,
        row_errors,
    })
}

fn is_header(record: &StringRecord) -> bool {
    record
        .get(0)
        .is_some_and(|f| f.trim_start_matches('\u{feff}').parse::<f64>().is_err())
}

fn column_order(headers: &StringRecord, columns: &[&str]) -> Result<Vec<usize>, AppError> {
    let header_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect();
    columns
        .iter()
        .map(|name| {
            header_map
                .get(*name)
                .copied()
                .ok_or_else(|| AppError::new(2, format!("Missing required column: `{name}`")))
        })
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn parse_fields(fields: &[&str], columns: &[&str]) -> Result<Vec<f64>, String> {
    if fields.len() < columns.len() {
        return Err(format!("expected {} columns, found {}", columns.len(), fields.len()));
    }
    columns
        .iter()
        .zip(fields)
        .map(|(name, raw)| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("invalid `{name}` value '{raw}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("geff-ingest-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn whitespace_layout_with_comments() {
        let text = "# E dE eff deff\n121.8 0.1 0.52 0.01\n\n344.3\t0.1  0.21 0.005\n";
        let table = parse_efficiency(text).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], EfficiencyPoint::new(344.3, 0.1, 0.21, 0.005));
        assert!(table.row_errors.is_empty());
    }

    #[test]
    fn bad_rows_are_reported_with_line_numbers() {
        let text = "121.8 0.1 0.52 0.01\n244.7 0.1 abc 0.01\n344.3 0.1\n";
        let table = parse_efficiency(text).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows_read, 3);
        let lines: Vec<usize> = table.row_errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn csv_with_reordered_headers_and_bom() {
        let text = "\u{feff}eff,eff_err,energy,energy_err\n0.52,0.01,121.8,0.1\n0.21,0.005,344.3,0.1\n";
        let table = parse_efficiency(text).unwrap();
        assert_eq!(table.rows[0], EfficiencyPoint::new(121.8, 0.1, 0.52, 0.01));
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn csv_without_headers_uses_column_order() {
        let table = parse_normalization("1.02,0.03\n0.98,0.04\n").unwrap();
        assert_eq!(table.rows, vec![NormalizationPoint::new(1.02, 0.03), NormalizationPoint::new(0.98, 0.04)]);
    }

    #[test]
    fn csv_missing_column_is_an_input_error() {
        let err = parse_normalization("value,err\n1.0,0.1\n").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_normalization_file_means_no_data() {
        let dir = scratch_dir("missing-norm");
        let eff = dir.join("eff0.dat");
        fs::write(&eff, "121.8 0.1 0.52 0.01\n344.3 0.1 0.21 0.005\n").unwrap();
        let data = load_measurements(&[eff.clone(), eff], &[dir.join("does-not-exist.dat")]).unwrap();
        assert_eq!(data.set.len(), 2);
        assert!(!data.set.has_normalization());
        assert_eq!(data.normalization_files, vec![None, None]);
    }

    #[test]
    fn too_many_normalization_files_is_rejected() {
        let dir = scratch_dir("too-many");
        let eff = dir.join("eff0.dat");
        fs::write(&eff, "121.8 0.1 0.52 0.01\n").unwrap();
        let err = load_measurements(&[eff.clone()], &[eff.clone(), eff]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn empty_efficiency_file_is_a_data_error() {
        let dir = scratch_dir("empty");
        let eff = dir.join("eff0.dat");
        fs::write(&eff, "# nothing here\n").unwrap();
        let err = load_measurements(&[eff], &[]).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
