//! Reading numeric CSV input.

use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array2};
use std::path::Path;

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

/// Parse one record. A record whose cells are all empty yields no values;
/// an empty cell next to filled ones is an error.
fn parse_row(record: &csv::StringRecord, path: &Path, line: usize) -> Result<Vec<f64>> {
    if record.iter().all(str::is_empty) {
        return Ok(Vec::new());
    }
    record
        .iter()
        .enumerate()
        .map(|(col, field)| {
            if field.is_empty() {
                bail!("{} line {}: empty value in column {}", path.display(), line, col + 1);
            }
            field
                .parse::<f64>()
                .with_context(|| format!("{} line {}: not a number: {field:?}", path.display(), line))
        })
        .collect()
}

/// Load a headerless CSV file as an N×C matrix; every row must have C values.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (idx, record) in reader(path)?.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read {}", path.display()))?;
        let row = parse_row(&record, path, idx + 1)?;
        if row.is_empty() {
            continue;
        }
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                bail!("{} line {}: expected {} values, found {}", path.display(), idx + 1, first.len(), row.len());
            }
        }
        rows.push(row);
    }

    let cols = rows.first().map_or(0, Vec::len);
    if rows.is_empty() {
        bail!("{} contains no rows", path.display());
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((flat.len() / cols, cols), flat).context("Failed to build matrix")
}

/// Load every value of a CSV file in reading order.
pub fn read_vector(path: &Path) -> Result<Array1<f64>> {
    let mut values = Vec::new();
    for (idx, record) in reader(path)?.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read {}", path.display()))?;
        values.extend(parse_row(&record, path, idx + 1)?);
    }
    if values.is_empty() {
        bail!("{} contains no values", path.display());
    }
    Ok(Array1::from(values))
}

/// One owner per non-empty line.
pub fn read_owners(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(ToString::to_string).collect())
}
