//! `softlabel weights`: per-class loss weights from label frequencies.

use super::matrix::read_vector;
use anyhow::{Result, bail};
use colored::Colorize;
use comfy_table::Table;
use serde::Serialize;
use softlabel_training::class_weights;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ClassWeight {
    class: usize,
    frequency: f64,
    weight: f64,
}

pub fn execute(frequencies: &Path, gamma: f64, json: bool) -> Result<()> {
    if !(gamma > 0.0 && gamma <= 1.0) {
        bail!("gamma must be in (0, 1], got {gamma}");
    }
    let freqs = read_vector(frequencies)?;
    if freqs.iter().any(|f| !f.is_finite() || *f < 0.0) {
        bail!("frequencies must be finite and non-negative");
    }

    let weights = class_weights(&freqs, gamma);
    let rows: Vec<ClassWeight> = freqs
        .iter()
        .zip(weights.iter())
        .enumerate()
        .map(|(class, (&frequency, &weight))| ClassWeight { class, frequency, weight })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{}", format!("Class weights (gamma = {gamma})").bold().green());
    let mut table = Table::new();
    table.set_header(vec!["Class", "Frequency", "Weight"]);
    for row in &rows {
        table.add_row(vec![row.class.to_string(), row.frequency.to_string(), format!("{:.6}", row.weight)]);
    }
    println!("{table}");
    Ok(())
}
