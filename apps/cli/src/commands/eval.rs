//! `softlabel eval`: score saved predictions against soft targets.

use super::matrix::{read_matrix, read_owners};
use anyhow::{Context, Result, bail};
use colored::Colorize;
use comfy_table::{Cell, Color as ComfyColor, Table};
use softlabel_training::{MetricsReport, OwnerAggregator, OwnerTargetPolicy, evaluate, softmax};
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct EvalOptions<'a> {
    pub owners: Option<&'a Path>,
    /// Reject owners whose rows carry different targets.
    pub validate_owners: bool,
    pub logits: bool,
    pub json: bool,
}

pub fn execute(predictions: &Path, targets: &Path, options: &EvalOptions<'_>) -> Result<()> {
    let EvalOptions { owners, validate_owners, logits, json } = *options;
    let mut preds = read_matrix(predictions)?;
    let targets = read_matrix(targets)?;
    if logits {
        preds = softmax(&preds);
    }
    if preds.dim() != targets.dim() {
        bail!("predictions are {:?} but targets are {:?}", preds.dim(), targets.dim());
    }

    let (preds, targets, groups) = if let Some(path) = owners {
        let owners = read_owners(path)?;
        let policy = if validate_owners { OwnerTargetPolicy::Validate } else { OwnerTargetPolicy::LastWins };
        let mut aggregator = OwnerAggregator::new(policy);
        aggregator.extend(&owners, &preds, &targets).context("Failed to group predictions by owner")?;
        let grouped = aggregator.finish();
        tracing::info!(rows = owners.len(), owners = grouped.owners.len(), "aggregated predictions by owner");
        (grouped.probs, grouped.targets, Some(grouped.owners.len()))
    } else {
        (preds, targets, None)
    };

    let report = evaluate(&preds, &targets).context("Failed to evaluate predictions")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report, preds.nrows(), groups);
    Ok(())
}

fn print_report(report: &MetricsReport, rows: usize, groups: Option<usize>) {
    let scope = groups.map_or_else(|| format!("{rows} samples"), |g| format!("{g} owners"));
    println!("{}", format!("Distribution metrics ({scope})").bold().green());

    let mut table = Table::new();
    table.set_header(vec!["Metric", "Value"]);
    for (name, value) in report.entries() {
        let cell = if value.is_nan() { Cell::new("n/a").fg(ComfyColor::Yellow) } else { Cell::new(format!("{value:.6}")) };
        table.add_row(vec![Cell::new(name).fg(ComfyColor::Cyan), cell]);
    }
    println!("{table}");
}
