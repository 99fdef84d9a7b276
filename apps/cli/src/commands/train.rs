//! `softlabel train`: run the feature-head backend from a config file.

use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Color as ComfyColor, Table};
use softlabel_training::{
    FeatureHeadTrainer, RunLayout, RunManifest, RunSpec, StopReason, Trainer, TracingProgressSink, TrainingConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub async fn execute(config_path: &Path, output_dir: Option<PathBuf>, epochs: Option<usize>, json: bool) -> Result<()> {
    let mut config = TrainingConfig::load_from_file(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    config.apply_env_overrides()?;
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }
    if let Some(epochs) = epochs {
        config.epochs = epochs;
    }
    config.validate().context("Invalid training config")?;

    let spec = RunSpec::new(config);
    let trainer = FeatureHeadTrainer::new();
    tracing::info!(run_id = %spec.run_id, backend = trainer.id(), "starting training run");

    trainer.prepare(&spec).await?;
    let manifest = trainer.run(&spec, Arc::new(TracingProgressSink)).await.context("Training run failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    let run_dir = RunLayout::new(spec.config.output_dir.clone()).run_dir(&spec.run_id);
    print_summary(&manifest, &run_dir);
    Ok(())
}

fn print_summary(manifest: &RunManifest, run_dir: &Path) {
    let reason = match manifest.stop_reason {
        StopReason::MaxEpochs => "reached max epochs",
        StopReason::EarlyStopped => "stopped early",
    };
    println!("{}", format!("Run {} finished ({reason})", manifest.run_id).bold().green());
    println!("  Epochs:    {}", manifest.metrics.epochs_run);
    match (manifest.metrics.best_epoch, manifest.metrics.best_val_loss) {
        (Some(epoch), Some(loss)) => println!("  Best:      epoch {epoch}, val kl {loss:.6}"),
        _ => println!("  Best:      {}", "no checkpoint saved".yellow()),
    }
    println!("  Directory: {}", run_dir.display().to_string().cyan());

    let (Some(train), Some(val)) = (&manifest.metrics.train, &manifest.metrics.val) else {
        return;
    };
    let mut table = Table::new();
    table.set_header(vec!["Metric", "Train", "Val"]);
    for ((name, t), (_, v)) in train.entries().into_iter().zip(val.entries()) {
        table.add_row(vec![
            Cell::new(name).fg(ComfyColor::Cyan),
            Cell::new(format!("{t:.6}")),
            Cell::new(format!("{v:.6}")),
        ]);
    }
    println!("{table}");
}
