//! Softlabel CLI - train and evaluate soft-label distribution models
//!
//! Provides the `softlabel` command: run a training job from a config file,
//! score saved predictions against soft targets, and inspect class weights.

mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{eval, train, weights};

/// Softlabel - soft-label distribution training toolkit
#[derive(Parser, Debug)]
#[command(name = "softlabel", author, version, about = "Train and evaluate soft-label distribution models")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the feature head described by a run config
    ///
    /// Writes the CSV log, best checkpoint, resolved config and manifest to
    /// `<output_dir>/<run_id>/`.
    Train {
        /// Run config (TOML, or JSON with a .json extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Override the output directory from the config
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Override the maximum number of epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Print the run manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score predicted distributions against soft targets
    ///
    /// Both inputs are headerless CSV matrices with one sample per row.
    Eval {
        /// Predicted probabilities (or logits with --logits)
        #[arg(short, long)]
        predictions: PathBuf,

        /// Target distributions
        #[arg(short, long)]
        targets: PathBuf,

        /// Owner per row, one per line; predictions are averaged per owner
        #[arg(long)]
        owners: Option<PathBuf>,

        /// Fail when rows of one owner carry different targets instead of
        /// keeping the last one
        #[arg(long, requires = "owners")]
        validate_owners: bool,

        /// Apply a row-wise softmax to the predictions first
        #[arg(long)]
        logits: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute per-class loss weights from label frequencies
    Weights {
        /// Per-class frequencies (CSV, all values read in order)
        #[arg(short, long)]
        frequencies: PathBuf,

        /// Rare-class emphasis exponent, in (0, 1]
        #[arg(short, long, default_value = "0.5")]
        gamma: f64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder().with_max_level(level).with_target(false).with_writer(std::io::stderr);
    if args.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.without_time().finish())?;
    }

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Train { config, output_dir, epochs, json } => {
            train::execute(&config, output_dir, epochs, json).await?;
        }
        Command::Eval { predictions, targets, owners, validate_owners, logits, json } => {
            let options = eval::EvalOptions { owners: owners.as_deref(), validate_owners, logits, json };
            eval::execute(&predictions, &targets, &options)?;
        }
        Command::Weights { frequencies, gamma, json } => {
            weights::execute(&frequencies, gamma, json)?;
        }
    }

    Ok(())
}
