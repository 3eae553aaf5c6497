//! CLI entry point for the late-fusion training pipeline.
//!
//! Subcommands:
//!   train    -- Train, calibrate and persist one fusion model
//!   ablate   -- Train audio-only, text-only and fusion models and summarize
//!   predict  -- Score a JSON feature map with a trained artifact

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use emofuse_core::FeatureMode;
use emofuse_fusion::FusionRuntime;
use emofuse_training::ablation::run_ablation;
use emofuse_training::config::{load_config, RunConfig};
use emofuse_training::training::trainer::{train_from_paths, SplitPaths, TrainConfig};

#[derive(Parser)]
#[command(name = "train-fusion", about = "Late-fusion emotion classifier training pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train, calibrate and persist one fusion model.
    Train {
        /// YAML run configuration; flags below override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        splits: SplitArgs,

        /// Output directory for the model, scaler, report and confusion matrices.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Feature columns to train on.
        #[arg(long)]
        mode: Option<FeatureMode>,

        #[command(flatten)]
        hyper: HyperArgs,
    },

    /// Train every feature mode on the same splits and write a summary.
    Ablate {
        #[command(flatten)]
        splits: SplitArgs,

        /// Root directory; each mode trains in its own sub-directory.
        #[arg(long)]
        output_root: PathBuf,

        #[command(flatten)]
        hyper: HyperArgs,
    },

    /// Score a JSON object of `{feature_name: value}` with a trained model.
    Predict {
        /// Directory holding fusion_model.safetensors and feature_scaler.json.
        #[arg(long)]
        model_dir: PathBuf,

        /// JSON file with the feature map.
        #[arg(long)]
        features: PathBuf,
    },
}

#[derive(Args)]
struct SplitArgs {
    /// Training feature table (CSV).
    #[arg(long)]
    train_features: Option<PathBuf>,

    /// Validation feature table (CSV).
    #[arg(long)]
    val_features: Option<PathBuf>,

    /// Optional held-out test feature table (CSV).
    #[arg(long)]
    test_features: Option<PathBuf>,
}

#[derive(Args)]
struct HyperArgs {
    /// Hidden layer width; 0 trains a linear classifier.
    #[arg(long)]
    hidden_size: Option<usize>,

    /// Dropout after the hidden activation.
    #[arg(long)]
    dropout: Option<f32>,

    /// Maximum training epochs.
    #[arg(long)]
    epochs: Option<usize>,

    /// Mini-batch size.
    #[arg(long)]
    batch_size: Option<usize>,

    /// AdamW learning rate.
    #[arg(long)]
    learning_rate: Option<f64>,

    /// AdamW weight decay.
    #[arg(long)]
    weight_decay: Option<f64>,

    /// Early stopping patience (epochs without improvement).
    #[arg(long)]
    patience: Option<usize>,

    /// Shuffle seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Compute device: auto, cpu, cuda or metal.
    #[arg(long)]
    device: Option<String>,

    /// Iteration budget for temperature fitting.
    #[arg(long)]
    calibration_max_iter: Option<usize>,
}

impl HyperArgs {
    fn apply(self, config: &mut TrainConfig) {
        if let Some(v) = self.hidden_size {
            config.hidden_size = v;
        }
        if let Some(v) = self.dropout {
            config.dropout = v;
        }
        if let Some(v) = self.epochs {
            config.max_epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.weight_decay {
            config.weight_decay = v;
        }
        if let Some(v) = self.patience {
            config.patience = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.device {
            config.device = v;
        }
        if let Some(v) = self.calibration_max_iter {
            config.calibration_max_iter = v;
        }
    }
}

impl SplitArgs {
    fn into_paths(self, base: Option<SplitPaths>) -> anyhow::Result<SplitPaths> {
        let (train, val, test) = match base {
            Some(b) => (Some(b.train), Some(b.val), b.test),
            None => (None, None, None),
        };
        Ok(SplitPaths {
            train: self
                .train_features
                .or(train)
                .context("--train-features is required")?,
            val: self
                .val_features
                .or(val)
                .context("--val-features is required")?,
            test: self.test_features.or(test),
        })
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Train {
            config,
            splits,
            output_dir,
            mode,
            hyper,
        } => {
            let file: Option<RunConfig> = config.as_deref().map(load_config).transpose()?;
            let mut train_config = file.as_ref().map(|f| f.training.clone()).unwrap_or_default();
            if let Some(mode) = mode {
                train_config.mode = mode;
            }
            hyper.apply(&mut train_config);

            let output_dir = output_dir
                .or_else(|| file.as_ref().map(|f| f.output_dir.clone()))
                .context("--output-dir is required")?;
            let paths = splits.into_paths(file.as_ref().map(RunConfig::split_paths))?;

            let report = train_from_paths(&train_config, &paths, &output_dir)?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "output_dir": output_dir,
                "best_epoch": report.best_epoch,
                "temperature": report.temperature,
            }))?);
        }

        Command::Ablate {
            splits,
            output_root,
            hyper,
        } => {
            let mut base = TrainConfig::default();
            hyper.apply(&mut base);
            let paths = splits.into_paths(None)?;
            let summary = run_ablation(&base, &paths, &output_root)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Predict {
            model_dir,
            features,
        } => {
            let runtime = FusionRuntime::load(&model_dir)
                .with_context(|| format!("failed to load model from {}", model_dir.display()))?;
            let contents = std::fs::read_to_string(&features)
                .with_context(|| format!("failed to read {}", features.display()))?;
            let map: HashMap<String, f64> =
                serde_json::from_str(&contents).context("feature file must be a JSON object of numbers")?;
            let prediction = runtime.predict(&map)?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
    }
    Ok(())
}
