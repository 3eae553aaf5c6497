//! Training loop for the fusion classifier with early stopping.
//!
//! `seed` fixes the initial weights, the per-epoch shuffle and the dropout
//! masks, so a run is reproducible on a given device.
//!
//! Each epoch shuffles the training split, takes one AdamW step per
//! mini-batch on cross-entropy, then scores the validation split without
//! dropout. The weights of the epoch with the highest validation macro-F1 are
//! snapshotted; ties keep the earlier epoch. After the loop the snapshot is
//! restored, a temperature is fitted on its validation logits, and the
//! artifact plus report are written to the output directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Tensor};
use candle_nn::{Optimizer, VarMap};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use emofuse_core::{EmoFuseError, FeatureMode, Result, CANONICAL_EMOTIONS};
use emofuse_fusion::artifact::FORMAT_VERSION;
use emofuse_fusion::calibration::{fit_temperature, nll_at_temperature, DEFAULT_MAX_ITER};
use emofuse_fusion::device::{device_name, resolve_device};
use emofuse_fusion::evaluation::predictions;
use emofuse_fusion::{
    softmax, Architecture, ArtifactStore, ClassificationMetrics, ConfusionMatrix, FusionClassifier,
    ModelMetadata, Scaler,
};

use crate::training::data::{check_label_coverage, load_feature_table, to_tensors, FeatureTable, TrainingBatches};
use crate::training::report::{EpochRecord, TrainReport, TEST_CONFUSION_FILE, VAL_CONFUSION_FILE};

/// Training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub mode: FeatureMode,
    /// 0 trains a linear classifier.
    pub hidden_size: usize,
    pub dropout: f32,
    pub max_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub patience: usize,
    pub seed: u64,
    pub calibration_max_iter: usize,
    /// `auto`, `cpu`, `cuda` or `metal`.
    pub device: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            mode: FeatureMode::Fusion,
            hidden_size: 64,
            dropout: 0.2,
            max_epochs: 80,
            batch_size: 128,
            learning_rate: 2e-3,
            weight_decay: 1e-4,
            patience: 12,
            seed: 42,
            calibration_max_iter: DEFAULT_MAX_ITER,
            device: "auto".to_string(),
        }
    }
}

impl TrainConfig {
    /// Reject hyperparameters no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        let problem = if self.batch_size == 0 {
            Some("batch_size must be > 0".to_string())
        } else if !(0.0..1.0).contains(&self.dropout) {
            Some(format!("dropout must be in [0, 1), got {}", self.dropout))
        } else if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            Some(format!("learning_rate must be > 0, got {}", self.learning_rate))
        } else if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            Some(format!("weight_decay must be >= 0, got {}", self.weight_decay))
        } else if self.patience == 0 {
            Some("patience must be > 0".to_string())
        } else {
            None
        };
        match problem {
            Some(msg) => Err(EmoFuseError::Config(msg)),
            None => Ok(()),
        }
    }
}

/// Feature-table paths for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPaths {
    pub train: PathBuf,
    pub val: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<PathBuf>,
}

/// Loaded train/validation/optional test tables.
#[derive(Debug, Clone)]
pub struct TrainingSplits {
    pub train: FeatureTable,
    pub val: FeatureTable,
    pub test: Option<FeatureTable>,
}

impl TrainingSplits {
    /// Load every split with the columns of `mode`.
    pub fn load(paths: &SplitPaths, mode: FeatureMode) -> Result<Self> {
        Ok(Self {
            train: load_feature_table(&paths.train, mode)?,
            val: load_feature_table(&paths.val, mode)?,
            test: paths
                .test
                .as_deref()
                .map(|p| load_feature_table(p, mode))
                .transpose()?,
        })
    }
}

/// Load the splits named in `paths` and train.
pub fn train_from_paths(config: &TrainConfig, paths: &SplitPaths, output_dir: &Path) -> Result<TrainReport> {
    let splits = TrainingSplits::load(paths, config.mode)?;
    train(config, &splits, output_dir)
}

/// Run the full pipeline: fit scaler, train with early stopping, calibrate,
/// evaluate and persist.
pub fn train(config: &TrainConfig, splits: &TrainingSplits, output_dir: &Path) -> Result<TrainReport> {
    let start = Instant::now();
    config.validate()?;

    let columns = config.mode.column_names();
    let tables = [
        ("train", Some(&splits.train)),
        ("validation", Some(&splits.val)),
        ("test", splits.test.as_ref()),
    ];
    for (name, table) in tables {
        if let Some(table) = table {
            if table.columns != columns {
                return Err(EmoFuseError::Schema(format!(
                    "{name} table columns {:?} do not match mode {}",
                    table.columns, config.mode
                )));
            }
        }
    }
    if splits.train.is_empty() || splits.val.is_empty() {
        return Err(EmoFuseError::Data(
            "train and validation splits must be non-empty".to_string(),
        ));
    }
    check_label_coverage(&splits.train, &splits.val, "validation")?;
    if let Some(test) = &splits.test {
        check_label_coverage(&splits.train, test, "test")?;
    }

    let device = resolve_device(&config.device);
    std::fs::create_dir_all(output_dir)?;

    // Scaler is fit on the training split only.
    let scaler = Scaler::fit(&splits.train.rows, columns.clone())?;
    let x_train = scaler.transform_rows(&splits.train.rows)?;
    let x_val = scaler.transform_rows(&splits.val.rows)?;
    let x_test = splits
        .test
        .as_ref()
        .map(|t| scaler.transform_rows(&t.rows))
        .transpose()?;

    let batches = TrainingBatches::from_rows(&x_train, &splits.train.labels, config.batch_size, &device)?;
    let (train_inputs, _) = batches.tensors();
    let (val_inputs, _) = to_tensors(&x_val, &splits.val.labels, &device)?;

    let architecture = Architecture::new(columns.len(), config.hidden_size, config.dropout);
    let varmap = VarMap::new();
    let model = FusionClassifier::new_seeded(architecture, &varmap, &device, config.seed)?;
    let mut dropout_rng = ChaCha8Rng::seed_from_u64(config.seed);
    dropout_rng.set_stream(1);

    let mut optimizer = candle_nn::AdamW::new(
        varmap.all_vars(),
        candle_nn::ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        },
    )
    .map_err(|e| EmoFuseError::Model(format!("Failed to create optimizer: {e}")))?;

    let mut best: Option<(usize, f64, HashMap<String, Tensor>)> = None;
    let mut bad_epochs = 0usize;
    let mut history = Vec::new();

    tracing::info!(
        mode = %config.mode,
        device = device_name(&device),
        train = splits.train.len(),
        val = splits.val.len(),
        hidden_size = config.hidden_size,
        lr = config.learning_rate,
        batch_size = config.batch_size,
        max_epochs = config.max_epochs,
        patience = config.patience,
        "Starting fusion training"
    );

    for epoch in 1..=config.max_epochs {
        let mut epoch_loss = 0.0;
        let mut batch_count = 0usize;
        for batch in batches.epoch(config.seed, epoch) {
            let (batch_inputs, batch_targets) = batch?;
            let logits = model
                .forward_logits(&batch_inputs, Some(&mut dropout_rng))
                .map_err(|e| EmoFuseError::Model(format!("Forward pass failed: {e}")))?;
            let loss = candle_nn::loss::cross_entropy(&logits, &batch_targets)
                .map_err(|e| EmoFuseError::Model(format!("Loss computation failed: {e}")))?;
            let loss_val = loss
                .to_scalar::<f32>()
                .map_err(|e| EmoFuseError::Model(format!("Loss scalar failed: {e}")))?
                as f64;
            if !loss_val.is_finite() {
                return Err(EmoFuseError::Numeric(format!(
                    "non-finite training loss at epoch {epoch}: {loss_val}"
                )));
            }
            optimizer
                .backward_step(&loss)
                .map_err(|e| EmoFuseError::Model(format!("Backward step failed: {e}")))?;

            epoch_loss += loss_val;
            batch_count += 1;
        }
        let train_loss = if batch_count > 0 {
            epoch_loss / batch_count as f64
        } else {
            0.0
        };

        let val_logits = eval_logits(&model, &val_inputs)?;
        let val_metrics = ClassificationMetrics::from_logits(&val_logits, &splits.val.labels, 1.0)?;
        let train_logits = eval_logits(&model, train_inputs)?;
        let train_metrics =
            ClassificationMetrics::from_logits(&train_logits, &splits.train.labels, 1.0)?;

        let record = EpochRecord {
            epoch,
            train_loss,
            train_macro_f1: train_metrics.macro_f1,
            val_macro_f1: val_metrics.macro_f1,
            val_accuracy: val_metrics.accuracy,
            val_nll: val_metrics.nll,
        };

        let best_f1 = best.as_ref().map_or(f64::NEG_INFINITY, |b| b.1);
        let improved = record.val_macro_f1 > best_f1;
        if improved {
            best = Some((epoch, record.val_macro_f1, snapshot(&varmap)?));
            bad_epochs = 0;
        } else {
            bad_epochs += 1;
        }

        let marker = if improved { "*" } else { "" };
        tracing::info!("{record} {marker}");
        history.push(record);

        if bad_epochs >= config.patience {
            tracing::info!(epoch, patience = config.patience, "Early stopping");
            break;
        }
    }

    let Some((best_epoch, best_val_macro_f1, best_weights)) = best else {
        return Err(EmoFuseError::Config(format!(
            "validation macro-F1 never improved in {} epochs; no model to calibrate",
            history.len()
        )));
    };
    restore(&varmap, &best_weights)?;

    // Validation logits of the restored weights, read once for calibration.
    let val_logits = eval_logits(&model, &val_inputs)?;
    let val_loss = nll_at_temperature(&val_logits, &splits.val.labels, 1.0)?;
    let val_metrics_uncalibrated =
        ClassificationMetrics::from_logits(&val_logits, &splits.val.labels, 1.0)?.with_loss(val_loss);

    let fit = fit_temperature(&val_logits, &splits.val.labels, config.calibration_max_iter)?;
    let temperature = fit.temperature;
    let val_metrics_calibrated =
        ClassificationMetrics::from_logits(&val_logits, &splits.val.labels, temperature)?;
    write_confusion(&val_logits, &splits.val.labels, temperature, &output_dir.join(VAL_CONFUSION_FILE))?;

    let mut test_metrics_uncalibrated = None;
    let mut test_metrics_calibrated = None;
    if let (Some(test), Some(x_test)) = (&splits.test, &x_test) {
        let (test_inputs, _) = to_tensors(x_test, &test.labels, &device)?;
        let test_logits = eval_logits(&model, &test_inputs)?;
        let test_loss = nll_at_temperature(&test_logits, &test.labels, 1.0)?;
        test_metrics_uncalibrated =
            Some(ClassificationMetrics::from_logits(&test_logits, &test.labels, 1.0)?.with_loss(test_loss));
        test_metrics_calibrated =
            Some(ClassificationMetrics::from_logits(&test_logits, &test.labels, temperature)?);
        write_confusion(&test_logits, &test.labels, temperature, &output_dir.join(TEST_CONFUSION_FILE))?;
    }

    let metadata = ModelMetadata {
        format_version: FORMAT_VERSION,
        input_dim: architecture.input_dim,
        hidden_size: architecture.hidden_size,
        dropout: architecture.dropout,
        labels: CANONICAL_EMOTIONS.iter().map(|e| e.code().to_string()).collect(),
        feature_columns: columns.clone(),
        temperature,
    };
    ArtifactStore::new(output_dir).save(&varmap, &metadata, &scaler)?;

    let report = TrainReport {
        mode: config.mode,
        device: device_name(&device).to_string(),
        train_samples: splits.train.len(),
        val_samples: splits.val.len(),
        test_samples: splits.test.as_ref().map_or(0, FeatureTable::len),
        feature_columns: columns,
        best_epoch,
        best_val_macro_f1,
        temperature,
        calibration_iterations: fit.iterations,
        val_metrics_uncalibrated,
        val_metrics_calibrated,
        test_metrics_uncalibrated,
        test_metrics_calibrated,
        history,
        runtime_seconds: start.elapsed().as_secs_f64(),
    };
    report.write(output_dir)?;

    tracing::info!(
        best_epoch,
        best_val_macro_f1,
        temperature,
        nll_before = fit.nll_before,
        nll_after = fit.nll_after,
        output = %output_dir.display(),
        "Training finished"
    );
    tracing::info!("val (calibrated): {}", report.val_metrics_calibrated);
    if let Some(test) = &report.test_metrics_calibrated {
        tracing::info!("test (calibrated): {test}");
    }

    Ok(report)
}

/// Eval-mode logits as `f64` rows.
fn eval_logits(model: &FusionClassifier, inputs: &Tensor) -> Result<Vec<Vec<f64>>> {
    model
        .forward_logits(inputs, None)
        .and_then(|t| t.to_dtype(DType::F64))
        .and_then(|t| t.to_vec2::<f64>())
        .map_err(|e| EmoFuseError::Model(format!("Eval forward failed: {e}")))
}

/// Detached copies of every variable.
fn snapshot(varmap: &VarMap) -> Result<HashMap<String, Tensor>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| EmoFuseError::Model(format!("VarMap lock poisoned: {e}")))?;
    data.iter()
        .map(|(name, var)| {
            var.as_tensor()
                .copy()
                .map(|t| (name.clone(), t))
                .map_err(|e| EmoFuseError::Model(format!("Failed to snapshot {name}: {e}")))
        })
        .collect()
}

fn restore(varmap: &VarMap, weights: &HashMap<String, Tensor>) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| EmoFuseError::Model(format!("VarMap lock poisoned: {e}")))?;
    for (name, var) in data.iter() {
        let saved = weights
            .get(name)
            .ok_or_else(|| EmoFuseError::Model(format!("snapshot is missing {name}")))?;
        var.set(saved)
            .map_err(|e| EmoFuseError::Model(format!("Failed to restore {name}: {e}")))?;
    }
    Ok(())
}

fn write_confusion(logits: &[Vec<f64>], truth: &[usize], temperature: f64, path: &Path) -> Result<()> {
    let probs: Vec<Vec<f64>> = logits.iter().map(|l| softmax(l, temperature)).collect();
    ConfusionMatrix::from_predictions(truth, &predictions(&probs))?.write_csv(path)
}
