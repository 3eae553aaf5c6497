//! Training-run report.
//!
//! Written once per run as `train_report.json`; read back by the ablation
//! driver and by humans. The runtime never reads it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use emofuse_core::{FeatureMode, Result};
use emofuse_fusion::ClassificationMetrics;

pub const REPORT_FILE: &str = "train_report.json";
pub const VAL_CONFUSION_FILE: &str = "val_confusion_calibrated.csv";
pub const TEST_CONFUSION_FILE: &str = "test_confusion_calibrated.csv";

/// One row of the per-epoch history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_macro_f1: f64,
    pub val_macro_f1: f64,
    pub val_accuracy: f64,
    pub val_nll: f64,
}

impl std::fmt::Display for EpochRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "epoch {:3} | train_loss={:.4} train_f1={:.4} | val_f1={:.4} val_acc={:.4} val_nll={:.4}",
            self.epoch,
            self.train_loss,
            self.train_macro_f1,
            self.val_macro_f1,
            self.val_accuracy,
            self.val_nll,
        )
    }
}

/// Summary of a finished training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub mode: FeatureMode,
    pub device: String,
    pub train_samples: usize,
    pub val_samples: usize,
    pub test_samples: usize,
    pub feature_columns: Vec<String>,
    pub best_epoch: usize,
    pub best_val_macro_f1: f64,
    pub temperature: f64,
    pub calibration_iterations: usize,
    pub val_metrics_uncalibrated: ClassificationMetrics,
    pub val_metrics_calibrated: ClassificationMetrics,
    pub test_metrics_uncalibrated: Option<ClassificationMetrics>,
    pub test_metrics_calibrated: Option<ClassificationMetrics>,
    pub history: Vec<EpochRecord>,
    pub runtime_seconds: f64,
}

impl TrainReport {
    /// Number of epochs actually run.
    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }

    /// Write as pretty JSON to `dir/train_report.json`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(REPORT_FILE), json)?;
        Ok(())
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(dir.join(REPORT_FILE))?;
        Ok(serde_json::from_str(&contents)?)
    }
}
