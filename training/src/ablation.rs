//! Modality ablation: train audio-only, text-only and fusion models on the
//! same splits and summarize them side by side.
//!
//! Each mode gets its own sub-directory, model, scaler and report; nothing is
//! shared between runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use emofuse_core::{EmoFuseError, FeatureMode, Result};

use crate::training::report::TrainReport;
use crate::training::trainer::{train_from_paths, SplitPaths, TrainConfig};

pub const SUMMARY_JSON: &str = "ablation_summary.json";
pub const SUMMARY_CSV: &str = "ablation_summary.csv";

/// Calibrated headline metrics of one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AblationRow {
    pub mode: FeatureMode,
    pub best_epoch: usize,
    pub temperature: f64,
    pub val_macro_f1_cal: f64,
    pub val_accuracy_cal: f64,
    pub test_macro_f1_cal: Option<f64>,
    pub test_accuracy_cal: Option<f64>,
    pub test_ece_cal: Option<f64>,
}

impl AblationRow {
    pub fn from_report(report: &TrainReport) -> Self {
        let test = report.test_metrics_calibrated.as_ref();
        Self {
            mode: report.mode,
            best_epoch: report.best_epoch,
            temperature: report.temperature,
            val_macro_f1_cal: report.val_metrics_calibrated.macro_f1,
            val_accuracy_cal: report.val_metrics_calibrated.accuracy,
            test_macro_f1_cal: test.map(|m| m.macro_f1),
            test_accuracy_cal: test.map(|m| m.accuracy),
            test_ece_cal: test.map(|m| m.ece),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AblationSummary {
    pub rows: Vec<AblationRow>,
}

impl AblationSummary {
    pub fn row(&self, mode: FeatureMode) -> Option<&AblationRow> {
        self.rows.iter().find(|r| r.mode == mode)
    }

    /// Write `ablation_summary.json` and `ablation_summary.csv` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        std::fs::write(dir.join(SUMMARY_JSON), serde_json::to_string_pretty(self)?)?;

        let mut writer = csv::Writer::from_path(dir.join(SUMMARY_CSV))
            .map_err(|e| EmoFuseError::Data(format!("CSV error: {e}")))?;
        for row in &self.rows {
            writer
                .serialize(row)
                .map_err(|e| EmoFuseError::Data(format!("CSV error: {e}")))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Train every [`FeatureMode`] under `output_root/<mode>`.
///
/// `base.mode` is ignored; every other hyperparameter is shared.
pub fn run_ablation(base: &TrainConfig, paths: &SplitPaths, output_root: &Path) -> Result<AblationSummary> {
    std::fs::create_dir_all(output_root)?;
    let mut rows = Vec::with_capacity(FeatureMode::ALL.len());

    for mode in FeatureMode::ALL {
        let config = TrainConfig {
            mode,
            ..base.clone()
        };
        let dir = mode_dir(output_root, mode);
        tracing::info!(mode = %mode, output = %dir.display(), "Ablation run");
        let report = train_from_paths(&config, paths, &dir)?;
        rows.push(AblationRow::from_report(&report));
    }

    let summary = AblationSummary { rows };
    summary.write(output_root)?;
    tracing::info!(output = %output_root.display(), "Ablation summary written");
    Ok(summary)
}

pub fn mode_dir(output_root: &Path, mode: FeatureMode) -> PathBuf {
    output_root.join(mode.as_str())
}
