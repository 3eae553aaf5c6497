//! Feature standardization.
//!
//! The scaler is fit once on the training split and then applied, unchanged,
//! to validation, test and inference vectors. It is persisted as
//! `feature_scaler.json` next to the model weights and is never refit after
//! training.

use std::path::Path;

use serde::{Deserialize, Serialize};

use emofuse_core::{EmoFuseError, Result};

/// Standard deviations below this are treated as constant columns.
pub const STD_EPS: f64 = 1e-6;

/// Per-column mean and standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub feature_columns: Vec<String>,
}

impl Scaler {
    /// Fit column statistics on a training matrix.
    ///
    /// Uses the population standard deviation. Columns whose deviation is
    /// below [`STD_EPS`] get a deviation of 1.0, so constant features pass
    /// through centred but unscaled.
    pub fn fit(rows: &[Vec<f64>], feature_columns: Vec<String>) -> Result<Self> {
        let dim = feature_columns.len();
        if rows.is_empty() {
            return Err(EmoFuseError::Data(
                "cannot fit scaler on an empty training matrix".to_string(),
            ));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(EmoFuseError::Data(format!(
                "training row {i} has {} values, expected {dim}",
                row.len()
            )));
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, &x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; dim];
        for row in rows {
            for ((v, &x), &m) in var.iter_mut().zip(row).zip(&mean) {
                *v += (x - m) * (x - m);
            }
        }
        let std = var.into_iter().map(|v| floor_std((v / n).sqrt())).collect();

        Ok(Self {
            mean,
            std,
            feature_columns,
        })
    }

    /// Number of features.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.feature_columns.len()
    }

    /// Check internal consistency and floor any near-zero deviations.
    ///
    /// Applied to scalers read from disk.
    pub fn validated(mut self) -> Result<Self> {
        let dim = self.feature_columns.len();
        if self.mean.len() != dim || self.std.len() != dim {
            return Err(EmoFuseError::Schema(format!(
                "scaler shape mismatch: mean={}, std={}, features={dim}",
                self.mean.len(),
                self.std.len()
            )));
        }
        if self.mean.iter().chain(&self.std).any(|v| !v.is_finite()) {
            return Err(EmoFuseError::Schema(
                "scaler contains non-finite statistics".to_string(),
            ));
        }
        self.std.iter_mut().for_each(|s| *s = floor_std(*s));
        Ok(self)
    }

    /// `(x - mean) / std` for one vector.
    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>> {
        if x.len() != self.mean.len() {
            return Err(EmoFuseError::Schema(format!(
                "vector has {} values, scaler expects {}",
                x.len(),
                self.mean.len()
            )));
        }
        Ok(x.iter()
            .zip(&self.mean)
            .zip(&self.std)
            .map(|((&v, &m), &s)| (v - m) / s)
            .collect())
    }

    /// [`Scaler::transform`] applied to every row.
    pub fn transform_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|r| self.transform(r)).collect()
    }

    /// Write as pretty JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read from JSON and validate.
    pub fn load_json(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EmoFuseError::Schema(format!("failed to read scaler {}: {e}", path.display()))
        })?;
        let scaler: Scaler = serde_json::from_str(&contents)?;
        scaler.validated()
    }
}

fn floor_std(s: f64) -> f64 {
    if s < STD_EPS {
        1.0
    } else {
        s
    }
}
