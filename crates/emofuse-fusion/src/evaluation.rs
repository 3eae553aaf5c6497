//! Classification and calibration metrics.
//!
//! Every function here is a pure function of `(probabilities, truth)` and is
//! averaged over the canonical classes, so classes absent from a split still
//! count towards macro-F1 and balanced accuracy (with an epsilon guard).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use emofuse_core::{EmoFuseError, Result, CANONICAL_EMOTIONS, NUM_CLASSES};

use crate::calibration::softmax_rows;

/// Guard used in ratios and before taking logarithms.
pub const METRIC_EPS: f64 = 1e-12;
/// Number of equal-width confidence bins for ECE.
pub const ECE_BINS: usize = 15;

/// Index of the largest value; the first one wins on ties. An empty slice
/// yields 0 because the scan never reads an element.
#[must_use]
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Argmax of every row.
#[must_use]
pub fn predictions(probs: &[Vec<f64>]) -> Vec<usize> {
    probs.iter().map(|p| argmax(p)).collect()
}

/// Fraction of predictions equal to the truth.
#[must_use]
pub fn accuracy(truth: &[usize], pred: &[usize]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(pred).filter(|(t, p)| t == p).count();
    correct as f64 / truth.len() as f64
}

fn class_counts(truth: &[usize], pred: &[usize], label: usize) -> (f64, f64, f64) {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_count = 0usize;
    for (&t, &p) in truth.iter().zip(pred) {
        match (t == label, p == label) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_count += 1,
            (false, false) => {}
        }
    }
    (tp as f64, fp as f64, fn_count as f64)
}

/// Unweighted mean of per-class F1 over `num_labels` classes.
#[must_use]
pub fn macro_f1(truth: &[usize], pred: &[usize], num_labels: usize) -> f64 {
    if num_labels == 0 {
        return 0.0;
    }
    let total: f64 = (0..num_labels)
        .map(|label| {
            let (tp, fp, fn_count) = class_counts(truth, pred, label);
            let precision = tp / (tp + fp + METRIC_EPS);
            let recall = tp / (tp + fn_count + METRIC_EPS);
            2.0 * precision * recall / (precision + recall + METRIC_EPS)
        })
        .sum();
    total / num_labels as f64
}

/// Unweighted mean of per-class recall.
#[must_use]
pub fn balanced_accuracy(truth: &[usize], pred: &[usize], num_labels: usize) -> f64 {
    if num_labels == 0 {
        return 0.0;
    }
    let total: f64 = (0..num_labels)
        .map(|label| {
            let (tp, _, fn_count) = class_counts(truth, pred, label);
            tp / (tp + fn_count + METRIC_EPS)
        })
        .sum();
    total / num_labels as f64
}

/// Mean negative log-probability of the true class, clipped to `[1e-12, 1]`.
#[must_use]
pub fn multiclass_nll(truth: &[usize], probs: &[Vec<f64>]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let total: f64 = truth
        .iter()
        .zip(probs)
        .map(|(&t, p)| -p[t].clamp(METRIC_EPS, 1.0).ln())
        .sum();
    total / truth.len() as f64
}

/// Mean squared distance to the one-hot truth.
#[must_use]
pub fn multiclass_brier(truth: &[usize], probs: &[Vec<f64>]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let total: f64 = truth
        .iter()
        .zip(probs)
        .map(|(&t, p)| {
            p.iter()
                .enumerate()
                .map(|(k, &v)| {
                    let target = if k == t { 1.0 } else { 0.0 };
                    (v - target) * (v - target)
                })
                .sum::<f64>()
        })
        .sum();
    total / truth.len() as f64
}

/// Expected calibration error over `bins` equal-width confidence bins.
///
/// Bins are `[lo, hi)` except the last, which is closed on both ends.
#[must_use]
pub fn expected_calibration_error(truth: &[usize], probs: &[Vec<f64>], bins: usize) -> f64 {
    let n = truth.len();
    if n == 0 || bins == 0 {
        return 0.0;
    }

    let mut count = vec![0usize; bins];
    let mut conf_sum = vec![0.0; bins];
    let mut correct_sum = vec![0.0; bins];

    for (&t, p) in truth.iter().zip(probs) {
        let pred = argmax(p);
        let confidence = p[pred];
        let Some(bin) = bin_index(confidence, bins) else {
            continue;
        };
        count[bin] += 1;
        conf_sum[bin] += confidence;
        if pred == t {
            correct_sum[bin] += 1.0;
        }
    }

    count
        .iter()
        .zip(conf_sum.iter().zip(&correct_sum))
        .filter(|(&c, _)| c > 0)
        .map(|(&c, (&conf, &correct))| {
            let c_f = c as f64;
            (c_f / n as f64) * (correct / c_f - conf / c_f).abs()
        })
        .sum()
}

fn bin_index(confidence: f64, bins: usize) -> Option<usize> {
    if !(0.0..=1.0).contains(&confidence) {
        return None;
    }
    let edge = |i: usize| i as f64 / bins as f64;
    (0..bins).find(|&i| {
        let (lo, hi) = (edge(i), edge(i + 1));
        if i == bins - 1 {
            confidence >= lo && confidence <= hi
        } else {
            confidence >= lo && confidence < hi
        }
    })
}

/// Metric bundle for one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    /// Mean training-objective loss; only reported for uncalibrated sets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    pub accuracy: f64,
    pub macro_f1: f64,
    pub balanced_accuracy: f64,
    pub nll: f64,
    pub brier: f64,
    pub ece: f64,
}

impl ClassificationMetrics {
    /// Compute every metric from probability rows.
    pub fn from_probabilities(probs: &[Vec<f64>], truth: &[usize]) -> Result<Self> {
        check_rows(probs, truth)?;
        let pred = predictions(probs);
        Ok(Self {
            loss: None,
            accuracy: accuracy(truth, &pred),
            macro_f1: macro_f1(truth, &pred, NUM_CLASSES),
            balanced_accuracy: balanced_accuracy(truth, &pred, NUM_CLASSES),
            nll: multiclass_nll(truth, probs),
            brier: multiclass_brier(truth, probs),
            ece: expected_calibration_error(truth, probs, ECE_BINS),
        })
    }

    /// Metrics of `softmax(logits / temperature)`.
    pub fn from_logits(logits: &[Vec<f64>], truth: &[usize], temperature: f64) -> Result<Self> {
        let probs = softmax_rows(logits, temperature);
        Self::from_probabilities(&probs, truth)
    }

    /// Attach the training-objective loss.
    #[must_use]
    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = Some(loss);
        self
    }
}

impl std::fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(loss) = self.loss {
            write!(f, "loss={loss:.4} ")?;
        }
        write!(
            f,
            "acc={:.4} macro_f1={:.4} bal_acc={:.4} nll={:.4} brier={:.4} ece={:.4}",
            self.accuracy, self.macro_f1, self.balanced_accuracy, self.nll, self.brier, self.ece,
        )
    }
}

fn check_rows(probs: &[Vec<f64>], truth: &[usize]) -> Result<()> {
    if probs.len() != truth.len() {
        return Err(EmoFuseError::Data(format!(
            "{} probability rows but {} labels",
            probs.len(),
            truth.len()
        )));
    }
    for (p, &t) in probs.iter().zip(truth) {
        if p.len() != NUM_CLASSES || t >= NUM_CLASSES {
            return Err(EmoFuseError::Data(format!(
                "row with {} classes and label {t} does not fit {NUM_CLASSES} classes",
                p.len()
            )));
        }
    }
    Ok(())
}

/// Square count matrix indexed `[truth][pred]` in canonical class order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn from_predictions(truth: &[usize], pred: &[usize]) -> Result<Self> {
        if truth.len() != pred.len() {
            return Err(EmoFuseError::Data(format!(
                "{} labels but {} predictions",
                truth.len(),
                pred.len()
            )));
        }
        let mut counts = vec![vec![0u64; NUM_CLASSES]; NUM_CLASSES];
        for (&t, &p) in truth.iter().zip(pred) {
            if t >= NUM_CLASSES || p >= NUM_CLASSES {
                return Err(EmoFuseError::Data(format!(
                    "class index out of range: truth={t} pred={p}"
                )));
            }
            counts[t][p] += 1;
        }
        Ok(Self { counts })
    }

    #[must_use]
    pub fn get(&self, truth: usize, pred: usize) -> u64 {
        self.counts[truth][pred]
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    /// Nested map keyed by label code, for JSON reports.
    #[must_use]
    pub fn to_labelled(&self) -> BTreeMap<String, BTreeMap<String, u64>> {
        CANONICAL_EMOTIONS
            .iter()
            .zip(&self.counts)
            .map(|(truth, row)| {
                let inner = CANONICAL_EMOTIONS
                    .iter()
                    .zip(row)
                    .map(|(pred, &c)| (pred.code().to_string(), c))
                    .collect();
                (truth.code().to_string(), inner)
            })
            .collect()
    }

    /// Write as CSV with a `truth\pred` corner header.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
        let mut header = vec!["truth\\pred".to_string()];
        header.extend(CANONICAL_EMOTIONS.iter().map(|e| e.code().to_string()));
        writer.write_record(&header).map_err(csv_error)?;
        for (emotion, row) in CANONICAL_EMOTIONS.iter().zip(&self.counts) {
            let mut record = vec![emotion.code().to_string()];
            record.extend(row.iter().map(u64::to_string));
            writer.write_record(&record).map_err(csv_error)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn csv_error(e: csv::Error) -> EmoFuseError {
    EmoFuseError::Data(format!("CSV error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(k: usize) -> Vec<f64> {
        let mut v = vec![0.0; NUM_CLASSES];
        v[k] = 1.0;
        v
    }

    #[test]
    fn test_argmax_first_wins_on_ties() {
        assert_eq!(argmax(&[0.25, 0.25, 0.25, 0.25]), 0);
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), 1);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_perfect_predictions() {
        let truth = vec![0, 1, 2, 3];
        let probs: Vec<Vec<f64>> = truth.iter().map(|&k| one_hot(k)).collect();
        let m = ClassificationMetrics::from_probabilities(&probs, &truth).unwrap();
        assert!((m.accuracy - 1.0).abs() < 1e-9);
        assert!((m.macro_f1 - 1.0).abs() < 1e-9);
        assert!((m.balanced_accuracy - 1.0).abs() < 1e-9);
        assert!(m.nll.abs() < 1e-9);
        assert!(m.brier.abs() < 1e-12);
        assert!(m.ece.abs() < 1e-12);
    }

    #[test]
    fn test_absent_classes_count_as_zero_f1() {
        // only ANG and HAP present, both predicted correctly
        let truth = vec![0, 0, 1, 1];
        let pred = vec![0, 0, 1, 1];
        assert!((macro_f1(&truth, &pred, 4) - 0.5).abs() < 1e-9);
        assert!((balanced_accuracy(&truth, &pred, 4) - 0.5).abs() < 1e-9);
        assert!(macro_f1(&truth, &pred, 4).is_finite());
    }

    #[test]
    fn test_macro_f1_mixed() {
        let truth = vec![0, 0, 1, 1, 2, 3];
        let pred = vec![0, 1, 1, 1, 2, 2];
        // ANG: p=1 r=.5 f=2/3; HAP: p=2/3 r=1 f=.8; NEU: p=.5 r=1 f=2/3; SAD: 0
        let expected = (2.0 / 3.0 + 0.8 + 2.0 / 3.0) / 4.0;
        assert!((macro_f1(&truth, &pred, 4) - expected).abs() < 1e-9);
        let bal = (0.5 + 1.0 + 1.0 + 0.0) / 4.0;
        assert!((balanced_accuracy(&truth, &pred, 4) - bal).abs() < 1e-9);
    }

    #[test]
    fn test_nll_clips_zero_probability() {
        let probs = vec![one_hot(1)];
        let nll = multiclass_nll(&[0], &probs);
        assert!((nll - (-METRIC_EPS.ln())).abs() < 1e-9);
    }

    #[test]
    fn test_brier_uniform() {
        let probs = vec![vec![0.25; 4]];
        // (0.75)^2 + 3 * (0.25)^2
        assert!((multiclass_brier(&[2], &probs) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_ece_single_bin_gap() {
        // all predictions at confidence 0.7, half correct
        let probs = vec![
            vec![0.7, 0.1, 0.1, 0.1],
            vec![0.7, 0.1, 0.1, 0.1],
            vec![0.7, 0.1, 0.1, 0.1],
            vec![0.7, 0.1, 0.1, 0.1],
        ];
        let truth = vec![0, 0, 1, 2];
        let ece = expected_calibration_error(&truth, &probs, ECE_BINS);
        assert!((ece - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_ece_last_bin_is_closed() {
        assert_eq!(bin_index(1.0, ECE_BINS), Some(ECE_BINS - 1));
        assert_eq!(bin_index(0.0, ECE_BINS), Some(0));
        assert_eq!(bin_index(1.5, ECE_BINS), None);
    }

    #[test]
    fn test_metrics_are_idempotent() {
        let probs = vec![
            vec![0.6, 0.2, 0.1, 0.1],
            vec![0.1, 0.5, 0.3, 0.1],
            vec![0.3, 0.3, 0.2, 0.2],
            vec![0.05, 0.05, 0.1, 0.8],
        ];
        let truth = vec![0, 2, 1, 3];
        let a = ClassificationMetrics::from_probabilities(&probs, &truth).unwrap();
        let b = ClassificationMetrics::from_probabilities(&probs, &truth).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.nll.to_bits(), b.nll.to_bits());
        assert_eq!(a.ece.to_bits(), b.ece.to_bits());
        assert_eq!(a.brier.to_bits(), b.brier.to_bits());
    }

    #[test]
    fn test_from_logits_matches_softmax() {
        let logits = vec![vec![2.0, 0.0, 0.0, 0.0], vec![0.0, 0.0, 3.0, 0.0]];
        let truth = vec![0, 2];
        let m = ClassificationMetrics::from_logits(&logits, &truth, 1.0).unwrap();
        assert!((m.accuracy - 1.0).abs() < 1e-12);
        let hotter = ClassificationMetrics::from_logits(&logits, &truth, 0.5).unwrap();
        assert!(hotter.nll < m.nll);
    }

    #[test]
    fn test_mismatched_rows_rejected() {
        let probs = vec![vec![0.25; 4]];
        assert!(matches!(
            ClassificationMetrics::from_probabilities(&probs, &[0, 1]),
            Err(EmoFuseError::Data(_))
        ));
    }

    #[test]
    fn test_display_includes_loss_when_present() {
        let probs = vec![one_hot(0)];
        let m = ClassificationMetrics::from_probabilities(&probs, &[0])
            .unwrap()
            .with_loss(0.5);
        let text = m.to_string();
        assert!(text.starts_with("loss=0.5000 "));
        assert!(text.contains("macro_f1=0.2500"));
    }

    #[test]
    fn test_confusion_matrix_csv() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 3], &[0, 1, 1, 2]).unwrap();
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.total(), 4);
        assert_eq!(cm.to_labelled()["SAD"]["NEU"], 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confusion.csv");
        cm.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "truth\\pred,ANG,HAP,NEU,SAD");
        assert_eq!(lines[1], "ANG,1,1,0,0");
        assert_eq!(lines[4], "SAD,0,0,1,0");
    }
}
