//! Inference over a trained fusion artifact.
//!
//! [`FusionRuntime::load`] is the only way to build a runtime. Loading checks
//! that the scaler and the model agree on dimensionality and feature order,
//! that every declared column is a known feature, and that the label list maps
//! onto the canonical emotions. After loading the runtime is immutable and can
//! be shared across threads behind an `Arc`.
//!
//! Feature keys missing from a prediction request default to 0.0. That is the
//! one place a value is filled in rather than rejected; each fill is logged.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use emofuse_core::schema::is_known_feature;
use emofuse_core::{EmoFuseError, Emotion, Result, NUM_CLASSES};

use crate::artifact::{ArtifactStore, ModelMetadata};
use crate::calibration::{softmax, MAX_TEMPERATURE, MIN_TEMPERATURE};
use crate::classifier::FusionClassifier;
use crate::evaluation::argmax;
use crate::features::FeatureSet;
use crate::scaler::Scaler;

/// Output of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionPrediction {
    pub label: Emotion,
    /// Calibrated probability of `label`.
    pub confidence: f64,
    pub temperature: f64,
    /// Calibrated distribution keyed by label code.
    pub scores: BTreeMap<String, f64>,
    pub scores_uncalibrated: BTreeMap<String, f64>,
    /// Raw (unscaled) values actually fed to the model.
    pub features: BTreeMap<String, f64>,
    pub feature_columns: Vec<String>,
}

/// A loaded, validated fusion model.
pub struct FusionRuntime {
    classifier: FusionClassifier,
    scaler: Scaler,
    labels: Vec<Emotion>,
    feature_columns: Vec<String>,
    temperature: f64,
    source: PathBuf,
}

impl FusionRuntime {
    /// Load the artifact in `dir` on the CPU.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        Self::load_on(dir, &Device::Cpu)
    }

    /// Load the artifact in `dir` on `device`.
    pub fn load_on(dir: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        let artifact = ArtifactStore::new(dir).load()?;
        let metadata = artifact.metadata;
        let scaler = artifact.scaler;

        let labels = validate_schema(&metadata, &scaler)?;
        let temperature = validate_temperature(metadata.temperature)?;

        let vb = VarBuilder::from_buffered_safetensors(artifact.weights, DType::F32, device)
            .map_err(|e| EmoFuseError::Model(format!("Failed to load fusion weights: {e}")))?;
        let classifier = FusionClassifier::new(metadata.architecture(), vb, device)?;

        tracing::info!(
            path = %dir.display(),
            input_dim = metadata.input_dim,
            hidden_size = metadata.hidden_size,
            temperature,
            "Loaded fusion runtime"
        );

        Ok(Self {
            classifier,
            scaler,
            labels,
            feature_columns: metadata.feature_columns,
            temperature,
            source: dir.to_path_buf(),
        })
    }

    /// Score one feature map.
    pub fn predict(&self, features: &HashMap<String, f64>) -> Result<FusionPrediction> {
        let mut raw = Vec::with_capacity(self.feature_columns.len());
        let mut missing = Vec::new();
        for column in &self.feature_columns {
            match features.get(column) {
                Some(&value) if value.is_finite() => raw.push(value),
                Some(&value) => {
                    return Err(EmoFuseError::Data(format!(
                        "feature {column} is not finite: {value}"
                    )))
                }
                None => {
                    missing.push(column.as_str());
                    raw.push(0.0);
                }
            }
        }
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "Missing feature keys defaulted to 0.0");
        }

        let scaled: Vec<f32> = self
            .scaler
            .transform(&raw)?
            .into_iter()
            .map(|v| v as f32)
            .collect();
        let logits = self.classifier.logits_for(&scaled)?;
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(EmoFuseError::Numeric("fusion logits are not finite".to_string()));
        }

        let uncalibrated = softmax(&logits, 1.0);
        let calibrated = softmax(&logits, self.temperature);
        let best = argmax(&calibrated);

        let prediction = FusionPrediction {
            label: self.labels[best],
            confidence: calibrated[best],
            temperature: self.temperature,
            scores: self.label_map(&calibrated),
            scores_uncalibrated: self.label_map(&uncalibrated),
            features: self
                .feature_columns
                .iter()
                .cloned()
                .zip(raw.iter().copied())
                .collect(),
            feature_columns: self.feature_columns.clone(),
        };
        tracing::debug!(
            label = %prediction.label,
            confidence = prediction.confidence,
            "Fusion prediction"
        );
        Ok(prediction)
    }

    /// Score a [`FeatureSet`] built by the vectorizer.
    pub fn predict_features(&self, features: &FeatureSet) -> Result<FusionPrediction> {
        self.predict(&features.to_map())
    }

    fn label_map(&self, probs: &[f64]) -> BTreeMap<String, f64> {
        self.labels
            .iter()
            .zip(probs)
            .map(|(label, &p)| (label.code().to_string(), p))
            .collect()
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn labels(&self) -> &[Emotion] {
        &self.labels
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn classifier(&self) -> &FusionClassifier {
        &self.classifier
    }

    /// Directory the artifact was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }
}

fn validate_schema(metadata: &ModelMetadata, scaler: &Scaler) -> Result<Vec<Emotion>> {
    if scaler.dim() != metadata.input_dim {
        return Err(EmoFuseError::Schema(format!(
            "scaler declares {} features but model input dimension is {}",
            scaler.dim(),
            metadata.input_dim
        )));
    }
    if metadata.feature_columns.len() != metadata.input_dim {
        return Err(EmoFuseError::Schema(format!(
            "model lists {} feature columns but input dimension is {}",
            metadata.feature_columns.len(),
            metadata.input_dim
        )));
    }
    if scaler.feature_columns != metadata.feature_columns {
        return Err(EmoFuseError::Schema(format!(
            "scaler feature columns {:?} do not match model feature columns {:?}",
            scaler.feature_columns, metadata.feature_columns
        )));
    }

    let mut seen = HashSet::new();
    for column in &metadata.feature_columns {
        if !is_known_feature(column) {
            return Err(EmoFuseError::Schema(format!("unknown feature column: {column}")));
        }
        if !seen.insert(column.as_str()) {
            return Err(EmoFuseError::Schema(format!("duplicate feature column: {column}")));
        }
    }

    if metadata.labels.len() != NUM_CLASSES {
        return Err(EmoFuseError::Schema(format!(
            "model declares {} labels, expected {NUM_CLASSES}",
            metadata.labels.len()
        )));
    }
    let labels = metadata
        .labels
        .iter()
        .map(|l| {
            l.parse::<Emotion>()
                .map_err(|_| EmoFuseError::Schema(format!("unknown label in model: {l}")))
        })
        .collect::<Result<Vec<_>>>()?;
    let distinct: HashSet<_> = labels.iter().collect();
    if distinct.len() != labels.len() {
        return Err(EmoFuseError::Schema(format!(
            "duplicate labels in model: {:?}",
            metadata.labels
        )));
    }
    Ok(labels)
}

fn validate_temperature(temperature: f64) -> Result<f64> {
    if !temperature.is_finite() || temperature <= 0.0 {
        return Err(EmoFuseError::Schema(format!(
            "invalid stored temperature: {temperature}"
        )));
    }
    Ok(temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::FORMAT_VERSION;
    use crate::classifier::Architecture;
    use candle_nn::VarMap;
    use emofuse_core::FeatureMode;
    use std::sync::Arc;

    fn write_artifact(dir: &Path, mode: FeatureMode, temperature: f64) -> ModelMetadata {
        let columns = mode.column_names();
        let metadata = ModelMetadata {
            format_version: FORMAT_VERSION,
            input_dim: columns.len(),
            hidden_size: 8,
            dropout: 0.2,
            labels: vec!["ANG".into(), "HAP".into(), "NEU".into(), "SAD".into()],
            feature_columns: columns.clone(),
            temperature,
        };
        let varmap = VarMap::new();
        FusionClassifier::new_trainable(
            Architecture::new(columns.len(), 8, 0.2),
            &varmap,
            &Device::Cpu,
        )
        .unwrap();
        let rows = vec![vec![0.2; columns.len()], vec![0.6; columns.len()]];
        let scaler = Scaler::fit(&rows, columns).unwrap();
        ArtifactStore::new(dir).save(&varmap, &metadata, &scaler).unwrap();
        metadata
    }

    #[test]
    fn test_predict_contract() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), FeatureMode::TextOnly, 2.0);
        let runtime = FusionRuntime::load(dir.path()).unwrap();

        let mut features = HashMap::new();
        features.insert("text_negative".to_string(), 0.7);
        features.insert("text_neutral".to_string(), 0.2);
        features.insert("ignored_extra".to_string(), 5.0);
        let out = runtime.predict(&features).unwrap();

        assert_eq!(out.temperature, 2.0);
        assert_eq!(out.scores.len(), NUM_CLASSES);
        assert!((out.scores.values().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((out.scores_uncalibrated.values().sum::<f64>() - 1.0).abs() < 1e-9);
        assert_eq!(out.confidence, out.scores[out.label.code()]);
        assert!((0.0..=1.0).contains(&out.confidence));
        // missing keys are reported as the 0.0 actually used
        assert_eq!(out.features["text_positive"], 0.0);
        assert_eq!(out.features["text_negative"], 0.7);
        assert!(!out.features.contains_key("ignored_extra"));
        assert_eq!(out.feature_columns, FeatureMode::TextOnly.column_names());
    }

    #[test]
    fn test_calibrated_is_softer_when_t_above_one() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), FeatureMode::TextOnly, 3.0);
        let runtime = FusionRuntime::load(dir.path()).unwrap();
        let out = runtime.predict(&HashMap::new()).unwrap();
        let max_uncal = out.scores_uncalibrated.values().copied().fold(0.0, f64::max);
        assert!(out.confidence <= max_uncal + 1e-12);
    }

    #[test]
    fn test_prediction_serializes_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), FeatureMode::AudioOnly, 1.0);
        let runtime = FusionRuntime::load(dir.path()).unwrap();
        let json = serde_json::to_value(runtime.predict(&HashMap::new()).unwrap()).unwrap();
        assert!(json.get("scoresUncalibrated").is_some());
        assert!(json.get("featureColumns").is_some());
        assert!(["ANG", "HAP", "NEU", "SAD"].contains(&json["label"].as_str().unwrap()));
    }

    #[test]
    fn test_scaler_dimension_mismatch_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), FeatureMode::AudioOnly, 1.0);
        let columns: Vec<String> = FeatureMode::TextOnly.column_names();
        let scaler = Scaler {
            mean: vec![0.0; 5],
            std: vec![1.0; 5],
            feature_columns: columns,
        };
        scaler.save_json(&dir.path().join(crate::artifact::SCALER_FILE)).unwrap();

        let err = FusionRuntime::load(dir.path()).err().unwrap();
        assert!(matches!(err, EmoFuseError::Schema(_)));
        assert!(err.to_string().contains("5 features"));
    }

    #[test]
    fn test_scaler_column_order_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), FeatureMode::TextOnly, 1.0);
        let mut columns = FeatureMode::TextOnly.column_names();
        columns.swap(0, 1);
        let scaler = Scaler {
            mean: vec![0.0; 5],
            std: vec![1.0; 5],
            feature_columns: columns,
        };
        scaler.save_json(&dir.path().join(crate::artifact::SCALER_FILE)).unwrap();
        assert!(matches!(
            FusionRuntime::load(dir.path()),
            Err(EmoFuseError::Schema(_))
        ));
    }

    #[test]
    fn test_missing_scaler_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), FeatureMode::TextOnly, 1.0);
        std::fs::remove_file(dir.path().join(crate::artifact::SCALER_FILE)).unwrap();
        assert!(matches!(
            FusionRuntime::load(dir.path()),
            Err(EmoFuseError::Schema(_))
        ));
    }

    #[test]
    fn test_stored_temperature_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), FeatureMode::TextOnly, 100.0);
        let runtime = FusionRuntime::load(dir.path()).unwrap();
        assert_eq!(runtime.temperature(), MAX_TEMPERATURE);
    }

    #[test]
    fn test_non_finite_feature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), FeatureMode::TextOnly, 1.0);
        let runtime = FusionRuntime::load(dir.path()).unwrap();
        let mut features = HashMap::new();
        features.insert("text_negative".to_string(), f64::NAN);
        assert!(matches!(
            runtime.predict(&features),
            Err(EmoFuseError::Data(_))
        ));
    }

    #[test]
    fn test_concurrent_predictions_agree() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), FeatureMode::Fusion, 1.3);
        let runtime = Arc::new(FusionRuntime::load(dir.path()).unwrap());
        let mut features = HashMap::new();
        features.insert("audio_prob_ang".to_string(), 0.8);
        features.insert("text_negative".to_string(), 0.6);
        let expected = runtime.predict(&features).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let runtime = Arc::clone(&runtime);
                let features = features.clone();
                std::thread::spawn(move || runtime.predict(&features).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
