//! On-disk model artifacts.
//!
//! A trained model is two co-located files:
//!
//! - `fusion_model.safetensors`: classifier weights, with a JSON
//!   [`ModelMetadata`] record stored in the safetensors header under
//!   [`METADATA_KEY`].
//! - `feature_scaler.json`: the training-fit [`Scaler`], which repeats the
//!   feature-column list so the two files can be cross-checked at load time.
//!
//! Both files are required. Artifacts are written once per training run and
//! never modified afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::DType;
use candle_nn::VarMap;
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};

use emofuse_core::{EmoFuseError, Result};

use crate::classifier::Architecture;
use crate::scaler::Scaler;

pub const MODEL_FILE: &str = "fusion_model.safetensors";
pub const SCALER_FILE: &str = "feature_scaler.json";
/// Header key holding the serialized [`ModelMetadata`].
pub const METADATA_KEY: &str = "emofuse.model";
pub const FORMAT_VERSION: u32 = 1;

/// Everything besides the weights needed to rebuild and run the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub format_version: u32,
    pub input_dim: usize,
    pub hidden_size: usize,
    pub dropout: f32,
    /// Label codes in logit order.
    pub labels: Vec<String>,
    /// Feature names in vector order.
    pub feature_columns: Vec<String>,
    pub temperature: f64,
}

impl ModelMetadata {
    #[must_use]
    pub fn architecture(&self) -> Architecture {
        Architecture {
            input_dim: self.input_dim,
            hidden_size: self.hidden_size,
            dropout: self.dropout,
            num_classes: self.labels.len(),
        }
    }
}

/// Artifacts loaded from disk, not yet validated against each other.
pub struct LoadedArtifact {
    pub metadata: ModelMetadata,
    pub scaler: Scaler,
    /// Raw safetensors bytes for building a `VarBuilder`.
    pub weights: Vec<u8>,
}

/// Reads and writes the artifact pair in one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.dir.join(SCALER_FILE)
    }

    /// Persist weights, metadata and scaler. Creates the directory if needed.
    pub fn save(&self, varmap: &VarMap, metadata: &ModelMetadata, scaler: &Scaler) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let mut tensors: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();
        {
            let data = varmap
                .data()
                .lock()
                .map_err(|e| EmoFuseError::Model(format!("VarMap lock poisoned: {e}")))?;
            for (name, var) in data.iter() {
                let tensor = var.as_tensor();
                let shape = tensor.dims().to_vec();
                let values = tensor
                    .to_dtype(DType::F32)
                    .and_then(|t| t.flatten_all())
                    .and_then(|t| t.to_vec1::<f32>())
                    .map_err(|e| EmoFuseError::Model(format!("Failed to read weight {name}: {e}")))?;
                let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                tensors.push((name.clone(), shape, bytes));
            }
        }
        tensors.sort_by(|a, b| a.0.cmp(&b.0));

        let views = tensors
            .iter()
            .map(|(name, shape, bytes)| {
                TensorView::new(Dtype::F32, shape.clone(), bytes)
                    .map(|view| (name.clone(), view))
                    .map_err(|e| EmoFuseError::Model(format!("Invalid weight {name}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut header = HashMap::new();
        header.insert(METADATA_KEY.to_string(), serde_json::to_string(metadata)?);

        let model_path = self.model_path();
        safetensors::tensor::serialize_to_file(views, &Some(header), &model_path)
            .map_err(|e| EmoFuseError::Model(format!("Failed to save model: {e}")))?;
        scaler.save_json(&self.scaler_path())?;

        tracing::info!(
            path = %model_path.display(),
            tensors = tensors.len(),
            temperature = metadata.temperature,
            "Saved fusion artifact"
        );
        Ok(())
    }

    /// Read both files. Missing files are schema errors.
    pub fn load(&self) -> Result<LoadedArtifact> {
        let model_path = self.model_path();
        let scaler_path = self.scaler_path();
        for path in [&model_path, &scaler_path] {
            if !path.is_file() {
                return Err(EmoFuseError::Schema(format!(
                    "missing artifact file: {}",
                    path.display()
                )));
            }
        }

        let weights = std::fs::read(&model_path)?;
        let metadata = read_metadata(&weights)?;
        let scaler = Scaler::load_json(&scaler_path)?;

        Ok(LoadedArtifact {
            metadata,
            scaler,
            weights,
        })
    }

    /// Only the model metadata, without the scaler.
    pub fn load_metadata(&self) -> Result<ModelMetadata> {
        let path = self.model_path();
        let bytes = std::fs::read(&path).map_err(|e| {
            EmoFuseError::Schema(format!("failed to read model {}: {e}", path.display()))
        })?;
        read_metadata(&bytes)
    }
}

fn read_metadata(bytes: &[u8]) -> Result<ModelMetadata> {
    let (_, header) = SafeTensors::read_metadata(bytes)
        .map_err(|e| EmoFuseError::Schema(format!("invalid safetensors header: {e}")))?;
    let raw = header
        .metadata()
        .as_ref()
        .and_then(|m| m.get(METADATA_KEY))
        .ok_or_else(|| {
            EmoFuseError::Schema(format!("model header has no '{METADATA_KEY}' entry"))
        })?;
    let metadata: ModelMetadata = serde_json::from_str(raw)
        .map_err(|e| EmoFuseError::Schema(format!("invalid model metadata: {e}")))?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(EmoFuseError::Schema(format!(
            "unsupported artifact format version {}",
            metadata.format_version
        )));
    }
    Ok(metadata)
}
