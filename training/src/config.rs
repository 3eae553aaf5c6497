//! YAML run configuration for `train-fusion`.
//!
//! ```yaml
//! train_features: data/train.csv
//! val_features: data/val.csv
//! test_features: data/test.csv   # optional
//! output_dir: runs/fusion
//! training:
//!   mode: fusion
//!   hidden_size: 64
//!   max_epochs: 80
//! ```
//!
//! Every `training` key is optional and falls back to [`TrainConfig`]
//! defaults. Command-line flags override values loaded from the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::training::trainer::{SplitPaths, TrainConfig};

/// One training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub train_features: PathBuf,
    pub val_features: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_features: Option<PathBuf>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub training: TrainConfig,
}

impl RunConfig {
    pub fn split_paths(&self) -> SplitPaths {
        SplitPaths {
            train: self.train_features.clone(),
            val: self.val_features.clone(),
            test: self.test_features.clone(),
        }
    }
}

/// Load a [`RunConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the YAML is invalid, or the
/// training section fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<RunConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: RunConfig = serde_yaml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {}", e))?;
    config.training.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emofuse_core::FeatureMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper to write YAML to a temp file and return the path.
    fn write_yaml(yaml: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_load_config_minimal() {
        let yaml = r#"
train_features: data/train.csv
val_features: data/val.csv
output_dir: runs/a
"#;
        let f = write_yaml(yaml);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.train_features, PathBuf::from("data/train.csv"));
        assert!(config.test_features.is_none());
        assert_eq!(config.training, TrainConfig::default());
        assert_eq!(config.split_paths().val, PathBuf::from("data/val.csv"));
    }

    #[test]
    fn test_load_config_with_training_overrides() {
        let yaml = r#"
train_features: t.csv
val_features: v.csv
test_features: x.csv
output_dir: out
training:
  mode: audio_only
  hidden_size: 0
  dropout: 0.0
  learning_rate: 0.01
  device: cpu
"#;
        let f = write_yaml(yaml);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.training.mode, FeatureMode::AudioOnly);
        assert_eq!(config.training.hidden_size, 0);
        assert_eq!(config.training.batch_size, 128);
        assert_eq!(config.training.device, "cpu");
        assert_eq!(config.split_paths().test, Some(PathBuf::from("x.csv")));
    }

    #[test]
    fn test_load_config_invalid_training_rejected() {
        let yaml = r#"
train_features: t.csv
val_features: v.csv
output_dir: out
training:
  batch_size: 0
"#;
        let f = write_yaml(yaml);
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Path::new("/nonexistent/run.yaml")).is_err());
    }

    #[test]
    fn test_load_config_unknown_mode() {
        let yaml = r#"
train_features: t.csv
val_features: v.csv
output_dir: out
training:
  mode: video_only
"#;
        let f = write_yaml(yaml);
        assert!(load_config(f.path()).is_err());
    }
}
