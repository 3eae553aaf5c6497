//! Training pipeline for the emofuse late-fusion classifier
//!
//! # Modules
//!
//! - [`training`] - feature tables, the early-stopped trainer and run reports
//! - [`ablation`] - audio-only / text-only / fusion comparison runs
//! - [`config`] - YAML run configuration

pub mod ablation;
pub mod config;
pub mod training;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::ablation::{run_ablation, AblationRow, AblationSummary};
    pub use crate::config::{load_config, RunConfig};
    pub use crate::training::data::{load_feature_table, write_feature_table, FeatureTable};
    pub use crate::training::report::{EpochRecord, TrainReport};
    pub use crate::training::trainer::{train, train_from_paths, SplitPaths, TrainConfig, TrainingSplits};
}
