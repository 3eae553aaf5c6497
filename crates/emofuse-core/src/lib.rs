//! Core types for emofuse
//!
//! This crate holds the pieces every other emofuse crate agrees on: the closed
//! set of canonical emotion labels, the feature-vector schema that forms the
//! artifact contract, the upstream engine/routing selectors, and the shared
//! error type.
//!
//! # Modules
//!
//! - [`emotion`] - canonical labels and upstream label normalization
//! - [`schema`] - feature column names and per-mode column order
//! - [`engine`] - acoustic engine/routing enums and the classifier seam

pub mod emotion;
pub mod engine;
pub mod schema;

pub use emotion::{Emotion, CANONICAL_EMOTIONS, NUM_CLASSES};
pub use engine::{AcousticClassifier, AcousticRouter, Engine, Language, Routing};
pub use schema::{FeatureMode, AUDIO_FEATURES, TEXT_FEATURES};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Error type shared by all emofuse crates.
///
/// The variants follow the failure classes of the pipeline: schema problems
/// are detected at load time, data problems abort a training run, numeric
/// problems are surfaced instead of retried.
#[derive(Debug, thiserror::Error)]
pub enum EmoFuseError {
    /// Artifact files missing, scaler/model dimension mismatch, unknown columns.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Empty tables, unseen labels, malformed rows.
    #[error("Data error: {0}")]
    Data(String),

    /// NaN/inf loss or a degenerate optimizer state.
    #[error("Numeric error: {0}")]
    Numeric(String),

    /// Invalid hyperparameters or a run that never produced a best snapshot.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tensor backend failure.
    #[error("Model error: {0}")]
    Model(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for `std::result::Result<T, EmoFuseError>`.
pub type Result<T> = std::result::Result<T, EmoFuseError>;
