//! Late-fusion emotion classification for emofuse
//!
//! Combines per-segment acoustic emotion predictions and transcript sentiment
//! into one calibrated emotion label.
//!
//! # Pipeline
//!
//! ```text
//! segments + transcript
//!   → FeatureVectorizer      (audio/text summaries, fixed column order)
//!   → Scaler                 (training-fit standardization)
//!   → FusionClassifier       (linear or one-hidden-layer MLP, candle)
//!   → softmax(logits / T)    (temperature calibration)
//! ```
//!
//! Training lives in the `emofuse-training` crate. This crate holds the
//! pieces shared by training and inference plus the [`FusionRuntime`], which
//! is the only way to run a persisted model.
//!
//! # Modules
//!
//! - [`features`] - audio/text summaries and the [`FeatureVectorizer`]
//! - [`sentiment`] - text-sentiment categories and the lexicon negative scorer
//! - [`scaler`] - per-column standardization
//! - [`classifier`] - the candle network
//! - [`calibration`] - temperature fitting
//! - [`evaluation`] - accuracy, macro-F1, NLL, Brier, ECE, confusion matrices
//! - [`artifact`] - safetensors + scaler JSON persistence
//! - [`runtime`] - validated inference
//! - [`registry`] - named runtime handles
//! - [`device`] - compute device selection

pub mod artifact;
pub mod calibration;
pub mod classifier;
pub mod device;
pub mod evaluation;
pub mod features;
pub mod registry;
pub mod runtime;
pub mod scaler;
pub mod sentiment;

pub use artifact::{ArtifactStore, ModelMetadata, MODEL_FILE, SCALER_FILE};
pub use calibration::{fit_temperature, softmax, TemperatureFit};
pub use classifier::{Architecture, FusionClassifier};
pub use device::select_device;
pub use evaluation::{ClassificationMetrics, ConfusionMatrix};
pub use features::{
    aggregate_overall, AudioSummary, FeatureSet, FeatureVectorizer, OverallEmotion,
    SegmentPrediction, TextFeatures, TextSentimentInput,
};
pub use registry::ModelRegistry;
pub use runtime::{FusionPrediction, FusionRuntime};
pub use scaler::Scaler;
pub use sentiment::{LexiconNegScorer, SentimentScores, TextSentiment, TextSentimentScorer};
