//! Fusion classifier training pipeline.
//!
//! Feature tables in, calibrated artifact plus report out:
//! [`data`] reads the CSV splits, [`trainer`] runs the early-stopped loop and
//! temperature fit, [`report`] holds what a run writes besides the artifact.

pub mod data;
pub mod report;
pub mod trainer;
