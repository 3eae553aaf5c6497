//! Feature-vector schema.
//!
//! The column order defined here is part of the artifact contract: a model is
//! trained on vectors in this order, the order is persisted next to the
//! weights, and the runtime vectorizes inputs in exactly the persisted order.
//!
//! # Columns
//!
//! | Column                | Range   | Source                                   |
//! |-----------------------|---------|------------------------------------------|
//! | `audio_prob_ang`      | [0, 1]  | confidence-weighted segment vote         |
//! | `audio_prob_hap`      | [0, 1]  |                                          |
//! | `audio_prob_neu`      | [0, 1]  |                                          |
//! | `audio_prob_sad`      | [0, 1]  |                                          |
//! | `audio_confidence`    | [0, 1]  | max raw segment confidence               |
//! | `audio_entropy`       | >= 0    | Shannon entropy of the 4-way vote        |
//! | `text_negative`       | [0, 1]  | text sentiment distribution              |
//! | `text_neutral`        | [0, 1]  |                                          |
//! | `text_positive`       | [0, 1]  |                                          |
//! | `text_negative_score` | [0, 1]  | model-agnostic negative score            |
//! | `text_length_norm`    | [0, 1]  | transcript length / 256, capped          |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EmoFuseError;

/// Audio-summary columns, in vector order.
pub const AUDIO_FEATURES: [&str; 6] = [
    "audio_prob_ang",
    "audio_prob_hap",
    "audio_prob_neu",
    "audio_prob_sad",
    "audio_confidence",
    "audio_entropy",
];

/// Text-summary columns, in vector order.
pub const TEXT_FEATURES: [&str; 5] = [
    "text_negative",
    "text_neutral",
    "text_positive",
    "text_negative_score",
    "text_length_norm",
];

/// Which modalities a model consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    /// Audio columns only.
    AudioOnly,
    /// Text columns only.
    TextOnly,
    /// Audio columns followed by text columns.
    #[default]
    Fusion,
}

impl FeatureMode {
    /// All modes, in the order ablations run them.
    pub const ALL: [FeatureMode; 3] = [Self::AudioOnly, Self::TextOnly, Self::Fusion];

    /// Column names for this mode, in vector order.
    #[must_use]
    pub fn columns(&self) -> Vec<&'static str> {
        match self {
            Self::AudioOnly => AUDIO_FEATURES.to_vec(),
            Self::TextOnly => TEXT_FEATURES.to_vec(),
            Self::Fusion => AUDIO_FEATURES
                .iter()
                .chain(TEXT_FEATURES.iter())
                .copied()
                .collect(),
        }
    }

    /// Owned column names, as stored in artifacts.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns().into_iter().map(str::to_string).collect()
    }

    /// Number of features in this mode.
    #[must_use]
    pub fn dim(&self) -> usize {
        match self {
            Self::AudioOnly => AUDIO_FEATURES.len(),
            Self::TextOnly => TEXT_FEATURES.len(),
            Self::Fusion => AUDIO_FEATURES.len() + TEXT_FEATURES.len(),
        }
    }

    /// Name used on the command line and in reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioOnly => "audio_only",
            Self::TextOnly => "text_only",
            Self::Fusion => "fusion",
        }
    }
}

impl FromStr for FeatureMode {
    type Err = EmoFuseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "audio_only" => Ok(Self::AudioOnly),
            "text_only" => Ok(Self::TextOnly),
            "fusion" => Ok(Self::Fusion),
            other => Err(EmoFuseError::Config(format!(
                "unknown feature mode {other:?} (expected audio_only, text_only or fusion)"
            ))),
        }
    }
}

impl fmt::Display for FeatureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `name` is one of the canonical feature columns.
#[must_use]
pub fn is_known_feature(name: &str) -> bool {
    AUDIO_FEATURES.contains(&name) || TEXT_FEATURES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fusion_is_audio_then_text() {
        let cols = FeatureMode::Fusion.columns();
        assert_eq!(cols.len(), 11);
        assert_eq!(cols[0], "audio_prob_ang");
        assert_eq!(cols[5], "audio_entropy");
        assert_eq!(cols[6], "text_negative");
        assert_eq!(cols[10], "text_length_norm");
    }

    #[test]
    fn test_dims_match_columns() {
        for mode in FeatureMode::ALL {
            assert_eq!(mode.dim(), mode.columns().len());
        }
        assert_eq!(FeatureMode::AudioOnly.dim(), 6);
        assert_eq!(FeatureMode::TextOnly.dim(), 5);
    }

    #[test]
    fn test_mode_round_trips_through_str() {
        for mode in FeatureMode::ALL {
            assert_eq!(mode.as_str().parse::<FeatureMode>().unwrap(), mode);
        }
        assert!("both".parse::<FeatureMode>().is_err());
    }

    #[test]
    fn test_known_feature() {
        assert!(is_known_feature("audio_entropy"));
        assert!(is_known_feature("text_length_norm"));
        assert!(!is_known_feature("text_top_label_raw"));
    }

    #[test]
    fn test_mode_serde_snake_case() {
        let json = serde_json::to_string(&FeatureMode::TextOnly).unwrap();
        assert_eq!(json, "\"text_only\"");
    }
}
