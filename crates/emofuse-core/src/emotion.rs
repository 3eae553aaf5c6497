//! Canonical emotion labels.
//!
//! Every upstream vocabulary (acoustic model tags, corpus annotations,
//! multilingual names) is folded into the four classes below before it reaches
//! training or inference. Two policies exist:
//!
//! - [`Emotion::normalize`] is permissive and maps anything it does not
//!   recognise to [`Emotion::Neu`]. Used on live upstream outputs.
//! - [`Emotion::from_str`](std::str::FromStr) is strict and rejects unknown
//!   labels. Used on labelled training data, where a typo must not silently
//!   become a neutral example.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EmoFuseError;

/// Number of canonical emotion classes.
pub const NUM_CLASSES: usize = 4;

/// Canonical label order. Index `i` is logit `i`.
pub const CANONICAL_EMOTIONS: [Emotion; NUM_CLASSES] =
    [Emotion::Ang, Emotion::Hap, Emotion::Neu, Emotion::Sad];

/// One of the four canonical emotion classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Emotion {
    /// Anger.
    Ang,
    /// Happiness / excitement.
    Hap,
    /// Neutral / calm.
    Neu,
    /// Sadness.
    Sad,
}

impl Emotion {
    /// Three-letter code used in artifacts and reports.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ang => "ANG",
            Self::Hap => "HAP",
            Self::Neu => "NEU",
            Self::Sad => "SAD",
        }
    }

    /// Position of this label in [`CANONICAL_EMOTIONS`].
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Ang => 0,
            Self::Hap => 1,
            Self::Neu => 2,
            Self::Sad => 3,
        }
    }

    /// Inverse of [`Emotion::index`].
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        CANONICAL_EMOTIONS.get(index).copied()
    }

    /// Map an arbitrary upstream label to a canonical class, defaulting to
    /// [`Emotion::Neu`] for anything unrecognised.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        lookup(raw).unwrap_or(Self::Neu)
    }
}

/// Synonym table shared by both normalization policies.
fn lookup(raw: &str) -> Option<Emotion> {
    match raw.trim().to_lowercase().as_str() {
        "ang" | "angry" | "anger" => Some(Emotion::Ang),
        "hap" | "happy" | "happiness" | "exc" | "excited" => Some(Emotion::Hap),
        "neu" | "neutral" | "calm" => Some(Emotion::Neu),
        "sad" | "sadness" => Some(Emotion::Sad),
        _ => None,
    }
}

impl FromStr for Emotion {
    type Err = EmoFuseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(s).ok_or_else(|| EmoFuseError::Data(format!("unsupported emotion label: {s:?}")))
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_matches_index() {
        for (i, emotion) in CANONICAL_EMOTIONS.iter().enumerate() {
            assert_eq!(emotion.index(), i);
            assert_eq!(Emotion::from_index(i), Some(*emotion));
        }
        assert_eq!(Emotion::from_index(4), None);
    }

    #[test]
    fn test_normalize_synonyms() {
        assert_eq!(Emotion::normalize("anger"), Emotion::Ang);
        assert_eq!(Emotion::normalize("  Happy "), Emotion::Hap);
        assert_eq!(Emotion::normalize("EXC"), Emotion::Hap);
        assert_eq!(Emotion::normalize("excited"), Emotion::Hap);
        assert_eq!(Emotion::normalize("calm"), Emotion::Neu);
        assert_eq!(Emotion::normalize("sadness"), Emotion::Sad);
    }

    #[test]
    fn test_normalize_unknown_defaults_to_neutral() {
        assert_eq!(Emotion::normalize("fear"), Emotion::Neu);
        assert_eq!(Emotion::normalize(""), Emotion::Neu);
        assert_eq!(Emotion::normalize("surprised"), Emotion::Neu);
    }

    #[test]
    fn test_strict_parse_rejects_unknown() {
        assert_eq!("ANG".parse::<Emotion>().unwrap(), Emotion::Ang);
        assert_eq!("neutral".parse::<Emotion>().unwrap(), Emotion::Neu);
        let err = "fear".parse::<Emotion>().unwrap_err();
        assert!(matches!(err, EmoFuseError::Data(_)));
    }

    #[test]
    fn test_serde_uses_codes() {
        let json = serde_json::to_string(&Emotion::Sad).unwrap();
        assert_eq!(json, "\"SAD\"");
        let back: Emotion = serde_json::from_str("\"HAP\"").unwrap();
        assert_eq!(back, Emotion::Hap);
    }

    #[test]
    fn test_display() {
        assert_eq!(Emotion::Ang.to_string(), "ANG");
    }
}
