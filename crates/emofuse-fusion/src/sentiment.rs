//! Text sentiment summarization.
//!
//! Text-sentiment models disagree on label vocabularies (`LABEL_0`,
//! `negative`, `joy`, `1 star`...). This module folds a raw model distribution
//! into a negative/neutral/positive triple and provides a model-agnostic
//! lexicon scorer for the standalone negative score.

use serde::{Deserialize, Serialize};

use emofuse_core::Result;

/// Label fragments that mark a negative sentiment class.
const NEGATIVE_HINTS: [&str; 7] = ["neg", "negative", "sad", "ang", "anger", "fear", "disgust"];
/// Label fragments that mark a neutral sentiment class.
const NEUTRAL_HINTS: [&str; 2] = ["neu", "neutral"];
/// Label fragments that mark a positive sentiment class.
const POSITIVE_HINTS: [&str; 5] = ["pos", "positive", "happy", "joy", "love"];

/// Coarse sentiment category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentCategory {
    Negative,
    Neutral,
    Positive,
}

/// Map a raw text-model label to a sentiment category by substring hints.
///
/// Negative hints are checked first, so `"non-negative"` is negative. Labels
/// that match nothing return `None`.
#[must_use]
pub fn categorize_label(label: &str) -> Option<SentimentCategory> {
    let key = label.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    if NEGATIVE_HINTS.iter().any(|h| key.contains(h)) {
        Some(SentimentCategory::Negative)
    } else if NEUTRAL_HINTS.iter().any(|h| key.contains(h)) {
        Some(SentimentCategory::Neutral)
    } else if POSITIVE_HINTS.iter().any(|h| key.contains(h)) {
        Some(SentimentCategory::Positive)
    } else {
        None
    }
}

/// Negative/neutral/positive distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScores {
    pub negative: f64,
    pub neutral: f64,
    pub positive: f64,
}

impl SentimentScores {
    /// Fully neutral distribution.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            negative: 0.0,
            neutral: 1.0,
            positive: 0.0,
        }
    }

    /// Fold a raw model distribution into sentiment categories.
    ///
    /// Mass on labels that match no hint goes to neutral. When no label
    /// matches at all, the class count decides: two classes are read as
    /// negative/positive, three as negative/neutral/positive, anything else
    /// is treated as neutral.
    #[must_use]
    pub fn from_raw_distribution(labels: &[String], probs: &[f64]) -> Self {
        let mut scores = Self {
            negative: 0.0,
            neutral: 0.0,
            positive: 0.0,
        };
        for (label, &p) in labels.iter().zip(probs.iter()) {
            match categorize_label(label) {
                Some(SentimentCategory::Negative) => scores.negative += p,
                Some(SentimentCategory::Neutral) => scores.neutral += p,
                Some(SentimentCategory::Positive) => scores.positive += p,
                None => {}
            }
        }

        if scores.sum() <= 0.0 {
            return match probs {
                [neg, pos] => Self {
                    negative: *neg,
                    neutral: 0.0,
                    positive: *pos,
                },
                [neg, neu, pos] => Self {
                    negative: *neg,
                    neutral: *neu,
                    positive: *pos,
                },
                _ => Self::neutral(),
            };
        }

        let unknown_mass = (1.0 - scores.sum()).max(0.0);
        scores.neutral += unknown_mass;
        scores
    }

    /// Sum of the three components.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.negative + self.neutral + self.positive
    }

    /// Category with the largest mass (negative wins ties, then neutral).
    #[must_use]
    pub fn top_category(&self) -> SentimentCategory {
        if self.negative >= self.neutral && self.negative >= self.positive {
            SentimentCategory::Negative
        } else if self.neutral >= self.positive {
            SentimentCategory::Neutral
        } else {
            SentimentCategory::Positive
        }
    }
}

/// Output of an upstream text-sentiment component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSentiment {
    /// Category distribution, when the scorer produces one.
    pub scores: Option<SentimentScores>,
    /// Standalone negative score in `[0, 1]`.
    pub negative_score: f64,
}

impl TextSentiment {
    /// Result for an empty transcript.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            scores: Some(SentimentScores::neutral()),
            negative_score: 0.0,
        }
    }
}

/// Text-sentiment component consumed by the feature vectorizer.
pub trait TextSentimentScorer: Send + Sync {
    /// Score a transcript.
    fn score(&self, transcript: &str) -> Result<TextSentiment>;
}

// ---------------------------------------------------------------------------
// Lexicon scorer
// ---------------------------------------------------------------------------

/// Hits at which the lexicon score saturates at 1.0.
const LEXICON_SATURATION_HITS: f64 = 8.0;
/// Score floor applied when any high-risk term is present.
const HIGH_RISK_FLOOR: f64 = 0.8;

/// Default negative-affect lexicon (Mandarin).
const DEFAULT_NEGATIVE_TERMS: [&str; 17] = [
    "难受", "抑郁", "想哭", "崩溃", "压力", "焦虑", "失眠", "绝望", "没意义", "不想活", "烦", "恐惧",
    "害怕", "孤独", "无助", "自责", "内疚",
];
/// Default high-risk terms.
const DEFAULT_HIGH_RISK_TERMS: [&str; 3] = ["不想活", "轻生", "自杀"];

/// Detailed lexicon scoring result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconScore {
    /// Negative score in `[0, 1]`.
    pub score: f64,
    /// Total non-overlapping term occurrences.
    pub hit_count: usize,
    /// `term x count` for every term that matched.
    pub hits: Vec<String>,
    /// Whether a high-risk term was present.
    pub high_risk: bool,
}

/// Model-agnostic negative scorer based on term occurrence counts.
///
/// This is why `text_negative_score` can diverge from `text_negative`: the
/// former does not depend on whichever sentiment model produced the
/// distribution.
#[derive(Debug, Clone)]
pub struct LexiconNegScorer {
    negative_terms: Vec<String>,
    high_risk_terms: Vec<String>,
}

impl LexiconNegScorer {
    /// Scorer with the built-in lexicon.
    #[must_use]
    pub fn new() -> Self {
        Self::with_terms(
            DEFAULT_NEGATIVE_TERMS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_HIGH_RISK_TERMS.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Scorer with a custom lexicon.
    #[must_use]
    pub fn with_terms(negative_terms: Vec<String>, high_risk_terms: Vec<String>) -> Self {
        Self {
            negative_terms,
            high_risk_terms,
        }
    }

    /// Score a transcript.
    #[must_use]
    pub fn score_detailed(&self, transcript: &str) -> LexiconScore {
        if transcript.trim().is_empty() {
            return LexiconScore {
                score: 0.0,
                hit_count: 0,
                hits: Vec::new(),
                high_risk: false,
            };
        }

        let mut hit_count = 0usize;
        let mut hits = Vec::new();
        for term in &self.negative_terms {
            let count = transcript.matches(term.as_str()).count();
            if count > 0 {
                hit_count += count;
                hits.push(format!("{term}x{count}"));
            }
        }

        let high_risk = self
            .high_risk_terms
            .iter()
            .any(|t| transcript.contains(t.as_str()));
        let mut score = (hit_count as f64 / LEXICON_SATURATION_HITS).clamp(0.0, 1.0);
        if high_risk {
            score = score.max(HIGH_RISK_FLOOR);
        }

        LexiconScore {
            score,
            hit_count,
            hits,
            high_risk,
        }
    }
}

impl Default for LexiconNegScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextSentimentScorer for LexiconNegScorer {
    fn score(&self, transcript: &str) -> Result<TextSentiment> {
        Ok(TextSentiment {
            scores: None,
            negative_score: self.score_detailed(transcript).score,
        })
    }
}
