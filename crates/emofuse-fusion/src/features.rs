//! Feature vectorization for late fusion.
//!
//! Turns per-segment acoustic predictions and a text-sentiment result into the
//! fixed-order feature vector consumed by the fusion classifier. Everything
//! here is a pure function of its inputs; out-of-range numbers are clamped,
//! never rejected.
//!
//! # Audio summary
//!
//! Each segment votes for its canonical class with weight = confidence. A
//! segment with confidence exactly 0 still votes with weight
//! [`ZERO_CONFIDENCE_WEIGHT`]. The four accumulated weights are normalized to
//! a distribution; with no segments the distribution is `NEU = 1`.
//! `audio_confidence` is the max raw segment confidence, not the max of the
//! normalized distribution.
//!
//! # Text summary
//!
//! Category scores may come from an override supplied by the caller or from
//! an upstream [`TextSentimentScorer`]. Missing components are back-filled so
//! that `negative + neutral + positive == 1`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use emofuse_core::{Emotion, FeatureMode, Result, CANONICAL_EMOTIONS, NUM_CLASSES};

use crate::sentiment::{SentimentScores, TextSentiment, TextSentimentScorer};

/// Vote weight given to a segment whose confidence is exactly 0.
///
/// Zero-confidence segments still count (barely). Whether they should count
/// at all is a policy choice; this keeps them from vanishing from the sum.
pub const ZERO_CONFIDENCE_WEIGHT: f64 = 1e-6;

/// Transcript length (in characters) that maps to `text_length_norm = 1`.
pub const TEXT_LENGTH_CAP: f64 = 256.0;

/// Floor used inside `ln` when computing entropy.
const ENTROPY_EPS: f64 = 1e-12;

/// One acoustic segment prediction as produced upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentPrediction {
    /// Raw upstream emotion code (any vocabulary).
    pub emotion_code: String,
    /// Segment confidence, expected in `[0, 1]`.
    pub confidence: f64,
}

impl SegmentPrediction {
    pub fn new(emotion_code: impl Into<String>, confidence: f64) -> Self {
        Self {
            emotion_code: emotion_code.into(),
            confidence,
        }
    }
}

/// Confidence-weighted summary of a clip's segment predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSummary {
    pub audio_prob_ang: f64,
    pub audio_prob_hap: f64,
    pub audio_prob_neu: f64,
    pub audio_prob_sad: f64,
    pub audio_confidence: f64,
    pub audio_entropy: f64,
    pub dominant_emotion: Emotion,
}

impl AudioSummary {
    /// Summarize a clip's segment predictions.
    #[must_use]
    pub fn from_segments(segments: &[SegmentPrediction]) -> Self {
        let mut weights = [0.0_f64; NUM_CLASSES];
        let mut max_confidence = 0.0_f64;

        for segment in segments {
            let confidence = clamp_unit(segment.confidence);
            let emotion = Emotion::normalize(&segment.emotion_code);
            let weight = if confidence > 0.0 {
                confidence
            } else {
                ZERO_CONFIDENCE_WEIGHT
            };
            weights[emotion.index()] += weight;
            max_confidence = max_confidence.max(confidence);
        }

        let total: f64 = weights.iter().sum();
        let probs = if total > 0.0 {
            weights.map(|w| w / total)
        } else {
            let mut neutral = [0.0; NUM_CLASSES];
            neutral[Emotion::Neu.index()] = 1.0;
            neutral
        };

        Self {
            audio_prob_ang: probs[0],
            audio_prob_hap: probs[1],
            audio_prob_neu: probs[2],
            audio_prob_sad: probs[3],
            audio_confidence: max_confidence,
            audio_entropy: shannon_entropy(&probs),
            dominant_emotion: argmax_emotion(&probs),
        }
    }

    /// Distribution in canonical order.
    #[must_use]
    pub fn probabilities(&self) -> [f64; NUM_CLASSES] {
        [
            self.audio_prob_ang,
            self.audio_prob_hap,
            self.audio_prob_neu,
            self.audio_prob_sad,
        ]
    }
}

/// Clip-level label chosen by majority vote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverallEmotion {
    pub emotion: Emotion,
    pub confidence: f64,
}

/// Majority vote over segment labels.
///
/// Ties go to the label holding the single most confident segment (then
/// canonical order). The reported confidence is the mean confidence of the
/// segments carrying the winning label. No segments yields `NEU` at 0.
#[must_use]
pub fn aggregate_overall(segments: &[SegmentPrediction]) -> OverallEmotion {
    if segments.is_empty() {
        return OverallEmotion {
            emotion: Emotion::Neu,
            confidence: 0.0,
        };
    }

    let mut votes = [0usize; NUM_CLASSES];
    let mut best_single = [f64::NEG_INFINITY; NUM_CLASSES];
    let mut confidence_sum = [0.0_f64; NUM_CLASSES];
    for segment in segments {
        let idx = Emotion::normalize(&segment.emotion_code).index();
        let confidence = clamp_unit(segment.confidence);
        votes[idx] += 1;
        best_single[idx] = best_single[idx].max(confidence);
        confidence_sum[idx] += confidence;
    }

    let mut winner = 0usize;
    for idx in 1..NUM_CLASSES {
        let more_votes = votes[idx] > votes[winner];
        let tie_but_stronger = votes[idx] == votes[winner] && best_single[idx] > best_single[winner];
        if more_votes || tie_but_stronger {
            winner = idx;
        }
    }

    OverallEmotion {
        emotion: CANONICAL_EMOTIONS[winner],
        confidence: confidence_sum[winner] / votes[winner] as f64,
    }
}

/// Caller-supplied text sentiment components. Any subset may be given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSentimentInput {
    pub negative: Option<f64>,
    pub neutral: Option<f64>,
    pub positive: Option<f64>,
    pub negative_score: Option<f64>,
}

impl TextSentimentInput {
    fn has_distribution(&self) -> bool {
        self.negative.is_some() || self.neutral.is_some() || self.positive.is_some()
    }

    fn is_empty(&self) -> bool {
        !self.has_distribution() && self.negative_score.is_none()
    }
}

impl From<&TextSentiment> for TextSentimentInput {
    fn from(sentiment: &TextSentiment) -> Self {
        Self {
            negative: sentiment.scores.map(|s| s.negative),
            neutral: sentiment.scores.map(|s| s.neutral),
            positive: sentiment.scores.map(|s| s.positive),
            negative_score: Some(sentiment.negative_score),
        }
    }
}

/// Text-summary features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFeatures {
    pub text_negative: f64,
    pub text_neutral: f64,
    pub text_positive: f64,
    pub text_negative_score: f64,
    pub text_length_norm: f64,
}

impl TextFeatures {
    /// Build text features from a (possibly partial) sentiment input.
    ///
    /// - No distribution and no negative score: neutral = 1.
    /// - Only a negative score: negative = score, neutral = 1 - score, positive = 0.
    /// - Partial distribution with a negative score: missing components fall
    ///   back to negative = score, neutral = 1 - score, positive = 0.
    /// - Partial distribution without one: the first missing component in
    ///   neutral, positive, negative order absorbs the remaining mass and the
    ///   rest are 0.
    ///
    /// Given components are clamped to `[0, 1]` and the triple is
    /// renormalized.
    #[must_use]
    pub fn from_input(input: &TextSentimentInput, transcript_chars: usize) -> Self {
        let negative_score = input.negative_score.map(clamp_unit);
        let scores = if input.has_distribution() {
            backfill(input, negative_score)
        } else if let Some(score) = negative_score {
            SentimentScores {
                negative: score,
                neutral: 1.0 - score,
                positive: 0.0,
            }
        } else {
            SentimentScores::neutral()
        };

        Self {
            text_negative: scores.negative,
            text_neutral: scores.neutral,
            text_positive: scores.positive,
            text_negative_score: negative_score.unwrap_or(scores.negative),
            text_length_norm: (transcript_chars as f64 / TEXT_LENGTH_CAP).min(1.0),
        }
    }
}

fn backfill(input: &TextSentimentInput, negative_score: Option<f64>) -> SentimentScores {
    let mut negative = input.negative.map(clamp_unit);
    let mut neutral = input.neutral.map(clamp_unit);
    let mut positive = input.positive.map(clamp_unit);

    if let Some(score) = negative_score {
        negative = negative.or(Some(score));
        neutral = neutral.or(Some(1.0 - score));
        positive = positive.or(Some(0.0));
    } else {
        let given: f64 = [negative, neutral, positive].iter().flatten().sum();
        let mut remaining = (1.0 - given).max(0.0);
        for slot in [&mut neutral, &mut positive, &mut negative] {
            if slot.is_none() {
                *slot = Some(remaining);
                remaining = 0.0;
            }
        }
    }

    let scores = SentimentScores {
        negative: negative.unwrap_or(0.0),
        neutral: neutral.unwrap_or(0.0),
        positive: positive.unwrap_or(0.0),
    };
    let total = scores.sum();
    if total > 0.0 {
        SentimentScores {
            negative: scores.negative / total,
            neutral: scores.neutral / total,
            positive: scores.positive / total,
        }
    } else {
        SentimentScores::neutral()
    }
}

/// Both summaries for one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub audio: AudioSummary,
    pub text: TextFeatures,
}

impl FeatureSet {
    /// Value of a canonical feature column, `None` for unknown names.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<f64> {
        let value = match column {
            "audio_prob_ang" => self.audio.audio_prob_ang,
            "audio_prob_hap" => self.audio.audio_prob_hap,
            "audio_prob_neu" => self.audio.audio_prob_neu,
            "audio_prob_sad" => self.audio.audio_prob_sad,
            "audio_confidence" => self.audio.audio_confidence,
            "audio_entropy" => self.audio.audio_entropy,
            "text_negative" => self.text.text_negative,
            "text_neutral" => self.text.text_neutral,
            "text_positive" => self.text.text_positive,
            "text_negative_score" => self.text.text_negative_score,
            "text_length_norm" => self.text.text_length_norm,
            _ => return None,
        };
        Some(value)
    }

    /// Vector in the column order of `mode`.
    #[must_use]
    pub fn vector(&self, mode: FeatureMode) -> Vec<f64> {
        mode.columns()
            .into_iter()
            .map(|c| self.get(c).unwrap_or(0.0))
            .collect()
    }

    /// Every canonical feature keyed by column name.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, f64> {
        FeatureMode::Fusion
            .columns()
            .into_iter()
            .map(|c| (c.to_string(), self.get(c).unwrap_or(0.0)))
            .collect()
    }
}

/// Builds [`FeatureSet`]s from raw upstream outputs.
#[derive(Clone, Default)]
pub struct FeatureVectorizer {
    text_scorer: Option<Arc<dyn TextSentimentScorer>>,
}

impl FeatureVectorizer {
    /// Vectorizer without an upstream text scorer; text features come from
    /// overrides only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delegate text scoring to `scorer` when no override is supplied.
    #[must_use]
    pub fn with_text_scorer(mut self, scorer: Arc<dyn TextSentimentScorer>) -> Self {
        self.text_scorer = Some(scorer);
        self
    }

    /// Audio summary for a clip.
    #[must_use]
    pub fn audio_summary(&self, segments: &[SegmentPrediction]) -> AudioSummary {
        AudioSummary::from_segments(segments)
    }

    /// Text features for a transcript.
    ///
    /// A non-empty `overrides` wins over the upstream scorer. Empty transcripts
    /// without overrides are fully neutral.
    pub fn text_features(
        &self,
        transcript: &str,
        overrides: Option<&TextSentimentInput>,
    ) -> Result<TextFeatures> {
        let chars = transcript.trim().chars().count();
        if let Some(input) = overrides.filter(|i| !i.is_empty()) {
            return Ok(TextFeatures::from_input(input, chars));
        }

        let sentiment = match &self.text_scorer {
            Some(_) if chars == 0 => TextSentiment::empty(),
            Some(scorer) => scorer.score(transcript)?,
            None => TextSentiment::empty(),
        };
        Ok(TextFeatures::from_input(
            &TextSentimentInput::from(&sentiment),
            chars,
        ))
    }

    /// Both summaries for one clip.
    pub fn build(
        &self,
        segments: &[SegmentPrediction],
        transcript: &str,
        overrides: Option<&TextSentimentInput>,
    ) -> Result<FeatureSet> {
        Ok(FeatureSet {
            audio: self.audio_summary(segments),
            text: self.text_features(transcript, overrides)?,
        })
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn shannon_entropy(probs: &[f64]) -> f64 {
    -probs.iter().map(|&p| p * p.max(ENTROPY_EPS).ln()).sum::<f64>()
}

fn argmax_emotion(probs: &[f64; NUM_CLASSES]) -> Emotion {
    let mut best = 0usize;
    for (idx, &p) in probs.iter().enumerate() {
        if p > probs[best] {
            best = idx;
        }
    }
    CANONICAL_EMOTIONS[best]
}
