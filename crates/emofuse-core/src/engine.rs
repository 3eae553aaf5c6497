//! Acoustic engine and routing selection.
//!
//! Upstream acoustic classifiers are external collaborators. This module only
//! fixes how they are selected: engines and routing strategies are closed
//! enums parsed once at configuration time, and every engine is reached
//! through the [`AcousticClassifier`] trait.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{EmoFuseError, Emotion, Result};

/// Acoustic emotion engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// SpeechBrain wav2vec2 IEMOCAP classifier.
    Speechbrain,
    /// Fine-tuned Hugging Face wav2vec2 sequence classifier.
    HfWav2Vec2,
}

impl FromStr for Engine {
    type Err = EmoFuseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "speechbrain" => Ok(Self::Speechbrain),
            "hf_wav2vec2" => Ok(Self::HfWav2Vec2),
            other => Err(EmoFuseError::Config(format!("unknown engine {other:?}"))),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Speechbrain => f.write_str("speechbrain"),
            Self::HfWav2Vec2 => f.write_str("hf_wav2vec2"),
        }
    }
}

/// How a request is routed to an acoustic model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    /// One model serves every request.
    #[default]
    Single,
    /// One model per transcript language.
    ByLanguage,
}

impl FromStr for Routing {
    type Err = EmoFuseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "language" | "by_language" => Ok(Self::ByLanguage),
            other => Err(EmoFuseError::Config(format!("unknown routing {other:?}"))),
        }
    }
}

/// Supported transcript languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Zh,
}

impl Language {
    /// Parse a loose language tag (`zh-CN`, `en_US`, `EN`...). Unsupported or
    /// empty tags yield `None`.
    #[must_use]
    pub fn normalize(tag: &str) -> Option<Self> {
        let key = tag.trim().to_lowercase();
        if key.starts_with("zh") {
            Some(Self::Zh)
        } else if key.starts_with("en") {
            Some(Self::En)
        } else {
            None
        }
    }

    /// Guess the language of a corpus file from its path.
    #[must_use]
    pub fn infer_from_path(path: &Path, fallback: Self) -> Self {
        let key = path.to_string_lossy().replace('\\', "/").to_lowercase();
        if key.contains("casia") || key.contains("/zh/") || key.contains("/cn/") {
            Self::Zh
        } else if key.contains("iemocap") || key.contains("ravdess") || key.contains("/en/") {
            Self::En
        } else {
            fallback
        }
    }
}

/// Capability shared by every acoustic engine.
pub trait AcousticClassifier: Send + Sync {
    /// Classify one mono 16 kHz WAV segment into a canonical emotion and a
    /// confidence.
    fn classify(&self, wav_path: &Path) -> Result<(Emotion, f64)>;

    /// Engine family backing this classifier.
    fn engine(&self) -> Engine;
}

/// Dispatches classification requests according to a [`Routing`] strategy.
pub struct AcousticRouter {
    routing: Routing,
    default_language: Language,
    classifiers: HashMap<Language, Arc<dyn AcousticClassifier>>,
}

impl AcousticRouter {
    /// Route every request to `classifier`.
    pub fn single(classifier: Arc<dyn AcousticClassifier>) -> Self {
        let mut classifiers = HashMap::new();
        classifiers.insert(Language::En, classifier);
        Self {
            routing: Routing::Single,
            default_language: Language::En,
            classifiers,
        }
    }

    /// Route by language. `default_language` must have a classifier.
    pub fn by_language(
        default_language: Language,
        classifiers: HashMap<Language, Arc<dyn AcousticClassifier>>,
    ) -> Result<Self> {
        if !classifiers.contains_key(&default_language) {
            return Err(EmoFuseError::Config(format!(
                "no acoustic classifier registered for default language {default_language:?}"
            )));
        }
        Ok(Self {
            routing: Routing::ByLanguage,
            default_language,
            classifiers,
        })
    }

    /// Routing strategy in use.
    pub fn routing(&self) -> Routing {
        self.routing
    }

    /// Classify a segment. Confidence is clamped to `[0, 1]`.
    pub fn classify(&self, wav_path: &Path, language: Option<Language>) -> Result<(Emotion, f64)> {
        let route = match self.routing {
            Routing::Single => self.default_language,
            Routing::ByLanguage => language.unwrap_or(self.default_language),
        };
        let classifier = self
            .classifiers
            .get(&route)
            .or_else(|| self.classifiers.get(&self.default_language))
            .ok_or_else(|| EmoFuseError::Config("acoustic router has no classifiers".to_string()))?;

        let (emotion, confidence) = classifier.classify(wav_path)?;
        tracing::debug!(
            engine = %classifier.engine(),
            language = ?route,
            emotion = %emotion,
            confidence,
            "Classified segment"
        );
        Ok((emotion, confidence.clamp(0.0, 1.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct FixedClassifier {
        emotion: Emotion,
        confidence: f64,
        engine: Engine,
    }

    impl AcousticClassifier for FixedClassifier {
        fn classify(&self, _wav_path: &Path) -> Result<(Emotion, f64)> {
            Ok((self.emotion, self.confidence))
        }

        fn engine(&self) -> Engine {
            self.engine
        }
    }

    fn fixed(emotion: Emotion, confidence: f64, engine: Engine) -> Arc<dyn AcousticClassifier> {
        Arc::new(FixedClassifier {
            emotion,
            confidence,
            engine,
        })
    }

    #[test]
    fn test_engine_parse() {
        assert_eq!("speechbrain".parse::<Engine>().unwrap(), Engine::Speechbrain);
        assert_eq!("HF_WAV2VEC2".parse::<Engine>().unwrap(), Engine::HfWav2Vec2);
        assert!("whisper".parse::<Engine>().is_err());
    }

    #[test]
    fn test_routing_parse() {
        assert_eq!("single".parse::<Routing>().unwrap(), Routing::Single);
        assert_eq!("language".parse::<Routing>().unwrap(), Routing::ByLanguage);
        assert!("round_robin".parse::<Routing>().is_err());
    }

    #[test]
    fn test_language_normalize() {
        assert_eq!(Language::normalize("zh-CN"), Some(Language::Zh));
        assert_eq!(Language::normalize("en_US"), Some(Language::En));
        assert_eq!(Language::normalize("fr"), None);
        assert_eq!(Language::normalize(""), None);
    }

    #[test]
    fn test_language_infer_from_path() {
        let p = PathBuf::from("data/CASIA/angry/201.wav");
        assert_eq!(Language::infer_from_path(&p, Language::En), Language::Zh);
        let p = PathBuf::from("data/IEMOCAP/Session1/a.wav");
        assert_eq!(Language::infer_from_path(&p, Language::Zh), Language::En);
        let p = PathBuf::from("misc/clip.wav");
        assert_eq!(Language::infer_from_path(&p, Language::Zh), Language::Zh);
    }

    #[test]
    fn test_single_routing_ignores_language() {
        let router = AcousticRouter::single(fixed(Emotion::Sad, 0.7, Engine::Speechbrain));
        let (emotion, _) = router
            .classify(Path::new("a.wav"), Some(Language::Zh))
            .unwrap();
        assert_eq!(emotion, Emotion::Sad);
        assert_eq!(router.routing(), Routing::Single);
    }

    #[test]
    fn test_language_routing_dispatches() {
        let mut map = HashMap::new();
        map.insert(Language::En, fixed(Emotion::Ang, 0.9, Engine::HfWav2Vec2));
        map.insert(Language::Zh, fixed(Emotion::Hap, 0.6, Engine::HfWav2Vec2));
        let router = AcousticRouter::by_language(Language::En, map).unwrap();

        let (zh, _) = router.classify(Path::new("a.wav"), Some(Language::Zh)).unwrap();
        assert_eq!(zh, Emotion::Hap);
        let (default, _) = router.classify(Path::new("a.wav"), None).unwrap();
        assert_eq!(default, Emotion::Ang);
    }

    #[test]
    fn test_language_routing_requires_default() {
        let mut map = HashMap::new();
        map.insert(Language::Zh, fixed(Emotion::Hap, 0.6, Engine::HfWav2Vec2));
        assert!(AcousticRouter::by_language(Language::En, map).is_err());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let router = AcousticRouter::single(fixed(Emotion::Neu, 1.7, Engine::Speechbrain));
        let (_, confidence) = router.classify(Path::new("a.wav"), None).unwrap();
        assert!((confidence - 1.0).abs() < 1e-12);
    }
}
