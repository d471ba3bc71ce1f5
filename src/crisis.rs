//! Distress classification
//!
//! Pure classifier fusing keyword matching with the emotion scores the
//! speech service attaches to user transcripts. Keyword-only detection
//! misses indirect distress carried by tone; the emotion path catches those
//! at the cost of possible false positives, mitigated by a high confidence
//! threshold and an explicit user opt-out in the UI.

use crate::session::EmotionScore;

/// Minimum emotion confidence for the emotion-fused path
pub const CRISIS_SCORE_THRESHOLD: f32 = 0.6;

/// Emotion names that count as distress signals
const DISTRESS_EMOTIONS: &[&str] = &[
    "distress",
    "sadness",
    "fear",
    "pain",
    "anxiety",
    "desperation",
];

/// Built-in crisis phrases, matched case-insensitively as substrings
const CRISIS_KEYWORDS: &[&str] = &[
    "end it all",
    "kill myself",
    "suicide",
    "suicidal",
    "want to die",
    "hurt myself",
    "self harm",
    "self-harm",
    "no reason to live",
    "better off without me",
    "can't go on",
];

/// Classifies user utterances as distressed or not
pub struct CrisisDetector {
    keywords: Vec<String>,
}

impl Default for CrisisDetector {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl CrisisDetector {
    /// Create a detector with the built-in phrase list plus `extra_keywords`
    /// (normalized to lowercase, blanks skipped)
    #[must_use]
    pub fn new(extra_keywords: &[String]) -> Self {
        let keywords = CRISIS_KEYWORDS
            .iter()
            .map(|k| (*k).to_string())
            .chain(
                extra_keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty()),
            )
            .collect();
        Self { keywords }
    }

    /// Classify one user utterance
    ///
    /// Returns `true` when the text contains a crisis phrase, or when any
    /// emotion named in the distress set scores above
    /// [`CRISIS_SCORE_THRESHOLD`].
    #[must_use]
    pub fn detect(&self, text: &str, emotions: &[EmotionScore]) -> bool {
        let lowered = text.to_lowercase();
        if self.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            return true;
        }

        emotions.iter().any(|e| {
            e.score > CRISIS_SCORE_THRESHOLD
                && DISTRESS_EMOTIONS.contains(&e.name.to_lowercase().as_str())
        })
    }
}
