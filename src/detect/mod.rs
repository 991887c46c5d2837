//! Language, crisis, and emotional-state detection heuristics.
//!
//! Everything in this module is a pure, total function: no error paths, no
//! I/O. Absence of a match always falls back to a default (English,
//! non-crisis, neutral). The phrase lists are configuration data meant to be
//! expanded over time - they are not a complete or clinically validated
//! safety system.

use serde::{Deserialize, Serialize};

/// Supported conversation languages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English.
    #[default]
    En,
    /// Swahili.
    Sw,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::En => write!(f, "en"),
            Language::Sw => write!(f, "sw"),
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" => Ok(Language::En),
            "sw" => Ok(Language::Sw),
            _ => Err(format!("Unknown language: {}", s)),
        }
    }
}

/// Coarse emotional state carried in the conversation context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalState {
    #[default]
    Neutral,
    Sad,
    Anxious,
    Angry,
    Positive,
}

impl std::fmt::Display for EmotionalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmotionalState::Neutral => write!(f, "neutral"),
            EmotionalState::Sad => write!(f, "sad"),
            EmotionalState::Anxious => write!(f, "anxious"),
            EmotionalState::Angry => write!(f, "angry"),
            EmotionalState::Positive => write!(f, "positive"),
        }
    }
}

/// Swahili marker words for the language vote.
const SWAHILI_MARKERS: &[&str] = &[
    "nina", "sina", "wewe", "mimi", "habari", "mambo", "asante", "karibu", "pole", "sana",
    "nataka", "nahitaji", "msaada", "sijui", "kwangu", "yangu", "leo", "kesho", "shida",
    "huzuni", "hofu", "wasiwasi", "dawa", "hospitali", "daktari", "niko", "siko", "najisikia",
];

/// English marker words for the language vote.
const ENGLISH_MARKERS: &[&str] = &[
    "the", "is", "are", "was", "have", "has", "i", "you", "my", "me", "feel", "feeling", "need",
    "want", "help", "today", "please", "thanks", "can", "how", "what", "with", "and", "not",
];

/// Self-harm / suicide phrases, both languages. Any case-insensitive
/// substring match anywhere in the input triggers the crisis protocol.
const CRISIS_PHRASES: &[&str] = &[
    "kill myself",
    "end my life",
    "suicide",
    "suicidal",
    "want to die",
    "wish i was dead",
    "better off dead",
    "hurt myself",
    "harm myself",
    "self harm",
    "self-harm",
    "no reason to live",
    "kujiua",
    "kujidhuru",
    "nataka kufa",
    "sitaki kuishi",
    "maisha hayana maana",
];

/// Detect the language of a free-text message.
///
/// Tokenizes on non-alphabetic characters and votes each token against the
/// two marker lists; the higher score wins, English on a tie or empty input.
/// Good enough to pick a system-prompt language, nothing more.
pub fn detect_language(text: &str) -> Language {
    let lowered = text.to_lowercase();
    let mut sw = 0usize;
    let mut en = 0usize;

    for token in lowered.split(|c: char| !c.is_alphabetic()) {
        if token.is_empty() {
            continue;
        }
        if SWAHILI_MARKERS.contains(&token) {
            sw += 1;
        }
        if ENGLISH_MARKERS.contains(&token) {
            en += 1;
        }
    }

    if sw > en {
        Language::Sw
    } else {
        Language::En
    }
}

/// True if the message contains any configured crisis phrase.
///
/// This gate runs before all other processing on every inbound message.
pub fn is_crisis(text: &str) -> bool {
    let lowered = text.to_lowercase();
    CRISIS_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// True if the message indicates the user is safe again, allowing the
/// sticky high risk level to de-escalate.
pub fn indicates_safety(text: &str) -> bool {
    let lowered = text.to_lowercase();
    const SAFETY_PHRASES: &[&str] = &["i am safe", "i'm safe", "feeling safe", "niko salama"];
    SAFETY_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Infer a coarse emotional state from keyword hits. First matching bucket
/// in declaration order wins; neutral when nothing matches.
pub fn infer_emotional_state(text: &str) -> EmotionalState {
    let lowered = text.to_lowercase();

    const BUCKETS: &[(EmotionalState, &[&str])] = &[
        (
            EmotionalState::Anxious,
            &[
                "anxious", "anxiety", "worried", "panic", "nervous", "afraid", "scared",
                "wasiwasi", "hofu", "woga",
            ],
        ),
        (
            EmotionalState::Sad,
            &[
                "sad", "depressed", "depression", "hopeless", "lonely", "crying", "cry",
                "huzuni", "najisikia vibaya", "upweke",
            ],
        ),
        (
            EmotionalState::Angry,
            &[
                "angry", "furious", "frustrated", "annoyed", "hate", "hasira", "nimekasirika",
            ],
        ),
        (
            EmotionalState::Positive,
            &[
                "happy", "great", "better", "good", "grateful", "thankful", "furaha", "nzuri",
                "asante",
            ],
        ),
    ];

    for (state, keywords) in BUCKETS {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return *state;
        }
    }
    EmotionalState::Neutral
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language_swahili() {
        assert_eq!(detect_language("nina huzuni sana leo"), Language::Sw);
        assert_eq!(detect_language("nahitaji msaada wa dawa"), Language::Sw);
    }

    #[test]
    fn test_detect_language_english() {
        assert_eq!(detect_language("I feel anxious today"), Language::En);
        assert_eq!(detect_language("what is the stock level"), Language::En);
    }

    #[test]
    fn test_detect_language_defaults_to_english() {
        assert_eq!(detect_language(""), Language::En);
        assert_eq!(detect_language("xyzzy 12345"), Language::En);
    }

    #[test]
    fn test_crisis_detection_any_position_any_case() {
        assert!(is_crisis("I want to KILL MYSELF"));
        assert!(is_crisis("sometimes i think about suicide, you know"));
        assert!(is_crisis("nataka kufa"));
        assert!(is_crisis("honestly... no reason to live anymore"));
    }

    #[test]
    fn test_non_crisis_text() {
        assert!(!is_crisis("I am stressed about my exams"));
        assert!(!is_crisis(""));
        assert!(!is_crisis("the patient needs amoxicillin"));
    }

    #[test]
    fn test_safety_indication() {
        assert!(indicates_safety("I am safe now, thank you"));
        assert!(indicates_safety("niko salama"));
        assert!(!indicates_safety("I am not okay"));
    }

    #[test]
    fn test_emotional_state_buckets() {
        assert_eq!(infer_emotional_state("I feel so anxious"), EmotionalState::Anxious);
        assert_eq!(infer_emotional_state("nina huzuni"), EmotionalState::Sad);
        assert_eq!(infer_emotional_state("I am furious"), EmotionalState::Angry);
        assert_eq!(infer_emotional_state("feeling much better"), EmotionalState::Positive);
        assert_eq!(infer_emotional_state("where is my order"), EmotionalState::Neutral);
    }

    #[test]
    fn test_language_round_trip() {
        assert_eq!("sw".parse::<Language>().unwrap(), Language::Sw);
        assert_eq!(Language::Sw.to_string(), "sw");
        assert!("fr".parse::<Language>().is_err());
    }
}
