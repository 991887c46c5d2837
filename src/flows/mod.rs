//! Scripted conversational flows.
//!
//! A flow is a fixed, step-indexed script used for sensitive multi-step
//! processes: mental-health self-checks, HIV self-test ordering, and
//! circumcision pre-screening. Advancing a flow is a pure function of
//! `(state, answer)`; no retrieval and no LLM call happens while a flow is
//! active. The state itself is ephemeral and carried by the client between
//! turns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::Language;

/// The named scripted flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// PHQ-2/GAD-2 style mood self-check.
    SelfCheck,
    /// HIV self-test kit ordering.
    HivSelfTest,
    /// Circumcision booking pre-screening.
    Circumcision,
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowKind::SelfCheck => write!(f, "self_check"),
            FlowKind::HivSelfTest => write!(f, "hiv_self_test"),
            FlowKind::Circumcision => write!(f, "circumcision"),
        }
    }
}

/// Ephemeral, client-held flow state. Step 0 is the entry step: its
/// transition emits the opening question without recording an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub kind: FlowKind,
    pub step: u32,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

impl FlowState {
    /// Start a flow at its entry step.
    pub fn new(kind: FlowKind) -> Self {
        Self {
            kind,
            step: 0,
            answers: BTreeMap::new(),
        }
    }

    fn record(mut self, field: &str, answer: &str) -> Self {
        self.answers.insert(field.to_string(), answer.trim().to_string());
        self
    }

    fn at_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }
}

/// Terminal signal emitted when a flow finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowOutcome {
    /// The flow completed a booking/order; the surrounding app notifies the
    /// delivery collaborator with these collected fields.
    IntentCompleted {
        flow: FlowKind,
        fields: BTreeMap<String, String>,
    },
    /// Low eligibility or elevated score: hand over to a human provider.
    Referral { flow: FlowKind },
    /// The flow finished with no follow-up action needed.
    Completed { flow: FlowKind },
}

/// Result of advancing a flow by one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowTransition {
    /// The state to carry into the next turn; `None` when the flow is done.
    pub next: Option<FlowState>,
    /// Exactly one bot message for this step.
    pub reply: String,
    /// Suggestion chips for the step.
    pub suggestions: Vec<String>,
    /// Set when the flow reached a terminal state.
    pub outcome: Option<FlowOutcome>,
}

impl FlowTransition {
    fn ask(next: FlowState, reply: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            next: Some(next),
            reply: reply.into(),
            suggestions,
            outcome: None,
        }
    }

    fn terminal(reply: impl Into<String>, suggestions: Vec<String>, outcome: FlowOutcome) -> Self {
        Self {
            next: None,
            reply: reply.into(),
            suggestions,
            outcome: Some(outcome),
        }
    }
}

/// Advance a flow by one user answer.
///
/// Pure and deterministic: a fixed answer sequence always reaches the same
/// terminal state. Unparseable answers re-ask the current step instead of
/// advancing. `min_circumcision_age` is the eligibility cutoff for the
/// pre-screening early exit.
pub fn advance(
    state: FlowState,
    answer: &str,
    language: Language,
    min_circumcision_age: u32,
) -> FlowTransition {
    match state.kind {
        FlowKind::SelfCheck => advance_self_check(state, answer, language),
        FlowKind::HivSelfTest => advance_hiv(state, answer, language),
        FlowKind::Circumcision => advance_circumcision(state, answer, language, min_circumcision_age),
    }
}

// ============================================================================
// Self-check (PHQ-2/GAD-2 style)
// ============================================================================

/// Tier of a self-check score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfCheckTier {
    Minimal,
    SomeConcern,
    SignificantConcern,
}

/// Sum every integer found in the answer (e.g. "Stress: 2,2,1" -> 5).
/// An overflowing sum is treated like any other unparseable answer.
pub fn score_self_check(answer: &str) -> Option<u32> {
    let mut total = 0u32;
    let mut found = false;
    for token in answer.split(|c: char| !c.is_ascii_digit()) {
        if token.is_empty() {
            continue;
        }
        total = total.checked_add(token.parse::<u32>().ok()?)?;
        found = true;
    }
    found.then_some(total)
}

/// Classify a summed score.
pub fn self_check_tier(score: u32) -> SelfCheckTier {
    match score {
        0..=2 => SelfCheckTier::Minimal,
        3..=4 => SelfCheckTier::SomeConcern,
        _ => SelfCheckTier::SignificantConcern,
    }
}

fn advance_self_check(state: FlowState, answer: &str, language: Language) -> FlowTransition {
    match state.step {
        0 => {
            let reply = match language {
                Language::En => {
                    "Let's do a quick check-in. Over the last two weeks, how often have you felt: \
                     (1) stressed or overwhelmed, (2) unable to stop worrying, (3) little interest \
                     in things you enjoy? Answer each 0-3 (0 = not at all, 3 = nearly every day), \
                     for example: Stress: 2,2,1"
                }
                Language::Sw => {
                    "Tufanye ukaguzi mfupi. Katika wiki mbili zilizopita, ni mara ngapi umejisikia: \
                     (1) msongo au kuzidiwa, (2) kushindwa kuacha kuwa na wasiwasi, (3) kukosa hamu \
                     ya mambo unayopenda? Jibu kila moja 0-3 (0 = hapana kabisa, 3 = karibu kila siku), \
                     kwa mfano: Msongo: 2,2,1"
                }
            };
            FlowTransition::ask(state.at_step(1), reply, vec![])
        }
        _ => {
            let Some(score) = score_self_check(answer) else {
                let reply = match language {
                    Language::En => "Please answer with three numbers 0-3, for example: 2,2,1",
                    Language::Sw => "Tafadhali jibu kwa namba tatu 0-3, kwa mfano: 2,2,1",
                };
                return FlowTransition::ask(state, reply, vec![]);
            };

            let state = state.record("scores", answer);
            match self_check_tier(score) {
                SelfCheckTier::Minimal => {
                    let reply = match language {
                        Language::En => format!(
                            "Your score is {}. That looks like a normal amount of day-to-day \
                             pressure. Keep doing what works for you, and check in with me anytime.",
                            score
                        ),
                        Language::Sw => format!(
                            "Alama yako ni {}. Hiyo inaonekana kama msongo wa kawaida wa kila siku. \
                             Endelea na yanayokufaa, na unaweza kuongea nami wakati wowote.",
                            score
                        ),
                    };
                    FlowTransition::terminal(
                        reply,
                        breathing_suggestions(language),
                        FlowOutcome::Completed { flow: FlowKind::SelfCheck },
                    )
                }
                SelfCheckTier::SomeConcern => {
                    let reply = match language {
                        Language::En => format!(
                            "Your score is {}. You're carrying some real pressure right now. A short \
                             breathing exercise can help today, and it's worth talking it through \
                             with someone you trust.",
                            score
                        ),
                        Language::Sw => format!(
                            "Alama yako ni {}. Unabeba msongo wa kweli kwa sasa. Zoezi fupi la kupumua \
                             linaweza kusaidia leo, na ni vyema kuzungumza na mtu unayemwamini.",
                            score
                        ),
                    };
                    FlowTransition::terminal(
                        reply,
                        breathing_suggestions(language),
                        FlowOutcome::Completed { flow: FlowKind::SelfCheck },
                    )
                }
                SelfCheckTier::SignificantConcern => {
                    let reply = match language {
                        Language::En => format!(
                            "Your score is {}, which suggests a significant level of concern. You \
                             don't have to manage this alone - I'd strongly recommend talking to a \
                             counselor, and I can help you connect with one.",
                            score
                        ),
                        Language::Sw => format!(
                            "Alama yako ni {}, inayoashiria kiwango kikubwa cha wasiwasi. Huhitaji \
                             kubeba haya peke yako - nakushauri sana uongee na mshauri, na ninaweza \
                             kukusaidia kumpata.",
                            score
                        ),
                    };
                    let suggestions = match language {
                        Language::En => vec![
                            "Talk to a counselor".to_string(),
                            "Start a breathing exercise".to_string(),
                        ],
                        Language::Sw => vec![
                            "Ongea na mshauri".to_string(),
                            "Anza zoezi la kupumua".to_string(),
                        ],
                    };
                    FlowTransition::terminal(
                        reply,
                        suggestions,
                        FlowOutcome::Referral { flow: FlowKind::SelfCheck },
                    )
                }
            }
        }
    }
}

fn breathing_suggestions(language: Language) -> Vec<String> {
    match language {
        Language::En => vec![
            "Start a breathing exercise".to_string(),
            "Talk to a counselor".to_string(),
        ],
        Language::Sw => vec![
            "Anza zoezi la kupumua".to_string(),
            "Ongea na mshauri".to_string(),
        ],
    }
}

// ============================================================================
// HIV self-test ordering
// ============================================================================

fn advance_hiv(state: FlowState, answer: &str, language: Language) -> FlowTransition {
    match state.step {
        0 => {
            let reply = match language {
                Language::En => {
                    "I can arrange a discreet HIV self-test kit for you. It's private, accurate, \
                     and comes with clear instructions. What phone number should the dispatch team \
                     use to reach you?"
                }
                Language::Sw => {
                    "Naweza kukupangia kipimo cha HIV cha kujipima kwa siri. Ni cha faragha, sahihi, \
                     na kina maelekezo rahisi. Timu ya usambazaji itumie nambari gani ya simu \
                     kukufikia?"
                }
            };
            FlowTransition::ask(state.at_step(1), reply, vec![])
        }
        1 => {
            let state = state.record("phone", answer).at_step(2);
            let reply = match language {
                Language::En => "Thanks. Where should we deliver the kit? A street, landmark, or pickup pharmacy works.",
                Language::Sw => "Asante. Tuukabidhi wapi kipimo? Mtaa, alama ya eneo, au duka la dawa la kuchukua linafaa.",
            };
            FlowTransition::ask(state, reply, vec![])
        }
        _ => {
            let state = state.record("location", answer);
            let reply = match language {
                Language::En => {
                    "All set - your self-test kit order is in. The dispatch team will confirm by \
                     phone shortly. Whatever the result, I'm here, and a counselor is one tap away."
                }
                Language::Sw => {
                    "Imekamilika - oda ya kipimo chako imepokelewa. Timu ya usambazaji itathibitisha \
                     kwa simu hivi karibuni. Matokeo yoyote yale, nipo hapa, na mshauri yuko karibu."
                }
            };
            let suggestions = match language {
                Language::En => vec!["Talk to a counselor".to_string()],
                Language::Sw => vec!["Ongea na mshauri".to_string()],
            };
            FlowTransition::terminal(
                reply,
                suggestions,
                FlowOutcome::IntentCompleted {
                    flow: FlowKind::HivSelfTest,
                    fields: state.answers,
                },
            )
        }
    }
}

// ============================================================================
// Circumcision pre-screening
// ============================================================================

fn is_affirmative(answer: &str) -> bool {
    let lowered = answer.trim().to_lowercase();
    matches!(lowered.as_str(), "yes" | "y" | "yeah" | "ndiyo" | "ndio")
        || lowered.starts_with("yes")
        || lowered.starts_with("ndiyo")
}

fn referral(language: Language, flow: FlowKind) -> FlowTransition {
    let reply = match language {
        Language::En => {
            "Based on your answers, this needs a clinician's judgement rather than an online \
             booking. Please visit or call your nearest clinic so a provider can advise you \
             directly - I can share clinic contacts if that helps."
        }
        Language::Sw => {
            "Kutokana na majibu yako, hili linahitaji maamuzi ya daktari badala ya kupanga mtandaoni. \
             Tafadhali tembelea au piga simu kliniki iliyo karibu nawe ili mtoa huduma akushauri \
             moja kwa moja - naweza kukupa mawasiliano ya kliniki ukihitaji."
        }
    };
    let suggestions = match language {
        Language::En => vec!["Share clinic contacts".to_string()],
        Language::Sw => vec!["Nipe mawasiliano ya kliniki".to_string()],
    };
    FlowTransition::terminal(reply, suggestions, FlowOutcome::Referral { flow })
}

fn advance_circumcision(
    state: FlowState,
    answer: &str,
    language: Language,
    min_age: u32,
) -> FlowTransition {
    match state.step {
        0 => {
            let reply = match language {
                Language::En => {
                    "Happy to help you book a circumcision appointment. A couple of quick \
                     eligibility questions first: how old are you?"
                }
                Language::Sw => {
                    "Nitafurahi kukusaidia kupanga miadi ya tohara. Kwanza maswali mawili mafupi \
                     ya ustahiki: una umri gani?"
                }
            };
            FlowTransition::ask(state.at_step(1), reply, vec![])
        }
        1 => {
            let Some(age) = answer
                .split(|c: char| !c.is_ascii_digit())
                .find(|t| !t.is_empty())
                .and_then(|t| t.parse::<u32>().ok())
            else {
                let reply = match language {
                    Language::En => "Please give your age as a number, for example: 21",
                    Language::Sw => "Tafadhali andika umri wako kwa namba, kwa mfano: 21",
                };
                return FlowTransition::ask(state, reply, vec![]);
            };

            // Below the eligibility minimum: refer immediately, regardless of
            // whatever later answers would have been.
            if age < min_age {
                return referral(language, FlowKind::Circumcision);
            }

            let state = state.record("age", answer).at_step(2);
            let reply = match language {
                Language::En => {
                    "Thanks. Do you have any bleeding disorder, or have you ever had unusual \
                     bleeding after a cut or tooth extraction? (yes/no)"
                }
                Language::Sw => {
                    "Asante. Je, una tatizo lolote la kuvuja damu, au umewahi kuvuja damu isivyo \
                     kawaida baada ya kukatwa au kung'olewa jino? (ndiyo/hapana)"
                }
            };
            let suggestions = match language {
                Language::En => vec!["Yes".to_string(), "No".to_string()],
                Language::Sw => vec!["Ndiyo".to_string(), "Hapana".to_string()],
            };
            FlowTransition::ask(state, reply, suggestions)
        }
        2 => {
            if is_affirmative(answer) {
                return referral(language, FlowKind::Circumcision);
            }
            let state = state.record("bleeding_disorder", answer).at_step(3);
            let reply = match language {
                Language::En => "You're eligible to book. Which day works best for you this week?",
                Language::Sw => "Unastahiki kupanga miadi. Siku gani inakufaa zaidi wiki hii?",
            };
            FlowTransition::ask(state, reply, vec![])
        }
        _ => {
            let state = state.record("preferred_date", answer);
            let reply = match language {
                Language::En => {
                    "Booked! The clinic team will confirm your appointment shortly. You'll get \
                     simple preparation instructions before the day."
                }
                Language::Sw => {
                    "Imepangwa! Timu ya kliniki itathibitisha miadi yako hivi karibuni. Utapata \
                     maelekezo rahisi ya maandalizi kabla ya siku."
                }
            };
            FlowTransition::terminal(
                reply,
                vec![],
                FlowOutcome::IntentCompleted {
                    flow: FlowKind::Circumcision,
                    fields: state.answers,
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_AGE: u32 = 15;

    fn run(kind: FlowKind, answers: &[&str]) -> (Vec<FlowTransition>, Option<FlowOutcome>) {
        let mut transitions = Vec::new();
        let mut state = Some(FlowState::new(kind));
        let mut answers = answers.iter();
        // Entry step consumes no answer.
        let mut next_answer = "";
        let mut guard = 0;
        while let Some(s) = state {
            guard += 1;
            assert!(guard <= 16, "flow did not terminate");
            let t = advance(s, next_answer, Language::En, MIN_AGE);
            state = t.next.clone();
            let done = t.outcome.clone();
            transitions.push(t);
            if let Some(outcome) = done {
                return (transitions, Some(outcome));
            }
            next_answer = answers.next().copied().unwrap_or("");
        }
        (transitions, None)
    }

    #[test]
    fn test_self_check_significant_concern() {
        let (transitions, outcome) = run(FlowKind::SelfCheck, &["Stress: 2,2,1"]);
        let last = transitions.last().unwrap();
        assert!(last.reply.contains("significant level of concern"));
        assert!(last.suggestions.contains(&"Talk to a counselor".to_string()));
        assert_eq!(outcome, Some(FlowOutcome::Referral { flow: FlowKind::SelfCheck }));
    }

    #[test]
    fn test_self_check_scoring() {
        assert_eq!(score_self_check("Stress: 2,2,1"), Some(5));
        assert_eq!(score_self_check("0, 1, 0"), Some(1));
        assert_eq!(score_self_check("no numbers here"), None);
        assert_eq!(self_check_tier(5), SelfCheckTier::SignificantConcern);
        assert_eq!(self_check_tier(3), SelfCheckTier::SomeConcern);
        assert_eq!(self_check_tier(1), SelfCheckTier::Minimal);
    }

    #[test]
    fn test_self_check_reasks_on_garbage() {
        let entry = advance(FlowState::new(FlowKind::SelfCheck), "", Language::En, MIN_AGE);
        let state = entry.next.unwrap();
        let t = advance(state.clone(), "dunno", Language::En, MIN_AGE);
        // Stays on the same step, no terminal outcome.
        assert_eq!(t.next, Some(state));
        assert!(t.outcome.is_none());
    }

    #[test]
    fn test_self_check_reasks_on_overflowing_numbers() {
        assert_eq!(score_self_check("4000000000, 1000000000"), None);

        let entry = advance(FlowState::new(FlowKind::SelfCheck), "", Language::En, MIN_AGE);
        let state = entry.next.unwrap();
        let t = advance(state.clone(), "4000000000, 1000000000", Language::En, MIN_AGE);
        assert_eq!(t.next, Some(state));
        assert!(t.outcome.is_none());
    }

    #[test]
    fn test_circumcision_happy_path_is_deterministic() {
        let answers = &["21", "no", "Friday"];
        let (_, outcome1) = run(FlowKind::Circumcision, answers);
        let (_, outcome2) = run(FlowKind::Circumcision, answers);
        assert_eq!(outcome1, outcome2);

        match outcome1 {
            Some(FlowOutcome::IntentCompleted { flow, fields }) => {
                assert_eq!(flow, FlowKind::Circumcision);
                assert_eq!(fields.get("age").map(String::as_str), Some("21"));
                assert_eq!(fields.get("preferred_date").map(String::as_str), Some("Friday"));
            }
            other => panic!("expected completed booking, got {:?}", other),
        }
    }

    #[test]
    fn test_circumcision_underage_short_circuits() {
        // Later answers never matter: the age answer alone ends the flow.
        let (transitions, outcome) = run(FlowKind::Circumcision, &["12", "no", "Friday"]);
        assert_eq!(outcome, Some(FlowOutcome::Referral { flow: FlowKind::Circumcision }));
        assert_eq!(transitions.len(), 2); // entry question + referral
    }

    #[test]
    fn test_circumcision_bleeding_disorder_short_circuits() {
        let (_, outcome) = run(FlowKind::Circumcision, &["30", "yes, sometimes", "Friday"]);
        assert_eq!(outcome, Some(FlowOutcome::Referral { flow: FlowKind::Circumcision }));
    }

    #[test]
    fn test_hiv_order_collects_fields() {
        let (_, outcome) = run(FlowKind::HivSelfTest, &["0712 345 678", "Mwenge pharmacy"]);
        match outcome {
            Some(FlowOutcome::IntentCompleted { flow, fields }) => {
                assert_eq!(flow, FlowKind::HivSelfTest);
                assert_eq!(fields.get("phone").map(String::as_str), Some("0712 345 678"));
                assert_eq!(fields.get("location").map(String::as_str), Some("Mwenge pharmacy"));
            }
            other => panic!("expected order outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_flow_state_serde_round_trip() {
        let state = FlowState::new(FlowKind::Circumcision)
            .record("age", "21")
            .at_step(2);
        let json = serde_json::to_string(&state).unwrap();
        let back: FlowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
