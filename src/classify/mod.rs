//! Topic and intent classification for inbound messages.
//!
//! Topic matching is a first-match-wins scan over an explicit, ordered
//! keyword table; intent matching is a fixed-priority list of regular
//! expressions checked before generic keyword handling. Both are
//! deterministic: declaration order is the tie-breaker.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::flows::FlowKind;

/// Closed set of conversation topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Stress,
    Anxiety,
    Depression,
    Sleep,
    Hiv,
    Circumcision,
    Inventory,
    Orders,
    Invoicing,
}

impl Topic {
    /// Whether this topic belongs to the mental-health companion rather
    /// than the business assistant.
    pub fn is_care_topic(&self) -> bool {
        !matches!(self, Topic::Inventory | Topic::Orders | Topic::Invoicing)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Topic::Stress => "stress",
            Topic::Anxiety => "anxiety",
            Topic::Depression => "depression",
            Topic::Sleep => "sleep",
            Topic::Hiv => "hiv",
            Topic::Circumcision => "circumcision",
            Topic::Inventory => "inventory",
            Topic::Orders => "orders",
            Topic::Invoicing => "invoicing",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stress" => Ok(Topic::Stress),
            "anxiety" => Ok(Topic::Anxiety),
            "depression" => Ok(Topic::Depression),
            "sleep" => Ok(Topic::Sleep),
            "hiv" => Ok(Topic::Hiv),
            "circumcision" => Ok(Topic::Circumcision),
            "inventory" => Ok(Topic::Inventory),
            "orders" => Ok(Topic::Orders),
            "invoicing" => Ok(Topic::Invoicing),
            _ => Err(format!("Unknown topic: {}", s)),
        }
    }
}

/// Ordered topic priority table. The first topic whose keyword list
/// contains a substring of the lowercased input wins; order here is the
/// declared, testable priority.
const TOPIC_KEYWORDS: &[(Topic, &[&str])] = &[
    (
        Topic::Hiv,
        &["hiv", "self-test", "self test kit", "vvu", "kipimo cha hiv"],
    ),
    (
        Topic::Circumcision,
        &["circumcision", "circumcised", "tohara"],
    ),
    (
        Topic::Anxiety,
        &["anxiety", "anxious", "panic", "wasiwasi", "hofu"],
    ),
    (
        Topic::Depression,
        &["depress", "hopeless", "huzuni kubwa", "unyogovu"],
    ),
    (
        Topic::Stress,
        &["stress", "overwhelmed", "pressure", "msongo"],
    ),
    (
        Topic::Sleep,
        &["sleep", "insomnia", "can't fall asleep", "usingizi"],
    ),
    (
        Topic::Inventory,
        &["inventory", "stock", "out of stock", "expiry", "batch"],
    ),
    (
        Topic::Orders,
        &["order", "delivery", "supplier", "purchase"],
    ),
    (
        Topic::Invoicing,
        &["invoice", "invoicing", "receipt", "billing"],
    ),
];

/// A matched intent with its captured slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    /// "calculate amoxicillin 20 kg" - deterministic dosage calculator.
    DosageCalc { drug: String, weight_kg: f64 },
    /// "dosage for X in children".
    PediatricDosage { drug: String },
    /// "first-line treatment for X".
    FirstLineTreatment { condition: String },
    /// "can I use DRUG for CONDITION?".
    DrugForCondition { drug: String, condition: String },
}

/// Result of classifying one message.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub topic: Option<Topic>,
    pub intent: Option<Intent>,
    pub flow: Option<FlowKind>,
}

/// Keyword/regex classifier. Regexes are compiled once at construction.
#[derive(Clone)]
pub struct Classifier {
    dosage_calc: Regex,
    pediatric_dosage: Regex,
    first_line: Regex,
    drug_for_condition: Regex,
}

impl Classifier {
    /// Compile the fixed intent patterns.
    pub fn new() -> Result<Self, EngineError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| EngineError::InvalidPattern {
                message: e.to_string(),
            })
        };

        Ok(Self {
            dosage_calc: compile(r"(?i)calculate\s+([a-z]+)\s+(\d+(?:\.\d+)?)\s*kg")?,
            pediatric_dosage: compile(r"(?i)dosage\s+(?:of|for)\s+([a-z]+)\s+(?:in|for)\s+(?:children|kids|a child)")?,
            first_line: compile(r"(?i)first[- ]line\s+treatment\s+for\s+([a-z][a-z ]*)")?,
            drug_for_condition: compile(r"(?i)can\s+i\s+(?:use|take|give)\s+([a-z]+)\s+for\s+([a-z][a-z ]*)")?,
        })
    }

    /// Classify a message into topic, intent, and (maybe) a scripted flow.
    ///
    /// Intent patterns are checked in fixed priority order and the first
    /// match short-circuits; topic and flow selection still run so the
    /// conversation context can be updated.
    pub fn classify(&self, text: &str) -> Classification {
        let lowered = text.to_lowercase();

        let intent = self.match_intent(text);
        let topic = match_topic(&lowered);
        let flow = select_flow(&lowered, topic);

        Classification { topic, intent, flow }
    }

    fn match_intent(&self, text: &str) -> Option<Intent> {
        if let Some(caps) = self.dosage_calc.captures(text) {
            let weight_kg = caps[2].parse().ok()?;
            return Some(Intent::DosageCalc {
                drug: caps[1].to_lowercase(),
                weight_kg,
            });
        }
        if let Some(caps) = self.pediatric_dosage.captures(text) {
            return Some(Intent::PediatricDosage {
                drug: caps[1].to_lowercase(),
            });
        }
        if let Some(caps) = self.first_line.captures(text) {
            return Some(Intent::FirstLineTreatment {
                condition: caps[1].trim().to_lowercase(),
            });
        }
        if let Some(caps) = self.drug_for_condition.captures(text) {
            return Some(Intent::DrugForCondition {
                drug: caps[1].to_lowercase(),
                condition: caps[2].trim().to_lowercase(),
            });
        }
        None
    }
}

/// First-match-wins scan over the declared topic priority list.
fn match_topic(lowered: &str) -> Option<Topic> {
    for (topic, keywords) in TOPIC_KEYWORDS {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return Some(*topic);
        }
    }
    None
}

/// Scripted-flow selection for sensitive multi-step processes.
fn select_flow(lowered: &str, topic: Option<Topic>) -> Option<FlowKind> {
    let wants_check = lowered.contains("self-check")
        || lowered.contains("self check")
        || lowered.contains("check my mood")
        || lowered.contains("screen me");
    let wants_order = lowered.contains("order")
        || lowered.contains("buy")
        || lowered.contains("kit")
        || lowered.contains("nataka kipimo");
    let wants_booking = lowered.contains("book")
        || lowered.contains("appointment")
        || lowered.contains("screening");

    match topic {
        Some(Topic::Stress) | Some(Topic::Anxiety) | Some(Topic::Depression) if wants_check => {
            Some(FlowKind::SelfCheck)
        }
        Some(Topic::Hiv) if wants_order => Some(FlowKind::HivSelfTest),
        Some(Topic::Circumcision) if wants_booking => Some(FlowKind::Circumcision),
        _ => None,
    }
}

// ============================================================================
// Dosage calculator
// ============================================================================

/// Deterministic weight-based dosage plan. No LLM involvement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DosagePlan {
    pub drug: String,
    pub weight_kg: f64,
    pub mg_per_kg_day: f64,
    pub total_mg_day: f64,
    pub doses_per_day: u32,
    pub per_dose_low_mg: u32,
    pub per_dose_high_mg: u32,
    pub interval_hours: u32,
}

/// Per-drug daily mg/kg and dose count. Pediatric oral standards.
const DOSAGE_TABLE: &[(&str, f64, u32)] = &[
    ("amoxicillin", 25.0, 3),
    ("paracetamol", 60.0, 4),
    ("ibuprofen", 30.0, 3),
    ("cephalexin", 50.0, 4),
];

/// Compute a dosage plan for a known drug, or `None` for drugs outside the
/// fixed table (those go to the generated-reply path instead).
pub fn calculate_dosage(drug: &str, weight_kg: f64) -> Option<DosagePlan> {
    if !(weight_kg > 0.0 && weight_kg < 300.0) {
        return None;
    }
    let drug = drug.to_lowercase();
    let (_, mg_per_kg_day, doses_per_day) = DOSAGE_TABLE
        .iter()
        .find(|(name, _, _)| *name == drug)
        .copied()?;

    let total_mg_day = mg_per_kg_day * weight_kg;
    let per_dose = total_mg_day / doses_per_day as f64;

    Some(DosagePlan {
        drug,
        weight_kg,
        mg_per_kg_day,
        total_mg_day,
        doses_per_day,
        per_dose_low_mg: per_dose.floor() as u32,
        per_dose_high_mg: per_dose.ceil() as u32,
        interval_hours: 24 / doses_per_day,
    })
}
