//! Fixed text used by the response generator and the crisis protocol.
//!
//! Persona prompts, the always-on crisis-protocol instruction, the per-turn
//! language lock, and the localized fallback/crisis strings. The scripted
//! flow step messages live with the flows themselves.

use crate::detect::Language;

/// Persona for the mental-health companion.
pub const COUNSELOR_PERSONA: &str = r#"You are Bepawa Care, a warm, empathetic mental-health companion for pharmacy customers in East Africa. You listen first, validate feelings, and offer short, practical coping guidance. You are not a doctor and you never diagnose or prescribe; for anything clinical you gently point the person to a pharmacist, counselor, or clinician. Keep replies short (2-4 sentences), concrete, and kind."#;

/// Persona for the role-specific business assistant.
pub const BUSINESS_PERSONA: &str = r#"You are the Bepawa business assistant for pharmacy staff. You answer questions about inventory, orders, invoicing, and day-to-day pharmacy operations. Be brief, accurate, and directive. If a question needs data you do not have, say which screen or report to check instead of guessing."#;

/// Hard safety instruction included in every system prompt, crisis turn or not.
pub const CRISIS_PROTOCOL: &str = r#"SAFETY PROTOCOL (always in force): if the user expresses any intent of self-harm or suicide, stop everything else. Respond with empathy, tell them they are not alone, and direct them to immediate help: the national suicide prevention helpline, emergency services, or a trusted person nearby. Never argue, moralize, or minimize. Never provide methods or means."#;

/// Per-turn language lock appended to the system prompt.
pub fn language_lock(language: Language) -> String {
    match language {
        Language::En => {
            "Respond ONLY in English for this turn, regardless of the language of earlier turns."
                .to_string()
        }
        Language::Sw => {
            "Jibu KWA KISWAHILI TU kwa zamu hii, bila kujali lugha ya zamu zilizopita."
                .to_string()
        }
    }
}

/// Deterministic localized apology used when the LLM service is unavailable.
pub fn fallback_message(language: Language) -> &'static str {
    match language {
        Language::En => {
            "I'm having a technical issue on my side right now, but I'm still here with you. \
             Tell me how you're feeling, or try again in a moment."
        }
        Language::Sw => {
            "Nina tatizo la kiufundi kwa sasa, lakini bado nipo hapa nawe. \
             Niambie unajisikiaje, au jaribu tena baada ya muda mfupi."
        }
    }
}

/// Suggestion chips offered alongside the fallback apology.
pub fn fallback_suggestions(language: Language) -> Vec<String> {
    match language {
        Language::En => vec![
            "Try again".to_string(),
            "Talk to a counselor".to_string(),
        ],
        Language::Sw => vec![
            "Jaribu tena".to_string(),
            "Ongea na mshauri".to_string(),
        ],
    }
}

/// Delayed check-in sent after medication/symptom replies.
pub fn follow_up_message(language: Language) -> &'static str {
    match language {
        Language::En => {
            "Just checking in - how are you feeling now? If anything has gotten worse, \
             a pharmacist or clinician should take a look."
        }
        Language::Sw => {
            "Nakagua tu hali yako - unajisikiaje sasa? Kama kuna kilichozidi kuwa kibaya, \
             mfamasia au daktari anapaswa kukuangalia."
        }
    }
}

/// The fixed crisis-protocol message, localized.
pub fn crisis_message(language: Language) -> &'static str {
    match language {
        Language::En => {
            "I'm really glad you told me. You are not alone, and what you're feeling can get better \
             with support. If you are in immediate danger, please call emergency services (112) or \
             the suicide prevention helpline right now, or reach out to someone you trust nearby. \
             I'm here with you - would you like to keep talking?"
        }
        Language::Sw => {
            "Nashukuru sana kwa kuniambia. Hauko peke yako, na unavyojisikia kunaweza kuwa bora \
             ukipata msaada. Kama uko hatarini sasa hivi, tafadhali piga simu ya dharura (112) au \
             nambari ya msaada wa kuzuia kujiua, au mwendee mtu unayemwamini aliye karibu. \
             Nipo hapa nawe - ungependa tuendelee kuongea?"
        }
    }
}

/// Grounding suggestion chips offered with the crisis message.
pub fn crisis_suggestions(language: Language) -> Vec<String> {
    match language {
        Language::En => vec![
            "I am safe".to_string(),
            "I need immediate help".to_string(),
            "I want to talk to a counselor".to_string(),
        ],
        Language::Sw => vec![
            "Niko salama".to_string(),
            "Nahitaji msaada wa haraka".to_string(),
            "Nataka kuongea na mshauri".to_string(),
        ],
    }
}
