//! Per-turn session orchestration.
//!
//! One logical turn per inbound message: crisis gate first, then language
//! resolution, conversation lookup, routing between a scripted flow step and
//! retrieval+generation, and best-effort persistence. Turns for the same
//! `(sessionId, channel)` are serialized; different conversations run
//! concurrently with no shared mutable state beyond their own row.

mod followup;

pub use followup::FollowUpRegistry;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::classify::{self, Classifier, DosagePlan, Intent, Topic};
use crate::config::EngineConfig;
use crate::detect::{self, Language};
use crate::error::{AppResult, EngineError};
use crate::flows::{self, FlowKind, FlowOutcome, FlowState};
use crate::generate::{Persona, ResponseGenerator};
use crate::knowledge::KnowledgeRetriever;
use crate::prompts;
use crate::storage::{Channel, ConversationStore, RiskLevel, Role, SqliteStore, StoredMessage};

/// One inbound turn from a channel adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    pub channel: Channel,
    #[serde(rename = "phoneNumber", default)]
    pub phone_number: Option<String>,
    /// Explicit language override; detected from the message when absent.
    #[serde(default)]
    pub language: Option<Language>,
    /// Client-held scripted-flow state carried between turns.
    #[serde(default)]
    pub flow: Option<FlowState>,
}

/// Wire response priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Crisis,
    Normal,
}

/// Outbound turn payload for the channel adapter.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub priority: Priority,
    /// Scripted-flow state for the client to send back next turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowState>,
    /// Terminal flow signal for the surrounding app (booking/order made).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FlowOutcome>,
}

/// Closed union of everything a turn can produce. The orchestrator's
/// branches are exhaustive over this type.
#[derive(Debug, Clone)]
pub enum TurnReply {
    Crisis {
        content: String,
        suggestions: Vec<String>,
    },
    ScriptedFlow {
        content: String,
        suggestions: Vec<String>,
        kind: FlowKind,
        next: Option<FlowState>,
        outcome: Option<FlowOutcome>,
    },
    Generated {
        content: String,
        suggestions: Vec<String>,
        category: Option<String>,
    },
    Fallback {
        content: String,
        suggestions: Vec<String>,
    },
}

impl TurnReply {
    /// Flatten into the wire response.
    pub fn into_response(self) -> TurnResponse {
        match self {
            TurnReply::Crisis { content, suggestions } => TurnResponse {
                content,
                suggestions,
                category: Some("crisis".to_string()),
                priority: Priority::Crisis,
                flow: None,
                outcome: None,
            },
            TurnReply::ScriptedFlow {
                content,
                suggestions,
                kind,
                next,
                outcome,
            } => TurnResponse {
                content,
                suggestions,
                category: Some(kind.to_string()),
                priority: Priority::Normal,
                flow: next,
                outcome,
            },
            TurnReply::Generated {
                content,
                suggestions,
                category,
            } => TurnResponse {
                content,
                suggestions,
                category,
                priority: Priority::Normal,
                flow: None,
                outcome: None,
            },
            TurnReply::Fallback { content, suggestions } => TurnResponse {
                content,
                suggestions,
                category: Some("fallback".to_string()),
                priority: Priority::Normal,
                flow: None,
                outcome: None,
            },
        }
    }
}

/// Top-level per-turn controller.
pub struct CareEngine {
    store: SqliteStore,
    retriever: Arc<KnowledgeRetriever>,
    generator: ResponseGenerator,
    classifier: Classifier,
    config: EngineConfig,
    follow_ups: FollowUpRegistry,
    /// One in-flight turn per conversation.
    turn_locks: Mutex<HashMap<(String, Channel), Arc<Mutex<()>>>>,
}

impl CareEngine {
    /// Create the engine.
    pub fn new(
        store: SqliteStore,
        retriever: KnowledgeRetriever,
        generator: ResponseGenerator,
        config: EngineConfig,
    ) -> AppResult<Self> {
        Ok(Self {
            store,
            retriever: Arc::new(retriever),
            generator,
            classifier: Classifier::new()?,
            config,
            follow_ups: FollowUpRegistry::new(),
            turn_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Access the follow-up registry (for teardown and tests).
    pub fn follow_ups(&self) -> &FollowUpRegistry {
        &self.follow_ups
    }

    /// Process one turn end to end.
    pub async fn handle_turn(&self, request: TurnRequest) -> AppResult<TurnResponse> {
        let message = request.message.trim().to_string();
        if message.is_empty() {
            // Rejected synchronously, no state mutation.
            return Err(EngineError::EmptyMessage.into());
        }

        let key = (request.session_id.clone(), request.channel);
        let lock = self.conversation_lock(&key).await;
        let result = {
            let _turn_guard = lock.lock().await;
            self.process_turn(request, &message).await
        };
        drop(lock);
        self.prune_turn_lock(&key).await;
        result
    }

    async fn process_turn(&self, request: TurnRequest, message: &str) -> AppResult<TurnResponse> {
        // Crisis gate runs first, unconditionally, before any other branch.
        let crisis = detect::is_crisis(message);

        let language = request
            .language
            .unwrap_or_else(|| detect::detect_language(message));

        let conversation = self
            .store
            .find_or_create(
                &request.session_id,
                request.channel,
                request.user_id.as_deref(),
            )
            .await?;
        let mut context = conversation.context.clone();
        context.session_count += 1;
        context.language_preference = language;

        if crisis {
            info!(
                conversation = %conversation.id,
                channel = %request.channel,
                "Crisis detected, short-circuiting pipeline"
            );
            context.risk_level = RiskLevel::High;
            context.emotional_state = detect::infer_emotional_state(message);

            let reply = TurnReply::Crisis {
                content: prompts::crisis_message(language).to_string(),
                suggestions: prompts::crisis_suggestions(language),
            };
            let response = reply.into_response();
            self.persist_turn(&conversation.id, message, &response, &context, language)
                .await;
            return Ok(response);
        }

        // High risk is sticky until the user indicates safety.
        if context.risk_level == RiskLevel::High && detect::indicates_safety(message) {
            context.risk_level = RiskLevel::Moderate;
        }

        let classification = self.classifier.classify(message);
        if let Some(topic) = classification.topic {
            context.note_topic(topic.to_string());
        }
        context.emotional_state = detect::infer_emotional_state(message);

        let reply = if let Some(flow_state) = request.flow {
            // Resume the client-held flow: no retrieval, no LLM.
            self.flow_step(flow_state, message, language)
        } else if let Some(kind) = classification.flow {
            // Enter a new flow at its opening question.
            self.flow_step(FlowState::new(kind), "", language)
        } else if let Some(Intent::DosageCalc { drug, weight_kg }) = &classification.intent {
            match classify::calculate_dosage(drug, *weight_kg) {
                Some(plan) => TurnReply::Generated {
                    content: format_dosage(&plan, language),
                    suggestions: vec![],
                    category: Some("dosage".to_string()),
                },
                None => {
                    self.retrieve_and_generate(&conversation.id, message, &classification, language)
                        .await
                }
            }
        } else {
            self.retrieve_and_generate(&conversation.id, message, &classification, language)
                .await
        };

        let response = reply.into_response();
        self.persist_turn(&conversation.id, message, &response, &context, language)
            .await;

        // Medication/symptom replies get a delayed check-in unless the
        // session closes first.
        if should_follow_up(&classification) && response.priority == Priority::Normal {
            self.follow_ups
                .schedule(
                    conversation.id.clone(),
                    self.store.clone(),
                    language,
                    std::time::Duration::from_millis(self.config.follow_up_delay_ms),
                )
                .await;
        }

        Ok(response)
    }

    /// Tear down a session: cancel its scheduled follow-ups and drop its
    /// turn lock. Safe to call for unknown sessions.
    pub async fn close_session(&self, session_id: &str, channel: Channel) -> AppResult<()> {
        if let Some(conversation) = self.store.get_conversation(session_id, channel).await? {
            self.follow_ups.cancel(&conversation.id).await;
        }
        self.turn_locks
            .lock()
            .await
            .remove(&(session_id.to_string(), channel));
        Ok(())
    }

    fn flow_step(&self, state: FlowState, answer: &str, language: Language) -> TurnReply {
        let kind = state.kind;
        let transition = flows::advance(state, answer, language, self.config.min_circumcision_age);
        TurnReply::ScriptedFlow {
            content: transition.reply,
            suggestions: transition.suggestions,
            kind,
            next: transition.next,
            outcome: transition.outcome,
        }
    }

    async fn retrieve_and_generate(
        &self,
        conversation_id: &str,
        message: &str,
        classification: &classify::Classification,
        language: Language,
    ) -> TurnReply {
        let persona = match classification.topic {
            Some(topic) if !topic.is_care_topic() => Persona::Business,
            _ => Persona::Counselor,
        };

        // History load and knowledge retrieval have no ordering dependency.
        let (history, knowledge) = tokio::join!(
            self.store
                .recent_messages(conversation_id, self.config.history_window as u32),
            self.retriever.search(
                message,
                language,
                classification.topic,
                self.config.knowledge_top_k
            ),
        );
        let history = history.unwrap_or_else(|e| {
            warn!(error = %e, "History load failed, generating without history");
            Vec::new()
        });

        let outcome = self
            .generator
            .generate(message, &history, persona, language, &knowledge)
            .await;

        if outcome.used_fallback {
            TurnReply::Fallback {
                content: outcome.text,
                suggestions: prompts::fallback_suggestions(language),
            }
        } else {
            TurnReply::Generated {
                content: outcome.text,
                suggestions: topic_suggestions(classification.topic, language),
                category: classification.topic.map(|t| t.to_string()),
            }
        }
    }

    /// Best-effort persistence: failures are logged loudly but never fail
    /// the user-visible turn.
    async fn persist_turn(
        &self,
        conversation_id: &str,
        user_message: &str,
        response: &TurnResponse,
        context: &crate::storage::ConversationContext,
        language: Language,
    ) {
        let user_turn = StoredMessage::new(conversation_id, Role::User, user_message);
        if let Err(e) = self.store.append_message(&user_turn).await {
            error!(error = %e, conversation = %conversation_id, "Failed to persist user message");
        }

        let mut metadata = json!({ "priority": response.priority });
        if let Some(category) = &response.category {
            metadata["category"] = json!(category);
        }
        if let Some(flow) = &response.flow {
            metadata["flow_step"] = json!(flow.step);
        }
        let assistant_turn = StoredMessage::new(conversation_id, Role::Assistant, &response.content)
            .with_metadata(metadata);
        if let Err(e) = self.store.append_message(&assistant_turn).await {
            error!(error = %e, conversation = %conversation_id, "Failed to persist assistant message");
        }

        if let Err(e) = self.store.update_context(conversation_id, context, language).await {
            error!(error = %e, conversation = %conversation_id, "Failed to persist context update");
        }
    }

    async fn conversation_lock(&self, key: &(String, Channel)) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a conversation's turn lock once no turn holds a clone of it. A
    /// strong count of 1 means only the map holds the lock; cloning requires
    /// the same map mutex, so the check cannot race a concurrent turn.
    async fn prune_turn_lock(&self, key: &(String, Channel)) {
        let mut locks = self.turn_locks.lock().await;
        if let Some(entry) = locks.get(key) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(key);
            }
        }
    }

    /// Number of conversations with an in-flight turn lock (for tests).
    pub async fn active_turn_locks(&self) -> usize {
        self.turn_locks.lock().await.len()
    }
}

/// Deterministic dosage reply text.
fn format_dosage(plan: &DosagePlan, language: Language) -> String {
    let per_dose = if plan.per_dose_low_mg == plan.per_dose_high_mg {
        format!("{} mg", plan.per_dose_low_mg)
    } else {
        format!("{}-{} mg", plan.per_dose_low_mg, plan.per_dose_high_mg)
    };
    match language {
        Language::En => format!(
            "{} at {} mg/kg/day for {} kg comes to {} mg/day, divided into {} doses of {} every {} hours. \
             Always confirm against the product leaflet and the patient's condition.",
            capitalize(&plan.drug),
            plan.mg_per_kg_day,
            plan.weight_kg,
            plan.total_mg_day,
            plan.doses_per_day,
            per_dose,
            plan.interval_hours,
        ),
        Language::Sw => format!(
            "{} kwa {} mg/kg/siku kwa kilo {} ni {} mg/siku, ikigawanywa dozi {} za {} kila masaa {}. \
             Daima thibitisha na kijitabu cha dawa na hali ya mgonjwa.",
            capitalize(&plan.drug),
            plan.mg_per_kg_day,
            plan.weight_kg,
            plan.total_mg_day,
            plan.doses_per_day,
            per_dose,
            plan.interval_hours,
        ),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Medication/symptom categories get a delayed check-in.
fn should_follow_up(classification: &classify::Classification) -> bool {
    classification.intent.is_some()
}

fn topic_suggestions(topic: Option<Topic>, language: Language) -> Vec<String> {
    match topic {
        Some(t) if t.is_care_topic() => match language {
            Language::En => vec![
                "Start a breathing exercise".to_string(),
                "Talk to a counselor".to_string(),
            ],
            Language::Sw => vec![
                "Anza zoezi la kupumua".to_string(),
                "Ongea na mshauri".to_string(),
            ],
        },
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crisis_reply_maps_to_crisis_priority() {
        let reply = TurnReply::Crisis {
            content: "stay with me".to_string(),
            suggestions: vec!["I am safe".to_string()],
        };
        let response = reply.into_response();
        assert_eq!(response.priority, Priority::Crisis);
        assert_eq!(response.category.as_deref(), Some("crisis"));
    }

    #[test]
    fn test_flow_reply_carries_state_and_category() {
        let state = FlowState::new(FlowKind::Circumcision);
        let reply = TurnReply::ScriptedFlow {
            content: "how old are you?".to_string(),
            suggestions: vec![],
            kind: FlowKind::Circumcision,
            next: Some(state.clone()),
            outcome: None,
        };
        let response = reply.into_response();
        assert_eq!(response.priority, Priority::Normal);
        assert_eq!(response.category.as_deref(), Some("circumcision"));
        assert_eq!(response.flow, Some(state));
    }

    #[test]
    fn test_dosage_formatting_en() {
        let plan = classify::calculate_dosage("amoxicillin", 20.0).unwrap();
        let text = format_dosage(&plan, Language::En);
        assert!(text.contains("500 mg/day"));
        assert!(text.contains("3 doses"));
        assert!(text.contains("166-167 mg"));
        assert!(text.contains("every 8 hours"));
    }

    #[test]
    fn test_turn_request_wire_names() {
        let request: TurnRequest = serde_json::from_value(json!({
            "message": "hello",
            "sessionId": "s-1",
            "channel": "whatsapp",
            "phoneNumber": "+255700000000"
        }))
        .unwrap();
        assert_eq!(request.session_id, "s-1");
        assert_eq!(request.channel, Channel::Whatsapp);
        assert_eq!(request.phone_number.as_deref(), Some("+255700000000"));
        assert!(request.flow.is_none());
    }

    #[test]
    fn test_priority_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Priority::Crisis).unwrap(), "crisis");
        assert_eq!(serde_json::to_value(Priority::Normal).unwrap(), "normal");
    }
}
