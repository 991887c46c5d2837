//! Response generation: prompt assembly and the LLM call.
//!
//! The generator is infallible from the orchestrator's point of view: any
//! LLM failure (timeout, quota, malformed response) degrades to the fixed
//! localized fallback string. It is bypassed entirely while a scripted flow
//! is active.

use tracing::warn;

use crate::config::Config;
use crate::detect::Language;
use crate::knowledge::KnowledgeChunk;
use crate::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::prompts;
use crate::storage::{Role, StoredMessage};

/// Which persona fronts the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    /// Empathetic mental-health companion.
    Counselor,
    /// Role-specific business assistant.
    Business,
}

impl Persona {
    fn prompt(&self) -> &'static str {
        match self {
            Persona::Counselor => prompts::COUNSELOR_PERSONA,
            Persona::Business => prompts::BUSINESS_PERSONA,
        }
    }
}

/// What the generator produced for this turn.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: String,
    /// True when the LLM failed and the deterministic apology was used.
    pub used_fallback: bool,
    /// Number of knowledge chunks that grounded the prompt.
    pub knowledge_used: usize,
}

/// Prompt assembler and LLM caller.
#[derive(Clone)]
pub struct ResponseGenerator {
    llm: LlmClient,
    model: String,
    history_window: usize,
    temperature: f64,
    max_tokens: u32,
}

impl ResponseGenerator {
    /// Create a generator from the application config.
    pub fn new(llm: LlmClient, config: &Config) -> Self {
        Self {
            llm,
            model: config.llm.model.clone(),
            history_window: config.engine.history_window,
            temperature: config.engine.temperature,
            max_tokens: config.engine.max_tokens,
        }
    }

    /// Assemble the role-tagged message list for one turn.
    ///
    /// System prompt = persona + always-on crisis protocol + per-turn
    /// language lock. Then the last N history turns oldest-first, the
    /// knowledge grounding block, and the current user message.
    pub fn build_messages(
        &self,
        message: &str,
        history: &[StoredMessage],
        persona: Persona,
        language: Language,
        knowledge: &[KnowledgeChunk],
    ) -> Vec<ChatMessage> {
        let system = format!(
            "{}\n\n{}\n\n{}",
            persona.prompt(),
            prompts::CRISIS_PROTOCOL,
            prompts::language_lock(language),
        );

        let mut messages = vec![ChatMessage::system(system)];

        let start = history.len().saturating_sub(self.history_window);
        for turn in &history[start..] {
            match turn.role {
                Role::User => messages.push(ChatMessage::user(&turn.content)),
                Role::Assistant => messages.push(ChatMessage::assistant(&turn.content)),
            }
        }

        if !knowledge.is_empty() {
            let mut grounding = String::from(
                "Reference information for this reply (use it, do not quote it verbatim):",
            );
            for chunk in knowledge {
                grounding.push_str("\n- ");
                grounding.push_str(&chunk.text);
                if chunk.translated {
                    grounding.push_str(" (machine-translated, verify phrasing)");
                }
            }
            messages.push(ChatMessage::system(grounding));
        }

        messages.push(ChatMessage::user(message));
        messages
    }

    /// Generate a reply. Never errors: LLM failures degrade to the
    /// localized fallback apology.
    pub async fn generate(
        &self,
        message: &str,
        history: &[StoredMessage],
        persona: Persona,
        language: Language,
        knowledge: &[KnowledgeChunk],
    ) -> GenerationOutcome {
        let messages = self.build_messages(message, history, persona, language, knowledge);
        let request = ChatRequest::new(&self.model, messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        match self.llm.complete(request).await {
            Ok(text) => GenerationOutcome {
                text,
                used_fallback: false,
                knowledge_used: knowledge.len(),
            },
            Err(e) => {
                warn!(error = %e, "LLM generation failed, serving fallback reply");
                GenerationOutcome {
                    text: prompts::fallback_message(language).to_string(),
                    used_fallback: true,
                    knowledge_used: 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Config, DatabaseConfig, EngineConfig, LlmConfig, LogFormat, LoggingConfig, RequestConfig,
    };
    use crate::llm::MessageRole;
    use std::path::PathBuf;

    fn test_generator() -> ResponseGenerator {
        let config = Config {
            llm: LlmConfig {
                api_key: "test-key".to_string(),
                base_url: "https://llm.invalid".to_string(),
                model: "gpt-4o-mini".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 1,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            request: RequestConfig::default(),
            engine: EngineConfig::default(),
        };
        let llm = LlmClient::new(&config.llm, config.request.clone()).unwrap();
        ResponseGenerator::new(llm, &config)
    }

    fn history(n: usize) -> Vec<StoredMessage> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                StoredMessage::new("conv-1", role, format!("turn {}", i))
            })
            .collect()
    }

    #[test]
    fn test_crisis_protocol_always_in_system_prompt() {
        let generator = test_generator();
        let messages =
            generator.build_messages("hello", &[], Persona::Counselor, Language::En, &[]);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.contains("SAFETY PROTOCOL"));
        assert!(messages[0].content.contains("Respond ONLY in English"));
    }

    #[test]
    fn test_history_truncated_to_window() {
        let generator = test_generator();
        let history = history(10);
        let messages =
            generator.build_messages("now", &history, Persona::Counselor, Language::En, &[]);
        // system + 6 history turns + user message
        assert_eq!(messages.len(), 8);
        // Oldest retained turn is turn 4 (last 6 of 10).
        assert_eq!(messages[1].content, "turn 4");
        assert_eq!(messages.last().unwrap().content, "now");
    }

    #[test]
    fn test_knowledge_grounding_flags_translated_chunks() {
        let generator = test_generator();
        let knowledge = vec![KnowledgeChunk {
            topic: Some("stress".to_string()),
            language: Language::Sw,
            text: "jaribu kupumua taratibu".to_string(),
            translated: true,
            distance: None,
        }];
        let messages =
            generator.build_messages("msaada", &[], Persona::Counselor, Language::Sw, &knowledge);
        let grounding = &messages[messages.len() - 2];
        assert_eq!(grounding.role, MessageRole::System);
        assert!(grounding.content.contains("machine-translated"));
    }

    #[test]
    fn test_business_persona_selected() {
        let generator = test_generator();
        let messages =
            generator.build_messages("stock?", &[], Persona::Business, Language::En, &[]);
        assert!(messages[0].content.contains("business assistant"));
    }
}
