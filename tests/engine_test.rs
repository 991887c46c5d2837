//! End-to-end turn pipeline tests with a mocked chat-completions service.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bepawa_care_engine::config::{
    Config, DatabaseConfig, EngineConfig, LlmConfig, LogFormat, LoggingConfig, RequestConfig,
};
use bepawa_care_engine::engine::{CareEngine, Priority, TurnRequest};
use bepawa_care_engine::error::{AppError, EngineError};
use bepawa_care_engine::generate::ResponseGenerator;
use bepawa_care_engine::knowledge::KnowledgeRetriever;
use bepawa_care_engine::llm::LlmClient;
use bepawa_care_engine::storage::{Channel, ConversationStore, RiskLevel, SqliteStore};

fn test_config(mock_url: &str) -> Config {
    Config {
        llm: LlmConfig {
            api_key: "test-api-key".to_string(),
            base_url: mock_url.to_string(),
            model: "gpt-4o-mini".to_string(),
        },
        database: DatabaseConfig {
            path: std::path::PathBuf::from(":memory:"),
            max_connections: 1,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
        },
        request: RequestConfig {
            timeout_ms: 2000,
            max_retries: 0,
            retry_delay_ms: 1,
        },
        engine: EngineConfig::default(),
    }
}

async fn engine_with_store(mock_url: &str) -> (CareEngine, SqliteStore) {
    let config = test_config(mock_url);
    let store = SqliteStore::new_in_memory().await.unwrap();
    let llm = LlmClient::new(&config.llm, config.request.clone()).unwrap();
    let generator = ResponseGenerator::new(llm, &config);
    let engine = CareEngine::new(
        store.clone(),
        KnowledgeRetriever::new(),
        generator,
        config.engine.clone(),
    )
    .unwrap();
    (engine, store)
}

fn turn(message: &str, session_id: &str) -> TurnRequest {
    serde_json::from_value(json!({
        "message": message,
        "sessionId": session_id,
        "channel": "web"
    }))
    .unwrap()
}

fn completion_response(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": text } }],
        "usage": { "prompt_tokens": 50, "completion_tokens": 20, "total_tokens": 70 }
    }))
}

#[tokio::test]
async fn test_generated_turn_uses_completion_text() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion_response("That sounds heavy. Try one slow breath with me."))
        .expect(1)
        .mount(&mock)
        .await;

    let (engine, _store) = engine_with_store(&mock.uri()).await;
    let response = engine
        .handle_turn(turn("I feel so much pressure at work", "s-1"))
        .await
        .unwrap();

    assert_eq!(response.priority, Priority::Normal);
    assert_eq!(response.category.as_deref(), Some("stress"));
    assert!(response.content.contains("one slow breath"));
}

#[tokio::test]
async fn test_crisis_short_circuits_before_llm() {
    let mock = MockServer::start().await;
    // No mocked route: any LLM call would fail the expectation below.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion_response("should never be used"))
        .expect(0)
        .mount(&mock)
        .await;

    let (engine, store) = engine_with_store(&mock.uri()).await;
    let response = engine
        .handle_turn(turn("I want to kill myself", "s-crisis"))
        .await
        .unwrap();

    assert_eq!(response.priority, Priority::Crisis);
    assert_eq!(response.category.as_deref(), Some("crisis"));
    assert_eq!(
        response.suggestions,
        vec!["I am safe", "I need immediate help", "I want to talk to a counselor"]
    );

    // Risk level is persisted as high.
    let conversation = store
        .get_conversation("s-crisis", Channel::Web)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.context.risk_level, RiskLevel::High);
}

#[tokio::test]
async fn test_high_risk_de_escalates_on_safety_phrase() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion_response("I'm glad to hear that."))
        .mount(&mock)
        .await;

    let (engine, store) = engine_with_store(&mock.uri()).await;
    engine
        .handle_turn(turn("I want to kill myself", "s-2"))
        .await
        .unwrap();
    engine.handle_turn(turn("I am safe now", "s-2")).await.unwrap();

    let conversation = store
        .get_conversation("s-2", Channel::Web)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.context.risk_level, RiskLevel::Moderate);
}

#[tokio::test]
async fn test_llm_failure_serves_localized_fallback() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("quota exceeded"))
        .mount(&mock)
        .await;

    let (engine, _store) = engine_with_store(&mock.uri()).await;
    let response = engine
        .handle_turn(turn("nina msongo wa mawazo sana leo", "s-3"))
        .await
        .unwrap();

    assert_eq!(response.priority, Priority::Normal);
    assert_eq!(response.category.as_deref(), Some("fallback"));
    assert!(!response.content.is_empty());
    // Swahili input gets the Swahili apology.
    assert!(response.content.contains("tatizo la kiufundi"));
    assert!(!response.suggestions.is_empty());
}

#[tokio::test]
async fn test_dosage_turn_is_deterministic_and_skips_llm() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion_response("should never be used"))
        .expect(0)
        .mount(&mock)
        .await;

    let (engine, _store) = engine_with_store(&mock.uri()).await;
    let response = engine
        .handle_turn(turn("calculate amoxicillin 20 kg", "s-4"))
        .await
        .unwrap();

    assert_eq!(response.category.as_deref(), Some("dosage"));
    assert!(response.content.contains("500 mg/day"));
    assert!(response.content.contains("166-167 mg"));
    assert!(response.content.contains("every 8 hours"));
}

#[tokio::test]
async fn test_self_check_flow_scores_and_refers() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion_response("should never be used"))
        .expect(0)
        .mount(&mock)
        .await;

    let (engine, _store) = engine_with_store(&mock.uri()).await;

    // Turn 1: flow entry question, state handed back to the client.
    let response = engine
        .handle_turn(turn("I'm stressed, can we do a self-check?", "s-5"))
        .await
        .unwrap();
    assert_eq!(response.category.as_deref(), Some("self_check"));
    let flow = response.flow.expect("flow state for the client");

    // Turn 2: the client echoes the state back with the scores.
    let request: TurnRequest = serde_json::from_value(json!({
        "message": "Stress: 2,2,1",
        "sessionId": "s-5",
        "channel": "web",
        "flow": serde_json::to_value(&flow).unwrap()
    }))
    .unwrap();
    let response = engine.handle_turn(request).await.unwrap();

    assert!(response.content.contains("significant level of concern"));
    assert!(response
        .suggestions
        .contains(&"Talk to a counselor".to_string()));
    assert!(response.flow.is_none());
    assert!(response.outcome.is_some());
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let mock = MockServer::start().await;
    let (engine, _store) = engine_with_store(&mock.uri()).await;

    let result = engine.handle_turn(turn("   ", "s-6")).await;
    assert!(matches!(
        result,
        Err(AppError::Engine(EngineError::EmptyMessage))
    ));
}

#[tokio::test]
async fn test_language_override_beats_detection() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let (engine, _store) = engine_with_store(&mock.uri()).await;
    // English text, explicit Swahili override: the fallback must be Swahili.
    let request: TurnRequest = serde_json::from_value(json!({
        "message": "tell me something about work worries please",
        "sessionId": "s-7",
        "channel": "web",
        "language": "sw"
    }))
    .unwrap();
    let response = engine.handle_turn(request).await.unwrap();
    assert!(response.content.contains("tatizo la kiufundi"));
}

#[tokio::test]
async fn test_turn_locks_released_after_each_turn() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion_response("unused"))
        .expect(0)
        .mount(&mock)
        .await;

    let (engine, _store) = engine_with_store(&mock.uri()).await;
    engine
        .handle_turn(turn("calculate amoxicillin 20 kg", "s-9"))
        .await
        .unwrap();
    engine
        .handle_turn(turn("calculate amoxicillin 10 kg", "s-10"))
        .await
        .unwrap();

    // Locks live only for the duration of a turn; sessions that never
    // send care.close leave nothing behind.
    assert_eq!(engine.active_turn_locks().await, 0);
}

#[tokio::test]
async fn test_close_session_cancels_follow_up() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion_response("unused"))
        .expect(0)
        .mount(&mock)
        .await;

    let (engine, _store) = engine_with_store(&mock.uri()).await;
    engine
        .handle_turn(turn("calculate paracetamol 15 kg", "s-8"))
        .await
        .unwrap();
    assert_eq!(engine.follow_ups().pending().await, 1);

    engine.close_session("s-8", Channel::Web).await.unwrap();
    assert_eq!(engine.follow_ups().pending().await, 0);
}
