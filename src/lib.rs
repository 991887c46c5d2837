//! # Bepawa Care Engine
//!
//! A bilingual (English/Swahili), crisis-aware conversational care engine
//! for pharmacy customers and staff. Channel adapters (web chat widget,
//! WhatsApp bridge) send conversation turns over JSON-RPC on stdio; the
//! engine detects language and crisis signals, classifies topic and intent,
//! runs scripted flows for sensitive processes, grounds open questions in
//! retrieved knowledge, and generates replies through an OpenAI-compatible
//! chat-completions service with a deterministic localized fallback.
//!
//! ## Architecture
//!
//! ```text
//! Channel Adapter → Care Server (stdio JSON-RPC) → LLM service (HTTP)
//!                          ↓
//!                   SQLite (conversations)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bepawa_care_engine::{AppState, CareServer, Config};
//! use bepawa_care_engine::llm::LlmClient;
//! use bepawa_care_engine::storage::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = SqliteStore::new(&config.database).await?;
//!     let llm = LlmClient::new(&config.llm, config.request.clone())?;
//!     let state = Arc::new(AppState::new(config, store, llm)?);
//!     let server = CareServer::new(state);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Message classification: topics, intents, and the dosage calculator.
pub mod classify;
/// Configuration management for the engine.
pub mod config;
/// Language, crisis, and emotional-state detection.
pub mod detect;
/// Per-turn session orchestration.
pub mod engine;
/// Error types and result aliases for the application.
pub mod error;
/// Scripted conversational flows (self-check, self-test ordering, screening).
pub mod flows;
/// Response generation through the chat-completions service.
pub mod generate;
/// Knowledge retrieval for grounding generated replies.
pub mod knowledge;
/// Chat-completions client and wire types.
pub mod llm;
/// Personas, safety protocol, and fixed localized strings.
pub mod prompts;
/// JSON-RPC server over stdio and shared application state.
pub mod server;
/// SQLite storage layer for conversations and messages.
pub mod storage;
/// Chat-widget session helpers (flow state, breathing timer).
pub mod widget;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, CareServer, SharedState};
