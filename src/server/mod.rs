//! Server module for the JSON-RPC care interface.
//!
//! Channel adapters (web widget, WhatsApp bridge) talk to the engine over
//! newline-delimited JSON-RPC 2.0 on stdio. This module provides the server
//! loop, the method handlers, and the shared application state.

mod handlers;
mod rpc;

pub use handlers::{handle_method, CloseParams};
pub use rpc::{CareServer, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

use std::sync::Arc;

use crate::config::Config;
use crate::engine::CareEngine;
use crate::error::AppResult;
use crate::generate::ResponseGenerator;
use crate::knowledge::KnowledgeRetriever;
use crate::llm::LlmClient;
use crate::storage::SqliteStore;

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Conversation store.
    pub store: SqliteStore,
    /// Turn orchestrator.
    pub engine: CareEngine,
}

impl AppState {
    /// Create new application state, wiring the engine from its parts.
    pub fn new(config: Config, store: SqliteStore, llm: LlmClient) -> AppResult<Self> {
        let generator = ResponseGenerator::new(llm, &config);
        let retriever = KnowledgeRetriever::new();
        let engine = CareEngine::new(
            store.clone(),
            retriever,
            generator,
            config.engine.clone(),
        )?;

        Ok(Self {
            config,
            store,
            engine,
        })
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
