//! JSON-RPC method handlers.

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::engine::TurnRequest;
use crate::error::{AppError, AppResult, EngineError};
use crate::storage::Channel;

/// Parameters for `care.close`.
#[derive(Debug, Deserialize)]
pub struct CloseParams {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub channel: Channel,
}

/// Route a method call to its handler. Returns the JSON result payload.
pub async fn handle_method(
    state: &SharedState,
    method: &str,
    params: Option<Value>,
) -> AppResult<Value> {
    match method {
        "care.turn" => handle_turn(state, params).await,
        "care.close" => handle_close(state, params).await,
        _ => Err(AppError::Internal {
            message: format!("Method not found: {}", method),
        }),
    }
}

/// Process one conversation turn.
async fn handle_turn(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let request: TurnRequest = parse_params(params)?;
    info!(
        session = %request.session_id,
        channel = %request.channel,
        "Handling care.turn"
    );

    let response = state.engine.handle_turn(request).await?;
    serde_json::to_value(response).map_err(|e| AppError::Internal {
        message: format!("Failed to serialize turn response: {}", e),
    })
}

/// Close a session: cancel pending follow-ups and drop in-memory state.
async fn handle_close(state: &SharedState, params: Option<Value>) -> AppResult<Value> {
    let params: CloseParams = parse_params(params)?;
    info!(session = %params.session_id, channel = %params.channel, "Handling care.close");

    state
        .engine
        .close_session(&params.session_id, params.channel)
        .await?;
    Ok(serde_json::json!({ "closed": true }))
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> AppResult<T> {
    let params = params.ok_or_else(|| {
        AppError::Engine(EngineError::InvalidRequest {
            message: "Missing params".to_string(),
        })
    })?;
    serde_json::from_value(params).map_err(|e| {
        AppError::Engine(EngineError::InvalidRequest {
            message: format!("Invalid params: {}", e),
        })
    })
}
