//! LLM completion service client and wire types.
//!
//! The engine treats the completion service as an opaque, unreliable
//! collaborator: every call has a bounded timeout, bounded retries, and the
//! response generator supplies a deterministic fallback when it fails.

mod client;
mod types;

pub use client::LlmClient;
pub use types::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, MessageRole, Usage};
