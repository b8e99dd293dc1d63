//! Provider-agnostic generation interface.

use async_trait::async_trait;

use crate::error::LlmError;

/// A single text-generation request.
///
/// User messages are kept separate (instructions, then payload) and joined
/// by the provider; temperature rides along per request so the two pipeline
/// stages can differ if configured to.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_messages: Vec<String>,
    pub temperature: f64,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user_messages: Vec<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_messages,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Text-generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Generate a completion for the request. Returns the trimmed text.
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError>;
}
