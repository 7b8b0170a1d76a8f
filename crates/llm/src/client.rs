//! Inference collaborator backed by an OpenAI-compatible chat endpoint.

use crate::prompt::Prompt;
use perfforge_core::config::LlmConfig;
use perfforge_core::PipelineError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("no API key: {0}")]
    MissingApiKey(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("empty response")]
    EmptyResponse,
}

impl From<InferenceError> for PipelineError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::MissingApiKey(msg) => PipelineError::config(msg),
            other => PipelineError::inference(other.to_string()),
        }
    }
}

/// `infer(prompt) -> text`. Synchronous, no retry.
pub trait Inference {
    fn infer(&self, prompt: &Prompt) -> Result<String, InferenceError>;
}

/// Blocking chat-completions client.
pub struct ChatClient {
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    agent: ureq::Agent,
}

impl ChatClient {
    /// Create from configuration, applying `PERFFORGE_LLM_*` overrides.
    pub fn from_config(config: &LlmConfig) -> Result<Self, InferenceError> {
        let config = config.clone().with_env_overrides();
        let api_key = config
            .resolve_api_key()
            .map_err(|e| InferenceError::MissingApiKey(e.to_string()))?;
        Ok(Self::new(&config, api_key))
    }

    /// Create from environment variables only.
    /// Expects: PERFFORGE_LLM_API_KEY (or OPENAI_API_KEY); optional
    /// PERFFORGE_LLM_ENDPOINT, PERFFORGE_LLM_MODEL
    pub fn from_env() -> Result<Self, InferenceError> {
        Self::from_config(&LlmConfig::default())
    }

    /// Create with explicit configuration.
    pub fn new(config: &LlmConfig, api_key: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            agent,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn request_body(&self, prompt: &Prompt) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        })
    }
}

impl Inference for ChatClient {
    fn infer(&self, prompt: &Prompt) -> Result<String, InferenceError> {
        debug!(prompt = %prompt.name, model = %self.model, "sending inference request");
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Content-Type", "application/json")
            .send_json(self.request_body(prompt));

        let body: serde_json::Value = match response {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?,
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                warn!(status, prompt = %prompt.name, "inference endpoint rejected request");
                return Err(InferenceError::Status { status, body });
            }
            Err(e) => return Err(InferenceError::Transport(e.to_string())),
        };
        extract_content(&body)
    }
}

/// Pull `choices[0].message.content`; blank content is an error.
pub fn extract_content(body: &serde_json::Value) -> Result<String, InferenceError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| InferenceError::MalformedResponse("no content in response".into()))?;
    if content.trim().is_empty() {
        return Err(InferenceError::EmptyResponse);
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_content() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(extract_content(&body).unwrap(), "hi");

        let blank = json!({"choices": [{"message": {"content": "  \n"}}]});
        assert!(matches!(
            extract_content(&blank),
            Err(InferenceError::EmptyResponse)
        ));

        let missing = json!({"error": "nope"});
        assert!(matches!(
            extract_content(&missing),
            Err(InferenceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let client = ChatClient::new(&LlmConfig::default(), "key".into());
        let prompt = Prompt {
            name: "analyzer".into(),
            system: "sys".into(),
            user: "usr".into(),
        };
        let body = client.request_body(&prompt);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn test_missing_key_maps_to_configuration() {
        let err: PipelineError = InferenceError::MissingApiKey("unset".into()).into();
        assert!(matches!(err, PipelineError::Configuration(_)));
        let err: PipelineError = InferenceError::EmptyResponse.into();
        assert!(matches!(err, PipelineError::Inference(_)));
    }
}
