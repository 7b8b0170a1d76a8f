//! Error taxonomy shared by every stage.

use thiserror::Error;

/// Failure kinds a stage can run into.
///
/// Stages never let these escape [`crate::stage::Stage::execute`]; they are
/// rendered into the `<stage>_error` field of the returned record instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required static resource (prompt template, config file) is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required record field is missing or has the wrong shape.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Compiler or profiler exited non-zero, timed out, or left no artifact.
    #[error("{tool} failed: {detail}")]
    ExternalTool { tool: String, detail: String },

    /// Empty or failed response from the inference collaborator.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Model output did not match the expected structure.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        PipelineError::InputValidation(message.into())
    }

    pub fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::ExternalTool {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    pub fn inference(message: impl Into<String>) -> Self {
        PipelineError::Inference(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        PipelineError::Parse(message.into())
    }

    /// Short machine-readable kind, written next to the message in audit logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::InputValidation(_) => "input_validation",
            PipelineError::ExternalTool { .. } => "external_tool",
            PipelineError::Inference(_) => "inference",
            PipelineError::Parse(_) => "parse",
            PipelineError::Io(_) => "io",
            PipelineError::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
