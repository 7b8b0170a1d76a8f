//! Inference collaborator for PerfForge stages.

pub mod client;
pub mod prompt;

pub use client::{ChatClient, Inference, InferenceError};
pub use prompt::{Prompt, PromptTemplate};
