//! The five pipeline stages.
//!
//! Every stage implements [`perfforge_core::Stage`]: configure once, then
//! `execute` records. Inference-backed stages take an
//! `Arc<dyn perfforge_llm::Inference>`; the profiler takes boxed tool
//! collaborators so all of them can run against fakes.

pub mod analyzer;
pub mod evaluator;
pub mod parse;
pub mod patcher;
pub mod profiler;
pub mod prompts;
pub mod replicator;
pub mod report_filter;

pub use analyzer::Analyzer;
pub use evaluator::Evaluator;
pub use parse::{Variant, Verdict};
pub use patcher::{PatchAggregate, PatchResult, PatchStatus, Patcher};
pub use profiler::Profiler;
pub use replicator::Replicator;
