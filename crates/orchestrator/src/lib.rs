//! Champion-selection loop for PerfForge.
//!
//! [`Orchestrator`] drives each source file through the stages for the
//! configured number of iterations, keeping one champion per file and a
//! best-observed improvement across the whole run.

pub mod champion;
#[cfg(feature = "cli")]
pub mod cli;
pub mod orchestrator;
pub mod summary;

pub use champion::{select_champion, BestObserved, Champion, Selection};
pub use orchestrator::{IterationState, Orchestrator, PipelineStages};
pub use summary::{FileOutcome, FileSummary, RunSummary};
