//! Shared building blocks for the PerfForge pipeline.
//!
//! # Key Components
//!
//! - [`record::StageRecord`]: open mapping passed between stages
//! - [`stage::Stage`]: configure-once / execute-many stage contract
//! - [`store::RecordStore`]: deterministic persisted layout of a run
//! - [`config::PipelineConfig`]: per-stage configuration sections
//! - [`error::PipelineError`]: failure taxonomy rendered into `<stage>_error`

pub mod config;
pub mod error;
pub mod record;
pub mod sanitize;
pub mod stage;
pub mod store;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use record::StageRecord;
pub use stage::{Stage, StageFailure, StageResult};
pub use store::{RecordKind, RecordStore};
