//! External tool collaborators: the native compiler and Linux `perf`.
//!
//! Both sit behind traits ([`compiler::Compiler`], [`perf::PerfRecorder`]) so
//! the profiler stage can be exercised with fakes.

pub mod compiler;
pub mod perf;
pub mod presets;
pub mod process;

pub use compiler::{CompileJob, Compiled, Compiler, GccCompiler};
pub use perf::{LinuxPerf, PerfRecorder, RecordJob, Recorded};
pub use presets::{PresetResult, PresetStatus};
pub use process::{is_executable, resolve_executable, run_with_timeout, CommandOutput};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool binary itself could not be found.
    #[error("{tool} not found")]
    Missing { tool: String },

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not an executable file")]
    NotExecutable { path: PathBuf },

    #[error("`{command}` failed: {detail}")]
    Failed { command: String, detail: String },

    #[error("`{command}` exited successfully but produced no {path}")]
    MissingArtifact { command: String, path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// True when the failure is about the environment rather than the run.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            ToolError::Missing { .. } | ToolError::Spawn { .. } | ToolError::NotExecutable { .. }
        )
    }
}
