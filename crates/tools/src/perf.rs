//! Linux `perf` collaborator: `record` a run, then render a text report.

use crate::process::{display_command, is_executable, resolve_executable, run_with_timeout};
use crate::ToolError;
use perfforge_core::config::ProfilerConfig;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RecordJob {
    pub executable: PathBuf,
    pub target_args: Vec<String>,
    pub data_path: PathBuf,
    /// Working directory for the profiled process.
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub command: String,
    pub data_path: PathBuf,
}

pub trait PerfRecorder {
    fn is_available(&self) -> bool;

    /// Record a profile of `job.executable` into `job.data_path`.
    fn record(&self, job: &RecordJob) -> Result<Recorded, ToolError>;

    /// Render a recorded data file into report text.
    fn report(&self, data_path: &Path) -> Result<String, ToolError>;
}

#[derive(Debug, Clone)]
pub struct LinuxPerf {
    program: String,
    record_args: Vec<String>,
    report_args: Vec<String>,
    record_timeout: Duration,
    report_timeout: Duration,
}

impl Default for LinuxPerf {
    fn default() -> Self {
        Self::from_config(&ProfilerConfig::default())
    }
}

impl LinuxPerf {
    pub fn from_config(config: &ProfilerConfig) -> Self {
        Self {
            program: config.perf.clone(),
            record_args: config.record_args.clone(),
            report_args: config.report_args.clone(),
            record_timeout: Duration::from_secs(config.record_timeout_secs),
            report_timeout: Duration::from_secs(config.report_timeout_secs),
        }
    }

    pub fn record_arguments(&self, job: &RecordJob) -> Vec<String> {
        let mut args = vec!["record".to_string()];
        args.extend(self.record_args.iter().cloned());
        args.push("-o".to_string());
        args.push(job.data_path.display().to_string());
        args.push("--".to_string());
        args.push(job.executable.display().to_string());
        args.extend(job.target_args.iter().cloned());
        args
    }

    pub fn report_arguments(&self, data_path: &Path) -> Vec<String> {
        let mut args = vec![
            "report".to_string(),
            "-i".to_string(),
            data_path.display().to_string(),
        ];
        args.extend(self.report_args.iter().cloned());
        args
    }

    fn program(&self) -> Result<PathBuf, ToolError> {
        resolve_executable(&self.program).ok_or_else(|| ToolError::Missing {
            tool: self.program.clone(),
        })
    }
}

impl PerfRecorder for LinuxPerf {
    fn is_available(&self) -> bool {
        resolve_executable(&self.program).is_some()
    }

    fn record(&self, job: &RecordJob) -> Result<Recorded, ToolError> {
        if !is_executable(&job.executable) {
            return Err(ToolError::NotExecutable {
                path: job.executable.clone(),
            });
        }
        let program = self.program()?;

        if job.data_path.exists() {
            std::fs::remove_file(&job.data_path)?;
            debug!(path = %job.data_path.display(), "removed stale perf data");
        }
        if let Some(parent) = job.data_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let args = self.record_arguments(job);
        let command = display_command(&self.program, &args);
        info!(command = %command, "recording profile");

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        if let Some(dir) = &job.work_dir {
            cmd.current_dir(dir);
        }
        let output = run_with_timeout(&self.program, cmd, self.record_timeout)?;
        if !output.success() {
            return Err(ToolError::Failed {
                command,
                detail: output.failure_detail(),
            });
        }
        if !job.data_path.is_file() {
            return Err(ToolError::MissingArtifact {
                command,
                path: job.data_path.clone(),
            });
        }
        Ok(Recorded {
            command,
            data_path: job.data_path.clone(),
        })
    }

    fn report(&self, data_path: &Path) -> Result<String, ToolError> {
        let program = self.program()?;
        if !data_path.is_file() {
            return Err(ToolError::MissingArtifact {
                command: format!("{} record", self.program),
                path: data_path.to_path_buf(),
            });
        }
        let args = self.report_arguments(data_path);
        let command = display_command(&self.program, &args);
        debug!(command = %command, "rendering report");

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        let output = run_with_timeout(&self.program, cmd, self.report_timeout)?;
        if !output.success() {
            return Err(ToolError::Failed {
                command,
                detail: output.failure_detail(),
            });
        }
        Ok(output.stdout)
    }
}
