//! Native compiler collaborator.

use crate::process::{display_command, resolve_executable, run_with_timeout};
use crate::ToolError;
use perfforge_core::config::ProfilerConfig;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// One compilation: sources and flags in, one executable out.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub sources: Vec<PathBuf>,
    pub flags: Vec<String>,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Compiled {
    pub command: String,
    pub executable: PathBuf,
}

pub trait Compiler {
    fn name(&self) -> &str;

    /// Whether the compiler binary can be located at all.
    fn is_available(&self) -> bool;

    fn compile(&self, job: &CompileJob) -> Result<Compiled, ToolError>;
}

/// GCC-compatible driver (`g++`, `gcc`, `clang++`, ...).
#[derive(Debug, Clone)]
pub struct GccCompiler {
    program: String,
    extra_flags: Vec<String>,
    include_dirs: Vec<String>,
    library_dirs: Vec<String>,
    libraries: Vec<String>,
    timeout: Duration,
}

impl GccCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            extra_flags: Vec::new(),
            include_dirs: Vec::new(),
            library_dirs: Vec::new(),
            libraries: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(config: &ProfilerConfig) -> Self {
        Self {
            program: config.compiler.clone(),
            extra_flags: config.extra_flags.clone(),
            include_dirs: config.include_dirs.clone(),
            library_dirs: config.library_dirs.clone(),
            libraries: config.libraries.clone(),
            timeout: Duration::from_secs(config.compile_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Argument vector, excluding the program itself.
    pub fn arguments(&self, job: &CompileJob) -> Vec<String> {
        let mut args = Vec::new();
        args.extend(job.flags.iter().cloned());
        args.extend(self.extra_flags.iter().cloned());
        args.extend(self.include_dirs.iter().map(|d| format!("-I{d}")));
        args.extend(job.sources.iter().map(|s| s.display().to_string()));
        args.push("-o".to_string());
        args.push(job.output.display().to_string());
        args.extend(self.library_dirs.iter().map(|d| format!("-L{d}")));
        args.extend(self.libraries.iter().map(|l| format!("-l{l}")));
        args
    }
}

impl Compiler for GccCompiler {
    fn name(&self) -> &str {
        &self.program
    }

    fn is_available(&self) -> bool {
        resolve_executable(&self.program).is_some()
    }

    fn compile(&self, job: &CompileJob) -> Result<Compiled, ToolError> {
        let program = resolve_executable(&self.program).ok_or_else(|| ToolError::Missing {
            tool: self.program.clone(),
        })?;
        if let Some(parent) = job.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let args = self.arguments(job);
        let command = display_command(&self.program, &args);
        info!(command = %command, "compiling");

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        let output = run_with_timeout(&self.program, cmd, self.timeout)?;
        if !output.success() {
            return Err(ToolError::Failed {
                command,
                detail: output.failure_detail(),
            });
        }
        if !job.output.is_file() {
            return Err(ToolError::MissingArtifact {
                command,
                path: job.output.clone(),
            });
        }
        debug!(executable = %job.output.display(), "compiled");
        Ok(Compiled {
            command,
            executable: job.output.clone(),
        })
    }
}

/// Executable name used for a preset's build.
pub fn executable_path(build_dir: &Path, preset: &str) -> PathBuf {
    build_dir.join(format!("{preset}.out"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_layout() {
        let config = ProfilerConfig {
            extra_flags: vec!["-march=native".into()],
            include_dirs: vec!["inc".into()],
            library_dirs: vec!["lib".into()],
            libraries: vec!["m".into()],
            ..ProfilerConfig::default()
        };
        let compiler = GccCompiler::from_config(&config);
        let job = CompileJob {
            sources: vec!["a.cpp".into(), "b.cpp".into()],
            flags: vec!["-g".into(), "-O3".into()],
            output: "build/debug_opt.out".into(),
        };
        assert_eq!(
            compiler.arguments(&job),
            vec![
                "-g",
                "-O3",
                "-march=native",
                "-Iinc",
                "a.cpp",
                "b.cpp",
                "-o",
                "build/debug_opt.out",
                "-Llib",
                "-lm"
            ]
        );
    }

    #[test]
    fn test_missing_compiler_is_setup_error() {
        let compiler = GccCompiler::new("perfforge-no-such-compiler");
        assert!(!compiler.is_available());
        let job = CompileJob {
            sources: vec!["a.cpp".into()],
            flags: vec![],
            output: std::env::temp_dir().join("perfforge-never.out"),
        };
        let err = compiler.compile(&job).unwrap_err();
        assert!(err.is_setup());
    }
}
