//! Blocking subprocess execution with a wall-clock bound.

use crate::ToolError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of one subprocess run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// One-line reason for a failed run, including stderr when present.
    pub fn failure_detail(&self) -> String {
        let status = match (self.timed_out, self.exit_code) {
            (true, _) => format!("timed out after {} ms", self.duration_ms),
            (false, Some(code)) => format!("exit status {code}"),
            (false, None) => "terminated by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            status
        } else {
            format!("{status}: {stderr}")
        }
    }
}

/// Render a command line for logs and persisted records.
pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawn `command`, capture both streams and kill it once `timeout` elapses.
///
/// Spawn failures are errors; a non-zero exit or a timeout is reported in the
/// returned [`CommandOutput`].
pub fn run_with_timeout(
    tool: &str,
    mut command: Command,
    timeout: Duration,
) -> Result<CommandOutput, ToolError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| ToolError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let (status, timed_out) = loop {
        if started.elapsed() >= timeout {
            warn!(tool, timeout_ms = timeout.as_millis() as u64, "killing timed-out process");
            let _ = child.kill();
            break (child.wait()?, true);
        }
        match child.try_wait()? {
            Some(status) => break (status, false),
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let output = CommandOutput {
        exit_code: status.code(),
        stdout: join_drain(stdout),
        stderr: join_drain(stderr),
        timed_out,
        duration_ms,
    };
    debug!(tool, exit_code = ?output.exit_code, duration_ms, "process finished");
    Ok(output)
}

fn drain<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Regular file with at least one execute bit set.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Locate `program` either as an explicit path or on `PATH`.
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}
