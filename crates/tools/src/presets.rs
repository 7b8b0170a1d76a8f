//! Per-preset bookkeeping for compile → record → report runs.

use perfforge_core::config::PresetConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Label used for a user-supplied executable that skips compilation.
pub const PREBUILT_PRESET: &str = "prebuilt";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetStatus {
    #[default]
    Pending,
    CompileSetupFailed,
    CompileFailed,
    PerfSetupFailed,
    PerfRecordFailed,
    PerfReportFailed,
    Success,
}

impl PresetStatus {
    pub fn is_failure(self) -> bool {
        !matches!(self, PresetStatus::Pending | PresetStatus::Success)
    }
}

/// Outcome of one preset.
///
/// `status` only moves through the `mark_*` methods, so `Success` is
/// reachable only after a compiled (or prebuilt) executable, a recorded data
/// file and a report all exist. Once failed, a result stays failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetResult {
    /// Preset name, or `prebuilt`.
    pub preset: String,
    /// Compiler flags the preset contributed.
    pub flags: Vec<String>,
    status: PresetStatus,
    /// Compiled or user-supplied executable.
    pub executable_path: Option<PathBuf>,
    pub compile_command: Option<String>,
    /// Compiler diagnostics when compilation failed.
    pub compile_error: Option<String>,
    /// `perf record` output file.
    pub perf_data_path: Option<PathBuf>,
    pub perf_command: Option<String>,
    pub record_error: Option<String>,
    pub report_error: Option<String>,
    /// Filtered report text; moved out once a preset is selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

impl PresetResult {
    pub fn new(preset: &PresetConfig) -> Self {
        Self {
            preset: preset.name.clone(),
            flags: preset.flags.clone(),
            ..Self::default()
        }
    }

    /// A result for an executable that was built elsewhere.
    pub fn prebuilt(executable: PathBuf) -> Self {
        Self {
            preset: PREBUILT_PRESET.to_string(),
            executable_path: Some(executable),
            ..Self::default()
        }
    }

    pub fn status(&self) -> PresetStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == PresetStatus::Success
    }

    fn fail(&mut self, status: PresetStatus) {
        if !self.status.is_failure() {
            self.status = status;
        }
    }

    pub fn mark_compiled(&mut self, command: String, executable: PathBuf) {
        self.compile_command = Some(command);
        self.executable_path = Some(executable);
    }

    pub fn mark_compile_failed(&mut self, setup: bool, error: String) {
        self.compile_error = Some(error);
        self.fail(if setup {
            PresetStatus::CompileSetupFailed
        } else {
            PresetStatus::CompileFailed
        });
    }

    pub fn mark_recorded(&mut self, command: String, data_path: PathBuf) {
        self.perf_command = Some(command);
        self.perf_data_path = Some(data_path);
    }

    pub fn mark_record_failed(&mut self, setup: bool, error: String) {
        self.record_error = Some(error);
        self.fail(if setup {
            PresetStatus::PerfSetupFailed
        } else {
            PresetStatus::PerfRecordFailed
        });
    }

    pub fn mark_report_failed(&mut self, error: String) {
        self.report_error = Some(error);
        self.fail(PresetStatus::PerfReportFailed);
    }

    /// Record the report. Returns `false` (and leaves the status alone) when
    /// an earlier step failed or never ran.
    pub fn mark_reported(&mut self, report: String) -> bool {
        if self.status.is_failure()
            || self.executable_path.is_none()
            || self.perf_data_path.is_none()
        {
            return false;
        }
        self.report = Some(report);
        self.status = PresetStatus::Success;
        true
    }

    /// Move the report text out, leaving the audit fields in place.
    pub fn take_report(&mut self) -> Option<String> {
        self.report.take()
    }

    /// The error of the failed step, if any.
    pub fn error(&self) -> Option<&str> {
        match self.status {
            PresetStatus::CompileSetupFailed | PresetStatus::CompileFailed => {
                self.compile_error.as_deref()
            }
            PresetStatus::PerfSetupFailed | PresetStatus::PerfRecordFailed => {
                self.record_error.as_deref()
            }
            PresetStatus::PerfReportFailed => self.report_error.as_deref(),
            PresetStatus::Pending | PresetStatus::Success => None,
        }
    }
}

/// Order in which successful presets are considered for the emitted report:
/// the preferred preset, then `priority`, then any remaining configured
/// preset in declaration order.
pub fn selection_order(
    preferred: &str,
    priority: &[String],
    configured: &[PresetConfig],
) -> Vec<String> {
    let mut order: Vec<String> = Vec::with_capacity(configured.len() + 1);
    let candidates = std::iter::once(preferred)
        .chain(priority.iter().map(String::as_str))
        .chain(configured.iter().map(|p| p.name.as_str()));
    for name in candidates {
        if !order.iter().any(|n| n == name) {
            order.push(name.to_string());
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_every_step() {
        let preset = PresetConfig::new("opt_only", &["-O3"]);
        let mut result = PresetResult::new(&preset);
        assert!(!result.mark_reported("r".into()));
        assert_eq!(result.status(), PresetStatus::Pending);

        result.mark_compiled("g++ -O3".into(), "/tmp/a".into());
        assert!(!result.mark_reported("r".into()));
        result.mark_recorded("perf record".into(), "/tmp/perf.data".into());
        assert!(result.mark_reported("report".into()));
        assert!(result.is_success());
        assert!(result.error().is_none());
    }

    #[test]
    fn test_failure_is_sticky() {
        let mut result = PresetResult::new(&PresetConfig::new("debug_only", &["-g"]));
        result.mark_compile_failed(false, "syntax error".into());
        result.mark_recorded("perf record".into(), "/tmp/perf.data".into());
        result.mark_report_failed("late".into());
        assert!(!result.mark_reported("report".into()));
        assert_eq!(result.status(), PresetStatus::CompileFailed);
        assert_eq!(result.error(), Some("syntax error"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&PresetStatus::PerfRecordFailed).unwrap();
        assert_eq!(json, "\"perf_record_failed\"");
    }

    #[test]
    fn test_selection_order() {
        let configured = vec![
            PresetConfig::new("debug_only", &["-g"]),
            PresetConfig::new("custom", &["-O2"]),
            PresetConfig::new("opt_only", &["-O3"]),
        ];
        let priority: Vec<String> = ["debug_opt", "opt_only", "debug_only"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            selection_order("custom", &priority, &configured),
            vec!["custom", "debug_opt", "opt_only", "debug_only"]
        );
        assert_eq!(
            selection_order("debug_opt", &priority, &configured),
            vec!["debug_opt", "opt_only", "debug_only", "custom"]
        );
        let reversed: Vec<String> = priority.iter().rev().cloned().collect();
        assert_eq!(
            selection_order("missing", &reversed, &configured),
            vec!["missing", "debug_only", "opt_only", "debug_opt", "custom"]
        );
    }
}
