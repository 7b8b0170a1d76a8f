//! Profiler stage: compile under each preset, record, report, filter, pick one.

use crate::report_filter::{filter_report, has_entries};
use perfforge_core::config::{PresetConfig, ProfilerConfig};
use perfforge_core::{PipelineError, Stage, StageFailure, StageRecord, StageResult};
use perfforge_tools::compiler::executable_path;
use perfforge_tools::presets::{selection_order, PREBUILT_PRESET};
use perfforge_tools::{
    is_executable, CompileJob, Compiler, GccCompiler, LinuxPerf, PerfRecorder, PresetResult,
    RecordJob, ToolError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const STAGE_NAME: &str = "profiler";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfilerInput {
    source_dir: Option<PathBuf>,
    executable: Option<PathBuf>,
    preferred_preset: Option<String>,
    target_args: Option<Vec<String>>,
    /// Where builds and perf data go; defaults next to the sources.
    work_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize)]
pub struct ProfilerOutput {
    /// `perf record` command of the selected preset.
    pub perf_command: Option<String>,
    /// Filtered report of the selected preset.
    pub perf_report_output: Option<String>,
    pub selected_preset: Option<String>,
    pub executable_path: Option<String>,
    /// Contents of the discovered sources, with a header per file when
    /// there are several.
    pub source_code: Option<String>,
    /// Discovered source paths, sorted.
    pub source_files: Vec<String>,
    /// Per-preset audit trail; not consumed downstream.
    pub profiling_details: BTreeMap<String, PresetResult>,
}

pub struct Profiler {
    config: ProfilerConfig,
    compiler: Box<dyn Compiler>,
    recorder: Box<dyn PerfRecorder>,
}

impl Profiler {
    /// Profiler backed by the configured compiler and Linux `perf`.
    pub fn new(config: ProfilerConfig) -> Self {
        let compiler = Box::new(GccCompiler::from_config(&config));
        let recorder = Box::new(LinuxPerf::from_config(&config));
        Self::with_tools(config, compiler, recorder)
    }

    pub fn with_tools(
        config: ProfilerConfig,
        compiler: Box<dyn Compiler>,
        recorder: Box<dyn PerfRecorder>,
    ) -> Self {
        Self {
            config,
            compiler,
            recorder,
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    fn run_preset(
        &self,
        preset: &PresetConfig,
        sources: &[PathBuf],
        work_dir: &Path,
        target_args: &[String],
    ) -> PresetResult {
        let mut result = PresetResult::new(preset);

        if !self.compiler.is_available() {
            result.mark_compile_failed(true, format!("compiler {} not found", self.compiler.name()));
            return result;
        }
        let job = CompileJob {
            sources: sources.to_vec(),
            flags: preset.flags.clone(),
            output: executable_path(work_dir, &preset.name),
        };
        match self.compiler.compile(&job) {
            Ok(compiled) => result.mark_compiled(compiled.command, compiled.executable),
            Err(e) => {
                result.mark_compile_failed(e.is_setup(), e.to_string());
                return result;
            }
        }

        self.record_and_report(&mut result, work_dir, target_args);
        result
    }

    fn record_and_report(&self, result: &mut PresetResult, work_dir: &Path, target_args: &[String]) {
        let Some(executable) = result.executable_path.clone() else {
            result.mark_record_failed(true, "no executable to profile".into());
            return;
        };
        if !is_executable(&executable) {
            let err = ToolError::NotExecutable { path: executable };
            result.mark_record_failed(true, err.to_string());
            return;
        }
        if !self.recorder.is_available() {
            result.mark_record_failed(true, format!("{} not found", self.config.perf));
            return;
        }

        let job = RecordJob {
            executable,
            target_args: target_args.to_vec(),
            data_path: work_dir.join(format!("{}.perf.data", result.preset)),
            work_dir: Some(work_dir.to_path_buf()),
        };
        let recorded = match self.recorder.record(&job) {
            Ok(recorded) => recorded,
            Err(e) => {
                result.mark_record_failed(e.is_setup(), e.to_string());
                return;
            }
        };
        result.mark_recorded(recorded.command, recorded.data_path.clone());

        match self.recorder.report(&recorded.data_path) {
            Ok(report) => {
                let filtered = filter_report(&report, self.config.overhead_threshold);
                if !has_entries(&filtered) {
                    warn!(
                        preset = %result.preset,
                        threshold = self.config.overhead_threshold,
                        "no report entries above the overhead threshold"
                    );
                }
                result.mark_reported(filtered);
            }
            Err(e) => result.mark_report_failed(e.to_string()),
        }
    }

    fn select(
        &self,
        preferred: &str,
        results: &mut BTreeMap<String, PresetResult>,
        output: &mut ProfilerOutput,
    ) -> bool {
        let order = selection_order(preferred, &self.config.preset_priority, &self.config.presets);
        let selected = order
            .iter()
            .find(|name| results.get(name.as_str()).is_some_and(PresetResult::is_success))
            .cloned();

        for result in results.values_mut() {
            let report = result.take_report();
            if selected.as_deref() == Some(result.preset.as_str()) {
                output.perf_report_output = report;
                output.perf_command = result.perf_command.clone();
                output.executable_path = result
                    .executable_path
                    .as_ref()
                    .map(|p| p.display().to_string());
                output.selected_preset = Some(result.preset.clone());
            }
        }
        selected.is_some()
    }
}

/// Direct-child files of `dir` whose extension is in `extensions`, sorted.
pub fn discover_sources(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        PipelineError::input(format!("cannot read source_dir {}: {e}", dir.display()))
    })?;
    let mut sources = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matches = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)));
        if matches {
            sources.push(path);
        }
    }
    sources.sort();
    Ok(sources)
}

fn read_sources(sources: &[PathBuf]) -> Result<String, PipelineError> {
    if let [single] = sources {
        return Ok(std::fs::read_to_string(single)?);
    }
    let mut combined = String::new();
    for path in sources {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        combined.push_str(&format!("// ===== {name} =====\n"));
        combined.push_str(&std::fs::read_to_string(path)?);
        if !combined.ends_with('\n') {
            combined.push('\n');
        }
    }
    Ok(combined)
}

fn failure_summary(results: &BTreeMap<String, PresetResult>) -> String {
    results
        .values()
        .map(|r| {
            let status = serde_json::to_value(r.status())
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("{}: {} ({})", r.preset, status, r.error().unwrap_or("no detail"))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl Stage for Profiler {
    type Output = ProfilerOutput;

    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn configure(&mut self) -> Result<(), PipelineError> {
        self.config.validate()
    }

    fn run(&self, input: &StageRecord) -> StageResult<ProfilerOutput> {
        let input: ProfilerInput = input.decode()?;
        let target_args = input
            .target_args
            .clone()
            .unwrap_or_else(|| self.config.target_args.clone());
        let preferred = input
            .preferred_preset
            .clone()
            .unwrap_or_else(|| self.config.preferred_preset.clone());

        let mut output = ProfilerOutput::default();
        let mut sources = Vec::new();
        if let Some(dir) = &input.source_dir {
            sources = discover_sources(dir, &self.config.source_extensions)?;
            output.source_files = sources.iter().map(|p| p.display().to_string()).collect();
            if !sources.is_empty() {
                output.source_code = Some(read_sources(&sources)?);
            }
        }

        let work_dir = input
            .work_dir
            .clone()
            .or_else(|| input.source_dir.as_ref().map(|d| d.join("build")))
            .or_else(|| {
                input
                    .executable
                    .as_ref()
                    .and_then(|e| e.parent().map(|p| p.join("build")))
            })
            .ok_or_else(|| PipelineError::input("either source_dir or executable is required"))?;
        std::fs::create_dir_all(&work_dir).map_err(PipelineError::from)?;

        let mut results = BTreeMap::new();
        if let Some(executable) = &input.executable {
            info!(executable = %executable.display(), "profiling prebuilt executable");
            let mut result = PresetResult::prebuilt(executable.clone());
            self.record_and_report(&mut result, &work_dir, &target_args);
            results.insert(PREBUILT_PRESET.to_string(), result);
        } else {
            let Some(dir) = &input.source_dir else {
                return Err(PipelineError::input("either source_dir or executable is required").into());
            };
            if sources.is_empty() {
                return Err(StageFailure::new(
                    output,
                    PipelineError::input(format!(
                        "no source files with extensions {:?} in {}",
                        self.config.source_extensions,
                        dir.display()
                    )),
                ));
            }
            for preset in &self.config.presets {
                let result = self.run_preset(preset, &sources, &work_dir, &target_args);
                if result.is_success() {
                    info!(preset = %preset.name, "preset profiled");
                } else {
                    warn!(preset = %preset.name, status = ?result.status(), error = result.error().unwrap_or(""), "preset failed");
                }
                results.insert(preset.name.clone(), result);
            }
        }

        let preferred = if input.executable.is_some() {
            PREBUILT_PRESET.to_string()
        } else {
            preferred
        };
        let selected = self.select(&preferred, &mut results, &mut output);
        let summary = failure_summary(&results);
        output.profiling_details = results;

        if selected {
            Ok(output)
        } else {
            Err(StageFailure::new(
                output,
                PipelineError::tool("profiler", format!("no preset succeeded: {summary}")),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfforge_tools::{Compiled, Recorded};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Writes an executable stub unless the preset's flags are listed as broken.
    struct FakeCompiler {
        broken_flags: Vec<&'static str>,
    }

    impl Compiler for FakeCompiler {
        fn name(&self) -> &str {
            "fake-cc"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn compile(&self, job: &CompileJob) -> Result<Compiled, ToolError> {
            let joined = job.flags.join(" ");
            if self.broken_flags.contains(&joined.as_str()) {
                return Err(ToolError::Failed {
                    command: format!("fake-cc {joined}"),
                    detail: "exit status 1".into(),
                });
            }
            write_executable(&job.output);
            Ok(Compiled {
                command: format!("fake-cc {joined}"),
                executable: job.output.clone(),
            })
        }
    }

    struct FakeRecorder {
        calls: Rc<RefCell<usize>>,
    }

    impl PerfRecorder for FakeRecorder {
        fn is_available(&self) -> bool {
            true
        }

        fn record(&self, job: &RecordJob) -> Result<Recorded, ToolError> {
            *self.calls.borrow_mut() += 1;
            std::fs::write(&job.data_path, job.executable.display().to_string())?;
            Ok(Recorded {
                command: format!("perf record -g -- {}", job.executable.display()),
                data_path: job.data_path.clone(),
            })
        }

        fn report(&self, data_path: &Path) -> Result<String, ToolError> {
            let exe = std::fs::read_to_string(data_path)?;
            Ok(format!(
                "# header\n    80.00%  app  [.] {exe}\n    10.00%  libc  [.] memcpy\n"
            ))
        }
    }

    fn write_executable(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    fn profiler(broken_flags: Vec<&'static str>) -> (Profiler, Rc<RefCell<usize>>) {
        let calls = Rc::new(RefCell::new(0));
        let profiler = Profiler::with_tools(
            ProfilerConfig::default(),
            Box::new(FakeCompiler { broken_flags }),
            Box::new(FakeRecorder {
                calls: Rc::clone(&calls),
            }),
        );
        (profiler, calls)
    }

    fn source_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.cpp"), "int main() { return 0; }\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn test_preferred_preset_selected() {
        let dir = source_dir();
        let (profiler, calls) = profiler(vec![]);
        let out = profiler.execute(
            StageRecord::new().with("source_dir", dir.path().display().to_string()),
        );
        assert!(out.error(STAGE_NAME).is_none());
        assert_eq!(out.get_str("selected_preset"), Some("debug_opt"));
        assert_eq!(out.get_str("source_code"), Some("int main() { return 0; }\n"));
        let report = out.get_str("perf_report_output").unwrap();
        assert!(report.contains("debug_opt.out"));
        assert!(!report.contains("memcpy"));
        assert_eq!(*calls.borrow(), 3);
        let details = out.get("profiling_details").unwrap();
        assert_eq!(details["opt_only"]["status"], "success");
        assert!(details["opt_only"].get("report").is_none());
    }

    #[test]
    fn test_falls_back_in_priority_order() {
        let dir = source_dir();
        let (profiler, _) = profiler(vec!["-g -O3"]);
        let out = profiler.execute(
            StageRecord::new().with("source_dir", dir.path().display().to_string()),
        );
        assert_eq!(out.get_str("selected_preset"), Some("opt_only"));
        assert_eq!(
            out.get("profiling_details").unwrap()["debug_opt"]["status"],
            "compile_failed"
        );
    }

    #[test]
    fn test_configured_priority_drives_fallback() {
        let dir = source_dir();
        let mut config = ProfilerConfig::default();
        config.preset_priority = vec!["debug_only".into(), "opt_only".into(), "debug_opt".into()];
        let profiler = Profiler::with_tools(
            config,
            Box::new(FakeCompiler {
                broken_flags: vec!["-g -O3"],
            }),
            Box::new(FakeRecorder {
                calls: Rc::new(RefCell::new(0)),
            }),
        );
        let out = profiler.execute(
            StageRecord::new().with("source_dir", dir.path().display().to_string()),
        );
        assert_eq!(out.get_str("selected_preset"), Some("debug_only"));
    }

    #[test]
    fn test_all_presets_failing_keeps_source() {
        let dir = source_dir();
        let (profiler, _) = profiler(vec!["-g -O3", "-O3", "-g"]);
        let out = profiler.execute(
            StageRecord::new().with("source_dir", dir.path().display().to_string()),
        );
        assert!(out.error(STAGE_NAME).unwrap().contains("no preset succeeded"));
        assert!(out.get_str("perf_report_output").is_none());
        assert!(out.get_str("source_code").is_some());
    }

    #[test]
    fn test_no_sources_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (profiler, calls) = profiler(vec![]);
        let out = profiler.execute(
            StageRecord::new().with("source_dir", dir.path().display().to_string()),
        );
        assert!(out.error(STAGE_NAME).unwrap().contains("no source files"));
        assert_eq!(*calls.borrow(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_prebuilt_never_reaches_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("app");
        std::fs::write(&exe, "not runnable").unwrap();
        let (profiler, calls) = profiler(vec![]);
        let out = profiler.execute(
            StageRecord::new().with("executable", exe.display().to_string()),
        );
        assert!(out.error(STAGE_NAME).is_some());
        assert_eq!(*calls.borrow(), 0);
        assert_eq!(
            out.get("profiling_details").unwrap()["prebuilt"]["status"],
            "perf_setup_failed"
        );
    }

    #[test]
    fn test_prebuilt_executable_is_profiled() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("app");
        write_executable(&exe);
        let (profiler, calls) = profiler(vec![]);
        let out = profiler.execute(
            StageRecord::new().with("executable", exe.display().to_string()),
        );
        assert!(out.error(STAGE_NAME).is_none());
        assert_eq!(out.get_str("selected_preset"), Some("prebuilt"));
        assert_eq!(*calls.borrow(), 1);
    }
}
