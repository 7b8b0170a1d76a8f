//! Run configuration.
//!
//! Everything has a default, so an empty (or absent) YAML file is a valid
//! configuration. Each stage receives its own section at construction time;
//! nothing here is process-global.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const ENV_LLM_ENDPOINT: &str = "PERFFORGE_LLM_ENDPOINT";
pub const ENV_LLM_MODEL: &str = "PERFFORGE_LLM_MODEL";
pub const ENV_LLM_API_KEY: &str = "PERFFORGE_LLM_API_KEY";
const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Optimization iterations per source file.
    pub iterations: u32,
    /// Directory with prompt template overrides; built-in templates otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_dir: Option<PathBuf>,
    pub profiler: ProfilerConfig,
    pub analyzer: AnalyzerConfig,
    pub replicator: ReplicatorConfig,
    pub evaluator: EvaluatorConfig,
    pub selection: SelectionConfig,
    pub llm: LlmConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            prompt_dir: None,
            profiler: ProfilerConfig::default(),
            analyzer: AnalyzerConfig::default(),
            replicator: ReplicatorConfig::default(),
            evaluator: EvaluatorConfig::default(),
            selection: SelectionConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&text).map_err(|e| {
            PipelineError::config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(PipelineError::config("iterations must be >= 1"));
        }
        self.profiler.validate()?;
        if self.replicator.max_variants == 0 {
            return Err(PipelineError::config("replicator.max_variants must be >= 1"));
        }
        Ok(())
    }
}

/// A named set of compiler flags tried independently during profiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetConfig {
    pub name: String,
    pub flags: Vec<String>,
}

impl PresetConfig {
    pub fn new(name: &str, flags: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub compiler: String,
    pub perf: String,
    pub presets: Vec<PresetConfig>,
    /// Preset whose report is emitted when it succeeds.
    pub preferred_preset: String,
    /// Fallback order when the preferred preset failed.
    pub preset_priority: Vec<String>,
    /// Report entries must be strictly above this overhead (percent).
    pub overhead_threshold: f64,
    pub source_extensions: Vec<String>,
    pub extra_flags: Vec<String>,
    pub include_dirs: Vec<String>,
    pub library_dirs: Vec<String>,
    pub libraries: Vec<String>,
    pub record_args: Vec<String>,
    pub report_args: Vec<String>,
    pub target_args: Vec<String>,
    pub compile_timeout_secs: u64,
    pub record_timeout_secs: u64,
    pub report_timeout_secs: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            compiler: "g++".into(),
            perf: "perf".into(),
            presets: vec![
                PresetConfig::new("debug_opt", &["-g", "-O3"]),
                PresetConfig::new("opt_only", &["-O3"]),
                PresetConfig::new("debug_only", &["-g"]),
            ],
            preferred_preset: "debug_opt".into(),
            preset_priority: vec!["debug_opt".into(), "opt_only".into(), "debug_only".into()],
            overhead_threshold: 50.0,
            source_extensions: ["c", "cc", "cpp", "cxx", "c++"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extra_flags: Vec::new(),
            include_dirs: Vec::new(),
            library_dirs: Vec::new(),
            libraries: Vec::new(),
            record_args: vec!["-g".into()],
            report_args: vec![
                "--stdio".into(),
                "--no-children".into(),
                "--sort=dso,symbol".into(),
            ],
            target_args: Vec::new(),
            compile_timeout_secs: 120,
            record_timeout_secs: 300,
            report_timeout_secs: 120,
        }
    }
}

impl ProfilerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.presets.is_empty() {
            return Err(PipelineError::config("profiler.presets must not be empty"));
        }
        let mut seen = HashSet::new();
        for preset in &self.presets {
            if !seen.insert(preset.name.as_str()) {
                return Err(PipelineError::config(format!(
                    "duplicate preset name: {}",
                    preset.name
                )));
            }
        }
        if !(0.0..100.0).contains(&self.overhead_threshold) {
            return Err(PipelineError::config(
                "profiler.overhead_threshold must be in [0, 100)",
            ));
        }
        if self.source_extensions.is_empty() {
            return Err(PipelineError::config(
                "profiler.source_extensions must not be empty",
            ));
        }
        Ok(())
    }

    pub fn preset(&self, name: &str) -> Option<&PresetConfig> {
        self.presets.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Percentage below which the model is told to ignore hotspots.
    pub threshold: u32,
    /// Lines of code context requested around a hotspot.
    pub context_lines: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            context_lines: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicatorConfig {
    pub max_variants: usize,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self { max_variants: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub threshold: u32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self { threshold: 5 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Promote the first "Marginal Improvement" when no variant is significant.
    pub promote_marginal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: ENV_LLM_API_KEY.into(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 180,
        }
    }
}

impl LlmConfig {
    /// Apply `PERFFORGE_LLM_ENDPOINT` / `PERFFORGE_LLM_MODEL` if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var(ENV_LLM_ENDPOINT) {
            if !endpoint.trim().is_empty() {
                self.endpoint = endpoint;
            }
        }
        if let Ok(model) = std::env::var(ENV_LLM_MODEL) {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
        self
    }

    /// API key from `api_key_env`, falling back to `OPENAI_API_KEY`.
    pub fn resolve_api_key(&self) -> Result<String> {
        [self.api_key_env.as_str(), ENV_OPENAI_API_KEY]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::config(format!(
                    "{} not set (and no {ENV_OPENAI_API_KEY} fallback)",
                    self.api_key_env
                ))
            })
    }
}
