//! CLI wiring for the `perfforge` binary.

use crate::orchestrator::{Orchestrator, PipelineStages};
use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use perfforge_core::PipelineConfig;
use perfforge_stages::profiler::discover_sources;
use perfforge_tools::resolve_executable;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "perfforge",
    about = "LLM-guided iterative optimizer for native C/C++ sources"
)]
#[command(group(ArgGroup::new("input").required(true).args(["source_dir", "source_file"])))]
pub struct Cli {
    /// Optimize every source file directly inside this directory.
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Optimize a single source file.
    #[arg(long)]
    pub source_file: Option<PathBuf>,

    #[arg(long, default_value = "perfforge_output")]
    pub output_dir: PathBuf,

    /// Overrides `iterations` from the config file.
    #[arg(long)]
    pub iterations: Option<u32>,

    /// YAML pipeline configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Preferred compile preset, e.g. `debug_opt`.
    #[arg(long)]
    pub preset: Option<String>,

    /// Promote marginal improvements to champion.
    #[arg(long, default_value_t = false)]
    pub promote_marginal: bool,

    /// Arguments passed to the profiled program.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    pub target_args: Vec<String>,
}

impl Cli {
    /// Load the config file (or defaults) and apply command-line overrides.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(preset) = &self.preset {
            if config.profiler.preset(preset).is_none() {
                bail!("unknown preset '{preset}'");
            }
            config.profiler.preferred_preset = preset.clone();
        }
        if self.promote_marginal {
            config.selection.promote_marginal = true;
        }
        if !self.target_args.is_empty() {
            config.profiler.target_args = self.target_args.clone();
        }
        config.llm = config.llm.with_env_overrides();
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Source files named on the command line.
    pub fn sources(&self, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
        if let Some(file) = &self.source_file {
            if !file.is_file() {
                bail!("source file {} does not exist", file.display());
            }
            return Ok(vec![file.clone()]);
        }
        let Some(dir) = &self.source_dir else {
            bail!("either --source-dir or --source-file is required");
        };
        if !dir.is_dir() {
            bail!("source directory {} does not exist", dir.display());
        }
        let sources = discover_sources(dir, &config.profiler.source_extensions)?;
        if sources.is_empty() {
            bail!(
                "no files with extensions {:?} in {}",
                config.profiler.source_extensions,
                dir.display()
            );
        }
        Ok(sources)
    }
}

fn require_tool(kind: &str, program: &str) -> Result<()> {
    match resolve_executable(program) {
        Some(path) => {
            info!(tool = kind, path = %path.display(), "tool resolved");
            Ok(())
        }
        None => bail!("{kind} '{program}' not found or not executable"),
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = cli.pipeline_config()?;
    let sources = cli.sources(&config)?;
    require_tool("compiler", &config.profiler.compiler)?;
    require_tool("perf", &config.profiler.perf)?;

    let stages = PipelineStages::from_config(&config).context("failed to set up inference")?;
    let mut orchestrator = Orchestrator::prepare(config, stages, &cli.output_dir)?;
    println!(
        "Optimizing {} file(s), output in {}",
        sources.len(),
        display(&cli.output_dir)
    );
    let summary = orchestrator.run(&sources)?;
    print!("{}", summary.render());
    println!("Run summary: {}", display(&orchestrator.store().summary_path()));
    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
