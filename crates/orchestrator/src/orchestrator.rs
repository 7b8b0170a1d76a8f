//! Per-file iteration loop: baseline, analyze, replicate, patch, then
//! profile and evaluate every variant and pick the next champion.

use crate::champion::{
    select_champion, BestObserved, BestTracker, Champion, EvaluatedVariant, Selection,
    ORIGINAL_IDENTITY,
};
use crate::summary::{FileOutcome, FileSummary, IterationSummary, RunSummary, VariantSummary};
use anyhow::{bail, Context};
use perfforge_core::sanitize::sanitize_file_name;
use perfforge_core::{PipelineConfig, PipelineError, RecordKind, RecordStore, Stage, StageRecord};
use perfforge_llm::{ChatClient, Inference};
use perfforge_stages::parse::Variant;
use perfforge_stages::{
    analyzer, evaluator, patcher, profiler, replicator, Analyzer, Evaluator, PatchAggregate,
    PatchResult, PatchStatus, Patcher, Profiler, Replicator, Verdict,
};
use perfforge_tools::{Compiler, GccCompiler, LinuxPerf, PerfRecorder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Where a file's iteration currently is. Also names the stage blamed when
/// the file is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationState {
    ProfileBaseline,
    Analyze,
    Replicate,
    Patch,
    ProfileVariants,
    EvaluateVariants,
    SelectChampion,
}

impl IterationState {
    pub fn stage(self) -> &'static str {
        match self {
            IterationState::ProfileBaseline | IterationState::ProfileVariants => profiler::STAGE_NAME,
            IterationState::Analyze => analyzer::STAGE_NAME,
            IterationState::Replicate => replicator::STAGE_NAME,
            IterationState::Patch => patcher::STAGE_NAME,
            IterationState::EvaluateVariants => evaluator::STAGE_NAME,
            IterationState::SelectChampion => "orchestrator",
        }
    }
}

/// The five configured stages, built once per run.
pub struct PipelineStages {
    pub profiler: Profiler,
    pub analyzer: Analyzer,
    pub replicator: Replicator,
    pub patcher: Patcher,
    pub evaluator: Evaluator,
}

impl PipelineStages {
    pub fn new(
        config: &PipelineConfig,
        compiler: Box<dyn Compiler>,
        recorder: Box<dyn PerfRecorder>,
        inference: Arc<dyn Inference>,
    ) -> Self {
        let prompt_dir = config.prompt_dir.clone();
        Self {
            profiler: Profiler::with_tools(config.profiler.clone(), compiler, recorder),
            analyzer: Analyzer::new(config.analyzer.clone(), prompt_dir.clone(), inference.clone()),
            replicator: Replicator::new(
                config.replicator.clone(),
                prompt_dir.clone(),
                inference.clone(),
            ),
            patcher: Patcher::new(),
            evaluator: Evaluator::new(config.evaluator.clone(), prompt_dir, inference),
        }
    }

    /// Real collaborators: the configured compiler, Linux `perf` and the
    /// chat-completions client. Fails when no API key is available.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let client = ChatClient::from_config(&config.llm)?;
        info!(model = client.model(), "inference client ready");
        Ok(Self::new(
            config,
            Box::new(GccCompiler::from_config(&config.profiler)),
            Box::new(LinuxPerf::from_config(&config.profiler)),
            Arc::new(client),
        ))
    }

    pub fn configure(&mut self) -> Result<(), PipelineError> {
        self.profiler.configure()?;
        self.analyzer.configure()?;
        self.replicator.configure()?;
        self.patcher.configure()?;
        self.evaluator.configure()?;
        Ok(())
    }
}

pub struct Orchestrator {
    config: PipelineConfig,
    stages: PipelineStages,
    store: RecordStore,
    best: BestTracker,
}

impl Orchestrator {
    /// Validate the configuration, configure every stage and create the
    /// output directory. Any failure here is a setup error.
    pub fn prepare(
        config: PipelineConfig,
        mut stages: PipelineStages,
        output_dir: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        stages.configure().context("failed to configure stages")?;
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).with_context(|| {
            format!("cannot create output directory {}", output_dir.display())
        })?;
        Ok(Self {
            config,
            stages,
            store: RecordStore::new(output_dir),
            best: BestTracker::default(),
        })
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Optimize every source file in order and persist the run summary.
    pub fn run(&mut self, sources: &[PathBuf]) -> anyhow::Result<RunSummary> {
        if sources.is_empty() {
            bail!("no source files to optimize");
        }
        let mut summary = RunSummary::default();
        let mut taken = HashSet::new();
        for source in sources {
            let file_name = source_file_name(source);
            let run_name = unique_run_name(&file_name, &mut taken);
            if run_name != file_name {
                warn!(source = %source.display(), run_name = %run_name, "file name already used in this run");
            }
            let file = FileRun {
                config: &self.config,
                stages: &self.stages,
                store: &self.store,
                best: &mut self.best,
                summary: FileSummary::new(&run_name),
                file_name,
                run_name,
                iteration: 1,
                state: IterationState::ProfileBaseline,
                champion: None,
            };
            summary.files.push(file.run(source));
        }
        summary.best_observed = self.best.best().cloned();
        let path = self.store.summary_path();
        summary
            .save(&path)
            .with_context(|| format!("cannot write run summary to {}", path.display()))?;
        info!(path = %path.display(), "run summary written");
        Ok(summary)
    }
}

/// State of one source file's iteration chain.
struct FileRun<'a> {
    config: &'a PipelineConfig,
    stages: &'a PipelineStages,
    store: &'a RecordStore,
    best: &'a mut BestTracker,
    /// Sanitized name the source is copied and patched under.
    file_name: String,
    /// Key of the file's output directory; unique within a run.
    run_name: String,
    iteration: u32,
    state: IterationState,
    champion: Option<Champion>,
    summary: FileSummary,
}

enum Step<T> {
    Continue(T),
    Stop(FileOutcome),
}

fn field<T: DeserializeOwned>(record: &StageRecord, key: &str) -> Option<T> {
    record
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn path_value(path: &Path) -> Value {
    Value::String(path.display().to_string())
}

fn source_file_name(source: &Path) -> String {
    let raw_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    sanitize_file_name(raw_name)
}

/// `file_name`, or `file_name_2`, `file_name_3`, ... when an earlier input
/// already sanitized to the same directory.
fn unique_run_name(file_name: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = file_name.to_string();
    let mut suffix = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{file_name}_{suffix}");
        suffix += 1;
    }
    candidate
}

impl<'a> FileRun<'a> {
    fn run(mut self, source: &Path) -> FileSummary {
        info!(file = %self.run_name, iterations = self.config.iterations, "optimizing source file");
        let outcome = match self.drive(source) {
            Ok(outcome) => outcome,
            Err(error) => self.abort(error.to_string()),
        };
        match &outcome {
            FileOutcome::CompletedAllIterations => {
                info!(file = %self.run_name, "completed all iterations")
            }
            FileOutcome::AbortedNoBottleneck { iteration } => {
                info!(file = %self.run_name, iteration, "no actionable bottleneck, stopping")
            }
            FileOutcome::AbortedStageError { iteration, stage, error } => {
                warn!(file = %self.run_name, iteration, stage = %stage, error = %error, "file aborted")
            }
        }
        self.summary.outcome = outcome;
        self.summary.final_champion = self.champion.take();
        self.summary
    }

    fn abort(&self, error: String) -> FileOutcome {
        FileOutcome::AbortedStageError {
            iteration: self.iteration,
            stage: self.state.stage().to_string(),
            error,
        }
    }

    /// Persist the input, execute the stage, persist the output.
    fn run_stage<S: Stage>(
        &self,
        stage: &S,
        label: &str,
        input: StageRecord,
    ) -> Result<(StageRecord, PathBuf), PipelineError> {
        self.store
            .write(&self.run_name, self.iteration, label, RecordKind::Input, &input)?;
        let output = stage.execute(input);
        let path = self
            .store
            .write(&self.run_name, self.iteration, label, RecordKind::Output, &output)?;
        Ok((output, path))
    }

    fn drive(&mut self, source: &Path) -> Result<FileOutcome, PipelineError> {
        let champion = match self.profile_baseline(source)? {
            Step::Continue(champion) => champion,
            Step::Stop(outcome) => return Ok(outcome),
        };
        self.summary.true_initial = Some(champion.clone());
        self.champion = Some(champion);

        for iteration in 1..=self.config.iterations {
            self.iteration = iteration;
            info!(file = %self.run_name, iteration, "starting iteration");
            if let Step::Stop(outcome) = self.iterate()? {
                return Ok(outcome);
            }
        }
        Ok(FileOutcome::CompletedAllIterations)
    }

    fn profile_baseline(&mut self, source: &Path) -> Result<Step<Champion>, PipelineError> {
        self.state = IterationState::ProfileBaseline;
        let original_dir = self.store.original_dir(&self.run_name);
        std::fs::create_dir_all(&original_dir)?;
        let original_path = original_dir.join(&self.file_name);
        std::fs::copy(source, &original_path)?;

        let input = StageRecord::new()
            .with("source_dir", path_value(&original_dir))
            .with(
                "work_dir",
                path_value(&self.store.build_dir(&self.run_name, 1, ORIGINAL_IDENTITY)),
            )
            .with("preferred_preset", self.config.profiler.preferred_preset.clone())
            .with("target_args", self.config.profiler.target_args.clone());
        let (record, path) = self.run_stage(&self.stages.profiler, profiler::STAGE_NAME, input)?;
        if let Some(error) = record.error(profiler::STAGE_NAME) {
            return Ok(Step::Stop(self.abort(error.to_string())));
        }

        let source_code = match record.get_str("source_code") {
            Some(code) => code.to_string(),
            None => std::fs::read_to_string(&original_path)?,
        };
        Ok(Step::Continue(Champion::original(source_code, path)))
    }

    fn iterate(&mut self) -> Result<Step<()>, PipelineError> {
        let champion = self
            .champion
            .clone()
            .ok_or_else(|| PipelineError::config("iteration started without a champion"))?;

        self.state = IterationState::Analyze;
        let champion_profile = StageRecord::load(&champion.profiler_output_path)?;
        let mut input = StageRecord::new().with("source_code", champion.source_code.clone());
        for key in ["perf_report_output", "perf_command"] {
            if let Some(value) = champion_profile.get(key) {
                input.set(key, value.clone());
            }
        }
        let (analysis, _) = self.run_stage(&self.stages.analyzer, analyzer::STAGE_NAME, input)?;
        if let Some(error) = analysis.error(analyzer::STAGE_NAME) {
            return Ok(Step::Stop(self.abort(error.to_string())));
        }
        if field::<bool>(&analysis, "bottleneck_found") != Some(true) {
            return Ok(Step::Stop(FileOutcome::AbortedNoBottleneck {
                iteration: self.iteration,
            }));
        }

        self.state = IterationState::Replicate;
        let (replication, _) =
            self.run_stage(&self.stages.replicator, replicator::STAGE_NAME, analysis)?;
        if let Some(error) = replication.error(replicator::STAGE_NAME) {
            return Ok(Step::Stop(self.abort(error.to_string())));
        }
        let variants: Vec<Variant> = field(&replication, "modified_code_variants").unwrap_or_default();
        if variants.is_empty() {
            return Ok(Step::Stop(self.abort("no code variants produced".into())));
        }

        self.state = IterationState::Patch;
        let input = StageRecord::new()
            .with(
                "modified_code_variants",
                replication
                    .get("modified_code_variants")
                    .cloned()
                    .unwrap_or(Value::Null),
            )
            .with("original_file_name", self.file_name.clone())
            .with(
                "patch_output_dir",
                path_value(&self.store.patch_dir(&self.run_name, self.iteration)),
            );
        let (patching, _) = self.run_stage(&self.stages.patcher, patcher::STAGE_NAME, input)?;
        if let Some(error) = patching.error(patcher::STAGE_NAME) {
            return Ok(Step::Stop(self.abort(error.to_string())));
        }
        let status: PatchAggregate = field(&patching, "patcher_status").unwrap_or_default();
        if status == PatchAggregate::AllFailed {
            return Ok(Step::Stop(self.abort("all variants failed to patch".into())));
        }
        let patches: Vec<PatchResult> = field(&patching, "patch_results").unwrap_or_default();

        let mut evaluated = Vec::new();
        let mut variant_summaries = Vec::new();
        for patch in &patches {
            let summary = match self.assess_variant(patch, &champion)? {
                Ok(variant) => {
                    let summary = VariantSummary {
                        variant_id: variant.variant_id.clone(),
                        verdict: Some(verdict_label(variant.verdict)),
                        improvement_percentage: variant.improvement_percentage,
                        skipped: None,
                    };
                    evaluated.push(variant);
                    summary
                }
                Err(reason) => {
                    warn!(variant = %patch.variant_id, reason = %reason, "variant skipped");
                    VariantSummary {
                        variant_id: patch.variant_id.clone(),
                        verdict: None,
                        improvement_percentage: None,
                        skipped: Some(reason),
                    }
                }
            };
            variant_summaries.push(summary);
        }

        self.state = IterationState::SelectChampion;
        let selection = select_champion(&evaluated, self.config.selection.promote_marginal);
        match selection {
            Selection::Tentative(i) => info!(
                variant = %evaluated[i].variant_id,
                "marginal improvement noted; champion kept"
            ),
            Selection::None => info!(champion = %champion.identity_name, "no improving variant; champion kept"),
            Selection::Significant(_) | Selection::Marginal(_) => {}
        }
        if let Some(index) = selection.promoted() {
            let winner = evaluated.swap_remove(index).into_champion(self.iteration);
            info!(
                file = %self.run_name,
                iteration = self.iteration,
                champion = %winner.identity_name,
                "new champion"
            );
            self.champion = Some(winner);
        }

        self.summary.iterations.push(IterationSummary {
            iteration: self.iteration,
            variants: variant_summaries,
            selection,
            champion_after: self
                .champion
                .as_ref()
                .map(|c| c.identity_name.clone())
                .unwrap_or_default(),
        });
        Ok(Step::Continue(()))
    }

    /// Profile and evaluate one patched variant. The inner `Err` is the
    /// reason the variant was skipped; the outer one is a persistence failure.
    fn assess_variant(
        &mut self,
        patch: &PatchResult,
        champion: &Champion,
    ) -> Result<Result<EvaluatedVariant, String>, PipelineError> {
        if patch.status != PatchStatus::Success {
            return Ok(Err(format!(
                "patch failed: {}",
                patch.error.as_deref().unwrap_or("unknown error")
            )));
        }
        let Some(patched) = patch.patched_file_path.as_deref().map(PathBuf::from) else {
            return Ok(Err("patch produced no file".into()));
        };
        let Some(variant_dir) = patched.parent() else {
            return Ok(Err(format!("{} has no parent directory", patched.display())));
        };

        self.state = IterationState::ProfileVariants;
        let label = RecordStore::variant_stage(profiler::STAGE_NAME, &patch.variant_id);
        let input = StageRecord::new()
            .with("source_dir", path_value(variant_dir))
            .with(
                "work_dir",
                path_value(&self.store.build_dir(&self.run_name, self.iteration, &patch.variant_id)),
            )
            .with("preferred_preset", self.config.profiler.preferred_preset.clone())
            .with("target_args", self.config.profiler.target_args.clone());
        let (profile, profile_path) = self.run_stage(&self.stages.profiler, &label, input)?;
        if let Some(error) = profile.error(profiler::STAGE_NAME) {
            return Ok(Err(format!("profiling failed: {error}")));
        }

        self.state = IterationState::EvaluateVariants;
        let label = RecordStore::variant_stage(evaluator::STAGE_NAME, &patch.variant_id);
        let input = StageRecord::new()
            .with("original_profiler_output_path", path_value(&champion.profiler_output_path))
            .with("variant_profiler_output_path", path_value(&profile_path));
        let (evaluation, _) = self.run_stage(&self.stages.evaluator, &label, input)?;
        if let Some(error) = evaluation.error(evaluator::STAGE_NAME) {
            return Ok(Err(format!("evaluation failed: {error}")));
        }

        let verdict: Verdict = field(&evaluation, "evaluation_verdict").unwrap_or_default();
        let improvement_percentage = evaluation
            .get("improvement_percentage")
            .and_then(Value::as_f64);
        if let Some(pct) = improvement_percentage {
            let observed = BestObserved {
                iteration: self.iteration,
                variant_id: patch.variant_id.clone(),
                improvement_percentage: pct,
                file: self.run_name.clone(),
            };
            if self.best.observe(observed) {
                info!(variant = %patch.variant_id, improvement_percentage = pct, "new best observed");
            }
        }

        let source_code = match profile.get_str("source_code") {
            Some(code) => code.to_string(),
            None => std::fs::read_to_string(&patched)?,
        };
        Ok(Ok(EvaluatedVariant {
            variant_id: patch.variant_id.clone(),
            verdict,
            improvement_percentage,
            comparison_summary: evaluation.get_str("comparison_summary").map(str::to_string),
            source_code,
            profiler_output_path: profile_path,
        }))
    }
}

fn verdict_label(verdict: Verdict) -> String {
    serde_json::to_value(verdict)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_name_their_stage() {
        assert_eq!(IterationState::ProfileBaseline.stage(), "profiler");
        assert_eq!(IterationState::ProfileVariants.stage(), "profiler");
        assert_eq!(IterationState::Replicate.stage(), "replicator");
        assert_eq!(IterationState::Patch.stage(), "patcher");
    }

    #[test]
    fn test_colliding_names_get_suffixes() {
        let mut taken = HashSet::new();
        let first = source_file_name(Path::new("/src/a b.cpp"));
        let second = source_file_name(Path::new("/other/a_b.cpp"));
        assert_eq!(first, second);
        assert_eq!(unique_run_name(&first, &mut taken), "a_b.cpp");
        assert_eq!(unique_run_name(&second, &mut taken), "a_b.cpp_2");
        assert_eq!(unique_run_name(&second, &mut taken), "a_b.cpp_3");
    }

    #[test]
    fn test_verdict_label() {
        assert_eq!(verdict_label(Verdict::SignificantImprovement), "significant_improvement");
        assert_eq!(verdict_label(Verdict::Unknown), "unknown");
    }
}
