//! Run summary persisted at the end of a run.

use crate::champion::{BestObserved, Champion, Selection};
use perfforge_core::record::write_yaml;
use perfforge_core::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// How a source file's iteration chain ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileOutcome {
    AbortedNoBottleneck {
        iteration: u32,
    },
    AbortedStageError {
        iteration: u32,
        stage: String,
        error: String,
    },
    CompletedAllIterations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub variant_id: String,
    pub verdict: Option<String>,
    pub improvement_percentage: Option<f64>,
    /// Why the variant never reached selection.
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u32,
    pub variants: Vec<VariantSummary>,
    pub selection: Selection,
    pub champion_after: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub file: String,
    pub outcome: FileOutcome,
    pub iterations: Vec<IterationSummary>,
    pub true_initial: Option<Champion>,
    pub final_champion: Option<Champion>,
}

impl FileSummary {
    pub fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            outcome: FileOutcome::CompletedAllIterations,
            iterations: Vec::new(),
            true_initial: None,
            final_champion: None,
        }
    }

    pub fn improved(&self) -> bool {
        match (&self.true_initial, &self.final_champion) {
            (Some(initial), Some(last)) => initial.identity_name != last.identity_name,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub files: Vec<FileSummary>,
    pub best_observed: Option<BestObserved>,
}

impl RunSummary {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        write_yaml(path, self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let blob = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&blob)?)
    }

    /// Human-readable final report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            let outcome = match &file.outcome {
                FileOutcome::CompletedAllIterations => "completed all iterations".to_string(),
                FileOutcome::AbortedNoBottleneck { iteration } => {
                    format!("stopped at iteration {iteration}: no actionable bottleneck")
                }
                FileOutcome::AbortedStageError {
                    iteration,
                    stage,
                    error,
                } => format!("aborted at iteration {iteration} in {stage}: {error}"),
            };
            let _ = writeln!(out, "{}: {outcome}", file.file);
            if let (Some(initial), Some(last)) = (&file.true_initial, &file.final_champion) {
                let _ = writeln!(
                    out,
                    "  champion: {} -> {} (established in iteration {})",
                    initial.identity_name, last.identity_name, last.iteration_established
                );
                if let Some(summary) = &last.evaluation_summary {
                    let _ = writeln!(out, "  summary: {summary}");
                }
            }
        }
        match &self.best_observed {
            Some(best) => {
                let _ = writeln!(
                    out,
                    "best observed: {:.2}% ({} in {}, iteration {})",
                    best.improvement_percentage, best.variant_id, best.file, best.iteration
                );
            }
            None => {
                let _ = writeln!(out, "best observed: none");
            }
        }
        out
    }
}
