//! Champion bookkeeping and the per-iteration selection rule.

use perfforge_stages::Verdict;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ORIGINAL_IDENTITY: &str = "original";

/// The current best-known version of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Champion {
    pub identity_name: String,
    pub source_code: String,
    pub profiler_output_path: PathBuf,
    pub iteration_established: u32,
    pub evaluation_summary: Option<String>,
}

impl Champion {
    pub fn original(source_code: String, profiler_output_path: PathBuf) -> Self {
        Self {
            identity_name: ORIGINAL_IDENTITY.to_string(),
            source_code,
            profiler_output_path,
            iteration_established: 0,
            evaluation_summary: None,
        }
    }
}

/// A variant that made it through profiling and evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedVariant {
    pub variant_id: String,
    pub verdict: Verdict,
    pub improvement_percentage: Option<f64>,
    pub comparison_summary: Option<String>,
    pub source_code: String,
    pub profiler_output_path: PathBuf,
}

impl EvaluatedVariant {
    pub fn into_champion(self, iteration: u32) -> Champion {
        Champion {
            identity_name: self.variant_id,
            source_code: self.source_code,
            profiler_output_path: self.profiler_output_path,
            iteration_established: iteration,
            evaluation_summary: self.comparison_summary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum Selection {
    /// First "Significant Improvement"; promoted.
    Significant(usize),
    /// First "Marginal Improvement" with marginal promotion enabled.
    Marginal(usize),
    /// First "Marginal Improvement", noted but not promoted.
    Tentative(usize),
    None,
}

impl Selection {
    /// Index of the variant that replaces the champion, if any.
    pub fn promoted(self) -> Option<usize> {
        match self {
            Selection::Significant(i) | Selection::Marginal(i) => Some(i),
            Selection::Tentative(_) | Selection::None => None,
        }
    }
}

/// First significant improvement wins; otherwise the first marginal one is
/// either promoted or kept as tentative. Order is the evaluation order.
pub fn select_champion(variants: &[EvaluatedVariant], promote_marginal: bool) -> Selection {
    if let Some(i) = variants
        .iter()
        .position(|v| v.verdict == Verdict::SignificantImprovement)
    {
        return Selection::Significant(i);
    }
    match variants
        .iter()
        .position(|v| v.verdict == Verdict::MarginalImprovement)
    {
        Some(i) if promote_marginal => Selection::Marginal(i),
        Some(i) => Selection::Tentative(i),
        None => Selection::None,
    }
}

/// Best parsed improvement seen anywhere in the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestObserved {
    pub iteration: u32,
    pub variant_id: String,
    pub improvement_percentage: f64,
    pub file: String,
}

#[derive(Debug, Default, Clone)]
pub struct BestTracker {
    best: Option<BestObserved>,
}

impl BestTracker {
    /// Replace the record only on a strictly greater percentage, so ties
    /// keep the earlier observation.
    pub fn observe(&mut self, candidate: BestObserved) -> bool {
        if candidate.improvement_percentage.is_nan() {
            return false;
        }
        let better = self
            .best
            .as_ref()
            .map_or(true, |b| candidate.improvement_percentage > b.improvement_percentage);
        if better {
            self.best = Some(candidate);
        }
        better
    }

    pub fn best(&self) -> Option<&BestObserved> {
        self.best.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluated(id: &str, verdict: Verdict, pct: f64) -> EvaluatedVariant {
        EvaluatedVariant {
            variant_id: id.into(),
            verdict,
            improvement_percentage: Some(pct),
            comparison_summary: None,
            source_code: format!("// {id}"),
            profiler_output_path: PathBuf::from(format!("{id}.yaml")),
        }
    }

    #[test]
    fn test_significant_beats_earlier_marginal() {
        let variants = vec![
            evaluated("Variant 1", Verdict::MarginalImprovement, 2.0),
            evaluated("Variant 2", Verdict::SignificantImprovement, 9.0),
            evaluated("Variant 3", Verdict::MarginalImprovement, 5.0),
        ];
        let selection = select_champion(&variants, false);
        assert_eq!(selection, Selection::Significant(1));
        assert_eq!(selection.promoted(), Some(1));

        let mut tracker = BestTracker::default();
        for v in &variants {
            tracker.observe(BestObserved {
                iteration: 1,
                variant_id: v.variant_id.clone(),
                improvement_percentage: v.improvement_percentage.unwrap(),
                file: "a.cpp".into(),
            });
        }
        let best = tracker.best().unwrap();
        assert_eq!(best.improvement_percentage, 9.0);
        assert_eq!(best.variant_id, "Variant 2");
    }

    #[test]
    fn test_marginal_promotion_is_optional() {
        let variants = vec![
            evaluated("Variant 1", Verdict::NoImprovement, 0.0),
            evaluated("Variant 2", Verdict::MarginalImprovement, 3.0),
            evaluated("Variant 3", Verdict::MarginalImprovement, 4.0),
        ];
        assert_eq!(select_champion(&variants, false), Selection::Tentative(1));
        assert_eq!(select_champion(&variants, false).promoted(), None);
        assert_eq!(select_champion(&variants, true), Selection::Marginal(1));
        assert_eq!(select_champion(&[], true), Selection::None);
    }

    #[test]
    fn test_ties_keep_earlier_best() {
        let mut tracker = BestTracker::default();
        let obs = |id: &str, pct: f64| BestObserved {
            iteration: 1,
            variant_id: id.into(),
            improvement_percentage: pct,
            file: "a.cpp".into(),
        };
        assert!(tracker.observe(obs("first", 5.0)));
        assert!(!tracker.observe(obs("second", 5.0)));
        assert!(!tracker.observe(obs("nan", f64::NAN)));
        assert_eq!(tracker.best().unwrap().variant_id, "first");
    }

    #[test]
    fn test_into_champion() {
        let champion = evaluated("Variant 2", Verdict::SignificantImprovement, 9.0).into_champion(3);
        assert_eq!(champion.identity_name, "Variant 2");
        assert_eq!(champion.iteration_established, 3);
        assert_eq!(champion.profiler_output_path, PathBuf::from("Variant 2.yaml"));
    }
}
