//! Analyzer stage: ask the model where the time goes.

use crate::parse::analysis::{parse_analysis, NOT_PARSED};
use crate::prompts::{load_template, PromptKind};
use perfforge_core::config::AnalyzerConfig;
use perfforge_core::{PipelineError, Stage, StageRecord, StageResult};
use perfforge_llm::{Inference, PromptTemplate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const STAGE_NAME: &str = "analyzer";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalyzerInput {
    source_code: Option<String>,
    perf_report_output: Option<String>,
    perf_command: Option<String>,
    threshold: Option<u32>,
    context: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzerOutput {
    /// Raw model response.
    pub performance_analysis: String,
    /// Function or line named as the hotspot, or "Not parsed".
    pub bottleneck_location: String,
    /// The "Metric/Impact" item of the analysis.
    pub bottleneck_type: String,
    /// The "Likely Cause" item of the analysis.
    pub analysis_hypothesis: String,
    /// False when the analysis names no location to act on.
    pub bottleneck_found: bool,
}

impl Default for AnalyzerOutput {
    fn default() -> Self {
        Self {
            performance_analysis: String::new(),
            bottleneck_location: NOT_PARSED.into(),
            bottleneck_type: NOT_PARSED.into(),
            analysis_hypothesis: NOT_PARSED.into(),
            bottleneck_found: false,
        }
    }
}

pub struct Analyzer {
    config: AnalyzerConfig,
    prompt_dir: Option<PathBuf>,
    inference: Arc<dyn Inference>,
    template: Option<PromptTemplate>,
}

impl Analyzer {
    pub fn new(
        config: AnalyzerConfig,
        prompt_dir: Option<PathBuf>,
        inference: Arc<dyn Inference>,
    ) -> Self {
        Self {
            config,
            prompt_dir,
            inference,
            template: None,
        }
    }
}

impl Stage for Analyzer {
    type Output = AnalyzerOutput;

    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn configure(&mut self) -> Result<(), PipelineError> {
        self.template = Some(load_template(PromptKind::Analyzer, self.prompt_dir.as_deref())?);
        Ok(())
    }

    fn run(&self, input: &StageRecord) -> StageResult<AnalyzerOutput> {
        let template = self
            .template
            .as_ref()
            .ok_or_else(|| PipelineError::config("analyzer used before configure()"))?;
        let input: AnalyzerInput = input.decode()?;
        let report = input
            .perf_report_output
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| PipelineError::input("missing 'perf_report_output'"))?;

        let threshold = input.threshold.unwrap_or(self.config.threshold).to_string();
        let context = input.context.unwrap_or(self.config.context_lines).to_string();
        let prompt = template.render(
            STAGE_NAME,
            &[
                ("source_code", input.source_code.as_deref().unwrap_or("")),
                ("perf_command", input.perf_command.as_deref().unwrap_or("")),
                ("perf_report_output", &report),
                ("threshold", &threshold),
                ("context", &context),
            ],
        );

        let analysis = self.inference.infer(&prompt).map_err(PipelineError::from)?;
        let fields = parse_analysis(&analysis);
        let bottleneck_found = fields.bottleneck_found();
        info!(location = %fields.location, bottleneck_found, "analysis parsed");

        Ok(AnalyzerOutput {
            performance_analysis: analysis,
            bottleneck_location: fields.location,
            bottleneck_type: fields.bottleneck_type,
            analysis_hypothesis: fields.hypothesis,
            bottleneck_found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfforge_llm::{InferenceError, Prompt};
    use std::cell::RefCell;

    struct Canned {
        reply: Result<String, ()>,
        seen: RefCell<Vec<Prompt>>,
    }

    impl Inference for Canned {
        fn infer(&self, prompt: &Prompt) -> Result<String, InferenceError> {
            self.seen.borrow_mut().push(prompt.clone());
            self.reply.clone().map_err(|_| InferenceError::EmptyResponse)
        }
    }

    fn analyzer(reply: Result<String, ()>) -> (Analyzer, Arc<Canned>) {
        let canned = Arc::new(Canned {
            reply,
            seen: RefCell::new(Vec::new()),
        });
        let mut analyzer = Analyzer::new(AnalyzerConfig::default(), None, canned.clone());
        analyzer.configure().unwrap();
        (analyzer, canned)
    }

    fn input() -> StageRecord {
        StageRecord::new()
            .with("source_code", "int main() {}")
            .with("perf_report_output", "   90.00%  app  [.] main")
            .with("perf_command", "perf record -g -- ./app")
            .with("context", 7)
    }

    #[test]
    fn test_parses_reply_and_renders_prompt() {
        let (analyzer, canned) = analyzer(Ok(
            "- **Location:** main\n- **Metric/Impact:** 90% CPU\n- **Likely Cause:** busy loop".into(),
        ));
        let out = analyzer.execute(input());
        assert!(out.error(STAGE_NAME).is_none());
        assert_eq!(out.get_str("bottleneck_location"), Some("main"));
        assert_eq!(out.get_str("bottleneck_type"), Some("90% CPU"));
        assert_eq!(out.get_str("analysis_hypothesis"), Some("busy loop"));
        assert_eq!(out.get("bottleneck_found"), Some(&serde_json::json!(true)));

        let prompt = &canned.seen.borrow()[0];
        assert_eq!(prompt.name, STAGE_NAME);
        assert!(prompt.user.contains("90.00%  app  [.] main"));
        assert!(prompt.user.contains("7 lines of context"));
        assert!(prompt.user.contains("below 5%"));
    }

    #[test]
    fn test_unstructured_reply_is_not_a_bottleneck() {
        let (analyzer, _) = analyzer(Ok("Looks fine to me.".into()));
        let out = analyzer.execute(input());
        assert!(out.error(STAGE_NAME).is_none());
        assert_eq!(out.get_str("bottleneck_location"), Some(NOT_PARSED));
        assert_eq!(out.get("bottleneck_found"), Some(&serde_json::json!(false)));
    }

    #[test]
    fn test_failed_inference_sets_error() {
        let (analyzer, _) = analyzer(Err(()));
        let out = analyzer.execute(input());
        assert!(out.error(STAGE_NAME).unwrap().contains("inference"));
        assert_eq!(out.get_str("source_code"), Some("int main() {}"));
    }

    #[test]
    fn test_missing_report_is_rejected_before_inference() {
        let (analyzer, canned) = analyzer(Ok("unused".into()));
        let out = analyzer.execute(StageRecord::new().with("source_code", "x"));
        assert!(out.error(STAGE_NAME).unwrap().contains("perf_report_output"));
        assert!(canned.seen.borrow().is_empty());
    }
}
