use perfforge_core::PipelineError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Keys the evaluation block is expected to carry.
pub const EXPECTED_KEYS: [&str; 7] = [
    "comparison_summary",
    "is_improvement",
    "improvement_details",
    "confidence_score",
    "detailed_analysis",
    "original_hotspots",
    "variant_hotspots",
];

/// Qualitative judgement driving champion promotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    SignificantImprovement,
    MarginalImprovement,
    NoImprovement,
    Regression,
    #[default]
    Unknown,
}

impl Verdict {
    /// Classify an `is_improvement` value: a category string or a bool.
    pub fn classify(value: &Value) -> Verdict {
        match value {
            Value::Bool(true) => Verdict::MarginalImprovement,
            Value::Bool(false) => Verdict::NoImprovement,
            Value::String(s) => Self::classify_text(s),
            _ => Verdict::Unknown,
        }
    }

    /// Matches on whole words, so "insignificant" never reads as significant.
    fn classify_text(text: &str) -> Verdict {
        let text = text.trim().to_ascii_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |stem: &str| words.iter().any(|w| w.starts_with(stem));

        let negated = matches!(words.first(), Some(&("no" | "not" | "none" | "false")))
            || words.contains(&"not")
            || has("insignificant")
            || has("negligible");
        if negated {
            Verdict::NoImprovement
        } else if has("regress") || has("worse") || has("slower") {
            Verdict::Regression
        } else if has("significant") {
            Verdict::SignificantImprovement
        } else if has("marginal") || has("slight") || text == "yes" || text == "true" {
            Verdict::MarginalImprovement
        } else {
            Verdict::Unknown
        }
    }
}

/// Remove surrounding ```` ``` ```` / ```` ```yaml ```` fences.
pub fn strip_code_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest
            .strip_prefix("yaml")
            .or_else(|| rest.strip_prefix("yml"))
            .unwrap_or(rest);
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parse the response as YAML and return its top-level `evaluation` mapping.
pub fn parse_evaluation(text: &str) -> Result<Map<String, Value>, PipelineError> {
    let body = strip_code_fences(text);
    if body.is_empty() {
        return Err(PipelineError::parse("response is empty after removing fences"));
    }
    let doc: Value = serde_yaml::from_str(body)
        .map_err(|e| PipelineError::parse(format!("response is not YAML: {e}")))?;
    match doc {
        Value::Object(mut map) => match map.remove("evaluation") {
            Some(Value::Object(evaluation)) => Ok(evaluation),
            Some(_) => Err(PipelineError::parse("'evaluation' is not a mapping")),
            None => Err(PipelineError::parse("'evaluation' key missing")),
        },
        _ => Err(PipelineError::parse("response is not a YAML mapping")),
    }
}

pub fn missing_keys(evaluation: &Map<String, Value>) -> Vec<&'static str> {
    EXPECTED_KEYS
        .iter()
        .copied()
        .filter(|k| !evaluation.contains_key(*k))
        .collect()
}

fn percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([-+]?\d+(?:\.\d+)?)\s*%").expect("percent regex"))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            s.trim_end_matches('%').trim().parse().ok().or_else(|| {
                percent_regex()
                    .captures(s)
                    .and_then(|caps| caps[1].parse().ok())
            })
        }
        _ => None,
    }
}

/// Overall improvement in percent, from `improvement_percentage` or from
/// `improvement_details` (a mapping with a percentage key, a number, or text
/// mentioning `NN%`).
pub fn improvement_percentage(evaluation: &Map<String, Value>) -> Option<f64> {
    if let Some(pct) = evaluation.get("improvement_percentage").and_then(as_number) {
        return Some(pct);
    }
    match evaluation.get("improvement_details")? {
        Value::Object(details) => ["percentage", "improvement_percentage", "speedup_percentage"]
            .iter()
            .find_map(|k| details.get(*k).and_then(as_number)),
        other => as_number(other),
    }
}

pub fn confidence_score(evaluation: &Map<String, Value>) -> Option<f64> {
    match evaluation.get("confidence_score")? {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub fn comparison_summary(evaluation: &Map<String, Value>) -> Option<String> {
    evaluation
        .get("comparison_summary")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify() {
        let cases = [
            (json!("Significant Improvement"), Verdict::SignificantImprovement),
            (json!("marginal improvement"), Verdict::MarginalImprovement),
            (json!("No Improvement"), Verdict::NoImprovement),
            (json!("No significant improvement"), Verdict::NoImprovement),
            (json!("Regression"), Verdict::Regression),
            (json!(true), Verdict::MarginalImprovement),
            (json!(false), Verdict::NoImprovement),
            (json!("Notably slower"), Verdict::Regression),
            (json!("Insignificant improvement"), Verdict::NoImprovement),
            (json!("negligible change"), Verdict::NoImprovement),
            (json!("Significantly faster"), Verdict::SignificantImprovement),
            (json!("maybe"), Verdict::Unknown),
            (json!(3), Verdict::Unknown),
        ];
        for (value, expected) in cases {
            assert_eq!(Verdict::classify(&value), expected, "{value}");
        }
    }

    #[test]
    fn test_parse_fenced_yaml() {
        let response = "```yaml\nevaluation:\n  comparison_summary: faster\n  is_improvement: Significant Improvement\n  improvement_details:\n    percentage: 12.5\n  confidence_score: 0.8\n```\n";
        let evaluation = parse_evaluation(response).unwrap();
        assert_eq!(comparison_summary(&evaluation).as_deref(), Some("faster"));
        assert_eq!(improvement_percentage(&evaluation), Some(12.5));
        assert_eq!(confidence_score(&evaluation), Some(0.8));
        assert_eq!(
            missing_keys(&evaluation),
            vec!["detailed_analysis", "original_hotspots", "variant_hotspots"]
        );
    }

    #[test]
    fn test_percentage_forms() {
        let eval = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(
            improvement_percentage(&eval(json!({"improvement_percentage": "9%"}))),
            Some(9.0)
        );
        assert_eq!(
            improvement_percentage(&eval(json!({"improvement_details": "about 4.5 % fewer cycles"}))),
            Some(4.5)
        );
        assert_eq!(
            improvement_percentage(&eval(json!({"improvement_details": {"notes": "n/a"}}))),
            None
        );
        assert_eq!(
            confidence_score(&eval(json!({"confidence_score": "high"}))),
            None
        );
    }

    #[test]
    fn test_parse_failures() {
        assert!(parse_evaluation("```\n```").is_err());
        assert!(parse_evaluation("verdict: good").is_err());
        assert!(parse_evaluation("evaluation: [1, 2]").is_err());
        assert!(parse_evaluation("just some prose: [unbalanced").is_err());
    }
}
