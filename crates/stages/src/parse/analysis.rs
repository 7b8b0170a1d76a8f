use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Sentinel for a field the analysis text did not contain.
pub const NOT_PARSED: &str = "Not parsed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFields {
    pub location: String,
    pub bottleneck_type: String,
    pub hypothesis: String,
}

impl AnalysisFields {
    /// A location was named, so there is something to act on.
    pub fn bottleneck_found(&self) -> bool {
        is_parsed(&self.location)
    }
}

pub fn is_parsed(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != NOT_PARSED
}

fn location_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)\*\*\s*Location\s*:?\s*\*\*\s*:?(.*?)(?:\n\s*-\s*\*\*|$)")
            .expect("location regex")
    })
}

fn impact_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)\*\*\s*Metric/Impact\s*:?\s*\*\*\s*:?(.*?)(?:\n\s*-\s*\*\*|$)")
            .expect("metric/impact regex")
    })
}

fn cause_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)\*\*\s*Likely Cause\s*:?\s*\*\*\s*:?(.*?)(?:\n\s*```|\n\s*-\s*\*\*|$)")
            .expect("likely cause regex")
    })
}

fn fenced_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\s*```.*?```").expect("fenced block regex"))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract location, bottleneck type (the "Metric/Impact" item) and
/// hypothesis (the "Likely Cause" item). Absent fields are [`NOT_PARSED`].
pub fn parse_analysis(text: &str) -> AnalysisFields {
    let hypothesis = capture(cause_regex(), text)
        .map(|h| fenced_block_regex().replace_all(&h, "").trim().to_string())
        .filter(|h| !h.is_empty());

    AnalysisFields {
        location: capture(location_regex(), text).unwrap_or_else(|| NOT_PARSED.into()),
        bottleneck_type: capture(impact_regex(), text).unwrap_or_else(|| NOT_PARSED.into()),
        hypothesis: hypothesis.unwrap_or_else(|| NOT_PARSED.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANALYSIS: &str = "\
The hottest function dominates the profile.

- **Location:** `matmul()` in heavy_computation.cpp:42
- **Metric/Impact:** 72% of cycles, cache misses in the inner loop
- **Likely Cause:** the inner loop walks `b` column-major,
  so every access misses L1.
  ```cpp
  for (k...) sum += a[i][k] * b[k][j];
  ```
";

    #[test]
    fn test_parses_all_fields() {
        let fields = parse_analysis(ANALYSIS);
        assert_eq!(fields.location, "`matmul()` in heavy_computation.cpp:42");
        assert_eq!(
            fields.bottleneck_type,
            "72% of cycles, cache misses in the inner loop"
        );
        assert!(fields.hypothesis.starts_with("the inner loop walks"));
        assert!(fields.hypothesis.ends_with("misses L1."));
        assert!(fields.bottleneck_found());
    }

    #[test]
    fn test_colon_outside_bold() {
        let fields = parse_analysis("- **Location**: main()\n- **Likely Cause**: recursion");
        assert_eq!(fields.location, "main()");
        assert_eq!(fields.hypothesis, "recursion");
        assert_eq!(fields.bottleneck_type, NOT_PARSED);
    }

    #[test]
    fn test_nothing_found() {
        let fields = parse_analysis("No significant bottleneck; the program is I/O bound.");
        assert_eq!(fields.location, NOT_PARSED);
        assert!(!fields.bottleneck_found());
        assert!(!is_parsed("  "));
    }
}
