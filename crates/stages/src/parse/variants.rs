use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::warn;

pub const NO_EXPLANATION: &str = "No explicit explanation provided.";

/// One proposed rewrite of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// `Variant N`, unique within a batch.
    pub variant_id: String,
    /// Rationale text with any `Rationale:`/`Explanation:` lead-in removed.
    pub explanation: String,
    /// Complete replacement source for the file.
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVariants {
    pub strategy: String,
    pub variants: Vec<Variant>,
}

fn strategy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)Proposed Fix Strategy\s*:\**(.*?)(?:#{2,}\s*Variant|$)")
            .expect("strategy regex")
    })
}

fn variant_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)###\s*Variant\s*(\d+)(.*?)```[a-z0-9+]*[ \t]*\n(.*?)```")
            .expect("variant regex")
    })
}

fn lead_in_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[\s:*]*(?:rationale|explanation)\s*:?\**\s*").expect("lead-in regex")
    })
}

fn clean_explanation(raw: &str) -> String {
    let text = lead_in_regex().replace(raw.trim(), "");
    let text = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim().trim_start_matches(':').trim();
    if text.is_empty() {
        NO_EXPLANATION.to_string()
    } else {
        text.to_string()
    }
}

/// Extract the fix strategy and up to `max_variants` variants.
///
/// Variant ids are `Variant N`; a later variant reusing an id is dropped.
pub fn parse_variants(text: &str, max_variants: usize) -> ParsedVariants {
    let strategy = strategy_regex()
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let mut variants = Vec::new();
    for caps in variant_regex().captures_iter(text) {
        if variants.len() >= max_variants {
            break;
        }
        let variant_id = format!("Variant {}", &caps[1]);
        if !seen.insert(variant_id.clone()) {
            warn!(variant = %variant_id, "dropping duplicate variant id");
            continue;
        }
        variants.push(Variant {
            variant_id,
            explanation: clean_explanation(&caps[2]),
            code: caps[3].trim().to_string(),
        });
    }

    ParsedVariants { strategy, variants }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "\
Proposed Fix Strategy: Make the inner loop cache friendly.

### Variant 1
Rationale: transpose `b` before multiplying.
```cpp
int main() { return 1; }
```

### Variant 2
**Explanation:** block the loops.
// tile size chosen for L1
```c++
int main() { return 2; }
```

### Variant 1
Repeated id.
```cpp
int main() { return 3; }
```

### Variant 3
```cpp
int main() { return 4; }
```
";

    #[test]
    fn test_parses_strategy_and_variants() {
        let parsed = parse_variants(RESPONSE, 3);
        assert_eq!(parsed.strategy, "Make the inner loop cache friendly.");
        let ids: Vec<&str> = parsed.variants.iter().map(|v| v.variant_id.as_str()).collect();
        assert_eq!(ids, vec!["Variant 1", "Variant 2", "Variant 3"]);
        assert_eq!(
            parsed.variants[0].explanation,
            "transpose `b` before multiplying."
        );
        assert_eq!(parsed.variants[0].code, "int main() { return 1; }");
        assert_eq!(parsed.variants[1].explanation, "block the loops.");
        assert_eq!(parsed.variants[1].code, "int main() { return 2; }");
        assert_eq!(parsed.variants[2].explanation, NO_EXPLANATION);
        assert_eq!(parsed.variants[2].code, "int main() { return 4; }");
    }

    #[test]
    fn test_max_variants() {
        let parsed = parse_variants(RESPONSE, 1);
        assert_eq!(parsed.variants.len(), 1);
    }

    #[test]
    fn test_unstructured_response() {
        let parsed = parse_variants("I cannot help with that.", 3);
        assert!(parsed.strategy.is_empty());
        assert!(parsed.variants.is_empty());
    }
}
