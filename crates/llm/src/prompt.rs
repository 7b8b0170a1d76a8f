use serde::{Deserialize, Serialize};

/// A rendered request for the inference collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    /// Which stage built this prompt (`analyzer`, `replicator`, `evaluator`).
    pub name: String,
    pub system: String,
    pub user: String,
}

/// System/user message pair with `{placeholder}` slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

impl PromptTemplate {
    /// Substitute every `{key}` in both messages.
    ///
    /// Braces that do not name a supplied key are left alone, so code
    /// snippets embedded in templates survive rendering.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Prompt {
        Prompt {
            name: name.to_string(),
            system: substitute(&self.system, vars),
            user: substitute(&self.user, vars),
        }
    }

    /// Placeholders in `required` that appear in neither message.
    pub fn missing_placeholders<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|key| {
                let slot = format!("{{{key}}}");
                !self.system.contains(&slot) && !self.user.contains(&slot)
            })
            .collect()
    }
}

fn substitute(text: &str, vars: &[(&str, &str)]) -> String {
    // Single pass so substituted values are never re-expanded.
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let replaced = tail[1..].find('}').and_then(|close| {
            let key = &tail[1..1 + close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close + 2))
        });
        match replaced {
            Some((value, consumed)) => {
                out.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
