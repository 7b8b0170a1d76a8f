//! Filesystem-safe names for variants and source files.

/// Fallback used for variant identifiers that sanitize to nothing.
pub const FALLBACK_VARIANT: &str = "variant";
/// Fallback used for file names that sanitize to nothing.
pub const FALLBACK_SOURCE: &str = "source";

/// Reduce `raw` to `[A-Za-z0-9_.-]`.
///
/// Whitespace runs become a single `_`, every other disallowed character is
/// dropped. A result that is empty or made only of dots (`.`, `..`) is
/// replaced by `fallback`, so the output is always a single, non-traversing
/// path component.
pub fn sanitize_component(raw: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if is_allowed(ch) {
            if pending_space && !out.is_empty() {
                out.push('_');
            }
            pending_space = false;
            out.push(ch);
        }
    }

    if out.chars().all(|c| c == '.') {
        return fallback.to_string();
    }
    out
}

pub fn sanitize_variant_id(raw: &str) -> String {
    sanitize_component(raw, FALLBACK_VARIANT)
}

pub fn sanitize_file_name(raw: &str) -> String {
    sanitize_component(raw, FALLBACK_SOURCE)
}

fn is_allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')
}
