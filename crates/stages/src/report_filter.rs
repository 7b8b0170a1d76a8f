//! Trim a `perf report --stdio` listing down to its dominant entries.

use regex::Regex;
use std::sync::OnceLock;

fn entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)%").expect("report entry regex"))
}

/// Overhead percentage of an entry line, `None` for any other line.
pub fn entry_overhead(line: &str) -> Option<f64> {
    entry_regex()
        .captures(line)
        .and_then(|caps| caps[1].parse().ok())
}

/// Keep `#` header lines and every entry block whose overhead is strictly
/// above `threshold`.
///
/// A block is an entry line plus the non-entry lines that follow it (call
/// graph children, blank separators) up to the next entry. Lines before the
/// first entry that are not headers are dropped.
pub fn filter_report(report: &str, threshold: f64) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut keep_block = false;

    for line in report.lines() {
        if line.trim_start().starts_with('#') {
            kept.push(line);
            continue;
        }
        if let Some(overhead) = entry_overhead(line) {
            keep_block = overhead > threshold;
        }
        if keep_block {
            kept.push(line);
        }
    }

    let mut out = kept.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Whether a filtered report still lists at least one entry.
pub fn has_entries(report: &str) -> bool {
    report.lines().any(|line| entry_overhead(line).is_some())
}
