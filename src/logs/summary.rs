//! Log summarization: severity counts, time range, and error clustering.
//!
//! Instead of shipping a large log body to the agent, `summarize_logs`
//! reduces it to aggregate statistics. Error lines are clustered by a
//! normalized template with volatile tokens (timestamps, UUIDs, IPs, long
//! digit runs) replaced by placeholders, so "connection to 10.0.0.12 failed"
//! and "connection to 10.0.0.57 failed" count as one pattern.

use crate::logs::severity::{classify_line, Severity};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

const TOP_PATTERNS: usize = 5;
const RECENT_ERRORS: usize = 5;
const PATTERN_KEY_MAX_CHARS: usize = 200;

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
            .expect("timestamp regex")
    })
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .expect("uuid regex")
    })
}

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 regex"))
}

fn digit_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{5,}").expect("digit run regex"))
}

/// First and last timestamp-like substrings seen, in line order. Assumes
/// roughly chronological input.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeRange {
    pub earliest: Option<String>,
    pub latest: Option<String>,
}

/// One cluster of error lines sharing a normalized template.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPattern {
    pub pattern: String,
    pub count: usize,
    pub sample: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    pub total_lines: usize,
    pub estimated_bytes: usize,
    pub time_range: TimeRange,
    pub severity_counts: BTreeMap<Severity, usize>,
    pub top_error_patterns: Vec<ErrorPattern>,
    pub recent_errors: Vec<String>,
}

/// Replace volatile tokens with placeholders and cap the result, yielding
/// the clustering key for an error line.
#[must_use]
pub fn normalize_error_line(line: &str) -> String {
    let normalized = timestamp_re().replace_all(line, "<TIMESTAMP>");
    let normalized = uuid_re().replace_all(&normalized, "<UUID>");
    let normalized = ipv4_re().replace_all(&normalized, "<IP>");
    let normalized = digit_run_re().replace_all(&normalized, "<NUM>");

    normalized.chars().take(PATTERN_KEY_MAX_CHARS).collect()
}

/// Reduce a log body to aggregate statistics.
#[must_use]
pub fn summarize_logs(text: &str) -> LogSummary {
    let mut severity_counts: BTreeMap<Severity, usize> =
        Severity::all().iter().map(|tier| (*tier, 0)).collect();
    let mut time_range = TimeRange::default();
    let mut error_lines: Vec<String> = Vec::new();
    let mut total_lines = 0usize;

    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        total_lines += 1;

        let tier = classify_line(line);
        *severity_counts.entry(tier).or_insert(0) += 1;
        if tier == Severity::Error {
            error_lines.push(line.to_string());
        }

        if let Some(found) = timestamp_re().find(line) {
            if time_range.earliest.is_none() {
                time_range.earliest = Some(found.as_str().to_string());
            }
            time_range.latest = Some(found.as_str().to_string());
        }
    }

    // Group errors by normalized key, preserving insertion order so a stable
    // sort keeps first-seen-wins ties.
    let mut groups: Vec<ErrorPattern> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    for line in &error_lines {
        let key = normalize_error_line(line);
        match group_index.get(&key) {
            Some(&idx) => groups[idx].count += 1,
            None => {
                group_index.insert(key.clone(), groups.len());
                groups.push(ErrorPattern {
                    pattern: key,
                    count: 1,
                    sample: line.clone(),
                });
            }
        }
    }
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups.truncate(TOP_PATTERNS);

    let recent_start = error_lines.len().saturating_sub(RECENT_ERRORS);
    let recent_errors = error_lines[recent_start..].to_vec();

    LogSummary {
        total_lines,
        estimated_bytes: text.len(),
        time_range,
        severity_counts,
        top_error_patterns: groups,
        recent_errors,
    }
}
