//! Log filtering pipeline: severity floor, grep, and size truncation.
//!
//! All functions are pure with respect to their arguments; the pipeline
//! order is severity -> grep -> truncate.

use crate::logs::severity::{classify_line, Severity};
use regex::RegexBuilder;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Per-call filtering options. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    pub severity: Option<Severity>,
    pub grep: Option<String>,
    pub max_bytes: Option<usize>,
    pub max_lines: Option<usize>,
}

/// Result of a truncation pass. `original_size` is the byte length of the
/// text handed to this call, measured before any cut it performs.
#[derive(Debug, Clone, Serialize)]
pub struct Truncation {
    pub text: String,
    pub truncated: bool,
    pub original_size: usize,
}

/// Keep lines at or above the floor's severity (the floor tier itself and
/// all more-severe tiers), preserving original order.
#[must_use]
pub fn filter_by_severity(text: &str, floor: Severity) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| classify_line(line).priority() <= floor.priority())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep lines matching `pattern`, compiled as a case-insensitive regex.
pub fn grep_logs(text: &str, pattern: &str) -> Result<String, LogError> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| LogError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| re.is_match(line))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Truncate to at most `max_lines` lines (when given), then to at most
/// `max_bytes` bytes. The byte cut backs off to a char boundary so a
/// partially-cut multi-byte character is dropped rather than corrupted.
#[must_use]
pub fn truncate_logs(text: &str, max_bytes: usize, max_lines: Option<usize>) -> Truncation {
    let original_size = text.len();
    let mut truncated = false;

    let mut out = if let Some(max_lines) = max_lines {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() > max_lines {
            truncated = true;
            lines[..max_lines].join("\n")
        } else {
            text.to_string()
        }
    } else {
        text.to_string()
    };

    if out.len() > max_bytes {
        truncated = true;
        let mut end = max_bytes;
        while end > 0 && !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
    }

    Truncation {
        text: out,
        truncated,
        original_size,
    }
}

/// Apply the full pipeline for one call. `original_size` in the result
/// reflects the text after severity/grep filtering but before truncation.
pub fn process_logs(text: &str, spec: &FilterSpec) -> Result<Truncation, LogError> {
    let mut current = text.to_string();

    if let Some(floor) = spec.severity {
        current = filter_by_severity(&current, floor);
    }
    if let Some(pattern) = &spec.grep {
        current = grep_logs(&current, pattern)?;
    }

    Ok(truncate_logs(
        &current,
        spec.max_bytes.unwrap_or(usize::MAX),
        spec.max_lines,
    ))
}
