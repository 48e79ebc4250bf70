//! Severity classification for raw log lines.
//!
//! Container logs carry no uniform level field, so classification is
//! heuristic: an ordered rule table of keyword families, first match wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse severity tier of a single log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Unknown,
}

impl Severity {
    /// Numeric filtering priority: lower is more severe. A severity filter
    /// with floor `F` keeps lines whose priority is `<= F.priority()`.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Severity::Error => 0,
            Severity::Warn => 1,
            Severity::Info => 2,
            Severity::Debug => 3,
            Severity::Trace => 4,
            Severity::Unknown => 5,
        }
    }

    /// All tiers, in priority order. Used to zero-fill count maps.
    #[must_use]
    pub fn all() -> [Severity; 6] {
        [
            Severity::Error,
            Severity::Warn,
            Severity::Info,
            Severity::Debug,
            Severity::Trace,
            Severity::Unknown,
        ]
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warn => "WARN",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
            Severity::Trace => "TRACE",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    /// Parses the filter values accepted from callers. Case-sensitive, and
    /// `UNKNOWN` is not a valid filter floor.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ERROR" => Ok(Severity::Error),
            "WARN" => Ok(Severity::Warn),
            "INFO" => Ok(Severity::Info),
            "DEBUG" => Ok(Severity::Debug),
            "TRACE" => Ok(Severity::Trace),
            _ => Err(format!(
                "Invalid severity '{s}'. Must be one of: ERROR, WARN, INFO, DEBUG, TRACE"
            )),
        }
    }
}

/// Classification rules, evaluated top to bottom against the uppercased
/// line, first match wins. Note the check order is not the priority order:
/// DEBUG and TRACE are sniffed before INFO, so a debug line that happens to
/// mention "info" lands in DEBUG.
pub static CLASSIFICATION_RULES: &[(Severity, &[&str])] = &[
    (
        Severity::Error,
        &["ERROR", "FATAL", "SEVERE", "LEVEL=ERROR", "\"LEVEL\":\"ERROR\""],
    ),
    (
        Severity::Warn,
        &["WARN", "WARNING", "LEVEL=WARN", "\"LEVEL\":\"WARN\""],
    ),
    (Severity::Debug, &["DEBUG", "LEVEL=DEBUG", "\"LEVEL\":\"DEBUG\""]),
    (Severity::Trace, &["TRACE", "LEVEL=TRACE", "\"LEVEL\":\"TRACE\""]),
    (Severity::Info, &["INFO", "LEVEL=INFO", "\"LEVEL\":\"INFO\""]),
];

/// Classify one line of log text. Pure and deterministic.
#[must_use]
pub fn classify_line(line: &str) -> Severity {
    let upper = line.to_uppercase();
    for (tier, needles) in CLASSIFICATION_RULES {
        if needles.iter().any(|needle| upper.contains(needle)) {
            return *tier;
        }
    }
    Severity::Unknown
}
