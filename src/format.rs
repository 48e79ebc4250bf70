//! Adaptive response encoding.
//!
//! Cluster responses reach the agent either as verbose pretty-printed JSON
//! or, when the payload is a uniform collection of flat records, as a
//! compact tab-delimited table. The table form costs a fraction of the
//! tokens of the equivalent JSON for resource listings.
//!
//! A response is classified once into a [`ResponseShape`] and encoding
//! dispatches purely on the tag.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Caller preference for the encoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatPreference {
    /// Always the verbose JSON representation.
    Json,
    /// Always attempt the compact table, falling back to JSON on failure.
    Toon,
    /// Compact when the payload shape allows it, JSON otherwise.
    #[default]
    Auto,
}

impl FromStr for FormatPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(FormatPreference::Json),
            "toon" => Ok(FormatPreference::Toon),
            "auto" => Ok(FormatPreference::Auto),
            _ => Err(format!("Invalid format '{s}'. Must be one of: json, toon, auto")),
        }
    }
}

impl fmt::Display for FormatPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FormatPreference::Json => "json",
            FormatPreference::Toon => "toon",
            FormatPreference::Auto => "auto",
        })
    }
}

/// One-time structural classification of a response value.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    /// null, boolean, or number.
    Primitive,
    /// A raw string, e.g. a log body. Never re-encoded.
    TextBlob,
    /// Non-empty array of flat objects sharing one key set with only
    /// primitive values.
    UniformRecordArray { keys: Vec<String> },
    /// Anything else: nested objects, mixed arrays.
    GenericStructure,
}

/// Diagnostic companion to [`format_response`]: the recommended format and
/// why. Does not affect encoding.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatInfo {
    pub recommended_format: String,
    pub reason: String,
}

fn is_primitive(value: &Value) -> bool {
    !value.is_object() && !value.is_array()
}

/// True iff `value` is a non-empty array of non-null, non-array objects
/// that all share the identical key set and hold only primitive values.
#[must_use]
pub fn is_uniform_array(value: &Value) -> bool {
    let Some(items) = value.as_array() else {
        return false;
    };
    if items.is_empty() {
        return false;
    }

    let Some(first) = items[0].as_object() else {
        return false;
    };
    let mut first_keys: Vec<&String> = first.keys().collect();
    first_keys.sort();

    items.iter().all(|item| {
        let Some(obj) = item.as_object() else {
            return false;
        };
        let mut keys: Vec<&String> = obj.keys().collect();
        keys.sort();
        keys == first_keys && obj.values().all(is_primitive)
    })
}

/// True when the compact table form applies: either the value itself is a
/// uniform record array, or it is an object with at least one direct
/// property that is. Recursion stops at that one level.
#[must_use]
pub fn should_use_toon(value: &Value) -> bool {
    if is_uniform_array(value) {
        return true;
    }
    match value {
        Value::Object(map) => map.values().any(is_uniform_array),
        _ => false,
    }
}

/// Classify a response value into its encoding shape.
#[must_use]
pub fn classify(value: &Value) -> ResponseShape {
    match value {
        Value::String(_) => ResponseShape::TextBlob,
        Value::Null | Value::Bool(_) | Value::Number(_) => ResponseShape::Primitive,
        Value::Array(items) if is_uniform_array(value) => {
            let keys = items[0]
                .as_object()
                .map(|obj| obj.keys().cloned().collect())
                .unwrap_or_default();
            ResponseShape::UniformRecordArray { keys }
        }
        _ => ResponseShape::GenericStructure,
    }
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Render one table cell. Strings go in raw (tabs and newlines flattened so
/// they cannot break the row grid), null as an empty cell, everything else
/// via its JSON rendering.
fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.replace(['\t', '\n'], " "),
        Some(other) => other.to_string(),
    }
}

fn encode_record_array(items: &[Value], keys: &[String]) -> String {
    let mut out = String::new();
    out.push_str(&format!("[{}\t]\n", items.len()));
    out.push_str(&keys.join("\t"));
    for item in items {
        out.push('\n');
        let obj = item.as_object();
        let row: Vec<String> = keys
            .iter()
            .map(|key| render_cell(obj.and_then(|o| o.get(key))))
            .collect();
        out.push_str(&row.join("\t"));
    }
    out
}

/// Attempt the compact tabular encoding. Fails when the payload has no
/// tabular part at all, which triggers the JSON fallback in the caller.
fn encode_toon(value: &Value) -> Result<String, String> {
    match value {
        Value::Array(items) if is_uniform_array(value) => {
            let keys: Vec<String> = items[0]
                .as_object()
                .map(|obj| obj.keys().cloned().collect())
                .unwrap_or_default();
            Ok(encode_record_array(items, &keys))
        }
        Value::Object(map) => {
            if !map.values().any(is_uniform_array) {
                return Err("no tabular property in object".to_string());
            }
            let mut sections: Vec<String> = Vec::new();
            for (key, prop) in map {
                match (prop.as_array(), is_uniform_array(prop)) {
                    (Some(items), true) => {
                        let keys: Vec<String> = items[0]
                            .as_object()
                            .map(|obj| obj.keys().cloned().collect())
                            .unwrap_or_default();
                        sections.push(format!("{key}:\n{}", encode_record_array(items, &keys)));
                    }
                    _ => sections.push(format!("{key}: {}", pretty_json(prop))),
                }
            }
            Ok(sections.join("\n"))
        }
        _ => Err("value is not table-shaped".to_string()),
    }
}

/// Encode a response value for the agent-facing channel.
///
/// Strings pass through verbatim so filtered log output is never re-encoded;
/// primitives always render as JSON. A compact-encoding failure is logged as
/// a diagnostic and silently downgraded to JSON, never surfaced to the
/// caller.
#[must_use]
pub fn format_response(value: &Value, preference: FormatPreference) -> String {
    match classify(value) {
        ResponseShape::TextBlob => {
            return value.as_str().unwrap_or_default().to_string();
        }
        ResponseShape::Primitive => {
            return pretty_json(value);
        }
        _ => {}
    }

    let attempt_compact = match preference {
        FormatPreference::Json => false,
        FormatPreference::Toon => true,
        FormatPreference::Auto => should_use_toon(value),
    };

    if attempt_compact {
        match encode_toon(value) {
            Ok(text) => return text,
            Err(reason) => {
                debug!("compact encoding failed, falling back to JSON: {reason}");
            }
        }
    }

    pretty_json(value)
}

/// Side-effect-free introspection of what `auto` would choose and why.
#[must_use]
pub fn format_info(value: &Value) -> FormatInfo {
    match classify(value) {
        ResponseShape::TextBlob => FormatInfo {
            recommended_format: "json".to_string(),
            reason: "raw text is returned verbatim".to_string(),
        },
        ResponseShape::Primitive => FormatInfo {
            recommended_format: "json".to_string(),
            reason: "primitive values are rendered as JSON".to_string(),
        },
        ResponseShape::UniformRecordArray { keys } => FormatInfo {
            recommended_format: "toon".to_string(),
            reason: format!(
                "uniform array of {} records with {} shared keys",
                value.as_array().map_or(0, Vec::len),
                keys.len()
            ),
        },
        ResponseShape::GenericStructure => {
            if should_use_toon(value) {
                FormatInfo {
                    recommended_format: "toon".to_string(),
                    reason: "object with at least one tabular property".to_string(),
                }
            } else {
                FormatInfo {
                    recommended_format: "json".to_string(),
                    reason: "structure is not a uniform collection of flat records".to_string(),
                }
            }
        }
    }
}
