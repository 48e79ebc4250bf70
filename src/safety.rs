//! Mutation safety gate: dry-run mode, confirmation requirements, and the
//! session audit ledger.
//!
//! The gate is an explicit service object owned by the server and injected
//! into every mutating tool handler, not a process-wide singleton. Interior
//! state is behind a mutex so ledger appends stay sound if the hosting
//! runtime ever overlaps calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tracing::info;

/// Action kinds that require an explicit `confirmed: true` by default.
pub const DEFAULT_CONFIRM_ACTIONS: &[&str] = &["delete", "update", "scale"];

const CHANGE_VALUE_MAX_CHARS: usize = 50;

/// Audit behavior, reconfigurable at runtime via partial merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub log_to_console: bool,
    pub require_confirmation: bool,
    pub confirm_actions: BTreeSet<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            enabled: true,
            log_to_console: false,
            require_confirmation: true,
            confirm_actions: DEFAULT_CONFIRM_ACTIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditOutcome {
    Success,
    Failure,
    DryRun,
}

/// One attempted operation. Immutable once appended to the ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub resource_kind: String,
    pub resource_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Caller-provided echo of the tool input. Secret-valued fields must be
    /// redacted by the caller before logging.
    pub input: Value,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub dry_run: bool,
}

/// An [`AuditEntry`] minus the timestamp, which the gate stamps on append.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub action: String,
    pub resource_kind: String,
    pub resource_name: String,
    pub namespace: Option<String>,
    pub input: Value,
    pub outcome: AuditOutcome,
    pub error: Option<String>,
    pub dry_run: bool,
}

/// Ledger statistics derived by folding over the entries.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub dry_run: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_resource: BTreeMap<String, usize>,
}

/// Outcome of a confirmation check, returned as a value, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Approved,
    Rejected(String),
}

struct GateState {
    dry_run: bool,
    config: AuditConfig,
    ledger: Vec<AuditEntry>,
}

/// Process-lifetime safety state for mutating operations.
pub struct SafetyGate {
    state: Mutex<GateState>,
}

impl SafetyGate {
    #[must_use]
    pub fn new(config: AuditConfig, dry_run: bool) -> Self {
        SafetyGate {
            state: Mutex::new(GateState {
                dry_run,
                config,
                ledger: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_dry_run(&self, enabled: bool) {
        self.lock().dry_run = enabled;
        info!("dry-run mode {}", if enabled { "enabled" } else { "disabled" });
    }

    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.lock().dry_run
    }

    /// Effective dry-run for one call: the global flag or the call's own.
    #[must_use]
    pub fn effective_dry_run(&self, call_dry_run: bool) -> bool {
        call_dry_run || self.dry_run()
    }

    #[must_use]
    pub fn config(&self) -> AuditConfig {
        self.lock().config.clone()
    }

    /// Partial merge of the audit configuration; `None` fields keep their
    /// current value.
    pub fn configure(&self, require_confirmation: Option<bool>, log_to_console: Option<bool>) {
        let mut state = self.lock();
        if let Some(require) = require_confirmation {
            state.config.require_confirmation = require;
        }
        if let Some(console) = log_to_console {
            state.config.log_to_console = console;
        }
    }

    #[must_use]
    pub fn requires_confirmation(&self, action: &str) -> bool {
        let state = self.lock();
        state.config.require_confirmation && state.config.confirm_actions.contains(action)
    }

    /// Gate check for a mutating call. Dry-run (per-call or global) always
    /// bypasses confirmation; nothing else does.
    #[must_use]
    pub fn validate_confirmation(
        &self,
        action: &str,
        confirmed: bool,
        call_dry_run: bool,
    ) -> Confirmation {
        if self.effective_dry_run(call_dry_run) {
            return Confirmation::Approved;
        }
        if self.requires_confirmation(action) && !confirmed {
            return Confirmation::Rejected(format!(
                "The '{action}' action requires confirmation. Re-run with confirmed: true to \
                 proceed, or with dry_run: true to preview the change without applying it."
            ));
        }
        Confirmation::Approved
    }

    /// Stamp and append one entry. No-op when auditing is disabled.
    pub fn log_audit(&self, record: AuditRecord) {
        let mut state = self.lock();
        if !state.config.enabled {
            return;
        }

        let entry = AuditEntry {
            timestamp: Utc::now(),
            action: record.action,
            resource_kind: record.resource_kind,
            resource_name: record.resource_name,
            namespace: record.namespace,
            input: record.input,
            outcome: record.outcome,
            error: record.error,
            dry_run: record.dry_run,
        };

        if state.config.log_to_console {
            info!(
                "audit: {} {}/{} -> {}",
                entry.action,
                entry.resource_kind,
                entry.resource_name,
                match entry.outcome {
                    AuditOutcome::Success => "success",
                    AuditOutcome::Failure => "failure",
                    AuditOutcome::DryRun => "dry-run",
                }
            );
        }

        state.ledger.push(entry);
    }

    /// Snapshot of the ledger in append order.
    #[must_use]
    pub fn session_log(&self) -> Vec<AuditEntry> {
        self.lock().ledger.clone()
    }

    pub fn clear_session(&self) {
        self.lock().ledger.clear();
    }

    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        let state = self.lock();
        let mut stats = SessionStats::default();
        for entry in &state.ledger {
            stats.total += 1;
            match entry.outcome {
                AuditOutcome::Success => stats.success += 1,
                AuditOutcome::Failure => stats.failure += 1,
                AuditOutcome::DryRun => stats.dry_run += 1,
            }
            *stats.by_action.entry(entry.action.clone()).or_insert(0) += 1;
            *stats
                .by_resource
                .entry(entry.resource_kind.clone())
                .or_insert(0) += 1;
        }
        stats
    }
}

/// Elide long change values so previews stay one line per field.
fn render_change_value(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() > CHANGE_VALUE_MAX_CHARS {
        let clipped: String = rendered.chars().take(CHANGE_VALUE_MAX_CHARS).collect();
        format!("{clipped}...")
    } else {
        rendered
    }
}

/// Human-readable preview of what a mutation would do.
#[must_use]
pub fn dry_run_summary(
    action: &str,
    resource_kind: &str,
    name: &str,
    namespace: Option<&str>,
    proposed_changes: &Value,
) -> String {
    let mut out = String::from("DRY RUN: no changes will be made\n\n");
    out.push_str(&format!("Action:   {action}\n"));
    match namespace {
        Some(ns) => out.push_str(&format!("Resource: {resource_kind}/{name} (namespace: {ns})\n")),
        None => out.push_str(&format!("Resource: {resource_kind}/{name}\n")),
    }
    out.push_str("Proposed changes:\n");

    match proposed_changes.as_object() {
        Some(map) if !map.is_empty() => {
            for (key, value) in map {
                out.push_str(&format!("  - {key}: {}\n", render_change_value(value)));
            }
        }
        _ => out.push_str("  (none)\n"),
    }
    out
}

/// Redact secret-valued fields of a manifest before it is echoed into the
/// audit ledger.
#[must_use]
pub fn redact_manifest(manifest: &Value) -> Value {
    let mut redacted = manifest.clone();
    let is_secret = redacted
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.eq_ignore_ascii_case("secret"));
    if !is_secret {
        return redacted;
    }

    for field in ["data", "stringData"] {
        if let Some(Value::Object(map)) = redacted.get_mut(field) {
            for value in map.values_mut() {
                *value = Value::String("***".to_string());
            }
        }
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate() -> SafetyGate {
        SafetyGate::new(AuditConfig::default(), false)
    }

    fn record(action: &str, kind: &str, outcome: AuditOutcome) -> AuditRecord {
        AuditRecord {
            action: action.to_string(),
            resource_kind: kind.to_string(),
            resource_name: "web".to_string(),
            namespace: Some("default".to_string()),
            input: json!({}),
            outcome,
            error: None,
            dry_run: outcome == AuditOutcome::DryRun,
        }
    }

    #[test]
    fn test_confirmation_required_for_default_actions() {
        let gate = gate();
        assert!(gate.requires_confirmation("delete"));
        assert!(gate.requires_confirmation("update"));
        assert!(gate.requires_confirmation("scale"));
        assert!(!gate.requires_confirmation("list"));
    }

    #[test]
    fn test_validate_confirmation_rejects_unconfirmed_delete() {
        let gate = gate();
        match gate.validate_confirmation("delete", false, false) {
            Confirmation::Rejected(message) => {
                assert!(message.contains("confirmation"));
                assert!(message.contains("dry_run"));
            }
            Confirmation::Approved => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_validate_confirmation_dry_run_bypasses() {
        let gate = gate();
        assert_eq!(gate.validate_confirmation("delete", false, true), Confirmation::Approved);

        gate.set_dry_run(true);
        assert_eq!(gate.validate_confirmation("delete", false, false), Confirmation::Approved);
    }

    #[test]
    fn test_validate_confirmation_non_gated_action_always_valid() {
        let gate = gate();
        assert_eq!(gate.validate_confirmation("list", false, false), Confirmation::Approved);
    }

    #[test]
    fn test_configure_is_partial_merge() {
        let gate = gate();
        gate.configure(Some(false), None);
        let config = gate.config();
        assert!(!config.require_confirmation);
        assert!(!config.log_to_console);
        assert!(!gate.requires_confirmation("delete"));

        gate.configure(None, Some(true));
        let config = gate.config();
        assert!(!config.require_confirmation);
        assert!(config.log_to_console);
    }

    #[test]
    fn test_session_stats_fold() {
        let gate = gate();
        gate.log_audit(record("create", "deployment", AuditOutcome::Success));
        gate.log_audit(record("delete", "pod", AuditOutcome::Failure));
        gate.log_audit(record("scale", "deployment", AuditOutcome::DryRun));

        let stats = gate.session_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.dry_run, 1);
        assert_eq!(stats.by_action["create"], 1);
        assert_eq!(stats.by_action["delete"], 1);
        assert_eq!(stats.by_action["scale"], 1);
        assert_eq!(stats.by_resource["deployment"], 2);
        assert_eq!(stats.by_resource["pod"], 1);
    }

    #[test]
    fn test_clear_session_empties_ledger() {
        let gate = gate();
        gate.log_audit(record("delete", "pod", AuditOutcome::Success));
        assert_eq!(gate.session_log().len(), 1);
        gate.clear_session();
        assert!(gate.session_log().is_empty());
        assert_eq!(gate.session_stats(), SessionStats::default());
    }

    #[test]
    fn test_audit_disabled_skips_append() {
        let gate = SafetyGate::new(
            AuditConfig {
                enabled: false,
                ..AuditConfig::default()
            },
            false,
        );
        gate.log_audit(record("delete", "pod", AuditOutcome::Success));
        assert!(gate.session_log().is_empty());
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(serde_json::to_value(AuditOutcome::Success).unwrap(), json!("success"));
        assert_eq!(serde_json::to_value(AuditOutcome::DryRun).unwrap(), json!("dry-run"));
    }

    #[test]
    fn test_dry_run_summary_layout() {
        let summary = dry_run_summary(
            "scale",
            "deployment",
            "web",
            Some("prod"),
            &json!({"replicas": 5, "note": "x".repeat(80)}),
        );
        assert!(summary.starts_with("DRY RUN"));
        assert!(summary.contains("Action:   scale"));
        assert!(summary.contains("deployment/web (namespace: prod)"));
        assert!(summary.contains("- replicas: 5"));
        assert!(summary.contains("..."));
        assert!(!summary.contains(&"x".repeat(60)));
    }

    #[test]
    fn test_dry_run_summary_no_changes() {
        let summary = dry_run_summary("delete", "pod", "tmp", None, &json!({}));
        assert!(summary.contains("Resource: pod/tmp\n"));
        assert!(summary.contains("(none)"));
    }

    #[test]
    fn test_redact_secret_manifest() {
        let manifest = json!({
            "kind": "Secret",
            "metadata": {"name": "creds"},
            "data": {"password": "aHVudGVyMg=="},
            "stringData": {"token": "t0ps3cret"}
        });
        let redacted = redact_manifest(&manifest);
        assert_eq!(redacted["data"]["password"], json!("***"));
        assert_eq!(redacted["stringData"]["token"], json!("***"));
        assert_eq!(redacted["metadata"]["name"], json!("creds"));

        let config_map = json!({"kind": "ConfigMap", "data": {"key": "value"}});
        assert_eq!(redact_manifest(&config_map), config_map);
    }
}
