//! End-to-end dispatch tests: tool calls routed through `handle_method`
//! against an in-memory cluster client, covering the full mutating-call
//! protocol and the encoding of read results.

use anyhow::{anyhow, Result};
use kubeops_mcp::config::ServerConfig;
use kubeops_mcp::kubectl::ClusterClient;
use kubeops_mcp::safety::AuditOutcome;
use kubeops_mcp::server::{handle_method, ServerContext};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

struct FakeCluster {
    logs: String,
    fail_mutations: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeCluster {
    fn new() -> Self {
        FakeCluster {
            logs: String::new(),
            fail_mutations: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_logs(logs: &str) -> Self {
        FakeCluster {
            logs: logs.to_string(),
            ..Self::new()
        }
    }

    fn failing() -> Self {
        FakeCluster {
            fail_mutations: true,
            ..Self::new()
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ClusterClient for FakeCluster {
    fn list_resources(
        &self,
        kind: &str,
        _namespace: Option<&str>,
        _selector: Option<&str>,
    ) -> Result<Value> {
        self.record(format!("list {kind}"));
        Ok(json!([
            {"name": "web-1", "namespace": "prod", "status": "Running", "created": "2024-03-01T10:00:00Z"},
            {"name": "web-2", "namespace": "prod", "status": "Pending", "created": "2024-03-01T10:01:00Z"}
        ]))
    }

    fn get_resource(&self, kind: &str, name: &str, _namespace: Option<&str>) -> Result<Value> {
        self.record(format!("get {kind}/{name}"));
        Ok(json!({
            "kind": "Pod",
            "metadata": {"name": name, "labels": {"app": "web"}},
            "status": {"phase": "Running"}
        }))
    }

    fn pod_logs(
        &self,
        name: &str,
        _namespace: Option<&str>,
        _container: Option<&str>,
        _tail: Option<u64>,
    ) -> Result<String> {
        self.record(format!("logs {name}"));
        Ok(self.logs.clone())
    }

    fn top_pods(&self, _namespace: Option<&str>) -> Result<Value> {
        self.record("top");
        Ok(json!([{"name": "web-1", "cpu": "12m", "memory": "190Mi"}]))
    }

    fn delete_resource(&self, kind: &str, name: &str, _namespace: Option<&str>) -> Result<()> {
        self.record(format!("delete {kind}/{name}"));
        if self.fail_mutations {
            return Err(anyhow!("pods \"{name}\" not found"));
        }
        Ok(())
    }

    fn scale_resource(
        &self,
        kind: &str,
        name: &str,
        replicas: u64,
        _namespace: Option<&str>,
    ) -> Result<Value> {
        self.record(format!("scale {kind}/{name} {replicas}"));
        if self.fail_mutations {
            return Err(anyhow!("deployments.apps \"{name}\" not found"));
        }
        Ok(json!({"scaled": format!("{kind}/{name}"), "replicas": replicas}))
    }

    fn apply_manifest(&self, _manifest_yaml: &str) -> Result<String> {
        self.record("apply");
        if self.fail_mutations {
            return Err(anyhow!("server rejected the manifest"));
        }
        Ok("deployment.apps/web".to_string())
    }
}

fn context_with(client: FakeCluster) -> (ServerContext, Arc<FakeCluster>) {
    let client = Arc::new(client);
    let ctx = ServerContext::new(ServerConfig::default(), Arc::clone(&client) as Arc<dyn ClusterClient>);
    (ctx, client)
}

fn call_tool(ctx: &ServerContext, name: &str, arguments: Value) -> Result<String> {
    let params = json!({"name": name, "arguments": arguments});
    let result = handle_method(ctx, "tools/call", Some(&params))
        .expect("tools/call always yields a response");
    result.map(|value| {
        value["content"][0]["text"]
            .as_str()
            .expect("text content")
            .to_string()
    })
}

#[test]
fn test_initialize_and_tools_list() {
    let (ctx, _) = context_with(FakeCluster::new());

    let init = handle_method(&ctx, "initialize", None).unwrap().unwrap();
    assert_eq!(init["serverInfo"]["name"], "kubeops-mcp");

    let tools = handle_method(&ctx, "tools/list", None).unwrap().unwrap();
    assert_eq!(tools["tools"].as_array().unwrap().len(), 14);
}

#[test]
fn test_notifications_get_no_response() {
    let (ctx, _) = context_with(FakeCluster::new());
    assert!(handle_method(&ctx, "notifications/initialized", None).is_none());
}

#[test]
fn test_list_resources_encodes_as_table() {
    let (ctx, client) = context_with(FakeCluster::new());
    let out = call_tool(&ctx, "list_resources", json!({"kind": "pods"})).unwrap();
    assert!(out.starts_with("[2\t]\n"));
    assert!(out.contains("created\tname\tnamespace\tstatus"));
    assert!(out.contains("web-1"));
    assert_eq!(client.calls(), vec!["list pods"]);
}

#[test]
fn test_get_resource_nested_object_stays_json() {
    let (ctx, _) = context_with(FakeCluster::new());
    let out = call_tool(
        &ctx,
        "get_resource",
        json!({"kind": "pod", "name": "web-1"}),
    )
    .unwrap();
    assert!(out.contains("\"metadata\""));
    assert!(!out.contains("[1\t]"));
}

#[test]
fn test_get_logs_filters_and_truncates() {
    let logs = "ERROR line 1 failed\nINFO line 2 ok\nERROR other failure\nDEBUG noise";
    let (ctx, _) = context_with(FakeCluster::with_logs(logs));

    let out = call_tool(
        &ctx,
        "get_logs",
        json!({"name": "web-1", "severity": "ERROR", "grep": "line 1"}),
    )
    .unwrap();
    assert_eq!(out, "ERROR line 1 failed");

    let out = call_tool(
        &ctx,
        "get_logs",
        json!({"name": "web-1", "max_lines": 2}),
    )
    .unwrap();
    assert!(out.contains("INFO line 2 ok"));
    assert!(out.contains("[log output truncated"));
    assert!(!out.contains("DEBUG noise"));
}

#[test]
fn test_get_logs_invalid_severity_is_an_error() {
    let (ctx, _) = context_with(FakeCluster::with_logs("INFO x"));
    let err = call_tool(
        &ctx,
        "get_logs",
        json!({"name": "web-1", "severity": "error"}),
    )
    .unwrap_err();
    assert!(err.to_string().contains("Invalid severity"));
}

#[test]
fn test_get_logs_invalid_grep_pattern() {
    let (ctx, _) = context_with(FakeCluster::with_logs("INFO x"));
    let err = call_tool(
        &ctx,
        "get_logs",
        json!({"name": "web-1", "grep": "[unclosed"}),
    )
    .unwrap_err();
    assert!(err.to_string().contains("Invalid pattern"));
}

#[test]
fn test_summarize_logs() {
    let logs = "\
2024-03-01T10:00:01Z ERROR Database connection failed id=100001\n\
2024-03-01T10:00:02Z ERROR Database connection failed id=100002\n\
2024-03-01T10:00:03Z INFO retrying";
    let (ctx, _) = context_with(FakeCluster::with_logs(logs));

    let out = call_tool(&ctx, "summarize_logs", json!({"name": "web-1", "format": "json"})).unwrap();
    let summary: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(summary["totalLines"], 3);
    assert_eq!(summary["severityCounts"]["ERROR"], 2);
    assert_eq!(summary["topErrorPatterns"][0]["count"], 2);
    assert_eq!(summary["timeRange"]["earliest"], "2024-03-01T10:00:01Z");
}

#[test]
fn test_unconfirmed_delete_is_rejected_without_side_effects() {
    let (ctx, client) = context_with(FakeCluster::new());

    let out = call_tool(
        &ctx,
        "delete_resource",
        json!({"kind": "pod", "name": "web-1"}),
    )
    .unwrap();
    assert!(out.contains("requires confirmation"));

    // The cluster was never touched and nothing was ledgered.
    assert!(client.calls().is_empty());
    assert!(ctx.gate.session_log().is_empty());
}

#[test]
fn test_dry_run_delete_previews_and_ledgers() {
    let (ctx, client) = context_with(FakeCluster::new());

    let out = call_tool(
        &ctx,
        "delete_resource",
        json!({"kind": "pod", "name": "web-1", "namespace": "prod", "dry_run": true}),
    )
    .unwrap();
    assert!(out.starts_with("DRY RUN"));
    assert!(out.contains("pod/web-1"));
    assert!(client.calls().is_empty());

    let ledger = ctx.gate.session_log();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].outcome, AuditOutcome::DryRun);
    assert!(ledger[0].dry_run);
}

#[test]
fn test_confirmed_delete_executes_and_ledgers_success() {
    let (ctx, client) = context_with(FakeCluster::new());

    let out = call_tool(
        &ctx,
        "delete_resource",
        json!({"kind": "pod", "name": "web-1", "confirmed": true}),
    )
    .unwrap();
    assert!(out.contains("pod/web-1"));
    assert_eq!(client.calls(), vec!["delete pod/web-1"]);

    let ledger = ctx.gate.session_log();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].outcome, AuditOutcome::Success);
    assert_eq!(ledger[0].action, "delete");
}

#[test]
fn test_failed_mutation_ledgers_failure_and_wraps_error() {
    let (ctx, _) = context_with(FakeCluster::failing());

    let err = call_tool(
        &ctx,
        "delete_resource",
        json!({"kind": "pod", "name": "ghost", "confirmed": true}),
    )
    .unwrap_err();
    assert!(err.to_string().contains("Failed to delete pod/ghost"));
    assert!(err.to_string().contains("not found"));

    let ledger = ctx.gate.session_log();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].outcome, AuditOutcome::Failure);
    assert!(ledger[0].error.as_ref().unwrap().contains("not found"));
}

#[test]
fn test_global_dry_run_short_circuits_scale() {
    let (ctx, client) = context_with(FakeCluster::new());

    call_tool(&ctx, "set_dry_run", json!({"enabled": true})).unwrap();

    let out = call_tool(
        &ctx,
        "scale_deployment",
        json!({"name": "web", "replicas": 5}),
    )
    .unwrap();
    assert!(out.starts_with("DRY RUN"));
    assert!(out.contains("replicas: 5"));
    assert!(client.calls().is_empty());
}

#[test]
fn test_apply_resource_redacts_secret_in_ledger() {
    let (ctx, client) = context_with(FakeCluster::new());

    let manifest = "kind: Secret\nmetadata:\n  name: creds\nstringData:\n  token: t0ps3cret\n";
    call_tool(
        &ctx,
        "apply_resource",
        json!({"manifest": manifest, "confirmed": true}),
    )
    .unwrap();

    assert_eq!(client.calls(), vec!["apply"]);
    let ledger = ctx.gate.session_log();
    assert_eq!(ledger[0].action, "update");
    assert_eq!(ledger[0].input["stringData"]["token"], json!("***"));
}

#[test]
fn test_apply_resource_rejects_invalid_yaml() {
    let (ctx, client) = context_with(FakeCluster::new());
    let err = call_tool(
        &ctx,
        "apply_resource",
        json!({"manifest": "kind: [unclosed", "confirmed": true}),
    )
    .unwrap_err();
    assert!(err.to_string().contains("not valid YAML"));
    assert!(client.calls().is_empty());
}

#[test]
fn test_audit_surface_round_trip() {
    let (ctx, _) = context_with(FakeCluster::new());

    call_tool(
        &ctx,
        "scale_deployment",
        json!({"name": "web", "replicas": 2, "confirmed": true}),
    )
    .unwrap();
    call_tool(
        &ctx,
        "delete_resource",
        json!({"kind": "pod", "name": "web-1", "dry_run": true}),
    )
    .unwrap();

    let stats_text = call_tool(&ctx, "get_stats", json!({})).unwrap();
    let stats: Value = serde_json::from_str(&stats_text).unwrap();
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["success"], 1);
    assert_eq!(stats["dryRun"], 1);
    assert_eq!(stats["byAction"]["scale"], 1);
    assert_eq!(stats["byResource"]["pod"], 1);

    let status_text = call_tool(&ctx, "get_status", json!({})).unwrap();
    let status: Value = serde_json::from_str(&status_text).unwrap();
    assert_eq!(status["auditEntries"], 2);
    assert_eq!(status["dryRun"], false);

    call_tool(&ctx, "clear_session", json!({})).unwrap();
    let log_text = call_tool(&ctx, "get_session_log", json!({})).unwrap();
    let log: Value = serde_json::from_str(&log_text).unwrap();
    assert!(log.as_array().unwrap().is_empty());
}

#[test]
fn test_configure_audit_disables_confirmation() {
    let (ctx, client) = context_with(FakeCluster::new());

    call_tool(&ctx, "configure_audit", json!({"require_confirmation": false})).unwrap();

    // Delete now proceeds without a confirmed flag.
    call_tool(&ctx, "delete_resource", json!({"kind": "pod", "name": "web-1"})).unwrap();
    assert_eq!(client.calls(), vec!["delete pod/web-1"]);
}

#[test]
fn test_unknown_tool_and_method() {
    let (ctx, _) = context_with(FakeCluster::new());

    let err = call_tool(&ctx, "nonexistent", json!({})).unwrap_err();
    assert!(err.to_string().contains("Unknown tool"));

    let err = handle_method(&ctx, "bogus/method", None).unwrap().unwrap_err();
    assert!(err.to_string().contains("Unknown method"));
}
