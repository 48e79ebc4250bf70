//! MCP server: stdio JSON-RPC loop and tool dispatch.
//!
//! Every read tool passes its result through the adaptive encoder before it
//! reaches the agent; every mutating tool goes through the safety gate
//! (confirmation check, dry-run short-circuit, audit trail) before and after
//! touching the cluster.

use crate::config::ServerConfig;
use crate::format::{format_response, FormatPreference};
use crate::kubectl::ClusterClient;
use crate::logs::{process_logs, summarize_logs, FilterSpec, Severity};
use crate::safety::{
    dry_run_summary, redact_manifest, AuditOutcome, AuditRecord, Confirmation, SafetyGate,
};
use crate::tools;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Everything a tool handler needs, injected rather than ambient so tests
/// can run many servers side by side.
pub struct ServerContext {
    pub config: ServerConfig,
    pub gate: Arc<SafetyGate>,
    pub client: Arc<dyn ClusterClient>,
}

impl ServerContext {
    #[must_use]
    pub fn new(config: ServerConfig, client: Arc<dyn ClusterClient>) -> Self {
        let gate = Arc::new(SafetyGate::new(config.audit.clone(), config.dry_run_default));
        ServerContext {
            config,
            gate,
            client,
        }
    }
}

#[derive(Deserialize)]
struct RpcRequest {
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct RpcSuccessResponse {
    jsonrpc: String,
    result: Value,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
    data: Option<Value>,
}

#[derive(Serialize)]
struct RpcErrorResponse {
    jsonrpc: String,
    error: RpcError,
    id: Option<Value>,
}

fn extract_params(params: Option<&Value>) -> HashMap<String, Value> {
    params
        .and_then(|p| p.as_object())
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn required_str_argument<'a>(arguments: &'a HashMap<String, Value>, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing required parameter: {key}"))
}

fn optional_str_argument<'a>(arguments: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(|v| v.as_str())
}

fn parse_bool_argument(arguments: &HashMap<String, Value>, key: &str) -> Option<bool> {
    arguments.get(key).and_then(|value| match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn parse_u64_argument(arguments: &HashMap<String, Value>, key: &str) -> Option<u64> {
    arguments.get(key).and_then(|value| match value {
        Value::Number(num) => num.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    })
}

/// Resolve the format preference for one call: explicit argument, else the
/// configured default.
fn resolve_format(
    ctx: &ServerContext,
    arguments: &HashMap<String, Value>,
) -> Result<FormatPreference> {
    let requested = optional_str_argument(arguments, "format")
        .unwrap_or(ctx.config.response_format.as_str());
    FormatPreference::from_str(requested).map_err(|e| anyhow!(e))
}

fn resolve_severity(
    ctx: &ServerContext,
    arguments: &HashMap<String, Value>,
) -> Result<Option<Severity>> {
    let requested = optional_str_argument(arguments, "severity")
        .map(ToString::to_string)
        .or_else(|| ctx.config.default_severity.clone());
    match requested {
        Some(s) => Severity::from_str(&s).map(Some).map_err(|e| anyhow!(e)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Read tools
// ---------------------------------------------------------------------------

fn handle_list_resources(ctx: &ServerContext, arguments: &HashMap<String, Value>) -> Result<String> {
    let kind = required_str_argument(arguments, "kind")?;
    let namespace = optional_str_argument(arguments, "namespace");
    let selector = optional_str_argument(arguments, "selector");
    let format = resolve_format(ctx, arguments)?;

    let records = ctx.client.list_resources(kind, namespace, selector)?;
    Ok(format_response(&records, format))
}

fn handle_get_resource(ctx: &ServerContext, arguments: &HashMap<String, Value>) -> Result<String> {
    let kind = required_str_argument(arguments, "kind")?;
    let name = required_str_argument(arguments, "name")?;
    let namespace = optional_str_argument(arguments, "namespace");
    let format = resolve_format(ctx, arguments)?;

    let resource = ctx.client.get_resource(kind, name, namespace)?;
    Ok(format_response(&resource, format))
}

fn handle_get_logs(ctx: &ServerContext, arguments: &HashMap<String, Value>) -> Result<String> {
    let name = required_str_argument(arguments, "name")?;
    let namespace = optional_str_argument(arguments, "namespace");
    let container = optional_str_argument(arguments, "container");
    let tail = parse_u64_argument(arguments, "tail");

    let spec = FilterSpec {
        severity: resolve_severity(ctx, arguments)?,
        grep: optional_str_argument(arguments, "grep").map(ToString::to_string),
        max_bytes: Some(
            parse_u64_argument(arguments, "max_bytes")
                .map_or(ctx.config.max_log_bytes, |v| v as usize),
        ),
        max_lines: Some(
            parse_u64_argument(arguments, "max_lines")
                .map_or(ctx.config.max_log_lines, |v| v as usize),
        ),
    };

    let raw = ctx.client.pod_logs(name, namespace, container, tail)?;
    let processed = process_logs(&raw, &spec)?;

    // Log text goes back verbatim; truncation is surfaced as one trailing
    // marker line rather than a wrapper object.
    if processed.truncated {
        Ok(format!(
            "{}\n[log output truncated: showing {} of {} bytes]",
            processed.text,
            processed.text.len(),
            processed.original_size
        ))
    } else {
        Ok(processed.text)
    }
}

fn handle_summarize_logs(
    ctx: &ServerContext,
    arguments: &HashMap<String, Value>,
) -> Result<String> {
    let name = required_str_argument(arguments, "name")?;
    let namespace = optional_str_argument(arguments, "namespace");
    let container = optional_str_argument(arguments, "container");
    let tail = parse_u64_argument(arguments, "tail");
    let format = resolve_format(ctx, arguments)?;

    let raw = ctx.client.pod_logs(name, namespace, container, tail)?;
    let summary = summarize_logs(&raw);
    Ok(format_response(&serde_json::to_value(summary)?, format))
}

fn handle_top_pods(ctx: &ServerContext, arguments: &HashMap<String, Value>) -> Result<String> {
    let namespace = optional_str_argument(arguments, "namespace");
    let format = resolve_format(ctx, arguments)?;

    let usage = ctx.client.top_pods(namespace)?;
    Ok(format_response(&usage, format))
}

// ---------------------------------------------------------------------------
// Mutating tools
// ---------------------------------------------------------------------------

struct MutationPlan {
    action: &'static str,
    resource_kind: String,
    resource_name: String,
    namespace: Option<String>,
    /// Tool input echo for the audit ledger, secrets already redacted.
    input: Value,
    /// Field-level changes shown in the dry-run preview.
    changes: Value,
}

/// The protocol every mutating tool follows: confirmation check (a rejection
/// is returned as a value and never ledgered), dry-run short-circuit (ledgered
/// as dry-run, cluster untouched), then the real call with a success or
/// failure ledger entry either way.
fn execute_mutation(
    ctx: &ServerContext,
    plan: MutationPlan,
    arguments: &HashMap<String, Value>,
    perform: impl FnOnce() -> Result<Value>,
) -> Result<String> {
    let confirmed = parse_bool_argument(arguments, "confirmed").unwrap_or(false);
    let call_dry_run = parse_bool_argument(arguments, "dry_run").unwrap_or(false);

    if let Confirmation::Rejected(message) =
        ctx.gate
            .validate_confirmation(plan.action, confirmed, call_dry_run)
    {
        return Ok(message);
    }

    if ctx.gate.effective_dry_run(call_dry_run) {
        ctx.gate.log_audit(AuditRecord {
            action: plan.action.to_string(),
            resource_kind: plan.resource_kind.clone(),
            resource_name: plan.resource_name.clone(),
            namespace: plan.namespace.clone(),
            input: plan.input,
            outcome: AuditOutcome::DryRun,
            error: None,
            dry_run: true,
        });
        return Ok(dry_run_summary(
            plan.action,
            &plan.resource_kind,
            &plan.resource_name,
            plan.namespace.as_deref(),
            &plan.changes,
        ));
    }

    match perform() {
        Ok(result) => {
            ctx.gate.log_audit(AuditRecord {
                action: plan.action.to_string(),
                resource_kind: plan.resource_kind,
                resource_name: plan.resource_name,
                namespace: plan.namespace,
                input: plan.input,
                outcome: AuditOutcome::Success,
                error: None,
                dry_run: false,
            });
            Ok(serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string()))
        }
        Err(e) => {
            ctx.gate.log_audit(AuditRecord {
                action: plan.action.to_string(),
                resource_kind: plan.resource_kind.clone(),
                resource_name: plan.resource_name.clone(),
                namespace: plan.namespace,
                input: plan.input,
                outcome: AuditOutcome::Failure,
                error: Some(e.to_string()),
                dry_run: false,
            });
            Err(anyhow!(
                "Failed to {} {}/{}: {e}",
                plan.action,
                plan.resource_kind,
                plan.resource_name
            ))
        }
    }
}

fn handle_delete_resource(
    ctx: &ServerContext,
    arguments: &HashMap<String, Value>,
) -> Result<String> {
    let kind = required_str_argument(arguments, "kind")?.to_string();
    let name = required_str_argument(arguments, "name")?.to_string();
    let namespace = optional_str_argument(arguments, "namespace").map(ToString::to_string);

    let plan = MutationPlan {
        action: "delete",
        resource_kind: kind.clone(),
        resource_name: name.clone(),
        namespace: namespace.clone(),
        input: json!({"kind": &kind, "name": &name, "namespace": &namespace}),
        changes: json!({"delete": format!("{kind}/{name}")}),
    };

    let client = Arc::clone(&ctx.client);
    execute_mutation(ctx, plan, arguments, move || {
        client.delete_resource(&kind, &name, namespace.as_deref())?;
        Ok(json!({"deleted": format!("{kind}/{name}")}))
    })
}

fn handle_scale_deployment(
    ctx: &ServerContext,
    arguments: &HashMap<String, Value>,
) -> Result<String> {
    let name = required_str_argument(arguments, "name")?.to_string();
    let replicas = parse_u64_argument(arguments, "replicas")
        .ok_or_else(|| anyhow!("Missing required parameter: replicas"))?;
    let namespace = optional_str_argument(arguments, "namespace").map(ToString::to_string);

    let plan = MutationPlan {
        action: "scale",
        resource_kind: "deployment".to_string(),
        resource_name: name.clone(),
        namespace: namespace.clone(),
        input: json!({"name": &name, "replicas": replicas, "namespace": &namespace}),
        changes: json!({"replicas": replicas}),
    };

    let client = Arc::clone(&ctx.client);
    execute_mutation(ctx, plan, arguments, move || {
        client.scale_resource("deployment", &name, replicas, namespace.as_deref())
    })
}

fn handle_apply_resource(
    ctx: &ServerContext,
    arguments: &HashMap<String, Value>,
) -> Result<String> {
    let manifest_yaml = required_str_argument(arguments, "manifest")?.to_string();

    let parsed: serde_yaml::Value = serde_yaml::from_str(&manifest_yaml)
        .map_err(|e| anyhow!("Manifest is not valid YAML: {e}"))?;
    let manifest: Value = serde_json::to_value(parsed)
        .map_err(|e| anyhow!("Manifest is not representable as JSON: {e}"))?;

    let kind = manifest
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or("resource")
        .to_lowercase();
    let name = manifest
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or("unnamed")
        .to_string();
    let namespace = manifest
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let redacted = redact_manifest(&manifest);
    let plan = MutationPlan {
        action: "update",
        resource_kind: kind,
        resource_name: name,
        namespace,
        input: redacted.clone(),
        changes: redacted,
    };

    let client = Arc::clone(&ctx.client);
    execute_mutation(ctx, plan, arguments, move || {
        let applied = client.apply_manifest(&manifest_yaml)?;
        Ok(json!({"applied": applied}))
    })
}

// ---------------------------------------------------------------------------
// Audit / admin tools
// ---------------------------------------------------------------------------

fn handle_get_status(ctx: &ServerContext) -> Result<String> {
    let status = json!({
        "dryRun": ctx.gate.dry_run(),
        "audit": ctx.gate.config(),
        "auditEntries": ctx.gate.session_log().len(),
    });
    Ok(serde_json::to_string_pretty(&status)?)
}

fn handle_set_dry_run(ctx: &ServerContext, arguments: &HashMap<String, Value>) -> Result<String> {
    let enabled = parse_bool_argument(arguments, "enabled")
        .ok_or_else(|| anyhow!("Missing required parameter: enabled"))?;
    ctx.gate.set_dry_run(enabled);
    Ok(serde_json::to_string_pretty(&json!({"dryRun": enabled}))?)
}

fn handle_get_session_log(ctx: &ServerContext) -> Result<String> {
    Ok(serde_json::to_string_pretty(&ctx.gate.session_log())?)
}

fn handle_get_stats(ctx: &ServerContext) -> Result<String> {
    Ok(serde_json::to_string_pretty(&ctx.gate.session_stats())?)
}

fn handle_clear_session(ctx: &ServerContext) -> Result<String> {
    ctx.gate.clear_session();
    Ok(serde_json::to_string_pretty(&json!({"cleared": true}))?)
}

fn handle_configure_audit(
    ctx: &ServerContext,
    arguments: &HashMap<String, Value>,
) -> Result<String> {
    ctx.gate.configure(
        parse_bool_argument(arguments, "require_confirmation"),
        parse_bool_argument(arguments, "log_to_console"),
    );
    Ok(serde_json::to_string_pretty(&ctx.gate.config())?)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn handle_mcp_methods(method: &str) -> Option<Result<Value>> {
    match method {
        "initialize" => Some(Ok(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {
                "tools": {
                    "listChanged": true
                }
            },
            "serverInfo": {
                "name": "kubeops-mcp",
                "title": "Kubernetes Operations MCP Server",
                "version": env!("CARGO_PKG_VERSION"),
                "buildTimestamp": env!("BUILD_TIMESTAMP")
            }
        }))),
        "tools/list" => Some(Ok(tools::get_tool_schemas())),
        _ => None,
    }
}

fn text_content(text: String) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": text
        }]
    })
}

fn handle_tool_calls(
    ctx: &ServerContext,
    method: &str,
    params_map: &HashMap<String, Value>,
) -> Option<Result<Value>> {
    if method != "tools/call" {
        return None;
    }

    let name = match params_map.get("name").and_then(|v| v.as_str()) {
        Some(name) => name,
        None => return Some(Err(anyhow!("Missing tool name"))),
    };

    let arguments: HashMap<String, Value> = params_map
        .get("arguments")
        .and_then(|v| v.as_object())
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let result = match name {
        "list_resources" => handle_list_resources(ctx, &arguments),
        "get_resource" => handle_get_resource(ctx, &arguments),
        "get_logs" => handle_get_logs(ctx, &arguments),
        "summarize_logs" => handle_summarize_logs(ctx, &arguments),
        "top_pods" => handle_top_pods(ctx, &arguments),
        "delete_resource" => handle_delete_resource(ctx, &arguments),
        "scale_deployment" => handle_scale_deployment(ctx, &arguments),
        "apply_resource" => handle_apply_resource(ctx, &arguments),
        "get_status" => handle_get_status(ctx),
        "set_dry_run" => handle_set_dry_run(ctx, &arguments),
        "get_session_log" => handle_get_session_log(ctx),
        "get_stats" => handle_get_stats(ctx),
        "clear_session" => handle_clear_session(ctx),
        "configure_audit" => handle_configure_audit(ctx, &arguments),
        unknown => Err(anyhow!("Unknown tool: {unknown}")),
    };

    Some(result.map(text_content))
}

/// Route one JSON-RPC method. `None` means no response should be written
/// (notifications).
pub fn handle_method(
    ctx: &ServerContext,
    method: &str,
    params: Option<&Value>,
) -> Option<Result<Value>> {
    let params_map = extract_params(params);

    if let Some(result) = handle_mcp_methods(method) {
        return Some(result);
    }

    if method.starts_with("notifications/") {
        return None;
    }

    if let Some(result) = handle_tool_calls(ctx, method, &params_map) {
        return Some(result);
    }

    Some(Err(anyhow!("Unknown method: {method}")))
}

// ---------------------------------------------------------------------------
// RPC loop
// ---------------------------------------------------------------------------

async fn rpc_loop(ctx: &ServerContext) -> Result<()> {
    info!("starting RPC loop");
    let stdin = tokio::io::stdin();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line_result = timeout(Duration::from_secs(30), lines.next_line()).await;

        let line = match line_result {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                info!("stdin closed, exiting RPC loop");
                break;
            }
            Ok(Err(e)) => {
                warn!("error reading from stdin: {e}");
                break;
            }
            Err(_) => continue,
        };

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                warn!("invalid JSON request: {e}");
                continue;
            }
        };
        debug!("handling method: {}", request.method);

        let result = handle_method(ctx, &request.method, request.params.as_ref());
        if let Some(method_result) = result {
            let resp_json = match method_result {
                Ok(res) => {
                    let response = RpcSuccessResponse {
                        jsonrpc: "2.0".to_string(),
                        result: res,
                        id: request.id,
                    };
                    serde_json::to_string(&response)?
                }
                Err(err) => {
                    let response = RpcErrorResponse {
                        jsonrpc: "2.0".to_string(),
                        error: RpcError {
                            code: -32600,
                            message: err.to_string(),
                            data: None,
                        },
                        id: request.id,
                    };
                    serde_json::to_string(&response)?
                }
            };

            if timeout(
                Duration::from_secs(5),
                stdout.write_all((resp_json + "\n").as_bytes()),
            )
            .await
            .is_err()
            {
                warn!("timeout writing to stdout, exiting");
                break;
            }
            if timeout(Duration::from_secs(5), stdout.flush()).await.is_err() {
                warn!("timeout flushing stdout, exiting");
                break;
            }
        }
    }
    Ok(())
}

/// Serve until stdin closes or the process is interrupted.
pub async fn run(ctx: ServerContext) -> Result<()> {
    tokio::select! {
        result = rpc_loop(&ctx) => {
            info!("RPC loop completed");
            result
        }
        _ = signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
