use serde_json::{json, Value};

/// Get tool schemas for MCP protocol with rich descriptions
pub fn get_tool_schemas() -> Value {
    json!({
        "tools": [
            get_list_resources_schema(),
            get_resource_schema(),
            get_logs_schema(),
            get_summarize_logs_schema(),
            get_top_pods_schema(),
            get_delete_resource_schema(),
            get_scale_deployment_schema(),
            get_apply_resource_schema(),
            get_status_schema(),
            get_set_dry_run_schema(),
            get_session_log_schema(),
            get_stats_schema(),
            get_clear_session_schema(),
            get_configure_audit_schema()
        ]
    })
}

fn format_property() -> Value {
    json!({
        "type": "string",
        "enum": ["json", "toon", "auto"],
        "description": "Response encoding: 'toon' is a compact tab-delimited table for uniform listings, 'json' is verbose, 'auto' picks based on payload shape (default from config)"
    })
}

fn get_list_resources_schema() -> Value {
    json!({
        "name": "list_resources",
        "description": "List cluster resources of a kind as a compact table of name/namespace/status/created columns",
        "inputSchema": {
            "type": "object",
            "properties": {
                "kind": {
                    "type": "string",
                    "description": "Resource kind, e.g. pods, deployments, services (any kind kubectl accepts)"
                },
                "namespace": {
                    "type": "string",
                    "description": "Kubernetes namespace (optional, defaults to the current context namespace)"
                },
                "selector": {
                    "type": "string",
                    "description": "Label selector, e.g. app=web (optional)"
                },
                "format": format_property()
            },
            "required": ["kind"]
        }
    })
}

fn get_resource_schema() -> Value {
    json!({
        "name": "get_resource",
        "description": "Fetch the full object for a single resource",
        "inputSchema": {
            "type": "object",
            "properties": {
                "kind": {"type": "string", "description": "Resource kind, e.g. pod, deployment"},
                "name": {"type": "string", "description": "Resource name"},
                "namespace": {"type": "string", "description": "Kubernetes namespace (optional)"},
                "format": format_property()
            },
            "required": ["kind", "name"]
        }
    })
}

fn get_logs_schema() -> Value {
    json!({
        "name": "get_logs",
        "description": "Fetch pod logs with severity filtering, grep, and size truncation so large log bodies come back bounded",
        "inputSchema": {
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Pod name"},
                "namespace": {"type": "string", "description": "Kubernetes namespace (optional)"},
                "container": {"type": "string", "description": "Container name for multi-container pods (optional)"},
                "tail": {"type": "integer", "description": "Number of trailing lines to request from the cluster (optional)", "minimum": 1},
                "severity": {
                    "type": "string",
                    "enum": ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"],
                    "description": "Keep only lines at or above this severity (optional)"
                },
                "grep": {"type": "string", "description": "Case-insensitive regex; keep only matching lines (optional)"},
                "max_bytes": {"type": "integer", "description": "Byte cap on the returned text (optional, defaults to config)", "minimum": 1},
                "max_lines": {"type": "integer", "description": "Line cap on the returned text (optional, defaults to config)", "minimum": 1}
            },
            "required": ["name"]
        }
    })
}

fn get_summarize_logs_schema() -> Value {
    json!({
        "name": "summarize_logs",
        "description": "Reduce pod logs to aggregate statistics: severity counts, time range, clustered error patterns, and recent error samples",
        "inputSchema": {
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Pod name"},
                "namespace": {"type": "string", "description": "Kubernetes namespace (optional)"},
                "container": {"type": "string", "description": "Container name (optional)"},
                "tail": {"type": "integer", "description": "Number of trailing lines to summarize (optional)", "minimum": 1},
                "format": format_property()
            },
            "required": ["name"]
        }
    })
}

fn get_top_pods_schema() -> Value {
    json!({
        "name": "top_pods",
        "description": "Current CPU and memory usage per pod",
        "inputSchema": {
            "type": "object",
            "properties": {
                "namespace": {"type": "string", "description": "Kubernetes namespace (optional)"},
                "format": format_property()
            }
        }
    })
}

fn confirmation_properties() -> Value {
    json!({
        "confirmed": {
            "type": "boolean",
            "description": "Must be true to execute a gated mutation (unless dry_run is set)"
        },
        "dry_run": {
            "type": "boolean",
            "description": "Preview the change without applying it; the preview is recorded in the session audit log"
        }
    })
}

fn get_delete_resource_schema() -> Value {
    let mut properties = json!({
        "kind": {"type": "string", "description": "Resource kind, e.g. pod, deployment"},
        "name": {"type": "string", "description": "Resource name"},
        "namespace": {"type": "string", "description": "Kubernetes namespace (optional)"}
    });
    merge_properties(&mut properties, confirmation_properties());
    json!({
        "name": "delete_resource",
        "description": "Delete a resource. Requires confirmed: true unless run as a dry-run.",
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": ["kind", "name"]
        }
    })
}

fn get_scale_deployment_schema() -> Value {
    let mut properties = json!({
        "name": {"type": "string", "description": "Deployment name"},
        "replicas": {"type": "integer", "description": "Desired replica count", "minimum": 0},
        "namespace": {"type": "string", "description": "Kubernetes namespace (optional)"}
    });
    merge_properties(&mut properties, confirmation_properties());
    json!({
        "name": "scale_deployment",
        "description": "Scale a deployment to a replica count. Requires confirmed: true unless run as a dry-run.",
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": ["name", "replicas"]
        }
    })
}

fn get_apply_resource_schema() -> Value {
    let mut properties = json!({
        "manifest": {"type": "string", "description": "Resource manifest as a YAML document"}
    });
    merge_properties(&mut properties, confirmation_properties());
    json!({
        "name": "apply_resource",
        "description": "Create or update a resource from a YAML manifest. Requires confirmed: true unless run as a dry-run. Secret values are redacted before audit logging.",
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": ["manifest"]
        }
    })
}

fn get_status_schema() -> Value {
    json!({
        "name": "get_status",
        "description": "Current safety-gate state: dry-run mode, audit configuration, and ledger size",
        "inputSchema": {"type": "object", "properties": {}}
    })
}

fn get_set_dry_run_schema() -> Value {
    json!({
        "name": "set_dry_run",
        "description": "Toggle global dry-run mode. While enabled, every mutating tool previews instead of executing.",
        "inputSchema": {
            "type": "object",
            "properties": {
                "enabled": {"type": "boolean", "description": "Dry-run mode on or off"}
            },
            "required": ["enabled"]
        }
    })
}

fn get_session_log_schema() -> Value {
    json!({
        "name": "get_session_log",
        "description": "The audit ledger of every mutation attempted this session, in order",
        "inputSchema": {"type": "object", "properties": {}}
    })
}

fn get_stats_schema() -> Value {
    json!({
        "name": "get_stats",
        "description": "Aggregate statistics over the session audit ledger (totals and per-action/per-resource counts)",
        "inputSchema": {"type": "object", "properties": {}}
    })
}

fn get_clear_session_schema() -> Value {
    json!({
        "name": "clear_session",
        "description": "Clear the session audit ledger",
        "inputSchema": {"type": "object", "properties": {}}
    })
}

fn get_configure_audit_schema() -> Value {
    json!({
        "name": "configure_audit",
        "description": "Update audit behavior at runtime; omitted fields keep their current value",
        "inputSchema": {
            "type": "object",
            "properties": {
                "require_confirmation": {"type": "boolean", "description": "Require confirmed: true for delete/update/scale actions"},
                "log_to_console": {"type": "boolean", "description": "Echo each audit entry to the server log"}
            }
        }
    })
}

fn merge_properties(target: &mut Value, extra: Value) {
    if let (Some(target_map), Some(extra_map)) = (target.as_object_mut(), extra.as_object()) {
        for (key, value) in extra_map {
            target_map.insert(key.clone(), value.clone());
        }
    }
}
