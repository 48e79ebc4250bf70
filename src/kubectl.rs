//! Cluster collaborator: the boundary between this server and the cluster.
//!
//! All cluster communication is delegated to the `kubectl` binary; this
//! module builds arguments, runs the command, and reshapes output. No
//! retries, no backoff — a failed command surfaces its stderr as the error.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::debug;

/// Operations the tool layer needs from the cluster. Implemented by
/// [`KubectlClient`] in production and by in-memory fakes in tests.
pub trait ClusterClient: Send + Sync {
    /// List resources of a kind, reduced to flat records (see
    /// [`flatten_resource_list`]).
    fn list_resources(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Value>;

    /// Full object for one resource.
    fn get_resource(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<Value>;

    /// Raw log text for one pod.
    fn pod_logs(
        &self,
        name: &str,
        namespace: Option<&str>,
        container: Option<&str>,
        tail: Option<u64>,
    ) -> Result<String>;

    /// Current CPU/memory usage per pod, as flat records.
    fn top_pods(&self, namespace: Option<&str>) -> Result<Value>;

    fn delete_resource(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<()>;

    fn scale_resource(
        &self,
        kind: &str,
        name: &str,
        replicas: u64,
        namespace: Option<&str>,
    ) -> Result<Value>;

    /// Apply a YAML manifest; returns the names kubectl reports.
    fn apply_manifest(&self, manifest_yaml: &str) -> Result<String>;
}

/// Locate a binary in the common installation paths, falling back to PATH.
fn find_command(name: &str) -> String {
    let common_paths = [
        format!("/opt/homebrew/bin/{name}"),
        format!("/usr/local/bin/{name}"),
        format!("/usr/bin/{name}"),
        name.to_string(),
    ];

    for path in &common_paths {
        if std::path::Path::new(path).exists() {
            return path.clone();
        }
    }

    name.to_string()
}

/// Argument list for a `kubectl get ... -o json` listing. Pure, so tests can
/// check flag assembly without executing anything.
#[must_use]
pub fn list_args(kind: &str, namespace: Option<&str>, selector: Option<&str>) -> Vec<String> {
    let mut args = vec!["get".to_string(), kind.to_string()];
    if let Some(ns) = namespace {
        args.push("-n".to_string());
        args.push(ns.to_string());
    }
    if let Some(sel) = selector {
        args.push("-l".to_string());
        args.push(sel.to_string());
    }
    args.push("-o".to_string());
    args.push("json".to_string());
    args
}

/// Argument list for fetching pod logs.
#[must_use]
pub fn logs_args(
    name: &str,
    namespace: Option<&str>,
    container: Option<&str>,
    tail: Option<u64>,
) -> Vec<String> {
    let mut args = vec!["logs".to_string(), name.to_string()];
    if let Some(ns) = namespace {
        args.push("-n".to_string());
        args.push(ns.to_string());
    }
    if let Some(c) = container {
        args.push("-c".to_string());
        args.push(c.to_string());
    }
    if let Some(tail) = tail {
        args.push(format!("--tail={tail}"));
    }
    args
}

/// Reduce a `kubectl get -o json` list to one flat record per item, so
/// listings are shaped for the compact tabular encoding. Every record
/// carries the same keys with only primitive values.
#[must_use]
pub fn flatten_resource_list(list: &Value) -> Value {
    let items = list
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let records: Vec<Value> = items
        .iter()
        .map(|item| {
            let name = item
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let namespace = item
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let created = item
                .pointer("/metadata/creationTimestamp")
                .and_then(Value::as_str)
                .unwrap_or_default();
            json!({
                "name": name,
                "namespace": namespace,
                "status": derive_status(item),
                "created": created,
            })
        })
        .collect();

    Value::Array(records)
}

/// One status column per item: pod phase when present, ready/desired
/// replica counts for workload kinds, empty otherwise.
fn derive_status(item: &Value) -> String {
    if let Some(phase) = item.pointer("/status/phase").and_then(Value::as_str) {
        return phase.to_string();
    }
    if let Some(desired) = item.pointer("/spec/replicas").and_then(Value::as_u64) {
        let ready = item
            .pointer("/status/readyReplicas")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        return format!("{ready}/{desired}");
    }
    String::new()
}

/// Parse `kubectl top pod --no-headers` output into flat records.
#[must_use]
pub fn parse_top_output(output: &str) -> Value {
    let records: Vec<Value> = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let cpu = fields.next()?;
            let memory = fields.next()?;
            Some(json!({"name": name, "cpu": cpu, "memory": memory}))
        })
        .collect();
    Value::Array(records)
}

/// Cluster client that shells out to `kubectl`.
pub struct KubectlClient {
    kubectl: String,
}

impl KubectlClient {
    #[must_use]
    pub fn new() -> Self {
        KubectlClient {
            kubectl: find_command("kubectl"),
        }
    }

    fn run(&self, args: &[String]) -> Result<String> {
        debug!("kubectl {}", args.join(" "));
        let output = Command::new(&self.kubectl)
            .args(args)
            .output()
            .context("Failed to execute kubectl")?;

        if output.status.success() {
            Ok(String::from_utf8(output.stdout)?.trim_end().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(anyhow!("kubectl command failed: {}", stderr.trim()))
        }
    }

    fn run_json(&self, args: &[String]) -> Result<Value> {
        let stdout = self.run(args)?;
        serde_json::from_str(&stdout).context("Failed to parse kubectl JSON output")
    }
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterClient for KubectlClient {
    fn list_resources(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Value> {
        let list = self.run_json(&list_args(kind, namespace, selector))?;
        Ok(flatten_resource_list(&list))
    }

    fn get_resource(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<Value> {
        let mut args = vec!["get".to_string(), kind.to_string(), name.to_string()];
        if let Some(ns) = namespace {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        args.push("-o".to_string());
        args.push("json".to_string());
        self.run_json(&args)
    }

    fn pod_logs(
        &self,
        name: &str,
        namespace: Option<&str>,
        container: Option<&str>,
        tail: Option<u64>,
    ) -> Result<String> {
        self.run(&logs_args(name, namespace, container, tail))
    }

    fn top_pods(&self, namespace: Option<&str>) -> Result<Value> {
        let mut args = vec!["top".to_string(), "pod".to_string(), "--no-headers".to_string()];
        if let Some(ns) = namespace {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        let output = self.run(&args)?;
        Ok(parse_top_output(&output))
    }

    fn delete_resource(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<()> {
        let mut args = vec!["delete".to_string(), kind.to_string(), name.to_string()];
        if let Some(ns) = namespace {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        self.run(&args)?;
        Ok(())
    }

    fn scale_resource(
        &self,
        kind: &str,
        name: &str,
        replicas: u64,
        namespace: Option<&str>,
    ) -> Result<Value> {
        let mut args = vec![
            "scale".to_string(),
            format!("{kind}/{name}"),
            format!("--replicas={replicas}"),
        ];
        if let Some(ns) = namespace {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        self.run(&args)?;
        Ok(json!({"scaled": format!("{kind}/{name}"), "replicas": replicas}))
    }

    fn apply_manifest(&self, manifest_yaml: &str) -> Result<String> {
        // Validate before handing anything to kubectl.
        serde_yaml::from_str::<serde_yaml::Value>(manifest_yaml)
            .context("Manifest is not valid YAML")?;

        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(manifest_yaml.as_bytes())?;
        temp_file.flush()?;

        let path = temp_file
            .path()
            .to_str()
            .ok_or_else(|| anyhow!("Temp file path is not valid UTF-8"))?;
        self.run(&[
            "apply".to_string(),
            "-f".to_string(),
            path.to_string(),
            "-o".to_string(),
            "name".to_string(),
        ])
    }
}
