//! Server configuration loaded from `kubeops-config.json`.
//!
//! Every field has a default, so a missing config file starts the server
//! with stock behavior; a malformed one is fatal.

use crate::safety::AuditConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Default line cap applied to log retrieval when the caller gives none.
    pub max_log_lines: usize,
    /// Default byte cap applied to log retrieval when the caller gives none.
    pub max_log_bytes: usize,
    /// Optional default severity floor (`ERROR`..`TRACE`).
    pub default_severity: Option<String>,
    /// Default response format preference: `json`, `toon`, or `auto`.
    pub response_format: String,
    /// Start with global dry-run mode enabled.
    pub dry_run_default: bool,
    pub audit: AuditConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_log_lines: 500,
            max_log_bytes: 50 * 1024,
            default_severity: None,
            response_format: "auto".to_string(),
            dry_run_default: false,
            audit: AuditConfig::default(),
        }
    }
}

/// Load configuration from `kubeops-config.json`, looking in the current
/// directory then its parent.
pub fn load_config() -> Result<ServerConfig> {
    let config_paths = [
        PathBuf::from("kubeops-config.json"),
        PathBuf::from("../kubeops-config.json"),
    ];

    for config_path in config_paths {
        if config_path.exists() {
            let config_content = std::fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            let config: ServerConfig = serde_json::from_str(&config_content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?;

            info!("loaded configuration from {}", config_path.display());
            return Ok(config);
        }
    }

    info!("no kubeops-config.json found, using defaults");
    Ok(ServerConfig::default())
}
