//! Kubernetes MCP server library.
//!
//! Exposes cluster-management operations to an AI agent over the Model
//! Context Protocol. The interesting layer sits between raw cluster
//! responses and the agent-facing channel: log filtering and summarization
//! ([`logs`]), adaptive output encoding ([`format`]), and a mutation safety
//! gate with dry-run previews and an audit ledger ([`safety`]).

pub mod config;
pub mod format;
pub mod kubectl;
pub mod logs;
pub mod safety;
pub mod server;
pub mod tools;
