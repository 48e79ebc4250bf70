//! Log processing: severity classification, filtering, and summarization.

pub mod filter;
pub mod severity;
pub mod summary;

pub use filter::{filter_by_severity, grep_logs, process_logs, truncate_logs, FilterSpec, LogError, Truncation};
pub use severity::{classify_line, Severity};
pub use summary::{summarize_logs, LogSummary};
