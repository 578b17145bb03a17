use batchdesk::{NotificationSink, Severity};

/// Prints notifications to stderr, one line each.
pub struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn show(&self, message: &str, severity: Severity) {
        let tag = match severity {
            Severity::Success => "ok",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        eprintln!("[{}] {}", tag, message);
    }
}
