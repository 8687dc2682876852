use crate::plugin::types::PluginLogger;
use tracing::{debug, info, warn, error};

/// Routes plugin log lines into `tracing`, prefixed with the plugin id
pub struct TracingPluginLogger {
    plugin_id: String,
}

impl TracingPluginLogger {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    pub fn format_line(&self, message: &str) -> String {
        format!("[{}] {}", self.plugin_id, message)
    }
}

impl PluginLogger for TracingPluginLogger {
    fn debug(&self, message: &str) {
        debug!(plugin = %self.plugin_id, "{}", self.format_line(message));
    }
    fn info(&self, message: &str) {
        info!(plugin = %self.plugin_id, "{}", self.format_line(message));
    }
    fn warn(&self, message: &str) {
        warn!(plugin = %self.plugin_id, "{}", self.format_line(message));
    }
    fn error(&self, message: &str) {
        error!(plugin = %self.plugin_id, "{}", self.format_line(message));
    }
}
