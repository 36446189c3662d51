//! Import run log with `%time%`, `%elapsed%` and `%memory%` placeholders

use std::time::Instant;

use chrono::Utc;
use tracing::Level;
use uuid::Uuid;

/// Emits `[CsvImport]` messages for one run through `tracing`
pub struct ImportLog {
    import_id: Uuid,
    started: Instant,
}

impl ImportLog {
    pub fn new(import_id: Uuid) -> Self {
        Self {
            import_id,
            started: Instant::now(),
        }
    }

    pub fn log(&self, level: Level, template: &str) {
        let message = self.render(template);
        let import_id = self.import_id;
        match level {
            Level::ERROR => tracing::error!(import_id = %import_id, "[CsvImport] {}", message),
            Level::WARN => tracing::warn!(import_id = %import_id, "[CsvImport] {}", message),
            Level::INFO => tracing::info!(import_id = %import_id, "[CsvImport] {}", message),
            Level::DEBUG => tracing::debug!(import_id = %import_id, "[CsvImport] {}", message),
            _ => tracing::trace!(import_id = %import_id, "[CsvImport] {}", message),
        }
    }

    pub fn info(&self, template: &str) {
        self.log(Level::INFO, template);
    }

    pub fn warn(&self, template: &str) {
        self.log(Level::WARN, template);
    }

    pub fn debug(&self, template: &str) {
        self.log(Level::DEBUG, template);
    }

    pub fn error(&self, template: &str) {
        self.log(Level::ERROR, template);
    }

    /// Expand placeholders; templates without them are returned untouched
    pub fn render(&self, template: &str) -> String {
        let mut message = template.to_string();
        if message.contains("%time%") {
            message = message.replace("%time%", &Utc::now().to_rfc3339());
        }
        if message.contains("%elapsed%") {
            let elapsed = format!("{:.3}s", self.started.elapsed().as_secs_f64());
            message = message.replace("%elapsed%", &elapsed);
        }
        if message.contains("%memory%") {
            let memory = memory_usage()
                .map(|bytes| format!("{} bytes", bytes))
                .unwrap_or_else(|| "n/a".to_string());
            message = message.replace("%memory%", &memory);
        }
        message
    }
}

/// Resident memory of this process in bytes
fn memory_usage() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(rss) = content.split_whitespace().nth(1) {
                if let Ok(pages) = rss.parse::<u64>() {
                    return Some(pages * 4096);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_leaves_plain_text() {
        let log = ImportLog::new(Uuid::nil());
        assert_eq!(log.render("Finished batch"), "Finished batch");
    }

    #[test]
    fn test_render_replaces_time_and_elapsed() {
        let log = ImportLog::new(Uuid::nil());
        let message = log.render("Started at %time% after %elapsed%");
        assert!(!message.contains("%time%"));
        assert!(!message.contains("%elapsed%"));
        assert!(message.ends_with('s'));
    }

    #[test]
    fn test_render_replaces_memory() {
        let log = ImportLog::new(Uuid::nil());
        let message = log.render("Memory usage: %memory%");
        assert!(!message.contains("%memory%"));
        assert!(message.ends_with("bytes") || message.ends_with("n/a"));
    }
}
