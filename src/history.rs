//! History Compressor (spec §4.6): collapses a cycle log into a short
//! prompt summary fed back to the Vision Client, grounded in the teacher's
//! `agent/executor.rs` report-formatting style adapted to the spec's exact
//! line-count laws (spec §8).

use crate::types::{ActionKind, AgentAction, CycleEntry};

pub const DEFAULT_MAX_DETAILED: usize = 10;

pub struct HistoryCompressor {
    max_detailed: usize,
}

impl Default for HistoryCompressor {
    fn default() -> Self {
        Self {
            max_detailed: DEFAULT_MAX_DETAILED,
        }
    }
}

impl HistoryCompressor {
    pub fn new(max_detailed: usize) -> Self {
        Self {
            max_detailed: max_detailed.max(1),
        }
    }

    /// Produce the compressed history string for `entries`. Empty input
    /// yields the empty string; beyond `max_detailed` entries a one-line
    /// summary of the elided prefix is prepended.
    pub fn compress(&self, entries: &[CycleEntry]) -> String {
        if entries.is_empty() {
            return String::new();
        }

        let mut lines = Vec::new();
        let (earlier, recent) = if entries.len() > self.max_detailed {
            entries.split_at(entries.len() - self.max_detailed)
        } else {
            (&entries[..0], entries)
        };

        if !earlier.is_empty() {
            let succeeded = earlier.iter().filter(|e| e.result.success).count();
            lines.push(format!(
                "[{} earlier actions: {} succeeded, {} failed]",
                earlier.len(),
                succeeded,
                earlier.len() - succeeded
            ));
        }

        for entry in recent {
            let status = match &entry.result.error {
                Some(error) if !entry.result.success => format!("FAILED: {error}"),
                _ if entry.result.success => "OK".to_string(),
                Some(error) => format!("FAILED: {error}"),
                None => "FAILED".to_string(),
            };
            lines.push(format!(
                "{}. {} \u{2192} {}",
                entry.cycle + 1,
                format_action(&entry.action),
                status
            ));
        }

        lines.join("\n")
    }
}

fn format_action(action: &AgentAction) -> String {
    let Some(kind) = action.kind() else {
        return serde_json::to_string(action).unwrap_or_else(|_| action.name.clone());
    };

    match kind {
        ActionKind::Click | ActionKind::Hover => format_ref_or_coords(kind.as_str(), action),
        ActionKind::Type => {
            let text = action.get_str("text").unwrap_or_default();
            format!("type(\"{}\")", truncate(text, 20))
        }
        ActionKind::Scroll => {
            let direction = action.get_str("direction").unwrap_or("down");
            let amount = action.get_f64("amount").unwrap_or(300.0);
            format!("scroll({direction}, {amount})")
        }
        ActionKind::Navigate => {
            let url = action.get_str("url").unwrap_or("");
            format!("navigate({url})")
        }
        ActionKind::Keyboard => {
            let key = action.get_str("key").unwrap_or("");
            format!("keyboard({key})")
        }
        ActionKind::Wait => {
            let ms = action.get_f64("ms").unwrap_or(1000.0);
            format!("wait({ms}ms)")
        }
        ActionKind::Select => {
            let ref_ = action.get_str("ref").unwrap_or("?");
            let value = action.get_str("value").unwrap_or("");
            format!("select(ref={ref_}, value={value})")
        }
        ActionKind::Done => "done".to_string(),
        ActionKind::Fail => {
            let reason = action.get_str("reason").unwrap_or("");
            format!("fail({reason})")
        }
    }
}

fn format_ref_or_coords(name: &str, action: &AgentAction) -> String {
    if let Some(ref_) = action.get_str("ref") {
        format!("{name}(ref={ref_})")
    } else if let (Some(x), Some(y)) = (action.get_f64("x"), action.get_f64("y")) {
        format!("{name}({x}, {y})")
    } else {
        format!("{name}()")
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(max_chars).collect();
        truncated.push_str("...");
        truncated
    }
}
