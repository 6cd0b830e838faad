//! Console Capture (spec §4.7): normalizes CDP `Runtime.consoleAPICalled`
//! and `Runtime.exceptionThrown` events into [`ConsoleLogEntry`] records.
//!
//! The CDP subscription plumbing itself lives behind [`crate::cdp`]'s named
//! interfaces; this module only owns the normalization rules, which is
//! where the spec's testable behavior lives. Grounded in the teacher's
//! `console_fixture.rs` preference for explicit, field-by-field fallback
//! over a generic deserializer.

use crate::metrics;
use crate::types::{ConsoleLogEntry, ConsoleLogLevel};
use chrono::Utc;
use serde_json::Value;

/// One CDP `Runtime.RemoteObject`-shaped argument.
fn stringify_remote_object(arg: &Value) -> String {
    if let Some(value) = arg.get("value") {
        if let Some(s) = value.as_str() {
            return s.to_string();
        }
        if !value.is_null() {
            return value.to_string();
        }
    }
    if let Some(description) = arg.get("description").and_then(Value::as_str) {
        return description.to_string();
    }
    if let Some(preview) = arg.get("preview").and_then(|p| p.get("description")).and_then(Value::as_str) {
        return preview.to_string();
    }
    if let Some(type_name) = arg.get("type").and_then(Value::as_str) {
        return format!("<{type_name}>");
    }
    "undefined".to_string()
}

fn map_level(console_type: &str) -> ConsoleLogLevel {
    match console_type {
        "warning" => ConsoleLogLevel::Warn,
        "error" => ConsoleLogLevel::Error,
        "info" => ConsoleLogLevel::Info,
        "debug" => ConsoleLogLevel::Debug,
        "trace" => ConsoleLogLevel::Trace,
        _ => ConsoleLogLevel::Log,
    }
}

/// Normalizes a `Runtime.consoleAPICalled` event payload.
pub fn normalize_console_api_call(event: &Value) -> ConsoleLogEntry {
    let console_type = event.get("type").and_then(Value::as_str).unwrap_or("log");
    let args = event.get("args").and_then(Value::as_array).cloned().unwrap_or_default();
    let text = args
        .iter()
        .map(stringify_remote_object)
        .collect::<Vec<_>>()
        .join(" ");

    let frame = event
        .get("stackTrace")
        .and_then(|stack| stack.get("callFrames"))
        .and_then(Value::as_array)
        .and_then(|frames| frames.first());

    let level = map_level(console_type);
    metrics::console_event(level.as_str());

    ConsoleLogEntry {
        timestamp: Utc::now(),
        level,
        text,
        source_url: frame.and_then(|f| f.get("url")).and_then(Value::as_str).map(str::to_string),
        line: frame.and_then(|f| f.get("lineNumber")).and_then(Value::as_u64).map(|n| n as u32),
        column: frame.and_then(|f| f.get("columnNumber")).and_then(Value::as_u64).map(|n| n as u32),
    }
}

/// Normalizes a `Runtime.exceptionThrown` event payload. Always recorded at
/// level `error`.
pub fn normalize_exception_thrown(event: &Value) -> ConsoleLogEntry {
    let details = event.get("exceptionDetails").cloned().unwrap_or(Value::Null);
    let exception = details.get("exception");

    let text = exception
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| details.get("text").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "uncaught exception".to_string());

    metrics::console_event(ConsoleLogLevel::Error.as_str());

    ConsoleLogEntry {
        timestamp: Utc::now(),
        level: ConsoleLogLevel::Error,
        text,
        source_url: details.get("url").and_then(Value::as_str).map(str::to_string),
        line: details.get("lineNumber").and_then(Value::as_u64).map(|n| n as u32),
        column: details.get("columnNumber").and_then(Value::as_u64).map(|n| n as u32),
    }
}
