//! Core data model (spec §3): console log entries, recording state, cycle
//! entries, budget state, loop results and the agent action vocabulary.
//!
//! Field names use natural Rust casing in memory; the snake_case on-disk
//! representation is produced at the persistence boundary in
//! [`crate::audit`], the way the teacher flattens its in-memory structs to
//! JSON only at the storage edge (`crates/soulbrowser-kernel/src/sessions/service.rs`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Console log level, folded from the CDP `Runtime.consoleAPICalled` /
/// `Runtime.exceptionThrown` event vocabulary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLogLevel {
    Log,
    Warn,
    Error,
    Info,
    Debug,
    Trace,
}

impl ConsoleLogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsoleLogLevel::Log => "log",
            ConsoleLogLevel::Warn => "warn",
            ConsoleLogLevel::Error => "error",
            ConsoleLogLevel::Info => "info",
            ConsoleLogLevel::Debug => "debug",
            ConsoleLogLevel::Trace => "trace",
        }
    }
}

/// Immutable per-page console record (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsoleLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ConsoleLogLevel,
    pub text: String,
    pub source_url: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Recording configuration (spec §3, defaults as specified).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
    pub every_nth_frame: u32,
    pub capture_console_logs: bool,
    pub extract_key_frames: bool,
    pub key_frame_count: u32,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 720,
            quality: 80,
            every_nth_frame: 1,
            capture_console_logs: true,
            extract_key_frames: true,
            key_frame_count: 5,
        }
    }
}

impl RecordingOptions {
    /// Clamp user-supplied values into the ranges spec §3 requires.
    pub fn normalized(mut self) -> Self {
        self.quality = self.quality.min(100);
        if self.every_nth_frame == 0 {
            self.every_nth_frame = 1;
        }
        if self.key_frame_count == 0 {
            self.key_frame_count = 1;
        }
        self
    }
}

/// Per-page recording state machine data (spec §3, §4.7).
#[derive(Clone, Debug, Default)]
pub struct RecordingState {
    pub is_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub frame_count: u64,
    pub frames: Vec<Vec<u8>>,
    pub options: RecordingOptions,
    pub output_path: Option<PathBuf>,
    /// Console-log sequence offset captured at `start`, used to slice logs
    /// that fell within the recording window at `stop`.
    pub recording_start_index: usize,
}

impl RecordingState {
    pub fn start(options: RecordingOptions, console_log_len: usize) -> Self {
        Self {
            is_active: true,
            started_at: Some(Utc::now()),
            frame_count: 0,
            frames: Vec::new(),
            options,
            output_path: None,
            recording_start_index: console_log_len,
        }
    }

    pub fn push_frame(&mut self, jpeg: Vec<u8>) {
        self.frames.push(jpeg);
        self.frame_count = self.frames.len() as u64;
    }
}

/// Token usage reported for one cycle.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Outcome of executing one action against a page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// One perception-loop iteration record (spec §3). Written exactly once per
/// cycle by the Audit Logger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleEntry {
    pub cycle: u32,
    pub timestamp: DateTime<Utc>,
    pub page_url: String,
    pub frame_path: PathBuf,
    pub action: AgentAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub result: ActionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    pub duration_ms: u64,
}

/// The closed vocabulary of agent actions (spec §3, §9: "the action
/// vocabulary is closed ... should be expressed as an enum"). `kind` is
/// serialized as `name` and `input` carries the kind-specific arguments as
/// a JSON object, matching the Vision Client's tool-use wire shape.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    Scroll,
    Navigate,
    Keyboard,
    Wait,
    Hover,
    Select,
    Done,
    Fail,
}

impl ActionKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionKind::Done | ActionKind::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Scroll => "scroll",
            ActionKind::Navigate => "navigate",
            ActionKind::Keyboard => "keyboard",
            ActionKind::Wait => "wait",
            ActionKind::Hover => "hover",
            ActionKind::Select => "select",
            ActionKind::Done => "done",
            ActionKind::Fail => "fail",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "click" => ActionKind::Click,
            "type" => ActionKind::Type,
            "scroll" => ActionKind::Scroll,
            "navigate" => ActionKind::Navigate,
            "keyboard" => ActionKind::Keyboard,
            "wait" => ActionKind::Wait,
            "hover" => ActionKind::Hover,
            "select" => ActionKind::Select,
            "done" => ActionKind::Done,
            "fail" => ActionKind::Fail,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentAction {
    pub name: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl AgentAction {
    pub fn new(kind: ActionKind, input: Map<String, Value>) -> Self {
        Self {
            name: kind.as_str().to_string(),
            input,
        }
    }

    pub fn kind(&self) -> Option<ActionKind> {
        ActionKind::parse(&self.name)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.input.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.input.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.input.get(key).and_then(Value::as_bool)
    }
}

/// Outcome of a completed (or terminated) Perception Loop run (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopResult {
    pub success: bool,
    pub summary: String,
    pub total_cycles: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<Value>,
}
