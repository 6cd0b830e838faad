//! Audit Logger (spec §4.3): per-task JSONL cycle log, frame persistence
//! and a terminal summary file. Writes are synchronous and best-effort —
//! failures surface to the caller rather than being swallowed, matching the
//! teacher's direct `std::fs` use in `crates/soulbrowser-kernel/src/sessions/service.rs`.

use crate::budget::BudgetState;
use crate::error::{StudioError, StudioResult};
use crate::types::{CycleEntry, LoopResult};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct BudgetRemainingRecord {
    cycles: u32,
    tokens: u64,
}

#[derive(Serialize)]
struct CycleRecord {
    cycle: u32,
    timestamp: chrono::DateTime<Utc>,
    page_url: String,
    frame_path: PathBuf,
    action: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
    result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens: Option<Value>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    budget_remaining: Option<BudgetRemainingRecord>,
}

pub struct AuditLogger {
    task_dir: PathBuf,
    frames_dir: PathBuf,
}

impl AuditLogger {
    /// Creates `<out_dir>/<task_id>/frames/`.
    pub fn new(out_dir: impl AsRef<Path>, task_id: &str) -> StudioResult<Self> {
        let task_dir = out_dir.as_ref().join(task_id);
        let frames_dir = task_dir.join("frames");
        fs::create_dir_all(&frames_dir)?;
        Ok(Self { task_dir, frames_dir })
    }

    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    /// Appends one line-delimited JSON record to `cycles.jsonl`.
    pub fn log_cycle(&self, entry: &CycleEntry, budget_state: Option<&BudgetState>) -> StudioResult<()> {
        let record = CycleRecord {
            cycle: entry.cycle,
            timestamp: entry.timestamp,
            page_url: entry.page_url.clone(),
            frame_path: entry.frame_path.clone(),
            action: json!({"name": entry.action.name, "input": entry.action.input}),
            reasoning: entry.reasoning.clone(),
            result: json!({"success": entry.result.success, "error": entry.result.error}),
            tokens: entry.tokens.map(|t| json!({"input": t.input, "output": t.output})),
            duration_ms: entry.duration_ms,
            budget_remaining: budget_state.map(|state| {
                let remaining = state.remaining();
                BudgetRemainingRecord {
                    cycles: remaining.cycles,
                    tokens: remaining.tokens,
                }
            }),
        };

        let line = serde_json::to_string(&record)?;
        let path = self.task_dir.join("cycles.jsonl");
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Writes `frames/cycle-<n>.jpg`, overwriting any existing file.
    pub fn save_frame(&self, cycle_index: u32, jpeg_bytes: &[u8]) -> StudioResult<PathBuf> {
        let path = self.frames_dir.join(format!("cycle-{cycle_index}.jpg"));
        fs::write(&path, jpeg_bytes)?;
        Ok(path)
    }

    /// Writes `summary.json` with the result block, budget block and
    /// completion timestamp.
    pub fn save_summary(&self, result: &LoopResult, budget_state: &BudgetState) -> StudioResult<()> {
        let remaining = budget_state.remaining();
        let summary = json!({
            "result": {
                "success": result.success,
                "summary": result.summary,
                "total_cycles": result.total_cycles,
                "extracted_data": result.extracted_data,
            },
            "budget": {
                "cycles": budget_state.cycles,
                "input_tokens": budget_state.input_tokens,
                "output_tokens": budget_state.output_tokens,
                "elapsed_ms": budget_state.elapsed_ms,
                "cost_usd": budget_state.cost_usd,
                "remaining": {
                    "cycles": remaining.cycles,
                    "tokens": remaining.tokens,
                },
            },
            "completed_at": Utc::now(),
        });

        let path = self.task_dir.join("summary.json");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(StudioError::from)?;
        serde_json::to_writer_pretty(file, &summary)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetLimits;
    use crate::types::{ActionResult, AgentAction, TokenUsage};
    use tempfile::tempdir;

    fn sample_entry(cycle: u32) -> CycleEntry {
        CycleEntry {
            cycle,
            timestamp: Utc::now(),
            page_url: "https://example.com".to_string(),
            frame_path: PathBuf::from(format!("frames/cycle-{cycle}.jpg")),
            action: AgentAction::new(crate::types::ActionKind::Wait, Default::default()),
            reasoning: Some("waiting for page".to_string()),
            result: ActionResult::ok(),
            tokens: Some(TokenUsage { input: 10, output: 5 }),
            duration_ms: 42,
        }
    }

    #[test]
    fn creates_frames_directory_on_construction() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path(), "perception-1").unwrap();
        assert!(logger.task_dir().join("frames").is_dir());
    }

    #[test]
    fn log_cycle_appends_jsonl_lines() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path(), "perception-2").unwrap();
        logger.log_cycle(&sample_entry(0), None).unwrap();
        logger.log_cycle(&sample_entry(1), None).unwrap();

        let contents = fs::read_to_string(logger.task_dir().join("cycles.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let first: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first["cycle"], 0);
        assert_eq!(first["page_url"], "https://example.com");
    }

    #[test]
    fn save_frame_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path(), "perception-3").unwrap();
        let path = logger.save_frame(0, b"first").unwrap();
        logger.save_frame(0, b"second").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"second");
    }

    #[test]
    fn save_summary_writes_result_and_budget_blocks() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(dir.path(), "perception-4").unwrap();
        let result = LoopResult {
            success: true,
            summary: "done".to_string(),
            total_cycles: 3,
            extracted_data: None,
        };
        let controller = crate::budget::BudgetController::new(BudgetLimits::default());
        logger.save_summary(&result, &controller.snapshot()).unwrap();

        let contents = fs::read_to_string(logger.task_dir().join("summary.json")).unwrap();
        let value: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["result"]["summary"], "done");
        assert!(value["budget"]["remaining"]["cycles"].is_number());
        assert!(value["completed_at"].is_string());
    }
}
