//! Perception Loop (spec §4.5): the cycle driver combining the Frame
//! Sampler, Budget Controller, Audit Logger, Action Executor, History
//! Compressor, Vision Client and safety policy against a page.
//!
//! Grounded in the teacher's `crates/soulbrowser-kernel/src/agent/agent_loop_executor.rs`
//! `execute_agent_loop` observe→think→act shape, with the scheduler/tool
//! dispatcher replaced by the concrete Action Executor and the agent-core
//! plan/step types replaced by the spec's closed action vocabulary.

use crate::audit::AuditLogger;
use crate::budget::{BudgetController, BudgetLimits};
use crate::cdp::{AccessibilityTree, LoadState, PageHandle, RefResolver};
use crate::error::StudioError;
use crate::executor::ActionExecutor;
use crate::history::HistoryCompressor;
use crate::registry::PageRegistry;
use crate::safety::SafetyPolicy;
use crate::sampler::{FrameSampler, FrameSamplerConfig};
use crate::types::{ActionResult, AgentAction, CycleEntry, LoopResult};
use crate::vision::{AnalyzeFrameInput, VisionClient};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEFAULT_MAX_CYCLES: u32 = 50;
const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;
const DEFAULT_SETTLE_MS: u64 = 300;
const DEFAULT_ARIA_CHAR_CAP: usize = 40_000;
const DEFAULT_VIEWPORT: (u32, u32) = (1024, 768);
const DEFAULT_JPEG_QUALITY: u8 = 70;
const RECOVERY_LOAD_TIMEOUT_MS: u64 = 10_000;
const NETWORK_IDLE_TIMEOUT_MS: u64 = 10_000;
const STUCK_WINDOW: usize = 3;

#[derive(Clone, Debug)]
pub struct PerceptionLoopConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub jpeg_quality: u8,
    pub max_cycles: u32,
    pub max_consecutive_errors: u32,
    pub settle_time_ms: u64,
    pub aria_char_cap: usize,
    pub audit_dir: std::path::PathBuf,
    pub budget_limits: BudgetLimits,
    pub sampler_config: FrameSamplerConfig,
}

impl Default for PerceptionLoopConfig {
    fn default() -> Self {
        Self {
            viewport_width: DEFAULT_VIEWPORT.0,
            viewport_height: DEFAULT_VIEWPORT.1,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_cycles: DEFAULT_MAX_CYCLES,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            settle_time_ms: DEFAULT_SETTLE_MS,
            aria_char_cap: DEFAULT_ARIA_CHAR_CAP,
            audit_dir: std::path::PathBuf::from("./recordings"),
            budget_limits: BudgetLimits::default(),
            sampler_config: FrameSamplerConfig::default(),
        }
    }
}

pub struct PerceptionLoop {
    config: PerceptionLoopConfig,
    safety: SafetyPolicy,
}

impl PerceptionLoop {
    pub fn new(config: PerceptionLoopConfig, safety: SafetyPolicy) -> Self {
        Self { config, safety }
    }

    /// Runs the capture→reason→act cycle against the page named
    /// `page_name` until a terminal action, a budget denial, or
    /// `max_cycles` is reached. The page handle is acquired from `client`
    /// at the start and, on a "Target closed"/"Target page" failure,
    /// **re-acquired from `client` by the same name** rather than retried
    /// on a stale handle (spec §4.5 step b, §8 boundary scenario 3).
    pub async fn run(
        &self,
        client: &PageRegistry,
        page_name: &str,
        ref_resolver: &dyn RefResolver,
        aria_tree: &dyn AccessibilityTree,
        vision_client: &dyn VisionClient,
        task: &str,
    ) -> crate::error::StudioResult<LoopResult> {
        let task_id = format!("perception-{}", unix_millis());
        let audit = AuditLogger::new(&self.config.audit_dir, &task_id)?;

        let entry = client
            .get(page_name)
            .ok_or_else(|| StudioError::not_found(format!("page '{page_name}' not found")))?;
        let mut page: Arc<dyn PageHandle> = entry.page.clone();
        let _ = page.accept_dialogs().await;

        let mut sampler = FrameSampler::new(self.config.sampler_config);
        let mut budget = BudgetController::new(self.config.budget_limits);
        let history = HistoryCompressor::default();

        let mut entries: Vec<CycleEntry> = Vec::new();
        let mut consecutive_errors: u32 = 0;

        for cycle in 0..self.config.max_cycles {
            let decision = budget.can_proceed();
            if !decision.allowed {
                let result = LoopResult {
                    success: false,
                    summary: decision.reason.unwrap_or_else(|| "budget exceeded".to_string()),
                    total_cycles: cycle,
                    extracted_data: None,
                };
                audit.save_summary(&result, &budget.snapshot())?;
                return Ok(result);
            }

            let cycle_started = Instant::now();
            match self
                .run_cycle(
                    cycle,
                    client,
                    page_name,
                    &mut page,
                    ref_resolver,
                    aria_tree,
                    vision_client,
                    &audit,
                    &mut sampler,
                    &mut budget,
                    &history,
                    &entries,
                    task,
                )
                .await
            {
                Ok(CycleOutcome::Continue(entry)) => {
                    let failed = !entry.result.success;
                    entries.push(entry);
                    if failed {
                        consecutive_errors += 1;
                        if consecutive_errors >= self.config.max_consecutive_errors {
                            let result = LoopResult {
                                success: false,
                                summary: format!(
                                    "Too many consecutive errors ({consecutive_errors})"
                                ),
                                total_cycles: cycle + 1,
                                extracted_data: None,
                            };
                            audit.save_summary(&result, &budget.snapshot())?;
                            return Ok(result);
                        }
                    } else {
                        consecutive_errors = 0;
                    }
                    metrics_observe_cycle(cycle_started, "continue");
                }
                Ok(CycleOutcome::Finished(result)) => {
                    audit.save_summary(&result, &budget.snapshot())?;
                    metrics_observe_cycle(cycle_started, "finished");
                    return Ok(result);
                }
                Err(err) => {
                    warn!(?err, cycle, "unexpected error during perception cycle");
                    consecutive_errors += 1;
                    metrics_observe_cycle(cycle_started, "error");
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        let result = LoopResult {
                            success: false,
                            summary: format!("Too many consecutive errors ({consecutive_errors})"),
                            total_cycles: cycle + 1,
                            extracted_data: None,
                        };
                        audit.save_summary(&result, &budget.snapshot())?;
                        return Ok(result);
                    }
                }
            }
        }

        let result = LoopResult {
            success: false,
            summary: format!("Max cycles reached ({})", self.config.max_cycles),
            total_cycles: self.config.max_cycles,
            extracted_data: None,
        };
        audit.save_summary(&result, &budget.snapshot())?;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_cycle(
        &self,
        cycle: u32,
        client: &PageRegistry,
        page_name: &str,
        page: &mut Arc<dyn PageHandle>,
        ref_resolver: &dyn RefResolver,
        aria_tree: &dyn AccessibilityTree,
        vision_client: &dyn VisionClient,
        audit: &AuditLogger,
        sampler: &mut FrameSampler,
        budget: &mut BudgetController,
        history: &HistoryCompressor,
        entries: &[CycleEntry],
        task: &str,
    ) -> crate::error::StudioResult<CycleOutcome> {
        let started = Instant::now();

        let frame = match self.capture_with_recovery(client, page_name, page, sampler).await {
            Ok(frame) => frame,
            Err(err) => {
                let entry = CycleEntry {
                    cycle,
                    timestamp: chrono::Utc::now(),
                    page_url: String::new(),
                    frame_path: std::path::PathBuf::new(),
                    action: AgentAction {
                        name: "error".to_string(),
                        input: Default::default(),
                    },
                    reasoning: None,
                    result: ActionResult::fail(err.to_string()),
                    tokens: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                audit.log_cycle(&entry, Some(&budget.snapshot()))?;
                return Ok(CycleOutcome::Continue(entry));
            }
        };

        let _ = sampler.has_changed(&frame);
        let frame_path = audit.save_frame(cycle, &frame)?;

        let aria_snapshot = match aria_tree.snapshot().await {
            Ok(snapshot) => truncate_aria(&snapshot, self.config.aria_char_cap),
            Err(_) => "(ARIA snapshot unavailable)".to_string(),
        };

        let compressed_history = history.compress(entries);

        let mut effective_task = task.to_string();
        if is_stuck(entries) {
            effective_task.push_str(
                "\n\nWarning: the last few actions were identical and made no apparent \
                 progress. Try a different approach.",
            );
        }

        let page_url = page.current_url().await.unwrap_or_default();
        let frame_base64 = BASE64.encode(&frame);

        let analysis = vision_client
            .analyze_frame(AnalyzeFrameInput {
                frame_base64: &frame_base64,
                aria_snapshot: &aria_snapshot,
                history: &compressed_history,
                task: &effective_task,
            })
            .await?;

        budget.on_cycle_complete(analysis.tokens);

        let decision = self.safety.evaluate(&analysis.action);
        if let crate::safety::SafetyDecision::Denied { reason } = decision {
            let entry = CycleEntry {
                cycle,
                timestamp: chrono::Utc::now(),
                page_url,
                frame_path: frame_path.clone(),
                action: analysis.action,
                reasoning: analysis.reasoning,
                result: ActionResult::fail(format!("Blocked: {reason}")),
                tokens: Some(analysis.tokens),
                duration_ms: started.elapsed().as_millis() as u64,
            };
            audit.log_cycle(&entry, Some(&budget.snapshot()))?;
            return Ok(CycleOutcome::Continue(entry));
        }

        if let Some(kind) = analysis.action.kind() {
            if kind == crate::types::ActionKind::Done {
                let entry = CycleEntry {
                    cycle,
                    timestamp: chrono::Utc::now(),
                    page_url,
                    frame_path: frame_path.clone(),
                    action: analysis.action.clone(),
                    reasoning: analysis.reasoning,
                    result: ActionResult::ok(),
                    tokens: Some(analysis.tokens),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                audit.log_cycle(&entry, Some(&budget.snapshot()))?;
                let result = LoopResult {
                    success: analysis.action.get_bool("success").unwrap_or(true),
                    summary: analysis
                        .action
                        .get_str("summary")
                        .unwrap_or("task completed")
                        .to_string(),
                    total_cycles: cycle + 1,
                    extracted_data: analysis.action.input.get("extracted_data").cloned(),
                };
                return Ok(CycleOutcome::Finished(result));
            }
            if kind == crate::types::ActionKind::Fail {
                let entry = CycleEntry {
                    cycle,
                    timestamp: chrono::Utc::now(),
                    page_url,
                    frame_path: frame_path.clone(),
                    action: analysis.action.clone(),
                    reasoning: analysis.reasoning,
                    result: ActionResult::ok(),
                    tokens: Some(analysis.tokens),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                audit.log_cycle(&entry, Some(&budget.snapshot()))?;
                let result = LoopResult {
                    success: false,
                    summary: analysis
                        .action
                        .get_str("reason")
                        .unwrap_or("task failed")
                        .to_string(),
                    total_cycles: cycle + 1,
                    extracted_data: None,
                };
                return Ok(CycleOutcome::Finished(result));
            }
        }

        let executor = ActionExecutor::new(page.as_ref(), ref_resolver);
        let result = executor.execute(&analysis.action).await;
        let is_navigate = analysis.action.kind() == Some(crate::types::ActionKind::Navigate);
        let is_wait = analysis.action.kind() == Some(crate::types::ActionKind::Wait);

        let entry = CycleEntry {
            cycle,
            timestamp: chrono::Utc::now(),
            page_url,
            frame_path,
            action: analysis.action,
            reasoning: analysis.reasoning,
            result,
            tokens: Some(analysis.tokens),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        audit.log_cycle(&entry, Some(&budget.snapshot()))?;

        self.settle(page.as_ref(), sampler, is_navigate, is_wait).await;

        Ok(CycleOutcome::Continue(entry))
    }

    /// Captures a screenshot from `page`. On a navigation-invalidation
    /// failure ("Target closed"/"Target page"), re-acquires the page
    /// handle from `client` by `page_name` rather than retrying the stale
    /// handle, then retries once against the fresh handle (spec §4.5 step
    /// b, §8 boundary scenario 3).
    async fn capture_with_recovery(
        &self,
        client: &PageRegistry,
        page_name: &str,
        page: &mut Arc<dyn PageHandle>,
        sampler: &mut FrameSampler,
    ) -> crate::error::StudioResult<Vec<u8>> {
        match page
            .screenshot_jpeg(self.config.viewport_width, self.config.viewport_height, self.config.jpeg_quality)
            .await
        {
            Ok(frame) => Ok(frame),
            Err(err) if StudioError::is_navigation_invalidation(&err.to_string()) => {
                info!(page_name, "page handle invalidated by navigation, re-acquiring");
                let entry = client
                    .get(page_name)
                    .ok_or_else(|| StudioError::not_found(format!("page '{page_name}' not found")))?;
                *page = entry.page.clone();
                let _ = page
                    .wait_for_load_state(LoadState::DomContentLoaded, RECOVERY_LOAD_TIMEOUT_MS)
                    .await;
                sampler.force_capture();
                page.screenshot_jpeg(self.config.viewport_width, self.config.viewport_height, self.config.jpeg_quality)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    async fn settle(&self, page: &dyn PageHandle, sampler: &mut FrameSampler, is_navigate: bool, is_wait: bool) {
        if is_navigate {
            let _ = page
                .wait_for_load_state(LoadState::NetworkIdle, NETWORK_IDLE_TIMEOUT_MS)
                .await;
            sampler.force_capture();
        } else if !is_wait {
            tokio::time::sleep(Duration::from_millis(self.config.settle_time_ms)).await;
        }
    }
}

enum CycleOutcome {
    Continue(CycleEntry),
    Finished(LoopResult),
}

fn truncate_aria(snapshot: &str, cap: usize) -> String {
    if snapshot.len() <= cap {
        return snapshot.to_string();
    }
    let boundary = snapshot[..cap].rfind('\n').unwrap_or(cap);
    let mut truncated = snapshot[..boundary].to_string();
    truncated.push_str("\n... [truncated]");
    truncated
}

fn is_stuck(entries: &[CycleEntry]) -> bool {
    if entries.len() < STUCK_WINDOW {
        return false;
    }
    let window = &entries[entries.len() - STUCK_WINDOW..];
    let first = &window[0].action;
    window
        .iter()
        .all(|entry| entry.action.name == first.name && entry.action.input == first.input)
}

fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn metrics_observe_cycle(started: Instant, outcome: &str) {
    crate::metrics::observe_cycle_duration(outcome, started.elapsed().as_millis() as f64);
}
