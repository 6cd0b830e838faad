//! Recording Engine (spec §4.7): the idle→recording→encoding→done/aborted
//! state machine per page, screencast frame accumulation, console-log
//! correlation, key-frame extraction and summary emission.
//!
//! Grounded in the teacher's `crates/soulbrowser-kernel/src/sessions/service.rs`
//! lifecycle-flag-plus-timestamp bookkeeping, with the actual screencast
//! transport left behind [`crate::cdp`]'s named interfaces.

use crate::cdp::{EncodeRequest, PageHandle, VideoEncoder};
use crate::error::{StudioError, StudioResult};
use crate::metrics;
use crate::registry::sanitize_name;
use crate::types::{ConsoleLogEntry, RecordingOptions, RecordingState};
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};

pub struct StopOutcome {
    pub video_path: PathBuf,
    pub duration_ms: u64,
    pub frame_count: u64,
    pub console_logs: Vec<ConsoleLogEntry>,
    pub key_frame_paths: Vec<PathBuf>,
    pub summary_path: PathBuf,
}

/// Starts a recording on `state`, rejecting if one is already active (spec
/// §4.7 / §6: 409 "already recording"). The caller is responsible for the
/// actual `Page.startScreencast` CDP call and subscription wiring; this
/// function only owns the state transition and bookkeeping the spec
/// specifies.
pub fn start(
    state: &mut Option<RecordingState>,
    options: RecordingOptions,
    console_log_len: usize,
) -> StudioResult<()> {
    if state.as_ref().is_some_and(|s| s.is_active) {
        return Err(StudioError::conflict("Recording already in progress"));
    }
    *state = Some(RecordingState::start(options.normalized(), console_log_len));
    metrics::recording_event("start");
    Ok(())
}

/// Appends a decoded screencast frame to the buffer and increments
/// `frameCount` (spec §4.7 "append ... increment frameCount"). Acking the
/// CDP screencast frame event is the caller's responsibility and must
/// tolerate the session already being gone.
pub fn on_screencast_frame(state: &mut Option<RecordingState>, jpeg: Vec<u8>) {
    if let Some(recording) = state.as_mut() {
        if recording.is_active {
            recording.push_frame(jpeg);
        }
    }
}

/// Stops the active recording, encodes (or falls back to a raw frame
/// sequence), extracts key frames, and writes the summary file. Rejects
/// with 409 if not recording (spec §8 boundary scenario 5).
pub async fn stop(
    state: &mut Option<RecordingState>,
    page_name: &str,
    page: &dyn PageHandle,
    encoder: Option<&dyn VideoEncoder>,
    recordings_dir: &Path,
    full_console_log: &[ConsoleLogEntry],
) -> StudioResult<StopOutcome> {
    let mut recording = state
        .take()
        .filter(|r| r.is_active)
        .ok_or_else(|| StudioError::conflict("No recording in progress"))?;
    recording.is_active = false;

    let started_at = recording.started_at.unwrap_or_else(Utc::now);
    let stopped_at = Utc::now();
    let duration_ms = (stopped_at - started_at).num_milliseconds().max(0) as u64;

    let console_logs = if recording.options.capture_console_logs {
        full_console_log
            .get(recording.recording_start_index..)
            .map(|slice| slice.to_vec())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    std::fs::create_dir_all(recordings_dir)?;
    let sanitized = sanitize_name(page_name);
    let millis = started_at.timestamp_millis();
    let base_name = format!("{sanitized}-{millis}");
    let video_path = recordings_dir.join(format!("{base_name}.webm"));

    let video_path = if recording.frames.is_empty() {
        video_path
    } else if let Some(encoder) = encoder {
        let request = EncodeRequest {
            frames: &recording.frames,
            fps: 30,
            format: "webm",
            output_path: &video_path,
        };
        match encoder.encode(request).await {
            Ok(()) => video_path,
            Err(err) => {
                tracing::warn!(?err, "video encoder failed, falling back to raw frame sequence");
                write_raw_frame_fallback(recordings_dir, &base_name, &recording.frames)?
            }
        }
    } else {
        write_raw_frame_fallback(recordings_dir, &base_name, &recording.frames)?
    };

    let key_frame_paths = if recording.options.extract_key_frames && !recording.frames.is_empty() {
        extract_key_frames(&recording.frames, recording.options.key_frame_count, &video_path)?
    } else {
        Vec::new()
    };

    let page_url = page.current_url().await.unwrap_or_default();
    let page_title = page.title().await.unwrap_or_default();

    let summary_path = summary_path_for(&video_path);
    write_summary(
        &summary_path,
        &video_path,
        duration_ms,
        recording.frame_count,
        started_at,
        stopped_at,
        &console_logs,
        &key_frame_paths,
        &page_url,
        &page_title,
    )?;

    metrics::recording_event("stop");

    Ok(StopOutcome {
        video_path,
        duration_ms,
        frame_count: recording.frame_count,
        console_logs,
        key_frame_paths,
        summary_path,
    })
}

/// Page closed or a fatal error occurred while recording: flips state back
/// to idle without encoding anything (spec §4.7 abort path).
pub fn abort(state: &mut Option<RecordingState>) {
    if state.take().is_some() {
        metrics::recording_event("abort");
    }
}

fn write_raw_frame_fallback(recordings_dir: &Path, base_name: &str, frames: &[Vec<u8>]) -> StudioResult<PathBuf> {
    let dir = recordings_dir.join(format!("{base_name}-frames"));
    std::fs::create_dir_all(&dir)?;
    for (index, frame) in frames.iter().enumerate() {
        std::fs::write(dir.join(format!("frame-{index}.jpg")), frame)?;
    }
    Ok(dir)
}

/// Selects `key_frame_count` buffered frames at indices `i * (len / count)`
/// and writes them as `<output basename>-keyframe-<i+1>.jpg` (spec §8
/// boundary scenario 6).
fn extract_key_frames(frames: &[Vec<u8>], key_frame_count: u32, output_path: &Path) -> StudioResult<Vec<PathBuf>> {
    let len = frames.len();
    let count = key_frame_count.max(1) as usize;
    let stride = len / count.max(1);
    if stride == 0 {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for i in 0..count {
        let index = i * stride;
        if index >= len {
            break;
        }
        let path = output_path.with_file_name(format!(
            "{}-keyframe-{}.jpg",
            output_path.file_stem().and_then(|s| s.to_str()).unwrap_or("recording"),
            i + 1
        ));
        std::fs::write(&path, &frames[index])?;
        paths.push(path);
    }
    Ok(paths)
}

/// Recasts a console log entry into the camelCase shape the recording
/// summary schema uses (spec.md:231), distinct from `ConsoleLogEntry`'s own
/// snake_case derive used at the Cycle JSONL persistence boundary (§4.3).
fn console_log_entry_camel_case(entry: &ConsoleLogEntry) -> serde_json::Value {
    json!({
        "timestamp": entry.timestamp,
        "level": entry.level,
        "text": entry.text,
        "sourceUrl": entry.source_url,
        "line": entry.line,
        "column": entry.column,
    })
}

fn summary_path_for(output_path: &Path) -> PathBuf {
    let stem = output_path.file_stem().and_then(|s| s.to_str()).unwrap_or("recording");
    output_path.with_file_name(format!("{stem}-summary.json"))
}

#[allow(clippy::too_many_arguments)]
fn write_summary(
    summary_path: &Path,
    video_path: &Path,
    duration_ms: u64,
    frame_count: u64,
    started_at: chrono::DateTime<Utc>,
    stopped_at: chrono::DateTime<Utc>,
    console_logs: &[ConsoleLogEntry],
    key_frame_paths: &[PathBuf],
    page_url: &str,
    page_title: &str,
) -> StudioResult<()> {
    let console_logs: Vec<_> = console_logs.iter().map(console_log_entry_camel_case).collect();
    let summary = json!({
        "recording": {
            "videoPath": video_path,
            "durationMs": duration_ms,
            "frameCount": frame_count,
            "startedAt": started_at,
            "stoppedAt": stopped_at,
        },
        "consoleLogs": console_logs,
        "keyFrames": key_frame_paths,
        "page": {
            "url": page_url,
            "title": page_title,
        },
    });
    let file = std::fs::File::create(summary_path)?;
    serde_json::to_writer_pretty(file, &summary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{LoadState, MouseButton, TargetId};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FakePage;

    #[async_trait]
    impl PageHandle for FakePage {
        fn target_id(&self) -> &TargetId {
            unimplemented!()
        }
        async fn screenshot_jpeg(&self, _w: u32, _h: u32, _q: u8) -> StudioResult<Vec<u8>> {
            Ok(vec![])
        }
        async fn goto(&self, _url: &str, _timeout_ms: u64) -> StudioResult<()> {
            Ok(())
        }
        async fn wait_for_load_state(&self, _state: LoadState, _timeout_ms: u64) -> StudioResult<()> {
            Ok(())
        }
        async fn mouse_click(&self, _x: f64, _y: f64, _button: MouseButton) -> StudioResult<()> {
            Ok(())
        }
        async fn mouse_move(&self, _x: f64, _y: f64) -> StudioResult<()> {
            Ok(())
        }
        async fn mouse_wheel(&self, _dx: f64, _dy: f64) -> StudioResult<()> {
            Ok(())
        }
        async fn keyboard_press(&self, _key: &str) -> StudioResult<()> {
            Ok(())
        }
        async fn type_text(&self, _text: &str) -> StudioResult<()> {
            Ok(())
        }
        async fn select_all(&self) -> StudioResult<()> {
            Ok(())
        }
        async fn current_url(&self) -> StudioResult<String> {
            Ok("https://example.com".to_string())
        }
        async fn title(&self) -> StudioResult<String> {
            Ok("Example".to_string())
        }
        async fn accept_dialogs(&self) -> StudioResult<()> {
            Ok(())
        }
    }

    #[test]
    fn start_rejects_when_already_recording() {
        let mut state = None;
        start(&mut state, RecordingOptions::default(), 0).unwrap();
        let err = start(&mut state, RecordingOptions::default(), 0).unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test]
    async fn stop_rejects_when_idle() {
        let mut state = None;
        let page = FakePage;
        let dir = tempdir().unwrap();
        let err = stop(&mut state, "home", &page, None, dir.path(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 409);
        assert!(err.to_string().contains("No recording in progress"));
    }

    #[test]
    fn key_frame_selection_uses_stride_indices() {
        let frames: Vec<Vec<u8>> = (0..10).map(|i| vec![i as u8]).collect();
        let dir = tempdir().unwrap();
        let output = dir.path().join("page-1000.webm");
        let paths = extract_key_frames(&frames, 5, &output).unwrap();
        assert_eq!(paths.len(), 5);
        for (i, path) in paths.iter().enumerate() {
            let expected_index = i * 2;
            let bytes = std::fs::read(path).unwrap();
            assert_eq!(bytes, vec![expected_index as u8]);
        }
    }

    #[tokio::test]
    async fn stop_without_frames_still_produces_summary() {
        let mut state = Some(RecordingState::start(RecordingOptions::default(), 0));
        let page = FakePage;
        let dir = tempdir().unwrap();
        let outcome = stop(&mut state, "home", &page, None, dir.path(), &[])
            .await
            .unwrap();
        assert_eq!(outcome.frame_count, 0);
        assert!(outcome.summary_path.exists());
        assert!(state.is_none());
    }
}
