//! Named interfaces for the external collaborators this crate does not own:
//! the underlying browser page, its CDP session, the accessibility-tree
//! extractor, and the video encoder (spec §1 Out of scope). Grounded in the
//! teacher's `crates/cdp-adapter/src/lib.rs` id/error shape, trimmed to
//! trait boundaries instead of a full protocol client.

use crate::error::StudioResult;
use async_trait::async_trait;
use std::fmt;

/// Stable CDP target identifier, constant across a page's lifetime.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TargetId(pub String);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MouseButton {
    pub right: bool,
}

impl MouseButton {
    pub fn left() -> Self {
        Self { right: false }
    }

    pub fn right() -> Self {
        Self { right: true }
    }
}

/// A resolved, interactable element on the page (spec §4.4: the target of
/// `ref`-addressed actions).
#[async_trait]
pub trait ElementHandle: Send + Sync {
    async fn click(&self, button: MouseButton) -> StudioResult<()>;
    async fn hover(&self) -> StudioResult<()>;
    async fn fill(&self, text: &str) -> StudioResult<()>;
    async fn type_text(&self, text: &str) -> StudioResult<()>;
    async fn select_by_value(&self, value: &str) -> StudioResult<()>;
    async fn select_by_label(&self, label: &str) -> StudioResult<()>;
}

/// Resolves an accessibility-snapshot `ref` (e.g. `e5`) to an interactable
/// element, or `None` if the ref no longer exists on the page.
#[async_trait]
pub trait RefResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> StudioResult<Option<Box<dyn ElementHandle>>>;
}

/// Conditions the Perception Loop and Action Executor wait on after a
/// navigation (spec §4.4, §4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadState {
    DomContentLoaded,
    NetworkIdle,
}

/// The underlying browser page: the thing a page entry in the registry
/// owns. Kept deliberately thin; everything beyond navigation, input and
/// capture is delegated to the CDP session collaborators.
#[async_trait]
pub trait PageHandle: Send + Sync {
    fn target_id(&self) -> &TargetId;

    async fn screenshot_jpeg(&self, width: u32, height: u32, quality: u8) -> StudioResult<Vec<u8>>;
    async fn goto(&self, url: &str, timeout_ms: u64) -> StudioResult<()>;
    async fn wait_for_load_state(&self, state: LoadState, timeout_ms: u64) -> StudioResult<()>;
    async fn mouse_click(&self, x: f64, y: f64, button: MouseButton) -> StudioResult<()>;
    async fn mouse_move(&self, x: f64, y: f64) -> StudioResult<()>;
    async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> StudioResult<()>;
    async fn keyboard_press(&self, key: &str) -> StudioResult<()>;
    async fn type_text(&self, text: &str) -> StudioResult<()>;
    async fn select_all(&self) -> StudioResult<()>;
    async fn current_url(&self) -> StudioResult<String>;
    async fn title(&self) -> StudioResult<String>;
    async fn accept_dialogs(&self) -> StudioResult<()>;
}

/// Textual rendering of the page's accessibility tree with `[ref=eN]`
/// markers (spec Glossary).
#[async_trait]
pub trait AccessibilityTree: Send + Sync {
    async fn snapshot(&self) -> StudioResult<String>;
}

/// Input to the external video encoder invocation (spec §4.7).
pub struct EncodeRequest<'a> {
    pub frames: &'a [Vec<u8>],
    pub fps: u32,
    pub format: &'a str,
    pub output_path: &'a std::path::Path,
}

/// The external process that turns a JPEG frame sequence into a video file.
/// May be absent; callers fall back to persisting the raw frame sequence
/// (spec §7 "Encoder absence").
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn encode(&self, request: EncodeRequest<'_>) -> StudioResult<()>;
}
