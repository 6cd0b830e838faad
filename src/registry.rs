//! Page Registry (spec §3, §4.7, §5): named long-lived pages keyed by a
//! user-supplied name, holding the per-page console log, at most one
//! active recording state, and teardown hooks. Grounded in the teacher's
//! `crates/soulbrowser-kernel/src/sessions/service.rs` `DashMap<String,
//! Arc<SessionHandle>>` shape.

use crate::cdp::{PageHandle, TargetId};
use crate::error::{StudioError, StudioResult};
use crate::types::{ConsoleLogEntry, RecordingState};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

const MAX_NAME_LEN: usize = 256;

/// Validates a page name per spec §6: non-empty, ≤256 bytes.
pub fn validate_name(name: &str) -> StudioResult<()> {
    if name.is_empty() {
        return Err(StudioError::validation("page name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StudioError::validation(format!(
            "page name must be at most {MAX_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

/// Replaces any character outside `[A-Za-z0-9_-]` with `_` (spec §6 file
/// layout sanitization rule).
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// One entry in the registry: the page handle plus everything that
/// outlives a single HTTP request (spec §3 invariants: at most one
/// recording state, append-only console log).
pub struct PageEntry {
    pub name: String,
    pub page: Arc<dyn PageHandle>,
    pub target_id: TargetId,
    console_log: Mutex<Vec<ConsoleLogEntry>>,
    recording: Mutex<Option<RecordingState>>,
}

impl PageEntry {
    pub fn new(name: String, page: Arc<dyn PageHandle>) -> Self {
        let target_id = page.target_id().clone();
        Self {
            name,
            page,
            target_id,
            console_log: Mutex::new(Vec::new()),
            recording: Mutex::new(None),
        }
    }

    pub fn push_console_log(&self, entry: ConsoleLogEntry) {
        self.console_log.lock().push(entry);
    }

    pub fn console_log(&self) -> Vec<ConsoleLogEntry> {
        self.console_log.lock().clone()
    }

    pub fn console_log_len(&self) -> usize {
        self.console_log.lock().len()
    }

    pub fn clear_console_log(&self) -> usize {
        let mut log = self.console_log.lock();
        let cleared = log.len();
        log.clear();
        cleared
    }

    pub fn is_recording(&self) -> bool {
        self.recording.lock().as_ref().is_some_and(|r| r.is_active)
    }

    pub fn with_recording<R>(&self, f: impl FnOnce(&mut Option<RecordingState>) -> R) -> R {
        f(&mut self.recording.lock())
    }
}

/// Concurrent map of page name to [`PageEntry`] (spec §5: "read-mostly
/// with occasional insertion/deletion ... safe under concurrent lookup and
/// mutation").
#[derive(Default)]
pub struct PageRegistry {
    pages: DashMap<String, Arc<PageEntry>>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self {
            pages: DashMap::new(),
        }
    }

    pub fn insert(&self, name: String, page: Arc<dyn PageHandle>) -> StudioResult<Arc<PageEntry>> {
        validate_name(&name)?;
        if self.pages.contains_key(&name) {
            return Err(StudioError::conflict(format!("page '{name}' already exists")));
        }
        let entry = Arc::new(PageEntry::new(name.clone(), page));
        self.pages.insert(name, entry.clone());
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<PageEntry>> {
        self.pages.get(name).map(|entry| entry.value().clone())
    }

    /// Removes the entry. Callers must detach its background CDP sessions
    /// and stop any active recording before or as part of calling this
    /// (spec §3 invariant: all background sessions detached on removal).
    pub fn remove(&self, name: &str) -> Option<Arc<PageEntry>> {
        self.pages.remove(name).map(|(_, entry)| entry)
    }

    pub fn names(&self) -> Vec<String> {
        self.pages.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{LoadState, MouseButton};
    use async_trait::async_trait;

    struct FakePage(TargetId);

    #[async_trait]
    impl PageHandle for FakePage {
        fn target_id(&self) -> &TargetId {
            &self.0
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
    fn validate_name_rejects_empty_and_oversized() {
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(257)).is_err());
        assert!(validate_name("ok").is_ok());
    }

    #[test]
    fn sanitize_name_replaces_disallowed_characters() {
        assert_eq!(sanitize_name("my page/1.html"), "my_page_1_html");
        assert_eq!(sanitize_name("safe-Name_1"), "safe-Name_1");
    }

    #[test]
    fn insert_rejects_duplicate_names() {
        let registry = PageRegistry::new();
        let page = Arc::new(FakePage(TargetId("t1".to_string())));
        registry.insert("home".to_string(), page.clone()).unwrap();
        let err = registry.insert("home".to_string(), page).unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn remove_drops_entry_from_registry() {
        let registry = PageRegistry::new();
        let page = Arc::new(FakePage(TargetId("t1".to_string())));
        registry.insert("home".to_string(), page).unwrap();
        assert!(registry.remove("home").is_some());
        assert!(registry.get("home").is_none());
    }

    #[test]
    fn console_log_is_append_only_until_cleared() {
        let registry = PageRegistry::new();
        let page = Arc::new(FakePage(TargetId("t1".to_string())));
        let entry = registry.insert("home".to_string(), page).unwrap();
        entry.push_console_log(ConsoleLogEntry {
            timestamp: chrono::Utc::now(),
            level: crate::types::ConsoleLogLevel::Log,
            text: "hello".to_string(),
            source_url: None,
            line: None,
            column: None,
        });
        assert_eq!(entry.console_log_len(), 1);
        assert_eq!(entry.clear_console_log(), 1);
        assert_eq!(entry.console_log_len(), 0);
    }
}
