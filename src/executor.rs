//! Action Executor (spec §4.4): translates a structured agent action into
//! concrete page operations, grounded in the teacher's
//! `src/agent/executor.rs` step-execution shape and the kind dispatch in
//! `crates/soulbrowser-kernel/src/llm/schema.rs::to_agent_tool`.

use crate::cdp::{LoadState, MouseButton, PageHandle, RefResolver};
use crate::types::{ActionKind, ActionResult, AgentAction};
use std::time::Duration;

const NAVIGATE_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_SCROLL_AMOUNT: f64 = 300.0;
const DEFAULT_WAIT_MS: u64 = 1000;

pub struct ActionExecutor<'a> {
    page: &'a dyn PageHandle,
    ref_resolver: &'a dyn RefResolver,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(page: &'a dyn PageHandle, ref_resolver: &'a dyn RefResolver) -> Self {
        Self { page, ref_resolver }
    }

    /// Dispatch `action`. Never propagates an error: every failure, whether
    /// from an unknown kind or a page operation, is folded into
    /// `ActionResult::fail`.
    pub async fn execute(&self, action: &AgentAction) -> ActionResult {
        let Some(kind) = action.kind() else {
            return ActionResult::fail(format!("Unknown action: {}", action.name));
        };

        let outcome = match kind {
            ActionKind::Click => self.click(action, MouseButton::left()).await,
            ActionKind::Hover => self.hover(action).await,
            ActionKind::Type => self.type_text(action).await,
            ActionKind::Scroll => self.scroll(action).await,
            ActionKind::Navigate => self.navigate(action).await,
            ActionKind::Keyboard => self.keyboard(action).await,
            ActionKind::Wait => self.wait(action).await,
            ActionKind::Select => self.select(action).await,
            ActionKind::Done | ActionKind::Fail => Ok(()),
        };

        match outcome {
            Ok(()) => ActionResult::ok(),
            Err(message) => ActionResult::fail(message),
        }
    }

    async fn click(&self, action: &AgentAction, button: MouseButton) -> Result<(), String> {
        if let Some(reference) = action.get_str("ref") {
            let element = self
                .ref_resolver
                .resolve(reference)
                .await
                .map_err(|err| err.to_string())?
                .ok_or_else(|| format!("ref '{reference}' did not resolve to an element"))?;
            element.click(button).await.map_err(|err| err.to_string())
        } else if let (Some(x), Some(y)) = (action.get_f64("x"), action.get_f64("y")) {
            self.page
                .mouse_click(x, y, button)
                .await
                .map_err(|err| err.to_string())
        } else {
            Err("requires ref or x,y".to_string())
        }
    }

    async fn hover(&self, action: &AgentAction) -> Result<(), String> {
        if let Some(reference) = action.get_str("ref") {
            let element = self
                .ref_resolver
                .resolve(reference)
                .await
                .map_err(|err| err.to_string())?
                .ok_or_else(|| format!("ref '{reference}' did not resolve to an element"))?;
            element.hover().await.map_err(|err| err.to_string())
        } else if let (Some(x), Some(y)) = (action.get_f64("x"), action.get_f64("y")) {
            self.page.mouse_move(x, y).await.map_err(|err| err.to_string())
        } else {
            Err("requires ref or x,y".to_string())
        }
    }

    async fn type_text(&self, action: &AgentAction) -> Result<(), String> {
        let text = action
            .get_str("text")
            .ok_or_else(|| "requires text".to_string())?;
        let clear_first = action.get_bool("clear_first").unwrap_or(false);

        if let Some(reference) = action.get_str("ref") {
            let element = self
                .ref_resolver
                .resolve(reference)
                .await
                .map_err(|err| err.to_string())?
                .ok_or_else(|| format!("ref '{reference}' did not resolve to an element"))?;
            if clear_first {
                element.fill(text).await.map_err(|err| err.to_string())
            } else {
                element.click(MouseButton::left()).await.map_err(|err| err.to_string())?;
                element.type_text(text).await.map_err(|err| err.to_string())
            }
        } else {
            if clear_first {
                self.page.select_all().await.map_err(|err| err.to_string())?;
            }
            self.page.type_text(text).await.map_err(|err| err.to_string())
        }
    }

    async fn scroll(&self, action: &AgentAction) -> Result<(), String> {
        let direction = action
            .get_str("direction")
            .ok_or_else(|| "requires direction".to_string())?;
        let amount = action.get_f64("amount").unwrap_or(DEFAULT_SCROLL_AMOUNT);

        let (dx, dy) = match direction {
            "down" => (0.0, amount),
            "up" => (0.0, -amount),
            "right" => (amount, 0.0),
            "left" => (-amount, 0.0),
            other => return Err(format!("invalid direction: {other}")),
        };

        self.page.mouse_wheel(dx, dy).await.map_err(|err| err.to_string())
    }

    async fn navigate(&self, action: &AgentAction) -> Result<(), String> {
        let url = action.get_str("url").ok_or_else(|| "requires url".to_string())?;
        self.page
            .goto(url, NAVIGATE_TIMEOUT_MS)
            .await
            .map_err(|err| err.to_string())
    }

    async fn keyboard(&self, action: &AgentAction) -> Result<(), String> {
        let key = action.get_str("key").ok_or_else(|| "requires key".to_string())?;
        self.page.keyboard_press(key).await.map_err(|err| err.to_string())
    }

    async fn wait(&self, action: &AgentAction) -> Result<(), String> {
        let ms = action.get_u64("ms").unwrap_or(DEFAULT_WAIT_MS);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    async fn select(&self, action: &AgentAction) -> Result<(), String> {
        let reference = action.get_str("ref").ok_or_else(|| "requires ref".to_string())?;
        let value = action.get_str("value").ok_or_else(|| "requires value".to_string())?;
        let element = self
            .ref_resolver
            .resolve(reference)
            .await
            .map_err(|err| err.to_string())?
            .ok_or_else(|| format!("ref '{reference}' did not resolve to an element"))?;

        if element.select_by_value(value).await.is_ok() {
            return Ok(());
        }
        element.select_by_label(value).await.map_err(|err| err.to_string())
    }
}

/// Best-effort post-navigation settle per spec §4.5.l: wait for network
/// idle, swallowing timeouts.
pub async fn wait_network_idle_best_effort(page: &dyn PageHandle, timeout_ms: u64) {
    let _ = page.wait_for_load_state(LoadState::NetworkIdle, timeout_ms).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::ElementHandle;
    use crate::error::{StudioError, StudioResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    struct FakeElement {
        clicked: Arc<Mutex<bool>>,
        fail_select_by_value: bool,
    }

    #[async_trait]
    impl ElementHandle for FakeElement {
        async fn click(&self, _button: MouseButton) -> StudioResult<()> {
            *self.clicked.lock() = true;
            Ok(())
        }
        async fn hover(&self) -> StudioResult<()> {
            Ok(())
        }
        async fn fill(&self, _text: &str) -> StudioResult<()> {
            Ok(())
        }
        async fn type_text(&self, _text: &str) -> StudioResult<()> {
            Ok(())
        }
        async fn select_by_value(&self, _value: &str) -> StudioResult<()> {
            if self.fail_select_by_value {
                Err(StudioError::transport("select by value failed"))
            } else {
                Ok(())
            }
        }
        async fn select_by_label(&self, _label: &str) -> StudioResult<()> {
            Ok(())
        }
    }

    struct FakeResolver {
        fail_select_by_value: bool,
        present: bool,
    }

    #[async_trait]
    impl RefResolver for FakeResolver {
        async fn resolve(&self, _reference: &str) -> StudioResult<Option<Box<dyn ElementHandle>>> {
            if !self.present {
                return Ok(None);
            }
            Ok(Some(Box::new(FakeElement {
                clicked: Arc::new(Mutex::new(false)),
                fail_select_by_value: self.fail_select_by_value,
            })))
        }
    }

    struct FakePage;

    #[async_trait]
    impl PageHandle for FakePage {
        fn target_id(&self) -> &crate::cdp::TargetId {
            unimplemented!("not exercised in these tests")
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

    fn action(kind: ActionKind, input: serde_json::Value) -> AgentAction {
        AgentAction {
            name: kind.as_str().to_string(),
            input: input.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn click_without_ref_or_coords_errors() {
        let page = FakePage;
        let resolver = FakeResolver {
            fail_select_by_value: false,
            present: true,
        };
        let executor = ActionExecutor::new(&page, &resolver);
        let result = executor.execute(&action(ActionKind::Click, json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("requires ref or x,y"));
    }

    #[tokio::test]
    async fn click_by_coordinates_succeeds() {
        let page = FakePage;
        let resolver = FakeResolver {
            fail_select_by_value: false,
            present: true,
        };
        let executor = ActionExecutor::new(&page, &resolver);
        let result = executor
            .execute(&action(ActionKind::Click, json!({"x": 10.0, "y": 20.0})))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn click_with_unresolved_ref_errors() {
        let page = FakePage;
        let resolver = FakeResolver {
            fail_select_by_value: false,
            present: false,
        };
        let executor = ActionExecutor::new(&page, &resolver);
        let result = executor
            .execute(&action(ActionKind::Click, json!({"ref": "e5"})))
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn select_falls_back_to_label_on_value_failure() {
        let page = FakePage;
        let resolver = FakeResolver {
            fail_select_by_value: true,
            present: true,
        };
        let executor = ActionExecutor::new(&page, &resolver);
        let result = executor
            .execute(&action(
                ActionKind::Select,
                json!({"ref": "e5", "value": "opt1"}),
            ))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn done_and_fail_are_no_ops_that_succeed() {
        let page = FakePage;
        let resolver = FakeResolver {
            fail_select_by_value: false,
            present: true,
        };
        let executor = ActionExecutor::new(&page, &resolver);
        assert!(executor.execute(&action(ActionKind::Done, json!({}))).await.success);
        assert!(executor.execute(&action(ActionKind::Fail, json!({}))).await.success);
    }

    #[tokio::test]
    async fn unknown_kind_reports_unknown_action() {
        let page = FakePage;
        let resolver = FakeResolver {
            fail_select_by_value: false,
            present: true,
        };
        let executor = ActionExecutor::new(&page, &resolver);
        let unknown = AgentAction {
            name: "teleport".to_string(),
            input: Default::default(),
        };
        let result = executor.execute(&unknown).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown action: teleport"));
    }
}
