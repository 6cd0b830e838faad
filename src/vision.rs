//! Vision Client (spec §4.6): builds the per-cycle multimodal prompt and
//! parses a single tool-use action back from the model.
//!
//! Grounded in the teacher's `crates/soulbrowser-kernel/src/llm/openai.rs`
//! `OpenAiLlmProvider`: a `reqwest::Client`, a typed request/response pair,
//! and an `async_trait` entry point, kept intact and retargeted at an
//! Anthropic-shaped messages API with an image content block instead of
//! chat-completion text-only messages.

use crate::error::{StudioError, StudioResult};
use crate::types::{AgentAction, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = r#"You control a web browser on behalf of a user task. You will be shown a screenshot and an accessibility snapshot of the current page. Respond with exactly one tool call drawn from the declared action vocabulary: click, type, scroll, navigate, keyboard, wait, hover, select, done, fail. Use the `ref` field (e.g. "e5") from the accessibility snapshot to target elements whenever one is available; fall back to coordinates only when no ref exists. Call `done` when the task is complete and `fail` when it cannot be completed."#;

#[derive(Clone, Debug)]
pub struct VisionClientConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for VisionClientConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl VisionClientConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                config.api_keys.push(key);
            }
        }
        config
    }
}

pub struct AnalyzeFrameInput<'a> {
    pub frame_base64: &'a str,
    pub aria_snapshot: &'a str,
    pub history: &'a str,
    pub task: &'a str,
}

#[derive(Clone, Debug)]
pub struct AnalyzeFrameOutput {
    pub action: AgentAction,
    pub reasoning: Option<String>,
    pub tokens: TokenUsage,
}

#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn analyze_frame(&self, input: AnalyzeFrameInput<'_>) -> StudioResult<AnalyzeFrameOutput>;
}

pub struct AnthropicVisionClient {
    http: reqwest::Client,
    config: VisionClientConfig,
}

impl AnthropicVisionClient {
    pub fn new(config: VisionClientConfig) -> StudioResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| StudioError::internal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { http, config })
    }

    fn build_user_text(input: &AnalyzeFrameInput<'_>) -> String {
        let mut text = format!("## Task\n{}\n", input.task);
        if !input.history.is_empty() {
            text.push_str(&format!("\n## Previous Actions\n{}\n", input.history));
        }
        text.push_str(&format!(
            "\n## Current Page ARIA Snapshot\n```\n{}\n```\n",
            input.aria_snapshot
        ));
        text.push_str("\nRespond with exactly one tool call for your next action.");
        text
    }
}

#[async_trait]
impl VisionClient for AnthropicVisionClient {
    async fn analyze_frame(&self, input: AnalyzeFrameInput<'_>) -> StudioResult<AnalyzeFrameOutput> {
        if self.config.api_keys.is_empty() {
            return Err(StudioError::model("no API key configured for vision client"));
        }

        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: 1024,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64".to_string(),
                            media_type: "image/jpeg".to_string(),
                            data: input.frame_base64.to_string(),
                        },
                    },
                    ContentBlock::Text {
                        text: Self::build_user_text(&input),
                    },
                ],
            }],
            tools: action_tool_schema(),
        };

        let mut last_err = None;
        for api_key in &self.config.api_keys {
            let response = self
                .http
                .post(&self.config.api_base)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&request)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    last_err = Some(format!("request error: {err}"));
                    continue;
                }
            };

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_err = Some("rate limited".to_string());
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                last_err = Some(format!("HTTP {status}: {body}"));
                continue;
            }

            let body: MessagesResponse = response
                .json()
                .await
                .map_err(|err| StudioError::model(format!("invalid response body: {err}")))?;

            return Ok(parse_response(body));
        }

        Err(StudioError::model(
            last_err.unwrap_or_else(|| "all API keys exhausted".to_string()),
        ))
    }
}

fn parse_response(response: MessagesResponse) -> AnalyzeFrameOutput {
    let mut reasoning = String::new();
    let mut tool_use = None;

    for block in response.content {
        match block {
            ResponseBlock::Text { text } => reasoning.push_str(&text),
            ResponseBlock::ToolUse { name, input, .. } => {
                if tool_use.is_none() {
                    tool_use = Some((name, input));
                }
            }
        }
    }

    let tokens = TokenUsage {
        input: response.usage.input_tokens,
        output: response.usage.output_tokens,
    };

    let reasoning_opt = if reasoning.is_empty() {
        None
    } else {
        Some(reasoning.clone())
    };

    let action = match tool_use {
        Some((name, input)) => AgentAction {
            name,
            input: input.as_object().cloned().unwrap_or_default(),
        },
        None => {
            let reason = if reasoning.is_empty() {
                "model returned no action".to_string()
            } else {
                reasoning.clone()
            };
            let mut input = Map::new();
            input.insert("reason".to_string(), Value::String(reason));
            AgentAction {
                name: "fail".to_string(),
                input,
            }
        }
    };

    AnalyzeFrameOutput {
        action,
        reasoning: reasoning_opt,
        tokens,
    }
}

fn action_tool_schema() -> Vec<ToolSchema> {
    let kinds = [
        "click", "type", "scroll", "navigate", "keyboard", "wait", "hover", "select", "done",
        "fail",
    ];
    kinds
        .iter()
        .map(|kind| ToolSchema {
            name: kind.to_string(),
            description: format!("Perform a '{kind}' action against the current page."),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": true,
            }),
        })
        .collect()
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
    tools: Vec<ToolSchema>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Serialize)]
struct ToolSchema {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        input: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_prefers_tool_use_block() {
        let response = MessagesResponse {
            content: vec![
                ResponseBlock::Text {
                    text: "I will click the button".to_string(),
                },
                ResponseBlock::ToolUse {
                    id: "tool_1".to_string(),
                    name: "click".to_string(),
                    input: serde_json::json!({"ref": "e5"}),
                },
            ],
            usage: Usage {
                input_tokens: 100,
                output_tokens: 20,
            },
        };
        let output = parse_response(response);
        assert_eq!(output.action.name, "click");
        assert_eq!(output.reasoning.as_deref(), Some("I will click the button"));
        assert_eq!(output.tokens.input, 100);
    }

    #[test]
    fn parse_response_synthesizes_fail_without_tool_use() {
        let response = MessagesResponse {
            content: vec![ResponseBlock::Text {
                text: "I cannot proceed".to_string(),
            }],
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        };
        let output = parse_response(response);
        assert_eq!(output.action.name, "fail");
        assert_eq!(
            output.action.get_str("reason"),
            Some("I cannot proceed")
        );
    }

    #[test]
    fn user_text_matches_expected_section_order() {
        let input = AnalyzeFrameInput {
            frame_base64: "ignored",
            aria_snapshot: "tree",
            history: "1. click(ref=e5) \u{2192} OK",
            task: "log in",
        };
        let text = AnthropicVisionClient::build_user_text(&input);
        let task_pos = text.find("## Task").unwrap();
        let history_pos = text.find("## Previous Actions").unwrap();
        let aria_pos = text.find("## Current Page ARIA Snapshot").unwrap();
        assert!(task_pos < history_pos);
        assert!(history_pos < aria_pos);
    }
}
