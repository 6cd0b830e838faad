//! Safety filter (spec §4.5, §9 "Safety filter as policy object"): a
//! composable policy consulted before the Action Executor ever touches the
//! page, grounded in the teacher's `src/policy.rs` loader-object shape but
//! carrying the spec's read-only-mode and blocked-URL-pattern rules instead
//! of a route-policy DSL.

use crate::error::StudioResult;
use crate::types::{ActionKind, AgentAction};
use regex::Regex;

const READ_ONLY_ALLOWED: &[ActionKind] = &[
    ActionKind::Scroll,
    ActionKind::Navigate,
    ActionKind::Wait,
    ActionKind::Done,
    ActionKind::Fail,
    ActionKind::Hover,
];

#[derive(Clone, Debug)]
pub enum SafetyDecision {
    Allowed,
    Denied { reason: String },
}

impl SafetyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SafetyDecision::Allowed)
    }
}

#[derive(Clone)]
struct BlockedPattern {
    source: String,
    regex: Regex,
}

#[derive(Clone)]
pub struct SafetyPolicy {
    read_only_mode: bool,
    blocked_url_patterns: Vec<BlockedPattern>,
}

impl SafetyPolicy {
    pub fn new(read_only_mode: bool, blocked_url_patterns: &[String]) -> StudioResult<Self> {
        let blocked_url_patterns = blocked_url_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map(|regex| BlockedPattern {
                        source: pattern.clone(),
                        regex,
                    })
                    .map_err(|err| {
                        crate::error::StudioError::validation(format!(
                            "invalid blocked URL pattern '{pattern}': {err}"
                        ))
                    })
            })
            .collect::<StudioResult<Vec<_>>>()?;

        Ok(Self {
            read_only_mode,
            blocked_url_patterns,
        })
    }

    pub fn permissive() -> Self {
        Self {
            read_only_mode: false,
            blocked_url_patterns: Vec::new(),
        }
    }

    pub fn evaluate(&self, action: &AgentAction) -> SafetyDecision {
        let Some(kind) = action.kind() else {
            return SafetyDecision::Allowed;
        };

        if self.read_only_mode && !READ_ONLY_ALLOWED.contains(&kind) {
            return SafetyDecision::Denied {
                reason: format!("read-only mode forbids action '{}'", kind.as_str()),
            };
        }

        if kind == ActionKind::Navigate {
            if let Some(url) = action.get_str("url") {
                for pattern in &self.blocked_url_patterns {
                    if pattern.regex.is_match(url) {
                        return SafetyDecision::Denied {
                            reason: format!(
                                "URL {url} blocked by pattern: {}",
                                pattern.source
                            ),
                        };
                    }
                }
            }
        }

        SafetyDecision::Allowed
    }
}
