//! Studio configuration.
//!
//! Environment-first, typed-default layering in the manner of the teacher's
//! `cli/env.rs`/`config.rs`: a struct with sensible defaults, overridden by
//! a handful of environment variables read once at startup.

use crate::error::{StudioError, StudioResult};
use std::path::PathBuf;

const DEFAULT_HTTP_PORT: u16 = 9222;
const DEFAULT_CDP_PORT: u16 = 9223;

#[derive(Clone, Debug)]
pub struct StudioConfig {
    /// HTTP control-plane port (route table itself is out of scope here).
    pub port: u16,
    /// Chrome DevTools Protocol port the browser listens on.
    pub cdp_port: u16,
    /// Directory recordings and perception audit trails are written under.
    pub recordings_dir: PathBuf,
    /// API key consumed by the Vision Client; absence is only an error once
    /// a `VisionClient` is actually constructed, not at config load time.
    pub anthropic_api_key: Option<String>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            cdp_port: DEFAULT_CDP_PORT,
            recordings_dir: PathBuf::from("./recordings"),
            anthropic_api_key: None,
        }
    }
}

impl StudioConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> StudioResult<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("BROWSER_STUDIO_PORT") {
            config.port = parse_port(&raw)?;
        }
        if let Ok(raw) = std::env::var("BROWSER_STUDIO_CDP_PORT") {
            config.cdp_port = parse_port(&raw)?;
        }
        if let Ok(raw) = std::env::var("BROWSER_STUDIO_RECORDINGS_DIR") {
            config.recordings_dir = PathBuf::from(raw);
        }
        config.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();

        config.validate()?;
        Ok(config)
    }

    /// Port validation from spec §6: both ports in 1..=65535, and distinct.
    pub fn validate(&self) -> StudioResult<()> {
        if self.port == 0 || self.cdp_port == 0 {
            return Err(StudioError::validation("ports must be in 1..=65535"));
        }
        if self.port == self.cdp_port {
            return Err(StudioError::validation(
                "http port and cdp port must be distinct",
            ));
        }
        Ok(())
    }
}

fn parse_port(raw: &str) -> StudioResult<u16> {
    raw.parse::<u16>()
        .map_err(|_| StudioError::validation(format!("invalid port: {raw}")))
        .and_then(|port| {
            if port == 0 {
                Err(StudioError::validation("port must be in 1..=65535"))
            } else {
                Ok(port)
            }
        })
}
