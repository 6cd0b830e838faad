//! Thin binary entry point. The HTTP route table, request parsing and
//! shutdown orchestration are out of scope for this crate (spec §1); this
//! binary only wires up logging, configuration and metrics registration so
//! an external router has something to mount against.

use browser_studio::config::StudioConfig;
use browser_studio::{build_info, metrics};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(
        git_hash = build_info::GIT_HASH,
        git_branch = build_info::GIT_BRANCH,
        build_date = build_info::BUILD_DATE,
        "browser-studio starting"
    );

    let config = StudioConfig::from_env()?;
    metrics::register();

    tracing::info!(
        port = config.port,
        cdp_port = config.cdp_port,
        recordings_dir = %config.recordings_dir.display(),
        "configuration loaded; HTTP transport is provided by an external router"
    );

    Ok(())
}
