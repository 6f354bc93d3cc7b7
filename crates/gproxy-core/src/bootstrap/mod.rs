use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use gproxy_bridge::{Bridge, BrowserProcess};
use gproxy_common::{GlobalConfig, GlobalConfigPatch, RuntimeFlags, StreamingModeFlag};
use gproxy_identity::{ActiveIdentityCursor, IdentityRegistry};

use crate::state::AppState;

/// The loopback path the stub page is served from; the Client Agent's
/// bootstrap page fetches its identity document and opens the duplex
/// socket from here.
pub const AGENT_PAGE_PATH: &str = "/__bridge/agent.html";

const UPSTREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Parser)]
#[command(name = "gproxy", version, about = "OpenAI/Gemini-compatible proxy over a browser-held AI Studio session")]
pub struct CliArgs {
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "API_KEYS", value_delimiter = ',')]
    pub api_keys: Option<Vec<String>>,

    #[arg(long, env = "AUTH_DIR")]
    pub auth_dir: Option<String>,

    #[arg(long, env = "BROWSER_BINARY")]
    pub browser_binary: Option<String>,

    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "RETRY_DELAY")]
    pub retry_delay: Option<u64>,

    #[arg(long, env = "SWITCH_ON_USES")]
    pub switch_on_uses: Option<u32>,

    #[arg(long, env = "FAILURE_THRESHOLD")]
    pub failure_threshold: Option<u32>,

    #[arg(long, env = "IMMEDIATE_SWITCH_STATUS_CODES", value_delimiter = ',')]
    pub immediate_switch_status_codes: Option<Vec<u16>>,

    #[arg(long, env = "STREAMING_MODE")]
    pub streaming_mode: Option<String>,

    #[arg(long, env = "FORCE_THINKING")]
    pub force_thinking: Option<bool>,

    #[arg(long, env = "FORCE_WEB_SEARCH")]
    pub force_web_search: Option<bool>,

    #[arg(long, env = "FORCE_URL_CONTEXT")]
    pub force_url_context: Option<bool>,
}

pub struct Bootstrap {
    pub state: Arc<AppState>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let patch = GlobalConfigPatch {
        host: args.host,
        port: args.port,
        api_keys: args.api_keys,
        auth_dir: args.auth_dir,
        browser_binary: args.browser_binary,
        max_retries: args.max_retries,
        retry_delay_ms: args.retry_delay,
        switch_on_uses: args.switch_on_uses,
        failure_threshold: args.failure_threshold,
        immediate_switch_status_codes: args.immediate_switch_status_codes,
    };
    let global: GlobalConfig = patch.into_config().context("finalize global config")?;

    let streaming_mode = match args.streaming_mode.as_deref() {
        Some("fake") => StreamingModeFlag::Fake,
        _ => StreamingModeFlag::Real,
    };
    let flags = RuntimeFlags::new(
        streaming_mode,
        args.force_thinking.unwrap_or(false),
        args.force_web_search.unwrap_or(false),
        args.force_url_context.unwrap_or(false),
    );

    let auth_dir = std::path::PathBuf::from(&global.auth_dir);
    let identities = IdentityRegistry::scan(&auth_dir).context("scan identity directory")?;
    let cursor = ActiveIdentityCursor::new();

    let agent_url = format!("http://127.0.0.1:{}{AGENT_PAGE_PATH}", global.port);
    let process = BrowserProcess::new(
        global.browser_binary.clone(),
        "./browser-profile".to_string(),
        agent_url,
    );
    let bridge = Bridge::new(process, UPSTREAM_IDLE_TIMEOUT);

    let state = AppState::new(global, flags, identities, cursor, bridge);

    Ok(Bootstrap { state })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with_auth_dir(auth_dir: &str) -> CliArgs {
        CliArgs {
            host: None,
            port: None,
            api_keys: None,
            auth_dir: Some(auth_dir.to_string()),
            browser_binary: None,
            max_retries: None,
            retry_delay: None,
            switch_on_uses: None,
            failure_threshold: None,
            immediate_switch_status_codes: None,
            streaming_mode: None,
            force_thinking: None,
            force_web_search: None,
            force_url_context: None,
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_defaults_when_unset() {
        let boot = bootstrap(args_with_auth_dir("/nonexistent/gproxy-test-auth"))
            .await
            .unwrap();
        let global = boot.state.global.load();
        assert_eq!(global.host, "0.0.0.0");
        assert_eq!(global.port, 8787);
        assert_eq!(global.max_retries, 3);
        assert_eq!(global.immediate_switch_status_codes, vec![429, 503]);
        assert_eq!(boot.state.flags.streaming_mode(), StreamingModeFlag::Real);
        assert!(!boot.state.flags.force_thinking());
    }

    #[tokio::test]
    async fn bootstrap_treats_any_non_fake_value_as_real_streaming() {
        let mut args = args_with_auth_dir("/nonexistent/gproxy-test-auth");
        args.streaming_mode = Some("fake".to_string());
        let boot = bootstrap(args).await.unwrap();
        assert_eq!(boot.state.flags.streaming_mode(), StreamingModeFlag::Fake);
    }
}
