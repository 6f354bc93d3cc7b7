use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Lifecycle states of the headless browser child process, as observed by
/// the bridge rather than the OS: `Launched` means the process exists but the
/// Client Agent has not yet dialed back over the duplex socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserStatus {
    Down,
    Launched,
    Ready,
    Restarting,
}

pub struct BrowserProcess {
    binary: Option<String>,
    profile_dir: String,
    agent_url: String,
    child: Mutex<Option<Child>>,
    status: Mutex<BrowserStatus>,
}

impl BrowserProcess {
    pub fn new(binary: Option<String>, profile_dir: String, agent_url: String) -> Arc<Self> {
        Arc::new(Self {
            binary,
            profile_dir,
            agent_url,
            child: Mutex::new(None),
            status: Mutex::new(BrowserStatus::Down),
        })
    }

    pub async fn status(&self) -> BrowserStatus {
        *self.status.lock().await
    }

    pub async fn set_ready(&self) {
        *self.status.lock().await = BrowserStatus::Ready;
    }

    /// Launches the browser binary pointed at the Client Agent's bootstrap
    /// page, with `identity_index` appended as a query parameter so the stub
    /// page knows which identity document to fetch and apply before it
    /// opens the duplex socket. Does not wait for the Client Agent to
    /// connect back; the caller observes readiness via [`Self::set_ready`]
    /// once the duplex socket upgrades.
    pub async fn launch(&self, identity_index: u32) -> std::io::Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(existing) = guard.as_mut()
            && existing.try_wait()?.is_none()
        {
            return Ok(());
        }

        let binary = self.binary.clone().unwrap_or_else(default_browser_binary);
        let url = build_agent_url(&self.agent_url, identity_index);

        let mut cmd = Command::new(binary);
        cmd.arg(format!("--user-data-dir={}", self.profile_dir))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(url)
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        *guard = Some(child);
        drop(guard);
        *self.status.lock().await = BrowserStatus::Launched;
        Ok(())
    }

    pub async fn restart(&self, identity_index: u32) -> std::io::Result<()> {
        *self.status.lock().await = BrowserStatus::Restarting;
        self.kill().await;
        self.launch(identity_index).await
    }

    pub async fn close(&self) {
        self.kill().await;
        *self.status.lock().await = BrowserStatus::Down;
    }

    async fn kill(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let _ = child.kill().await;
        }
    }
}

#[cfg(target_os = "windows")]
fn default_browser_binary() -> String {
    "chrome.exe".to_string()
}

#[cfg(not(target_os = "windows"))]
fn default_browser_binary() -> String {
    "google-chrome".to_string()
}

fn build_agent_url(agent_url: &str, identity_index: u32) -> String {
    let separator = if agent_url.contains('?') { '&' } else { '?' };
    format!("{agent_url}{separator}identity={identity_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_identity_with_question_mark_when_no_query_present() {
        assert_eq!(
            build_agent_url("http://127.0.0.1:8787/__bridge/agent.html", 3),
            "http://127.0.0.1:8787/__bridge/agent.html?identity=3"
        );
    }

    #[test]
    fn appends_identity_with_ampersand_when_query_already_present() {
        assert_eq!(
            build_agent_url("http://127.0.0.1:8787/__bridge/agent.html?debug=1", 0),
            "http://127.0.0.1:8787/__bridge/agent.html?debug=1&identity=0"
        );
    }
}
