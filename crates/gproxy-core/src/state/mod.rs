use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;

use gproxy_bridge::Bridge;
use gproxy_common::{GlobalConfig, RuntimeFlags};
use gproxy_identity::{ActiveIdentityCursor, IdentityRegistry};

/// Everything the dispatch loop and the admin surface read or mutate. Built
/// once at bootstrap and handed around as a single `Arc`.
pub struct AppState {
    pub global: ArcSwap<GlobalConfig>,
    pub flags: RuntimeFlags,
    pub identities: ArcSwap<IdentityRegistry>,
    pub cursor: Arc<ActiveIdentityCursor>,
    pub bridge: Arc<Bridge>,
    /// Set while a rotation switch is in flight; new requests fail fast with
    /// `BrowserRestarting` rather than queuing behind the switch.
    system_busy: AtomicBool,
}

impl AppState {
    pub fn new(
        global: GlobalConfig,
        flags: RuntimeFlags,
        identities: IdentityRegistry,
        cursor: Arc<ActiveIdentityCursor>,
        bridge: Arc<Bridge>,
    ) -> Arc<Self> {
        Arc::new(Self {
            global: ArcSwap::from_pointee(global),
            flags,
            identities: ArcSwap::from_pointee(identities),
            cursor,
            bridge,
            system_busy: AtomicBool::new(false),
        })
    }

    pub fn is_system_busy(&self) -> bool {
        self.system_busy.load(Ordering::Acquire)
    }

    pub fn set_system_busy(&self, busy: bool) {
        self.system_busy.store(busy, Ordering::Release);
    }

    /// Re-scans the identity directory and snaps the cursor back onto the
    /// valid set if it shrank out from under the active index.
    pub async fn reload_identities(&self) -> std::io::Result<()> {
        let dir = std::path::PathBuf::from(&self.global.load().auth_dir);
        let registry = IdentityRegistry::scan(&dir)?;
        self.cursor.realign(&registry).await;
        self.identities.store(Arc::new(registry));
        Ok(())
    }
}
