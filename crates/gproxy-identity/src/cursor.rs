use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::RwLock;

use crate::registry::IdentityRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Idle,
    Active(u32),
    Switching { from: u32, to: u32 },
}

/// The active-identity cursor plus its usage/failure counters, layered on
/// top of an [`IdentityRegistry`] snapshot by the dispatch loop. Not owned
/// by the registry: the registry only knows which indices exist.
pub struct ActiveIdentityCursor {
    state: RwLock<CursorState>,
    usage_count: AtomicU32,
    failure_count: AtomicU32,
}

impl ActiveIdentityCursor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(CursorState::Idle),
            usage_count: AtomicU32::new(0),
            failure_count: AtomicU32::new(0),
        })
    }

    pub async fn state(&self) -> CursorState {
        *self.state.read().await
    }

    pub fn usage_count(&self) -> u32 {
        self.usage_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// `Idle -> Active(i0)`. No-op if already active or switching.
    pub async fn activate_first(&self, registry: &IdentityRegistry) -> Option<u32> {
        let mut state = self.state.write().await;
        if *state != CursorState::Idle {
            return self.current_index(&state);
        }
        let first = registry.first_valid()?;
        *state = CursorState::Active(first);
        self.usage_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        Some(first)
    }

    fn current_index(&self, state: &CursorState) -> Option<u32> {
        match state {
            CursorState::Idle => None,
            CursorState::Active(i) => Some(*i),
            CursorState::Switching { to, .. } => Some(*to),
        }
    }

    /// Begins `Active(i) -> Switching(i -> next(i))`. Returns the target
    /// index if a switch was started, `None` if already switching or no
    /// other identity exists.
    pub async fn begin_switch(&self, registry: &IdentityRegistry, explicit: Option<u32>) -> Option<u32> {
        let mut state = self.state.write().await;
        let from = match *state {
            CursorState::Active(i) => i,
            CursorState::Idle => return None,
            CursorState::Switching { .. } => return None,
        };
        let to = match explicit {
            Some(target) if registry.get(target).is_some() => target,
            Some(_) => return None,
            None => registry.next_after(from)?,
        };
        *state = CursorState::Switching { from, to };
        Some(to)
    }

    /// `Switching(_, j) -> Active(j)`, resetting counters to zero.
    pub async fn complete_switch(&self) {
        let mut state = self.state.write().await;
        if let CursorState::Switching { to, .. } = *state {
            *state = CursorState::Active(to);
            self.usage_count.store(0, Ordering::Relaxed);
            self.failure_count.store(0, Ordering::Relaxed);
        }
    }

    /// `Switching(_, j) -> Switching(j -> next(j))` when launching `j` failed.
    /// Returns the next candidate, or `None` once a full cycle has been
    /// attempted, in which case the cursor falls back to `Idle`.
    pub async fn retry_switch(&self, registry: &IdentityRegistry) -> Option<u32> {
        let mut state = self.state.write().await;
        let CursorState::Switching { to, .. } = *state else {
            return None;
        };
        match registry.next_after(to) {
            Some(next) if next != to => {
                *state = CursorState::Switching { from: to, to: next };
                Some(next)
            }
            _ => {
                *state = CursorState::Idle;
                None
            }
        }
    }

    pub async fn force_idle(&self) {
        *self.state.write().await = CursorState::Idle;
    }

    pub fn record_success(&self) {
        self.usage_count.fetch_add(1, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) -> u32 {
        self.failure_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Re-aligns the cursor after a registry reload shrinks the valid set:
    /// `Active(i)` snaps to the first valid index `>= i` if `i` vanished.
    pub async fn realign(&self, registry: &IdentityRegistry) {
        let mut state = self.state.write().await;
        if let CursorState::Active(i) = *state
            && registry.get(i).is_none()
        {
            match registry.nearest_at_or_after(i) {
                Some(snapped) => *state = CursorState::Active(snapped),
                None => *state = CursorState::Idle,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::IdentityRegistry;
    use std::path::Path;

    fn empty_registry() -> IdentityRegistry {
        IdentityRegistry::scan(Path::new("/nonexistent")).unwrap()
    }

    #[tokio::test]
    async fn activate_first_resets_counters() {
        let cursor = ActiveIdentityCursor::new();
        let registry = empty_registry();
        assert_eq!(cursor.activate_first(&registry).await, None);
        assert_eq!(cursor.usage_count(), 0);
        assert_eq!(cursor.failure_count(), 0);
    }

    #[tokio::test]
    async fn begin_switch_requires_active_state() {
        let cursor = ActiveIdentityCursor::new();
        let registry = empty_registry();
        assert_eq!(cursor.begin_switch(&registry, None).await, None);
    }
}
