//! Registry of active tunnels, keyed by slug.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::info;

use crate::tunnel::TunnelConnection;

/// Maps slugs to live tunnels and remembers which slugs were closed for
/// good. At most one tunnel per slug is live at any instant.
#[derive(Default)]
pub struct TunnelRegistry {
    tunnels: DashMap<String, Arc<TunnelConnection>>,
    /// Slugs whose owner issued close; new handshakes for them are
    /// rejected. Unbounded for the lifetime of the process.
    closed_slugs: DashSet<String>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tunnel, displacing any prior tunnel for the same slug.
    /// The single atomic insert is what makes reconnects race-free; the
    /// caller closes whatever comes back.
    pub fn register(&self, tunnel: Arc<TunnelConnection>) -> Option<Arc<TunnelConnection>> {
        info!("tunnel connected: {}", tunnel.slug);
        self.tunnels
            .insert(tunnel.slug.clone(), tunnel.clone())
            .filter(|displaced| !Arc::ptr_eq(displaced, &tunnel))
    }

    /// Remove a tunnel only if it is still the live one for its slug. A
    /// newer reconnect may already own the slot.
    pub fn unregister_if_current(&self, tunnel: &Arc<TunnelConnection>) {
        let removed = self
            .tunnels
            .remove_if(&tunnel.slug, |_, current| Arc::ptr_eq(current, tunnel));
        if removed.is_some() {
            info!("tunnel disconnected: {}", tunnel.slug);
        }
    }

    /// Remove a tunnel unconditionally (owner-initiated close).
    pub fn remove(&self, slug: &str) -> Option<Arc<TunnelConnection>> {
        self.tunnels.remove(slug).map(|(_, tunnel)| tunnel)
    }

    pub fn get(&self, slug: &str) -> Option<Arc<TunnelConnection>> {
        self.tunnels.get(slug).map(|entry| entry.clone())
    }

    pub fn count(&self) -> usize {
        self.tunnels.len()
    }

    pub fn tombstone(&self, slug: &str) {
        self.closed_slugs.insert(slug.to_string());
    }

    pub fn is_tombstoned(&self, slug: &str) -> bool {
        self.closed_slugs.contains(slug)
    }
}
