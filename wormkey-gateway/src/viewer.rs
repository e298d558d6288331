//! Viewer tracking for one tunnel.
//!
//! Viewers are identified by a random cookie id and upserted on every
//! non-owner request. The active table and the kicked set live under one
//! lock because every gate decision reads both together.

use std::collections::{HashMap, HashSet};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::util;

/// One viewer as reported to the owner and the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerState {
    pub id: String,
    #[serde(default)]
    pub last_seen_at: String,
    #[serde(default)]
    pub requests: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
}

/// Active viewers plus the kicked set for one tunnel.
#[derive(Debug, Default)]
pub struct ViewerTable {
    viewers: HashMap<String, ViewerState>,
    kicked: HashSet<String>,
}

impl ViewerTable {
    pub fn is_kicked(&self, id: &str) -> bool {
        self.kicked.contains(id)
    }

    /// Record a request from a viewer, creating the entry on first sight.
    pub fn upsert(&mut self, id: &str, ip: &str) {
        let viewer = self.viewers.entry(id.to_string()).or_insert_with(|| ViewerState {
            id: id.to_string(),
            last_seen_at: String::new(),
            requests: 0,
            ip: String::new(),
        });
        viewer.requests += 1;
        viewer.last_seen_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        if !ip.is_empty() {
            viewer.ip = ip.to_string();
        }
    }

    /// Ban a viewer id without touching the active table. Used when seeding
    /// kicked ids from a persisted session.
    pub fn ban(&mut self, id: String) {
        self.kicked.insert(id);
    }

    /// Kick an active viewer: remove it and ban the id for the tunnel's
    /// lifetime.
    pub fn kick(&mut self, id: &str) {
        self.kicked.insert(id.to_string());
        self.viewers.remove(id);
    }

    /// Seed a viewer entry from a persisted session.
    pub fn insert(&mut self, viewer: ViewerState) {
        self.viewers.insert(viewer.id.clone(), viewer);
    }

    pub fn active_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn snapshot(&self) -> Vec<ViewerState> {
        self.viewers.values().cloned().collect()
    }

    pub fn kicked_ids(&self) -> Vec<String> {
        self.kicked.iter().cloned().collect()
    }
}

/// Mint a fresh viewer id: 6 random bytes as hex, with a timestamp-derived
/// fallback when the RNG is unavailable.
pub fn mint_viewer_id() -> String {
    let id = util::random_hex(6);
    if id.is_empty() {
        return format!("viewer-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
    }
    id
}
