//! Per-tunnel access policy.

use serde::{Deserialize, Serialize};

/// Access policy for one tunnel. Mutable only through the owner API.
///
/// Deserialization zero-fills missing fields (a persisted record says only
/// what it says); `Default` is the fresh-tunnel policy, which is not zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Whether non-owner viewers are admitted at all.
    #[serde(default)]
    pub public: bool,
    /// Soft cap on concurrently active viewers; 0 disables the cap.
    #[serde(default)]
    pub max_concurrent_viewers: i64,
    /// Path prefixes non-owners may not request.
    #[serde(default)]
    pub block_paths: Vec<String>,
    /// Shared viewer password; empty disables the check.
    #[serde(default)]
    pub password: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            public: true,
            max_concurrent_viewers: 20,
            block_paths: Vec::new(),
            password: String::new(),
        }
    }
}

impl Policy {
    /// Whether a persisted policy carries any signal worth restoring.
    /// A fresh record with every field zeroed does not overwrite local state.
    pub fn is_configured(&self) -> bool {
        self.public
            || self.max_concurrent_viewers > 0
            || !self.block_paths.is_empty()
            || !self.password.is_empty()
    }

    /// Apply a partial owner update.
    pub fn apply(&mut self, patch: PolicyPatch) {
        if let Some(public) = patch.public {
            self.public = public;
        }
        if let Some(max) = patch.max_concurrent_viewers {
            self.max_concurrent_viewers = max;
        }
        if let Some(block_paths) = patch.block_paths {
            self.block_paths = block_paths;
        }
    }
}

/// Owner-supplied partial policy update. The password is rotated through its
/// own endpoint and is deliberately absent here.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPatch {
    pub public: Option<bool>,
    pub max_concurrent_viewers: Option<i64>,
    pub block_paths: Option<Vec<String>>,
}
