//! Best-effort control-plane session sync.
//!
//! The control plane persists per-slug session state across gateway
//! restarts. Every call here is fire-and-forget: failures are logged at
//! debug level and local state wins. Nothing on the viewer request path
//! ever waits on it.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::policy::Policy;
use crate::viewer::ViewerState;

/// Session state persisted by the control plane, fetched at agent connect.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub owner_token: String,
    #[serde(default = "zeroed_policy")]
    pub policy: Policy,
    #[serde(default)]
    pub kicked_viewer_ids: Vec<String>,
    #[serde(default)]
    pub active_viewers: Vec<ViewerState>,
    #[serde(default)]
    pub closed: bool,
}

fn zeroed_policy() -> Policy {
    Policy {
        public: false,
        max_concurrent_viewers: 0,
        block_paths: Vec::new(),
        password: String::new(),
    }
}

/// JSON client for the control plane. Constructed once at startup.
pub struct ControlPlaneClient {
    base: Option<String>,
    http: reqwest::Client,
}

impl ControlPlaneClient {
    /// An empty base URL disables every call.
    pub fn new(base: String) -> Self {
        let base = {
            let trimmed = base.trim_end_matches('/');
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { base, http }
    }

    pub fn enabled(&self) -> bool {
        self.base.is_some()
    }

    fn session_url(&self, slug: &str, suffix: &str) -> Option<String> {
        self.base
            .as_ref()
            .map(|base| format!("{base}/sessions/by-slug/{slug}{suffix}"))
    }

    /// Fetch the persisted session for a slug at agent connect. Any failure
    /// is treated as "no record".
    pub async fn fetch_session(&self, slug: &str) -> Option<PersistedSession> {
        let url = self.session_url(slug, "")?;
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(slug, "control-plane fetch failed: {err}");
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }

    fn post_json(&self, slug: &str, suffix: &str, body: serde_json::Value) {
        let Some(url) = self.session_url(slug, suffix) else {
            return;
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            if let Err(err) = http.post(&url).json(&body).send().await {
                debug!("control-plane post to {url} failed: {err}");
            }
        });
    }

    pub fn sync_policy(&self, slug: &str, policy: &Policy) {
        self.post_json(slug, "/policy", json!(policy));
    }

    pub fn sync_viewers(&self, slug: &str, viewers: &[ViewerState]) {
        self.post_json(slug, "/viewers", json!({ "viewers": viewers }));
    }

    pub fn sync_kick(&self, slug: &str, viewer_id: &str) {
        self.post_json(slug, "/kick", json!({ "viewerId": viewer_id }));
    }

    pub fn sync_close(&self, slug: &str) {
        self.post_json(slug, "/close", json!({}));
    }
}
