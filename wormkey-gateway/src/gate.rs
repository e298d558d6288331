//! Per-request access gate.
//!
//! Every non-owner request passes these checks, in order, before a stream
//! is opened: viewer identity, kicked set, viewer upsert, public flag,
//! password, viewer cap, blocked paths. Each check short-circuits. Owners
//! bypass everything after the identity step.

use axum::body::Body;
use axum::http::{HeaderMap, Response};

use crate::pages;
use crate::sync::ControlPlaneClient;
use crate::tunnel::TunnelConnection;
use crate::util;
use crate::viewer;

/// The outcome of a successful gate pass.
pub struct Admission {
    pub owner: bool,
    /// `Set-Cookie` values minted along the way (viewer id, persisted
    /// password). They ride on whatever response the stream produces.
    pub cookies: Vec<String>,
}

/// Whether the request proves ownership of the tunnel. Requires a non-empty
/// stored token.
pub fn is_owner(tunnel: &TunnelConnection, headers: &HeaderMap) -> bool {
    if tunnel.owner_token.is_empty() {
        return false;
    }
    util::cookie(headers, "wormkey_owner")
        .map(|token| token == tunnel.owner_token)
        .unwrap_or(false)
}

/// Run the gate for one viewer request. `path` is the rewritten
/// (slug-stripped) path; `query` the raw query string.
pub async fn check(
    tunnel: &TunnelConnection,
    sync: &ControlPlaneClient,
    headers: &HeaderMap,
    path: &str,
    query: &str,
    remote_ip: &str,
) -> Result<Admission, Response<Body>> {
    if is_owner(tunnel, headers) {
        return Ok(Admission {
            owner: true,
            cookies: Vec::new(),
        });
    }

    let mut cookies = Vec::new();

    // 1. Viewer identity, minted on first sight
    let viewer_id = match util::cookie(headers, "wormkey_viewer") {
        Some(id) => id,
        None => {
            let id = viewer::mint_viewer_id();
            cookies.push(util::set_cookie_value("wormkey_viewer", &id, false));
            id
        }
    };

    // 2. Kicked viewers stay out for the tunnel's lifetime
    // 3. Everyone else is upserted before any policy check
    {
        let mut viewers = tunnel.viewers.write().await;
        if viewers.is_kicked(&viewer_id) {
            return Err(pages::with_cookies(pages::removed(), &cookies));
        }
        viewers.upsert(&viewer_id, remote_ip);
    }
    let snapshot = tunnel.viewers.read().await.snapshot();
    sync.sync_viewers(&tunnel.slug, &snapshot);

    let policy = tunnel.policy.read().await.clone();

    // 4. Locked wormholes admit owners only
    if !policy.public {
        return Err(pages::with_cookies(pages::locked(), &cookies));
    }

    // 5. Shared password, presented via cookie or query (query persists)
    if !policy.password.is_empty() {
        let mut presented = util::cookie(headers, "wormkey_pass").unwrap_or_default();
        if let Some(query_password) = util::query_param(query, "wormkey_password") {
            if !query_password.is_empty() {
                cookies.push(util::set_cookie_value("wormkey_pass", &query_password, true));
                presented = query_password;
            }
        }
        if presented != policy.password {
            return Err(pages::with_cookies(pages::password_required(), &cookies));
        }
    }

    // 6. Viewer cap, checked against a snapshot; soft under contention
    if policy.max_concurrent_viewers > 0 {
        let active = tunnel.viewers.read().await.active_count();
        if active as i64 >= policy.max_concurrent_viewers {
            return Err(pages::with_cookies(pages::too_many_viewers(), &cookies));
        }
    }

    // 7. Blocked path prefixes
    if policy
        .block_paths
        .iter()
        .any(|prefix| !prefix.is_empty() && path.starts_with(prefix))
    {
        return Err(pages::with_cookies(pages::blocked(), &cookies));
    }

    Ok(Admission {
        owner: false,
        cookies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue, StatusCode};
    use crate::viewer::ViewerState;

    fn sync_client() -> ControlPlaneClient {
        ControlPlaneClient::new(String::new())
    }

    fn tunnel_with_owner(token: &str) -> TunnelConnection {
        TunnelConnection::new_detached("demo".to_string(), token.to_string())
    }

    fn headers_with_cookie(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    async fn run_gate(
        tunnel: &TunnelConnection,
        headers: &HeaderMap,
        path: &str,
        query: &str,
    ) -> Result<Admission, Response<Body>> {
        check(tunnel, &sync_client(), headers, path, query, "1.2.3.4").await
    }

    #[tokio::test]
    async fn test_plain_viewer_is_admitted_with_minted_cookie() {
        let tunnel = tunnel_with_owner("");
        let admission = run_gate(&tunnel, &HeaderMap::new(), "/", "").await.unwrap();
        assert!(!admission.owner);
        assert_eq!(admission.cookies.len(), 1);
        assert!(admission.cookies[0].starts_with("wormkey_viewer="));
        assert_eq!(tunnel.viewers.read().await.active_count(), 1);
    }

    #[tokio::test]
    async fn test_owner_bypasses_every_policy() {
        let tunnel = tunnel_with_owner("tok");
        {
            let mut policy = tunnel.policy.write().await;
            policy.public = false;
            policy.password = "pw".to_string();
            policy.block_paths = vec!["/".to_string()];
            policy.max_concurrent_viewers = 1;
        }
        let headers = headers_with_cookie("wormkey_owner=tok");
        let admission = run_gate(&tunnel, &headers, "/admin", "").await.unwrap();
        assert!(admission.owner);
        assert!(admission.cookies.is_empty());
        // Owners are not tracked as viewers
        assert_eq!(tunnel.viewers.read().await.active_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_owner_token_never_matches() {
        let tunnel = tunnel_with_owner("");
        let headers = headers_with_cookie("wormkey_owner=");
        assert!(!is_owner(&tunnel, &headers));
    }

    #[tokio::test]
    async fn test_locked_rejects_after_upsert() {
        let tunnel = tunnel_with_owner("");
        tunnel.policy.write().await.public = false;
        let response = run_gate(&tunnel, &HeaderMap::new(), "/", "")
            .await
            .err()
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        // The viewer was recorded before the public check fired
        assert_eq!(tunnel.viewers.read().await.active_count(), 1);
    }

    #[tokio::test]
    async fn test_kicked_viewer_stays_out() {
        let tunnel = tunnel_with_owner("");
        tunnel.viewers.write().await.kick("v1");
        let headers = headers_with_cookie("wormkey_viewer=v1");
        for _ in 0..3 {
            let response = run_gate(&tunnel, &headers, "/", "").await.err().unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
        assert_eq!(tunnel.viewers.read().await.active_count(), 0);
    }

    #[tokio::test]
    async fn test_password_from_query_persists_to_cookie() {
        let tunnel = tunnel_with_owner("");
        tunnel.policy.write().await.password = "pw".to_string();

        let admission = run_gate(&tunnel, &HeaderMap::new(), "/", "wormkey_password=pw")
            .await
            .unwrap();
        assert!(admission
            .cookies
            .iter()
            .any(|cookie| cookie.starts_with("wormkey_pass=pw") && cookie.contains("HttpOnly")));

        // Subsequent requests carry the cookie instead
        let headers = headers_with_cookie("wormkey_viewer=v1; wormkey_pass=pw");
        assert!(run_gate(&tunnel, &headers, "/", "").await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let tunnel = tunnel_with_owner("");
        tunnel.policy.write().await.password = "pw".to_string();
        let response = run_gate(&tunnel, &HeaderMap::new(), "/", "wormkey_password=nope")
            .await
            .err()
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_viewer_cap_counts_the_arrival() {
        let tunnel = tunnel_with_owner("");
        tunnel.policy.write().await.max_concurrent_viewers = 2;
        tunnel.viewers.write().await.insert(ViewerState {
            id: "v0".to_string(),
            last_seen_at: String::new(),
            requests: 1,
            ip: String::new(),
        });

        // Second viewer fills the table to the cap and is turned away
        let response = run_gate(&tunnel, &HeaderMap::new(), "/", "").await.err().unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_blocked_path_prefix() {
        let tunnel = tunnel_with_owner("tok");
        tunnel.policy.write().await.block_paths =
            vec![String::new(), "/admin".to_string()];

        let response = run_gate(&tunnel, &HeaderMap::new(), "/admin/users", "")
            .await
            .err()
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // The empty prefix matches nothing
        assert!(run_gate(&tunnel, &HeaderMap::new(), "/other", "").await.is_ok());

        // The owner still gets through
        let headers = headers_with_cookie("wormkey_owner=tok");
        assert!(run_gate(&tunnel, &headers, "/admin/users", "").await.is_ok());
    }
}
