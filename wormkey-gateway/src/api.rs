//! Owner API under `/.wormkey/`.
//!
//! Everything here resolves the slug the same way the proxy does, then
//! authenticates the owner by cookie. Mutations release their locks before
//! the control-plane sync fires.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Request, Response, StatusCode};
use axum::response::{IntoResponse, Json};
use serde_json::json;
use tracing::info;

use crate::gate;
use crate::overlay;
use crate::policy::PolicyPatch;
use crate::slug;
use crate::tunnel::TunnelConnection;
use crate::util;
use crate::AppState;

/// Owner API request bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Serve the static overlay asset.
pub async fn overlay_script() -> impl IntoResponse {
    (
        [
            (
                header::CONTENT_TYPE,
                "application/javascript; charset=utf-8",
            ),
            (header::CACHE_CONTROL, "no-cache, must-revalidate"),
        ],
        overlay::OVERLAY_SCRIPT,
    )
}

fn resolve_tunnel(
    state: &AppState,
    request: &mut Request<Body>,
) -> Result<(String, Arc<TunnelConnection>), Response<Body>> {
    let Some((slug, _)) = slug::resolve(request) else {
        return Err((StatusCode::BAD_REQUEST, "Missing slug").into_response());
    };
    match state.registry.get(&slug) {
        Some(tunnel) => Ok((slug, tunnel)),
        None => Err((StatusCode::SERVICE_UNAVAILABLE, "Tunnel not connected").into_response()),
    }
}

fn resolve_owner(
    state: &AppState,
    request: &mut Request<Body>,
) -> Result<(String, Arc<TunnelConnection>), Response<Body>> {
    let (slug, tunnel) = resolve_tunnel(state, request)?;
    if !gate::is_owner(&tunnel, request.headers()) {
        return Err((StatusCode::FORBIDDEN, "Forbidden").into_response());
    }
    Ok((slug, tunnel))
}

/// `GET /.wormkey/owner?token=` proves ownership once; cookies carry it after.
pub async fn owner_entry(
    State(state): State<AppState>,
    mut request: Request<Body>,
) -> Response<Body> {
    let (slug, tunnel) = match resolve_tunnel(&state, &mut request) {
        Ok(found) => found,
        Err(response) => return response,
    };
    let token =
        util::query_param(request.uri().query().unwrap_or(""), "token").unwrap_or_default();
    if token.is_empty() || token != tunnel.owner_token {
        return (StatusCode::UNAUTHORIZED, "Invalid owner token").into_response();
    }

    let Ok(location) = HeaderValue::try_from(format!("/s/{slug}")) else {
        return (StatusCode::BAD_REQUEST, "Invalid slug").into_response();
    };
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(header::LOCATION, location);
    for cookie in [
        util::set_cookie_value("wormkey_slug", &slug, false),
        util::set_cookie_value("wormkey", &slug, false),
        util::set_cookie_value("wormkey_owner", &token, true),
    ] {
        if let Ok(value) = HeaderValue::try_from(cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// `GET /.wormkey/me` reports whether the request holds the owner cookie.
pub async fn me(State(state): State<AppState>, mut request: Request<Body>) -> Response<Body> {
    let owner = slug::resolve(&mut request)
        .and_then(|(slug, _)| state.registry.get(&slug))
        .map(|tunnel| gate::is_owner(&tunnel, request.headers()))
        .unwrap_or(false);
    Json(json!({ "owner": owner })).into_response()
}

/// `GET /.wormkey/urls` returns the shareable and owner entry URLs.
pub async fn urls(State(state): State<AppState>, mut request: Request<Body>) -> Response<Body> {
    let (slug, tunnel) = match resolve_owner(&state, &mut request) {
        Ok(found) => found,
        Err(response) => return response,
    };
    let base = state
        .config
        .configured_public_base()
        .unwrap_or_else(|| format!("http://{}", slug::host_of(&request)));
    Json(json!({
        "publicUrl": format!("{base}/s/{slug}"),
        "ownerUrl": format!("{base}/.wormkey/owner?slug={slug}&token={}", tunnel.owner_token),
    }))
    .into_response()
}

/// `GET /.wormkey/state` returns the owner snapshot of policy, viewers, and streams.
pub async fn state_snapshot(
    State(state): State<AppState>,
    mut request: Request<Body>,
) -> Response<Body> {
    let (slug, tunnel) = match resolve_owner(&state, &mut request) {
        Ok(found) => found,
        Err(response) => return response,
    };
    let policy = tunnel.policy.read().await.clone();
    let (viewers, kicked_ids) = {
        let table = tunnel.viewers.read().await;
        (table.snapshot(), table.kicked_ids())
    };
    Json(json!({
        "slug": slug,
        "owner": true,
        "activeViewers": viewers.len(),
        "activeStreams": tunnel.active_streams.load(std::sync::atomic::Ordering::SeqCst),
        "viewers": viewers,
        "kickedViewerIds": kicked_ids,
        "policy": policy,
    }))
    .into_response()
}

/// `POST /.wormkey/policy` patches any subset of the policy.
pub async fn update_policy(
    State(state): State<AppState>,
    mut request: Request<Body>,
) -> Response<Body> {
    let (slug, tunnel) = match resolve_owner(&state, &mut request) {
        Ok(found) => found,
        Err(response) => return response,
    };
    let bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid body").into_response(),
    };
    let patch: PolicyPatch = match serde_json::from_slice(&bytes) {
        Ok(patch) => patch,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response(),
    };

    let policy = {
        let mut policy = tunnel.policy.write().await;
        policy.apply(patch);
        policy.clone()
    };
    state.sync.sync_policy(&slug, &policy);
    Json(json!({ "ok": true, "policy": policy })).into_response()
}

/// `POST /.wormkey/kick?id=` bans a viewer for the rest of the tunnel lifetime.
pub async fn kick_viewer(
    State(state): State<AppState>,
    mut request: Request<Body>,
) -> Response<Body> {
    let (slug, tunnel) = match resolve_owner(&state, &mut request) {
        Ok(found) => found,
        Err(response) => return response,
    };
    let Some(viewer_id) = util::query_param(request.uri().query().unwrap_or(""), "id") else {
        return (StatusCode::BAD_REQUEST, "Missing viewer id").into_response();
    };
    tunnel.viewers.write().await.kick(&viewer_id);
    state.sync.sync_kick(&slug, &viewer_id);
    info!("viewer {viewer_id} kicked from {slug}");
    Json(json!({ "ok": true, "viewerId": viewer_id })).into_response()
}

/// `POST /.wormkey/rotate-password` mints a fresh shared password.
pub async fn rotate_password(
    State(state): State<AppState>,
    mut request: Request<Body>,
) -> Response<Body> {
    let (slug, tunnel) = match resolve_owner(&state, &mut request) {
        Ok(found) => found,
        Err(response) => return response,
    };
    let password = util::random_hex(4);
    let policy = {
        let mut policy = tunnel.policy.write().await;
        policy.password = password.clone();
        policy.clone()
    };
    state.sync.sync_policy(&slug, &policy);
    Json(json!({ "ok": true, "password": password })).into_response()
}

/// `POST /.wormkey/close` tears the tunnel down and bars the slug for good.
pub async fn close_tunnel(
    State(state): State<AppState>,
    mut request: Request<Body>,
) -> Response<Body> {
    let (slug, tunnel) = match resolve_owner(&state, &mut request) {
        Ok(found) => found,
        Err(response) => return response,
    };
    state.registry.remove(&slug);
    state.registry.tombstone(&slug);
    state.sync.sync_close(&slug);
    tunnel.close().await;
    info!("wormhole {slug} closed by owner");
    Json(json!({ "ok": true })).into_response()
}
