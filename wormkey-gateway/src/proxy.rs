//! Viewer-to-agent proxying.
//!
//! The catch-all handler: resolve the slug, run the gate, open a stream on
//! the tunnel, pump the request body, then wait for the dispatcher to hand
//! back a response. All writes toward the viewer happen on the dispatcher
//! side; after the pump is launched this handler is purely a waiter.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Request, Response};
use futures_util::StreamExt;
use tokio::spawn;
use tracing::debug;
use wormkey_core::frame::Frame;
use wormkey_core::http::serialize_request_head;

use crate::gate;
use crate::pages;
use crate::slug::{self, SlugSource};
use crate::stream::StreamContext;
use crate::tunnel::TunnelConnection;
use crate::AppState;

/// Request bodies are forwarded in chunks of this size.
const BODY_CHUNK_SIZE: usize = 32 * 1024;

pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
) -> Response<Body> {
    let Some((slug, source)) = slug::resolve(&mut request) else {
        return pages::invalid_slug();
    };
    let Some(tunnel) = state.registry.get(&slug) else {
        debug!("no tunnel registered for {slug}");
        return pages::not_active();
    };

    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let admission = match gate::check(
        &tunnel,
        &state.sync,
        request.headers(),
        &path,
        &query,
        &remote.ip().to_string(),
    )
    .await
    {
        Ok(admission) => admission,
        Err(response) => return response,
    };

    let stream_id = tunnel.next_stream_id();
    let request_uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let head = serialize_request_head(
        request.method().as_str(),
        &request_uri,
        request
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    );
    if tunnel.write_frame(Frame::open(stream_id, head)).await.is_err() {
        // The stream context was never registered; nothing to clean up
        return pages::with_cookies(pages::tunnel_write_failed(), &admission.cookies);
    }

    // The routing cookie is set only when this request named the slug
    // unambiguously, not on later cookie-driven asset requests.
    let slug_named = matches!(source, SlugSource::Path | SlugSource::Query)
        || slug::from_host(slug::host_of(&request)).as_deref() == Some(slug.as_str());
    let (ctx, response_rx) = StreamContext::new(
        slug.clone(),
        admission.owner,
        slug_named.then(|| slug.clone()),
        admission.cookies,
    );
    tunnel.active_streams.fetch_add(1, Ordering::SeqCst);
    tunnel.streams.insert(stream_id, ctx);

    let has_body = has_request_body(request.headers());
    let body = request.into_body();
    if has_body {
        let tunnel = tunnel.clone();
        spawn(async move {
            pump_request_body(tunnel, stream_id, body).await;
        });
    } else {
        let _ = tunnel.write_frame(Frame::end(stream_id)).await;
    }

    match response_rx.await {
        Ok(response) => response,
        // The tunnel tore down (or the stream was cancelled) before any
        // headers arrived
        Err(_) => pages::not_active(),
    }
}

/// Forward the request body as DATA frames, then END. Read errors and write
/// failures both stop the pump; END is emitted regardless so the agent side
/// can finish the origin request.
async fn pump_request_body(tunnel: Arc<TunnelConnection>, stream_id: u32, body: Body) {
    let mut stream = body.into_data_stream();
    'read: while let Some(chunk) = stream.next().await {
        let Ok(data) = chunk else { break };
        for take in body_chunks(data) {
            if tunnel
                .write_frame(Frame::data(stream_id, take))
                .await
                .is_err()
            {
                break 'read;
            }
        }
    }
    let _ = tunnel.write_frame(Frame::end(stream_id)).await;
}

/// Split one read into DATA-frame-sized pieces.
fn body_chunks(mut data: bytes::Bytes) -> impl Iterator<Item = bytes::Bytes> {
    std::iter::from_fn(move || {
        if data.is_empty() {
            return None;
        }
        Some(data.split_to(data.len().min(BODY_CHUNK_SIZE)))
    })
}

fn has_request_body(headers: &HeaderMap) -> bool {
    if let Some(length) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
    {
        return length != 0;
    }
    headers.contains_key(header::TRANSFER_ENCODING)
}
