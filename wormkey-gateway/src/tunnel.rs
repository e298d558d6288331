//! Tunnel connections: the persistent agent channel and its frame
//! dispatcher.
//!
//! One agent holds one WebSocket to the gateway. The write half sits behind
//! a single mutex because it is not safe for concurrent writers; the read
//! half is consumed by exactly one loop, which is the only place inbound
//! frames are dispatched and the only place stream contexts are removed.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, warn};
use wormkey_core::frame::{Frame, FrameType};
use wormkey_core::http::parse_response_head;
use wormkey_core::Credential;

use crate::policy::Policy;
use crate::stream::StreamContext;
use crate::sync::PersistedSession;
use crate::viewer::ViewerTable;
use crate::AppState;

type AgentSink = SplitSink<WebSocket, Message>;

/// One live agent channel and the state attached to it.
pub struct TunnelConnection {
    pub slug: String,
    /// Empty when nobody can prove ownership of this tunnel.
    pub owner_token: String,
    /// Write half of the transport. Taken on close so late writers fail
    /// fast instead of writing into a dead socket.
    writer: Mutex<Option<AgentSink>>,
    /// Next stream id to issue; 0 is reserved for the control stream.
    next_stream_id: AtomicU32,
    /// In-flight streams. Inserted by the proxy handler after a successful
    /// OPEN write; removed only by the dispatcher.
    pub streams: DashMap<u32, StreamContext>,
    pub policy: RwLock<Policy>,
    pub viewers: RwLock<ViewerTable>,
    pub active_streams: AtomicI64,
    closed: AtomicBool,
    close_notify: Notify,
}

impl TunnelConnection {
    pub fn new(slug: String, owner_token: String, writer: AgentSink) -> Self {
        Self::build(slug, owner_token, Some(writer))
    }

    /// A connection with no transport, for exercising the state machinery
    /// in tests.
    #[cfg(test)]
    pub fn new_detached(slug: String, owner_token: String) -> Self {
        Self::build(slug, owner_token, None)
    }

    fn build(slug: String, owner_token: String, writer: Option<AgentSink>) -> Self {
        Self {
            slug,
            owner_token,
            writer: Mutex::new(writer),
            next_stream_id: AtomicU32::new(1),
            streams: DashMap::new(),
            policy: RwLock::new(Policy::default()),
            viewers: RwLock::new(ViewerTable::default()),
            active_streams: AtomicI64::new(0),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    /// Issue the next stream id. Strictly increasing for the lifetime of
    /// the tunnel and never 0.
    pub fn next_stream_id(&self) -> u32 {
        self.next_stream_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Write one frame to the agent. Every emission goes through the one
    /// writer mutex so frames are never interleaved mid-bytes.
    pub async fn write_frame(&self, frame: Frame) -> Result<(), axum::Error> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink.send(Message::Binary(frame.encode().to_vec())).await,
            None => Err(axum::Error::new(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "agent transport closed",
            ))),
        }
    }

    /// Merge persisted session state fetched from the control plane.
    /// The persisted policy wins only when it carries any signal; kicked
    /// ids and active viewers are seeded as-is.
    pub async fn hydrate(&self, session: PersistedSession) {
        if session.policy.is_configured() {
            *self.policy.write().await = session.policy;
        }
        let mut viewers = self.viewers.write().await;
        for id in session.kicked_viewer_ids {
            viewers.ban(id);
        }
        for viewer in session.active_viewers {
            viewers.insert(viewer);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Force-close the tunnel: drop the write half and wake the read loop,
    /// which then tears down the streams and unregisters.
    pub async fn close(&self) {
        self.writer.lock().await.take();
        self.closed.store(true, Ordering::Release);
        self.close_notify.notify_waiters();
    }

    /// Resolve when [`close`](Self::close) is called.
    pub async fn wait_closed(&self) {
        let notified = self.close_notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Drain every in-flight stream, firing their done signals so the
    /// waiting viewer handlers return.
    pub async fn teardown(&self) {
        self.writer.lock().await.take();
        let ids: Vec<u32> = self.streams.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, ctx)) = self.streams.remove(&id) {
                self.active_streams.fetch_sub(1, Ordering::SeqCst);
                ctx.finish(false);
            }
        }
    }

    /// Dispatch one inbound message from the agent. Undecodable frames and
    /// frames for unknown streams are dropped.
    pub async fn dispatch(&self, data: &[u8]) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("dropping frame from {}: {err}", self.slug);
                return;
            }
        };
        match frame.frame_type {
            FrameType::Ping => {
                let _ = self.write_frame(Frame::pong()).await;
            }
            FrameType::Pong => {}
            FrameType::RespHeaders => {
                let head = parse_response_head(&frame.payload);
                if let Some(mut ctx) = self.streams.get_mut(&frame.stream_id) {
                    ctx.on_headers(head);
                }
            }
            FrameType::Data => {
                if let Some(mut ctx) = self.streams.get_mut(&frame.stream_id) {
                    ctx.on_data(frame.payload);
                }
            }
            FrameType::End => self.finish_stream(frame.stream_id, true),
            FrameType::Cancel => self.finish_stream(frame.stream_id, false),
            FrameType::Open => {
                debug!("unexpected OPEN from agent on {}", self.slug);
            }
        }
    }

    fn finish_stream(&self, stream_id: u32, flush_overlay: bool) {
        if let Some((_, ctx)) = self.streams.remove(&stream_id) {
            self.active_streams.fetch_sub(1, Ordering::SeqCst);
            ctx.finish(flush_overlay);
        }
    }
}

/// Agent handshake at `GET /tunnel`.
///
/// The credential is checked and the session hydrated before the upgrade
/// completes, so rejected agents get a plain HTTP status instead of a dead
/// socket.
pub async fn tunnel_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let credential = match Credential::parse(authorization) {
        Ok(credential) => credential,
        Err(err) => {
            return (StatusCode::UNAUTHORIZED, format!("{err}")).into_response();
        }
    };

    if state.registry.is_tombstoned(&credential.slug) {
        return (StatusCode::GONE, "Wormhole closed").into_response();
    }

    let session = state.sync.fetch_session(&credential.slug).await;
    if let Some(session) = &session {
        if session.closed {
            state.registry.tombstone(&credential.slug);
            return (StatusCode::GONE, "Wormhole closed").into_response();
        }
        if !session.owner_token.is_empty()
            && !credential.owner_token.is_empty()
            && session.owner_token != credential.owner_token
        {
            warn!("owner token mismatch for {}", credential.slug);
            return (StatusCode::UNAUTHORIZED, "Owner token mismatch").into_response();
        }
    }

    ws.on_upgrade(move |socket| run_tunnel(socket, credential, session, state))
}

/// The owner token for a fresh tunnel: the agent's claim, or the persisted
/// one when the agent made none.
fn effective_owner_token(credential: &Credential, session: Option<&PersistedSession>) -> String {
    if !credential.owner_token.is_empty() {
        return credential.owner_token.clone();
    }
    session
        .map(|session| session.owner_token.clone())
        .unwrap_or_default()
}

async fn run_tunnel(
    socket: WebSocket,
    credential: Credential,
    session: Option<PersistedSession>,
    state: AppState,
) {
    let (writer, mut reader) = socket.split();

    let owner_token = effective_owner_token(&credential, session.as_ref());
    let tunnel = Arc::new(TunnelConnection::new(credential.slug, owner_token, writer));
    if let Some(session) = session {
        tunnel.hydrate(session).await;
    }

    if let Some(displaced) = state.registry.register(tunnel.clone()) {
        info!("replacing prior tunnel for {}", tunnel.slug);
        displaced.close().await;
    }

    loop {
        tokio::select! {
            message = reader.next() => match message {
                Some(Ok(Message::Binary(data))) => tunnel.dispatch(&data).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("transport error on {}: {err}", tunnel.slug);
                    break;
                }
            },
            _ = tunnel.wait_closed() => break,
        }
    }

    tunnel.teardown().await;
    state.registry.unregister_if_current(&tunnel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use wormkey_core::http::serialize_request_head;

    fn detached(slug: &str) -> TunnelConnection {
        TunnelConnection::new_detached(slug.to_string(), String::new())
    }

    #[test]
    fn test_stream_ids_increase_from_one() {
        let tunnel = detached("demo");
        let ids: Vec<u32> = (0..5).map(|_| tunnel.next_stream_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(ids.iter().all(|&id| id != 0));
    }

    #[tokio::test]
    async fn test_write_frame_fails_when_detached() {
        let tunnel = detached("demo");
        let head = serialize_request_head("GET", "/", std::iter::empty());
        assert!(tunnel.write_frame(Frame::open(1, head)).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_drives_a_stream_to_completion() {
        let tunnel = detached("demo");
        let (ctx, response_rx) =
            StreamContext::new("demo".to_string(), false, None, Vec::new());
        let stream_id = tunnel.next_stream_id();
        tunnel.active_streams.fetch_add(1, Ordering::SeqCst);
        tunnel.streams.insert(stream_id, ctx);

        let headers = Frame::new(
            FrameType::RespHeaders,
            stream_id,
            Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n"),
        );
        tunnel.dispatch(&headers.encode()).await;
        tunnel
            .dispatch(&Frame::data(stream_id, Bytes::from_static(b"hi")).encode())
            .await;
        tunnel.dispatch(&Frame::end(stream_id).encode()).await;

        let response = response_rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hi");
        assert!(tunnel.streams.is_empty());
        assert_eq!(tunnel.active_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_fires_done_without_response() {
        let tunnel = detached("demo");
        let (ctx, response_rx) =
            StreamContext::new("demo".to_string(), false, None, Vec::new());
        tunnel.active_streams.fetch_add(1, Ordering::SeqCst);
        tunnel.streams.insert(1, ctx);

        tunnel.dispatch(&Frame::cancel(1).encode()).await;
        assert!(response_rx.await.is_err());
        assert!(tunnel.streams.is_empty());
    }

    #[tokio::test]
    async fn test_frames_for_unknown_streams_are_dropped() {
        let tunnel = detached("demo");
        tunnel
            .dispatch(&Frame::data(99, Bytes::from_static(b"x")).encode())
            .await;
        tunnel.dispatch(&Frame::end(99).encode()).await;
        tunnel.dispatch(b"\x01\x00").await; // short message
        assert!(tunnel.streams.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_drains_all_streams() {
        let tunnel = detached("demo");
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (ctx, response_rx) =
                StreamContext::new("demo".to_string(), false, None, Vec::new());
            let id = tunnel.next_stream_id();
            tunnel.active_streams.fetch_add(1, Ordering::SeqCst);
            tunnel.streams.insert(id, ctx);
            receivers.push(response_rx);
        }

        tunnel.teardown().await;
        assert!(tunnel.streams.is_empty());
        assert_eq!(tunnel.active_streams.load(Ordering::SeqCst), 0);
        for response_rx in receivers {
            assert!(response_rx.await.is_err());
        }
    }

    #[tokio::test]
    async fn test_hydrate_overwrites_only_configured_policy() {
        let tunnel = detached("demo");
        let zeroed = PersistedSession {
            owner_token: String::new(),
            policy: serde_json::from_str("{}").unwrap(),
            kicked_viewer_ids: Vec::new(),
            active_viewers: Vec::new(),
            closed: false,
        };
        tunnel.hydrate(zeroed).await;
        assert_eq!(*tunnel.policy.read().await, Policy::default());

        let configured = PersistedSession {
            owner_token: String::new(),
            policy: serde_json::from_str(r#"{"password": "pw"}"#).unwrap(),
            kicked_viewer_ids: vec!["v1".to_string()],
            active_viewers: Vec::new(),
            closed: false,
        };
        tunnel.hydrate(configured).await;
        assert_eq!(tunnel.policy.read().await.password, "pw");
        assert!(!tunnel.policy.read().await.public);
        assert!(tunnel.viewers.read().await.is_kicked("v1"));
    }

    #[test]
    fn test_effective_owner_token() {
        let claimed = Credential {
            slug: "demo".to_string(),
            owner_token: "mine".to_string(),
        };
        let anonymous = Credential {
            slug: "demo".to_string(),
            owner_token: String::new(),
        };
        let session = PersistedSession {
            owner_token: "persisted".to_string(),
            policy: serde_json::from_str("{}").unwrap(),
            kicked_viewer_ids: Vec::new(),
            active_viewers: Vec::new(),
            closed: false,
        };
        assert_eq!(effective_owner_token(&claimed, Some(&session)), "mine");
        assert_eq!(
            effective_owner_token(&anonymous, Some(&session)),
            "persisted"
        );
        assert_eq!(effective_owner_token(&anonymous, None), "");
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let tunnel = Arc::new(detached("demo"));
        let waiter = {
            let tunnel = tunnel.clone();
            tokio::spawn(async move { tunnel.wait_closed().await })
        };
        tunnel.close().await;
        waiter.await.unwrap();
        assert!(tunnel.is_closed());
        // A waiter arriving after close returns immediately
        tunnel.wait_closed().await;
    }
}
