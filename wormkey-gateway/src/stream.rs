//! Per-stream response assembly.
//!
//! A stream context is created when a viewer request is admitted and lives
//! in the tunnel's stream table until END/CANCEL or tunnel teardown. The
//! frame dispatcher drives it: RESP_HEADERS starts the viewer response,
//! DATA feeds the body, END/CANCEL finish it. The channel endpoints double
//! as the done signal; dropping them unblocks the waiting viewer handler
//! and terminates the body.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use wormkey_core::http::ResponseHead;

use crate::overlay;
use crate::util;

/// A response on its way to one viewer.
pub type ViewerResponse = Response<Body>;

type BodySender = mpsc::UnboundedSender<Result<Bytes, Infallible>>;

enum Delivery {
    /// Nothing received from the agent yet.
    AwaitingHeaders,
    /// Headers sent to the viewer; DATA flows through the body channel.
    Streaming(BodySender),
    /// Owner HTML response being buffered for overlay injection.
    Buffering {
        status: u16,
        headers: HeaderMap,
        buf: BytesMut,
    },
    Finished,
}

pub struct StreamContext {
    response_tx: Option<oneshot::Sender<ViewerResponse>>,
    delivery: Delivery,
    /// Inject the owner overlay into HTML responses.
    overlay_mode: bool,
    /// Set the routing cookie on the response when the request named the
    /// slug explicitly.
    set_cookie_slug: Option<String>,
    /// Cookies minted by the gate (viewer id, persisted password).
    cookies: Vec<String>,
    slug: String,
}

impl StreamContext {
    pub fn new(
        slug: String,
        overlay_mode: bool,
        set_cookie_slug: Option<String>,
        cookies: Vec<String>,
    ) -> (Self, oneshot::Receiver<ViewerResponse>) {
        let (response_tx, response_rx) = oneshot::channel();
        let ctx = Self {
            response_tx: Some(response_tx),
            delivery: Delivery::AwaitingHeaders,
            overlay_mode,
            set_cookie_slug,
            cookies,
            slug,
        };
        (ctx, response_rx)
    }

    /// Handle RESP_HEADERS. Duplicate header frames are dropped.
    pub fn on_headers(&mut self, head: ResponseHead) {
        if !matches!(self.delivery, Delivery::AwaitingHeaders) {
            return;
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &head.headers {
            let name = match HeaderName::try_from(name.as_str()) {
                Ok(name) => name,
                Err(_) => continue,
            };
            let Ok(value) = HeaderValue::try_from(value.as_str()) else {
                continue;
            };
            headers.insert(name, value);
        }

        let html = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(overlay::is_html)
            .unwrap_or(false);
        if self.overlay_mode && html {
            // Hold the status; the body is spliced and flushed at END.
            self.delivery = Delivery::Buffering {
                status: head.status,
                headers,
                buf: BytesMut::new(),
            };
            return;
        }

        strip_hop_by_hop(&mut headers);
        self.append_gateway_cookies(&mut headers);

        let (body_tx, body_rx) = mpsc::unbounded_channel();
        let body = Body::from_stream(UnboundedReceiverStream::new(body_rx));
        self.send_response(build_response(head.status, headers, body));
        self.delivery = Delivery::Streaming(body_tx);
    }

    /// Handle a DATA frame. Data before headers is dropped; the protocol
    /// requires headers first and nothing here reorders.
    pub fn on_data(&mut self, chunk: Bytes) {
        match &mut self.delivery {
            Delivery::Streaming(body_tx) => {
                // A closed receiver means the viewer went away; keep
                // draining frames until the agent ends the stream.
                let _ = body_tx.send(Ok(chunk));
            }
            Delivery::Buffering { buf, .. } => buf.extend_from_slice(&chunk),
            Delivery::AwaitingHeaders | Delivery::Finished => {}
        }
    }

    /// Finish the stream. END flushes a buffered overlay response; CANCEL
    /// and teardown drop everything, which fires the done signal on its
    /// own.
    pub fn finish(mut self, flush_overlay: bool) {
        let delivery = std::mem::replace(&mut self.delivery, Delivery::Finished);
        if !flush_overlay {
            return;
        }
        if let Delivery::Buffering {
            status,
            mut headers,
            buf,
        } = delivery
        {
            let body = overlay::inject(buf.freeze(), &self.slug);
            strip_hop_by_hop(&mut headers);
            headers.remove(header::TRANSFER_ENCODING);
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
            self.append_gateway_cookies(&mut headers);
            self.send_response(build_response(status, headers, Body::from(body)));
        }
    }

    fn send_response(&mut self, response: ViewerResponse) {
        if let Some(sender) = self.response_tx.take() {
            let _ = sender.send(response);
        }
    }

    fn append_gateway_cookies(&self, headers: &mut HeaderMap) {
        for cookie in &self.cookies {
            if let Ok(value) = HeaderValue::try_from(cookie.as_str()) {
                headers.append(header::SET_COOKIE, value);
            }
        }
        if let Some(slug) = &self.set_cookie_slug {
            let cookie = util::set_cookie_value("wormkey_slug", slug, false);
            if let Ok(value) = HeaderValue::try_from(cookie) {
                headers.append(header::SET_COOKIE, value);
            }
            // The routing cookie must survive fresh loads, so the response
            // carrying it is uncacheable.
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            );
        }
    }
}

fn build_response(status: u16, headers: HeaderMap, body: Body) -> ViewerResponse {
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    *response.headers_mut() = headers;
    response
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);
    headers.remove(HeaderName::from_static("keep-alive"));
}
