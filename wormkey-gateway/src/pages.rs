//! Static HTML pages surfaced to viewers when a request cannot be proxied.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

fn html_page(status: StatusCode, title: &str, message: &str) -> Response<Body> {
    let code = status.as_u16();
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="font-family:ui-sans-serif,system-ui,sans-serif;max-width:32rem;margin:4rem auto;padding:2rem;text-align:center">
<h1 style="font-size:1.25rem;font-weight:600">{code} {title}</h1>
<p style="color:#64748b;margin-top:0.5rem">{message}</p>
</body>
</html>"#
    );

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Append minted `Set-Cookie` values to a page response.
pub fn with_cookies(mut response: Response<Body>, cookies: &[String]) -> Response<Body> {
    for cookie in cookies {
        if let Ok(value) = HeaderValue::try_from(cookie.as_str()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// 404: the request names no wormhole at all.
pub fn invalid_slug() -> Response<Body> {
    html_page(
        StatusCode::NOT_FOUND,
        "Invalid slug",
        "This request does not name a wormhole. Open a <code>/s/&lt;slug&gt;</code> link or pass a <code>slug</code> query parameter.",
    )
}

/// 502: a slug resolved but no agent is connected for it.
pub fn not_active() -> Response<Body> {
    html_page(
        StatusCode::BAD_GATEWAY,
        "Wormhole not active",
        "No tunnel is connected for this host. Run <code>wormkey http &lt;port&gt;</code> to open a wormhole.",
    )
}

/// 401: the owner has made the wormhole private.
pub fn locked() -> Response<Body> {
    html_page(
        StatusCode::UNAUTHORIZED,
        "Wormhole locked",
        "The owner has locked this wormhole. Only the owner can browse it right now.",
    )
}

/// 401: a shared password is set and the request did not present it.
pub fn password_required() -> Response<Body> {
    html_page(
        StatusCode::UNAUTHORIZED,
        "Password required",
        "This wormhole is password protected. Append <code>?wormkey_password=&lt;password&gt;</code> to the URL.",
    )
}

/// 403: this viewer was kicked by the owner.
pub fn removed() -> Response<Body> {
    html_page(
        StatusCode::FORBIDDEN,
        "Viewer removed",
        "The owner has removed you from this wormhole.",
    )
}

/// 429: the concurrent viewer cap is reached.
pub fn too_many_viewers() -> Response<Body> {
    html_page(
        StatusCode::TOO_MANY_REQUESTS,
        "Too many viewers",
        "This wormhole is at its viewer limit. Try again in a moment.",
    )
}

/// 403: the owner blocked this path prefix.
pub fn blocked() -> Response<Body> {
    html_page(
        StatusCode::FORBIDDEN,
        "Path blocked",
        "The owner has blocked this path.",
    )
}

/// 502: the OPEN frame could not be written to the agent channel.
pub fn tunnel_write_failed() -> Response<Body> {
    html_page(
        StatusCode::BAD_GATEWAY,
        "Tunnel write failed",
        "The wormhole dropped while forwarding this request. The agent must reconnect.",
    )
}
