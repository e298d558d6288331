//! Slug resolution for viewer requests.
//!
//! A request can name its wormhole four ways, checked in order: the
//! `/s/<slug>` path prefix, a `slug=` query parameter, a routing cookie, or
//! the leftmost DNS label of the Host header. A path match rewrites the
//! request path to the remainder so the slug never reaches the origin.

use axum::body::Body;
use axum::http::uri::{PathAndQuery, Uri};
use axum::http::{header, HeaderMap, Request};

use crate::util;

/// Where the slug was found; decides whether the routing cookie is set on
/// the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugSource {
    Path,
    Query,
    Cookie,
    Host,
}

/// Resolve the slug for a request. On a path match the request URI is
/// rewritten to the remainder (or `/`).
pub fn resolve(request: &mut Request<Body>) -> Option<(String, SlugSource)> {
    // 1. Path prefix: /s/<slug>[/...]
    let path = request.uri().path().to_string();
    if let Some(rest) = path.strip_prefix("/s/") {
        let (slug, remainder) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if !slug.is_empty() {
            let slug = slug.to_string();
            let new_path = if remainder.is_empty() { "/" } else { remainder };
            rewrite_path(request, new_path);
            return Some((slug, SlugSource::Path));
        }
    }

    // 2. Query parameter
    if let Some(slug) = util::query_param(request.uri().query().unwrap_or(""), "slug") {
        if !slug.is_empty() {
            return Some((slug, SlugSource::Query));
        }
    }

    // 3. Routing cookies (asset requests like /_next/... land here)
    for name in ["wormkey_slug", "wormkey"] {
        if let Some(slug) = util::cookie(request.headers(), name) {
            return Some((slug, SlugSource::Cookie));
        }
    }

    // 4. Host label (slug.wormkey.run)
    if let Some(slug) = from_host(host_of(request)) {
        return Some((slug, SlugSource::Host));
    }

    None
}

/// Extract a slug from a host like `quiet-lime-82.wormkey.run[:3002]`.
/// Requires at least three dot-separated labels.
pub fn from_host(host: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    let mut labels = host.split('.');
    let first = labels.next()?;
    if labels.count() < 2 || first.is_empty() {
        return None;
    }
    Some(first.to_string())
}

/// The Host header of a request, or the URI authority as a fallback.
pub fn host_of<B>(request: &Request<B>) -> &str {
    header_host(request.headers())
        .or_else(|| request.uri().host())
        .unwrap_or("")
}

fn header_host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|value| value.to_str().ok())
}

fn rewrite_path(request: &mut Request<Body>, new_path: &str) {
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path.to_string(),
    };
    let Ok(path_and_query) = PathAndQuery::try_from(path_and_query) else {
        return;
    };
    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    if let Ok(uri) = Uri::from_parts(parts) {
        *request.uri_mut() = uri;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_path_slug_rewrites_remainder() {
        let mut req = request("/s/demo/index?x=1");
        let (slug, source) = resolve(&mut req).unwrap();
        assert_eq!(slug, "demo");
        assert_eq!(source, SlugSource::Path);
        assert_eq!(req.uri().path(), "/index");
        assert_eq!(req.uri().query(), Some("x=1"));
    }

    #[test]
    fn test_path_slug_bare_becomes_root() {
        let mut req = request("/s/demo");
        let (slug, _) = resolve(&mut req).unwrap();
        assert_eq!(slug, "demo");
        assert_eq!(req.uri().path(), "/");
    }

    #[test]
    fn test_query_slug() {
        let mut req = request("/assets/app.js?slug=demo");
        let (slug, source) = resolve(&mut req).unwrap();
        assert_eq!(slug, "demo");
        assert_eq!(source, SlugSource::Query);
        // query-resolved requests keep their path untouched
        assert_eq!(req.uri().path(), "/assets/app.js");
    }

    #[test]
    fn test_cookie_slug() {
        let mut req = request("/assets/app.js");
        req.headers_mut().insert(
            header::COOKIE,
            HeaderValue::from_static("wormkey=legacy-demo"),
        );
        let (slug, source) = resolve(&mut req).unwrap();
        assert_eq!(slug, "legacy-demo");
        assert_eq!(source, SlugSource::Cookie);
    }

    #[test]
    fn test_cookie_order_prefers_primary() {
        let mut req = request("/");
        req.headers_mut().insert(
            header::COOKIE,
            HeaderValue::from_static("wormkey=old; wormkey_slug=new"),
        );
        let (slug, _) = resolve(&mut req).unwrap();
        assert_eq!(slug, "new");
    }

    #[test]
    fn test_host_slug_needs_three_labels() {
        assert_eq!(from_host("demo.wormkey.run"), Some("demo".to_string()));
        assert_eq!(from_host("demo.wormkey.run:3002"), Some("demo".to_string()));
        assert_eq!(from_host("wormkey.run"), None);
        assert_eq!(from_host("localhost"), None);
    }

    #[test]
    fn test_host_resolution_is_last() {
        let mut req = request("/index");
        req.headers_mut()
            .insert(header::HOST, HeaderValue::from_static("demo.wormkey.run"));
        let (slug, source) = resolve(&mut req).unwrap();
        assert_eq!(slug, "demo");
        assert_eq!(source, SlugSource::Host);
    }

    #[test]
    fn test_no_slug_anywhere() {
        let mut req = request("/index");
        req.headers_mut()
            .insert(header::HOST, HeaderValue::from_static("wormkey.run"));
        assert!(resolve(&mut req).is_none());
    }

    #[test]
    fn test_path_wins_over_host() {
        let mut req = request("/s/pathy/x");
        req.headers_mut()
            .insert(header::HOST, HeaderValue::from_static("hosty.wormkey.run"));
        let (slug, _) = resolve(&mut req).unwrap();
        assert_eq!(slug, "pathy");
    }
}
