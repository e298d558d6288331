//! Small request/response helpers shared across handlers.

use axum::http::{header, HeaderMap};
use rand::rngs::OsRng;
use rand::RngCore;

/// Read a named cookie from the request headers.
pub fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some((key, value)) = pair.split_once('=') {
            if key == name && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Read a named query parameter from a raw query string.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Build a `Set-Cookie` value scoped to the whole host.
pub fn set_cookie_value(name: &str, value: &str, http_only: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; SameSite=Lax");
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie
}

/// Mint `len` random bytes as lowercase hex. Returns an empty string if the
/// system RNG is unavailable, like the secret minting it replaces.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => hex::encode(bytes),
        Err(_) => String::new(),
    }
}
