//! Owner overlay injection.
//!
//! Owners browsing their own wormhole get a control bar injected into HTML
//! responses. The dispatcher buffers such responses and splices a script tag
//! in front of the closing body tag before the bytes reach the viewer.

use bytes::{Bytes, BytesMut};

/// The static overlay asset served at `/.wormkey/overlay.js`.
pub const OVERLAY_SCRIPT: &str = include_str!("../assets/overlay.js");

const CLOSING_BODY_TAG: &[u8] = b"</body>";

/// Whether a `Content-Type` value is HTML and therefore eligible for
/// injection.
pub fn is_html(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..9)
        .map(|prefix| prefix.eq_ignore_ascii_case("text/html"))
        .unwrap_or(false)
}

/// Build the script tag referencing the overlay asset for a slug.
pub fn script_tag(slug: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(slug.as_bytes()).collect();
    format!(r#"<script defer src="/.wormkey/overlay.js?slug={encoded}"></script>"#)
}

/// Splice the overlay script tag into a buffered HTML body, immediately
/// before the last closing body tag (case-insensitive). Bodies without one
/// get the tag appended.
pub fn inject(body: Bytes, slug: &str) -> Bytes {
    let tag = script_tag(slug);
    let mut out = BytesMut::with_capacity(body.len() + tag.len());
    match rfind_ignore_ascii_case(&body, CLOSING_BODY_TAG) {
        Some(idx) => {
            out.extend_from_slice(&body[..idx]);
            out.extend_from_slice(tag.as_bytes());
            out.extend_from_slice(&body[idx..]);
        }
        None => {
            out.extend_from_slice(&body);
            out.extend_from_slice(tag.as_bytes());
        }
    }
    out.freeze()
}

fn rfind_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_html() {
        assert!(is_html("text/html"));
        assert!(is_html("text/html; charset=utf-8"));
        assert!(is_html("TEXT/HTML"));
        assert!(!is_html("application/json"));
        assert!(!is_html(""));
    }

    #[test]
    fn test_inject_before_closing_body() {
        let body = Bytes::from_static(b"<html><body>hi</body></html>");
        let out = inject(body, "demo");
        assert_eq!(
            &out[..],
            br#"<html><body>hi<script defer src="/.wormkey/overlay.js?slug=demo"></script></body></html>"#
                as &[u8]
        );
    }

    #[test]
    fn test_inject_targets_last_occurrence() {
        let body = Bytes::from_static(b"</body>middle</BODY>tail");
        let out = inject(body, "demo");
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.starts_with("</body>middle<script"));
        assert!(text.ends_with("</script></BODY>tail"));
        assert_eq!(text.matches("<script").count(), 1);
    }

    #[test]
    fn test_inject_appends_without_body_tag() {
        let body = Bytes::from_static(b"<p>fragment</p>");
        let out = inject(body, "demo");
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.starts_with("<p>fragment</p><script"));
    }

    #[test]
    fn test_inject_length_accounting() {
        let body = Bytes::from_static(b"<body></body>");
        let tag_len = script_tag("demo").len();
        let out = inject(body.clone(), "demo");
        assert_eq!(out.len(), body.len() + tag_len);
    }

    #[test]
    fn test_script_tag_encodes_slug() {
        let tag = script_tag("a b&c");
        assert!(tag.contains("slug=a+b%26c"));
    }
}
