//! HTTP/1.1 head text carried inside OPEN and RESP_HEADERS payloads.
//!
//! The gateway speaks framed HTTP/1.1 text to the agent: an OPEN payload is
//! a request line plus the viewer's header block, and a RESP_HEADERS payload
//! is a status line plus the origin's header block. Both blocks are
//! CRLF-delimited and end at the first empty line.

use bytes::Bytes;

/// Serialize a request head for an OPEN payload.
///
/// Produces `"<METHOD> <REQUEST_URI> HTTP/1.1\r\n"` followed by the header
/// block verbatim and a terminating blank line.
pub fn serialize_request_head<'a>(
    method: &str,
    request_uri: &str,
    headers: impl Iterator<Item = (&'a str, &'a str)>,
) -> Bytes {
    let mut head = String::with_capacity(256);
    head.push_str(method);
    head.push(' ');
    head.push_str(request_uri);
    head.push_str(" HTTP/1.1\r\n");
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    Bytes::from(head)
}

/// Parsed agent response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Parse a RESP_HEADERS payload.
///
/// The status code is the second whitespace-separated token of the first
/// line, defaulting to 200 when missing or unparseable. Header lines are
/// `Name: Value`; the block ends at the first empty line.
pub fn parse_response_head(payload: &[u8]) -> ResponseHead {
    let text = String::from_utf8_lossy(payload);
    let mut lines = text.split("\r\n");

    let status = lines
        .next()
        .and_then(|status_line| status_line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(200);

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some(colon) = line.find(':') {
            if colon > 0 {
                let name = line[..colon].trim();
                let value = line[colon + 1..].trim();
                headers.push((name.to_string(), value.to_string()));
            }
        }
    }

    ResponseHead { status, headers }
}
