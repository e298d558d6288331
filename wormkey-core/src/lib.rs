//! Core wire protocol for the wormkey edge gateway.
//!
//! This crate defines what actually travels over the agent channel: the
//! 5-byte-header binary frame, the HTTP/1.1 head text carried inside OPEN
//! and RESP_HEADERS payloads, and the handshake credential format.

pub mod auth;
pub mod frame;
pub mod http;

pub use auth::{Credential, CredentialError, MAX_SLUG_LEN};
pub use frame::{Frame, FrameError, FrameType, CONTROL_STREAM_ID, HEADER_LEN};
pub use http::{parse_response_head, serialize_request_head, ResponseHead};
