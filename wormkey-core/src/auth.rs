//! Handshake credential for agent connections.
//!
//! Agents authenticate with `Authorization: Bearer slug[.ownerToken]`. The
//! slug names the tunnel; the optional owner token proves ownership and is
//! checked against the control plane's persisted session.

use thiserror::Error;

/// Slugs longer than this are truncated at the handshake.
pub const MAX_SLUG_LEN: usize = 64;

/// Credential errors surfaced during the handshake.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing or malformed Authorization header")]
    MissingBearer,
    #[error("empty slug")]
    EmptySlug,
}

/// Parsed agent credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub slug: String,
    /// Empty when the agent claimed no ownership.
    pub owner_token: String,
}

impl Credential {
    /// Parse an `Authorization` header value of the form
    /// `Bearer slug[.ownerToken]`. The slug is truncated to
    /// [`MAX_SLUG_LEN`] bytes.
    pub fn parse(authorization: &str) -> Result<Self, CredentialError> {
        let raw = authorization
            .strip_prefix("Bearer ")
            .ok_or(CredentialError::MissingBearer)?
            .trim();

        let (slug, owner_token) = match raw.find('.') {
            Some(0) => return Err(CredentialError::EmptySlug),
            Some(dot) => (&raw[..dot], &raw[dot + 1..]),
            None => (raw, ""),
        };
        if slug.is_empty() {
            return Err(CredentialError::EmptySlug);
        }

        let mut slug = slug.to_string();
        slug.truncate(MAX_SLUG_LEN);

        Ok(Self {
            slug,
            owner_token: owner_token.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slug_only() {
        let cred = Credential::parse("Bearer quiet-lime-82").unwrap();
        assert_eq!(cred.slug, "quiet-lime-82");
        assert_eq!(cred.owner_token, "");
    }

    #[test]
    fn test_parse_slug_with_token() {
        let cred = Credential::parse("Bearer demo.abc123").unwrap();
        assert_eq!(cred.slug, "demo");
        assert_eq!(cred.owner_token, "abc123");
    }

    #[test]
    fn test_parse_trailing_dot_means_no_token() {
        let cred = Credential::parse("Bearer demo.").unwrap();
        assert_eq!(cred.slug, "demo");
        assert_eq!(cred.owner_token, "");
    }

    #[test]
    fn test_parse_rejects_non_bearer() {
        assert_eq!(
            Credential::parse("Basic abc"),
            Err(CredentialError::MissingBearer)
        );
        assert_eq!(Credential::parse(""), Err(CredentialError::MissingBearer));
    }

    #[test]
    fn test_parse_rejects_empty_slug() {
        assert_eq!(Credential::parse("Bearer "), Err(CredentialError::EmptySlug));
        assert_eq!(
            Credential::parse("Bearer .token"),
            Err(CredentialError::EmptySlug)
        );
    }

    #[test]
    fn test_slug_truncated_to_64_bytes() {
        let long = "x".repeat(100);
        let cred = Credential::parse(&format!("Bearer {long}.tok")).unwrap();
        assert_eq!(cred.slug.len(), MAX_SLUG_LEN);
        assert_eq!(cred.owner_token, "tok");
    }
}
