use std::fmt;

use serde::{Deserialize, Serialize};

use super::AuthError;

/// Bearer token for the job execution platform.
///
/// The secret never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token, rejecting empty input.
    pub fn new(raw: impl Into<String>) -> Result<Self, AuthError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The raw secret, for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Authenticated identity reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_trims_whitespace() {
        let token = AuthToken::new("  abc123\n").unwrap();
        assert_eq!(token.expose(), "abc123");
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(
            AuthToken::new("   "),
            Err(AuthError::MissingCredential)
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = AuthToken::new("super-secret").unwrap();
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
    }
}
