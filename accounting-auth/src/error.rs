//! Error types for the `accounting-auth` crate.
//!
//! Follows the same pattern as domain::error with a root Error struct and error kind enums.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for accounting-auth crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in accounting-auth.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    Token(TokenErrorKind),
    Adapter(AdapterErrorKind),
    Storage(StorageErrorKind),
    Audit,
    Http(HttpErrorKind),
}

/// Errors surfaced by `Coordinator::ensure_valid_token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenErrorKind {
    /// No credential exists for the (org, provider) pair.
    NotConnected,
    /// The credential was disabled by an earlier permanent refresh failure.
    Disabled,
    /// Network error, provider 5xx, rate limit or timeout. Callers may retry later.
    RefreshTransient,
    /// Refresh token rejected or revoked. The credential has been disabled.
    RefreshPermanent,
    /// No adapter is registered for the credential's provider.
    UnsupportedProvider,
}

/// The two-valued taxonomy every provider adapter reports failures in.
///
/// Raw provider errors (HTTP statuses, OAuth error codes, GraphQL error codes)
/// are translated into one of these inside the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    Transient,
    Permanent,
}

/// Errors from credential storage operations.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageErrorKind {
    EncryptionFailed,
    DecryptionFailed,
    Database,
}

/// Errors from HTTP client operations.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
}

impl Error {
    /// True when the error is an adapter failure that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::Adapter(AdapterErrorKind::Transient)
                | ErrorKind::Token(TokenErrorKind::RefreshTransient)
        )
    }

    /// Human readable detail from the source error, if any.
    pub fn detail(&self) -> String {
        self.source
            .as_ref()
            .map(|source| source.to_string())
            .unwrap_or_else(|| format!("{:?}", self.error_kind))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Token(kind) => write!(f, "Token error: {:?}", kind),
            ErrorKind::Adapter(kind) => write!(f, "Provider error ({:?}): {}", kind, self.detail()),
            ErrorKind::Storage(kind) => write!(f, "Storage error: {:?}", kind),
            ErrorKind::Audit => write!(f, "Audit log error"),
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Only raised while building clients; request failures are classified by the adapters.
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Http(HttpErrorKind::BuilderFailed),
        }
    }
}

/// Helper function to create token errors.
pub fn token_error(kind: TokenErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Token(kind),
    }
}

/// Helper function to create adapter errors.
pub fn adapter_error(kind: AdapterErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Adapter(kind),
    }
}

/// Helper function to create storage errors.
pub fn storage_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Storage(StorageErrorKind::Database),
    }
}

/// Helper function to create audit log errors.
pub fn audit_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Audit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_adapter_error_is_transient() {
        let err = adapter_error(AdapterErrorKind::Transient, "HTTP 503");
        assert!(err.is_transient());
        assert_eq!(err.detail(), "HTTP 503");
    }

    #[test]
    fn test_permanent_adapter_error_is_not_transient() {
        let err = adapter_error(AdapterErrorKind::Permanent, "invalid_grant");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_display_does_not_require_source() {
        let err = Error {
            source: None,
            error_kind: ErrorKind::Token(TokenErrorKind::Disabled),
        };
        assert_eq!(err.to_string(), "Token error: Disabled");
        assert_eq!(err.detail(), "Token(Disabled)");
    }
}
