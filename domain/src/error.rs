//! Error types for the `domain` layer.
use accounting_auth::error::{
    AdapterErrorKind, Error as AccountingAuthError, ErrorKind as AccountingAuthErrorKind,
    TokenErrorKind,
};
use entity_api::error::{EntityApiErrorKind, Error as EntityApiError};
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure
/// with `domain::error::Error` as the root type holding a tree of `error_kind`
/// enums that represent the kinds of errors that can occur in the domain layer or
/// in lower layers. The `source` field is used to hold the original error that caused
/// the domain error. Errors are translated at each layer boundary: `entity_api` and
/// `accounting-auth` errors become domain errors here, so callers of `Integrations`
/// only ever match on `DomainErrorKind`.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}

/// Enum representing the various kinds of internal errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    Entity(EntityErrorKind),
    Sync(SyncErrorKind),
    /// Token sealing, opening or credential persistence failed.
    Storage,
    Config,
    Other(String),
}

/// Enum representing the various kinds of entity errors that can bubble up from the "Entity" layer (`entity_api` and `entity`).
/// These errors are translated from the `entity_api` layer to the `domain` layer and reduced to a subset of error kinds
/// that are relevant to the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum EntityErrorKind {
    NotFound,
    NotInserted,
    DbTransaction,
    Other(String),
}

/// Per-record sync failures. Neither aborts a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// The provider record could not be normalized.
    Mapping,
    /// The (external_id, source) key is already owned by another org.
    Ownership,
}

/// Enum representing the various kinds of external errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    Token(TokenErrorKind),
    Provider(AdapterErrorKind),
    Network,
    Other(String),
}

impl Error {
    /// True for failures a caller may retry later without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.error_kind,
            DomainErrorKind::External(ExternalErrorKind::Token(TokenErrorKind::RefreshTransient))
                | DomainErrorKind::External(ExternalErrorKind::Provider(
                    AdapterErrorKind::Transient
                ))
                | DomainErrorKind::External(ExternalErrorKind::Network)
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
        write!(f, "Domain Error: {self:?}")
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// This is where we translate errors from the `entity_api` layer to the `domain` layer.
impl From<EntityApiError> for Error {
    fn from(err: EntityApiError) -> Self {
        let entity_error_kind = match err.error_kind {
            EntityApiErrorKind::RecordNotFound => EntityErrorKind::NotFound,
            EntityApiErrorKind::RecordNotInserted => EntityErrorKind::NotInserted,
            EntityApiErrorKind::SystemError => EntityErrorKind::DbTransaction,
            _ => EntityErrorKind::Other("EntityErrorKind".to_string()),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Entity(entity_error_kind)),
        }
    }
}

impl From<AccountingAuthError> for Error {
    fn from(err: AccountingAuthError) -> Self {
        let error_kind = match &err.error_kind {
            AccountingAuthErrorKind::Token(kind) => {
                DomainErrorKind::External(ExternalErrorKind::Token(*kind))
            }
            AccountingAuthErrorKind::Adapter(kind) => {
                DomainErrorKind::External(ExternalErrorKind::Provider(*kind))
            }
            AccountingAuthErrorKind::Storage(_) => {
                DomainErrorKind::Internal(InternalErrorKind::Storage)
            }
            AccountingAuthErrorKind::Http(_) => DomainErrorKind::Internal(InternalErrorKind::Other(
                "Failed to build provider HTTP client".to_string(),
            )),
            AccountingAuthErrorKind::Audit => {
                DomainErrorKind::Internal(InternalErrorKind::Other(err.to_string()))
            }
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

/// Helper function to create per-record sync errors.
pub fn sync_error(kind: SyncErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: DomainErrorKind::Internal(InternalErrorKind::Sync(kind)),
    }
}

pub(crate) fn config_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: DomainErrorKind::Internal(InternalErrorKind::Config),
    }
}
