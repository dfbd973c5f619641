//! Credential storage trait for persisting OAuth credentials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Credential;
use crate::error::Error;
use crate::oauth::ProviderKind;

/// Durable storage for one credential row per (org, provider).
///
/// No business logic lives here. Concurrent writers for the same key are
/// serialized by the [`Coordinator`](super::Coordinator); implementations only
/// guarantee that a single `save` is atomic, so a reader sees either the whole
/// previous row or the whole new row.
///
/// Implementations should:
/// - Encrypt tokens at rest (see [`TokenCipher`](super::TokenCipher))
/// - Enforce uniqueness of (org_id, provider)
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve the credential for an org and provider.
    ///
    /// # Returns
    ///
    /// `Some(Credential)` if connected, `None` otherwise.
    async fn get(&self, org_id: &str, provider: ProviderKind) -> Result<Option<Credential>, Error>;

    /// Atomically write the whole credential row, keyed by (org_id, provider).
    async fn save(&self, credential: Credential) -> Result<(), Error>;

    /// All enabled credentials whose access token expires at or before `before`.
    async fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Credential>, Error>;
}
