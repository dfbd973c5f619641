//! Database-backed [`CredentialStore`] with tokens sealed at rest.

use std::sync::Arc;

use accounting_auth::error::{Error as AuthError, ErrorKind as AuthErrorKind, StorageErrorKind};
use accounting_auth::oauth::token::{Credential, CredentialStore, TokenCipher};
use accounting_auth::oauth::ProviderKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::credentials::Model;
use entity::Id;
use entity_api::credential;
use sea_orm::DatabaseConnection;

use crate::provider::{from_column, to_column};

/// Persists one credential row per (org_id, provider). Access and refresh
/// tokens are sealed with [`TokenCipher`] before they are written and opened
/// after they are read, so plaintext tokens never reach the database.
pub struct DbCredentialStore {
    db: Arc<DatabaseConnection>,
    cipher: TokenCipher,
}

impl DbCredentialStore {
    pub fn new(db: Arc<DatabaseConnection>, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    fn to_credential(&self, model: Model) -> Result<Credential, AuthError> {
        Ok(Credential {
            org_id: model.org_id,
            provider: from_column(model.provider),
            external_account_id: model.external_account_id,
            access_token: self.cipher.open(&model.access_token)?,
            refresh_token: self.cipher.open(&model.refresh_token)?,
            expires_at: model.expires_at.with_timezone(&Utc),
            enabled: model.enabled,
            last_refresh_error: model.last_refresh_error,
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }

    fn to_model(&self, credential: &Credential) -> Result<Model, AuthError> {
        Ok(Model {
            // Assigned by the database on insert, ignored on update.
            id: Id::nil(),
            org_id: credential.org_id.clone(),
            provider: to_column(credential.provider),
            external_account_id: credential.external_account_id.clone(),
            access_token: self.cipher.seal(&credential.access_token)?,
            refresh_token: self.cipher.seal(&credential.refresh_token)?,
            expires_at: credential.expires_at.into(),
            enabled: credential.enabled,
            last_refresh_error: credential.last_refresh_error.clone(),
            created_at: credential.updated_at.into(),
            updated_at: credential.updated_at.into(),
        })
    }
}

fn database_error(err: entity_api::error::Error) -> AuthError {
    AuthError {
        source: Some(Box::new(err)),
        error_kind: AuthErrorKind::Storage(StorageErrorKind::Database),
    }
}

#[async_trait]
impl CredentialStore for DbCredentialStore {
    async fn get(
        &self,
        org_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<Credential>, AuthError> {
        credential::find_by_org_and_provider(&self.db, org_id, to_column(provider))
            .await
            .map_err(database_error)?
            .map(|model| self.to_credential(model))
            .transpose()
    }

    async fn save(&self, credential: Credential) -> Result<(), AuthError> {
        let model = self.to_model(&credential)?;
        credential::save(&self.db, model)
            .await
            .map_err(database_error)?;
        Ok(())
    }

    async fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Credential>, AuthError> {
        credential::find_expiring(&self.db, before.into())
            .await
            .map_err(database_error)?
            .into_iter()
            .map(|model| self.to_credential(model))
            .collect()
    }
}

#[cfg(test)]
// We need to gate seaORM's mock feature behind conditional compilation because
// the feature removes the Clone trait implementation from seaORM's DatabaseConnection.
// see https://github.com/SeaQL/sea-orm/issues/830
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use accounting_auth::oauth::token::memory;
    use chrono::Duration;
    use entity::provider::Provider;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use secrecy::{ExposeSecret, SecretString};

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn sealed_model(cipher: &TokenCipher, expires_at: DateTime<Utc>) -> Model {
        let now = Utc::now();
        Model {
            id: Id::new_v4(),
            org_id: "org-1".to_string(),
            provider: Provider::Xero,
            external_account_id: Some("tenant-1".to_string()),
            access_token: cipher
                .seal(&SecretString::from("access-plain".to_string()))
                .unwrap(),
            refresh_token: cipher
                .seal(&SecretString::from("refresh-plain".to_string()))
                .unwrap(),
            expires_at: expires_at.into(),
            enabled: true,
            last_refresh_error: None,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[tokio::test]
    async fn get_opens_sealed_tokens() -> Result<(), AuthError> {
        let cipher = TokenCipher::from_hex(KEY)?;
        let model = sealed_model(&cipher, Utc::now() + Duration::minutes(30));
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model]])
            .into_connection();
        let store = DbCredentialStore::new(Arc::new(db), cipher);

        let found = store.get("org-1", ProviderKind::Xero).await?.unwrap();
        assert_eq!(found.access_token.expose_secret(), "access-plain");
        assert_eq!(found.refresh_token.expose_secret(), "refresh-plain");
        assert_eq!(found.provider, ProviderKind::Xero);
        Ok(())
    }

    #[tokio::test]
    async fn to_model_never_stores_plaintext() -> Result<(), AuthError> {
        let cipher = TokenCipher::from_hex(KEY)?;
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let store = DbCredentialStore::new(Arc::new(db), cipher.clone());
        let credential = memory::credential("org-1", ProviderKind::Wave, Duration::hours(1));

        let model = store.to_model(&credential)?;
        assert!(!model.access_token.contains("org-1-access-0"));
        assert_eq!(cipher.open(&model.access_token)?.expose_secret(), "org-1-access-0");
        assert_eq!(model.provider, Provider::Wave);
        Ok(())
    }

    #[tokio::test]
    async fn tokens_sealed_under_another_key_fail_to_open() -> Result<(), AuthError> {
        let other = TokenCipher::from_hex(&"ff".repeat(32))?;
        let model = sealed_model(&other, Utc::now());
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model]])
            .into_connection();
        let store = DbCredentialStore::new(Arc::new(db), TokenCipher::from_hex(KEY)?);

        let err = store.get("org-1", ProviderKind::Xero).await.unwrap_err();
        assert_eq!(
            err.error_kind,
            AuthErrorKind::Storage(StorageErrorKind::DecryptionFailed)
        );
        Ok(())
    }

    #[tokio::test]
    async fn list_expiring_returns_opened_credentials() -> Result<(), AuthError> {
        let cipher = TokenCipher::from_hex(KEY)?;
        let soon = Utc::now() + Duration::minutes(1);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![sealed_model(&cipher, soon)]])
            .into_connection();
        let store = DbCredentialStore::new(Arc::new(db), cipher);

        let expiring = store.list_expiring(Utc::now() + Duration::minutes(5)).await?;
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].access_token.expose_secret(), "access-plain");
        Ok(())
    }
}
