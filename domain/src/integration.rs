//! The surface the rest of the application calls into.
//!
//! `Integrations` hands out valid tokens, proxies provider reads and runs
//! sync batches. Every provider call is preceded by `ensure_valid_token`, so
//! callers never see an access token the coordinator has not vetted.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use accounting_auth::audit::{AuditEntry, AuditKind, AuditLog};
use accounting_auth::error::{token_error, TokenErrorKind};
use accounting_auth::http::HttpClientConfig;
use accounting_auth::oauth::providers::{quickbooks, wave, xero, AdapterConfig};
use accounting_auth::oauth::token::{
    Coordinator, CoordinatorConfig, CredentialStore, Sweeper, TokenCipher,
};
use accounting_auth::oauth::{Account, EntityKind, ProviderAdapter, ProviderKind, ProviderRecord, Registry};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use secrecy::{ExposeSecret, SecretString};
use service::config::{Config, ProviderSettings};

use crate::audit_log::DbAuditLog;
use crate::credential_storage::DbCredentialStore;
use crate::error::{config_error, Error};
use crate::sync::{sync_records, CanonicalStore, DbCanonicalStore, SyncReport};

/// Everything a provider call needs once the token is vetted.
struct Session {
    adapter: Arc<dyn ProviderAdapter>,
    access_token: SecretString,
    account_id: Option<String>,
}

pub struct Integrations<S: CredentialStore + 'static = DbCredentialStore> {
    coordinator: Arc<Coordinator<S>>,
    canonical: Arc<dyn CanonicalStore>,
    sweep_lookahead: Duration,
}

impl Integrations<DbCredentialStore> {
    /// Wire up the database-backed stores and every provider configured in `config`.
    pub fn from_config(config: &Config, db: Arc<DatabaseConnection>) -> Result<Self, Error> {
        let key = config
            .token_encryption_key()
            .ok_or_else(|| config_error("TOKEN_ENCRYPTION_KEY is not set"))?;
        let cipher = TokenCipher::from_hex(&key)?;

        let registry = registry(config)?;
        info!("Registered providers: {:?}", registry.providers());

        let audit: Arc<dyn AuditLog> = Arc::new(DbAuditLog::new(Arc::clone(&db)));
        let coordinator = Coordinator::new(
            DbCredentialStore::new(Arc::clone(&db), cipher),
            registry,
            audit,
            CoordinatorConfig {
                safety_margin: Duration::seconds(config.refresh_safety_margin_secs as i64),
                refresh_timeout: StdDuration::from_secs(config.refresh_timeout_secs),
            },
        );

        Ok(Self::new(
            Arc::new(coordinator),
            Arc::new(DbCanonicalStore::new(db)),
            Duration::seconds(config.sweep_lookahead_secs as i64),
        ))
    }
}

impl<S: CredentialStore + 'static> Integrations<S> {
    pub fn new(
        coordinator: Arc<Coordinator<S>>,
        canonical: Arc<dyn CanonicalStore>,
        sweep_lookahead: Duration,
    ) -> Self {
        Self {
            coordinator,
            canonical,
            sweep_lookahead,
        }
    }

    /// A valid bearer token for the org's connection to `provider`.
    pub async fn ensure_valid_token(
        &self,
        org_id: &str,
        provider: ProviderKind,
    ) -> Result<SecretString, Error> {
        Ok(self.coordinator.ensure_valid_token(org_id, provider).await?)
    }

    pub async fn list_accounts(
        &self,
        org_id: &str,
        provider: ProviderKind,
    ) -> Result<Vec<Account>, Error> {
        let session = self.session(org_id, provider).await?;
        Ok(session
            .adapter
            .list_accounts(
                session.access_token.expose_secret(),
                session.account_id.as_deref(),
            )
            .await?)
    }

    pub async fn fetch_invoices(
        &self,
        org_id: &str,
        provider: ProviderKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        self.fetch(org_id, provider, EntityKind::Invoice, since).await
    }

    pub async fn fetch_payments(
        &self,
        org_id: &str,
        provider: ProviderKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        self.fetch(org_id, provider, EntityKind::Payment, since).await
    }

    pub async fn fetch_contacts(
        &self,
        org_id: &str,
        provider: ProviderKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        self.fetch(org_id, provider, EntityKind::Contact, since).await
    }

    /// Fetch one kind of record from `provider` and upsert it into canonical storage.
    ///
    /// Token and fetch failures fail the whole call. Per-record mapping and
    /// ownership failures are returned in [`SyncReport::failed`].
    pub async fn sync(
        &self,
        org_id: &str,
        provider: ProviderKind,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<SyncReport, Error> {
        let fetched = self.fetch_from_account(org_id, provider, kind, since).await;
        let (records, account_id) = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(
                    "Fetching {} records for org {} from {} failed: {}",
                    kind,
                    org_id,
                    provider,
                    err.detail()
                );
                let entry = AuditEntry::new(
                    org_id,
                    provider,
                    AuditKind::SyncFailure,
                    format!("fetch {}: {}", kind, err.detail()),
                );
                if let Err(audit_err) = self.coordinator.audit().append(entry).await {
                    warn!("Failed to append sync audit entry: {}", audit_err);
                }
                return Err(err);
            }
        };

        info!(
            "Syncing {} {} records for org {} from {}",
            records.len(),
            kind,
            org_id,
            provider
        );

        let report = sync_records(
            self.canonical.as_ref(),
            self.coordinator.audit().as_ref(),
            org_id,
            provider,
            account_id.as_deref(),
            records,
        )
        .await?;

        info!(
            "Synced {} records for org {} from {}: created={} updated={} unchanged={} failed={}",
            kind,
            org_id,
            provider,
            report.created,
            report.updated,
            report.unchanged,
            report.failed.len()
        );
        Ok(report)
    }

    /// A sweeper over this instance's coordinator, so sweeps and callers share refresh flights.
    pub fn sweeper(&self) -> Sweeper<S> {
        Sweeper::new(Arc::clone(&self.coordinator), self.sweep_lookahead)
    }

    async fn fetch(
        &self,
        org_id: &str,
        provider: ProviderKind,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        let (records, _) = self.fetch_from_account(org_id, provider, kind, since).await?;
        Ok(records)
    }

    /// Records of `kind` along with the provider account they were fetched from.
    async fn fetch_from_account(
        &self,
        org_id: &str,
        provider: ProviderKind,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<ProviderRecord>, Option<String>), Error> {
        let session = self.session(org_id, provider).await?;
        let records = session
            .adapter
            .fetch(
                kind,
                session.access_token.expose_secret(),
                session.account_id.as_deref(),
                since,
            )
            .await?;
        Ok((records, session.account_id))
    }

    async fn session(&self, org_id: &str, provider: ProviderKind) -> Result<Session, Error> {
        let adapter = self.coordinator.registry().get(provider).ok_or_else(|| {
            token_error(
                TokenErrorKind::UnsupportedProvider,
                &format!("No adapter registered for {}", provider),
            )
        })?;

        let access_token = self.coordinator.ensure_valid_token(org_id, provider).await?;

        let account_id = self
            .coordinator
            .store()
            .get(org_id, provider)
            .await?
            .and_then(|credential| credential.external_account_id);

        Ok(Session {
            adapter,
            access_token,
            account_id,
        })
    }
}

fn adapter_config(settings: ProviderSettings, http: &HttpClientConfig) -> AdapterConfig {
    AdapterConfig::new(settings.client_id, SecretString::from(settings.client_secret))
        .with_token_url(settings.token_url)
        .with_api_base_url(settings.api_base_url)
        .with_http(http.clone())
}

/// Build an adapter for every provider with a client id and secret in `config`.
pub fn registry(config: &Config) -> Result<Registry, Error> {
    let http = HttpClientConfig {
        timeout: StdDuration::from_secs(config.provider_timeout_secs),
        max_retries: config.provider_max_retries,
        ..HttpClientConfig::default()
    };

    let mut registry = Registry::new();
    if let Some(settings) = config.quickbooks() {
        registry.register(Arc::new(quickbooks::Adapter::new(adapter_config(
            settings, &http,
        ))?));
    }
    if let Some(settings) = config.xero() {
        registry.register(Arc::new(xero::Adapter::new(adapter_config(settings, &http))?));
    }
    if let Some(settings) = config.wave() {
        registry.register(Arc::new(wave::Adapter::new(adapter_config(settings, &http))?));
    }

    if registry.providers().is_empty() {
        warn!("No accounting providers are configured");
    }
    Ok(registry)
}
