//! Token refresh coordinator with per-(org, provider) single-flight refresh.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;

use super::{Credential, CredentialKey, CredentialStore, RefreshedTokens};
use crate::audit::{AuditEntry, AuditKind, AuditLog};
use crate::error::{
    adapter_error, token_error, AdapterErrorKind, Error, ErrorKind, TokenErrorKind,
};
use crate::oauth::{ProviderKind, Registry};

/// Tunables for [`Coordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Tokens expiring within this margin are refreshed before being handed out.
    pub safety_margin: Duration,
    /// Upper bound on a single refresh call, independent of the HTTP client timeout.
    pub refresh_timeout: StdDuration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            safety_margin: Duration::seconds(60),
            refresh_timeout: StdDuration::from_secs(30),
        }
    }
}

/// Failure shared by every waiter of one refresh flight.
#[derive(Debug, Clone)]
struct RefreshFailure {
    kind: ErrorKind,
    detail: String,
}

impl RefreshFailure {
    fn token(kind: TokenErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Token(kind),
            detail: detail.into(),
        }
    }
}

impl From<RefreshFailure> for Error {
    fn from(failure: RefreshFailure) -> Self {
        Error {
            source: Some(failure.detail.into()),
            error_kind: failure.kind,
        }
    }
}

type RefreshOutcome = Result<SecretString, RefreshFailure>;

/// Receiving side of one refresh flight; `None` until the flight finishes.
type Flight = watch::Receiver<Option<RefreshOutcome>>;

/// Hands out valid access tokens, refreshing at most once concurrently per (org, provider).
///
/// Concurrent callers for the same key wait on one shared refresh flight and all
/// observe its outcome, success or failure. Without this, two callers would both
/// spend the same refresh token and the loser would see `invalid_grant` on
/// providers that rotate refresh tokens. Flights for different keys live in
/// different map entries and never wait on each other.
///
/// A flight runs on its own task. Dropping every waiter does not cancel it, so
/// a rotated refresh token is always persisted once the provider has issued it.
pub struct Coordinator<S: CredentialStore> {
    inner: Arc<Inner<S>>,
}

struct Inner<S: CredentialStore> {
    store: S,
    registry: Registry,
    audit: Arc<dyn AuditLog>,
    config: CoordinatorConfig,
    in_flight: DashMap<CredentialKey, Flight>,
}

impl<S: CredentialStore + 'static> Coordinator<S> {
    /// Create a coordinator over the given store, adapters and audit sink.
    pub fn new(
        store: S,
        registry: Registry,
        audit: Arc<dyn AuditLog>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                audit,
                config,
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn audit(&self) -> &Arc<dyn AuditLog> {
        &self.inner.audit
    }

    /// Get a valid access token for an org and provider, refreshing if it expires
    /// within the configured safety margin.
    ///
    /// # Errors
    ///
    /// * `NotConnected` - no credential exists
    /// * `Disabled` - an earlier refresh failed permanently; no network call is made
    /// * `RefreshTransient` - the refresh failed but may succeed later
    /// * `RefreshPermanent` - the refresh token was rejected and the credential is now disabled
    pub async fn ensure_valid_token(
        &self,
        org_id: &str,
        provider: ProviderKind,
    ) -> Result<SecretString, Error> {
        self.ensure_valid_token_within(org_id, provider, self.inner.config.safety_margin)
            .await
    }

    /// Same as [`Coordinator::ensure_valid_token`] with an explicit refresh margin.
    pub async fn ensure_valid_token_within(
        &self,
        org_id: &str,
        provider: ProviderKind,
        margin: Duration,
    ) -> Result<SecretString, Error> {
        let credential = self.inner.load_connected(org_id, provider).await?;

        if !credential.needs_refresh(margin, Utc::now()) {
            return Ok(credential.access_token);
        }

        let key = credential.key();
        debug!(
            "Access token for {} expires at {}, refreshing",
            key, credential.expires_at
        );

        // Join the flight in progress for this key, or dispatch one.
        let mut flight = self
            .inner
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| self.dispatch(key.clone(), margin))
            .clone();

        let outcome = match flight.wait_for(Option::is_some).await {
            Ok(done) => (*done).clone(),
            Err(_) => None,
        };

        match outcome {
            Some(outcome) => outcome.map_err(Error::from),
            None => {
                // The flight task ended without publishing; retire it so the next call retries.
                self.inner
                    .in_flight
                    .remove_if(&key, |_, current| current.same_channel(&flight));
                error!("Refresh flight for {} ended without an outcome", key);
                Err(token_error(
                    TokenErrorKind::RefreshTransient,
                    &format!("refresh for {} was interrupted", key),
                ))
            }
        }
    }

    /// Spawn the refresh flight for `key` and return its receiver.
    fn dispatch(&self, key: CredentialKey, margin: Duration) -> Flight {
        let (tx, rx) = watch::channel(None);
        let flight = rx.clone();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let outcome = inner.refresh(&key, margin).await;
            tx.send_replace(Some(outcome));
            // Only this flight is retired; a newer one is left alone.
            inner
                .in_flight
                .remove_if(&key, |_, current| current.same_channel(&flight));
        });

        rx
    }

    #[cfg(test)]
    fn flights(&self) -> usize {
        self.inner.in_flight.len()
    }
}

impl<S: CredentialStore> Inner<S> {
    async fn load_connected(
        &self,
        org_id: &str,
        provider: ProviderKind,
    ) -> Result<Credential, Error> {
        let credential = self.store.get(org_id, provider).await?.ok_or_else(|| {
            token_error(
                TokenErrorKind::NotConnected,
                &format!("No {} credential for org {}", provider, org_id),
            )
        })?;

        if !credential.enabled {
            return Err(token_error(
                TokenErrorKind::Disabled,
                &format!("{} credential for org {} is disabled", provider, org_id),
            ));
        }

        Ok(credential)
    }

    /// Body of one refresh flight. Runs at most once per flight regardless of waiter count.
    async fn refresh(&self, key: &CredentialKey, margin: Duration) -> RefreshOutcome {
        // Re-read at dispatch time: an earlier flight may already have refreshed.
        let credential = match self.load_connected(&key.org_id, key.provider).await {
            Ok(credential) => credential,
            Err(err) => {
                return Err(RefreshFailure {
                    kind: err.error_kind.clone(),
                    detail: err.detail(),
                })
            }
        };

        if !credential.needs_refresh(margin, Utc::now()) {
            debug!("Token for {} was refreshed by an earlier request", key);
            return Ok(credential.access_token);
        }

        let Some(adapter) = self.registry.get(key.provider) else {
            return Err(RefreshFailure::token(
                TokenErrorKind::UnsupportedProvider,
                format!("No adapter registered for {}", key.provider),
            ));
        };

        self.record(
            key,
            AuditKind::RefreshAttempt,
            format!("token expires at {}", credential.expires_at),
        )
        .await;

        let sent_refresh_token = credential.refresh_token.clone();
        let result = match tokio::time::timeout(
            self.config.refresh_timeout,
            adapter.refresh(sent_refresh_token.expose_secret()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(adapter_error(
                AdapterErrorKind::Transient,
                &format!(
                    "token refresh timed out after {}s",
                    self.config.refresh_timeout.as_secs_f64()
                ),
            )),
        };

        match result {
            Ok(tokens) => self.on_success(key, credential, tokens).await,
            Err(err) => {
                self.on_failure(key, credential, &sent_refresh_token, margin, err)
                    .await
            }
        }
    }

    async fn on_success(
        &self,
        key: &CredentialKey,
        mut credential: Credential,
        tokens: RefreshedTokens,
    ) -> RefreshOutcome {
        let rotated = tokens.refresh_token.is_some();
        credential.apply_refresh(tokens, Utc::now());
        let access_token = credential.access_token.clone();
        let expires_at = credential.expires_at;

        if let Err(err) = self.store.save(credential).await {
            error!("Refreshed token for {} could not be persisted: {}", key, err);
            return Err(RefreshFailure {
                kind: err.error_kind.clone(),
                detail: err.detail(),
            });
        }

        info!("Refreshed token for {} (expires at {})", key, expires_at);
        self.record(
            key,
            AuditKind::RefreshSuccess,
            format!("expires at {}, refresh token rotated: {}", expires_at, rotated),
        )
        .await;

        Ok(access_token)
    }

    async fn on_failure(
        &self,
        key: &CredentialKey,
        credential: Credential,
        sent_refresh_token: &SecretString,
        margin: Duration,
        err: Error,
    ) -> RefreshOutcome {
        let detail = err.detail();
        let permanent = err.error_kind == ErrorKind::Adapter(AdapterErrorKind::Permanent);

        // A sibling instance may have rotated the refresh token while ours was in flight,
        // in which case the provider rejects the stale token we sent. Its write wins.
        let mut credential = match self.store.get(&key.org_id, key.provider).await {
            Ok(Some(current))
                if current.refresh_token.expose_secret() != sent_refresh_token.expose_secret() =>
            {
                if current.enabled && !current.needs_refresh(margin, Utc::now()) {
                    info!("Token for {} was rotated by another instance", key);
                    return Ok(current.access_token);
                }
                warn!(
                    "Refresh for {} raced a rotation by another instance: {}",
                    key, detail
                );
                self.record(
                    key,
                    AuditKind::RefreshFailure,
                    format!("transient: stale refresh token ({})", detail),
                )
                .await;
                return Err(RefreshFailure::token(
                    TokenErrorKind::RefreshTransient,
                    format!("refresh token was rotated concurrently: {}", detail),
                ));
            }
            Ok(Some(current)) => current,
            _ => credential,
        };

        let now = Utc::now();
        let kind = if permanent {
            error!("Refresh for {} failed permanently, disabling: {}", key, detail);
            credential.disable(&detail, now);
            TokenErrorKind::RefreshPermanent
        } else {
            warn!("Refresh for {} failed transiently: {}", key, detail);
            credential.record_failure(&detail, now);
            TokenErrorKind::RefreshTransient
        };

        if let Err(save_err) = self.store.save(credential).await {
            warn!(
                "Could not record refresh failure for {}: {}",
                key, save_err
            );
        }

        let class = if permanent { "permanent" } else { "transient" };
        self.record(key, AuditKind::RefreshFailure, format!("{}: {}", class, detail))
            .await;

        Err(RefreshFailure::token(kind, detail))
    }

    /// Append an audit entry. Audit failures are logged, never propagated.
    async fn record(&self, key: &CredentialKey, kind: AuditKind, detail: String) {
        let entry = AuditEntry::new(&key.org_id, key.provider, kind, detail);
        if let Err(err) = self.audit.append(entry).await {
            warn!("Failed to append {} audit entry for {}: {}", kind, key, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::token::memory::{
        credential, MemoryAuditLog, MemoryCredentialStore, RefreshStep, ScriptedAdapter,
    };
    use std::time::Instant;

    struct Harness {
        store: MemoryCredentialStore,
        audit: MemoryAuditLog,
        coordinator: Arc<Coordinator<MemoryCredentialStore>>,
    }

    fn harness(adapters: Vec<Arc<ScriptedAdapter>>, config: CoordinatorConfig) -> Harness {
        let store = MemoryCredentialStore::new();
        let audit = MemoryAuditLog::new();
        let mut registry = Registry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            registry,
            Arc::new(audit.clone()),
            config,
        ));
        Harness {
            store,
            audit,
            coordinator,
        }
    }

    fn error_kind(result: Result<SecretString, Error>) -> ErrorKind {
        result.expect_err("expected an error").error_kind
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_network_call() {
        let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Xero));
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());
        h.store
            .insert(credential("org-1", ProviderKind::Xero, Duration::minutes(30)))
            .await;

        let token = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::Xero)
            .await
            .unwrap();

        assert_eq!(token.expose_secret(), "org-1-access-0");
        assert_eq!(adapter.refresh_calls(), 0);
        assert!(h.audit.entries().await.is_empty());
    }

    #[tokio::test]
    async fn missing_credential_is_not_connected() {
        let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Wave));
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());

        let result = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::Wave)
            .await;

        assert_eq!(
            error_kind(result),
            ErrorKind::Token(TokenErrorKind::NotConnected)
        );
        assert_eq!(adapter.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_persisted() {
        let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::QuickBooks).with_steps(vec![
            RefreshStep::Succeed {
                access_token: "qbo-access-1".to_string(),
                rotated: Some("qbo-refresh-1".to_string()),
            },
        ]));
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());
        let mut seeded = credential("org-1", ProviderKind::QuickBooks, Duration::seconds(30));
        seeded.last_refresh_error = Some("HTTP 503".to_string());
        h.store.insert(seeded).await;

        let token = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::QuickBooks)
            .await
            .unwrap();

        assert_eq!(token.expose_secret(), "qbo-access-1");
        let stored = h
            .store
            .snapshot("org-1", ProviderKind::QuickBooks)
            .await
            .unwrap();
        assert_eq!(stored.access_token.expose_secret(), "qbo-access-1");
        assert_eq!(stored.refresh_token.expose_secret(), "qbo-refresh-1");
        assert!(stored.expires_at > Utc::now() + Duration::minutes(50));
        assert!(stored.last_refresh_error.is_none());
        assert_eq!(h.audit.count(AuditKind::RefreshAttempt).await, 1);
        assert_eq!(h.audit.count(AuditKind::RefreshSuccess).await, 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let adapter = Arc::new(
            ScriptedAdapter::new(ProviderKind::Xero).with_delay(StdDuration::from_millis(100)),
        );
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());
        h.store
            .insert(credential("org-1", ProviderKind::Xero, -Duration::minutes(5)))
            .await;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let coordinator = h.coordinator.clone();
                tokio::spawn(async move {
                    coordinator
                        .ensure_valid_token("org-1", ProviderKind::Xero)
                        .await
                })
            })
            .collect();

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.expose_secret(), "access-1");
        }
        assert_eq!(adapter.refresh_calls(), 1);
        assert_eq!(h.audit.count(AuditKind::RefreshSuccess).await, 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failure() {
        let adapter = Arc::new(
            ScriptedAdapter::new(ProviderKind::Xero)
                .with_delay(StdDuration::from_millis(100))
                .with_steps(vec![RefreshStep::Transient("HTTP 503".to_string())]),
        );
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());
        h.store
            .insert(credential("org-1", ProviderKind::Xero, -Duration::minutes(5)))
            .await;

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = h.coordinator.clone();
                tokio::spawn(async move {
                    coordinator
                        .ensure_valid_token("org-1", ProviderKind::Xero)
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(
                error_kind(handle.await.unwrap()),
                ErrorKind::Token(TokenErrorKind::RefreshTransient)
            );
        }
        assert_eq!(adapter.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn refresh_completes_after_initiating_caller_is_dropped() {
        let adapter = Arc::new(
            ScriptedAdapter::new(ProviderKind::Xero)
                .with_delay(StdDuration::from_millis(200))
                .with_steps(vec![RefreshStep::Succeed {
                    access_token: "rotated-access".to_string(),
                    rotated: Some("rotated-refresh".to_string()),
                }]),
        );
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());
        h.store
            .insert(credential("org-1", ProviderKind::Xero, -Duration::minutes(1)))
            .await;

        let caller = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .ensure_valid_token("org-1", ProviderKind::Xero)
                    .await
            })
        };
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        tokio::time::sleep(StdDuration::from_millis(400)).await;

        let stored = h.store.snapshot("org-1", ProviderKind::Xero).await.unwrap();
        assert_eq!(stored.access_token.expose_secret(), "rotated-access");
        assert_eq!(stored.refresh_token.expose_secret(), "rotated-refresh");
        assert!(stored.enabled);
        assert_eq!(h.coordinator.flights(), 0);

        let token = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::Xero)
            .await
            .unwrap();
        assert_eq!(token.expose_secret(), "rotated-access");
        assert_eq!(adapter.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn late_waiter_joins_flight_of_dropped_caller() {
        let adapter = Arc::new(
            ScriptedAdapter::new(ProviderKind::Wave).with_delay(StdDuration::from_millis(200)),
        );
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());
        h.store
            .insert(credential("org-1", ProviderKind::Wave, -Duration::minutes(1)))
            .await;

        let caller = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .ensure_valid_token("org-1", ProviderKind::Wave)
                    .await
            })
        };
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        caller.abort();

        let token = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::Wave)
            .await
            .unwrap();

        assert_eq!(token.expose_secret(), "access-1");
        assert_eq!(adapter.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn different_keys_refresh_in_parallel() {
        let delay = StdDuration::from_millis(300);
        let xero = Arc::new(ScriptedAdapter::new(ProviderKind::Xero).with_delay(delay));
        let wave = Arc::new(ScriptedAdapter::new(ProviderKind::Wave).with_delay(delay));
        let h = harness(
            vec![xero.clone(), wave.clone()],
            CoordinatorConfig::default(),
        );
        h.store
            .insert(credential("org-1", ProviderKind::Xero, -Duration::minutes(1)))
            .await;
        h.store
            .insert(credential("org-2", ProviderKind::Wave, -Duration::minutes(1)))
            .await;

        let started = Instant::now();
        let first = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .ensure_valid_token("org-1", ProviderKind::Xero)
                    .await
            })
        };
        let second = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .ensure_valid_token("org-2", ProviderKind::Wave)
                    .await
            })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert!(
            started.elapsed() < delay * 2,
            "refreshes for different keys were serialized: {:?}",
            started.elapsed()
        );
        assert_eq!(xero.refresh_calls(), 1);
        assert_eq!(wave.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn same_provider_different_orgs_get_their_own_tokens() {
        let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Xero));
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());
        h.store
            .insert(credential("org-1", ProviderKind::Xero, Duration::hours(1)))
            .await;
        h.store
            .insert(credential("org-2", ProviderKind::Xero, Duration::hours(1)))
            .await;

        let first = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::Xero)
            .await
            .unwrap();
        let second = h
            .coordinator
            .ensure_valid_token("org-2", ProviderKind::Xero)
            .await
            .unwrap();

        assert_eq!(first.expose_secret(), "org-1-access-0");
        assert_eq!(second.expose_secret(), "org-2-access-0");
    }

    #[tokio::test]
    async fn permanent_failure_disables_credential() {
        let adapter = Arc::new(
            ScriptedAdapter::new(ProviderKind::QuickBooks)
                .with_steps(vec![RefreshStep::Permanent("invalid_grant".to_string())]),
        );
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());
        h.store
            .insert(credential("org-1", ProviderKind::QuickBooks, -Duration::minutes(1)))
            .await;

        let first = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::QuickBooks)
            .await;
        assert_eq!(
            error_kind(first),
            ErrorKind::Token(TokenErrorKind::RefreshPermanent)
        );

        let stored = h
            .store
            .snapshot("org-1", ProviderKind::QuickBooks)
            .await
            .unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.last_refresh_error.as_deref(), Some("invalid_grant"));

        let second = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::QuickBooks)
            .await;
        assert_eq!(error_kind(second), ErrorKind::Token(TokenErrorKind::Disabled));
        assert_eq!(adapter.refresh_calls(), 1);
        assert_eq!(h.audit.count(AuditKind::RefreshFailure).await, 1);
    }

    #[tokio::test]
    async fn transient_failure_keeps_previous_token_and_allows_retry() {
        let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Wave).with_steps(vec![
            RefreshStep::Transient("HTTP 429".to_string()),
        ]));
        let h = harness(vec![adapter.clone()], CoordinatorConfig::default());
        let seeded = credential("org-1", ProviderKind::Wave, Duration::seconds(10));
        let original_expiry = seeded.expires_at;
        h.store.insert(seeded).await;

        let first = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::Wave)
            .await;
        assert_eq!(
            error_kind(first),
            ErrorKind::Token(TokenErrorKind::RefreshTransient)
        );

        let stored = h.store.snapshot("org-1", ProviderKind::Wave).await.unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.access_token.expose_secret(), "org-1-access-0");
        assert_eq!(stored.refresh_token.expose_secret(), "org-1-refresh-0");
        assert_eq!(stored.expires_at, original_expiry);
        assert_eq!(stored.last_refresh_error.as_deref(), Some("HTTP 429"));

        let second = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::Wave)
            .await
            .unwrap();
        assert_eq!(second.expose_secret(), "access-2");
        assert_eq!(adapter.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn refresh_timeout_is_transient() {
        let adapter = Arc::new(
            ScriptedAdapter::new(ProviderKind::Xero).with_delay(StdDuration::from_millis(500)),
        );
        let h = harness(
            vec![adapter.clone()],
            CoordinatorConfig {
                refresh_timeout: StdDuration::from_millis(50),
                ..CoordinatorConfig::default()
            },
        );
        h.store
            .insert(credential("org-1", ProviderKind::Xero, -Duration::minutes(1)))
            .await;

        let result = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::Xero)
            .await;

        assert_eq!(
            error_kind(result),
            ErrorKind::Token(TokenErrorKind::RefreshTransient)
        );
        let stored = h.store.snapshot("org-1", ProviderKind::Xero).await.unwrap();
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn rotation_by_sibling_instance_is_not_treated_as_permanent() {
        let store_for_sibling = MemoryCredentialStore::new();
        let mut rotated = credential("org-1", ProviderKind::Xero, Duration::minutes(30));
        rotated.access_token = SecretString::from("sibling-access".to_string());
        rotated.refresh_token = SecretString::from("sibling-refresh".to_string());

        let adapter_store = store_for_sibling.clone();
        let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Xero).with_steps(vec![
            RefreshStep::RotatedElsewhere {
                store: adapter_store,
                credential: Box::new(rotated),
            },
        ]));

        let audit = MemoryAuditLog::new();
        let coordinator = Coordinator::new(
            store_for_sibling.clone(),
            Registry::new().with(adapter.clone()),
            Arc::new(audit.clone()),
            CoordinatorConfig::default(),
        );
        store_for_sibling
            .insert(credential("org-1", ProviderKind::Xero, -Duration::minutes(1)))
            .await;

        let token = coordinator
            .ensure_valid_token("org-1", ProviderKind::Xero)
            .await
            .unwrap();

        assert_eq!(token.expose_secret(), "sibling-access");
        let stored = store_for_sibling
            .snapshot("org-1", ProviderKind::Xero)
            .await
            .unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.refresh_token.expose_secret(), "sibling-refresh");
    }

    #[tokio::test]
    async fn provider_without_adapter_is_unsupported() {
        let h = harness(vec![], CoordinatorConfig::default());
        h.store
            .insert(credential("org-1", ProviderKind::Wave, -Duration::minutes(1)))
            .await;

        let result = h
            .coordinator
            .ensure_valid_token("org-1", ProviderKind::Wave)
            .await;

        assert_eq!(
            error_kind(result),
            ErrorKind::Token(TokenErrorKind::UnsupportedProvider)
        );
    }
}
