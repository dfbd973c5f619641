//! In-memory credential store, audit log and scripted provider adapter for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use tokio::sync::Mutex;

use super::{Credential, CredentialKey, CredentialStore, RefreshedTokens};
use crate::audit::{AuditEntry, AuditKind, AuditLog};
use crate::error::{adapter_error, AdapterErrorKind, Error};
use crate::oauth::{Account, EntityKind, ProviderAdapter, ProviderKind, ProviderRecord};

/// HashMap-backed [`CredentialStore`]. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<Mutex<HashMap<CredentialKey, Credential>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a credential, as the external consent flow would.
    pub async fn insert(&self, credential: Credential) {
        self.credentials
            .lock()
            .await
            .insert(credential.key(), credential);
    }

    pub async fn snapshot(&self, org_id: &str, provider: ProviderKind) -> Option<Credential> {
        self.credentials
            .lock()
            .await
            .get(&CredentialKey::new(org_id, provider))
            .cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, org_id: &str, provider: ProviderKind) -> Result<Option<Credential>, Error> {
        Ok(self.snapshot(org_id, provider).await)
    }

    async fn save(&self, credential: Credential) -> Result<(), Error> {
        self.insert(credential).await;
        Ok(())
    }

    async fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Credential>, Error> {
        let map = self.credentials.lock().await;
        Ok(map
            .values()
            .filter(|c| c.enabled && c.expires_at <= before)
            .cloned()
            .collect())
    }
}

/// Vec-backed [`AuditLog`]. Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn count(&self, kind: AuditKind) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<(), Error> {
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

/// What a [`ScriptedAdapter`] does on its next refresh call.
#[derive(Clone)]
pub enum RefreshStep {
    /// Succeed with the given access token; rotate the refresh token when `rotated` is set.
    Succeed {
        access_token: String,
        rotated: Option<String>,
    },
    Transient(String),
    Permanent(String),
    /// Write `credential` to `store` (a sibling instance rotating first), then fail permanently.
    RotatedElsewhere {
        store: MemoryCredentialStore,
        credential: Box<Credential>,
    },
}

/// [`ProviderAdapter`] double that counts refresh calls and replays scripted outcomes.
///
/// When the script runs out every refresh succeeds with `"access-<n>"`, where
/// `n` is the 1-based call number.
pub struct ScriptedAdapter {
    provider: ProviderKind,
    delay: StdDuration,
    expires_in: Duration,
    script: Mutex<VecDeque<RefreshStep>>,
    records: HashMap<EntityKind, Vec<serde_json::Value>>,
    refresh_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            delay: StdDuration::ZERO,
            expires_in: Duration::hours(1),
            script: Mutex::new(VecDeque::new()),
            records: HashMap::new(),
            refresh_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Simulated network latency applied to every refresh call.
    pub fn with_delay(mut self, delay: StdDuration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_steps(self, steps: Vec<RefreshStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            ..self
        }
    }

    /// Records returned by `fetch_*` for the given kind.
    pub fn with_records(mut self, kind: EntityKind, records: Vec<serde_json::Value>) -> Self {
        self.records.insert(kind, records);
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn records(&self, kind: EntityKind) -> Vec<ProviderRecord> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .get(&kind)
            .map(|payloads| {
                payloads
                    .iter()
                    .cloned()
                    .map(|payload| ProviderRecord::new(kind, payload))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedTokens, Error> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = self.script.lock().await.pop_front();
        match step {
            None => Ok(RefreshedTokens {
                access_token: SecretString::from(format!("access-{call}")),
                refresh_token: None,
                expires_in: self.expires_in,
            }),
            Some(RefreshStep::Succeed {
                access_token,
                rotated,
            }) => Ok(RefreshedTokens {
                access_token: SecretString::from(access_token),
                refresh_token: rotated.map(SecretString::from),
                expires_in: self.expires_in,
            }),
            Some(RefreshStep::Transient(detail)) => {
                Err(adapter_error(AdapterErrorKind::Transient, &detail))
            }
            Some(RefreshStep::Permanent(detail)) => {
                Err(adapter_error(AdapterErrorKind::Permanent, &detail))
            }
            Some(RefreshStep::RotatedElsewhere { store, credential }) => {
                store.insert(*credential).await;
                Err(adapter_error(AdapterErrorKind::Permanent, "invalid_grant"))
            }
        }
    }

    async fn list_accounts(
        &self,
        _access_token: &str,
        _account_id: Option<&str>,
    ) -> Result<Vec<Account>, Error> {
        Ok(vec![])
    }

    async fn fetch_invoices(
        &self,
        _access_token: &str,
        _account_id: Option<&str>,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        Ok(self.records(EntityKind::Invoice))
    }

    async fn fetch_payments(
        &self,
        _access_token: &str,
        _account_id: Option<&str>,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        Ok(self.records(EntityKind::Payment))
    }

    async fn fetch_contacts(
        &self,
        _access_token: &str,
        _account_id: Option<&str>,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        Ok(self.records(EntityKind::Contact))
    }
}

/// A connected credential whose access token expires `expires_in` from now.
pub fn credential(org_id: &str, provider: ProviderKind, expires_in: Duration) -> Credential {
    let now = Utc::now();
    Credential {
        org_id: org_id.to_string(),
        provider,
        external_account_id: Some(format!("{org_id}-account")),
        access_token: SecretString::from(format!("{org_id}-access-0")),
        refresh_token: SecretString::from(format!("{org_id}-refresh-0")),
        expires_at: now + expires_in,
        enabled: true,
        last_refresh_error: None,
        updated_at: now,
    }
}
