//! Normalization of provider records into canonical rows and their idempotent upsert.

use accounting_auth::audit::{AuditEntry, AuditKind, AuditLog};
use accounting_auth::oauth::{EntityKind, ProviderKind, ProviderRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::Serialize;

use crate::error::{sync_error, DomainErrorKind, Error, InternalErrorKind, SyncErrorKind};

mod mapper;
mod store;

pub use mapper::{currency_exponent, major_to_minor_units, to_canonical, MappingError};
pub use store::DbCanonicalStore;

#[cfg(test)]
pub(crate) use store::MemoryCanonicalStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invoice {
    pub org_id: String,
    pub source: ProviderKind,
    pub external_id: String,
    pub number: Option<String>,
    pub contact_external_id: Option<String>,
    /// One of `draft`, `open`, `paid`, `void`, or the provider's own status lowercased.
    pub status: String,
    pub currency: String,
    pub total_minor: i64,
    pub balance_minor: i64,
    pub issued_on: Option<NaiveDate>,
    pub due_on: Option<NaiveDate>,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub org_id: String,
    pub source: ProviderKind,
    pub external_id: String,
    pub invoice_external_id: Option<String>,
    pub currency: String,
    pub amount_minor: i64,
    pub paid_on: Option<NaiveDate>,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub org_id: String,
    pub source: ProviderKind,
    pub external_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_customer: bool,
    pub is_supplier: bool,
    pub reference: String,
}

/// A provider record normalized into the canonical shape, keyed by (external_id, source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalRecord {
    Invoice(Invoice),
    Payment(Payment),
    Contact(Contact),
}

impl CanonicalRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            CanonicalRecord::Invoice(_) => EntityKind::Invoice,
            CanonicalRecord::Payment(_) => EntityKind::Payment,
            CanonicalRecord::Contact(_) => EntityKind::Contact,
        }
    }

    pub fn org_id(&self) -> &str {
        match self {
            CanonicalRecord::Invoice(r) => &r.org_id,
            CanonicalRecord::Payment(r) => &r.org_id,
            CanonicalRecord::Contact(r) => &r.org_id,
        }
    }

    pub fn source(&self) -> ProviderKind {
        match self {
            CanonicalRecord::Invoice(r) => r.source,
            CanonicalRecord::Payment(r) => r.source,
            CanonicalRecord::Contact(r) => r.source,
        }
    }

    pub fn external_id(&self) -> &str {
        match self {
            CanonicalRecord::Invoice(r) => &r.external_id,
            CanonicalRecord::Payment(r) => &r.external_id,
            CanonicalRecord::Contact(r) => &r.external_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// A record the batch skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Provider-side id, when the payload carried one.
    pub external_id: Option<String>,
    pub kind: SyncErrorKind,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: Vec<RecordFailure>,
}

impl SyncReport {
    /// Records written or confirmed up to date.
    pub fn succeeded(&self) -> usize {
        self.created + self.updated + self.unchanged
    }

    fn count(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Canonical storage keyed by (kind, source, external_id).
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    async fn find(
        &self,
        kind: EntityKind,
        source: ProviderKind,
        external_id: &str,
    ) -> Result<Option<CanonicalRecord>, Error>;

    /// Insert the record or overwrite the row stored under its key.
    ///
    /// Fails with `SyncErrorKind::Ownership` when that row belongs to another org.
    async fn write(&self, record: &CanonicalRecord) -> Result<(), Error>;
}

/// Insert `record`, update it in place, or leave it alone when nothing changed.
pub async fn upsert(
    store: &dyn CanonicalStore,
    record: CanonicalRecord,
) -> Result<UpsertOutcome, Error> {
    let existing = store
        .find(record.kind(), record.source(), record.external_id())
        .await?;

    let outcome = match existing {
        Some(existing) if existing.org_id() != record.org_id() => {
            return Err(sync_error(
                SyncErrorKind::Ownership,
                &format!(
                    "{} {}:{} belongs to another org",
                    record.kind(),
                    record.source(),
                    record.external_id()
                ),
            ));
        }
        Some(existing) if existing == record => return Ok(UpsertOutcome::Unchanged),
        Some(_) => UpsertOutcome::Updated,
        None => UpsertOutcome::Created,
    };

    store.write(&record).await?;
    Ok(outcome)
}

fn sync_error_kind(err: &Error) -> Option<SyncErrorKind> {
    match err.error_kind {
        DomainErrorKind::Internal(InternalErrorKind::Sync(kind)) => Some(kind),
        _ => None,
    }
}

/// Map and upsert a batch of provider records for one org.
///
/// `account_id` is the provider-side company the records were fetched from;
/// see [`to_canonical`]. A record that fails to map, or whose key is owned by another org, is
/// skipped, logged and audited; the rest of the batch carries on. Storage
/// failures abort the batch.
pub async fn sync_records(
    store: &dyn CanonicalStore,
    audit: &dyn AuditLog,
    org_id: &str,
    provider: ProviderKind,
    account_id: Option<&str>,
    records: Vec<ProviderRecord>,
) -> Result<SyncReport, Error> {
    let mut report = SyncReport::default();

    for record in records {
        let failure = match to_canonical(&record, provider, org_id, account_id) {
            Ok(canonical) => {
                let external_id = canonical.external_id().to_string();
                match upsert(store, canonical).await {
                    Ok(outcome) => {
                        debug!("{} {}:{} {:?}", record.kind, provider, external_id, outcome);
                        report.count(outcome);
                        continue;
                    }
                    Err(err) => match sync_error_kind(&err) {
                        Some(kind) => RecordFailure {
                            external_id: Some(external_id),
                            kind,
                            detail: err.detail(),
                        },
                        None => return Err(err),
                    },
                }
            }
            Err(err) => RecordFailure {
                external_id: err.external_id.clone(),
                kind: SyncErrorKind::Mapping,
                detail: err.to_string(),
            },
        };

        warn!(
            "Skipping {} record {} for org {} from {}: {}",
            record.kind,
            failure.external_id.as_deref().unwrap_or("<unknown>"),
            org_id,
            provider,
            failure.detail
        );
        append(
            audit,
            AuditEntry::new(
                org_id,
                provider,
                AuditKind::SyncFailure,
                format!("{:?}: {}", failure.kind, failure.detail),
            ),
        )
        .await;
        report.failed.push(failure);
    }

    append(
        audit,
        AuditEntry::new(
            org_id,
            provider,
            AuditKind::SyncUpsert,
            format!(
                "created={} updated={} unchanged={} failed={}",
                report.created,
                report.updated,
                report.unchanged,
                report.failed.len()
            ),
        ),
    )
    .await;

    Ok(report)
}

async fn append(audit: &dyn AuditLog, entry: AuditEntry) {
    if let Err(err) = audit.append(entry).await {
        warn!("Failed to append sync audit entry: {}", err);
    }
}
