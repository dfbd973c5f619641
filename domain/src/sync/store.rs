//! Canonical storage backends.

use std::sync::Arc;

use accounting_auth::oauth::{EntityKind, ProviderKind};
use async_trait::async_trait;
use entity::{contacts, invoices, payments, Id};
use entity_api::error::{EntityApiErrorKind, Error as EntityApiError};
use entity_api::{contact, invoice, payment};
use sea_orm::DatabaseConnection;

use super::{CanonicalRecord, CanonicalStore, Contact, Invoice, Payment};
use crate::error::{sync_error, Error, SyncErrorKind};
use crate::provider::{from_column, to_column};

/// [`CanonicalStore`] over the `invoices`, `payments` and `contacts` tables.
///
/// Writes go through an `ON CONFLICT (external_id, source)` upsert that only
/// updates rows of the same org, so a concurrent writer for another org can
/// never take over a row between the read and the write.
pub struct DbCanonicalStore {
    db: Arc<DatabaseConnection>,
}

impl DbCanonicalStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn write_error(err: EntityApiError, record: &CanonicalRecord) -> Error {
    match err.error_kind {
        EntityApiErrorKind::RecordNotInserted | EntityApiErrorKind::RecordNotFound => sync_error(
            SyncErrorKind::Ownership,
            &format!(
                "{} {}:{} belongs to another org",
                record.kind(),
                record.source(),
                record.external_id()
            ),
        ),
        _ => err.into(),
    }
}

#[async_trait]
impl CanonicalStore for DbCanonicalStore {
    async fn find(
        &self,
        kind: EntityKind,
        source: ProviderKind,
        external_id: &str,
    ) -> Result<Option<CanonicalRecord>, Error> {
        let source = to_column(source);
        Ok(match kind {
            EntityKind::Invoice => invoice::find_by_external_id(&self.db, external_id, source)
                .await?
                .map(invoice_record),
            EntityKind::Payment => payment::find_by_external_id(&self.db, external_id, source)
                .await?
                .map(payment_record),
            EntityKind::Contact => contact::find_by_external_id(&self.db, external_id, source)
                .await?
                .map(contact_record),
        })
    }

    async fn write(&self, record: &CanonicalRecord) -> Result<(), Error> {
        let now = chrono::Utc::now();
        let written = match record {
            CanonicalRecord::Invoice(r) => invoice::upsert(
                &self.db,
                invoices::Model {
                    id: Id::nil(),
                    org_id: r.org_id.clone(),
                    source: to_column(r.source),
                    external_id: r.external_id.clone(),
                    number: r.number.clone(),
                    contact_external_id: r.contact_external_id.clone(),
                    status: r.status.clone(),
                    currency: r.currency.clone(),
                    total_minor: r.total_minor,
                    balance_minor: r.balance_minor,
                    issued_on: r.issued_on,
                    due_on: r.due_on,
                    reference: r.reference.clone(),
                    created_at: now.into(),
                    updated_at: now.into(),
                },
            )
            .await
            .map(|_| ()),
            CanonicalRecord::Payment(r) => payment::upsert(
                &self.db,
                payments::Model {
                    id: Id::nil(),
                    org_id: r.org_id.clone(),
                    source: to_column(r.source),
                    external_id: r.external_id.clone(),
                    invoice_external_id: r.invoice_external_id.clone(),
                    currency: r.currency.clone(),
                    amount_minor: r.amount_minor,
                    paid_on: r.paid_on,
                    reference: r.reference.clone(),
                    created_at: now.into(),
                    updated_at: now.into(),
                },
            )
            .await
            .map(|_| ()),
            CanonicalRecord::Contact(r) => contact::upsert(
                &self.db,
                contacts::Model {
                    id: Id::nil(),
                    org_id: r.org_id.clone(),
                    source: to_column(r.source),
                    external_id: r.external_id.clone(),
                    display_name: r.display_name.clone(),
                    email: r.email.clone(),
                    phone: r.phone.clone(),
                    is_customer: r.is_customer,
                    is_supplier: r.is_supplier,
                    reference: r.reference.clone(),
                    created_at: now.into(),
                    updated_at: now.into(),
                },
            )
            .await
            .map(|_| ()),
        };

        written.map_err(|err| write_error(err, record))
    }
}

fn invoice_record(model: invoices::Model) -> CanonicalRecord {
    CanonicalRecord::Invoice(Invoice {
        org_id: model.org_id,
        source: from_column(model.source),
        external_id: model.external_id,
        number: model.number,
        contact_external_id: model.contact_external_id,
        status: model.status,
        currency: model.currency,
        total_minor: model.total_minor,
        balance_minor: model.balance_minor,
        issued_on: model.issued_on,
        due_on: model.due_on,
        reference: model.reference,
    })
}

fn payment_record(model: payments::Model) -> CanonicalRecord {
    CanonicalRecord::Payment(Payment {
        org_id: model.org_id,
        source: from_column(model.source),
        external_id: model.external_id,
        invoice_external_id: model.invoice_external_id,
        currency: model.currency,
        amount_minor: model.amount_minor,
        paid_on: model.paid_on,
        reference: model.reference,
    })
}

fn contact_record(model: contacts::Model) -> CanonicalRecord {
    CanonicalRecord::Contact(Contact {
        org_id: model.org_id,
        source: from_column(model.source),
        external_id: model.external_id,
        display_name: model.display_name,
        email: model.email,
        phone: model.phone,
        is_customer: model.is_customer,
        is_supplier: model.is_supplier,
        reference: model.reference,
    })
}

/// HashMap-backed [`CanonicalStore`] for tests. Enforces the same org guard as the database.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct MemoryCanonicalStore {
    rows: Arc<tokio::sync::Mutex<std::collections::HashMap<(EntityKind, ProviderKind, String), CanonicalRecord>>>,
}

#[cfg(test)]
impl MemoryCanonicalStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[cfg(test)]
#[async_trait]
impl CanonicalStore for MemoryCanonicalStore {
    async fn find(
        &self,
        kind: EntityKind,
        source: ProviderKind,
        external_id: &str,
    ) -> Result<Option<CanonicalRecord>, Error> {
        Ok(self
            .rows
            .lock()
            .await
            .get(&(kind, source, external_id.to_string()))
            .cloned())
    }

    async fn write(&self, record: &CanonicalRecord) -> Result<(), Error> {
        let key = (record.kind(), record.source(), record.external_id().to_string());
        let mut rows = self.rows.lock().await;
        if rows
            .get(&key)
            .is_some_and(|existing| existing.org_id() != record.org_id())
        {
            return Err(sync_error(SyncErrorKind::Ownership, "belongs to another org"));
        }
        rows.insert(key, record.clone());
        Ok(())
    }
}

#[cfg(test)]
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use crate::error::{DomainErrorKind, InternalErrorKind};
    use chrono::NaiveDate;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn invoice_model(org_id: &str) -> invoices::Model {
        let now = chrono::Utc::now();
        invoices::Model {
            id: Id::new_v4(),
            org_id: org_id.to_string(),
            source: entity::provider::Provider::Xero,
            external_id: "inv-1".to_string(),
            number: Some("INV-0001".to_string()),
            contact_external_id: None,
            status: "open".to_string(),
            currency: "NZD".to_string(),
            total_minor: 11500,
            balance_minor: 11500,
            issued_on: NaiveDate::from_ymd_opt(2018, 2, 15),
            due_on: None,
            reference: "xero:inv-1 #INV-0001".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[tokio::test]
    async fn find_converts_rows_to_records() -> Result<(), Error> {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![invoice_model("org-1")]])
            .into_connection();
        let store = DbCanonicalStore::new(Arc::new(db));

        let found = store
            .find(EntityKind::Invoice, ProviderKind::Xero, "inv-1")
            .await?;
        match found {
            Some(CanonicalRecord::Invoice(invoice)) => {
                assert_eq!(invoice.org_id, "org-1");
                assert_eq!(invoice.source, ProviderKind::Xero);
                assert_eq!(invoice.total_minor, 11500);
            }
            other => panic!("unexpected record: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn write_without_returned_row_is_an_ownership_conflict() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<invoices::Model, Vec<invoices::Model>, _>(vec![vec![]])
            .into_connection();
        let store = DbCanonicalStore::new(Arc::new(db));
        let record = invoice_record(invoice_model("org-2"));

        let err = store.write(&record).await.unwrap_err();
        assert_eq!(
            err.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Sync(SyncErrorKind::Ownership))
        );
    }
}
