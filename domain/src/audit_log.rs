//! Database-backed [`AuditLog`].

use std::sync::Arc;

use accounting_auth::audit::{AuditEntry, AuditKind, AuditLog};
use accounting_auth::error::{audit_error, Error as AuthError};
use async_trait::async_trait;
use entity::audit_entries::Model;
use entity::audit_kind::AuditKind as AuditKindColumn;
use entity::Id;
use entity_api::audit_entry;
use sea_orm::DatabaseConnection;

use crate::provider::to_column;

pub struct DbAuditLog {
    db: Arc<DatabaseConnection>,
}

impl DbAuditLog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn kind_column(kind: AuditKind) -> AuditKindColumn {
    match kind {
        AuditKind::RefreshAttempt => AuditKindColumn::RefreshAttempt,
        AuditKind::RefreshSuccess => AuditKindColumn::RefreshSuccess,
        AuditKind::RefreshFailure => AuditKindColumn::RefreshFailure,
        AuditKind::SyncUpsert => AuditKindColumn::SyncUpsert,
        AuditKind::SyncFailure => AuditKindColumn::SyncFailure,
    }
}

#[async_trait]
impl AuditLog for DbAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuthError> {
        let model = Model {
            id: Id::nil(),
            org_id: entry.org_id,
            provider: to_column(entry.provider),
            kind: kind_column(entry.kind),
            detail: entry.detail,
            created_at: entry.timestamp.into(),
        };

        audit_entry::create(&self.db, model)
            .await
            .map_err(|err| audit_error(&err.to_string()))?;
        Ok(())
    }
}
