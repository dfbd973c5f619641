//! Append-only audit trail of refresh attempts, failures and sync operations.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::oauth::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    RefreshAttempt,
    RefreshSuccess,
    RefreshFailure,
    SyncUpsert,
    SyncFailure,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::RefreshAttempt => "refresh_attempt",
            AuditKind::RefreshSuccess => "refresh_success",
            AuditKind::RefreshFailure => "refresh_failure",
            AuditKind::SyncUpsert => "sync_upsert",
            AuditKind::SyncFailure => "sync_failure",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record. `detail` never contains token material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub org_id: String,
    pub provider: ProviderKind,
    pub kind: AuditKind,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(org_id: &str, provider: ProviderKind, kind: AuditKind, detail: impl Into<String>) -> Self {
        Self {
            org_id: org_id.to_string(),
            provider,
            kind,
            timestamp: Utc::now(),
            detail: detail.into(),
        }
    }
}

/// Append-only sink for [`AuditEntry`] records. Writers need no coordination.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), Error>;
}
