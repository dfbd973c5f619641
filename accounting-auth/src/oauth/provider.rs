//! Provider adapter trait and types.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::token::RefreshedTokens;
use crate::error::Error;

/// Known accounting providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    QuickBooks,
    Xero,
    Wave,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::QuickBooks, ProviderKind::Xero, ProviderKind::Wave];

    /// Get the provider identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::QuickBooks => "quickbooks",
            ProviderKind::Xero => "xero",
            ProviderKind::Wave => "wave",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ProviderKindParseError(pub String);

impl FromStr for ProviderKind {
    type Err = ProviderKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quickbooks" => Ok(ProviderKind::QuickBooks),
            "xero" => Ok(ProviderKind::Xero),
            "wave" => Ok(ProviderKind::Wave),
            other => Err(ProviderKindParseError(other.to_string())),
        }
    }
}

/// Kinds of provider records the sync layer consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Invoice,
    Payment,
    Contact,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Invoice => "invoice",
            EntityKind::Payment => "payment",
            EntityKind::Contact => "contact",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger account (chart of accounts entry) as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    /// Provider's account classification (e.g. "Bank", "REVENUE", "ASSET").
    pub account_type: Option<String>,
    pub currency: Option<String>,
    pub active: bool,
}

/// One provider record in its wire shape.
///
/// Adapters unwrap the response envelope; the payload of each record is left
/// untouched so that a malformed record can be rejected on its own by the mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRecord {
    pub kind: EntityKind,
    pub payload: serde_json::Value,
}

impl ProviderRecord {
    pub fn new(kind: EntityKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }
}

/// Uniform capability surface over an accounting provider's API.
///
/// Each implementation owns its provider-specific request shaping, response
/// parsing and error classification. Every failure leaves the adapter as an
/// [`AdapterErrorKind`](crate::error::AdapterErrorKind) of `Transient` or `Permanent`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Get the provider kind.
    fn provider(&self) -> ProviderKind;

    /// Exchange a refresh token for a new access token.
    ///
    /// # Arguments
    ///
    /// * `refresh_token` - The current refresh token
    ///
    /// # Returns
    ///
    /// New tokens; `refresh_token` is set when the provider rotated it.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, Error>;

    /// List the chart of accounts.
    ///
    /// # Arguments
    ///
    /// * `access_token` - Valid access token
    /// * `account_id` - Provider-side company/tenant/business identifier
    async fn list_accounts(
        &self,
        access_token: &str,
        account_id: Option<&str>,
    ) -> Result<Vec<Account>, Error>;

    /// Fetch invoices, optionally only those changed after `since`.
    async fn fetch_invoices(
        &self,
        access_token: &str,
        account_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error>;

    /// Fetch payments, optionally only those changed after `since`.
    async fn fetch_payments(
        &self,
        access_token: &str,
        account_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error>;

    /// Fetch contacts, optionally only those changed after `since`.
    async fn fetch_contacts(
        &self,
        access_token: &str,
        account_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error>;

    /// Fetch records of the given kind.
    async fn fetch(
        &self,
        kind: EntityKind,
        access_token: &str,
        account_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        match kind {
            EntityKind::Invoice => self.fetch_invoices(access_token, account_id, since).await,
            EntityKind::Payment => self.fetch_payments(access_token, account_id, since).await,
            EntityKind::Contact => self.fetch_contacts(access_token, account_id, since).await,
        }
    }
}
