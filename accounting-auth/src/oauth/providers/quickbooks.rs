//! QuickBooks Online adapter.
//!
//! Records are read through the QuickBooks query language against the
//! company identified by the credential's realm id. Access tokens live for an
//! hour and every refresh returns a refresh token, which may or may not differ
//! from the one sent.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;

use super::{
    classify_api_failure, missing_account_id, parse_json, read_response, refresh_grant,
    transport_error, AdapterConfig, ClientAuth, HttpClients,
};
use crate::error::{adapter_error, AdapterErrorKind, Error};
use crate::oauth::token::RefreshedTokens;
use crate::oauth::{Account, EntityKind, ProviderAdapter, ProviderKind, ProviderRecord};

pub const TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
pub const API_BASE_URL: &str = "https://quickbooks.api.intuit.com";

const MINOR_VERSION: &str = "75";
const PAGE_SIZE: usize = 100;

/// Fault code QuickBooks uses for authentication failures.
const AUTHENTICATION_FAILED: &str = "3200";

pub struct Adapter {
    config: AdapterConfig,
    token_url: String,
    api_base_url: String,
    clients: HttpClients,
}

impl Adapter {
    pub fn new(config: AdapterConfig) -> Result<Self, Error> {
        Ok(Self {
            token_url: config
                .token_url
                .clone()
                .unwrap_or_else(|| TOKEN_URL.to_string()),
            api_base_url: config
                .api_base_url
                .clone()
                .unwrap_or_else(|| API_BASE_URL.to_string()),
            clients: HttpClients::build(&config.http)?,
            config,
        })
    }

    /// Run a query to exhaustion, following `STARTPOSITION` pages.
    async fn query_all(
        &self,
        access_token: &str,
        realm_id: &str,
        entity: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, Error> {
        let filter = since
            .map(|since| {
                format!(
                    " where Metadata.LastUpdatedTime > '{}'",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true)
                )
            })
            .unwrap_or_default();

        let mut rows = Vec::new();
        let mut start = 1;
        loop {
            let statement = format!(
                "select * from {}{} STARTPOSITION {} MAXRESULTS {}",
                entity, filter, start, PAGE_SIZE
            );
            let page = self.query(access_token, realm_id, entity, &statement).await?;
            let count = page.len();
            rows.extend(page);
            if count < PAGE_SIZE {
                break;
            }
            start += PAGE_SIZE;
        }
        Ok(rows)
    }

    async fn query(
        &self,
        access_token: &str,
        realm_id: &str,
        entity: &str,
        statement: &str,
    ) -> Result<Vec<Value>, Error> {
        let url = format!("{}/v3/company/{}/query", self.api_base_url, realm_id);
        let response = self
            .clients
            .api
            .get(&url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .query(&[("query", statement), ("minorversion", MINOR_VERSION)])
            .send()
            .await
            .map_err(transport_error)?;
        let (status, headers, body) = read_response(response).await?;

        if !status.is_success() {
            let expired = status == StatusCode::UNAUTHORIZED && is_expired_token_fault(&body);
            return Err(classify_api_failure(status, &headers, &body, expired));
        }

        let json = parse_json(&body)?;
        if let Some(fault) = json.get("Fault") {
            return Err(adapter_error(
                AdapterErrorKind::Permanent,
                &format!("query fault: {}", fault),
            ));
        }

        // An empty result set comes back as an empty QueryResponse object.
        match json.pointer(&format!("/QueryResponse/{}", entity)) {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            Some(_) => Err(adapter_error(
                AdapterErrorKind::Transient,
                &format!("malformed QueryResponse for {}", entity),
            )),
            None => Ok(vec![]),
        }
    }

    async fn fetch_kind(
        &self,
        kind: EntityKind,
        access_token: &str,
        realm_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        let realm_id = realm_id.ok_or_else(|| missing_account_id("QuickBooks realm id"))?;
        let rows = self
            .query_all(access_token, realm_id, query_entity(kind), since)
            .await?;
        Ok(rows
            .into_iter()
            .map(|payload| ProviderRecord::new(kind, payload))
            .collect())
    }
}

fn query_entity(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Invoice => "Invoice",
        EntityKind::Payment => "Payment",
        EntityKind::Contact => "Customer",
    }
}

/// A 3200 fault whose detail says the token expired, as opposed to being revoked.
fn is_expired_token_fault(body: &str) -> bool {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    json.pointer("/Fault/Error")
        .and_then(Value::as_array)
        .map(|errors| {
            errors.iter().any(|error| {
                let code = error.get("code").and_then(Value::as_str);
                let detail = error
                    .get("Detail")
                    .or_else(|| error.get("detail"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                code == Some(AUTHENTICATION_FAILED) && detail.to_lowercase().contains("expired")
            })
        })
        .unwrap_or(false)
}

fn to_account(row: &Value) -> Option<Account> {
    Some(Account {
        id: row.get("Id")?.as_str()?.to_string(),
        name: row.get("Name")?.as_str()?.to_string(),
        account_type: row
            .get("AccountType")
            .and_then(Value::as_str)
            .map(str::to_string),
        currency: row
            .pointer("/CurrencyRef/value")
            .and_then(Value::as_str)
            .map(str::to_string),
        active: row.get("Active").and_then(Value::as_bool).unwrap_or(true),
    })
}

#[async_trait]
impl ProviderAdapter for Adapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::QuickBooks
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, Error> {
        refresh_grant(
            &self.clients.token,
            &self.token_url,
            &self.config,
            ClientAuth::Basic,
            refresh_token,
        )
        .await
    }

    async fn list_accounts(
        &self,
        access_token: &str,
        account_id: Option<&str>,
    ) -> Result<Vec<Account>, Error> {
        let realm_id = account_id.ok_or_else(|| missing_account_id("QuickBooks realm id"))?;
        let rows = self.query_all(access_token, realm_id, "Account", None).await?;
        rows.iter()
            .map(|row| {
                to_account(row).ok_or_else(|| {
                    adapter_error(AdapterErrorKind::Transient, "malformed Account row")
                })
            })
            .collect()
    }

    async fn fetch_invoices(
        &self,
        access_token: &str,
        account_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        self.fetch_kind(EntityKind::Invoice, access_token, account_id, since)
            .await
    }

    async fn fetch_payments(
        &self,
        access_token: &str,
        account_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        self.fetch_kind(EntityKind::Payment, access_token, account_id, since)
            .await
    }

    async fn fetch_contacts(
        &self,
        access_token: &str,
        account_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        self.fetch_kind(EntityKind::Contact, access_token, account_id, since)
            .await
    }
}
