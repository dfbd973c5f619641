//! Xero adapter.
//!
//! Every API call is scoped to a tenant through the `xero-tenant-id` header.
//! Xero rotates the refresh token on every successful refresh and the previous
//! token stops working shortly after.

use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, IF_MODIFIED_SINCE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde_json::Value;

use super::{
    classify_api_failure, missing_account_id, parse_json, read_response, refresh_grant,
    transport_error, AdapterConfig, ClientAuth, HttpClients,
};
use crate::error::{adapter_error, AdapterErrorKind, Error};
use crate::oauth::token::RefreshedTokens;
use crate::oauth::{Account, EntityKind, ProviderAdapter, ProviderKind, ProviderRecord};

pub const TOKEN_URL: &str = "https://identity.xero.com/connect/token";
pub const API_BASE_URL: &str = "https://api.xero.com";

/// Xero pages are fixed at 100 records.
const PAGE_SIZE: usize = 100;

const TENANT_HEADER: &str = "xero-tenant-id";

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

    async fn get(
        &self,
        access_token: &str,
        tenant_id: &str,
        resource: &str,
        page: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, Error> {
        let url = format!("{}/api.xro/2.0/{}", self.api_base_url, resource);
        let mut request = self
            .clients
            .api
            .get(&url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .header(TENANT_HEADER, tenant_id);
        if let Some(page) = page {
            request = request.query(&[("page", page.to_string())]);
        }
        if let Some(since) = since {
            request = request.header(
                IF_MODIFIED_SINCE,
                httpdate::fmt_http_date(SystemTime::from(since)),
            );
        }

        let response = request.send().await.map_err(transport_error)?;
        let (status, headers, body) = read_response(response).await?;

        // Nothing changed since the cursor.
        if status == StatusCode::NOT_MODIFIED {
            return Ok(vec![]);
        }
        if !status.is_success() {
            let expired = is_token_expired(&headers, &body);
            return Err(classify_api_failure(status, &headers, &body, expired));
        }

        match parse_json(&body)?.get(resource) {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            Some(_) => Err(adapter_error(
                AdapterErrorKind::Transient,
                &format!("malformed {} response", resource),
            )),
            None => Ok(vec![]),
        }
    }

    async fn get_all(
        &self,
        access_token: &str,
        tenant_id: &str,
        resource: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, Error> {
        let mut rows = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .get(access_token, tenant_id, resource, Some(page), since)
                .await?;
            let count = batch.len();
            rows.extend(batch);
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(rows)
    }

    async fn fetch_kind(
        &self,
        kind: EntityKind,
        access_token: &str,
        tenant_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        let tenant_id = tenant_id.ok_or_else(|| missing_account_id("Xero tenant id"))?;
        let rows = self
            .get_all(access_token, tenant_id, resource(kind), since)
            .await?;
        Ok(rows
            .into_iter()
            .map(|payload| ProviderRecord::new(kind, payload))
            .collect())
    }
}

fn resource(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Invoice => "Invoices",
        EntityKind::Payment => "Payments",
        EntityKind::Contact => "Contacts",
    }
}

fn is_token_expired(headers: &HeaderMap, body: &str) -> bool {
    let in_header = headers
        .get(WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("TokenExpired"))
        .unwrap_or(false);
    in_header || body.contains("TokenExpired")
}

fn to_account(row: &Value) -> Option<Account> {
    Some(Account {
        id: row.get("AccountID")?.as_str()?.to_string(),
        name: row.get("Name")?.as_str()?.to_string(),
        account_type: row.get("Type").and_then(Value::as_str).map(str::to_string),
        currency: row
            .get("CurrencyCode")
            .and_then(Value::as_str)
            .map(str::to_string),
        active: row.get("Status").and_then(Value::as_str) != Some("ARCHIVED"),
    })
}

#[async_trait]
impl ProviderAdapter for Adapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Xero
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
        let tenant_id = account_id.ok_or_else(|| missing_account_id("Xero tenant id"))?;
        // The Accounts endpoint is not paged.
        let rows = self
            .get(access_token, tenant_id, "Accounts", None, None)
            .await?;
        rows.iter()
            .map(|row| {
                to_account(row).ok_or_else(|| {
                    adapter_error(AdapterErrorKind::Transient, "malformed Accounts row")
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
