//! Wave adapter.
//!
//! Wave exposes a single GraphQL endpoint; every query is scoped to a business
//! id. GraphQL reports most failures inside a 200 response, so the `errors`
//! array is classified as well as the HTTP status. Wave's public API has no
//! payment listing, so payments are derived from invoices with an amount paid.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};

use super::{
    classify_api_failure, missing_account_id, parse_json, read_response, refresh_grant,
    transport_error, AdapterConfig, ClientAuth, HttpClients,
};
use crate::error::{adapter_error, AdapterErrorKind, Error};
use crate::oauth::token::RefreshedTokens;
use crate::oauth::{Account, EntityKind, ProviderAdapter, ProviderKind, ProviderRecord};

pub const TOKEN_URL: &str = "https://api.waveapps.com/oauth2/token/";
/// The GraphQL endpoint; `AdapterConfig::api_base_url` replaces it outright.
pub const GRAPHQL_URL: &str = "https://gql.waveapps.com/graphql/public";

const PAGE_SIZE: u32 = 100;

const INVOICES_QUERY: &str = r#"
query($businessId: ID!, $page: Int!, $pageSize: Int!, $modifiedAtAfter: DateTime) {
  business(id: $businessId) {
    invoices(page: $page, pageSize: $pageSize, modifiedAtAfter: $modifiedAtAfter) {
      pageInfo { currentPage totalPages }
      edges {
        node {
          id
          invoiceNumber
          status
          invoiceDate
          dueDate
          modifiedAt
          customer { id }
          total { value minorUnitValue currency { code } }
          amountDue { value minorUnitValue currency { code } }
          amountPaid { value minorUnitValue currency { code } }
        }
      }
    }
  }
}"#;

const CUSTOMERS_QUERY: &str = r#"
query($businessId: ID!, $page: Int!, $pageSize: Int!, $modifiedAtAfter: DateTime) {
  business(id: $businessId) {
    customers(page: $page, pageSize: $pageSize, modifiedAtAfter: $modifiedAtAfter) {
      pageInfo { currentPage totalPages }
      edges {
        node { id name email phone mobile modifiedAt }
      }
    }
  }
}"#;

const ACCOUNTS_QUERY: &str = r#"
query($businessId: ID!, $page: Int!, $pageSize: Int!) {
  business(id: $businessId) {
    accounts(page: $page, pageSize: $pageSize) {
      pageInfo { currentPage totalPages }
      edges {
        node { id name isArchived type { value } currency { code } }
      }
    }
  }
}"#;

pub struct Adapter {
    config: AdapterConfig,
    token_url: String,
    graphql_url: String,
    clients: HttpClients,
}

impl Adapter {
    pub fn new(config: AdapterConfig) -> Result<Self, Error> {
        Ok(Self {
            token_url: config
                .token_url
                .clone()
                .unwrap_or_else(|| TOKEN_URL.to_string()),
            graphql_url: config
                .api_base_url
                .clone()
                .unwrap_or_else(|| GRAPHQL_URL.to_string()),
            clients: HttpClients::build(&config.http)?,
            config,
        })
    }

    async fn graphql(
        &self,
        access_token: &str,
        query: &str,
        variables: Value,
    ) -> Result<Value, Error> {
        let body = json!({ "query": query, "variables": variables }).to_string();
        let response = self
            .clients
            .api
            .post(&self.graphql_url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;
        let (status, headers, body) = read_response(response).await?;

        if !status.is_success() {
            let expired = graphql_errors(&body)
                .map(|errors| classify_graphql_errors(&errors) == Some(AdapterErrorKind::Transient))
                .unwrap_or(false);
            return Err(classify_api_failure(status, &headers, &body, expired));
        }

        let json = parse_json(&body)?;
        if let Some(Value::Array(errors)) = json.get("errors") {
            if !errors.is_empty() {
                let kind = classify_graphql_errors(errors).unwrap_or(AdapterErrorKind::Permanent);
                return Err(adapter_error(kind, &describe_graphql_errors(errors)));
            }
        }
        Ok(json)
    }

    /// Run a paged `business { <connection> }` query to the last page and collect the nodes.
    async fn connection_nodes(
        &self,
        access_token: &str,
        business_id: &str,
        query: &str,
        connection: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, Error> {
        let mut nodes = Vec::new();
        let mut page: u32 = 1;
        loop {
            let mut variables = json!({
                "businessId": business_id,
                "page": page,
                "pageSize": PAGE_SIZE,
            });
            if let Some(since) = since {
                variables["modifiedAtAfter"] =
                    Value::String(since.to_rfc3339_opts(SecondsFormat::Secs, true));
            }

            let response = self.graphql(access_token, query, variables).await?;
            let Some(page_data) = response.pointer(&format!("/data/business/{}", connection))
            else {
                return Err(adapter_error(
                    AdapterErrorKind::Permanent,
                    &format!("business {} not found or has no {}", business_id, connection),
                ));
            };

            if let Some(Value::Array(edges)) = page_data.get("edges") {
                nodes.extend(edges.iter().filter_map(|edge| edge.get("node").cloned()));
            }

            let total_pages = page_data
                .pointer("/pageInfo/totalPages")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            if u64::from(page) >= total_pages {
                break;
            }
            page += 1;
        }
        Ok(nodes)
    }

    async fn invoices(
        &self,
        access_token: &str,
        business_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, Error> {
        let business_id = business_id.ok_or_else(|| missing_account_id("Wave business id"))?;
        self.connection_nodes(access_token, business_id, INVOICES_QUERY, "invoices", since)
            .await
    }
}

fn graphql_errors(body: &str) -> Option<Vec<Value>> {
    let json: Value = serde_json::from_str(body).ok()?;
    json.get("errors")?.as_array().cloned()
}

/// Most severe classification across the error list; `Permanent` wins over
/// `Transient`. `None` when no error carries a known code.
fn classify_graphql_errors(errors: &[Value]) -> Option<AdapterErrorKind> {
    let mut result = None;
    for error in errors {
        let code = error.pointer("/extensions/code").and_then(Value::as_str);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let kind = match code {
            Some("UNAUTHENTICATED") if message.contains("expired") => AdapterErrorKind::Transient,
            Some("UNAUTHENTICATED") => AdapterErrorKind::Permanent,
            Some("THROTTLED") | Some("INTERNAL_SERVER_ERROR") => AdapterErrorKind::Transient,
            Some(_) => AdapterErrorKind::Permanent,
            None => continue,
        };
        if kind == AdapterErrorKind::Permanent {
            return Some(kind);
        }
        result = Some(kind);
    }
    result
}

fn describe_graphql_errors(errors: &[Value]) -> String {
    errors
        .iter()
        .map(|error| {
            let code = error
                .pointer("/extensions/code")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN");
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            format!("{}: {}", code, message)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Minor units paid on an invoice node; Wave may encode the value as a number or a string.
fn amount_paid(invoice: &Value) -> i64 {
    match invoice.pointer("/amountPaid/minorUnitValue") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn to_account(node: &Value) -> Option<Account> {
    Some(Account {
        id: node.get("id")?.as_str()?.to_string(),
        name: node.get("name")?.as_str()?.to_string(),
        account_type: node
            .pointer("/type/value")
            .and_then(Value::as_str)
            .map(str::to_string),
        currency: node
            .pointer("/currency/code")
            .and_then(Value::as_str)
            .map(str::to_string),
        active: !node
            .get("isArchived")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

#[async_trait]
impl ProviderAdapter for Adapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Wave
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, Error> {
        refresh_grant(
            &self.clients.token,
            &self.token_url,
            &self.config,
            ClientAuth::Form,
            refresh_token,
        )
        .await
    }

    async fn list_accounts(
        &self,
        access_token: &str,
        account_id: Option<&str>,
    ) -> Result<Vec<Account>, Error> {
        let business_id = account_id.ok_or_else(|| missing_account_id("Wave business id"))?;
        let nodes = self
            .connection_nodes(access_token, business_id, ACCOUNTS_QUERY, "accounts", None)
            .await?;
        nodes
            .iter()
            .map(|node| {
                to_account(node).ok_or_else(|| {
                    adapter_error(AdapterErrorKind::Transient, "malformed account node")
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
        let invoices = self.invoices(access_token, account_id, since).await?;
        Ok(invoices
            .into_iter()
            .map(|node| ProviderRecord::new(EntityKind::Invoice, node))
            .collect())
    }

    async fn fetch_payments(
        &self,
        access_token: &str,
        account_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        let invoices = self.invoices(access_token, account_id, since).await?;
        Ok(invoices
            .into_iter()
            .filter(|node| amount_paid(node) > 0)
            .map(|node| ProviderRecord::new(EntityKind::Payment, node))
            .collect())
    }

    async fn fetch_contacts(
        &self,
        access_token: &str,
        account_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderRecord>, Error> {
        let business_id = account_id.ok_or_else(|| missing_account_id("Wave business id"))?;
        let nodes = self
            .connection_nodes(access_token, business_id, CUSTOMERS_QUERY, "customers", since)
            .await?;
        Ok(nodes
            .into_iter()
            .map(|node| ProviderRecord::new(EntityKind::Contact, node))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpClientConfig;
    use mockito::Matcher;
    use secrecy::{ExposeSecret, SecretString};

    fn adapter(server: &mockito::Server) -> Adapter {
        let config = AdapterConfig::new("wave-client", SecretString::from("wave-secret".to_string()))
            .with_token_url(format!("{}/oauth2/token/", server.url()))
            .with_api_base_url(format!("{}/graphql/public", server.url()))
            .with_http(HttpClientConfig {
                max_retries: 0,
                ..HttpClientConfig::default()
            });
        Adapter::new(config).unwrap()
    }

    fn invoice(id: &str, paid: i64) -> Value {
        json!({
            "node": {
                "id": id,
                "invoiceNumber": "7",
                "status": "PARTIAL",
                "invoiceDate": "2024-02-01",
                "dueDate": "2024-03-01",
                "modifiedAt": "2024-02-10T12:00:00Z",
                "customer": {"id": "cust-1"},
                "total": {"value": "100.00", "minorUnitValue": 10000, "currency": {"code": "USD"}},
                "amountDue": {"value": "60.00", "minorUnitValue": 6000, "currency": {"code": "USD"}},
                "amountPaid": {"value": "40.00", "minorUnitValue": paid, "currency": {"code": "USD"}}
            }
        })
    }

    fn invoices_page(edges: Vec<Value>, current: u32, total: u32) -> String {
        json!({
            "data": {
                "business": {
                    "invoices": {
                        "pageInfo": {"currentPage": current, "totalPages": total},
                        "edges": edges
                    }
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn refresh_posts_client_credentials_in_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth2/token/")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_id".into(), "wave-client".into()),
                Matcher::UrlEncoded("client_secret".into(), "wave-secret".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"at-2","refresh_token":"rt-2","expires_in":7200}"#)
            .create_async()
            .await;

        let tokens = adapter(&server).refresh("rt-1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(tokens.access_token.expose_secret(), "at-2");
        assert_eq!(tokens.expires_in, chrono::Duration::seconds(7200));
    }

    #[tokio::test]
    async fn fetch_invoices_walks_all_pages() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql/public")
            .match_body(Matcher::PartialJson(json!({"variables": {"page": 1}})))
            .with_status(200)
            .with_body(invoices_page(vec![invoice("inv-1", 0)], 1, 2))
            .create_async()
            .await;
        server
            .mock("POST", "/graphql/public")
            .match_body(Matcher::PartialJson(json!({"variables": {"page": 2}})))
            .with_status(200)
            .with_body(invoices_page(vec![invoice("inv-2", 4000)], 2, 2))
            .create_async()
            .await;

        let records = adapter(&server)
            .fetch_invoices("at-1", Some("biz-1"), None)
            .await
            .unwrap();

        let ids: Vec<_> = records.iter().map(|r| r.payload["id"].clone()).collect();
        assert_eq!(ids, vec![json!("inv-1"), json!("inv-2")]);
    }

    #[tokio::test]
    async fn payments_are_invoices_with_amount_paid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql/public")
            .with_status(200)
            .with_body(invoices_page(
                vec![invoice("inv-1", 0), invoice("inv-2", 4000)],
                1,
                1,
            ))
            .create_async()
            .await;

        let records = adapter(&server)
            .fetch_payments("at-1", Some("biz-1"), None)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EntityKind::Payment);
        assert_eq!(records[0].payload["id"], "inv-2");
    }

    #[tokio::test]
    async fn expired_token_graphql_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql/public")
            .with_status(200)
            .with_body(
                json!({
                    "errors": [{
                        "message": "Access token has expired.",
                        "extensions": {"code": "UNAUTHENTICATED"}
                    }],
                    "data": null
                })
                .to_string(),
            )
            .create_async()
            .await;

        let err = adapter(&server)
            .fetch_contacts("at-1", Some("biz-1"), None)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unauthenticated_graphql_error_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql/public")
            .with_status(200)
            .with_body(
                r#"{"errors":[{"message":"Invalid token.","extensions":{"code":"UNAUTHENTICATED"}}]}"#,
            )
            .create_async()
            .await;

        let err = adapter(&server)
            .fetch_contacts("at-1", Some("biz-1"), None)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.detail(), "UNAUTHENTICATED: Invalid token.");
    }

    #[tokio::test]
    async fn throttled_graphql_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql/public")
            .with_status(200)
            .with_body(r#"{"errors":[{"message":"Slow down","extensions":{"code":"THROTTLED"}}]}"#)
            .create_async()
            .await;

        let err = adapter(&server)
            .fetch_invoices("at-1", Some("biz-1"), None)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn list_accounts_maps_nodes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql/public")
            .with_status(200)
            .with_body(
                json!({
                    "data": {"business": {"accounts": {
                        "pageInfo": {"currentPage": 1, "totalPages": 1},
                        "edges": [{"node": {
                            "id": "acc-1",
                            "name": "Cash on Hand",
                            "isArchived": false,
                            "type": {"value": "ASSET"},
                            "currency": {"code": "CAD"}
                        }}]
                    }}}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let accounts = adapter(&server)
            .list_accounts("at-1", Some("biz-1"))
            .await
            .unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].currency.as_deref(), Some("CAD"));
        assert!(accounts[0].active);
    }

    #[test]
    fn permanent_graphql_error_outranks_transient() {
        let errors = vec![
            json!({"message": "busy", "extensions": {"code": "THROTTLED"}}),
            json!({"message": "no", "extensions": {"code": "FORBIDDEN"}}),
        ];
        assert_eq!(
            classify_graphql_errors(&errors),
            Some(AdapterErrorKind::Permanent)
        );
    }
}
