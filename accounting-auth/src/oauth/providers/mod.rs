//! QuickBooks, Xero and Wave adapters plus the request plumbing they share.
//!
//! Every adapter classifies raw provider failures into the two-valued
//! [`AdapterErrorKind`] taxonomy before returning:
//!
//! * HTTP 429, 5xx, timeouts and connection errors are transient
//! * OAuth `invalid_grant` and `unauthorized_client` are permanent
//! * Any other 4xx from a token endpoint is permanent
//! * A token response that cannot be parsed is transient

pub mod quickbooks;
pub mod wave;
pub mod xero;

use std::time::{Duration as StdDuration, SystemTime};

use chrono::Duration;
use log::debug;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::token::RefreshedTokens;
use crate::error::{adapter_error, AdapterErrorKind, Error};
use crate::http::{HttpClientConfig, ProviderClient, ProviderClientBuilder};

/// Lifetime assumed when a token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Longest slice of a provider error body carried into error details.
const MAX_DETAIL_LEN: usize = 300;

/// OAuth client registration and endpoint overrides for one provider.
#[derive(Clone)]
pub struct AdapterConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Overrides the provider's production token endpoint.
    pub token_url: Option<String>,
    /// Overrides the provider's production API base URL.
    pub api_base_url: Option<String>,
    pub http: HttpClientConfig,
}

impl AdapterConfig {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            token_url: None,
            api_base_url: None,
            http: HttpClientConfig::default(),
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = Some(token_url.into());
        self
    }

    pub fn with_api_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = Some(api_base_url.into());
        self
    }

    pub fn with_http(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }
}

/// The pair of clients every adapter holds.
///
/// Data fetches retry transient failures with backoff. Refresh posts are never
/// retried by middleware: a provider that rotates refresh tokens may have
/// consumed the token even when the response was lost.
pub(crate) struct HttpClients {
    pub api: ProviderClient,
    pub token: ProviderClient,
}

impl HttpClients {
    pub fn build(config: &HttpClientConfig) -> Result<Self, Error> {
        let api = ProviderClientBuilder::from_config(config.clone()).build()?;
        let token = ProviderClientBuilder::from_config(config.clone())
            .with_max_retries(0)
            .build()?;
        Ok(Self { api, token })
    }
}

/// How the OAuth client authenticates to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientAuth {
    /// HTTP Basic with client id and secret.
    Basic,
    /// `client_id` and `client_secret` in the form body.
    Form,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Run the `refresh_token` grant against a token endpoint.
pub(crate) async fn refresh_grant(
    client: &ProviderClient,
    token_url: &str,
    config: &AdapterConfig,
    auth: ClientAuth,
    refresh_token: &str,
) -> Result<RefreshedTokens, Error> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];
    let mut request = client.post(token_url).header(ACCEPT, "application/json");
    match auth {
        ClientAuth::Basic => {
            request = request.basic_auth(
                &config.client_id,
                Some(config.client_secret.expose_secret()),
            );
        }
        ClientAuth::Form => {
            form.push(("client_id", config.client_id.as_str()));
            form.push(("client_secret", config.client_secret.expose_secret().as_str()));
        }
    }

    let response = request.form(&form).send().await.map_err(transport_error)?;
    let (status, headers, body) = read_response(response).await?;

    if !status.is_success() {
        return Err(classify_token_failure(status, &headers, &body));
    }

    let tokens: TokenResponse = serde_json::from_str(&body).map_err(|err| {
        adapter_error(
            AdapterErrorKind::Transient,
            &format!("malformed token response: {}", err),
        )
    })?;

    if tokens.access_token.is_empty() {
        return Err(adapter_error(
            AdapterErrorKind::Transient,
            "malformed token response: empty access_token",
        ));
    }

    Ok(RefreshedTokens {
        access_token: SecretString::from(tokens.access_token),
        refresh_token: tokens
            .refresh_token
            .filter(|token| !token.is_empty())
            .map(SecretString::from),
        expires_in: Duration::seconds(tokens.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
    })
}

/// Classify a non-success response from a token endpoint.
pub(crate) fn classify_token_failure(status: StatusCode, headers: &HeaderMap, body: &str) -> Error {
    if is_retryable_status(status) {
        return adapter_error(
            AdapterErrorKind::Transient,
            &http_detail(status, headers, body),
        );
    }

    let parsed = serde_json::from_str::<OAuthErrorResponse>(body).ok();
    let kind = match parsed.as_ref().map(|e| e.error.as_str()) {
        Some("invalid_grant") | Some("unauthorized_client") => AdapterErrorKind::Permanent,
        // Bad client credentials are an operator problem, not a revoked grant.
        Some("invalid_client") => AdapterErrorKind::Transient,
        _ if status.is_client_error() => AdapterErrorKind::Permanent,
        _ => AdapterErrorKind::Transient,
    };

    let detail = match parsed {
        Some(OAuthErrorResponse {
            error,
            error_description: Some(description),
        }) => format!("{}: {}", error, truncate(&description)),
        Some(OAuthErrorResponse { error, .. }) => error,
        None => http_detail(status, headers, body),
    };

    adapter_error(kind, &detail)
}

/// Classify a non-success response from a data endpoint.
///
/// `token_expired` is the adapter's reading of whether a 401 means the access
/// token expired, which a refresh fixes, rather than a revoked connection.
pub(crate) fn classify_api_failure(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    token_expired: bool,
) -> Error {
    let detail = http_detail(status, headers, body);
    let kind = if is_retryable_status(status) || (status == StatusCode::UNAUTHORIZED && token_expired)
    {
        AdapterErrorKind::Transient
    } else {
        AdapterErrorKind::Permanent
    };
    adapter_error(kind, &detail)
}

/// Connection errors, timeouts and exhausted retries are all transient.
pub(crate) fn transport_error(err: reqwest_middleware::Error) -> Error {
    adapter_error(
        AdapterErrorKind::Transient,
        &format!("request failed: {}", err),
    )
}

pub(crate) async fn read_response(
    response: reqwest::Response,
) -> Result<(StatusCode, HeaderMap, String), Error> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.map_err(|err| {
        adapter_error(
            AdapterErrorKind::Transient,
            &format!("failed to read response body: {}", err),
        )
    })?;
    debug!("Provider responded with {} ({} bytes)", status, body.len());
    Ok((status, headers, body))
}

pub(crate) fn parse_json(body: &str) -> Result<serde_json::Value, Error> {
    serde_json::from_str(body).map_err(|err| {
        adapter_error(
            AdapterErrorKind::Transient,
            &format!("malformed provider response: {}", err),
        )
    })
}

pub(crate) fn missing_account_id(what: &str) -> Error {
    adapter_error(
        AdapterErrorKind::Permanent,
        &format!("credential has no {}", what),
    )
}

/// Parse `Retry-After` as delay-seconds or an HTTP-date.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<StdDuration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(StdDuration::from_secs(seconds));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    Some(
        when.duration_since(SystemTime::now())
            .unwrap_or(StdDuration::ZERO),
    )
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn http_detail(status: StatusCode, headers: &HeaderMap, body: &str) -> String {
    let mut detail = format!("HTTP {}", status.as_u16());
    if let Some(delay) = retry_after(headers) {
        detail.push_str(&format!(" (retry after {}s)", delay.as_secs()));
    }
    let body = body.trim();
    if !body.is_empty() {
        detail.push_str(": ");
        detail.push_str(&truncate(body));
    }
    detail
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_DETAIL_LEN) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}
