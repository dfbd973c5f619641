//! Provider HTTP client builder with timeout and retry middleware.

use std::time::Duration;

use reqwest_middleware::ClientBuilder;
use reqwest_retry::RetryTransientMiddleware;

use super::BackoffPolicy;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum number of retries on transient failures.
    pub max_retries: u32,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            user_agent: format!("accounting-sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client used to talk to accounting providers.
pub type ProviderClient = reqwest_middleware::ClientWithMiddleware;

/// Builder for provider HTTP clients.
///
/// Every client gets a bounded request timeout. Transient failures (connect
/// errors, timeouts, 429 and 5xx) are retried with exponential backoff up to
/// `max_retries` times; a client built with zero retries sends each request once.
pub struct ProviderClientBuilder {
    config: HttpClientConfig,
}

impl ProviderClientBuilder {
    /// Create a new client builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: HttpClientConfig) -> Self {
        Self { config }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    /// Build the configured HTTP client.
    pub fn build(self) -> Result<ProviderClient, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent)
            .build()?;

        let mut builder = ClientBuilder::new(client);
        if self.config.max_retries > 0 {
            // One request timeout per attempt bounds the whole retry sequence.
            let attempts = self.config.max_retries.saturating_add(1);
            let retry_policy = BackoffPolicy::new(self.config.max_retries)
                .with_retry_deadline(self.config.timeout.saturating_mul(attempts));
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(builder.build())
    }
}

impl Default for ProviderClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let builder = ProviderClientBuilder::new();
        assert_eq!(builder.config.timeout, Duration::from_secs(30));
        assert_eq!(builder.config.max_retries, 3);
    }

    #[test]
    fn test_builder_with_max_retries() {
        let builder = ProviderClientBuilder::new()
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(0);
        assert_eq!(builder.config.timeout, Duration::from_secs(5));
        assert_eq!(builder.config.max_retries, 0);
    }

    #[tokio::test]
    async fn test_client_without_retries_sends_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let client = ProviderClientBuilder::new()
            .with_max_retries(0)
            .build()
            .unwrap();
        let response = client
            .get(format!("{}/flaky", server.url()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 503);
        mock.assert_async().await;
    }
}
