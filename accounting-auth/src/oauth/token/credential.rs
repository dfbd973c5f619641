//! Credential types.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;

use crate::oauth::ProviderKind;

/// Composite key identifying one tenant's connection to one provider.
///
/// Every in-memory structure that holds per-credential state is keyed by this,
/// never by provider alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub org_id: String,
    pub provider: ProviderKind,
}

impl CredentialKey {
    pub fn new(org_id: &str, provider: ProviderKind) -> Self {
        Self {
            org_id: org_id.to_string(),
            provider,
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.org_id, self.provider.as_str())
    }
}

/// Stored OAuth credential for one (org, provider) pair.
///
/// `Debug` is safe to derive: `SecretString` redacts its contents.
#[derive(Debug, Clone)]
pub struct Credential {
    pub org_id: String,
    pub provider: ProviderKind,
    /// Provider-side account the tenant connected (QuickBooks realm, Xero tenant, Wave business).
    pub external_account_id: Option<String>,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub enabled: bool,
    pub last_refresh_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(&self.org_id, self.provider)
    }

    /// True when the access token expires within `margin` of `now`.
    pub fn needs_refresh(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at <= now + margin
    }

    /// Apply a successful refresh. The refresh token is replaced only when the provider rotated it.
    pub fn apply_refresh(&mut self, tokens: RefreshedTokens, now: DateTime<Utc>) {
        self.access_token = tokens.access_token;
        if let Some(rotated) = tokens.refresh_token {
            self.refresh_token = rotated;
        }
        self.expires_at = now + tokens.expires_in;
        self.last_refresh_error = None;
        self.updated_at = now;
    }

    /// Record a failed refresh, leaving tokens and expiry untouched.
    pub fn record_failure(&mut self, detail: &str, now: DateTime<Utc>) {
        self.last_refresh_error = Some(detail.to_string());
        self.updated_at = now;
    }

    /// Record a permanent failure and disable the credential until an external reconnect.
    pub fn disable(&mut self, detail: &str, now: DateTime<Utc>) {
        self.record_failure(detail, now);
        self.enabled = false;
    }
}

/// Tokens returned by a provider's refresh grant.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: SecretString,
    /// Present when the provider rotated the refresh token.
    pub refresh_token: Option<SecretString>,
    pub expires_in: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn credential(expires_at: DateTime<Utc>) -> Credential {
        Credential {
            org_id: "org-1".to_string(),
            provider: ProviderKind::Xero,
            external_account_id: Some("tenant-1".to_string()),
            access_token: SecretString::from("access".to_string()),
            refresh_token: SecretString::from("refresh".to_string()),
            expires_at,
            enabled: true,
            last_refresh_error: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_outside_margin_does_not_need_refresh() {
        let now = Utc::now();
        let cred = credential(now + Duration::minutes(30));
        assert!(!cred.needs_refresh(Duration::seconds(60), now));
    }

    #[test]
    fn test_token_inside_margin_needs_refresh() {
        let now = Utc::now();
        let cred = credential(now + Duration::seconds(30));
        assert!(cred.needs_refresh(Duration::seconds(60), now));
    }

    #[test]
    fn test_expired_token_needs_refresh() {
        let now = Utc::now();
        assert!(credential(now - Duration::hours(1)).needs_refresh(Duration::zero(), now));
    }

    #[test]
    fn test_apply_refresh_keeps_refresh_token_when_not_rotated() {
        let now = Utc::now();
        let mut cred = credential(now - Duration::minutes(1));
        cred.last_refresh_error = Some("HTTP 503".to_string());

        cred.apply_refresh(
            RefreshedTokens {
                access_token: SecretString::from("access-2".to_string()),
                refresh_token: None,
                expires_in: Duration::seconds(1800),
            },
            now,
        );

        assert_eq!(cred.access_token.expose_secret(), "access-2");
        assert_eq!(cred.refresh_token.expose_secret(), "refresh");
        assert_eq!(cred.expires_at, now + Duration::seconds(1800));
        assert!(cred.last_refresh_error.is_none());
    }

    #[test]
    fn test_apply_refresh_replaces_rotated_refresh_token() {
        let now = Utc::now();
        let mut cred = credential(now);
        cred.apply_refresh(
            RefreshedTokens {
                access_token: SecretString::from("access-2".to_string()),
                refresh_token: Some(SecretString::from("refresh-2".to_string())),
                expires_in: Duration::seconds(3600),
            },
            now,
        );
        assert_eq!(cred.refresh_token.expose_secret(), "refresh-2");
    }

    #[test]
    fn test_disable_keeps_previous_tokens() {
        let now = Utc::now();
        let expires_at = now - Duration::minutes(5);
        let mut cred = credential(expires_at);
        cred.disable("invalid_grant", now);
        assert!(!cred.enabled);
        assert_eq!(cred.expires_at, expires_at);
        assert_eq!(cred.access_token.expose_secret(), "access");
        assert_eq!(cred.last_refresh_error.as_deref(), Some("invalid_grant"));
    }

    #[test]
    fn test_debug_output_redacts_tokens() {
        let cred = credential(Utc::now());
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("\"access\""));
        assert!(!printed.contains("\"refresh\""));
    }
}
