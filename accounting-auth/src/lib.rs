//! # accounting-auth
//!
//! OAuth token lifecycle for multi-tenant accounting integrations:
//! - Credential model and the `CredentialStore` seam
//! - Single-flight token refresh per (org, provider) with a proactive sweeper
//! - QuickBooks, Xero and Wave provider adapters behind one `ProviderAdapter` trait
//! - HTTP client building with timeout and retry middleware
//! - AES-256-GCM sealing of tokens at rest and the audit trail seam
//!
//! ## Usage
//!
//! ```rust,ignore
//! use accounting_auth::oauth::token::{Coordinator, CoordinatorConfig};
//!
//! let coordinator = Coordinator::new(store, registry, audit, CoordinatorConfig::default());
//! let token = coordinator.ensure_valid_token("org-1", ProviderKind::Xero).await?;
//! ```

pub mod audit;
pub mod error;
pub mod http;
pub mod oauth;

pub use error::{Error, ErrorKind};
