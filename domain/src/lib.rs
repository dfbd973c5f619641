//! Glue between the token lifecycle in `accounting-auth` and canonical storage.
//!
//! Callers depend on this crate only: provider, entity and error types they
//! need are re-exported here so they never reach into `entity_api` directly.
pub use accounting_auth::oauth::{Account, EntityKind, ProviderKind, ProviderRecord};
pub use accounting_auth::oauth::token::{SweepReport, Sweeper};

// Re-exports from `entity` crate via `entity_api`
pub use entity_api::{contacts, invoices, payments, Id};

pub mod audit_log;
pub mod credential_storage;
pub mod error;
pub mod integration;
pub mod provider;
pub mod sync;

pub use integration::Integrations;
