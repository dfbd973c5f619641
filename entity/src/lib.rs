use uuid::Uuid;

pub mod audit_entries;
pub mod audit_kind;
pub mod contacts;
pub mod credentials;
pub mod invoices;
pub mod payments;
pub mod provider;

/// A type alias that represents any Entity's internal id field data type.
/// Aliased so that it's easy to change the underlying type if necessary.
pub type Id = Uuid;
