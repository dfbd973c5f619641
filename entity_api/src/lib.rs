pub use entity::{
    audit_entries, audit_kind, contacts, credentials, invoices, payments, provider, Id,
};

pub mod audit_entry;
pub mod contact;
pub mod credential;
pub mod error;
pub mod invoice;
pub mod payment;
