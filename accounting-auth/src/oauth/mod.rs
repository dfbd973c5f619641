//! OAuth token lifecycle and accounting provider adapters.

mod provider;
mod registry;

pub mod providers;
pub mod token;

pub use provider::{
    Account, EntityKind, ProviderAdapter, ProviderKind, ProviderKindParseError, ProviderRecord,
};
pub use registry::Registry;
