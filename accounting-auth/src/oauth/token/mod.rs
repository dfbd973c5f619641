//! OAuth credential lifecycle: storage, single-flight refresh and proactive sweeping.

mod cipher;
mod coordinator;
mod credential;
mod storage;
mod sweeper;

#[cfg(any(test, feature = "mock"))]
pub mod memory;

pub use cipher::TokenCipher;
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use credential::{Credential, CredentialKey, RefreshedTokens};
pub use storage::CredentialStore;
pub use sweeper::{SweepReport, Sweeper};
