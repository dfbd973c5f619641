use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Accounting provider a credential or canonical record belongs to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Deserialize, Serialize, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "provider")]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[sea_orm(string_value = "quickbooks")]
    QuickBooks,
    #[sea_orm(string_value = "xero")]
    Xero,
    #[sea_orm(string_value = "wave")]
    Wave,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuickBooks => write!(f, "QuickBooks"),
            Self::Xero => write!(f, "Xero"),
            Self::Wave => write!(f, "Wave"),
        }
    }
}
