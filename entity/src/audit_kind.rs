use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumIter, Deserialize, Serialize, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "audit_kind")]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    #[sea_orm(string_value = "refresh_attempt")]
    RefreshAttempt,
    #[sea_orm(string_value = "refresh_success")]
    RefreshSuccess,
    #[sea_orm(string_value = "refresh_failure")]
    RefreshFailure,
    #[sea_orm(string_value = "sync_upsert")]
    SyncUpsert,
    #[sea_orm(string_value = "sync_failure")]
    SyncFailure,
}
