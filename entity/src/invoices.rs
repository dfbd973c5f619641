use crate::provider::Provider;
use crate::Id;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(schema_name = "accounting_sync", table_name = "invoices")]
pub struct Model {
    #[serde(skip_deserializing)]
    #[sea_orm(primary_key)]
    pub id: Id,
    pub org_id: String,
    pub source: Provider,
    pub external_id: String,
    pub number: Option<String>,
    pub contact_external_id: Option<String>,
    pub status: String,
    pub currency: String,
    pub total_minor: i64,
    pub balance_minor: i64,
    pub issued_on: Option<Date>,
    pub due_on: Option<Date>,
    pub reference: String,
    #[serde(skip_deserializing)]
    pub created_at: DateTimeWithTimeZone,
    #[serde(skip_deserializing)]
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
