use super::error::Error;
use entity::payments::{ActiveModel, Column, Entity, Model};
use entity::provider::Provider;
use entity::Id;
use log::debug;
use sea_orm::{
    entity::prelude::*,
    sea_query::{Alias, Expr, OnConflict},
    ActiveValue::Set,
    DatabaseConnection,
};

/// Finds a payment by its provider-side id (unique per source)
pub async fn find_by_external_id(
    db: &DatabaseConnection,
    external_id: &str,
    source: Provider,
) -> Result<Option<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::ExternalId.eq(external_id))
        .filter(Column::Source.eq(source))
        .one(db)
        .await?)
}

/// Lists an org's payments from one source
pub async fn find_by_org_and_source(
    db: &DatabaseConnection,
    org_id: &str,
    source: Provider,
) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::OrgId.eq(org_id))
        .filter(Column::Source.eq(source))
        .all(db)
        .await?)
}

/// Inserts or updates a payment; see [`crate::invoice::upsert`] for conflict handling.
pub async fn upsert(db: &DatabaseConnection, model: Model) -> Result<Model, Error> {
    debug!(
        "Upserting payment {} from {} for org_id: {}",
        model.external_id, model.source, model.org_id
    );

    let now = chrono::Utc::now();
    let active_model = ActiveModel {
        id: Set(Id::new_v4()),
        org_id: Set(model.org_id),
        source: Set(model.source),
        external_id: Set(model.external_id),
        invoice_external_id: Set(model.invoice_external_id),
        currency: Set(model.currency),
        amount_minor: Set(model.amount_minor),
        paid_on: Set(model.paid_on),
        reference: Set(model.reference),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };

    let on_conflict = OnConflict::columns([Column::ExternalId, Column::Source])
        .update_columns([
            Column::InvoiceExternalId,
            Column::Currency,
            Column::AmountMinor,
            Column::PaidOn,
            Column::Reference,
            Column::UpdatedAt,
        ])
        .action_and_where(
            Expr::col((Entity, Column::OrgId)).equals((Alias::new("excluded"), Column::OrgId)),
        )
        .to_owned();

    Ok(Entity::insert(active_model)
        .on_conflict(on_conflict)
        .exec_with_returning(db)
        .await?)
}
