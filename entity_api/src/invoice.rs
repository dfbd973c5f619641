use super::error::Error;
use entity::invoices::{ActiveModel, Column, Entity, Model};
use entity::provider::Provider;
use entity::Id;
use log::debug;
use sea_orm::{
    entity::prelude::*,
    sea_query::{Alias, Expr, OnConflict},
    ActiveValue::Set,
    DatabaseConnection,
};

/// Finds an invoice by its provider-side id (unique per source)
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

/// Lists an org's invoices from one source
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

/// Inserts an invoice, or updates the row already stored under (external_id, source)
/// when it belongs to the same org. A row owned by another org is left untouched and
/// no row comes back, which surfaces as `RecordNotInserted` or `RecordNotFound`
/// depending on how the driver reports the empty RETURNING.
pub async fn upsert(db: &DatabaseConnection, model: Model) -> Result<Model, Error> {
    debug!(
        "Upserting invoice {} from {} for org_id: {}",
        model.external_id, model.source, model.org_id
    );

    let now = chrono::Utc::now();
    let active_model = ActiveModel {
        id: Set(Id::new_v4()),
        org_id: Set(model.org_id),
        source: Set(model.source),
        external_id: Set(model.external_id),
        number: Set(model.number),
        contact_external_id: Set(model.contact_external_id),
        status: Set(model.status),
        currency: Set(model.currency),
        total_minor: Set(model.total_minor),
        balance_minor: Set(model.balance_minor),
        issued_on: Set(model.issued_on),
        due_on: Set(model.due_on),
        reference: Set(model.reference),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };

    let on_conflict = OnConflict::columns([Column::ExternalId, Column::Source])
        .update_columns([
            Column::Number,
            Column::ContactExternalId,
            Column::Status,
            Column::Currency,
            Column::TotalMinor,
            Column::BalanceMinor,
            Column::IssuedOn,
            Column::DueOn,
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
