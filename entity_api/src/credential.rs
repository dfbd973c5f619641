use super::error::Error;
use entity::credentials::{ActiveModel, Column, Entity, Model};
use entity::provider::Provider;
use log::debug;
use sea_orm::{
    entity::prelude::*,
    ActiveValue::{Set, Unchanged},
    DatabaseConnection, QueryOrder, TryIntoModel,
};

/// Finds the credential for an org and provider (unique pair)
pub async fn find_by_org_and_provider(
    db: &DatabaseConnection,
    org_id: &str,
    provider: Provider,
) -> Result<Option<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::OrgId.eq(org_id))
        .filter(Column::Provider.eq(provider))
        .one(db)
        .await?)
}

/// Enabled credentials whose access token expires at or before `before`, soonest first
pub async fn find_expiring(
    db: &DatabaseConnection,
    before: DateTimeWithTimeZone,
) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::Enabled.eq(true))
        .filter(Column::ExpiresAt.lte(before))
        .order_by_asc(Column::ExpiresAt)
        .all(db)
        .await?)
}

/// Creates a new credential record
pub async fn create(db: &DatabaseConnection, model: Model) -> Result<Model, Error> {
    debug!(
        "Creating credential for org_id: {}, provider: {}",
        model.org_id, model.provider
    );

    let now = chrono::Utc::now();

    let active_model = ActiveModel {
        org_id: Set(model.org_id),
        provider: Set(model.provider),
        external_account_id: Set(model.external_account_id),
        access_token: Set(model.access_token),
        refresh_token: Set(model.refresh_token),
        expires_at: Set(model.expires_at),
        enabled: Set(model.enabled),
        last_refresh_error: Set(model.last_refresh_error),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    };

    Ok(active_model.save(db).await?.try_into_model()?)
}

/// Overwrites the mutable columns of an existing credential in a single UPDATE
pub async fn update(db: &DatabaseConnection, existing: Model, model: Model) -> Result<Model, Error> {
    debug!(
        "Updating credential for org_id: {}, provider: {}",
        existing.org_id, existing.provider
    );

    let active_model = ActiveModel {
        id: Unchanged(existing.id),
        org_id: Unchanged(existing.org_id),
        provider: Unchanged(existing.provider),
        external_account_id: Set(model.external_account_id),
        access_token: Set(model.access_token),
        refresh_token: Set(model.refresh_token),
        expires_at: Set(model.expires_at),
        enabled: Set(model.enabled),
        last_refresh_error: Set(model.last_refresh_error),
        created_at: Unchanged(existing.created_at),
        updated_at: Set(model.updated_at),
    };

    Ok(active_model.update(db).await?.try_into_model()?)
}

/// Writes a credential, creating the row when the (org_id, provider) pair is new
pub async fn save(db: &DatabaseConnection, model: Model) -> Result<Model, Error> {
    match find_by_org_and_provider(db, &model.org_id, model.provider).await? {
        Some(existing) => update(db, existing, model).await,
        None => create(db, model).await,
    }
}

#[cfg(test)]
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use entity::Id;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn test_model() -> Model {
        let now = chrono::Utc::now();
        Model {
            id: Id::new_v4(),
            org_id: "org-1".to_string(),
            provider: Provider::Xero,
            external_account_id: Some("tenant-1".to_string()),
            access_token: "sealed-access".to_string(),
            refresh_token: "sealed-refresh".to_string(),
            expires_at: (now + chrono::Duration::minutes(30)).into(),
            enabled: true,
            last_refresh_error: None,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[tokio::test]
    async fn find_by_org_and_provider_returns_none_when_not_found() -> Result<(), Error> {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<Model, Vec<Model>, _>(vec![vec![]])
            .into_connection();

        let result = find_by_org_and_provider(&db, "org-1", Provider::Wave).await?;
        assert!(result.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn find_expiring_returns_matching_credentials() -> Result<(), Error> {
        let model = test_model();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();

        let before: DateTimeWithTimeZone = (chrono::Utc::now() + chrono::Duration::hours(1)).into();
        let result = find_expiring(&db, before).await?;
        assert_eq!(result, vec![model]);
        Ok(())
    }

    #[tokio::test]
    async fn save_creates_when_pair_is_new() -> Result<(), Error> {
        let model = test_model();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // find_by_org_and_provider
            .append_query_results::<Model, Vec<Model>, _>(vec![vec![]])
            // insert returning
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();

        let result = save(&db, model.clone()).await?;
        assert_eq!(result.id, model.id);
        Ok(())
    }

    #[tokio::test]
    async fn save_updates_existing_pair() -> Result<(), Error> {
        let existing = test_model();
        let mut refreshed = existing.clone();
        refreshed.access_token = "sealed-access-2".to_string();
        refreshed.refresh_token = "sealed-refresh-2".to_string();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![existing.clone()]])
            .append_query_results(vec![vec![refreshed.clone()]])
            .into_connection();

        let result = save(&db, refreshed.clone()).await?;
        assert_eq!(result.access_token, "sealed-access-2");
        assert_eq!(result.refresh_token, "sealed-refresh-2");
        assert_eq!(result.id, existing.id);
        Ok(())
    }
}
