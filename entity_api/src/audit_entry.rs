use super::error::Error;
use entity::audit_entries::{ActiveModel, Column, Entity, Model};
use entity::provider::Provider;
use entity::Id;
use sea_orm::{entity::prelude::*, ActiveValue::Set, DatabaseConnection, QueryOrder, QuerySelect};

/// Appends an audit entry. Entries are never updated or deleted.
pub async fn create(db: &DatabaseConnection, model: Model) -> Result<Model, Error> {
    let active_model = ActiveModel {
        id: Set(Id::new_v4()),
        org_id: Set(model.org_id),
        provider: Set(model.provider),
        kind: Set(model.kind),
        detail: Set(model.detail),
        created_at: Set(model.created_at),
    };

    Ok(Entity::insert(active_model).exec_with_returning(db).await?)
}

/// Most recent entries for an org and provider, newest first
pub async fn find_recent(
    db: &DatabaseConnection,
    org_id: &str,
    provider: Provider,
    limit: u64,
) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::OrgId.eq(org_id))
        .filter(Column::Provider.eq(provider))
        .order_by_desc(Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?)
}

#[cfg(test)]
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use entity::audit_kind::AuditKind;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn test_model(kind: AuditKind) -> Model {
        Model {
            id: Id::new_v4(),
            org_id: "org-1".to_string(),
            provider: Provider::QuickBooks,
            kind,
            detail: "expires at 2024-03-01 10:00:00 UTC".to_string(),
            created_at: chrono::Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn create_returns_appended_entry() -> Result<(), Error> {
        let model = test_model(AuditKind::RefreshAttempt);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();

        let result = create(&db, model.clone()).await?;
        assert_eq!(result.kind, AuditKind::RefreshAttempt);
        Ok(())
    }

    #[tokio::test]
    async fn find_recent_returns_entries() -> Result<(), Error> {
        let entries = vec![
            test_model(AuditKind::RefreshSuccess),
            test_model(AuditKind::RefreshAttempt),
        ];
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![entries.clone()])
            .into_connection();

        let result = find_recent(&db, "org-1", Provider::QuickBooks, 10).await?;
        assert_eq!(result, entries);
        Ok(())
    }
}
