use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE TYPE accounting_sync.audit_kind AS ENUM (
                    'refresh_attempt',
                    'refresh_success',
                    'refresh_failure',
                    'sync_upsert',
                    'sync_failure'
                )",
            )
            .await?;

        // Append-only: the application only ever inserts into this table.
        let create_table_sql = r#"
            CREATE TABLE IF NOT EXISTS accounting_sync.audit_entries (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                org_id VARCHAR(255) NOT NULL,
                provider accounting_sync.provider NOT NULL,
                kind accounting_sync.audit_kind NOT NULL,
                detail TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#;

        manager
            .get_connection()
            .execute_unprepared(create_table_sql)
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_audit_entries_org_provider_created_at
                 ON accounting_sync.audit_entries(org_id, provider, created_at)",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS accounting_sync.audit_entries")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP TYPE IF EXISTS accounting_sync.audit_kind")
            .await?;

        Ok(())
    }
}
