use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per (org, provider). Tokens are sealed with AES-256-GCM before they
        // are written; the database never sees plaintext. Rows are never deleted by
        // the sync core: a permanently failed refresh sets enabled = false.
        let create_table_sql = r#"
            CREATE TABLE IF NOT EXISTS accounting_sync.credentials (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                org_id VARCHAR(255) NOT NULL,
                provider accounting_sync.provider NOT NULL,
                external_account_id VARCHAR(255),

                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                last_refresh_error TEXT,

                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                UNIQUE(org_id, provider)
            )
        "#;

        manager
            .get_connection()
            .execute_unprepared(create_table_sql)
            .await?;

        // Drives the sweeper's selection of soon-to-expire credentials.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_credentials_enabled_expires_at
                 ON accounting_sync.credentials(expires_at) WHERE enabled",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS accounting_sync.credentials")
            .await?;

        Ok(())
    }
}
