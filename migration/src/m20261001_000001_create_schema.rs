use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("CREATE SCHEMA IF NOT EXISTS accounting_sync;")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("SET search_path TO accounting_sync, public;")
            .await?;

        // Shared by credentials, canonical records and audit entries.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE TYPE accounting_sync.provider AS ENUM ('quickbooks', 'xero', 'wave')",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // CASCADE removes every table and type in the schema
        manager
            .get_connection()
            .execute_unprepared("DROP SCHEMA IF EXISTS accounting_sync CASCADE;")
            .await?;

        Ok(())
    }
}
