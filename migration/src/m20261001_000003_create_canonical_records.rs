use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Every canonical table is keyed by (external_id, source) so that re-syncing
        // the same provider record updates in place. Amounts are integer minor units.
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS accounting_sync.invoices (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                org_id VARCHAR(255) NOT NULL,
                source accounting_sync.provider NOT NULL,
                external_id VARCHAR(255) NOT NULL,

                number VARCHAR(255),
                contact_external_id VARCHAR(255),
                status VARCHAR(64) NOT NULL,
                currency CHAR(3) NOT NULL,
                total_minor BIGINT NOT NULL,
                balance_minor BIGINT NOT NULL,
                issued_on DATE,
                due_on DATE,
                reference TEXT NOT NULL,

                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                UNIQUE(external_id, source)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS accounting_sync.payments (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                org_id VARCHAR(255) NOT NULL,
                source accounting_sync.provider NOT NULL,
                external_id VARCHAR(255) NOT NULL,

                invoice_external_id VARCHAR(255),
                currency CHAR(3) NOT NULL,
                amount_minor BIGINT NOT NULL,
                paid_on DATE,
                reference TEXT NOT NULL,

                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                UNIQUE(external_id, source)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS accounting_sync.contacts (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                org_id VARCHAR(255) NOT NULL,
                source accounting_sync.provider NOT NULL,
                external_id VARCHAR(255) NOT NULL,

                display_name VARCHAR(512) NOT NULL,
                email VARCHAR(320),
                phone VARCHAR(64),
                is_customer BOOLEAN NOT NULL DEFAULT FALSE,
                is_supplier BOOLEAN NOT NULL DEFAULT FALSE,
                reference TEXT NOT NULL,

                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                UNIQUE(external_id, source)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_invoices_org_source ON accounting_sync.invoices(org_id, source)",
            "CREATE INDEX IF NOT EXISTS idx_payments_org_source ON accounting_sync.payments(org_id, source)",
            "CREATE INDEX IF NOT EXISTS idx_contacts_org_source ON accounting_sync.contacts(org_id, source)",
        ];

        for sql in statements {
            manager.get_connection().execute_unprepared(sql).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in ["contacts", "payments", "invoices"] {
            manager
                .get_connection()
                .execute_unprepared(&format!("DROP TABLE IF EXISTS accounting_sync.{table}"))
                .await?;
        }

        Ok(())
    }
}
