//! Create per-transaction meter values table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MeterValuesTx::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MeterValuesTx::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MeterValuesTx::ConnectorId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MeterValuesTx::TransactionId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MeterValuesTx::Context).string().not_null())
                    .col(ColumnDef::new(MeterValuesTx::MeterValue).text().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MeterValuesTx::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum MeterValuesTx {
    Table,
    Id,
    ConnectorId,
    TransactionId,
    Context,
    MeterValue,
}
