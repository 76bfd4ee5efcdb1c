//! Create local authorization list table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuthentLocalList::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthentLocalList::IdTag)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuthentLocalList::Status).string().not_null())
                    .col(ColumnDef::new(AuthentLocalList::ParentIdTag).string())
                    .col(ColumnDef::new(AuthentLocalList::ExpiryDate).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuthentLocalList::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum AuthentLocalList {
    Table,
    IdTag,
    Status,
    ParentIdTag,
    ExpiryDate,
}
