//! Create authorization cache table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuthentCache::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthentCache::IdTag)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuthentCache::Status).string().not_null())
                    .col(ColumnDef::new(AuthentCache::ParentIdTag).string())
                    .col(ColumnDef::new(AuthentCache::ExpiryDate).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(AuthentCache::LastUsed)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuthentCache::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum AuthentCache {
    Table,
    IdTag,
    Status,
    ParentIdTag,
    ExpiryDate,
    LastUsed,
}
