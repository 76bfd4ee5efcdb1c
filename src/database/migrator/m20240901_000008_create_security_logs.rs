//! Create security logs table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SecurityLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SecurityLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SecurityLogs::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SecurityLogs::EventType).string().not_null())
                    .col(ColumnDef::new(SecurityLogs::Message).text().not_null())
                    .col(
                        ColumnDef::new(SecurityLogs::Critical)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SecurityLogs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum SecurityLogs {
    Table,
    Id,
    Timestamp,
    EventType,
    Message,
    Critical,
}
