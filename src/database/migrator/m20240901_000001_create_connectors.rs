//! Create connectors table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connectors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connectors::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Connectors::Status)
                            .string()
                            .not_null()
                            .default("Available"),
                    )
                    .col(
                        ColumnDef::new(Connectors::LastNotifiedStatus)
                            .string()
                            .not_null()
                            .default("Available"),
                    )
                    .col(ColumnDef::new(Connectors::ErrorCode).string())
                    .col(ColumnDef::new(Connectors::Info).string())
                    .col(ColumnDef::new(Connectors::VendorId).string())
                    .col(ColumnDef::new(Connectors::VendorError).string())
                    .col(
                        ColumnDef::new(Connectors::StatusTimestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Connectors::TransactionId)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Connectors::TransactionIdOffline)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Connectors::TransactionStart).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Connectors::TransactionIdTag)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Connectors::TransactionParentIdTag)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Connectors::ReservationId)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Connectors::ReservationIdTag)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Connectors::ReservationParentIdTag)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Connectors::ReservationExpiryDate).timestamp_with_time_zone(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Connectors::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Connectors {
    Table,
    Id,
    Status,
    LastNotifiedStatus,
    ErrorCode,
    Info,
    VendorId,
    VendorError,
    StatusTimestamp,
    TransactionId,
    TransactionIdOffline,
    TransactionStart,
    TransactionIdTag,
    TransactionParentIdTag,
    ReservationId,
    ReservationIdTag,
    ReservationParentIdTag,
    ReservationExpiryDate,
}
