//! Create charge point certificates table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CpCertificates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CpCertificates::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CpCertificates::Csr).text().not_null())
                    .col(
                        ColumnDef::new(CpCertificates::CertificateChain)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(CpCertificates::RequestedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CpCertificates::SignedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CpCertificates::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum CpCertificates {
    Table,
    Id,
    Csr,
    CertificateChain,
    RequestedAt,
    SignedAt,
}
