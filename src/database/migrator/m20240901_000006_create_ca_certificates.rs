//! Create CA certificates table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CaCertificates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CaCertificates::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CaCertificates::CertificateUse)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CaCertificates::HashAlgorithm)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CaCertificates::IssuerNameHash)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CaCertificates::IssuerKeyHash)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CaCertificates::SerialNumber)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CaCertificates::Certificate).text().not_null())
                    .col(
                        ColumnDef::new(CaCertificates::InUse)
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
            .drop_table(Table::drop().table(CaCertificates::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum CaCertificates {
    Table,
    Id,
    CertificateUse,
    HashAlgorithm,
    IssuerNameHash,
    IssuerKeyHash,
    SerialNumber,
    Certificate,
    InUse,
}
