//! Charge point certificate entity
//!
//! A row starts its life as a pending CSR and is completed by the
//! certificate chain received in CertificateSigned.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cp_certificates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// PEM encoded certificate signing request
    #[sea_orm(column_type = "Text")]
    pub csr: String,

    /// PEM encoded certificate chain, empty while the CSR is pending
    #[sea_orm(column_type = "Text")]
    pub certificate_chain: String,

    pub requested_at: DateTimeUtc,

    #[sea_orm(nullable)]
    pub signed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
