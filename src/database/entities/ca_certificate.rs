//! Installed CA certificate entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ca_certificates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// CentralSystemRootCertificate or ManufacturerRootCertificate
    pub certificate_use: String,

    pub hash_algorithm: String,

    pub issuer_name_hash: String,

    pub issuer_key_hash: String,

    pub serial_number: String,

    /// PEM encoded certificate
    #[sea_orm(column_type = "Text")]
    pub certificate: String,

    /// An in-use certificate refuses deletion
    pub in_use: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
