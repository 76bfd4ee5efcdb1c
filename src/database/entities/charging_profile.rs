//! Installed charging profile entity
//!
//! The profile body is stored serialized; the ascending row id records the
//! installation order used for equal-stack-level tie breaking.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "charging_profiles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// `chargingProfileId` of the stored profile
    pub profile_id: i32,

    pub connector_id: i32,

    /// Profile serialized to its wire JSON form
    #[sea_orm(column_type = "Text")]
    pub profile: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
